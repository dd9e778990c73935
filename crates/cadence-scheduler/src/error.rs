use cadence_store::StoreError;
use thiserror::Error;

/// Errors that can occur within the in-process trigger engine.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Schedule store or run ledger unavailable.
    #[error("Persistence error: {0}")]
    Store(#[from] StoreError),

    /// The engine loop has exited; its handle can no longer arm slots.
    #[error("Trigger engine stopped")]
    Stopped,
}

impl SchedulerError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Store(_) => "PERSISTENCE_ERROR",
            Self::Stopped => "SCHEDULER_STOPPED",
        }
    }
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
