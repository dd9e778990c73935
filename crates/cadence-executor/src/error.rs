use cadence_store::StoreError;
use thiserror::Error;

/// Failures reported by the ingestion collaborator.
#[derive(Debug, Error)]
pub enum IngestionError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Ingestion service unavailable: {0}")]
    Unavailable(String),
}

/// Errors surfaced by [`SyncExecutor`](crate::SyncExecutor).
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// Another run holds the key. Not a failure: recorded as `skipped`.
    #[error("Run already in progress for {key} (run {running_run_id})")]
    ConcurrentRun { key: String, running_run_id: String },

    /// The ingestion collaborator raised.
    #[error("Ingestion failed: {0}")]
    Ingestion(#[from] IngestionError),

    /// The in-process timeout elapsed.
    #[error("Sync timed out after {secs}s")]
    Timeout { secs: u64 },

    /// The ledger could not be read or written.
    #[error("Persistence error: {0}")]
    Persistence(StoreError),
}

impl ExecutorError {
    pub fn code(&self) -> &'static str {
        match self {
            ExecutorError::ConcurrentRun { .. } => "CONCURRENT_RUN",
            ExecutorError::Ingestion(_) => "EXECUTOR_ERROR",
            ExecutorError::Timeout { .. } => "EXECUTOR_TIMEOUT",
            ExecutorError::Persistence(_) => "PERSISTENCE_ERROR",
        }
    }
}

impl From<StoreError> for ExecutorError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::ConcurrentRun {
                key,
                running_run_id,
            } => ExecutorError::ConcurrentRun {
                key,
                running_run_id,
            },
            other => ExecutorError::Persistence(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, ExecutorError>;
