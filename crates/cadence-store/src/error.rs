use thiserror::Error;

/// Errors that can occur within the schedule store and run ledger.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying SQLite / rusqlite error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// The database file's directory could not be created.
    #[error("Cannot create database directory {path}: {source}")]
    Directory {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Another run holds the `running` row for this key.
    #[error("Run already in progress for {key} (run {running_run_id})")]
    ConcurrentRun { key: String, running_run_id: String },

    /// No ledger row with the given ID exists.
    #[error("Run not found: {run_id}")]
    RunNotFound { run_id: String },

    /// The row was already finalized; a run ends exactly once.
    #[error("Run {run_id} already finalized as {status}")]
    AlreadyFinalized { run_id: String, status: String },

    /// A mutex around a shared connection was poisoned by a panicking holder.
    #[error("Connection lock poisoned")]
    LockPoisoned,
}

impl StoreError {
    pub fn code(&self) -> &'static str {
        match self {
            StoreError::ConcurrentRun { .. } => "CONCURRENT_RUN",
            StoreError::RunNotFound { .. } => "RUN_NOT_FOUND",
            StoreError::AlreadyFinalized { .. } => "RUN_ALREADY_FINALIZED",
            StoreError::Database(_) | StoreError::Directory { .. } | StoreError::LockPoisoned => {
                "PERSISTENCE_ERROR"
            }
        }
    }

    /// True when the store itself is unavailable (as opposed to a logical
    /// conflict). Callers back off and retry on these.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            StoreError::Database(_) | StoreError::Directory { .. } | StoreError::LockPoisoned
        )
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
