use thiserror::Error;

#[derive(Debug, Error)]
pub enum CadenceError {
    #[error("Configuration error: {0}")]
    Config(String),

    /// A trigger mechanism could not complete a reconciliation pass at all
    /// (per-schedule failures are reported inside the summary instead).
    #[error("Reconciliation failed ({mechanism}): {reason}")]
    Reconciliation { mechanism: String, reason: String },
}

impl CadenceError {
    /// Short error code string sent to clients in JSON error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            CadenceError::Config(_) => "CONFIG_ERROR",
            CadenceError::Reconciliation { .. } => "RECONCILIATION_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, CadenceError>;
