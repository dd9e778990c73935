use cadence_store::StoreError;
use thiserror::Error;

/// Errors raised while talking to the rule engine or reading desired state.
#[derive(Debug, Error)]
pub enum RuleError {
    /// Transport-level failure reaching the rule engine.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The rule engine answered with a non-success status.
    #[error("Rule engine error {status}: {message}")]
    Api { status: u16, message: String },

    /// The rule engine's response could not be decoded.
    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Rule not found: {name}")]
    NotFound { name: String },

    /// The schedule store could not be read.
    #[error("Persistence error: {0}")]
    Store(#[from] StoreError),
}

impl RuleError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Http(_) | Self::Api { .. } | Self::Parse(_) => "RECONCILIATION_ERROR",
            Self::NotFound { .. } => "RULE_NOT_FOUND",
            Self::Store(_) => "PERSISTENCE_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, RuleError>;
