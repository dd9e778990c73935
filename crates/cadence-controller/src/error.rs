use cadence_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ControllerError {
    /// Rejected before anything was persisted.
    #[error("Invalid schedule config: {0}")]
    Validation(String),

    #[error("Access to tenant {tenant_id} denied")]
    Forbidden { tenant_id: String },

    #[error("Operator access required")]
    OperatorOnly,

    #[error("No schedule for tenant {tenant_id}")]
    NotFound { tenant_id: String },

    /// Schedule store or run ledger unavailable.
    #[error("Persistence error: {0}")]
    Persistence(#[from] StoreError),
}

impl ControllerError {
    /// Short error code string sent to clients in JSON error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "CONFIG_VALIDATION_ERROR",
            Self::Forbidden { .. } | Self::OperatorOnly => "FORBIDDEN",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Persistence(_) => "PERSISTENCE_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, ControllerError>;
