use axum::{
    extract::rejection::{JsonRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use cadence_controller::ControllerError;
use serde_json::json;
use tracing::error;

/// JSON error body `{ "error": ..., "code": ... }` with its status.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    pub fn unauthorized() -> Self {
        Self::new(
            StatusCode::UNAUTHORIZED,
            "UNAUTHORIZED",
            "missing or unknown bearer token",
        )
    }

    fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::UNPROCESSABLE_ENTITY,
            "CONFIG_VALIDATION_ERROR",
            message,
        )
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn code(&self) -> &'static str {
        self.code
    }
}

impl From<ControllerError> for ApiError {
    fn from(e: ControllerError) -> Self {
        let status = match &e {
            ControllerError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ControllerError::Forbidden { .. } | ControllerError::OperatorOnly => {
                StatusCode::FORBIDDEN
            }
            ControllerError::NotFound { .. } => StatusCode::NOT_FOUND,
            ControllerError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        // store internals stay in the log
        let message = if status.is_server_error() {
            error!(error = %e, "schedule request failed");
            "persistence layer unavailable".to_string()
        } else {
            e.to_string()
        };
        Self::new(status, e.code(), message)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::invalid_request(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::invalid_request(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(json!({"error": self.message, "code": self.code})),
        )
            .into_response()
    }
}
