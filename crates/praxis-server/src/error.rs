use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use praxis_core::CoreError;

// ---------------------------------------------------------------------------
// AppError — unified error type for HTTP responses
// ---------------------------------------------------------------------------

/// Everything surfaced to a client carries `{code, message, type,
/// correlation_id}`. Stack traces and SQL text never leave the process; 5xx
/// details go to the log under the correlation id instead.
#[derive(Debug)]
pub enum AppError {
    Core(CoreError),
    Unauthorized(String),
}

impl AppError {
    pub fn unauthorized(msg: impl Into<String>) -> Self {
        AppError::Unauthorized(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        AppError::Core(CoreError::Validation(msg.into()))
    }

    /// (status, code, class, client-visible message)
    fn parts(&self) -> (StatusCode, &'static str, &'static str, String) {
        match self {
            AppError::Unauthorized(msg) => {
                (StatusCode::UNAUTHORIZED, "unauthorized", "auth", msg.clone())
            }
            AppError::Core(err) => match err {
                CoreError::NotFound(_) => {
                    (StatusCode::NOT_FOUND, "not_found", "not_found", err.to_string())
                }
                CoreError::Conflict(_) => {
                    (StatusCode::CONFLICT, "conflict", "conflict", err.to_string())
                }
                CoreError::DuplicateVote { .. } => (
                    StatusCode::CONFLICT,
                    "duplicate_vote",
                    "conflict",
                    err.to_string(),
                ),
                CoreError::InvalidState(_) => (
                    StatusCode::CONFLICT,
                    "invalid_state",
                    "conflict",
                    err.to_string(),
                ),
                CoreError::IllegalTransition { .. } => (
                    StatusCode::CONFLICT,
                    "illegal_transition",
                    "conflict",
                    err.to_string(),
                ),
                CoreError::Forbidden(_) => {
                    (StatusCode::FORBIDDEN, "forbidden", "forbidden", err.to_string())
                }
                CoreError::Validation(_) => (
                    StatusCode::UNPROCESSABLE_ENTITY,
                    "validation",
                    "validation",
                    err.to_string(),
                ),
                // Already retried once inside the engine; tell the client to
                // try again.
                CoreError::StaleWrite { .. } => (
                    StatusCode::CONFLICT,
                    "stale_write",
                    "conflict",
                    format!("{err}; retry the request"),
                ),
                CoreError::Unavailable(_) => (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "unavailable",
                    "unavailable",
                    "storage unavailable".to_string(),
                ),
                CoreError::Internal(_) => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal",
                    "internal",
                    "internal error".to_string(),
                ),
            },
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let correlation_id = uuid::Uuid::new_v4();
        let (status, code, class, message) = self.parts();

        if status.is_server_error() {
            tracing::error!(%correlation_id, error = ?self, "request failed");
        } else {
            tracing::warn!(%correlation_id, code, %message, "request rejected");
        }

        let body = serde_json::json!({
            "code": code,
            "message": message,
            "type": class,
            "correlation_id": correlation_id,
        });
        (status, axum::Json(body)).into_response()
    }
}

impl From<CoreError> for AppError {
    fn from(err: CoreError) -> Self {
        AppError::Core(err)
    }
}

/// Recovery boundary for handler panics: log the payload under a correlation
/// id, answer with the generic 500 body.
pub fn handle_panic(payload: Box<dyn std::any::Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else {
        "non-string panic payload".to_string()
    };
    AppError::Core(CoreError::Internal(detail)).into_response()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
