use axum::{Json, http::StatusCode, response::{IntoResponse, Response}};
use serde::Serialize;

use crate::session::SessionError;

/// JSON error body returned by every failing route.
#[derive(Debug, Serialize)]
pub struct ApiErrorBody {
    pub error: &'static str,
    pub message: String,
}

/// HTTP-mapped error for the boundary layer.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub body: ApiErrorBody,
}

impl ApiError {
    pub fn new(status: StatusCode, error: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            body: ApiErrorBody {
                error,
                message: message.into(),
            },
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "validation_error", message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

impl From<SessionError> for ApiError {
    fn from(error: SessionError) -> Self {
        let message = error.to_string();
        match error {
            SessionError::NotFound => {
                Self::new(StatusCode::NOT_FOUND, "session_not_found", message)
            }
            SessionError::AlreadyExists => {
                Self::new(StatusCode::CONFLICT, "session_already_exists", message)
            }
            SessionError::NotConnected => {
                Self::new(StatusCode::CONFLICT, "session_not_connected", message)
            }
            SessionError::NotAuthenticated => {
                Self::new(StatusCode::CONFLICT, "session_not_authenticated", message)
            }
            SessionError::Validation(_) => {
                Self::new(StatusCode::BAD_REQUEST, "validation_error", message)
            }
            SessionError::ChannelClosed => {
                Self::new(StatusCode::SERVICE_UNAVAILABLE, "session_unavailable", message)
            }
            SessionError::Transient(_) => {
                Self::new(StatusCode::SERVICE_UNAVAILABLE, "transient_error", message)
            }
            SessionError::Permanent(_) => Self::new(StatusCode::GONE, "permanent_error", message),
            SessionError::Internal(_) => {
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", message)
            }
        }
    }
}
