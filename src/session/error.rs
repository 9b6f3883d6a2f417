use thiserror::Error;

use crate::wa::WaError;

/// Errors for session manager and handle operations.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session already exists")]
    AlreadyExists,
    #[error("session not found")]
    NotFound,
    #[error("session is not connected")]
    NotConnected,
    #[error("session has no paired user")]
    NotAuthenticated,
    #[error("invalid request: {0}")]
    Validation(String),
    #[error("session task is unavailable")]
    ChannelClosed,
    #[error("transient failure: {0}")]
    Transient(String),
    #[error("permanent failure: {0}")]
    Permanent(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<WaError> for SessionError {
    fn from(error: WaError) -> Self {
        match error {
            WaError::NotAuthenticated => Self::NotAuthenticated,
            WaError::Timeout => Self::Transient("protocol query timed out".to_owned()),
            WaError::Transport(message) => Self::Transient(message),
            WaError::Rejected(message) => Self::Permanent(message),
        }
    }
}
