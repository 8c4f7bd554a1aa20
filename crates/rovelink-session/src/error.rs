//! Session error types.

use std::time::Duration;

/// Errors surfaced by [`ConnectionManager::connect`](crate::ConnectionManager::connect).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Connection timed out after {0:?}")]
    Timeout(Duration),

    #[error("Connection attempt cancelled")]
    Cancelled,

    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),
}
