//! Error types for rovelink core library.

use thiserror::Error;

/// Result type alias using rovelink Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for rovelink operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}
