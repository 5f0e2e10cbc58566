//! Bootstrap error types

use thiserror::Error;

/// Result type for bootstrap operations
pub type Result<T> = std::result::Result<T, CommonError>;

#[derive(Debug, Error)]
pub enum CommonError {
    /// Configuration could not be loaded or parsed
    #[error("Configuration error: {0}")]
    Config(String),

    /// Logging subscriber could not be installed
    #[error("Logging error: {0}")]
    Logging(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for CommonError {
    fn from(err: figment::Error) -> Self {
        CommonError::Config(err.to_string())
    }
}
