//! Error types for galaxy-throttle.

use thiserror::Error;

use crate::registry::RegistryError;
use crate::store::StoreError;

/// Main error type for galaxy-throttle operations.
#[derive(Error, Debug)]
pub enum ThrottleError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Key-value store errors
    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),

    /// User registry errors
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for galaxy-throttle operations.
pub type Result<T> = std::result::Result<T, ThrottleError>;
