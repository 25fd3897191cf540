//! Errors raised while loading configuration and opening the database

use thiserror::Error;

/// Common result type for NLM operations
pub type Result<T> = std::result::Result<T, Error>;

/// Startup errors shared by NLM services
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation error (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),
}
