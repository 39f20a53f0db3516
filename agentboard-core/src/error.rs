//! Error types for agentboard-core

use thiserror::Error;

/// Main error type for the agentboard-core library
#[derive(Error, Debug)]
pub enum Error {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Network-level failure on the event stream (recoverable by reconnecting)
    #[error("transport error: {0}")]
    Transport(String),

    /// Non-success response from the task API
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Task not found
    #[error("task not found: {0}")]
    TaskNotFound(String),

    /// No async runtime to spawn connection work on
    #[error("runtime error: {0}")]
    Runtime(String),
}

/// Result type alias for agentboard-core
pub type Result<T> = std::result::Result<T, Error>;
