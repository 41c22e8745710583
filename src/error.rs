//! Error types for Parley.
//!
//! Library code returns [`ParleyError`]; the binary converts to
//! `Box<dyn Error>` at the edge.

use async_openai::error::OpenAIError;
use thiserror::Error;

/// Every failure the library can report.
#[derive(Error, Debug)]
pub enum ParleyError {
    /// Invalid or inconsistent configuration values.
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] diesel::result::Error),

    #[error("Database connection error: {0}")]
    Connection(#[from] diesel::ConnectionError),

    /// Errors returned by the chat-completion API client.
    #[error("API error: {0}")]
    Api(#[from] OpenAIError),

    /// Model loading or inference failures while embedding text.
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// The document could not be read as text.
    #[error("Unsupported document {path}: {reason}")]
    UnsupportedDocument { path: String, reason: String },

    /// The ANN index rejected an operation.
    #[error("Index error: {0}")]
    Index(String),

    #[error("Unknown personality: {0}")]
    UnknownPersonality(String),

    #[error("Refusing to send an empty message")]
    EmptyInput,

    /// A slash command with missing or malformed arguments.
    #[error("Usage: {0}")]
    Usage(String),

    /// Knowledge-base snapshot could not be encoded or decoded.
    #[error("Snapshot error: {0}")]
    Snapshot(String),
}

impl From<candle_core::Error> for ParleyError {
    fn from(err: candle_core::Error) -> Self {
        ParleyError::Embedding(err.to_string())
    }
}

/// Convenience alias used across the crate.
pub type Result<T> = std::result::Result<T, ParleyError>;
