// src/error.rs
// Standardized error types for Kingfisher

use thiserror::Error;

/// Main error type for the Kingfisher library
#[derive(Error, Debug)]
pub enum KingfisherError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("embedding error: {0}")]
    Embedding(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("content fetch error: {0}")]
    Fetch(String),

    #[error("task cancelled")]
    Cancelled,

    #[error("unknown error: {0}")]
    Other(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

/// Convenience type alias for Result using KingfisherError
pub type Result<T> = std::result::Result<T, KingfisherError>;

impl From<String> for KingfisherError {
    fn from(s: String) -> Self {
        KingfisherError::Other(s)
    }
}

impl From<tokio::task::JoinError> for KingfisherError {
    fn from(err: tokio::task::JoinError) -> Self {
        if err.is_cancelled() {
            KingfisherError::Cancelled
        } else {
            KingfisherError::Other(err.to_string())
        }
    }
}

impl From<KingfisherError> for String {
    fn from(err: KingfisherError) -> Self {
        err.to_string()
    }
}
