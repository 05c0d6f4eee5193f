use thiserror::Error;

pub type Result<T> = std::result::Result<T, NotebookError>;

/// Error taxonomy for the query engine.
///
/// `ProviderUnavailable` is recovered inside the query orchestrator (the
/// failing tier declines and the next tier runs); the other variants surface
/// to callers as structured failures with a human-readable message.
#[derive(Error, Debug)]
pub enum NotebookError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("Content too large: {actual} bytes exceeds limit of {limit} bytes")]
    ContentTooLarge { actual: usize, limit: usize },

    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl From<sqlx::Error> for NotebookError {
    #[inline]
    fn from(error: sqlx::Error) -> Self {
        Self::Database(error.to_string())
    }
}

pub mod chunker;
pub mod commands;
pub mod config;
pub mod database;
pub mod embeddings;
pub mod engine;
pub mod generation;
pub mod retrieval;
