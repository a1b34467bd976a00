use thiserror::Error;

#[derive(Debug, Error)]
pub enum ContextError {
    #[error("context not found for conversation: {0}")]
    NotFound(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ContextError>;
