use thiserror::Error;

#[derive(Debug, Error)]
pub enum AnalyticsError {
    #[error("no live metrics for conversation: {0}")]
    NotTracked(String),

    #[error("conversation already finalized: {0}")]
    AlreadyFinalized(String),
}

pub type Result<T> = std::result::Result<T, AnalyticsError>;
