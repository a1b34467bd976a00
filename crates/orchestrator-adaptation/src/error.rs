use thiserror::Error;

#[derive(Debug, Error)]
pub enum AdaptationError {
    /// An intent-handler parameter required `required=true` in its whitelist
    /// was absent from the turn's extracted parameters.
    #[error("missing required parameter: {0}")]
    MissingParameter(String),

    /// The turn's channel is not in the handler's supported-channels list.
    #[error("channel {channel} not supported by handler {handler}")]
    UnsupportedChannel { channel: String, handler: String },

    /// Detection confidence fell below the handler's configured threshold.
    #[error("confidence {observed} below handler threshold {threshold}")]
    BelowThreshold { observed: f32, threshold: f32 },
}

pub type Result<T> = std::result::Result<T, AdaptationError>;
