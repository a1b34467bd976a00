use thiserror::Error;

/// Errors surfaced by [`crate::turn::MessagePipeline::process_turn`] (§4.5).
/// Sub-step failures inside the fan-out are absorbed and never reach here —
/// only gate rejections, budget exhaustion, and a fully-exhausted
/// generation call become visible at this boundary.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("unknown conversation: {0}")]
    UnknownConversation(String),

    #[error("conversation cannot receive messages in its current state")]
    NotReceivable,

    #[error("pipeline timed out after {ms}ms")]
    PipelineTimeout { ms: u64 },

    #[error("all providers failed for the generation step ({attempts} attempt(s))")]
    AllProvidersFailed { attempts: usize },

    #[error("no model supports response generation")]
    NoCandidate,
}

pub type Result<T> = std::result::Result<T, PipelineError>;
