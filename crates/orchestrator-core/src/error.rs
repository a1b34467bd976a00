use thiserror::Error;

/// Taxonomic error surface for the whole orchestrator, per the error
/// handling design: every component crate propagates its own error enum
/// up into one of these variants rather than leaking its internal shape.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("invalid tenant: {0}")]
    InvalidTenant(String),

    #[error("unknown conversation: {0}")]
    UnknownConversation(String),

    #[error("invalid transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("conversation cannot receive messages in its current state")]
    NotReceivable,

    #[error("a turn is already in progress for this conversation")]
    TurnInProgress,

    #[error("no model supports the requested capability")]
    NoCandidate,

    #[error("all providers failed: {attempts} attempt(s)")]
    AllProvidersFailed { attempts: usize },

    #[error("pipeline timed out after {ms}ms")]
    PipelineTimeout { ms: u64 },

    #[error("sync conflict for {object_type}/{local_id}")]
    SyncConflict { object_type: String, local_id: String },

    #[error("sync failure: {0}")]
    SyncFailure(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl OrchestratorError {
    /// Stable short code, suitable for surfacing at the public API boundary.
    pub fn code(&self) -> &'static str {
        match self {
            OrchestratorError::InvalidTenant(_) => "INVALID_TENANT",
            OrchestratorError::UnknownConversation(_) => "UNKNOWN_CONVERSATION",
            OrchestratorError::InvalidTransition { .. } => "INVALID_TRANSITION",
            OrchestratorError::NotReceivable => "NOT_RECEIVABLE",
            OrchestratorError::TurnInProgress => "TURN_IN_PROGRESS",
            OrchestratorError::NoCandidate => "NO_CANDIDATE",
            OrchestratorError::AllProvidersFailed { .. } => "ALL_PROVIDERS_FAILED",
            OrchestratorError::PipelineTimeout { .. } => "PIPELINE_TIMEOUT",
            OrchestratorError::SyncConflict { .. } => "SYNC_CONFLICT",
            OrchestratorError::SyncFailure(_) => "SYNC_FAILURE",
            OrchestratorError::Config(_) => "CONFIG_ERROR",
            OrchestratorError::Serialization(_) => "SERIALIZATION_ERROR",
            OrchestratorError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;
