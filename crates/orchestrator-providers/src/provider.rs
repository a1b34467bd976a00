use async_trait::async_trait;
use orchestrator_core::ModelName;
use serde_json::Value;

use crate::capability::Capability;
use crate::model::GenerationParams;

/// A request dispatched to a single model via its `AiProvider`.
#[derive(Debug, Clone)]
pub struct CapabilityRequest {
    pub capability: Capability,
    pub input: Value,
    pub generation: GenerationParams,
    /// Per-call timeout, taken from the resolved model descriptor.
    pub timeout_ms: u64,
}

/// Token accounting for a single completed call.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub cost: f64,
}

#[derive(Debug, Clone)]
pub struct CapabilityResponse {
    pub output: Value,
    pub model_used: ModelName,
    pub usage: TokenUsage,
    pub confidence: f32,
    pub elapsed_ms: u64,
    /// Set by the orchestrator, not the provider: whether this result came
    /// from anywhere but the first model tried in the chain.
    pub fallback_used: bool,
}

/// Classification of a provider-level failure. Consumed by the orchestrator
/// for circuit-breaker bookkeeping and retry decisions; never surfaced
/// outside the orchestrator as a provider-specific shape.
#[derive(Debug, thiserror::Error, Clone)]
pub enum ProviderError {
    #[error("timeout after {0}ms")]
    Timeout(u64),
    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimit { retry_after_ms: u64 },
    #[error("quota exceeded")]
    QuotaExceeded,
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("model unavailable: {0}")]
    ModelUnavailable(String),
    #[error("confidence {observed} below threshold {threshold}")]
    LowConfidence { observed: f32, threshold: f32 },
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("unknown error: {0}")]
    Unknown(String),
}

impl ProviderError {
    pub fn kind(&self) -> &'static str {
        match self {
            ProviderError::Timeout(_) => "timeout",
            ProviderError::RateLimit { .. } => "rate_limit",
            ProviderError::QuotaExceeded => "quota",
            ProviderError::Auth(_) => "auth",
            ProviderError::Network(_) => "network",
            ProviderError::ModelUnavailable(_) => "model_unavailable",
            ProviderError::LowConfidence { .. } => "low_confidence",
            ProviderError::InvalidResponse(_) => "invalid_response",
            ProviderError::Unknown(_) => "unknown",
        }
    }
}

/// Capability interface every AI model provider must implement. The core
/// never speaks a provider's wire protocol directly — only this trait.
#[async_trait]
pub trait AiProvider: Send + Sync {
    /// Provider tag for logging and cost/usage bookkeeping.
    fn name(&self) -> &str;

    async fn call(
        &self,
        model: &ModelName,
        req: &CapabilityRequest,
    ) -> Result<CapabilityResponse, ProviderError>;
}
