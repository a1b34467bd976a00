use std::collections::HashSet;

use orchestrator_core::ModelName;
use serde::{Deserialize, Serialize};

use crate::capability::Capability;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelType {
    Chat,
    Embedding,
    Classification,
}

/// Per-call generation knobs. `None` fields fall back to the descriptor's
/// configured defaults at dispatch time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerationParams {
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub frequency_penalty: Option<f32>,
    pub presence_penalty: Option<f32>,
}

/// A catalog entry in the Provider Registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub name: ModelName,
    pub provider: String,
    pub model_type: ModelType,
    pub capabilities: HashSet<Capability>,
    pub max_tokens: u32,
    pub context_window: u32,
    pub generation: GenerationParams,
    pub cost_per_1k_tokens: f64,
    pub request_timeout_ms: u64,
    pub retry_count: u32,
    /// Ordered names to fall back to, starting from this descriptor.
    pub fallback_models: Vec<ModelName>,
    pub active: bool,
}

impl ModelDescriptor {
    pub fn supports(&self, cap: Capability) -> bool {
        self.capabilities.contains(&cap)
    }
}
