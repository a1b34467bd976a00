//! Response generation (§4.5 step 4): packs the utterance, the fan-out
//! analyses, retrieval snippets, and a context summary into a generation
//! request and dispatches it through the AI Orchestrator.

use orchestrator_core::conversation::LayeredContext;
use orchestrator_providers::{
    AiOrchestrator, Capability, CapabilityRequest, CapabilityResponse, GenerationParams,
    OrchestrationError,
};
use serde_json::{json, Value};

use crate::analysis::AnalysisBundle;
use crate::retrieval::RetrievalSnippet;

pub struct GeneratedResponse {
    pub text: String,
    pub model_used: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub confidence: f32,
    pub elapsed_ms: u64,
    pub fallback_used: bool,
}

fn pack_prompt(
    utterance: &str,
    analyses: &AnalysisBundle,
    snippets: &[RetrievalSnippet],
    ctx: &LayeredContext,
) -> Value {
    json!({
        "utterance": utterance,
        "intent": analyses.intent.as_ref().map(|i| &i.intent),
        "sentiment": analyses.sentiment.as_ref().map(|s| format!("{:?}", s.label)),
        "emotion": analyses.emotion.as_ref().map(|e| format!("{:?}", e.label)),
        "entities": analyses.entities.as_ref().map(|e| &e.entities),
        "retrieved_snippets": snippets.iter().map(|s| &s.text).collect::<Vec<_>>(),
        "context_summary": {
            "tier": format!("{:?}", ctx.user.tier),
            "vip": ctx.user.vip,
            "language": ctx.user.language,
            "last_intent": ctx.ai.last_intent.as_ref().map(|i| i.intent.clone()),
        },
    })
}

pub async fn generate_response(
    orchestrator: &AiOrchestrator,
    utterance: &str,
    analyses: &AnalysisBundle,
    snippets: &[RetrievalSnippet],
    ctx: &LayeredContext,
    timeout_ms: u64,
) -> Result<GeneratedResponse, OrchestrationError> {
    let req = CapabilityRequest {
        capability: Capability::TextGeneration,
        input: pack_prompt(utterance, analyses, snippets, ctx),
        generation: GenerationParams::default(),
        timeout_ms,
    };

    let resp: CapabilityResponse = orchestrator.process(req, None).await?;
    let text = resp
        .output
        .get("text")
        .and_then(Value::as_str)
        .unwrap_or("I'm here to help — could you tell me more?")
        .to_string();

    Ok(GeneratedResponse {
        text,
        model_used: resp.model_used.to_string(),
        prompt_tokens: resp.usage.prompt_tokens,
        completion_tokens: resp.usage.completion_tokens,
        confidence: resp.confidence,
        elapsed_ms: resp.elapsed_ms,
        fallback_used: resp.fallback_used,
    })
}
