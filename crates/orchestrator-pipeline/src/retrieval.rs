//! Knowledge retrieval (§4.5 step 3): only run once an intent has been
//! determined. Formulates a query from intent + parameters + a context
//! snapshot, dispatches the retrieval capability, and retains up to `k`
//! snippets.

use orchestrator_core::conversation::LayeredContext;
use orchestrator_providers::{AiOrchestrator, Capability, CapabilityRequest, GenerationParams};
use serde_json::{json, Value};
use tracing::debug;

use crate::analysis::IntentAnalysis;

#[derive(Debug, Clone)]
pub struct RetrievalSnippet {
    pub text: String,
    pub similarity: f32,
    pub source: Option<String>,
}

/// Dispatch the retrieval capability and keep up to `k` snippets, ordered
/// by descending similarity. Returns an empty vector on failure — this is
/// a sub-step and its failure must not fail the turn.
pub async fn retrieve_knowledge(
    orchestrator: &AiOrchestrator,
    intent: &IntentAnalysis,
    context_snapshot: &LayeredContext,
    k: usize,
    timeout_ms: u64,
) -> Vec<RetrievalSnippet> {
    let query = json!({
        "intent": intent.intent,
        "parameters": intent.parameters,
        "context_summary": context_summary(context_snapshot),
    });

    let req = CapabilityRequest {
        capability: Capability::Retrieval,
        input: query,
        generation: GenerationParams::default(),
        timeout_ms,
    };

    match orchestrator.process(req, None).await {
        Ok(resp) => parse_snippets(&resp.output, k),
        Err(err) => {
            debug!(%err, "knowledge retrieval failed, continuing without snippets");
            Vec::new()
        }
    }
}

fn parse_snippets(output: &Value, k: usize) -> Vec<RetrievalSnippet> {
    let mut snippets: Vec<RetrievalSnippet> = output
        .get("snippets")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| {
                    let text = item.get("text")?.as_str()?.to_string();
                    let similarity = item.get("similarity").and_then(Value::as_f64).unwrap_or(0.0) as f32;
                    let source = item.get("source").and_then(Value::as_str).map(str::to_string);
                    Some(RetrievalSnippet {
                        text,
                        similarity,
                        source,
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    snippets.sort_by(|a, b| b.similarity.partial_cmp(&a.similarity).unwrap_or(std::cmp::Ordering::Equal));
    snippets.truncate(k);
    snippets
}

/// A small serialised summary of the context, packed into the retrieval
/// query and (separately) the generation prompt — never the whole layered
/// record, just what a query/prompt needs.
fn context_summary(ctx: &LayeredContext) -> Value {
    json!({
        "tenant": ctx.user.tenant_id.as_str(),
        "tier": format!("{:?}", ctx.user.tier),
        "vip": ctx.user.vip,
        "language": ctx.user.language,
        "state": ctx.session.state.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snippets_are_sorted_and_truncated() {
        let output = json!({
            "snippets": [
                { "text": "low", "similarity": 0.2 },
                { "text": "high", "similarity": 0.9 },
                { "text": "mid", "similarity": 0.5 },
            ]
        });
        let snippets = parse_snippets(&output, 2);
        assert_eq!(snippets.len(), 2);
        assert_eq!(snippets[0].text, "high");
        assert_eq!(snippets[1].text, "mid");
    }
}
