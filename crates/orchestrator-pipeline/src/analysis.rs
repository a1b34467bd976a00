//! Fan-out analysis (§4.5 step 2): language, intent, sentiment, emotion, and
//! entity extraction, dispatched concurrently through the AI Orchestrator.
//! Each sub-step's failure is isolated — a failed analysis just leaves its
//! field `None`, it never fails the turn.

use std::collections::HashMap;

use orchestrator_core::conversation::{EmotionLabel, SentimentLabel};
use orchestrator_providers::{AiOrchestrator, Capability, CapabilityRequest, GenerationParams};
use serde_json::{json, Value};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct LanguageAnalysis {
    pub language: String,
    pub confidence: f32,
}

#[derive(Debug, Clone)]
pub struct IntentAnalysis {
    pub intent: String,
    pub confidence: f32,
    pub parameters: HashMap<String, Value>,
}

#[derive(Debug, Clone)]
pub struct SentimentAnalysis {
    pub label: SentimentLabel,
    pub score: f32,
    pub confidence: f32,
}

#[derive(Debug, Clone)]
pub struct EmotionAnalysis {
    pub label: EmotionLabel,
    pub intensity: f32,
    pub confidence: f32,
}

#[derive(Debug, Clone, Default)]
pub struct EntityAnalysis {
    pub entities: Vec<String>,
}

/// Everything the fan-out recovered for one turn. Any field may be absent —
/// the pipeline continues regardless of which sub-steps succeeded.
#[derive(Debug, Clone, Default)]
pub struct AnalysisBundle {
    pub language: Option<LanguageAnalysis>,
    pub intent: Option<IntentAnalysis>,
    pub sentiment: Option<SentimentAnalysis>,
    pub emotion: Option<EmotionAnalysis>,
    pub entities: Option<EntityAnalysis>,
    /// Names of the models actually used, for per-model analytics and the
    /// final response's annotation trail.
    pub models_used: Vec<String>,
}

fn request(capability: Capability, input: Value, timeout_ms: u64) -> CapabilityRequest {
    CapabilityRequest {
        capability,
        input,
        generation: GenerationParams::default(),
        timeout_ms,
    }
}

/// Run all five analyses concurrently against `utterance`, tolerating
/// individual failures. `intent_vocabulary` is the configured set of
/// intents the classifier is allowed to return.
pub async fn run_fan_out(
    orchestrator: &AiOrchestrator,
    utterance: &str,
    intent_vocabulary: &[String],
    step_timeout_ms: u64,
) -> AnalysisBundle {
    let language_req = request(
        Capability::LanguageDetection,
        json!({ "text": utterance }),
        step_timeout_ms,
    );
    let intent_req = request(
        Capability::IntentClassification,
        json!({ "text": utterance, "intents": intent_vocabulary }),
        step_timeout_ms,
    );
    let sentiment_req = request(
        Capability::SentimentAnalysis,
        json!({ "text": utterance }),
        step_timeout_ms,
    );
    let emotion_req = request(
        Capability::EmotionDetection,
        json!({ "text": utterance }),
        step_timeout_ms,
    );
    let entity_req = request(
        Capability::NamedEntityRecognition,
        json!({ "text": utterance }),
        step_timeout_ms,
    );

    let (language, intent, sentiment, emotion, entities) = tokio::join!(
        orchestrator.process(language_req, None),
        orchestrator.process(intent_req, None),
        orchestrator.process(sentiment_req, None),
        orchestrator.process(emotion_req, None),
        orchestrator.process(entity_req, None),
    );

    let mut bundle = AnalysisBundle::default();

    match language {
        Ok(resp) => {
            bundle.models_used.push(resp.model_used.to_string());
            bundle.language = Some(LanguageAnalysis {
                language: resp
                    .output
                    .get("language")
                    .and_then(Value::as_str)
                    .unwrap_or("en")
                    .to_string(),
                confidence: resp.confidence,
            });
        }
        Err(err) => debug!(step = "language_detection", %err, "analysis step failed, leaving field empty"),
    }

    match intent {
        Ok(resp) => {
            bundle.models_used.push(resp.model_used.to_string());
            let parameters = resp
                .output
                .get("parameters")
                .and_then(Value::as_object)
                .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
                .unwrap_or_default();
            if let Some(name) = resp.output.get("intent").and_then(Value::as_str) {
                bundle.intent = Some(IntentAnalysis {
                    intent: name.to_string(),
                    confidence: resp.confidence,
                    parameters,
                });
            }
        }
        Err(err) => debug!(step = "intent_classification", %err, "analysis step failed, leaving field empty"),
    }

    match sentiment {
        Ok(resp) => {
            bundle.models_used.push(resp.model_used.to_string());
            let label = match resp.output.get("label").and_then(Value::as_str) {
                Some("positive") => SentimentLabel::Positive,
                Some("negative") => SentimentLabel::Negative,
                _ => SentimentLabel::Neutral,
            };
            bundle.sentiment = Some(SentimentAnalysis {
                label,
                score: resp.output.get("score").and_then(Value::as_f64).unwrap_or(0.0) as f32,
                confidence: resp.confidence,
            });
        }
        Err(err) => debug!(step = "sentiment_analysis", %err, "analysis step failed, leaving field empty"),
    }

    match emotion {
        Ok(resp) => {
            bundle.models_used.push(resp.model_used.to_string());
            if let Some(label) = parse_emotion(resp.output.get("label").and_then(Value::as_str)) {
                bundle.emotion = Some(EmotionAnalysis {
                    label,
                    intensity: resp.output.get("intensity").and_then(Value::as_f64).unwrap_or(0.0) as f32,
                    confidence: resp.confidence,
                });
            }
        }
        Err(err) => debug!(step = "emotion_detection", %err, "analysis step failed, leaving field empty"),
    }

    match entities {
        Ok(resp) => {
            bundle.models_used.push(resp.model_used.to_string());
            let list = resp
                .output
                .get("entities")
                .and_then(Value::as_array)
                .map(|items| {
                    items
                        .iter()
                        .filter_map(Value::as_str)
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default();
            bundle.entities = Some(EntityAnalysis { entities: list });
        }
        Err(err) => debug!(step = "named_entity_recognition", %err, "analysis step failed, leaving field empty"),
    }

    bundle
}

fn parse_emotion(label: Option<&str>) -> Option<EmotionLabel> {
    match label {
        Some("angry") => Some(EmotionLabel::Angry),
        Some("frustrated") => Some(EmotionLabel::Frustrated),
        Some("confused") => Some(EmotionLabel::Confused),
        Some("neutral") => Some(EmotionLabel::Neutral),
        Some("satisfied") => Some(EmotionLabel::Satisfied),
        Some("happy") => Some(EmotionLabel::Happy),
        Some("excited") => Some(EmotionLabel::Excited),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_emotion_label_is_absent() {
        assert!(parse_emotion(Some("bored")).is_none());
    }

    #[test]
    fn known_emotion_label_parses() {
        assert_eq!(parse_emotion(Some("angry")), Some(EmotionLabel::Angry));
    }
}
