//! The Message Pipeline (C5): one call per user turn, tying the fan-out
//! analysis, knowledge retrieval, response generation, and adaptation
//! steps together with the FSM gate and the context write-back (§4.5).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use orchestrator_adaptation::{AdaptationEngine, IntentContext, IntentResult, ToneAdaptation};
use orchestrator_analytics::{AnalyticsCollector, ProviderOutcome, TurnOutcome};
use orchestrator_context::ContextStore;
use orchestrator_core::conversation::{
    ChannelTag, EmotionLabel, EmotionRecord, IntentRecord, MessageAnnotations, SenderClass,
    SentimentRecord,
};
use orchestrator_core::fsm::{ConversationState, TransitionContext, TransitionGate};
use orchestrator_core::ConversationId;
use orchestrator_providers::AiOrchestrator;
use tracing::{instrument, warn};

use crate::analysis::{self, AnalysisBundle};
use crate::error::{PipelineError, Result};
use crate::generation::{self, GeneratedResponse};
use crate::retrieval;

/// Tunables for one pipeline instance. Mirrors [`orchestrator_core::config::PipelineConfig`]
/// but expressed in the primitives the turn loop actually consumes.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub per_turn_budget_ms: u64,
    /// Per-capability timeout used for each fan-out/retrieval/generation call.
    pub step_timeout_ms: u64,
    pub retrieval_k: usize,
    pub intent_vocabulary: Vec<String>,
    /// Threshold the write-back step (§4.5 step 7) uses to decide between
    /// `active` (confident enough that no further clarification is needed)
    /// and `waiting_for_user` when the turn does not escalate.
    pub confidence_threshold: f32,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            per_turn_budget_ms: orchestrator_core::config::DEFAULT_PER_TURN_BUDGET_MS,
            step_timeout_ms: 8_000,
            retrieval_k: 5,
            confidence_threshold: orchestrator_core::config::DEFAULT_CONFIDENCE_THRESHOLD,
            intent_vocabulary: vec![
                "account_management".to_string(),
                "billing_inquiry".to_string(),
                "technical_support".to_string(),
                "general_question".to_string(),
                "escalation_request".to_string(),
            ],
        }
    }
}

/// Everything the caller needs after one turn: the adapted response text,
/// the annotations a persisted Message would carry, and the conversation's
/// new FSM state.
#[derive(Debug, Clone)]
pub struct TurnResult {
    pub conversation_id: ConversationId,
    pub response_text: String,
    pub annotations: MessageAnnotations,
    pub tone: Option<ToneAdaptation>,
    pub intent_result: Option<IntentResult>,
    pub requires_escalation: bool,
    pub escalation_reason: Option<String>,
    pub aggregate_confidence: f32,
    pub new_state: ConversationState,
    pub processing_ms: u64,
    pub timed_out: bool,
}

/// Fallback text returned when the per-turn budget is exhausted before a
/// response is produced. A real deployment would localize this per the
/// conversation's `user.language`; tracked as a follow-up, not a blocker.
const TIMEOUT_FALLBACK_TEXT: &str =
    "We're still working on your request and a specialist will follow up shortly.";

pub struct MessagePipeline {
    orchestrator: Arc<AiOrchestrator>,
    context: Arc<ContextStore>,
    adaptation: Arc<AdaptationEngine>,
    analytics: Option<Arc<AnalyticsCollector>>,
    settings: PipelineSettings,
}

impl MessagePipeline {
    pub fn new(
        orchestrator: Arc<AiOrchestrator>,
        context: Arc<ContextStore>,
        adaptation: Arc<AdaptationEngine>,
        analytics: Option<Arc<AnalyticsCollector>>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            orchestrator,
            context,
            adaptation,
            analytics,
            settings,
        }
    }

    /// Run the full turn: gate, fan-out, retrieval, generation, adaptation,
    /// write-back. Wrapped in a budget timeout — on expiry the conversation
    /// moves to `waiting_for_user` with a fallback response rather than
    /// being left hanging in `processing`.
    #[instrument(skip(self, utterance), fields(conversation_id = %conversation_id))]
    pub async fn process_turn(
        &self,
        conversation_id: ConversationId,
        channel: ChannelTag,
        utterance: &str,
    ) -> Result<TurnResult> {
        let budget = Duration::from_millis(self.settings.per_turn_budget_ms);
        let started = Instant::now();

        match tokio::time::timeout(budget, self.run_turn(conversation_id, channel, utterance)).await {
            Ok(result) => result,
            Err(_) => self.handle_timeout(conversation_id, started.elapsed().as_millis() as u64),
        }
    }

    async fn run_turn(
        &self,
        conversation_id: ConversationId,
        channel: ChannelTag,
        utterance: &str,
    ) -> Result<TurnResult> {
        let started = Instant::now();

        // Step 1: gate. Only conversations in an active-class state can
        // receive a message; entering requires the `processing` transition.
        self.enter_processing(conversation_id)?;

        if let Some(analytics) = &self.analytics {
            analytics.start_tracking(&conversation_id.to_string());
        }

        // Step 2: fan-out analysis, tolerant of individual sub-step failure.
        let bundle = analysis::run_fan_out(
            &self.orchestrator,
            utterance,
            &self.settings.intent_vocabulary,
            self.settings.step_timeout_ms,
        )
        .await;

        let ctx_snapshot = self
            .context
            .fetch(&conversation_id)
            .map_err(|_| PipelineError::UnknownConversation(conversation_id.to_string()))?;

        // Step 3: knowledge retrieval, only once an intent has been determined.
        let snippets = match &bundle.intent {
            Some(intent) => {
                retrieval::retrieve_knowledge(
                    &self.orchestrator,
                    intent,
                    &ctx_snapshot,
                    self.settings.retrieval_k,
                    self.settings.step_timeout_ms,
                )
                .await
            }
            None => Vec::new(),
        };

        // Step 4: response generation.
        let generated = match generation::generate_response(
            &self.orchestrator,
            utterance,
            &bundle,
            &snippets,
            &ctx_snapshot,
            self.settings.step_timeout_ms,
        )
        .await
        {
            Ok(resp) => resp,
            Err(orchestrator_providers::OrchestrationError::NoCandidate) => {
                self.fail_turn(conversation_id, "generation_no_candidate");
                return Err(PipelineError::NoCandidate);
            }
            Err(orchestrator_providers::OrchestrationError::AllProvidersFailed { attempts }) => {
                self.fail_turn(conversation_id, "generation_exhausted");
                return Err(PipelineError::AllProvidersFailed {
                    attempts: attempts.len(),
                });
            }
        };

        if let Some(analytics) = &self.analytics {
            analytics.record_provider_outcome(ProviderOutcome {
                model: generated.model_used.clone(),
                success: true,
                latency_ms: generated.elapsed_ms,
                confidence: generated.confidence,
                tokens: generated.prompt_tokens + generated.completion_tokens,
                cost: 0.0,
                fallback_used: generated.fallback_used,
                cache_hit: false,
            });
        }

        // Step 5: aggregate confidence, weighted intent/sentiment/emotion.
        let aggregate_confidence = aggregate_confidence(&bundle);

        // Step 6: adaptation — tone rewriting, then intent-handler routing.
        let (tone, intent_result, final_text) =
            self.adapt(&bundle, &generated, &ctx_snapshot, channel, utterance);

        let requires_escalation =
            tone.escalation_recommended || intent_result.as_ref().is_some_and(|r| r.requires_escalation);
        let escalation_reason = tone
            .escalation_reason
            .clone()
            .or_else(|| intent_result.as_ref().and_then(|r| r.escalation_reason.clone()));

        // §4.5 step 7: confident, non-escalating turns return to `active`
        // (no clarification needed before the next user turn); otherwise the
        // conversation waits on the user to respond to what was said.
        let next_state = if requires_escalation {
            ConversationState::Escalated
        } else if aggregate_confidence >= self.settings.confidence_threshold {
            ConversationState::Active
        } else {
            ConversationState::WaitingForUser
        };

        let annotations = build_annotations(&bundle, &generated, started.elapsed().as_millis() as u64);

        // Step 7: write-back — histories, counters, FSM transition.
        self.write_back(
            conversation_id,
            &bundle,
            &generated,
            next_state,
            escalation_reason.clone(),
        )?;

        if let Some(analytics) = &self.analytics {
            analytics.record_turn(
                &conversation_id.to_string(),
                "ai",
                TurnOutcome {
                    sender_ai: true,
                    intent_confidence: bundle.intent.as_ref().map(|i| i.confidence),
                    sentiment_score: bundle.sentiment.as_ref().map(|s| s.score),
                    emotion: bundle.emotion.as_ref().map(|e| e.label),
                    emotion_intensity: bundle.emotion.as_ref().map(|e| e.intensity),
                    response_time_ms: started.elapsed().as_millis() as u64,
                    sla_breached: false,
                    ..Default::default()
                },
            );
        }

        Ok(TurnResult {
            conversation_id,
            response_text: final_text,
            annotations,
            tone: Some(tone),
            intent_result,
            requires_escalation,
            escalation_reason,
            aggregate_confidence,
            new_state: next_state,
            processing_ms: started.elapsed().as_millis() as u64,
            timed_out: false,
        })
    }

    fn enter_processing(&self, conversation_id: ConversationId) -> Result<()> {
        let outcome = self.context.with_context(&conversation_id, |ctx| {
            if !ctx.session.state.is_active_class() {
                return Err(PipelineError::NotReceivable);
            }
            let from = ctx.session.state;
            TransitionGate::validate(from, ConversationState::Processing, &TransitionContext::default())
                .map_err(|_| PipelineError::NotReceivable)?;
            let event = TransitionGate::build_event(
                from,
                ConversationState::Processing,
                Some("turn_started".to_string()),
                HashMap::new(),
            );
            ctx.session.previous_state = Some(from);
            ctx.session.state = ConversationState::Processing;
            ctx.session.state_history.push(event);
            ctx.session.record_message(SenderClass::EndUser);
            Ok(())
        });

        match outcome {
            Ok(inner) => inner,
            Err(_) => Err(PipelineError::UnknownConversation(conversation_id.to_string())),
        }
    }

    fn adapt(
        &self,
        bundle: &AnalysisBundle,
        generated: &GeneratedResponse,
        ctx_snapshot: &orchestrator_core::conversation::LayeredContext,
        channel: ChannelTag,
        utterance: &str,
    ) -> (ToneAdaptation, Option<IntentResult>, String) {
        let intent_result = bundle.intent.as_ref().map(|intent| {
            let previous_intents = ctx_snapshot
                .ai
                .intent_history
                .iter()
                .map(|r| r.intent.clone())
                .collect();
            self.adaptation.route_intent(&IntentContext {
                intent: intent.intent.clone(),
                confidence: intent.confidence,
                parameters: intent.parameters.clone(),
                original_message: utterance.to_string(),
                channel,
                previous_intents,
            })
        });

        let base_text = intent_result
            .as_ref()
            .and_then(|r| r.response_text.clone())
            .unwrap_or_else(|| generated.text.clone());

        let (emotion_label, intensity, emotion_confidence) = match &bundle.emotion {
            Some(e) => (e.label, e.intensity, e.confidence),
            None => (EmotionLabel::Neutral, 0.0, 0.0),
        };

        let sentiment_trend_negative = trailing_sentiment_negative(ctx_snapshot);

        let tone = self.adaptation.adapt_tone(
            &base_text,
            emotion_label,
            intensity,
            emotion_confidence,
            sentiment_trend_negative,
        );

        let final_text = tone.adapted_text.clone();
        (tone, intent_result, final_text)
    }

    fn write_back(
        &self,
        conversation_id: ConversationId,
        bundle: &AnalysisBundle,
        generated: &GeneratedResponse,
        next_state: ConversationState,
        escalation_reason: Option<String>,
    ) -> Result<()> {
        let outcome = self.context.with_context(&conversation_id, |ctx| {
            let now = chrono::Utc::now();

            if let Some(sentiment) = &bundle.sentiment {
                let record = SentimentRecord {
                    label: sentiment.label.clone(),
                    score: sentiment.score,
                    at: now,
                };
                ctx.ai.last_sentiment = Some(record.clone());
                ctx.ai.sentiment_history.push(record.clone());
                ctx.user.sentiment_history.push(record);
            }

            if let Some(emotion) = &bundle.emotion {
                let record = EmotionRecord {
                    label: emotion.label,
                    intensity: emotion.intensity,
                    at: now,
                };
                ctx.ai.last_emotion = Some(record.clone());
                ctx.ai.emotion_history.push(record.clone());
                ctx.user.emotion_history.push(record);
            }

            if let Some(intent) = &bundle.intent {
                let record = IntentRecord {
                    intent: intent.intent.clone(),
                    confidence: intent.confidence,
                    at: now,
                };
                ctx.ai.last_intent = Some(record.clone());
                ctx.ai.intent_history.push(record);
            }

            ctx.ai.last_model_used = Some(generated.model_used.clone());
            ctx.ai.last_token_usage = Some((generated.prompt_tokens, generated.completion_tokens));
            ctx.ai.fallback_triggered = generated.fallback_used;

            let from = ctx.session.state;
            let transition_ctx = if next_state == ConversationState::Escalated {
                TransitionContext {
                    escalation_reason: Some(
                        escalation_reason
                            .clone()
                            .unwrap_or_else(|| "adaptation_escalation".to_string()),
                    ),
                    escalator: Some("pipeline".to_string()),
                    ..Default::default()
                }
            } else {
                TransitionContext::default()
            };

            if TransitionGate::validate(from, next_state, &transition_ctx).is_ok() {
                let event = TransitionGate::build_event(from, next_state, escalation_reason, HashMap::new());
                ctx.session.previous_state = Some(from);
                ctx.session.state = next_state;
                ctx.session.state_history.push(event);
            } else {
                warn!(?from, ?next_state, "write-back transition rejected, staying in processing");
            }

            ctx.session.record_message(SenderClass::Ai);
            Ok(())
        });

        match outcome {
            Ok(inner) => inner,
            Err(_) => Err(PipelineError::UnknownConversation(conversation_id.to_string())),
        }
    }

    /// Per §7's user-visible failure behaviour: on a fully exhausted
    /// generation step the conversation lands in `waiting_for_user`, not
    /// `escalated` — repeated failures are an Adaptation Layer policy
    /// decision, not something the pipeline forces here.
    fn fail_turn(&self, conversation_id: ConversationId, reason: &str) {
        let _ = self.context.with_context(&conversation_id, |ctx| {
            let from = ctx.session.state;
            let transition_ctx = TransitionContext::default();
            if TransitionGate::validate(from, ConversationState::WaitingForUser, &transition_ctx).is_ok() {
                let event = TransitionGate::build_event(
                    from,
                    ConversationState::WaitingForUser,
                    Some(reason.to_string()),
                    HashMap::new(),
                );
                ctx.session.previous_state = Some(from);
                ctx.session.state = ConversationState::WaitingForUser;
                ctx.session.state_history.push(event);
            }
        });
    }

    /// Per §7: a per-turn budget expiry also lands the conversation in
    /// `waiting_for_user` with a polite fallback, the same as an exhausted
    /// generation step.
    fn handle_timeout(&self, conversation_id: ConversationId, elapsed_ms: u64) -> Result<TurnResult> {
        self.fail_turn(conversation_id, "pipeline_timeout");

        if let Some(analytics) = &self.analytics {
            analytics.record_turn(
                &conversation_id.to_string(),
                "ai",
                TurnOutcome {
                    sender_ai: true,
                    response_time_ms: elapsed_ms,
                    sla_breached: true,
                    ..Default::default()
                },
            );
        }

        Ok(TurnResult {
            conversation_id,
            response_text: TIMEOUT_FALLBACK_TEXT.to_string(),
            annotations: MessageAnnotations::default(),
            tone: None,
            intent_result: None,
            requires_escalation: false,
            escalation_reason: None,
            aggregate_confidence: 0.0,
            new_state: ConversationState::WaitingForUser,
            processing_ms: elapsed_ms,
            timed_out: true,
        })
    }
}

/// §4.5 step 5: weighted average over whichever of intent (0.5), sentiment
/// (0.3), emotion (0.2) actually ran, renormalized over the present fields.
fn aggregate_confidence(bundle: &AnalysisBundle) -> f32 {
    let mut weighted_sum = 0.0f32;
    let mut weight_total = 0.0f32;

    if let Some(intent) = &bundle.intent {
        weighted_sum += intent.confidence * 0.5;
        weight_total += 0.5;
    }
    if let Some(sentiment) = &bundle.sentiment {
        weighted_sum += sentiment.confidence * 0.3;
        weight_total += 0.3;
    }
    if let Some(emotion) = &bundle.emotion {
        weighted_sum += emotion.confidence * 0.2;
        weight_total += 0.2;
    }

    if weight_total > 0.0 {
        weighted_sum / weight_total
    } else {
        0.0
    }
}

/// True when the user's last few sentiment samples trend negative, used by
/// the de-escalation closer's wording choice (§4.6 rule 2).
fn trailing_sentiment_negative(ctx: &orchestrator_core::conversation::LayeredContext) -> bool {
    const WINDOW: usize = 5;
    let samples: Vec<f32> = ctx
        .user
        .sentiment_history
        .iter()
        .rev()
        .take(WINDOW)
        .map(|r| r.score)
        .collect();
    if samples.is_empty() {
        return false;
    }
    samples.iter().sum::<f32>() / samples.len() as f32 < 0.0
}

fn build_annotations(
    bundle: &AnalysisBundle,
    generated: &GeneratedResponse,
    processing_ms: u64,
) -> MessageAnnotations {
    MessageAnnotations {
        intent: bundle.intent.as_ref().map(|i| i.intent.clone()),
        intent_confidence: bundle.intent.as_ref().map(|i| i.confidence),
        sentiment_label: bundle.sentiment.as_ref().map(|s| s.label.clone()),
        sentiment_score: bundle.sentiment.as_ref().map(|s| s.score),
        emotion_label: bundle.emotion.as_ref().map(|e| e.label),
        emotion_intensity: bundle.emotion.as_ref().map(|e| e.intensity),
        entities: bundle
            .entities
            .as_ref()
            .map(|e| e.entities.clone())
            .unwrap_or_default(),
        language: bundle.language.as_ref().map(|l| l.language.clone()),
        model_used: Some(generated.model_used.clone()),
        prompt_tokens: Some(generated.prompt_tokens),
        completion_tokens: Some(generated.completion_tokens),
        processing_ms: Some(processing_ms),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orchestrator_core::conversation::{SentimentLabel, SentimentRecord};

    #[test]
    fn aggregate_confidence_renormalizes_over_present_fields() {
        let bundle = AnalysisBundle {
            intent: Some(crate::analysis::IntentAnalysis {
                intent: "billing_inquiry".to_string(),
                confidence: 0.9,
                parameters: HashMap::new(),
            }),
            sentiment: None,
            emotion: None,
            language: None,
            entities: None,
            models_used: Vec::new(),
        };
        assert!((aggregate_confidence(&bundle) - 0.9).abs() < f32::EPSILON);
    }

    #[test]
    fn aggregate_confidence_with_no_analyses_is_zero() {
        let bundle = AnalysisBundle::default();
        assert_eq!(aggregate_confidence(&bundle), 0.0);
    }

    #[test]
    fn trailing_sentiment_detects_negative_trend() {
        let mut ctx = orchestrator_core::conversation::LayeredContext::new(
            orchestrator_core::TenantId::new("t1"),
            0.7,
        );
        for score in [-0.5, -0.4, -0.6] {
            ctx.user.sentiment_history.push(SentimentRecord {
                label: SentimentLabel::Negative,
                score,
                at: chrono::Utc::now(),
            });
        }
        assert!(trailing_sentiment_negative(&ctx));
    }
}
