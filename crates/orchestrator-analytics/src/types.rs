//! Analytics Collector (C8) data model: live per-conversation metrics,
//! finalized conversation-level metrics, and per-model aggregates.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use orchestrator_core::conversation::EmotionLabel;
use serde::{Deserialize, Serialize};

/// Events the collector subscribes to from the pipeline and FSM. Analytics
/// events for one conversation appear in causal order with its FSM
/// transitions (§5, ordering guarantees) — callers emit these from the
/// same task that drives the turn, never out of band.
#[derive(Debug, Clone)]
pub enum AnalyticsEvent {
    TurnStarted,
    TurnCompleted(TurnOutcome),
    StateTransition { from: String, to: String },
    Escalated { reason: String },
    Resolved {
        resolution_type: String,
        satisfaction: Option<u8>,
        nps: Option<u8>,
    },
    ProviderOutcome(ProviderOutcome),
}

/// Per-turn summary the pipeline reports once a response is produced.
#[derive(Debug, Clone, Default)]
pub struct TurnOutcome {
    pub sender_end_user: bool,
    pub sender_ai: bool,
    pub intent_confidence: Option<f32>,
    pub sentiment_score: Option<f32>,
    pub emotion: Option<EmotionLabel>,
    pub emotion_intensity: Option<f32>,
    pub response_time_ms: u64,
    pub sla_breached: bool,
}

/// One completed (or billed-failed) provider call, reported by the AI
/// Orchestrator for per-model aggregation.
#[derive(Debug, Clone)]
pub struct ProviderOutcome {
    pub model: String,
    pub success: bool,
    pub latency_ms: u64,
    pub confidence: f32,
    pub tokens: u32,
    pub cost: f64,
    pub fallback_used: bool,
    pub cache_hit: bool,
}

/// Live, in-progress metrics for one active conversation (§4.8).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveConversationMetrics {
    pub conversation_id: String,
    pub started_at: DateTime<Utc>,
    pub message_counts: HashMap<String, u64>,
    pub avg_intent_confidence: f32,
    pub avg_sentiment_score: f32,
    pub avg_emotion_intensity: f32,
    intent_samples: u32,
    sentiment_samples: u32,
    emotion_samples: u32,
    /// Bounded reservoir of per-turn response times, newest-last.
    pub response_times_ms: Vec<u64>,
    pub first_response_time_ms: Option<u64>,
    pub sla_breach: bool,
    pub emotion_counts: HashMap<String, u32>,
}

const RESPONSE_TIME_RESERVOIR_CAP: usize = 256;

impl LiveConversationMetrics {
    pub fn new(conversation_id: String) -> Self {
        Self {
            conversation_id,
            started_at: Utc::now(),
            message_counts: HashMap::new(),
            avg_intent_confidence: 0.0,
            avg_sentiment_score: 0.0,
            avg_emotion_intensity: 0.0,
            intent_samples: 0,
            sentiment_samples: 0,
            emotion_samples: 0,
            response_times_ms: Vec::new(),
            first_response_time_ms: None,
            sla_breach: false,
            emotion_counts: HashMap::new(),
        }
    }

    pub fn record_turn(&mut self, sender_key: &str, outcome: &TurnOutcome) {
        *self.message_counts.entry(sender_key.to_string()).or_insert(0) += 1;

        if let Some(c) = outcome.intent_confidence {
            self.avg_intent_confidence = running_avg(self.avg_intent_confidence, self.intent_samples, c);
            self.intent_samples += 1;
        }
        if let Some(s) = outcome.sentiment_score {
            self.avg_sentiment_score = running_avg(self.avg_sentiment_score, self.sentiment_samples, s);
            self.sentiment_samples += 1;
        }
        if let Some(i) = outcome.emotion_intensity {
            self.avg_emotion_intensity = running_avg(self.avg_emotion_intensity, self.emotion_samples, i);
            self.emotion_samples += 1;
        }
        if let Some(emotion) = outcome.emotion {
            *self
                .emotion_counts
                .entry(format!("{:?}", emotion))
                .or_insert(0) += 1;
        }

        if self.first_response_time_ms.is_none() {
            self.first_response_time_ms = Some(outcome.response_time_ms);
        }
        if self.response_times_ms.len() >= RESPONSE_TIME_RESERVOIR_CAP {
            self.response_times_ms.remove(0);
        }
        self.response_times_ms.push(outcome.response_time_ms);

        self.sla_breach = self.sla_breach || outcome.sla_breached;
    }

    /// Mode of the emotion counts so far — used to seed `primary_emotion`
    /// on finalization.
    pub fn primary_emotion(&self) -> Option<String> {
        self.emotion_counts
            .iter()
            .max_by_key(|(_, count)| **count)
            .map(|(emotion, _)| emotion.clone())
    }

    pub fn avg_response_time_ms(&self) -> f64 {
        if self.response_times_ms.is_empty() {
            return 0.0;
        }
        self.response_times_ms.iter().sum::<u64>() as f64 / self.response_times_ms.len() as f64
    }
}

fn running_avg(current: f32, samples: u32, next: f32) -> f32 {
    (current * samples as f32 + next) / (samples as f32 + 1.0)
}

/// Immutable metrics snapshot produced when a conversation resolves or is
/// archived (§4.8).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalizedConversationMetrics {
    pub conversation_id: String,
    pub duration_secs: f64,
    pub message_counts: HashMap<String, u64>,
    pub resolved: bool,
    pub resolution_type: Option<String>,
    pub satisfaction: Option<u8>,
    pub nps: Option<u8>,
    pub primary_emotion: Option<String>,
    pub negative_emotion_duration_secs: f64,
    pub sla_breach_duration_secs: f64,
    pub finalized_at: DateTime<Utc>,
}

/// Per-model aggregate (§4.8): latency percentiles via a bounded sorted
/// reservoir, success rate, cache-hit rate, fallback rate, average
/// confidence/tokens, and cumulative cost.
#[derive(Debug, Clone, Default)]
pub struct ModelMetricsAccumulator {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub cache_hits: u64,
    pub fallback_uses: u64,
    pub cumulative_tokens: u64,
    pub cumulative_cost: f64,
    avg_confidence: f32,
    confidence_samples: u32,
    /// Bounded reservoir of recent latencies; sorted on read for the
    /// streaming percentile approximation the spec calls for.
    latency_reservoir: Vec<f64>,
}

const LATENCY_RESERVOIR_CAP: usize = 1000;

impl ModelMetricsAccumulator {
    pub fn record(&mut self, outcome: &ProviderOutcome) {
        self.total_requests += 1;
        if outcome.success {
            self.successful_requests += 1;
        }
        if outcome.cache_hit {
            self.cache_hits += 1;
        }
        if outcome.fallback_used {
            self.fallback_uses += 1;
        }
        self.cumulative_tokens += outcome.tokens as u64;
        self.cumulative_cost += outcome.cost;
        self.avg_confidence = running_avg(self.avg_confidence, self.confidence_samples, outcome.confidence);
        self.confidence_samples += 1;

        if self.latency_reservoir.len() >= LATENCY_RESERVOIR_CAP {
            self.latency_reservoir.remove(0);
        }
        self.latency_reservoir.push(outcome.latency_ms as f64);
    }

    pub fn snapshot(&self, model: &str) -> ModelMetricsSnapshot {
        let mut sorted = self.latency_reservoir.clone();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
        ModelMetricsSnapshot {
            model: model.to_string(),
            total_requests: self.total_requests,
            success_rate: ratio(self.successful_requests, self.total_requests),
            cache_hit_rate: ratio(self.cache_hits, self.total_requests),
            fallback_rate: ratio(self.fallback_uses, self.total_requests),
            avg_confidence: self.avg_confidence,
            avg_tokens: if self.total_requests == 0 {
                0.0
            } else {
                self.cumulative_tokens as f64 / self.total_requests as f64
            },
            cumulative_cost: self.cumulative_cost,
            p50_latency_ms: percentile(&sorted, 0.50),
            p95_latency_ms: percentile(&sorted, 0.95),
            p99_latency_ms: percentile(&sorted, 0.99),
        }
    }
}

fn ratio(part: u64, whole: u64) -> f32 {
    if whole == 0 {
        0.0
    } else {
        part as f32 / whole as f32
    }
}

fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let idx = ((sorted.len() - 1) as f64 * p).round() as usize;
    sorted[idx.min(sorted.len() - 1)]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelMetricsSnapshot {
    pub model: String,
    pub total_requests: u64,
    pub success_rate: f32,
    pub cache_hit_rate: f32,
    pub fallback_rate: f32,
    pub avg_confidence: f32,
    pub avg_tokens: f64,
    pub cumulative_cost: f64,
    pub p50_latency_ms: f64,
    pub p95_latency_ms: f64,
    pub p99_latency_ms: f64,
}
