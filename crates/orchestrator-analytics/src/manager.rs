//! Analytics Collector (C8): subscribes to pipeline and FSM events, keeps a
//! live metrics record per active conversation, finalizes it on
//! resolution/archival, and aggregates per-model metrics across the whole
//! process.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::Utc;
use dashmap::DashMap;
use tracing::{debug, instrument, warn};

use crate::error::{AnalyticsError, Result};
use crate::types::{
    FinalizedConversationMetrics, LiveConversationMetrics, ModelMetricsAccumulator,
    ModelMetricsSnapshot, ProviderOutcome, TurnOutcome,
};

/// Bound on the rolling window of finalized conversation metrics retained
/// for historical queries — older entries are evicted FIFO.
const FINALIZED_HISTORY_CAP: usize = 10_000;

pub struct AnalyticsCollector {
    live: DashMap<String, LiveConversationMetrics>,
    finalized: Mutex<Vec<FinalizedConversationMetrics>>,
    per_model: DashMap<String, ModelMetricsAccumulator>,
}

impl AnalyticsCollector {
    pub fn new() -> Self {
        Self {
            live: DashMap::new(),
            finalized: Mutex::new(Vec::new()),
            per_model: DashMap::new(),
        }
    }

    #[instrument(skip(self))]
    pub fn start_tracking(&self, conversation_id: &str) {
        self.live
            .entry(conversation_id.to_string())
            .or_insert_with(|| LiveConversationMetrics::new(conversation_id.to_string()));
    }

    /// Record one user turn's outcome against the live metrics record. A
    /// missing conversation is tolerated (it may have been swept already)
    /// — analytics never blocks the pipeline.
    pub fn record_turn(&self, conversation_id: &str, sender_key: &str, outcome: TurnOutcome) {
        match self.live.get_mut(conversation_id) {
            Some(mut live) => live.record_turn(sender_key, &outcome),
            None => warn!(conversation_id, "turn recorded for untracked conversation"),
        }
    }

    pub fn record_provider_outcome(&self, outcome: ProviderOutcome) {
        self.per_model
            .entry(outcome.model.clone())
            .or_default()
            .record(&outcome);
    }

    pub fn live_metrics(&self, conversation_id: &str) -> Result<LiveConversationMetrics> {
        self.live
            .get(conversation_id)
            .map(|m| m.clone())
            .ok_or_else(|| AnalyticsError::NotTracked(conversation_id.to_string()))
    }

    /// Finalize a conversation's metrics on resolution/archival (§4.8).
    /// Removes it from the live table and appends the immutable snapshot
    /// to the historical window.
    #[instrument(skip(self))]
    pub fn finalize(
        &self,
        conversation_id: &str,
        resolved: bool,
        resolution_type: Option<String>,
        satisfaction: Option<u8>,
        nps: Option<u8>,
        negative_emotion_duration_secs: f64,
        sla_breach_duration_secs: f64,
    ) -> Result<FinalizedConversationMetrics> {
        let (_, live) = self
            .live
            .remove(conversation_id)
            .ok_or_else(|| AnalyticsError::NotTracked(conversation_id.to_string()))?;

        let duration_secs = Utc::now()
            .signed_duration_since(live.started_at)
            .num_milliseconds() as f64
            / 1000.0;

        let snapshot = FinalizedConversationMetrics {
            conversation_id: conversation_id.to_string(),
            duration_secs,
            message_counts: live.message_counts.clone(),
            resolved,
            resolution_type,
            satisfaction,
            nps,
            primary_emotion: live.primary_emotion(),
            negative_emotion_duration_secs,
            sla_breach_duration_secs,
            finalized_at: Utc::now(),
        };

        let mut history = self.finalized.lock().unwrap();
        if history.len() >= FINALIZED_HISTORY_CAP {
            history.remove(0);
        }
        history.push(snapshot.clone());
        debug!(conversation_id, duration_secs, "conversation metrics finalized");

        Ok(snapshot)
    }

    /// Historical query over the rolling finalized window (§4.8: "Exposes
    /// historical queries over a rolling window").
    pub fn historical(&self, limit: usize) -> Vec<FinalizedConversationMetrics> {
        let history = self.finalized.lock().unwrap();
        history.iter().rev().take(limit).cloned().collect()
    }

    pub fn per_model_snapshot(&self) -> HashMap<String, ModelMetricsSnapshot> {
        self.per_model
            .iter()
            .map(|e| (e.key().clone(), e.value().snapshot(e.key())))
            .collect()
    }

    pub fn live_conversation_count(&self) -> usize {
        self.live.len()
    }
}

impl Default for AnalyticsCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orchestrator_core::conversation::EmotionLabel;

    #[test]
    fn start_then_record_then_finalize() {
        let collector = AnalyticsCollector::new();
        collector.start_tracking("conv-1");
        collector.record_turn(
            "conv-1",
            "end_user",
            TurnOutcome {
                intent_confidence: Some(0.9),
                sentiment_score: Some(0.2),
                emotion: Some(EmotionLabel::Happy),
                emotion_intensity: Some(0.5),
                response_time_ms: 120,
                ..Default::default()
            },
        );

        let live = collector.live_metrics("conv-1").unwrap();
        assert_eq!(live.message_counts["end_user"], 1);
        assert_eq!(live.first_response_time_ms, Some(120));

        let finalized = collector
            .finalize("conv-1", true, Some("solved".to_string()), Some(5), Some(9), 0.0, 0.0)
            .unwrap();
        assert!(finalized.resolved);
        assert!(collector.live_metrics("conv-1").is_err());
    }

    #[test]
    fn per_model_tracks_percentiles_and_rates() {
        let collector = AnalyticsCollector::new();
        for i in 0..10 {
            collector.record_provider_outcome(ProviderOutcome {
                model: "gpt".to_string(),
                success: i < 8,
                latency_ms: 100 + i * 10,
                confidence: 0.8,
                tokens: 50,
                cost: 0.01,
                fallback_used: false,
                cache_hit: i % 2 == 0,
            });
        }
        let snapshot = collector.per_model_snapshot();
        let gpt = &snapshot["gpt"];
        assert_eq!(gpt.total_requests, 10);
        assert!((gpt.success_rate - 0.8).abs() < 0.01);
        assert!(gpt.p99_latency_ms >= gpt.p50_latency_ms);
    }

    #[test]
    fn untracked_conversation_finalize_errors() {
        let collector = AnalyticsCollector::new();
        assert!(collector
            .finalize("missing", false, None, None, None, 0.0, 0.0)
            .is_err());
    }
}
