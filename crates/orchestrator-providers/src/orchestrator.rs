//! The AI Orchestrator: executes a capability request against a model
//! chain with confidence gating, retry, and circuit-breaking.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use futures_util::stream::{FuturesUnordered, StreamExt};
use orchestrator_core::ModelName;
use serde::{Deserialize, Serialize};
use tracing::{instrument, warn};

use crate::capability::Capability;
use crate::circuit_breaker::CircuitBreakerRegistry;
use crate::health::HealthTracker;
use crate::provider::{AiProvider, CapabilityRequest, CapabilityResponse, ProviderError, TokenUsage};
use crate::registry::ProviderRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackStrategy {
    Sequential,
    Parallel,
    Hybrid,
}

/// One attempt's diagnostics, kept for the `AllProvidersFailed` report.
#[derive(Debug, Clone, Serialize)]
pub struct AttemptDiagnostic {
    pub model: String,
    pub elapsed_ms: u64,
    pub error_kind: String,
    pub message: String,
    pub observed_confidence: Option<f32>,
}

#[derive(Debug, thiserror::Error)]
pub enum OrchestrationError {
    #[error("no model supports the requested capability")]
    NoCandidate,
    #[error("all providers failed ({} attempts)", .attempts.len())]
    AllProvidersFailed { attempts: Vec<AttemptDiagnostic> },
}

/// Cumulative per-model usage counters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ModelUsageStats {
    pub request_count: u64,
    pub cumulative_tokens: u64,
    pub cumulative_cost: f64,
    pub avg_confidence: f32,
    pub avg_latency_ms: f64,
}

impl ModelUsageStats {
    fn record(&mut self, usage: &TokenUsage, confidence: f32, elapsed_ms: u64) {
        let n = self.request_count as f32;
        self.avg_confidence = (self.avg_confidence * n + confidence) / (n + 1.0);
        let n64 = self.request_count as f64;
        self.avg_latency_ms = (self.avg_latency_ms * n64 + elapsed_ms as f64) / (n64 + 1.0);
        self.request_count += 1;
        self.cumulative_tokens += (usage.prompt_tokens + usage.completion_tokens) as u64;
        self.cumulative_cost += usage.cost;
    }
}

pub struct OrchestratorSettings {
    pub confidence_threshold: f32,
    pub retry_base: Duration,
    pub retry_cap: Duration,
    pub strategy: FallbackStrategy,
    /// Aggregate timeout for parallel/hybrid fan-out modes.
    pub parallel_timeout: Duration,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.7,
            retry_base: Duration::from_secs(1),
            retry_cap: Duration::from_secs(30),
            strategy: FallbackStrategy::Sequential,
            parallel_timeout: Duration::from_secs(10),
        }
    }
}

pub struct AiOrchestrator {
    registry: ProviderRegistry,
    providers: HashMap<String, Arc<dyn AiProvider>>,
    breakers: CircuitBreakerRegistry,
    pub health: Arc<HealthTracker>,
    usage: DashMap<ModelName, ModelUsageStats>,
    settings: OrchestratorSettings,
}

impl AiOrchestrator {
    pub fn new(
        registry: ProviderRegistry,
        providers: HashMap<String, Arc<dyn AiProvider>>,
        settings: OrchestratorSettings,
        cb_threshold: u32,
        cb_cooldown_secs: u64,
    ) -> Self {
        Self {
            registry,
            providers,
            breakers: CircuitBreakerRegistry::new(cb_threshold, cb_cooldown_secs),
            health: HealthTracker::new(),
            usage: DashMap::new(),
            settings,
        }
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    /// Resolve the model chain for this request: the preferred model's
    /// fallback chain if given and capability-compatible, else the
    /// capability's candidate list.
    fn resolve_chain(&self, req: &CapabilityRequest, preferred: Option<&ModelName>) -> Vec<ModelName> {
        if let Some(name) = preferred {
            if let Some(descriptor) = self.registry.lookup(name) {
                if descriptor.supports(req.capability) {
                    return self.registry.fallback_chain(name);
                }
            }
        }

        self.registry
            .candidates_for(req.capability)
            .into_iter()
            .map(|d| d.name.clone())
            .collect()
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        let scaled = self.settings.retry_base.as_secs_f64() * 2f64.powi(attempt as i32);
        Duration::from_secs_f64(scaled.min(self.settings.retry_cap.as_secs_f64()))
    }

    #[instrument(skip(self, req), fields(capability = ?req.capability))]
    pub async fn process(
        &self,
        req: CapabilityRequest,
        preferred_model: Option<ModelName>,
    ) -> Result<CapabilityResponse, OrchestrationError> {
        let chain = self.resolve_chain(&req, preferred_model.as_ref());
        if chain.is_empty() {
            return Err(OrchestrationError::NoCandidate);
        }

        match self.settings.strategy {
            FallbackStrategy::Sequential => self.process_sequential(&req, &chain).await,
            FallbackStrategy::Parallel => self.process_parallel(&req, &chain).await,
            FallbackStrategy::Hybrid => {
                let Some((first, rest)) = chain.split_first() else {
                    return Err(OrchestrationError::NoCandidate);
                };

                // Primary attempt goes through the same circuit-breaker gate
                // sequential/parallel mode use, rather than dialing it unconditionally.
                let primary = if self.breakers.should_allow(first) {
                    self.try_model(&req, first, 0).await
                } else {
                    Err(AttemptDiagnostic {
                        model: first.to_string(),
                        elapsed_ms: 0,
                        error_kind: "circuit_open".to_string(),
                        message: "circuit breaker open, skipped".to_string(),
                        observed_confidence: None,
                    })
                };

                match primary {
                    Ok(resp) => Ok(resp),
                    Err(diag) if rest.is_empty() => {
                        Err(OrchestrationError::AllProvidersFailed { attempts: vec![diag] })
                    }
                    Err(diag) => {
                        let mut attempts = vec![diag];
                        match self.process_parallel(&req, rest).await {
                            Ok(resp) => Ok(resp),
                            Err(OrchestrationError::AllProvidersFailed { attempts: mut rest_attempts }) => {
                                attempts.append(&mut rest_attempts);
                                Err(OrchestrationError::AllProvidersFailed { attempts })
                            }
                            Err(e) => Err(e),
                        }
                    }
                }
            }
        }
    }

    async fn process_sequential(
        &self,
        req: &CapabilityRequest,
        chain: &[ModelName],
    ) -> Result<CapabilityResponse, OrchestrationError> {
        let mut attempts = Vec::new();

        for (idx, model) in chain.iter().enumerate() {
            if !self.breakers.should_allow(model) {
                attempts.push(AttemptDiagnostic {
                    model: model.to_string(),
                    elapsed_ms: 0,
                    error_kind: "circuit_open".to_string(),
                    message: "circuit breaker open, skipped".to_string(),
                    observed_confidence: None,
                });
                continue;
            }

            match self.try_model(req, model, idx as u32).await {
                Ok(resp) => return Ok(resp),
                Err(diag) => {
                    attempts.push(diag);
                    if idx + 1 < chain.len() {
                        tokio::time::sleep(self.backoff_delay(idx as u32)).await;
                    }
                }
            }
        }

        Err(OrchestrationError::AllProvidersFailed { attempts })
    }

    async fn process_parallel(
        &self,
        req: &CapabilityRequest,
        chain: &[ModelName],
    ) -> Result<CapabilityResponse, OrchestrationError> {
        let allowed: Vec<ModelName> = chain
            .iter()
            .filter(|m| self.breakers.should_allow(m))
            .cloned()
            .collect();
        if allowed.is_empty() {
            return Err(OrchestrationError::AllProvidersFailed {
                attempts: chain
                    .iter()
                    .map(|m| AttemptDiagnostic {
                        model: m.to_string(),
                        elapsed_ms: 0,
                        error_kind: "circuit_open".to_string(),
                        message: "circuit breaker open, skipped".to_string(),
                        observed_confidence: None,
                    })
                    .collect(),
            });
        }

        let mut in_flight: FuturesUnordered<_> = allowed
            .iter()
            .enumerate()
            .map(|(idx, model)| self.try_model(req, model, idx as u32))
            .collect();

        let deadline = tokio::time::sleep(self.settings.parallel_timeout);
        tokio::pin!(deadline);

        let mut attempts = Vec::new();
        loop {
            // `in_flight` is polled ahead of the deadline so a result that
            // clears the threshold in the same tick the timeout fires still
            // wins; dropping `in_flight` on return cancels the rest.
            tokio::select! {
                biased;
                next = in_flight.next() => {
                    match next {
                        Some(Ok(resp)) => return Ok(resp),
                        Some(Err(diag)) => attempts.push(diag),
                        None => break,
                    }
                }
                _ = &mut deadline => {
                    // Everything still polling in `in_flight` at this point hasn't
                    // produced a passing result; record one diagnostic for the
                    // remainder rather than naming each (the stream no longer
                    // exposes which model names are still outstanding).
                    if !in_flight.is_empty() {
                        attempts.push(AttemptDiagnostic {
                            model: format!("{} model(s) still in flight", in_flight.len()),
                            elapsed_ms: self.settings.parallel_timeout.as_millis() as u64,
                            error_kind: "timeout".to_string(),
                            message: "aggregate parallel timeout expired".to_string(),
                            observed_confidence: None,
                        });
                    }
                    break;
                }
            }
        }

        Err(OrchestrationError::AllProvidersFailed { attempts })
    }

    async fn try_model(
        &self,
        req: &CapabilityRequest,
        model: &ModelName,
        attempt: u32,
    ) -> Result<CapabilityResponse, AttemptDiagnostic> {
        let descriptor = match self.registry.lookup(model) {
            Some(d) => d,
            None => {
                return Err(AttemptDiagnostic {
                    model: model.to_string(),
                    elapsed_ms: 0,
                    error_kind: "model_unavailable".to_string(),
                    message: "model not registered".to_string(),
                    observed_confidence: None,
                })
            }
        };

        let provider = match self.providers.get(&descriptor.provider) {
            Some(p) => p.clone(),
            None => {
                return Err(AttemptDiagnostic {
                    model: model.to_string(),
                    elapsed_ms: 0,
                    error_kind: "model_unavailable".to_string(),
                    message: format!("no provider client registered for {}", descriptor.provider),
                    observed_confidence: None,
                })
            }
        };

        let started = Instant::now();
        let timeout = Duration::from_millis(req.timeout_ms.min(descriptor.request_timeout_ms));

        let call_result = tokio::time::timeout(timeout, provider.call(model, req)).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let result = match call_result {
            Ok(Ok(resp)) => Ok(resp),
            Ok(Err(err)) => Err(err),
            Err(_) => Err(ProviderError::Timeout(timeout.as_millis() as u64)),
        };

        match result {
            Ok(mut resp) if resp.confidence >= self.settings.confidence_threshold => {
                self.breakers.record_success(model);
                self.health.record_success(&descriptor.provider, elapsed_ms);
                self.usage
                    .entry(model.clone())
                    .or_default()
                    .record(&resp.usage, resp.confidence, elapsed_ms);
                resp.fallback_used = attempt > 0;
                Ok(resp)
            }
            Ok(resp) => {
                warn!(model = %model, confidence = resp.confidence, "below confidence threshold");
                self.breakers.record_failure(model);
                Err(AttemptDiagnostic {
                    model: model.to_string(),
                    elapsed_ms,
                    error_kind: "low_confidence".to_string(),
                    message: format!("confidence {} below threshold", resp.confidence),
                    observed_confidence: Some(resp.confidence),
                })
            }
            Err(err) => {
                self.breakers.record_failure(model);
                self.health.record_error(&descriptor.provider, &err);
                Err(AttemptDiagnostic {
                    model: model.to_string(),
                    elapsed_ms,
                    error_kind: err.kind().to_string(),
                    message: err.to_string(),
                    observed_confidence: None,
                })
            }
        }
    }

    pub fn usage_snapshot(&self) -> HashMap<ModelName, ModelUsageStats> {
        self.usage
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }

    pub fn circuit_state(&self, model: &ModelName) -> crate::circuit_breaker::CircuitState {
        self.breakers.state_of(model)
    }
}
