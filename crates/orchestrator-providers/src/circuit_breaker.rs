use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use orchestrator_core::ModelName;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

struct ModelCircuit {
    state: AtomicU32, // 0 closed, 1 open, 2 half-open
    consecutive_failures: AtomicU32,
    opened_at_secs: AtomicU64,
    /// Set while a half-open probe call is outstanding so concurrent callers
    /// don't all try the single probe at once.
    probing: AtomicU32,
}

impl ModelCircuit {
    fn new() -> Self {
        Self {
            state: AtomicU32::new(0),
            consecutive_failures: AtomicU32::new(0),
            opened_at_secs: AtomicU64::new(0),
            probing: AtomicU32::new(0),
        }
    }

    fn state(&self) -> CircuitState {
        match self.state.load(Ordering::SeqCst) {
            1 => CircuitState::Open,
            2 => CircuitState::HalfOpen,
            _ => CircuitState::Closed,
        }
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Per-model circuit breaker registry. One entry per model name, mutated
/// with atomic compare-exchange rather than a coarse lock.
pub struct CircuitBreakerRegistry {
    circuits: DashMap<ModelName, ModelCircuit>,
    threshold: u32,
    cooldown_secs: u64,
}

impl CircuitBreakerRegistry {
    pub fn new(threshold: u32, cooldown_secs: u64) -> Self {
        Self {
            circuits: DashMap::new(),
            threshold,
            cooldown_secs,
        }
    }

    /// Whether a call to this model should proceed. Transitions open -> half-open
    /// once the cooldown has elapsed, admitting exactly one probe.
    pub fn should_allow(&self, model: &ModelName) -> bool {
        let circuit = self
            .circuits
            .entry(model.clone())
            .or_insert_with(ModelCircuit::new);

        match circuit.state() {
            CircuitState::Closed => true,
            CircuitState::HalfOpen => {
                // Only the first caller after entering half-open gets to probe.
                circuit.probing.compare_exchange(
                    0,
                    1,
                    Ordering::SeqCst,
                    Ordering::SeqCst,
                ) == Ok(0)
            }
            CircuitState::Open => {
                let opened_at = circuit.opened_at_secs.load(Ordering::SeqCst);
                if now_secs().saturating_sub(opened_at) >= self.cooldown_secs {
                    circuit
                        .state
                        .store(CircuitState::HalfOpen as u32, Ordering::SeqCst);
                    circuit.probing.store(1, Ordering::SeqCst);
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&self, model: &ModelName) {
        let circuit = self
            .circuits
            .entry(model.clone())
            .or_insert_with(ModelCircuit::new);
        circuit.consecutive_failures.store(0, Ordering::SeqCst);
        circuit.probing.store(0, Ordering::SeqCst);
        circuit.state.store(CircuitState::Closed as u32, Ordering::SeqCst);
    }

    pub fn record_failure(&self, model: &ModelName) {
        let circuit = self
            .circuits
            .entry(model.clone())
            .or_insert_with(ModelCircuit::new);

        if circuit.state() == CircuitState::HalfOpen {
            circuit.probing.store(0, Ordering::SeqCst);
            circuit.state.store(CircuitState::Open as u32, Ordering::SeqCst);
            circuit.opened_at_secs.store(now_secs(), Ordering::SeqCst);
            return;
        }

        let failures = circuit.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
        if failures >= self.threshold {
            circuit.state.store(CircuitState::Open as u32, Ordering::SeqCst);
            circuit.opened_at_secs.store(now_secs(), Ordering::SeqCst);
        }
    }

    pub fn state_of(&self, model: &ModelName) -> CircuitState {
        self.circuits
            .get(model)
            .map(|c| c.state())
            .unwrap_or(CircuitState::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_after_threshold_consecutive_failures() {
        let reg = CircuitBreakerRegistry::new(5, 300);
        let model = ModelName::new("model-a");
        for _ in 0..4 {
            reg.record_failure(&model);
            assert!(reg.should_allow(&model));
        }
        reg.record_failure(&model);
        assert_eq!(reg.state_of(&model), CircuitState::Open);
        assert!(!reg.should_allow(&model));
    }

    #[test]
    fn success_resets_to_closed() {
        let reg = CircuitBreakerRegistry::new(5, 300);
        let model = ModelName::new("model-b");
        for _ in 0..5 {
            reg.record_failure(&model);
        }
        assert_eq!(reg.state_of(&model), CircuitState::Open);
        // simulate cooldown elapsed
        reg.circuits.get_mut(&model).unwrap().opened_at_secs.store(0, Ordering::SeqCst);
        assert!(reg.should_allow(&model));
        assert_eq!(reg.state_of(&model), CircuitState::HalfOpen);
        reg.record_success(&model);
        assert_eq!(reg.state_of(&model), CircuitState::Closed);
    }
}
