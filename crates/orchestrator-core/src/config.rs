use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{OrchestratorError, Result};

pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.7;
pub const DEFAULT_PER_TURN_BUDGET_MS: u64 = 30_000;
pub const DEFAULT_CIRCUIT_BREAKER_THRESHOLD: u32 = 5;
pub const DEFAULT_CIRCUIT_BREAKER_COOLDOWN_SECS: u64 = 300;
pub const DEFAULT_RETRY_BASE_SECS: u64 = 1;
pub const DEFAULT_RETRY_CAP_SECS: u64 = 30;
pub const DEFAULT_SENTIMENT_HISTORY_CAP: usize = 100;
pub const DEFAULT_EMOTION_HISTORY_CAP: usize = 100;
pub const DEFAULT_INTENT_HISTORY_CAP: usize = 20;
pub const DEFAULT_CONTEXT_SWEEP_INTERVAL_SECS: u64 = 3600;
pub const DEFAULT_CONTEXT_IDLE_TTL_HOURS: u64 = 24;
pub const DEFAULT_CRM_SYNC_LAG_ALARM_SECS: u64 = 900;
pub const DEFAULT_DLQ_TTL_DAYS: u64 = 7;

/// Top-level configuration (orchestrator.toml + ORCHESTRATOR_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub providers: ProvidersRuntimeConfig,
    #[serde(default)]
    pub context_store: ContextStoreConfig,
    #[serde(default)]
    pub crm: CrmConfig,
    #[serde(default)]
    pub intents: IntentsConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            pipeline: PipelineConfig::default(),
            providers: ProvidersRuntimeConfig::default(),
            context_store: ContextStoreConfig::default(),
            crm: CrmConfig::default(),
            intents: IntentsConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f32,
    #[serde(default = "default_per_turn_budget_ms")]
    pub per_turn_budget_ms: u64,
    /// Parallel fan-out (default) vs strictly sequential step execution.
    #[serde(default = "bool_true")]
    pub parallel_fanout: bool,
    #[serde(default = "default_sentiment_history_cap")]
    pub sentiment_history_cap: usize,
    #[serde(default = "default_emotion_history_cap")]
    pub emotion_history_cap: usize,
    #[serde(default = "default_intent_history_cap")]
    pub intent_history_cap: usize,
    /// Max knowledge-retrieval snippets retained per turn.
    #[serde(default = "default_retrieval_k")]
    pub retrieval_k: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: default_confidence_threshold(),
            per_turn_budget_ms: default_per_turn_budget_ms(),
            parallel_fanout: true,
            sentiment_history_cap: default_sentiment_history_cap(),
            emotion_history_cap: default_emotion_history_cap(),
            intent_history_cap: default_intent_history_cap(),
            retrieval_k: default_retrieval_k(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvidersRuntimeConfig {
    #[serde(default = "default_cb_threshold")]
    pub circuit_breaker_threshold: u32,
    #[serde(default = "default_cb_cooldown")]
    pub circuit_breaker_cooldown_secs: u64,
    #[serde(default = "default_retry_base")]
    pub retry_base_secs: u64,
    #[serde(default = "default_retry_cap")]
    pub retry_cap_secs: u64,
}

impl Default for ProvidersRuntimeConfig {
    fn default() -> Self {
        Self {
            circuit_breaker_threshold: default_cb_threshold(),
            circuit_breaker_cooldown_secs: default_cb_cooldown(),
            retry_base_secs: default_retry_base(),
            retry_cap_secs: default_retry_cap(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextStoreConfig {
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
    #[serde(default = "default_idle_ttl_hours")]
    pub idle_ttl_hours: u64,
}

impl Default for ContextStoreConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: default_sweep_interval(),
            idle_ttl_hours: default_idle_ttl_hours(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrmConfig {
    #[serde(default = "default_sync_lag_alarm")]
    pub sync_lag_alarm_secs: u64,
    #[serde(default = "default_dlq_ttl_days")]
    pub dlq_ttl_days: u64,
    /// Window within which coalescing real-time change events trigger a
    /// single incremental pass.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

impl Default for CrmConfig {
    fn default() -> Self {
        Self {
            sync_lag_alarm_secs: default_sync_lag_alarm(),
            dlq_ttl_days: default_dlq_ttl_days(),
            debounce_ms: default_debounce_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct IntentsConfig {
    #[serde(default = "default_supported_intents")]
    pub supported: Vec<String>,
    #[serde(default = "default_supported_emotions")]
    pub supported_emotions: Vec<String>,
}

fn bool_true() -> bool {
    true
}
fn default_confidence_threshold() -> f32 {
    DEFAULT_CONFIDENCE_THRESHOLD
}
fn default_per_turn_budget_ms() -> u64 {
    DEFAULT_PER_TURN_BUDGET_MS
}
fn default_sentiment_history_cap() -> usize {
    DEFAULT_SENTIMENT_HISTORY_CAP
}
fn default_emotion_history_cap() -> usize {
    DEFAULT_EMOTION_HISTORY_CAP
}
fn default_intent_history_cap() -> usize {
    DEFAULT_INTENT_HISTORY_CAP
}
fn default_retrieval_k() -> usize {
    5
}
fn default_cb_threshold() -> u32 {
    DEFAULT_CIRCUIT_BREAKER_THRESHOLD
}
fn default_cb_cooldown() -> u64 {
    DEFAULT_CIRCUIT_BREAKER_COOLDOWN_SECS
}
fn default_retry_base() -> u64 {
    DEFAULT_RETRY_BASE_SECS
}
fn default_retry_cap() -> u64 {
    DEFAULT_RETRY_CAP_SECS
}
fn default_sweep_interval() -> u64 {
    DEFAULT_CONTEXT_SWEEP_INTERVAL_SECS
}
fn default_idle_ttl_hours() -> u64 {
    DEFAULT_CONTEXT_IDLE_TTL_HOURS
}
fn default_sync_lag_alarm() -> u64 {
    DEFAULT_CRM_SYNC_LAG_ALARM_SECS
}
fn default_dlq_ttl_days() -> u64 {
    DEFAULT_DLQ_TTL_DAYS
}
fn default_debounce_ms() -> u64 {
    2_000
}
fn default_supported_intents() -> Vec<String> {
    vec![
        "account_management".to_string(),
        "billing_inquiry".to_string(),
        "technical_support".to_string(),
        "general_question".to_string(),
        "escalation_request".to_string(),
    ]
}
fn default_supported_emotions() -> Vec<String> {
    vec![
        "angry".to_string(),
        "frustrated".to_string(),
        "confused".to_string(),
        "neutral".to_string(),
        "satisfied".to_string(),
        "happy".to_string(),
        "excited".to_string(),
    ]
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.orchestrator/orchestrator.toml", home)
}

impl OrchestratorConfig {
    /// Load config from a TOML file with ORCHESTRATOR_* env var overrides.
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: OrchestratorConfig = Figment::from(figment::providers::Serialized::defaults(
            OrchestratorConfig::default(),
        ))
        .merge(Toml::file(&path))
        .merge(Env::prefixed("ORCHESTRATOR_").split("__"))
        .extract()
        .map_err(|e| OrchestratorError::Config(e.to_string()))?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_values() {
        let cfg = OrchestratorConfig::default();
        assert_eq!(cfg.pipeline.confidence_threshold, 0.7);
        assert_eq!(cfg.pipeline.per_turn_budget_ms, 30_000);
        assert_eq!(cfg.providers.circuit_breaker_threshold, 5);
        assert_eq!(cfg.providers.circuit_breaker_cooldown_secs, 300);
        assert_eq!(cfg.providers.retry_base_secs, 1);
        assert_eq!(cfg.providers.retry_cap_secs, 30);
        assert_eq!(cfg.context_store.idle_ttl_hours, 24);
    }
}
