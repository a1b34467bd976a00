//! Read-model shapes returned by the facade's query operations (§6:
//! `status`, `summary`, `system_metrics`, `health`). These are projections
//! over live state — nothing here is itself persisted.

use std::collections::HashMap;

use orchestrator_analytics::{LiveConversationMetrics, ModelMetricsSnapshot};
use orchestrator_core::conversation::LayeredContext;
use orchestrator_core::ConversationState;
use orchestrator_providers::{CircuitState, ProviderHealthEntry};
use serde::Serialize;

/// `status` (§6): FSM state, message counters, and whether the
/// conversation can currently receive another user message.
#[derive(Debug, Clone, Serialize)]
pub struct StatusView {
    pub state: ConversationState,
    pub previous_state: Option<ConversationState>,
    pub message_counts: HashMap<String, u64>,
    pub can_receive_messages: bool,
}

/// `summary` (§6): the full layered-context snapshot plus whatever live
/// analytics are being kept for the conversation.
#[derive(Debug, Clone, Serialize)]
pub struct SummaryView {
    pub context: LayeredContext,
    pub live_metrics: Option<LiveConversationMetrics>,
}

/// `system_metrics` (§6): process-wide live aggregates, no per-tenant
/// filtering — an operator view, not a tenant-facing one.
#[derive(Debug, Clone, Serialize)]
pub struct SystemMetricsView {
    pub live_conversation_count: usize,
    pub per_model: HashMap<String, ModelMetricsSnapshot>,
}

/// One subsystem's verdict inside [`HealthView`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubsystemVerdict {
    Ok,
    Degraded,
    Down,
}

/// `health` (§6): overall verdict plus a per-subsystem breakdown —
/// providers (via the Health Tracker), per-model circuit state, and CRM
/// sync health when a synchroniser is wired in.
#[derive(Debug, Clone, Serialize)]
pub struct HealthView {
    pub overall: SubsystemVerdict,
    pub providers: Vec<ProviderHealthEntry>,
    pub circuits: HashMap<String, CircuitState>,
    pub crm: Option<orchestrator_crm::CrmHealthSnapshot>,
}

pub(crate) fn verdict_from_providers(providers: &[ProviderHealthEntry]) -> SubsystemVerdict {
    use orchestrator_providers::ProviderStatus::*;

    if providers.is_empty() {
        return SubsystemVerdict::Ok;
    }
    if providers.iter().all(|p| matches!(p.status, Down | AuthExpired)) {
        return SubsystemVerdict::Down;
    }
    if providers
        .iter()
        .any(|p| matches!(p.status, Down | AuthExpired | Degraded | RateLimited))
    {
        return SubsystemVerdict::Degraded;
    }
    SubsystemVerdict::Ok
}
