//! [`ConversationOrchestrator`]: wires the Provider Registry & Router (C1),
//! AI Orchestrator (C2), Layered Context Store (C3), FSM (C4), Message
//! Pipeline (C5), Adaptation Layer (C6), CRM Synchroniser (C7), and
//! Analytics Collector (C8) behind the eight operations in §6. The
//! transport layer that would expose these over HTTP/websockets is out of
//! scope here — this crate is a library facade, not a server.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashSet;
use orchestrator_adaptation::AdaptationEngine;
use orchestrator_analytics::AnalyticsCollector;
use orchestrator_context::ContextStore;
use orchestrator_core::conversation::{
    ChannelTag, Conversation, EscalationRecord, Message, MessageAnnotations, ResolutionRecord, SenderClass,
};
use orchestrator_core::fsm::{TransitionContext, TransitionGate};
use orchestrator_core::{
    ConversationId, ConversationState, OrchestratorConfig, OrchestratorError, Result, TenantId, UserId,
};
use orchestrator_crm::CrmSynchroniser;
use orchestrator_pipeline::{MessagePipeline, PipelineError, PipelineSettings};
use orchestrator_providers::{AiOrchestrator, OrchestrationError, ProviderRegistry};
use serde_json::Value;
use tokio::sync::watch;
use tracing::instrument;

use crate::persistence::{ConversationRepository, MessageRepository};
use crate::views::{self, HealthView, StatusView, SubsystemVerdict, SummaryView, SystemMetricsView};

/// Everything [`ConversationOrchestrator::post_user_message`] hands back
/// to its caller after one turn.
#[derive(Debug, Clone)]
pub struct PostMessageResult {
    pub message_id: orchestrator_core::MessageId,
    pub response_text: String,
    pub state: ConversationState,
    pub requires_escalation: bool,
    pub escalation_reason: Option<String>,
    pub aggregate_confidence: f32,
    pub processing_ms: u64,
    pub timed_out: bool,
}

/// Dependencies the facade is constructed from. Everything here is already
/// built and handed in — the facade only wires calls across them, the same
/// way the gateway crate composes already-constructed subsystem handles
/// rather than building them itself.
pub struct ConversationOrchestrator {
    config: OrchestratorConfig,
    context: Arc<ContextStore>,
    pipeline: Arc<MessagePipeline>,
    ai: Arc<AiOrchestrator>,
    analytics: Arc<AnalyticsCollector>,
    crm: Option<Arc<CrmSynchroniser>>,
    conversations: Arc<dyn ConversationRepository>,
    messages: Arc<dyn MessageRepository>,
    /// Single-flight guard for in-progress turns (§9 open question: reject
    /// concurrent turns outright rather than queue them), mirrored on the
    /// CRM Synchroniser's own `in_flight` single-flight map.
    turns_in_flight: DashSet<ConversationId>,
}

impl ConversationOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: OrchestratorConfig,
        registry: ProviderRegistry,
        providers: HashMap<String, Arc<dyn orchestrator_providers::AiProvider>>,
        adaptation: AdaptationEngine,
        crm: Option<Arc<CrmSynchroniser>>,
        conversations: Arc<dyn ConversationRepository>,
        messages: Arc<dyn MessageRepository>,
    ) -> Self {
        let settings = orchestrator_providers::OrchestratorSettings {
            confidence_threshold: config.pipeline.confidence_threshold,
            retry_base: std::time::Duration::from_secs(config.providers.retry_base_secs),
            retry_cap: std::time::Duration::from_secs(config.providers.retry_cap_secs),
            ..Default::default()
        };
        let ai = Arc::new(AiOrchestrator::new(
            registry,
            providers,
            settings,
            config.providers.circuit_breaker_threshold,
            config.providers.circuit_breaker_cooldown_secs,
        ));
        let context = Arc::new(ContextStore::new(config.pipeline.confidence_threshold));
        let analytics = Arc::new(AnalyticsCollector::new());
        let adaptation = Arc::new(adaptation);

        let pipeline_settings = PipelineSettings {
            per_turn_budget_ms: config.pipeline.per_turn_budget_ms,
            step_timeout_ms: 8_000,
            retrieval_k: config.pipeline.retrieval_k,
            confidence_threshold: config.pipeline.confidence_threshold,
            intent_vocabulary: config.intents.supported.clone(),
        };
        let pipeline = Arc::new(MessagePipeline::new(
            ai.clone(),
            context.clone(),
            adaptation,
            Some(analytics.clone()),
            pipeline_settings,
        ));

        Self {
            config,
            context,
            pipeline,
            ai,
            analytics,
            crm,
            conversations,
            messages,
            turns_in_flight: DashSet::new(),
        }
    }

    pub fn context_store(&self) -> &Arc<ContextStore> {
        &self.context
    }

    pub fn ai_orchestrator(&self) -> &Arc<AiOrchestrator> {
        &self.ai
    }

    pub fn analytics(&self) -> &Arc<AnalyticsCollector> {
        &self.analytics
    }

    // --- create_conversation -------------------------------------------------

    #[instrument(skip(self, metadata))]
    pub async fn create_conversation(
        &self,
        tenant_id: TenantId,
        user_id: Option<UserId>,
        channel: ChannelTag,
        metadata: HashMap<String, Value>,
    ) -> Result<ConversationId> {
        if tenant_id.as_str().trim().is_empty() {
            return Err(OrchestratorError::InvalidTenant(tenant_id.as_str().to_string()));
        }

        let mut conversation = Conversation::new(tenant_id.clone(), user_id, channel);
        conversation.metadata = metadata;

        self.context.create(conversation.id, tenant_id)?;
        self.conversations.upsert(&conversation).await?;

        Ok(conversation.id)
    }

    // --- post_user_message ----------------------------------------------------

    #[instrument(skip(self, utterance, metadata))]
    pub async fn post_user_message(
        &self,
        conversation_id: ConversationId,
        utterance: &str,
        metadata: HashMap<String, Value>,
    ) -> Result<PostMessageResult> {
        if !self.turns_in_flight.insert(conversation_id) {
            return Err(OrchestratorError::TurnInProgress);
        }
        let result = self.post_user_message_inner(conversation_id, utterance, metadata).await;
        self.turns_in_flight.remove(&conversation_id);
        result
    }

    async fn post_user_message_inner(
        &self,
        conversation_id: ConversationId,
        utterance: &str,
        metadata: HashMap<String, Value>,
    ) -> Result<PostMessageResult> {
        let channel = self
            .conversations
            .fetch(conversation_id)
            .await?
            .ok_or_else(|| OrchestratorError::UnknownConversation(conversation_id.to_string()))?
            .channel;

        // Per-message metadata has no dedicated slot on `Message` yet; tags
        // live on the conversation record until that's added.
        let _ = metadata;
        let inbound = Message::new(conversation_id, SenderClass::EndUser, utterance.to_string());
        self.messages.upsert(&inbound).await?;

        let turn = self
            .pipeline
            .process_turn(conversation_id, channel, utterance)
            .await
            .map_err(map_pipeline_error)?;

        let mut outbound = Message::new(conversation_id, SenderClass::Ai, turn.response_text.clone());
        outbound.annotations = turn.annotations.clone();
        self.messages.upsert(&outbound).await?;

        self.sync_conversation_record(conversation_id).await?;

        if turn.new_state == ConversationState::Escalated {
            if let Some(reason) = turn.escalation_reason.clone() {
                self.record_escalation(conversation_id, reason, "adaptation_layer".to_string())
                    .await
                    .ok();
            }
        }

        Ok(PostMessageResult {
            message_id: outbound.id,
            response_text: turn.response_text,
            state: turn.new_state,
            requires_escalation: turn.requires_escalation,
            escalation_reason: turn.escalation_reason,
            aggregate_confidence: turn.aggregate_confidence,
            processing_ms: turn.processing_ms,
            timed_out: turn.timed_out,
        })
    }

    async fn record_escalation(&self, conversation_id: ConversationId, reason: String, escalator: String) -> Result<()> {
        self.context.with_context(&conversation_id, |ctx| {
            ctx.business.escalation = Some(EscalationRecord {
                reason: reason.clone(),
                level: 1,
                escalated_at: Utc::now(),
                escalated_by: escalator,
                ..Default::default()
            });
        }).map_err(|_| OrchestratorError::UnknownConversation(conversation_id.to_string()))
    }

    // --- escalate ---------------------------------------------------------

    #[instrument(skip(self, reason))]
    pub async fn escalate(
        &self,
        conversation_id: ConversationId,
        reason: String,
        escalator: String,
        target_queue: Option<String>,
        target_agent: Option<String>,
    ) -> Result<()> {
        let transition_ctx = TransitionContext {
            escalation_reason: Some(reason.clone()),
            escalator: Some(escalator.clone()),
            ..Default::default()
        };

        self.context
            .with_context(&conversation_id, |ctx| {
                let from = ctx.session.state;
                TransitionGate::validate(from, ConversationState::Escalated, &transition_ctx)?;
                let event = TransitionGate::build_event(
                    from,
                    ConversationState::Escalated,
                    Some(reason.clone()),
                    HashMap::new(),
                );
                ctx.session.previous_state = Some(from);
                ctx.session.state = ConversationState::Escalated;
                ctx.session.state_history.push(event);
                ctx.business.escalation = Some(EscalationRecord {
                    reason: reason.clone(),
                    level: 1,
                    escalated_at: Utc::now(),
                    escalated_by: escalator.clone(),
                    target_queue: target_queue.clone(),
                    target_agent: target_agent.clone(),
                    ..Default::default()
                });
                Ok(())
            })
            .map_err(|_| OrchestratorError::UnknownConversation(conversation_id.to_string()))??;

        self.sync_conversation_record(conversation_id).await
    }

    // --- close --------------------------------------------------------------

    #[instrument(skip(self, summary))]
    pub async fn close(
        &self,
        conversation_id: ConversationId,
        resolution_type: String,
        resolver: String,
        satisfaction: Option<u8>,
        nps: Option<u8>,
        summary: Option<String>,
    ) -> Result<()> {
        if let Some(s) = satisfaction {
            if !(1..=5).contains(&s) {
                return Err(OrchestratorError::Internal(format!("satisfaction {} out of range 1..=5", s)));
            }
        }
        if let Some(n) = nps {
            if n > 10 {
                return Err(OrchestratorError::Internal(format!("nps {} out of range 0..=10", n)));
            }
        }

        let transition_ctx = TransitionContext {
            resolution_type: Some(resolution_type.clone()),
            resolver: Some(resolver.clone()),
            ..Default::default()
        };

        self.context
            .with_context(&conversation_id, |ctx| {
                let from = ctx.session.state;
                TransitionGate::validate(from, ConversationState::Resolved, &transition_ctx)?;
                let event = TransitionGate::build_event(
                    from,
                    ConversationState::Resolved,
                    Some(resolution_type.clone()),
                    HashMap::new(),
                );
                ctx.session.previous_state = Some(from);
                ctx.session.state = ConversationState::Resolved;
                ctx.session.state_history.push(event);
                Ok(())
            })
            .map_err(|_| OrchestratorError::UnknownConversation(conversation_id.to_string()))??;

        // Negative-emotion and SLA-breach durations are not yet tracked as
        // running totals anywhere upstream; reported as zero pending that
        // instrumentation.
        let finalized = self
            .analytics
            .finalize(
                &conversation_id.to_string(),
                true,
                Some(resolution_type.clone()),
                satisfaction,
                nps,
                0.0,
                0.0,
            )
            .ok();
        let _ = finalized;

        if let Ok(Some(mut conversation)) = self.conversations.fetch(conversation_id).await {
            conversation.state = ConversationState::Resolved;
            conversation.resolution = Some(ResolutionRecord {
                resolution_type,
                resolver,
                resolved_at: Some(Utc::now()),
                satisfaction,
                nps,
                summary,
            });
            self.conversations.upsert(&conversation).await?;
        }

        Ok(())
    }

    // --- status / summary / system_metrics / health --------------------------

    #[instrument(skip(self))]
    pub async fn status(&self, conversation_id: ConversationId) -> Result<StatusView> {
        self.context
            .with_context(&conversation_id, |ctx| StatusView {
                state: ctx.session.state,
                previous_state: ctx.session.previous_state,
                message_counts: ctx.session.message_counts.clone(),
                can_receive_messages: ctx.session.state.is_active_class(),
            })
            .map_err(|_| OrchestratorError::UnknownConversation(conversation_id.to_string()))
    }

    #[instrument(skip(self))]
    pub async fn summary(&self, conversation_id: ConversationId) -> Result<SummaryView> {
        let context = self
            .context
            .fetch(&conversation_id)
            .map_err(|_| OrchestratorError::UnknownConversation(conversation_id.to_string()))?;
        let live_metrics = self.analytics.live_metrics(&conversation_id.to_string()).ok();
        Ok(SummaryView { context, live_metrics })
    }

    pub fn system_metrics(&self) -> SystemMetricsView {
        SystemMetricsView {
            live_conversation_count: self.analytics.live_conversation_count(),
            per_model: self.analytics.per_model_snapshot(),
        }
    }

    /// System-wide health. CRM sync lag is tenant-scoped upstream; use
    /// [`Self::crm_health`] for a specific tenant's sync picture.
    pub fn health(&self) -> HealthView {
        let providers = self.ai.health.all_entries();
        let overall = views::verdict_from_providers(&providers);
        let circuits = self
            .ai
            .registry()
            .all()
            .into_iter()
            .map(|d| (d.name.to_string(), self.ai.circuit_state(&d.name)))
            .collect();

        HealthView { overall, providers, circuits, crm: None }
    }

    pub async fn crm_health(&self, tenant: &TenantId) -> Option<orchestrator_crm::CrmHealthSnapshot> {
        match &self.crm {
            Some(crm) => Some(crm.health(tenant).await),
            None => None,
        }
    }

    /// Background maintenance: periodic context-store sweep and, when a
    /// CRM synchroniser is wired in, its own scheduled-sync loop. Driven
    /// the same way as the CRM synchroniser's own `run` — tick on an
    /// interval until `shutdown` broadcasts `true`.
    pub async fn run_maintenance(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let idle_ttl = std::time::Duration::from_secs(self.config.context_store.idle_ttl_hours * 3600);
        let sweep_interval = std::time::Duration::from_secs(self.config.context_store.sweep_interval_secs);
        let mut interval = tokio::time::interval(sweep_interval);

        let crm_task = self.crm.clone().map(|crm| {
            let (_tx, rx) = watch::channel(false);
            tokio::spawn(async move { crm.run(rx).await })
        });

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.context.sweep(idle_ttl);
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        if let Some(handle) = crm_task {
            handle.abort();
        }
    }

    async fn sync_conversation_record(&self, conversation_id: ConversationId) -> Result<()> {
        let ctx = self
            .context
            .fetch(&conversation_id)
            .map_err(|_| OrchestratorError::UnknownConversation(conversation_id.to_string()))?;

        if let Ok(Some(mut conversation)) = self.conversations.fetch(conversation_id).await {
            conversation.state = ctx.session.state;
            conversation.previous_state = ctx.session.previous_state;
            conversation.last_activity_at = ctx.session.last_activity_at;
            conversation.message_counts = ctx.session.message_counts.clone();
            conversation.escalation = ctx.business.escalation.clone();
            self.conversations.upsert(&conversation).await?;
        }
        Ok(())
    }
}

fn map_pipeline_error(err: PipelineError) -> OrchestratorError {
    match err {
        PipelineError::UnknownConversation(id) => OrchestratorError::UnknownConversation(id),
        PipelineError::NotReceivable => OrchestratorError::NotReceivable,
        PipelineError::PipelineTimeout { ms } => OrchestratorError::PipelineTimeout { ms },
        PipelineError::AllProvidersFailed { attempts } => OrchestratorError::AllProvidersFailed { attempts },
        PipelineError::NoCandidate => OrchestratorError::NoCandidate,
    }
}

