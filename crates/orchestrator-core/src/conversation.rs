use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::fsm::{ConversationState, TransitionEvent};
use crate::ids::{ConversationId, MessageId, TenantId, UserId};

/// Closed set of channels a conversation can arrive through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelTag {
    WebChat,
    MobileIos,
    MobileAndroid,
    Email,
    Slack,
    Teams,
    Sms,
    Api,
}

/// Who produced a Message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SenderClass {
    EndUser,
    Ai,
    HumanAgent,
    System,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SentimentLabel {
    Positive,
    Negative,
    Neutral,
}

/// Closed set of emotions the pipeline's emotion-detection step may return.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmotionLabel {
    Angry,
    Frustrated,
    Confused,
    Neutral,
    Satisfied,
    Happy,
    Excited,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SentimentRecord {
    pub label: SentimentLabel,
    pub score: f32,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmotionRecord {
    pub label: EmotionLabel,
    pub intensity: f32,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentRecord {
    pub intent: String,
    pub confidence: f32,
    pub at: DateTime<Utc>,
}

/// A bounded ring buffer. Push pops the oldest entry once `cap` is exceeded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Capped<T> {
    cap: usize,
    items: VecDeque<T>,
}

impl<T> Capped<T> {
    pub fn new(cap: usize) -> Self {
        Self {
            cap,
            items: VecDeque::with_capacity(cap.min(64)),
        }
    }

    pub fn push(&mut self, item: T) {
        if self.items.len() >= self.cap {
            self.items.pop_front();
        }
        self.items.push_back(item);
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn cap(&self) -> usize {
        self.cap
    }
}

/// Customer tier, stable across sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CustomerTier {
    Standard,
    Premium,
    Enterprise,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserLayer {
    pub tenant_id: TenantId,
    pub tier: CustomerTier,
    pub vip: bool,
    pub language: String,
    pub timezone: String,
    pub sentiment_history: Capped<SentimentRecord>,
    pub emotion_history: Capped<EmotionRecord>,
    pub interaction_history: Vec<String>,
}

impl UserLayer {
    pub fn new(tenant_id: TenantId) -> Self {
        Self {
            tenant_id,
            tier: CustomerTier::Standard,
            vip: false,
            language: "en".to_string(),
            timezone: "UTC".to_string(),
            sentiment_history: Capped::new(100),
            emotion_history: Capped::new(100),
            interaction_history: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionLayer {
    pub state: ConversationState,
    pub previous_state: Option<ConversationState>,
    pub state_history: Capped<TransitionEvent>,
    pub message_counts: HashMap<String, u64>,
    pub started_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub variables: HashMap<String, Value>,
}

impl SessionLayer {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            state: ConversationState::Initialized,
            previous_state: None,
            state_history: Capped::new(50),
            message_counts: HashMap::new(),
            started_at: now,
            last_activity_at: now,
            variables: HashMap::new(),
        }
    }

    pub fn record_message(&mut self, sender: SenderClass) {
        let key = match sender {
            SenderClass::EndUser => "end_user",
            SenderClass::Ai => "ai",
            SenderClass::HumanAgent => "human_agent",
            SenderClass::System => "system",
        };
        *self.message_counts.entry(key.to_string()).or_insert(0) += 1;
        self.last_activity_at = Utc::now();
    }
}

impl Default for SessionLayer {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiLayer {
    pub last_intent: Option<IntentRecord>,
    pub intent_history: Capped<IntentRecord>,
    pub last_sentiment: Option<SentimentRecord>,
    pub sentiment_history: Capped<SentimentRecord>,
    pub last_emotion: Option<EmotionRecord>,
    pub emotion_history: Capped<EmotionRecord>,
    pub last_model_used: Option<String>,
    pub last_token_usage: Option<(u32, u32)>,
    pub confidence_threshold: f32,
    pub fallback_triggered: bool,
}

impl AiLayer {
    pub fn new(confidence_threshold: f32) -> Self {
        Self {
            last_intent: None,
            intent_history: Capped::new(20),
            last_sentiment: None,
            sentiment_history: Capped::new(100),
            last_emotion: None,
            emotion_history: Capped::new(100),
            last_model_used: None,
            last_token_usage: None,
            confidence_threshold,
            fallback_triggered: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EscalationRecord {
    pub reason: String,
    pub level: u8,
    pub escalated_at: DateTime<Utc>,
    pub escalated_by: String,
    pub target_queue: Option<String>,
    pub target_agent: Option<String>,
    pub priority: Option<String>,
    pub sla_deadline: Option<DateTime<Utc>>,
    pub resolution_notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BusinessLayer {
    pub sla_breach: bool,
    pub sla_deadline: Option<DateTime<Utc>>,
    pub escalation: Option<EscalationRecord>,
    pub applied_rules: Vec<String>,
    pub triggered_workflows: Vec<String>,
    pub compliance_tags: Vec<String>,
    pub priority_override: Option<String>,
    pub queue: Option<String>,
    pub assigned_agent: Option<String>,
}

/// Stable wrapper shape used for serialisation: the four layers plus a
/// version tag and a serialisation timestamp. Deserialisation tolerates
/// missing fields by falling back to their `Default` impls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayeredContext {
    #[serde(default = "context_version")]
    pub version: u32,
    pub user: UserLayer,
    pub session: SessionLayer,
    pub ai: AiLayer,
    #[serde(default)]
    pub business: BusinessLayer,
    #[serde(default = "Utc::now")]
    pub serialized_at: DateTime<Utc>,
}

fn context_version() -> u32 {
    1
}

impl LayeredContext {
    pub fn new(tenant_id: TenantId, confidence_threshold: f32) -> Self {
        Self {
            version: context_version(),
            user: UserLayer::new(tenant_id),
            session: SessionLayer::new(),
            ai: AiLayer::new(confidence_threshold),
            business: BusinessLayer::default(),
            serialized_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ResolutionRecord {
    pub resolution_type: String,
    pub resolver: String,
    pub resolved_at: Option<DateTime<Utc>>,
    pub satisfaction: Option<u8>,
    pub nps: Option<u8>,
    pub summary: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    pub tenant_id: TenantId,
    pub user_id: Option<UserId>,
    pub channel: ChannelTag,
    pub state: ConversationState,
    pub previous_state: Option<ConversationState>,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub message_counts: HashMap<String, u64>,
    pub aggregate_confidence: f32,
    pub aggregate_sentiment: f32,
    pub aggregate_emotion_intensity: f32,
    pub resolution: Option<ResolutionRecord>,
    pub escalation: Option<EscalationRecord>,
    pub sla_deadline: Option<DateTime<Utc>>,
    pub metadata: HashMap<String, Value>,
}

impl Conversation {
    pub fn new(tenant_id: TenantId, user_id: Option<UserId>, channel: ChannelTag) -> Self {
        let now = Utc::now();
        Self {
            id: ConversationId::new(),
            tenant_id,
            user_id,
            channel,
            state: ConversationState::Initialized,
            previous_state: None,
            created_at: now,
            last_activity_at: now,
            message_counts: HashMap::new(),
            aggregate_confidence: 0.0,
            aggregate_sentiment: 0.0,
            aggregate_emotion_intensity: 0.0,
            resolution: None,
            escalation: None,
            sla_deadline: None,
            metadata: HashMap::new(),
        }
    }
}

/// Per-turn AI annotations attached to a Message.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MessageAnnotations {
    pub intent: Option<String>,
    pub intent_confidence: Option<f32>,
    pub sentiment_label: Option<SentimentLabel>,
    pub sentiment_score: Option<f32>,
    pub emotion_label: Option<EmotionLabel>,
    pub emotion_intensity: Option<f32>,
    pub entities: Vec<String>,
    pub language: Option<String>,
    pub model_used: Option<String>,
    pub prompt_tokens: Option<u32>,
    pub completion_tokens: Option<u32>,
    pub processing_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender: SenderClass,
    pub content: String,
    pub content_type: String,
    pub created_at: DateTime<Utc>,
    pub annotations: MessageAnnotations,
    pub deleted_at: Option<DateTime<Utc>>,
    pub edited_at: Option<DateTime<Utc>>,
}

impl Message {
    pub fn new(conversation_id: ConversationId, sender: SenderClass, content: String) -> Self {
        Self {
            id: MessageId::new(),
            conversation_id,
            sender,
            content,
            content_type: "text/plain".to_string(),
            created_at: Utc::now(),
            annotations: MessageAnnotations::default(),
            deleted_at: None,
            edited_at: None,
        }
    }
}
