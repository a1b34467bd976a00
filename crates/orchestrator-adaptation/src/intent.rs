//! Intent-specific handlers (§4.6, "Intent-specific handlers").
//!
//! Replaces the source's class-hierarchy of handlers with the `{can_handle,
//! validate, process}` interface spec §9 calls for: composition over a tiny
//! common helper set, no inheritance.

use std::collections::{HashMap, HashSet};

use orchestrator_core::ChannelTag;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AdaptationError, Result};

/// Everything a handler needs to decide whether and how to act on a turn.
#[derive(Debug, Clone)]
pub struct IntentContext {
    pub intent: String,
    pub confidence: f32,
    pub parameters: HashMap<String, Value>,
    pub original_message: String,
    pub channel: ChannelTag,
    pub previous_intents: Vec<String>,
}

/// What a handler (or the fallback) produces for one turn.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IntentResult {
    pub intent: String,
    pub success: bool,
    /// Overrides the generator's text when present.
    pub response_text: Option<String>,
    pub context_patches: HashMap<String, Value>,
    pub metadata: HashMap<String, Value>,
    pub requires_escalation: bool,
    pub escalation_reason: Option<String>,
    pub suggested_actions: Vec<String>,
}

fn default_channels() -> HashSet<ChannelTagKey> {
    use ChannelTagKey::*;
    [WebChat, MobileIos, MobileAndroid, Email, Slack, Teams]
        .into_iter()
        .collect()
}

/// Channel tags are not `Hash` upstream (plain enum, used mostly by value);
/// handlers compare against this small mirrored key set instead of pulling
/// a `Hash` impl onto the shared `ChannelTag` type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum ChannelTagKey {
    WebChat,
    MobileIos,
    MobileAndroid,
    Email,
    Slack,
    Teams,
    Sms,
    Api,
}

impl From<ChannelTag> for ChannelTagKey {
    fn from(c: ChannelTag) -> Self {
        match c {
            ChannelTag::WebChat => ChannelTagKey::WebChat,
            ChannelTag::MobileIos => ChannelTagKey::MobileIos,
            ChannelTag::MobileAndroid => ChannelTagKey::MobileAndroid,
            ChannelTag::Email => ChannelTagKey::Email,
            ChannelTag::Slack => ChannelTagKey::Slack,
            ChannelTag::Teams => ChannelTagKey::Teams,
            ChannelTag::Sms => ChannelTagKey::Sms,
            ChannelTag::Api => ChannelTagKey::Api,
        }
    }
}

/// Interface every intent handler implements. No inheritance — handlers are
/// small independent structs the registry dispatches to by intent name.
pub trait IntentHandler: Send + Sync {
    fn name(&self) -> &'static str;
    fn confidence_threshold(&self) -> f32 {
        0.7
    }
    fn supported_channels(&self) -> HashSet<ChannelTagKey> {
        default_channels()
    }
    fn required_parameters(&self) -> &'static [&'static str] {
        &[]
    }
    fn optional_parameters(&self) -> &'static [&'static str] {
        &[]
    }
    fn always_escalates(&self) -> bool {
        false
    }

    /// Validate the turn can be routed to this handler at all: confidence,
    /// channel, and required-parameter presence.
    fn validate(&self, ctx: &IntentContext) -> Result<()> {
        if ctx.confidence < self.confidence_threshold() {
            return Err(AdaptationError::BelowThreshold {
                observed: ctx.confidence,
                threshold: self.confidence_threshold(),
            });
        }
        if !self
            .supported_channels()
            .contains(&ChannelTagKey::from(ctx.channel))
        {
            return Err(AdaptationError::UnsupportedChannel {
                channel: format!("{:?}", ctx.channel),
                handler: self.name().to_string(),
            });
        }
        for param in self.required_parameters() {
            if !ctx.parameters.contains_key(*param) {
                return Err(AdaptationError::MissingParameter(param.to_string()));
            }
        }
        Ok(())
    }

    fn process(&self, ctx: &IntentContext) -> IntentResult;

    /// Error-result helper shared by every handler (§9: "composition over a
    /// tiny common helper set").
    fn error_result(&self, ctx: &IntentContext, rephrase_hint: &str) -> IntentResult {
        IntentResult {
            intent: ctx.intent.clone(),
            success: false,
            response_text: Some(format!(
                "I want to make sure I understand — could you rephrase that? {}",
                rephrase_hint
            )),
            requires_escalation: false,
            ..Default::default()
        }
    }
}

pub struct TechnicalSupportHandler;

const TECHNICAL_KEYWORDS: &[&str] = &[
    "error", "bug", "issue", "problem", "broken", "not working", "failure", "crash",
    "exception", "timeout", "connection", "api", "database", "server", "deployment",
    "configuration",
];

/// Components whose failure is always escalated regardless of error-code severity.
const CRITICAL_COMPONENTS: &[&str] = &["payment", "billing", "auth", "security", "data_loss"];

impl IntentHandler for TechnicalSupportHandler {
    fn name(&self) -> &'static str {
        "technical_support"
    }

    fn confidence_threshold(&self) -> f32 {
        0.75
    }

    fn process(&self, ctx: &IntentContext) -> IntentResult {
        let message_lower = ctx.original_message.to_lowercase();
        let severity = ctx
            .parameters
            .get("error_severity")
            .and_then(|v| v.as_str())
            .unwrap_or("low");
        let component = ctx
            .parameters
            .get("component")
            .and_then(|v| v.as_str())
            .unwrap_or("");

        let critical_component = CRITICAL_COMPONENTS.contains(&component);
        let high_severity = matches!(severity, "high" | "critical");
        let escalate = critical_component || high_severity;

        let mut actions = vec!["detailed_explanation".to_string()];
        if escalate {
            actions.push("priority_handling".to_string());
        }

        IntentResult {
            intent: ctx.intent.clone(),
            success: true,
            response_text: None,
            metadata: [(
                "matched_keywords".to_string(),
                Value::from(
                    TECHNICAL_KEYWORDS
                        .iter()
                        .filter(|k| message_lower.contains(**k))
                        .map(|k| k.to_string())
                        .collect::<Vec<_>>(),
                ),
            )]
            .into_iter()
            .collect(),
            requires_escalation: escalate,
            escalation_reason: escalate.then(|| {
                if critical_component {
                    format!("critical_component:{}", component)
                } else {
                    format!("error_severity:{}", severity)
                }
            }),
            suggested_actions: actions,
            ..Default::default()
        }
    }
}

/// Sub-route within account-management, chosen from an extracted parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AccountSubRoute {
    PasswordReset,
    BillingInquiry,
    PlanChange,
    ProfileUpdate,
    Unknown,
}

pub struct AccountManagementHandler;

impl AccountManagementHandler {
    fn sub_route(ctx: &IntentContext) -> AccountSubRoute {
        match ctx
            .parameters
            .get("sub_intent")
            .and_then(|v| v.as_str())
            .unwrap_or("")
        {
            "password_reset" => AccountSubRoute::PasswordReset,
            "billing_inquiry" => AccountSubRoute::BillingInquiry,
            "plan_change" => AccountSubRoute::PlanChange,
            "profile_update" => AccountSubRoute::ProfileUpdate,
            _ => AccountSubRoute::Unknown,
        }
    }
}

impl IntentHandler for AccountManagementHandler {
    fn name(&self) -> &'static str {
        "account_management"
    }

    fn process(&self, ctx: &IntentContext) -> IntentResult {
        let route = Self::sub_route(ctx);
        let (actions, escalate): (Vec<String>, bool) = match route {
            AccountSubRoute::PasswordReset => (vec!["send_reset_link".to_string()], false),
            AccountSubRoute::BillingInquiry => (vec!["route_to_billing".to_string()], false),
            AccountSubRoute::PlanChange => (vec!["present_plan_options".to_string()], false),
            AccountSubRoute::ProfileUpdate => (vec!["confirm_profile_fields".to_string()], false),
            AccountSubRoute::Unknown => (vec!["clarify_sub_intent".to_string()], false),
        };

        IntentResult {
            intent: ctx.intent.clone(),
            success: true,
            metadata: [(
                "sub_route".to_string(),
                Value::String(format!("{:?}", route)),
            )]
            .into_iter()
            .collect(),
            requires_escalation: escalate,
            suggested_actions: actions,
            ..Default::default()
        }
    }
}

pub struct BillingInquiryHandler;

impl IntentHandler for BillingInquiryHandler {
    fn name(&self) -> &'static str {
        "billing_inquiry"
    }

    fn process(&self, ctx: &IntentContext) -> IntentResult {
        let disputed = ctx
            .parameters
            .get("disputed_charge")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);

        IntentResult {
            intent: ctx.intent.clone(),
            success: true,
            requires_escalation: disputed,
            escalation_reason: disputed.then(|| "disputed_charge".to_string()),
            suggested_actions: vec!["review_invoice".to_string()],
            ..Default::default()
        }
    }
}

/// Delegates its textual response to the pipeline's knowledge-retrieval
/// snippets — this handler only decides routing and escalation, the
/// pipeline's response-generation step (§4.5 step 4) does the writing.
pub struct GeneralQuestionHandler;

impl IntentHandler for GeneralQuestionHandler {
    fn name(&self) -> &'static str {
        "general_question"
    }

    fn confidence_threshold(&self) -> f32 {
        0.5
    }

    fn process(&self, ctx: &IntentContext) -> IntentResult {
        IntentResult {
            intent: ctx.intent.clone(),
            success: true,
            suggested_actions: vec!["knowledge_retrieval".to_string()],
            ..Default::default()
        }
    }
}

pub struct EscalationRequestHandler;

impl IntentHandler for EscalationRequestHandler {
    fn name(&self) -> &'static str {
        "escalation_request"
    }

    fn always_escalates(&self) -> bool {
        true
    }

    fn process(&self, ctx: &IntentContext) -> IntentResult {
        IntentResult {
            intent: ctx.intent.clone(),
            success: true,
            response_text: Some(
                "I'm connecting you with a member of our team who can help further.".to_string(),
            ),
            requires_escalation: true,
            escalation_reason: Some("explicit_escalation_request".to_string()),
            suggested_actions: vec!["route_to_queue".to_string()],
            ..Default::default()
        }
    }
}

/// Used when the intent has no registered handler — produces a
/// clarification prompt rather than failing the turn outright.
pub struct FallbackHandler;

impl IntentHandler for FallbackHandler {
    fn name(&self) -> &'static str {
        "fallback"
    }

    fn confidence_threshold(&self) -> f32 {
        0.0
    }

    fn supported_channels(&self) -> HashSet<ChannelTagKey> {
        [
            ChannelTagKey::WebChat,
            ChannelTagKey::MobileIos,
            ChannelTagKey::MobileAndroid,
            ChannelTagKey::Email,
            ChannelTagKey::Slack,
            ChannelTagKey::Teams,
            ChannelTagKey::Sms,
            ChannelTagKey::Api,
        ]
        .into_iter()
        .collect()
    }

    fn process(&self, ctx: &IntentContext) -> IntentResult {
        self.error_result(
            ctx,
            "Could you tell me a bit more about what you need help with?",
        )
    }
}

/// Maps intent names to handlers. Routing at turn time (§4.6): look up by
/// name, falling back to [`FallbackHandler`] when absent.
pub struct IntentHandlerRegistry {
    handlers: HashMap<&'static str, Box<dyn IntentHandler>>,
    fallback: Box<dyn IntentHandler>,
}

impl IntentHandlerRegistry {
    pub fn new() -> Self {
        let mut handlers: HashMap<&'static str, Box<dyn IntentHandler>> = HashMap::new();
        let families: Vec<Box<dyn IntentHandler>> = vec![
            Box::new(TechnicalSupportHandler),
            Box::new(AccountManagementHandler),
            Box::new(BillingInquiryHandler),
            Box::new(GeneralQuestionHandler),
            Box::new(EscalationRequestHandler),
        ];
        for handler in families {
            handlers.insert(handler.name(), handler);
        }
        Self {
            handlers,
            fallback: Box::new(FallbackHandler),
        }
    }

    pub fn register(&mut self, handler: Box<dyn IntentHandler>) {
        handlers_insert(&mut self.handlers, handler);
    }

    /// Look up by intent, validate, and execute — or return a validation
    /// error result (suggested-rephrase, `requires_escalation=false`) per
    /// §4.6 step 2.
    pub fn route(&self, ctx: &IntentContext) -> IntentResult {
        let handler = self.handlers.get(ctx.intent.as_str()).unwrap_or(&self.fallback);

        if let Err(err) = handler.validate(ctx) {
            return IntentResult {
                intent: ctx.intent.clone(),
                success: false,
                response_text: Some(format!(
                    "I want to make sure I address this correctly — could you provide a bit more detail? ({})",
                    err
                )),
                requires_escalation: false,
                metadata: [("validation_error".to_string(), Value::String(err.to_string()))]
                    .into_iter()
                    .collect(),
                ..Default::default()
            };
        }

        let mut result = handler.process(ctx);
        if handler.always_escalates() {
            result.requires_escalation = true;
            result.escalation_reason.get_or_insert_with(|| "handler_always_escalates".to_string());
        }
        result
    }
}

fn handlers_insert(
    map: &mut HashMap<&'static str, Box<dyn IntentHandler>>,
    handler: Box<dyn IntentHandler>,
) {
    map.insert(handler.name(), handler);
}

impl Default for IntentHandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(intent: &str, confidence: f32) -> IntentContext {
        IntentContext {
            intent: intent.to_string(),
            confidence,
            parameters: HashMap::new(),
            original_message: "I have an error with the API".to_string(),
            channel: ChannelTag::WebChat,
            previous_intents: vec![],
        }
    }

    #[test]
    fn unknown_intent_routes_to_fallback() {
        let registry = IntentHandlerRegistry::new();
        let result = registry.route(&ctx("not_a_real_intent", 0.9));
        assert_eq!(result.intent, "not_a_real_intent");
        assert!(!result.success);
        assert!(result.response_text.unwrap().len() > 0);
    }

    #[test]
    fn below_threshold_confidence_is_rejected() {
        let registry = IntentHandlerRegistry::new();
        let result = registry.route(&ctx("technical_support", 0.1));
        assert!(!result.success);
        assert!(!result.requires_escalation);
    }

    #[test]
    fn escalation_request_always_escalates() {
        let registry = IntentHandlerRegistry::new();
        let result = registry.route(&ctx("escalation_request", 0.9));
        assert!(result.requires_escalation);
    }

    #[test]
    fn technical_support_escalates_on_critical_component() {
        let registry = IntentHandlerRegistry::new();
        let mut c = ctx("technical_support", 0.9);
        c.parameters
            .insert("component".to_string(), Value::String("payment".to_string()));
        let result = registry.route(&c);
        assert!(result.requires_escalation);
    }
}
