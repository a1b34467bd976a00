use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{OrchestratorError, Result};

/// The ten states a Conversation can occupy.
///
/// The adjacency matrix and per-state timeouts below are carried over
/// verbatim from the source state machine; do not renumber or reorder
/// without re-checking every literal timeout value against it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationState {
    Initialized,
    Active,
    WaitingForUser,
    WaitingForAgent,
    Processing,
    Escalated,
    Transferred,
    Resolved,
    Abandoned,
    Archived,
}

impl ConversationState {
    pub fn allowed_targets(self) -> &'static [ConversationState] {
        use ConversationState::*;
        match self {
            Initialized => &[Active, Processing, Abandoned],
            Active => &[
                Processing,
                WaitingForUser,
                WaitingForAgent,
                Escalated,
                Resolved,
                Abandoned,
            ],
            Processing => &[Active, WaitingForUser, WaitingForAgent, Escalated, Resolved],
            WaitingForUser => &[Active, Processing, Escalated, Abandoned],
            WaitingForAgent => &[Active, Processing, Escalated, Resolved],
            Escalated => &[Transferred, Resolved],
            Transferred => &[Active, Resolved],
            Resolved => &[Archived],
            Abandoned => &[Archived],
            Archived => &[],
        }
    }

    pub fn can_transition_to(self, target: ConversationState) -> bool {
        self.allowed_targets().contains(&target)
    }

    /// Can receive a user message in this state.
    pub fn is_active_class(self) -> bool {
        use ConversationState::*;
        matches!(
            self,
            Initialized | Active | Processing | WaitingForUser | WaitingForAgent
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ConversationState::Archived)
    }

    pub fn requires_processing(self) -> bool {
        use ConversationState::*;
        matches!(self, Initialized | Active | Processing)
    }

    /// Idle timeout and the state to auto-transition to on expiry, if any.
    pub fn idle_config(self) -> Option<StateTimeout> {
        use ConversationState::*;
        match self {
            Initialized => Some(StateTimeout {
                idle_secs: 300,
                auto_transition: Abandoned,
            }),
            Active => Some(StateTimeout {
                idle_secs: 1800,
                auto_transition: Abandoned,
            }),
            Processing => Some(StateTimeout {
                idle_secs: 60,
                auto_transition: Escalated,
            }),
            WaitingForUser => Some(StateTimeout {
                idle_secs: 600,
                auto_transition: Abandoned,
            }),
            WaitingForAgent => Some(StateTimeout {
                idle_secs: 1800,
                auto_transition: Escalated,
            }),
            // No timeout: escalated conversations require manual intervention.
            Escalated => None,
            Transferred => Some(StateTimeout {
                idle_secs: 300,
                auto_transition: Escalated,
            }),
            Resolved => Some(StateTimeout {
                idle_secs: 86_400,
                auto_transition: Archived,
            }),
            Abandoned => Some(StateTimeout {
                idle_secs: 3600,
                auto_transition: Archived,
            }),
            Archived => None,
        }
    }
}

impl std::fmt::Display for ConversationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConversationState::Initialized => "initialized",
            ConversationState::Active => "active",
            ConversationState::WaitingForUser => "waiting_for_user",
            ConversationState::WaitingForAgent => "waiting_for_agent",
            ConversationState::Processing => "processing",
            ConversationState::Escalated => "escalated",
            ConversationState::Transferred => "transferred",
            ConversationState::Resolved => "resolved",
            ConversationState::Abandoned => "abandoned",
            ConversationState::Archived => "archived",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct StateTimeout {
    pub idle_secs: u64,
    pub auto_transition: ConversationState,
}

/// Context required to enter certain destination states. Checked by
/// [`TransitionGate::validate`] before the transition is applied.
#[derive(Debug, Clone, Default)]
pub struct TransitionContext {
    pub escalation_reason: Option<String>,
    pub escalator: Option<String>,
    pub resolution_type: Option<String>,
    pub resolver: Option<String>,
    pub transfer_target: Option<String>,
    pub transfer_reason: Option<String>,
}

/// A single entry in a conversation's state history, capped at 50 entries
/// by the owning session layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionEvent {
    pub from: ConversationState,
    pub to: ConversationState,
    pub timestamp: DateTime<Utc>,
    pub reason: Option<String>,
    pub metadata: HashMap<String, Value>,
}

/// Stateless transition validator: checks adjacency and required context.
pub struct TransitionGate;

impl TransitionGate {
    pub fn validate(
        from: ConversationState,
        to: ConversationState,
        ctx: &TransitionContext,
    ) -> Result<()> {
        if !from.can_transition_to(to) {
            return Err(OrchestratorError::InvalidTransition {
                from: from.to_string(),
                to: to.to_string(),
            });
        }

        match to {
            ConversationState::Escalated => {
                if ctx.escalation_reason.is_none() || ctx.escalator.is_none() {
                    return Err(OrchestratorError::InvalidTransition {
                        from: from.to_string(),
                        to: to.to_string(),
                    });
                }
            }
            ConversationState::Resolved => {
                if ctx.resolution_type.is_none() || ctx.resolver.is_none() {
                    return Err(OrchestratorError::InvalidTransition {
                        from: from.to_string(),
                        to: to.to_string(),
                    });
                }
            }
            ConversationState::Transferred => {
                if ctx.transfer_target.is_none() || ctx.transfer_reason.is_none() {
                    return Err(OrchestratorError::InvalidTransition {
                        from: from.to_string(),
                        to: to.to_string(),
                    });
                }
            }
            _ => {}
        }

        Ok(())
    }

    pub fn build_event(
        from: ConversationState,
        to: ConversationState,
        reason: Option<String>,
        metadata: HashMap<String, Value>,
    ) -> TransitionEvent {
        TransitionEvent {
            from,
            to,
            timestamp: Utc::now(),
            reason,
            metadata,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initialized_cannot_resolve_directly() {
        assert!(!ConversationState::Initialized.can_transition_to(ConversationState::Resolved));
    }

    #[test]
    fn archived_is_terminal_with_no_outgoing() {
        assert!(ConversationState::Archived.is_terminal());
        assert!(ConversationState::Archived.allowed_targets().is_empty());
    }

    #[test]
    fn escalation_requires_reason_and_escalator() {
        let ctx = TransitionContext::default();
        let err = TransitionGate::validate(
            ConversationState::Active,
            ConversationState::Escalated,
            &ctx,
        )
        .unwrap_err();
        assert!(matches!(err, OrchestratorError::InvalidTransition { .. }));

        let ctx = TransitionContext {
            escalation_reason: Some("angry customer".into()),
            escalator: Some("pipeline".into()),
            ..Default::default()
        };
        assert!(TransitionGate::validate(
            ConversationState::Active,
            ConversationState::Escalated,
            &ctx
        )
        .is_ok());
    }

    #[test]
    fn processing_auto_transitions_to_escalated_after_60s() {
        let cfg = ConversationState::Processing.idle_config().unwrap();
        assert_eq!(cfg.idle_secs, 60);
        assert_eq!(cfg.auto_transition, ConversationState::Escalated);
    }

    #[test]
    fn escalated_has_no_idle_timeout() {
        assert!(ConversationState::Escalated.idle_config().is_none());
    }

    #[test]
    fn resolved_and_abandoned_auto_archive() {
        let resolved = ConversationState::Resolved.idle_config().unwrap();
        assert_eq!(resolved.idle_secs, 86_400);
        assert_eq!(resolved.auto_transition, ConversationState::Archived);

        let abandoned = ConversationState::Abandoned.idle_config().unwrap();
        assert_eq!(abandoned.idle_secs, 3600);
        assert_eq!(abandoned.auto_transition, ConversationState::Archived);
    }
}
