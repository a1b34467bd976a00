//! Shared data model, ids, FSM, error taxonomy, and configuration for the
//! conversation orchestrator. Every other crate in the workspace depends on
//! this one and none of its types are runtime-specific.

pub mod config;
pub mod conversation;
pub mod error;
pub mod fsm;
pub mod ids;

pub use config::OrchestratorConfig;
pub use conversation::{
    ChannelTag, Conversation, LayeredContext, Message, SenderClass,
};
pub use error::{OrchestratorError, Result};
pub use fsm::{ConversationState, TransitionContext, TransitionEvent, TransitionGate};
pub use ids::{ConversationId, MessageId, ModelName, SyncRecordId, TenantId, UserId};
