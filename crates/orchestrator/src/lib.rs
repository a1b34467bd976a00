//! The conversation orchestrator: the library facade that wires the seven
//! component crates (C1-C8) behind the external operations in spec §6.
//!
//! Everything durable (Conversation, Message, Sync record, model-descriptor
//! configuration, transform registry) is delegated to a persistence
//! collaborator through the narrow [`persistence`] traits; this crate and
//! its dependencies own only the ephemeral context store and in-process
//! metrics. Wiring an HTTP/websocket edge, authentication, or a concrete
//! relational store on top of [`ConversationOrchestrator`] is deliberately
//! left to a deployment, not this crate.

pub mod facade;
pub mod persistence;
pub mod views;

pub use facade::{ConversationOrchestrator, PostMessageResult};
pub use persistence::{in_memory, ConversationRepository, MessageRepository};
pub use views::{HealthView, StatusView, SubsystemVerdict, SummaryView, SystemMetricsView};
