//! Adaptation Layer (C6): emotion-to-tone response rewriting and
//! intent-specific handler dispatch, with the escalation decisions that
//! feed back into the conversation FSM.

pub mod engine;
pub mod error;
pub mod intent;
pub mod types;

pub use engine::AdaptationEngine;
pub use error::{AdaptationError, Result};
pub use intent::{IntentContext, IntentHandler, IntentHandlerRegistry, IntentResult};
pub use types::{EmotionStrategy, EmotionStrategyTable, ToneAdaptation, ToneTag};
