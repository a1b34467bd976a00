//! Durable-state collaborators. The core process only ever owns the
//! ephemeral [`orchestrator_context::ContextStore`] — Conversation and
//! Message records live behind these two capability interfaces, fetched
//! and upserted the same way the CRM Synchroniser speaks to its
//! `CrmClient`/`LocalRecordStore` rather than to a concrete database.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use orchestrator_core::conversation::{Conversation, Message};
use orchestrator_core::{ConversationId, Result, TenantId};

/// Fetch-by-id / upsert / list-since over Conversation records. Upserts are
/// assumed transactional: a partial write is never observable to a
/// subsequent fetch.
#[async_trait]
pub trait ConversationRepository: Send + Sync {
    async fn fetch(&self, id: ConversationId) -> Result<Option<Conversation>>;
    async fn upsert(&self, conversation: &Conversation) -> Result<()>;
    async fn list_since(&self, tenant: &TenantId, since: DateTime<Utc>) -> Result<Vec<Conversation>>;
}

/// Fetch-by-id / upsert / list-since over Message records, scoped to a
/// conversation.
#[async_trait]
pub trait MessageRepository: Send + Sync {
    async fn fetch(&self, id: orchestrator_core::MessageId) -> Result<Option<Message>>;
    async fn upsert(&self, message: &Message) -> Result<()>;
    async fn list_since(&self, conversation_id: ConversationId, since: DateTime<Utc>) -> Result<Vec<Message>>;
}

/// In-memory reference implementation of both repositories, used by the
/// test scenarios and as a starting point for a real deployment to swap
/// out for a relational-store-backed one.
pub mod in_memory {
    use super::*;
    use dashmap::DashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct InMemoryConversationRepository {
        by_id: DashMap<ConversationId, Conversation>,
    }

    #[async_trait]
    impl ConversationRepository for InMemoryConversationRepository {
        async fn fetch(&self, id: ConversationId) -> Result<Option<Conversation>> {
            Ok(self.by_id.get(&id).map(|e| e.value().clone()))
        }

        async fn upsert(&self, conversation: &Conversation) -> Result<()> {
            self.by_id.insert(conversation.id, conversation.clone());
            Ok(())
        }

        async fn list_since(&self, tenant: &TenantId, since: DateTime<Utc>) -> Result<Vec<Conversation>> {
            Ok(self
                .by_id
                .iter()
                .filter(|e| &e.value().tenant_id == tenant && e.value().last_activity_at >= since)
                .map(|e| e.value().clone())
                .collect())
        }
    }

    #[derive(Default)]
    pub struct InMemoryMessageRepository {
        by_id: DashMap<orchestrator_core::MessageId, Message>,
        by_conversation: Mutex<std::collections::HashMap<ConversationId, Vec<orchestrator_core::MessageId>>>,
    }

    #[async_trait]
    impl MessageRepository for InMemoryMessageRepository {
        async fn fetch(&self, id: orchestrator_core::MessageId) -> Result<Option<Message>> {
            Ok(self.by_id.get(&id).map(|e| e.value().clone()))
        }

        async fn upsert(&self, message: &Message) -> Result<()> {
            self.by_conversation
                .lock()
                .unwrap()
                .entry(message.conversation_id)
                .or_default()
                .push(message.id);
            self.by_id.insert(message.id, message.clone());
            Ok(())
        }

        async fn list_since(&self, conversation_id: ConversationId, since: DateTime<Utc>) -> Result<Vec<Message>> {
            let ids = self
                .by_conversation
                .lock()
                .unwrap()
                .get(&conversation_id)
                .cloned()
                .unwrap_or_default();
            Ok(ids
                .into_iter()
                .filter_map(|id| self.by_id.get(&id).map(|e| e.value().clone()))
                .filter(|m| m.created_at >= since)
                .collect())
        }
    }
}
