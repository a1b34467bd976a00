//! Layered Context Store (C3): in-memory mapping from conversation id to
//! its four-layer record. Each conversation has an exclusive-writer lock;
//! cross-conversation operations are forbidden by construction — callers
//! can only ever hold one conversation's guard at a time.

use std::sync::Mutex;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use orchestrator_core::{ConversationId, LayeredContext, TenantId};
use tracing::{debug, instrument};

use crate::error::{ContextError, Result};

pub struct ContextStore {
    entries: DashMap<ConversationId, Mutex<LayeredContext>>,
    default_confidence_threshold: f32,
}

impl ContextStore {
    pub fn new(default_confidence_threshold: f32) -> Self {
        Self {
            entries: DashMap::new(),
            default_confidence_threshold,
        }
    }

    #[instrument(skip(self))]
    pub fn create(&self, id: ConversationId, tenant_id: TenantId) -> Result<()> {
        self.entries.insert(
            id,
            Mutex::new(LayeredContext::new(tenant_id, self.default_confidence_threshold)),
        );
        Ok(())
    }

    /// Run `f` with exclusive access to the conversation's context.
    pub fn with_context<T>(
        &self,
        id: &ConversationId,
        f: impl FnOnce(&mut LayeredContext) -> T,
    ) -> Result<T> {
        let entry = self
            .entries
            .get(id)
            .ok_or_else(|| ContextError::NotFound(id.to_string()))?;
        let mut guard = entry.lock().unwrap();
        Ok(f(&mut guard))
    }

    /// Take a consistent read-only snapshot (clone) of the context.
    pub fn fetch(&self, id: &ConversationId) -> Result<LayeredContext> {
        self.with_context(id, |ctx| ctx.clone())
    }

    pub fn fetch_or_create(&self, id: ConversationId, tenant_id: TenantId) -> Result<LayeredContext> {
        if !self.entries.contains_key(&id) {
            self.create(id, tenant_id)?;
        }
        self.fetch(&id)
    }

    #[instrument(skip(self))]
    pub fn drop_context(&self, id: &ConversationId) {
        self.entries.remove(id);
    }

    /// Remove records whose session layer's last-activity time is older
    /// than `idle_ttl`. Returns the number of evicted conversations.
    #[instrument(skip(self))]
    pub fn sweep(&self, idle_ttl: Duration) -> usize {
        let now = Utc::now();
        let stale: Vec<ConversationId> = self
            .entries
            .iter()
            .filter_map(|entry| {
                let ctx = entry.value().lock().unwrap();
                let age = now.signed_duration_since(ctx.session.last_activity_at);
                if age.to_std().unwrap_or_default() > idle_ttl {
                    Some(*entry.key())
                } else {
                    None
                }
            })
            .collect();

        for id in &stale {
            self.entries.remove(id);
        }
        debug!(evicted = stale.len(), "context store sweep complete");
        stale.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for ContextStore {
    fn default() -> Self {
        Self::new(orchestrator_core::config::DEFAULT_CONFIDENCE_THRESHOLD)
    }
}

/// Serialised wire shape — `LayeredContext` already derives Serialize /
/// Deserialize with a version tag and tolerant defaults, so serialisation
/// is just `serde_json::to_value` / `from_value` over it.
pub fn serialize(ctx: &LayeredContext) -> Result<serde_json::Value> {
    Ok(serde_json::to_value(ctx)?)
}

pub fn deserialize(value: serde_json::Value) -> Result<LayeredContext> {
    Ok(serde_json::from_value(value)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_then_fetch_roundtrips() {
        let store = ContextStore::default();
        let id = ConversationId::new();
        store.create(id, TenantId::new("t1")).unwrap();
        let ctx = store.fetch(&id).unwrap();
        assert_eq!(ctx.user.tenant_id, TenantId::new("t1"));
    }

    #[test]
    fn fetch_missing_conversation_errors() {
        let store = ContextStore::default();
        let id = ConversationId::new();
        assert!(store.fetch(&id).is_err());
    }

    #[test]
    fn sweep_evicts_stale_entries_only() {
        let store = ContextStore::default();
        let stale_id = ConversationId::new();
        store.create(stale_id, TenantId::new("t1")).unwrap();
        store
            .with_context(&stale_id, |ctx| {
                ctx.session.last_activity_at = Utc::now() - chrono::Duration::hours(48);
            })
            .unwrap();

        let fresh_id = ConversationId::new();
        store.create(fresh_id, TenantId::new("t1")).unwrap();

        let evicted = store.sweep(Duration::from_secs(24 * 3600));
        assert_eq!(evicted, 1);
        assert!(store.fetch(&stale_id).is_err());
        assert!(store.fetch(&fresh_id).is_ok());
    }

    #[test]
    fn serialize_deserialize_roundtrip() {
        let store = ContextStore::default();
        let id = ConversationId::new();
        store.create(id, TenantId::new("t1")).unwrap();
        let ctx = store.fetch(&id).unwrap();
        let value = serialize(&ctx).unwrap();
        let restored = deserialize(value).unwrap();
        assert_eq!(restored.version, ctx.version);
    }
}
