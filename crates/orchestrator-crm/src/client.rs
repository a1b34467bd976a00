use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::Result;
use crate::types::{LocalRecord, RemoteRecord};

/// Health as reported by the underlying CRM wire client (Salesforce, HubSpot,
/// or whatever concrete transport is wired in at the edge).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientHealth {
    Healthy,
    Degraded,
    Unreachable,
}

/// Capability interface every concrete CRM integration must implement. The
/// core never speaks a vendor's wire protocol directly — only this trait,
/// mirroring how the AI Orchestrator only ever speaks through `AiProvider`.
#[async_trait]
pub trait CrmClient: Send + Sync {
    /// Provider tag for logging (e.g. "salesforce", "hubspot").
    fn name(&self) -> &str;

    /// Enumerate every remote record of `object_type`, optionally restricted
    /// to records modified after `since`.
    async fn query_remote(
        &self,
        object_type: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<RemoteRecord>>;

    /// Create a new remote record, returning its assigned remote id.
    async fn create_remote(&self, object_type: &str, data: Value) -> Result<String>;

    /// Update an existing remote record in place.
    async fn update_remote(&self, object_type: &str, remote_id: &str, data: Value) -> Result<()>;

    async fn health(&self) -> Result<ClientHealth>;
}

/// Capability interface over whatever owns local record state (a relational
/// store, an in-memory table in tests). Persistence itself stays an external
/// collaborator; the synchroniser only ever calls through this trait.
#[async_trait]
pub trait LocalRecordStore: Send + Sync {
    async fn all(&self, object_type: &str) -> Result<Vec<LocalRecord>>;

    async fn changed_since(&self, object_type: &str, since: DateTime<Utc>) -> Result<Vec<LocalRecord>>;

    /// Apply an inbound remote record to local state, creating or updating
    /// the local record as needed.
    async fn upsert_from_remote(&self, object_type: &str, record: LocalRecord) -> Result<()>;
}
