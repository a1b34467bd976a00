use chrono::{DateTime, Utc};
use orchestrator_core::TenantId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Direction a Sync record is kept for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncDirection {
    Inbound,
    Outbound,
    Bidirectional,
}

/// Lifecycle status of a single Sync record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Synced,
    Pending,
    Failed,
    Conflict,
}

/// Strategy used to settle a detected conflict, selected per object-type mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictResolutionStrategy {
    LastWriteWins,
    Merge,
    Manual,
}

impl Default for ConflictResolutionStrategy {
    fn default() -> Self {
        Self::LastWriteWins
    }
}

/// Whether a sync pass covers every record of a type or only what changed
/// since the last successful run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    Full,
    Incremental,
}

/// Tracks the relationship between one local record and its remote
/// counterpart. At most one exists per (tenant, object-type, local id).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncRecord {
    pub local_id: String,
    pub remote_id: Option<String>,
    pub object_type: String,
    pub direction: SyncDirection,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub last_local_modified: Option<DateTime<Utc>>,
    pub last_remote_modified: Option<DateTime<Utc>>,
    pub status: SyncStatus,
    pub conflict_resolution: ConflictResolutionStrategy,
    pub last_error: Option<String>,
    pub retry_count: u32,
}

impl SyncRecord {
    pub fn new(local_id: impl Into<String>, object_type: impl Into<String>) -> Self {
        Self {
            local_id: local_id.into(),
            remote_id: None,
            object_type: object_type.into(),
            direction: SyncDirection::Bidirectional,
            last_sync_at: None,
            last_local_modified: None,
            last_remote_modified: None,
            status: SyncStatus::Pending,
            conflict_resolution: ConflictResolutionStrategy::LastWriteWins,
            last_error: None,
            retry_count: 0,
        }
    }
}

/// A record-level failure that exceeded its retry budget.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    pub object_type: String,
    pub local_id: String,
    pub record_snapshot: Value,
    pub error_text: String,
    pub retry_count: u32,
    pub created_at: DateTime<Utc>,
}

/// A pair flagged for human review because the configured strategy is
/// `Manual`, or `Merge` could not resolve a field deterministically.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictQueueEntry {
    pub object_type: String,
    pub local_id: String,
    pub local_record: Value,
    pub remote_record: Value,
    pub flagged_at: DateTime<Utc>,
}

/// One local-field ↔ remote-field correspondence within an object-type mapping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldMapping {
    pub local_field: String,
    pub remote_field: String,
    pub type_tag: String,
    pub required: bool,
    pub transform: Option<String>,
    pub validation: Option<String>,
}

impl FieldMapping {
    pub fn new(
        local_field: impl Into<String>,
        remote_field: impl Into<String>,
        type_tag: impl Into<String>,
    ) -> Self {
        Self {
            local_field: local_field.into(),
            remote_field: remote_field.into(),
            type_tag: type_tag.into(),
            required: false,
            transform: None,
            validation: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_transform(mut self, name: impl Into<String>) -> Self {
        self.transform = Some(name.into());
        self
    }
}

/// Declarative field mapping for one object-type, plus the conflict
/// resolution strategy this mapping is synced under.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectTypeMapping {
    pub object_type: String,
    pub fields: Vec<FieldMapping>,
    pub conflict_resolution: ConflictResolutionStrategy,
}

impl ObjectTypeMapping {
    pub fn new(object_type: impl Into<String>, fields: Vec<FieldMapping>) -> Self {
        Self {
            object_type: object_type.into(),
            fields,
            conflict_resolution: ConflictResolutionStrategy::LastWriteWins,
        }
    }

    pub fn with_conflict_resolution(mut self, strategy: ConflictResolutionStrategy) -> Self {
        self.conflict_resolution = strategy;
        self
    }
}

/// A record as seen on the remote (CRM) side, opaque beyond id/modification
/// time/field bag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteRecord {
    pub remote_id: String,
    pub modified_at: DateTime<Utc>,
    pub fields: Value,
}

/// A record as seen on the local side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalRecord {
    pub local_id: String,
    pub remote_id: Option<String>,
    pub modified_at: DateTime<Utc>,
    pub fields: Value,
}

/// Outcome counters for one `sync_bidirectional` pass, mirroring the
/// running tally the synchroniser keeps while a pass is in flight.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncStats {
    pub total_processed: u64,
    pub successful: u64,
    pub failed: u64,
    pub conflicts: u64,
}

/// Final report for one completed (or failed) sync pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncRunReport {
    pub tenant: String,
    pub object_type: String,
    pub mode: &'static str,
    pub succeeded: bool,
    pub stats: SyncStats,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub error: Option<String>,
}

/// Health snapshot for one tenant, covering every object-type it has a
/// mapping for.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CrmHealthSnapshot {
    pub sync_lag_secs: std::collections::HashMap<String, f64>,
    pub dead_letter_queue_size: usize,
    pub conflict_queue_size: usize,
    pub client_healthy: bool,
    pub last_run_outcome: std::collections::HashMap<String, bool>,
}

pub(crate) fn record_key(tenant: &TenantId, object_type: &str, local_id: &str) -> (String, String, String) {
    (
        tenant.as_str().to_string(),
        object_type.to_string(),
        local_id.to_string(),
    )
}
