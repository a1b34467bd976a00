use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use orchestrator_core::TenantId;
use serde_json::{Map, Value};
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

use crate::client::{ClientHealth, CrmClient, LocalRecordStore};
use crate::error::{CrmError, Result};
use crate::schedule::ScheduledSync;
use crate::transform::TransformRegistry;
use crate::types::{
    record_key, ConflictQueueEntry, ConflictResolutionStrategy, CrmHealthSnapshot, DeadLetterEntry, LocalRecord,
    ObjectTypeMapping, RemoteRecord, SyncMode, SyncRecord, SyncRunReport, SyncStats, SyncStatus,
};

/// Bound on retained dead-letter entries and their time-to-live.
const DLQ_CAP: usize = 5_000;
const DLQ_TTL_DAYS: i64 = 7;
const CONFLICT_QUEUE_CAP: usize = 5_000;
const MAX_RECORD_RETRIES: u32 = 3;
/// Multiple real-time change events within this window collapse into a
/// single incremental sync pass.
const DEBOUNCE_WINDOW_SECS: i64 = 2;

type RecordKey = (String, String, String);
type FlightKey = (String, String);

/// Bi-directional synchroniser between the conversation core's local record
/// state and an opaque external CRM, with conflict detection/resolution,
/// a bounded dead-letter queue, and per-(tenant, object-type) single-flight
/// scheduling.
pub struct CrmSynchroniser {
    client: Arc<dyn CrmClient>,
    local_store: Arc<dyn LocalRecordStore>,
    mappings: DashMap<String, ObjectTypeMapping>,
    transforms: Mutex<TransformRegistry>,
    sync_records: DashMap<RecordKey, SyncRecord>,
    last_sync_at: DashMap<FlightKey, DateTime<Utc>>,
    in_flight: DashMap<FlightKey, ()>,
    last_run_outcome: DashMap<FlightKey, bool>,
    last_debounced_at: DashMap<FlightKey, DateTime<Utc>>,
    dead_letters: Mutex<VecDeque<DeadLetterEntry>>,
    conflicts: Mutex<VecDeque<ConflictQueueEntry>>,
    schedules: Mutex<Vec<ScheduledSync>>,
}

impl CrmSynchroniser {
    pub fn new(client: Arc<dyn CrmClient>, local_store: Arc<dyn LocalRecordStore>) -> Self {
        Self {
            client,
            local_store,
            mappings: DashMap::new(),
            transforms: Mutex::new(TransformRegistry::new()),
            sync_records: DashMap::new(),
            last_sync_at: DashMap::new(),
            in_flight: DashMap::new(),
            last_run_outcome: DashMap::new(),
            last_debounced_at: DashMap::new(),
            dead_letters: Mutex::new(VecDeque::new()),
            conflicts: Mutex::new(VecDeque::new()),
            schedules: Mutex::new(Vec::new()),
        }
    }

    pub fn register_mapping(&self, mapping: ObjectTypeMapping) {
        self.mappings.insert(mapping.object_type.clone(), mapping);
    }

    pub fn register_transform(&self, name: impl Into<String>, f: impl Fn(&Value) -> Result<Value> + Send + Sync + 'static) {
        self.transforms.lock().unwrap().register(name, f);
    }

    pub fn register_schedule(&self, schedule: ScheduledSync) {
        self.schedules.lock().unwrap().push(schedule);
    }

    fn mapping(&self, object_type: &str) -> Result<ObjectTypeMapping> {
        self.mappings
            .get(object_type)
            .map(|m| m.clone())
            .ok_or_else(|| CrmError::NotMapped(object_type.to_string()))
    }

    // --- core sync entry point ---------------------------------------------

    #[instrument(skip(self), fields(%tenant, object_type))]
    pub async fn sync_bidirectional(
        &self,
        tenant: &TenantId,
        object_type: &str,
        mode: SyncMode,
    ) -> Result<SyncRunReport> {
        let flight_key = (tenant.as_str().to_string(), object_type.to_string());
        if self.in_flight.insert(flight_key.clone(), ()).is_some() {
            return Err(CrmError::SyncInProgress {
                tenant: tenant.as_str().to_string(),
                object_type: object_type.to_string(),
            });
        }

        let started_at = Utc::now();
        let mapping = self.mapping(object_type);
        let outcome = match mapping {
            Ok(mapping) => match mode {
                SyncMode::Full => self.perform_full_sync(tenant, &mapping).await,
                SyncMode::Incremental => self.perform_incremental_sync(tenant, &mapping).await,
            },
            Err(e) => Err(e),
        };
        let finished_at = Utc::now();

        self.in_flight.remove(&flight_key);

        let (stats, error) = match outcome {
            Ok(stats) => {
                self.last_sync_at.insert(flight_key.clone(), finished_at);
                (stats, None)
            }
            Err(e) => (SyncStats::default(), Some(e.to_string())),
        };
        let succeeded = error.is_none();
        self.last_run_outcome.insert(flight_key.clone(), succeeded);

        info!(
            succeeded,
            processed = stats.total_processed,
            conflicts = stats.conflicts,
            "bidirectional sync pass completed"
        );

        Ok(SyncRunReport {
            tenant: tenant.as_str().to_string(),
            object_type: object_type.to_string(),
            mode: match mode {
                SyncMode::Full => "full",
                SyncMode::Incremental => "incremental",
            },
            succeeded,
            stats,
            started_at,
            finished_at,
            error,
        })
    }

    async fn perform_full_sync(&self, tenant: &TenantId, mapping: &ObjectTypeMapping) -> Result<SyncStats> {
        let local_records = self.local_store.all(&mapping.object_type).await?;
        let remote_records = self.client.query_remote(&mapping.object_type, None).await?;
        self.sync_record_sets(tenant, mapping, local_records, remote_records).await
    }

    async fn perform_incremental_sync(&self, tenant: &TenantId, mapping: &ObjectTypeMapping) -> Result<SyncStats> {
        let flight_key = (tenant.as_str().to_string(), mapping.object_type.clone());
        let since = self.last_sync_at.get(&flight_key).map(|v| *v);

        let local_records = match since {
            Some(since) => self.local_store.changed_since(&mapping.object_type, since).await?,
            None => self.local_store.all(&mapping.object_type).await?,
        };
        let remote_records = self.client.query_remote(&mapping.object_type, since).await?;
        self.sync_record_sets(tenant, mapping, local_records, remote_records).await
    }

    async fn sync_record_sets(
        &self,
        tenant: &TenantId,
        mapping: &ObjectTypeMapping,
        local_records: Vec<LocalRecord>,
        remote_records: Vec<RemoteRecord>,
    ) -> Result<SyncStats> {
        let mut stats = SyncStats::default();
        let mut matched_remote_ids = std::collections::HashSet::new();

        for local in &local_records {
            stats.total_processed += 1;
            let remote_match = local
                .remote_id
                .as_ref()
                .and_then(|rid| remote_records.iter().find(|r| &r.remote_id == rid));

            let result = match remote_match {
                Some(remote) => {
                    matched_remote_ids.insert(remote.remote_id.clone());
                    self.reconcile_pair(tenant, mapping, local, remote, &mut stats).await
                }
                None => self.push_to_remote(tenant, mapping, local).await,
            };

            if let Err(e) = result {
                warn!(local_id = %local.local_id, error = %e, "record sync failed");
                stats.failed += 1;
                self.record_failure(tenant, mapping, local, &e).await;
            } else {
                stats.successful += 1;
            }
        }

        for remote in remote_records.iter().filter(|r| !matched_remote_ids.contains(&r.remote_id)) {
            stats.total_processed += 1;
            match self.pull_from_remote(tenant, mapping, remote).await {
                Ok(()) => stats.successful += 1,
                Err(e) => {
                    warn!(remote_id = %remote.remote_id, error = %e, "remote-only record pull failed");
                    stats.failed += 1;
                }
            }
        }

        Ok(stats)
    }

    // --- conflict detection & resolution ------------------------------------

    async fn reconcile_pair(
        &self,
        tenant: &TenantId,
        mapping: &ObjectTypeMapping,
        local: &LocalRecord,
        remote: &RemoteRecord,
        stats: &mut SyncStats,
    ) -> Result<()> {
        let key = record_key(tenant, &mapping.object_type, &local.local_id);
        let last_sync = self.sync_records.get(&key).and_then(|r| r.last_sync_at);

        if Self::has_conflict(Some(local.modified_at), Some(remote.modified_at), last_sync) {
            stats.conflicts += 1;
            warn!(local_id = %local.local_id, "conflict detected");
            match mapping.conflict_resolution {
                ConflictResolutionStrategy::LastWriteWins => {
                    self.resolve_last_write_wins(tenant, mapping, local, remote).await
                }
                ConflictResolutionStrategy::Merge => self.resolve_merge(tenant, mapping, local, remote).await,
                ConflictResolutionStrategy::Manual => {
                    self.flag_manual_resolution(tenant, mapping, local, remote).await
                }
            }
        } else if last_sync.map(|t| local.modified_at > t).unwrap_or(true) {
            self.push_to_remote(tenant, mapping, local).await
        } else if last_sync.map(|t| remote.modified_at > t).unwrap_or(false) {
            self.pull_from_remote(tenant, mapping, remote).await
        } else {
            self.update_sync_record(tenant, mapping, local, Some(remote), SyncStatus::Synced)
        }
    }

    /// Both sides modified after the last successful sync ⇒ conflict.
    fn has_conflict(
        local_modified: Option<DateTime<Utc>>,
        remote_modified: Option<DateTime<Utc>>,
        last_sync: Option<DateTime<Utc>>,
    ) -> bool {
        let (Some(last_sync), Some(local), Some(remote)) = (last_sync, local_modified, remote_modified) else {
            return false;
        };
        local > last_sync && remote > last_sync
    }

    async fn resolve_last_write_wins(
        &self,
        tenant: &TenantId,
        mapping: &ObjectTypeMapping,
        local: &LocalRecord,
        remote: &RemoteRecord,
    ) -> Result<()> {
        if local.modified_at >= remote.modified_at {
            self.push_to_remote(tenant, mapping, local).await
        } else {
            self.pull_from_remote(tenant, mapping, remote).await
        }
    }

    /// Field-level merge: for each mapped field, prefer the side whose value
    /// is present and non-empty; when both sides have a value, the whole
    /// record's newer side wins for that field (no per-field timestamps are
    /// available from either collaborator). The merged result is pushed to
    /// the remote and applied locally so both sides converge.
    async fn resolve_merge(
        &self,
        tenant: &TenantId,
        mapping: &ObjectTypeMapping,
        local: &LocalRecord,
        remote: &RemoteRecord,
    ) -> Result<()> {
        let newer_is_local = local.modified_at >= remote.modified_at;
        let mut merged = Map::new();
        for field in &mapping.fields {
            let local_value = local.fields.get(&field.local_field);
            let remote_value = remote.fields.get(&field.remote_field);
            let chosen = match (local_value, remote_value) {
                (Some(l), Some(r)) => {
                    if is_empty(l) {
                        r.clone()
                    } else if is_empty(r) {
                        l.clone()
                    } else if newer_is_local {
                        l.clone()
                    } else {
                        r.clone()
                    }
                }
                (Some(l), None) => l.clone(),
                (None, Some(r)) => r.clone(),
                (None, None) => Value::Null,
            };
            merged.insert(field.local_field.clone(), chosen);
        }

        let merged_local = LocalRecord {
            local_id: local.local_id.clone(),
            remote_id: local.remote_id.clone(),
            modified_at: Utc::now(),
            fields: Value::Object(merged),
        };

        self.push_to_remote(tenant, mapping, &merged_local).await?;
        self.local_store.upsert_from_remote(&mapping.object_type, merged_local).await?;
        Ok(())
    }

    async fn flag_manual_resolution(
        &self,
        tenant: &TenantId,
        mapping: &ObjectTypeMapping,
        local: &LocalRecord,
        remote: &RemoteRecord,
    ) -> Result<()> {
        warn!(local_id = %local.local_id, "manual conflict resolution required");
        let mut conflicts = self.conflicts.lock().unwrap();
        if conflicts.len() >= CONFLICT_QUEUE_CAP {
            conflicts.pop_front();
        }
        conflicts.push_back(ConflictQueueEntry {
            object_type: mapping.object_type.clone(),
            local_id: local.local_id.clone(),
            local_record: local.fields.clone(),
            remote_record: remote.fields.clone(),
            flagged_at: Utc::now(),
        });
        drop(conflicts);
        self.update_sync_record(tenant, mapping, local, Some(remote), SyncStatus::Conflict)
    }

    // --- push / pull ---------------------------------------------------------

    async fn push_to_remote(&self, tenant: &TenantId, mapping: &ObjectTypeMapping, local: &LocalRecord) -> Result<()> {
        let data = self.apply_mapping(mapping, &local.fields, true)?;
        let remote_id = match &local.remote_id {
            Some(id) => {
                self.client.update_remote(&mapping.object_type, id, data).await?;
                id.clone()
            }
            None => self.client.create_remote(&mapping.object_type, data).await?,
        };
        debug!(local_id = %local.local_id, remote_id = %remote_id, "pushed record to remote");
        let remote = RemoteRecord {
            remote_id,
            modified_at: local.modified_at,
            fields: Value::Null,
        };
        self.update_sync_record(tenant, mapping, local, Some(&remote), SyncStatus::Synced)
    }

    async fn pull_from_remote(&self, tenant: &TenantId, mapping: &ObjectTypeMapping, remote: &RemoteRecord) -> Result<()> {
        let data = self.apply_mapping_reverse(mapping, &remote.fields)?;
        let existing_local_id = self
            .sync_records
            .iter()
            .find(|entry| entry.value().remote_id.as_deref() == Some(remote.remote_id.as_str()))
            .map(|entry| entry.value().local_id.clone());

        let local_id = existing_local_id.unwrap_or_else(|| remote.remote_id.clone());
        let local = LocalRecord {
            local_id: local_id.clone(),
            remote_id: Some(remote.remote_id.clone()),
            modified_at: remote.modified_at,
            fields: data,
        };
        self.local_store.upsert_from_remote(&mapping.object_type, local.clone()).await?;
        debug!(remote_id = %remote.remote_id, local_id = %local_id, "pulled record from remote");
        self.update_sync_record(tenant, mapping, &local, Some(remote), SyncStatus::Synced)
    }

    /// `local_to_remote` selects the mapping direction: `true` maps local
    /// field names to remote field names (push), `false` is unused here —
    /// pulls go through [`apply_mapping_reverse`] so the direction reads
    /// unambiguously at call sites.
    fn apply_mapping(&self, mapping: &ObjectTypeMapping, source: &Value, local_to_remote: bool) -> Result<Value> {
        debug_assert!(local_to_remote);
        let transforms = self.transforms.lock().unwrap();
        let mut out = Map::new();
        for field in &mapping.fields {
            let value = source.get(&field.local_field);
            match value {
                Some(v) => {
                    let v = match &field.transform {
                        Some(name) => transforms.apply(name, v)?,
                        None => v.clone(),
                    };
                    out.insert(field.remote_field.clone(), v);
                }
                None if field.required => return Err(CrmError::RequiredFieldMissing(field.local_field.clone())),
                None => {}
            }
        }
        Ok(Value::Object(out))
    }

    fn apply_mapping_reverse(&self, mapping: &ObjectTypeMapping, source: &Value) -> Result<Value> {
        let transforms = self.transforms.lock().unwrap();
        let mut out = Map::new();
        for field in &mapping.fields {
            let value = source.get(&field.remote_field);
            match value {
                Some(v) => {
                    let v = match &field.transform {
                        Some(name) => transforms.apply(name, v)?,
                        None => v.clone(),
                    };
                    out.insert(field.local_field.clone(), v);
                }
                None if field.required => return Err(CrmError::RequiredFieldMissing(field.remote_field.clone())),
                None => {}
            }
        }
        Ok(Value::Object(out))
    }

    fn update_sync_record(
        &self,
        tenant: &TenantId,
        mapping: &ObjectTypeMapping,
        local: &LocalRecord,
        remote: Option<&RemoteRecord>,
        status: SyncStatus,
    ) -> Result<()> {
        let key = record_key(tenant, &mapping.object_type, &local.local_id);
        let mut entry = self
            .sync_records
            .entry(key)
            .or_insert_with(|| SyncRecord::new(local.local_id.clone(), mapping.object_type.clone()));
        entry.remote_id = remote.map(|r| r.remote_id.clone()).or_else(|| entry.remote_id.clone());
        entry.last_sync_at = Some(Utc::now());
        entry.last_local_modified = Some(local.modified_at);
        entry.last_remote_modified = remote.map(|r| r.modified_at).or(entry.last_remote_modified);
        entry.status = status;
        entry.conflict_resolution = mapping.conflict_resolution;
        entry.last_error = None;
        Ok(())
    }

    async fn record_failure(&self, tenant: &TenantId, mapping: &ObjectTypeMapping, local: &LocalRecord, err: &CrmError) {
        let key = record_key(tenant, &mapping.object_type, &local.local_id);
        let retry_count = {
            let mut entry = self
                .sync_records
                .entry(key)
                .or_insert_with(|| SyncRecord::new(local.local_id.clone(), mapping.object_type.clone()));
            entry.retry_count += 1;
            entry.status = SyncStatus::Failed;
            entry.last_error = Some(err.to_string());
            entry.retry_count
        };

        if retry_count >= MAX_RECORD_RETRIES {
            self.add_to_dead_letter_queue(&mapping.object_type, local, err.to_string(), retry_count);
        }
    }

    // --- dead-letter / conflict queues ---------------------------------------

    fn add_to_dead_letter_queue(&self, object_type: &str, local: &LocalRecord, error_text: String, retry_count: u32) {
        error!(local_id = %local.local_id, %error_text, "record moved to dead-letter queue");
        let mut dlq = self.dead_letters.lock().unwrap();
        if dlq.len() >= DLQ_CAP {
            dlq.pop_front();
        }
        dlq.push_back(DeadLetterEntry {
            object_type: object_type.to_string(),
            local_id: local.local_id.clone(),
            record_snapshot: local.fields.clone(),
            error_text,
            retry_count,
            created_at: Utc::now(),
        });
    }

    /// Sweep TTL-expired entries, then return up to `limit` remaining
    /// entries without removing them — draining is an explicit operator
    /// action via [`Self::drain_dead_letter_queue`].
    pub fn dead_letter_queue(&self, limit: usize) -> Vec<DeadLetterEntry> {
        self.sweep_dead_letters();
        let dlq = self.dead_letters.lock().unwrap();
        dlq.iter().take(limit).cloned().collect()
    }

    pub fn drain_dead_letter_queue(&self) -> Vec<DeadLetterEntry> {
        self.sweep_dead_letters();
        let mut dlq = self.dead_letters.lock().unwrap();
        dlq.drain(..).collect()
    }

    fn sweep_dead_letters(&self) {
        let cutoff = Utc::now() - ChronoDuration::days(DLQ_TTL_DAYS);
        let mut dlq = self.dead_letters.lock().unwrap();
        dlq.retain(|entry| entry.created_at > cutoff);
    }

    pub fn conflict_queue(&self) -> Vec<ConflictQueueEntry> {
        self.conflicts.lock().unwrap().iter().cloned().collect()
    }

    pub fn drain_conflict_queue(&self) -> Vec<ConflictQueueEntry> {
        self.conflicts.lock().unwrap().drain(..).collect()
    }

    // --- real-time sync --------------------------------------------------------

    /// Trigger an incremental pass for a remote change event, coalescing
    /// repeated events within the debounce window into a single pass.
    pub async fn handle_realtime_event(&self, tenant: &TenantId, object_type: &str) -> Result<Option<SyncRunReport>> {
        let flight_key = (tenant.as_str().to_string(), object_type.to_string());
        let now = Utc::now();
        if let Some(last) = self.last_debounced_at.get(&flight_key) {
            if now - *last < ChronoDuration::seconds(DEBOUNCE_WINDOW_SECS) {
                debug!("real-time event coalesced within debounce window");
                return Ok(None);
            }
        }
        self.last_debounced_at.insert(flight_key, now);
        self.sync_bidirectional(tenant, object_type, SyncMode::Incremental)
            .await
            .map(Some)
    }

    // --- health & background loop ----------------------------------------------

    pub async fn health(&self, tenant: &TenantId) -> CrmHealthSnapshot {
        let client_healthy = matches!(self.client.health().await, Ok(ClientHealth::Healthy));
        let mut sync_lag_secs = std::collections::HashMap::new();
        let mut last_run_outcome = std::collections::HashMap::new();
        let now = Utc::now();

        for mapping in self.mappings.iter() {
            let object_type = mapping.key().clone();
            let flight_key = (tenant.as_str().to_string(), object_type.clone());

            let lag = self
                .sync_records
                .iter()
                .filter(|e| e.key().0 == tenant.as_str() && e.key().1 == object_type)
                .filter_map(|e| e.value().last_remote_modified)
                .max()
                .map(|latest| (now - latest).num_milliseconds() as f64 / 1000.0)
                .unwrap_or(0.0);
            sync_lag_secs.insert(object_type.clone(), lag.max(0.0));

            if let Some(outcome) = self.last_run_outcome.get(&flight_key) {
                last_run_outcome.insert(object_type, *outcome);
            }
        }

        CrmHealthSnapshot {
            sync_lag_secs,
            dead_letter_queue_size: self.dead_letters.lock().unwrap().len(),
            conflict_queue_size: self.conflicts.lock().unwrap().len(),
            client_healthy,
            last_run_outcome,
        }
    }

    /// Background driver: ticks once a second, kicking off any due scheduled
    /// sync, until `shutdown` broadcasts `true`.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!("crm synchroniser loop started");
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(1));
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.tick().await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("crm synchroniser loop shutting down");
                        break;
                    }
                }
            }
        }
    }

    async fn tick(&self) {
        let now = Utc::now();
        let due: Vec<ScheduledSync> = {
            let mut schedules = self.schedules.lock().unwrap();
            let mut due = Vec::new();
            for schedule in schedules.iter_mut() {
                if schedule.is_due(now) {
                    due.push(schedule.clone());
                    schedule.advance(now);
                }
            }
            due
        };

        for schedule in due {
            let tenant = TenantId::new(schedule.tenant.clone());
            match self.sync_bidirectional(&tenant, &schedule.object_type, schedule.mode).await {
                Ok(report) if !report.succeeded => {
                    warn!(tenant = %schedule.tenant, object_type = %schedule.object_type, error = ?report.error, "scheduled sync failed")
                }
                Err(e) => warn!(tenant = %schedule.tenant, object_type = %schedule.object_type, error = %e, "scheduled sync rejected"),
                _ => {}
            }
        }
    }
}

fn is_empty(v: &Value) -> bool {
    matches!(v, Value::Null) || matches!(v, Value::String(s) if s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;

    struct FakeClient {
        remote: StdMutex<Vec<RemoteRecord>>,
        healthy: bool,
    }

    #[async_trait]
    impl CrmClient for FakeClient {
        fn name(&self) -> &str {
            "fake"
        }

        async fn query_remote(&self, _object_type: &str, _since: Option<DateTime<Utc>>) -> Result<Vec<RemoteRecord>> {
            Ok(self.remote.lock().unwrap().clone())
        }

        async fn create_remote(&self, _object_type: &str, data: Value) -> Result<String> {
            let id = format!("rid-{}", self.remote.lock().unwrap().len() + 1);
            self.remote.lock().unwrap().push(RemoteRecord {
                remote_id: id.clone(),
                modified_at: Utc::now(),
                fields: data,
            });
            Ok(id)
        }

        async fn update_remote(&self, _object_type: &str, remote_id: &str, data: Value) -> Result<()> {
            let mut remote = self.remote.lock().unwrap();
            if let Some(r) = remote.iter_mut().find(|r| r.remote_id == remote_id) {
                r.fields = data;
                r.modified_at = Utc::now();
            }
            Ok(())
        }

        async fn health(&self) -> Result<ClientHealth> {
            Ok(if self.healthy {
                ClientHealth::Healthy
            } else {
                ClientHealth::Degraded
            })
        }
    }

    struct FakeLocalStore {
        records: StdMutex<Vec<LocalRecord>>,
    }

    #[async_trait]
    impl LocalRecordStore for FakeLocalStore {
        async fn all(&self, _object_type: &str) -> Result<Vec<LocalRecord>> {
            Ok(self.records.lock().unwrap().clone())
        }

        async fn changed_since(&self, _object_type: &str, since: DateTime<Utc>) -> Result<Vec<LocalRecord>> {
            Ok(self
                .records
                .lock()
                .unwrap()
                .iter()
                .filter(|r| r.modified_at > since)
                .cloned()
                .collect())
        }

        async fn upsert_from_remote(&self, _object_type: &str, record: LocalRecord) -> Result<()> {
            let mut records = self.records.lock().unwrap();
            if let Some(existing) = records.iter_mut().find(|r| r.local_id == record.local_id) {
                *existing = record;
            } else {
                records.push(record);
            }
            Ok(())
        }
    }

    fn sample_mapping() -> ObjectTypeMapping {
        ObjectTypeMapping::new(
            "case",
            vec![crate::types::FieldMapping::new("subject", "Subject", "string").required()],
        )
    }

    #[tokio::test]
    async fn push_only_local_record_creates_remote() {
        let client = Arc::new(FakeClient {
            remote: StdMutex::new(Vec::new()),
            healthy: true,
        });
        let local_store = Arc::new(FakeLocalStore {
            records: StdMutex::new(vec![LocalRecord {
                local_id: "l1".into(),
                remote_id: None,
                modified_at: Utc::now(),
                fields: serde_json::json!({"subject": "hello"}),
            }]),
        });
        let synchroniser = CrmSynchroniser::new(client.clone(), local_store);
        synchroniser.register_mapping(sample_mapping());

        let tenant = TenantId::new("acme");
        let report = synchroniser.sync_bidirectional(&tenant, "case", SyncMode::Full).await.unwrap();
        assert!(report.succeeded);
        assert_eq!(report.stats.successful, 1);
        assert_eq!(client.remote.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn concurrent_sync_for_same_tenant_type_is_rejected() {
        let client = Arc::new(FakeClient {
            remote: StdMutex::new(Vec::new()),
            healthy: true,
        });
        let local_store = Arc::new(FakeLocalStore {
            records: StdMutex::new(Vec::new()),
        });
        let synchroniser = Arc::new(CrmSynchroniser::new(client, local_store));
        synchroniser.register_mapping(sample_mapping());
        let tenant = TenantId::new("acme");

        synchroniser.in_flight.insert(("acme".to_string(), "case".to_string()), ());
        let result = synchroniser.sync_bidirectional(&tenant, "case", SyncMode::Full).await;
        assert!(matches!(result, Err(CrmError::SyncInProgress { .. })));
    }

    #[test]
    fn conflict_requires_both_sides_modified_after_last_sync() {
        let last_sync = Utc::now() - ChronoDuration::hours(1);
        let local = Utc::now();
        let remote = last_sync - ChronoDuration::minutes(5);
        assert!(!CrmSynchroniser::has_conflict(Some(local), Some(remote), Some(last_sync)));

        let remote_after = Utc::now();
        assert!(CrmSynchroniser::has_conflict(Some(local), Some(remote_after), Some(last_sync)));
    }
}
