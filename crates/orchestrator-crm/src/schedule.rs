use chrono::{DateTime, Duration, Utc};

use crate::types::SyncMode;

/// One registered periodic sync for a (tenant, object-type) pair. The
/// background loop advances `next_run` forward by `interval` each time the
/// pass is kicked off, regardless of whether it succeeds — a stalled pass
/// is the single-flight guard's problem, not the schedule's.
#[derive(Debug, Clone)]
pub struct ScheduledSync {
    pub tenant: String,
    pub object_type: String,
    pub mode: SyncMode,
    pub interval: Duration,
    pub next_run: DateTime<Utc>,
}

impl ScheduledSync {
    pub fn new(tenant: impl Into<String>, object_type: impl Into<String>, interval: Duration) -> Self {
        Self {
            tenant: tenant.into(),
            object_type: object_type.into(),
            mode: SyncMode::Incremental,
            interval,
            next_run: Utc::now(),
        }
    }

    pub fn with_mode(mut self, mode: SyncMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_run <= now
    }

    pub fn advance(&mut self, now: DateTime<Utc>) {
        self.next_run = now + self.interval;
    }
}
