//! CRM Synchroniser (C7): bi-directional synchronisation between the
//! conversation core's local record state and an opaque external CRM.
//!
//! # Overview
//!
//! The [`engine::CrmSynchroniser`] maps local records to remote objects
//! through a declarative [`types::ObjectTypeMapping`], runs full or
//! incremental sync passes per (tenant, object-type), detects conflicts by
//! comparing modification timestamps against the last successful sync, and
//! resolves them per a configurable [`types::ConflictResolutionStrategy`].
//! Record-level failures that exceed their retry budget land in a bounded,
//! TTL'd dead-letter queue; conflicts under the `manual` strategy land in a
//! separate conflict queue for external review.
//!
//! # Sync modes
//!
//! | Mode          | Behaviour                                               |
//! |---------------|----------------------------------------------------------|
//! | `Full`        | Enumerate every local and remote record of the type      |
//! | `Incremental` | Restrict both enumerations to records modified since the last successful sync |
//! | Real-time     | Driven externally: each change event triggers a debounced incremental pass |

pub mod client;
pub mod engine;
pub mod error;
pub mod schedule;
pub mod transform;
pub mod types;

pub use client::{ClientHealth, CrmClient, LocalRecordStore};
pub use engine::CrmSynchroniser;
pub use error::{CrmError, Result};
pub use types::{
    ConflictQueueEntry, ConflictResolutionStrategy, CrmHealthSnapshot, DeadLetterEntry,
    FieldMapping, LocalRecord, ObjectTypeMapping, RemoteRecord, SyncDirection, SyncMode,
    SyncRecord, SyncRunReport, SyncStats, SyncStatus,
};
