use thiserror::Error;

/// Errors surfaced by the CRM synchroniser.
#[derive(Debug, Error)]
pub enum CrmError {
    #[error("no field mapping registered for object type: {0}")]
    NotMapped(String),

    #[error("sync already in progress for tenant {tenant} object type {object_type}")]
    SyncInProgress { tenant: String, object_type: String },

    #[error("unknown transform: {0}")]
    UnknownTransform(String),

    #[error("required field missing for mapping: {0}")]
    RequiredFieldMissing(String),

    #[error("record requires manual conflict resolution: {object_type} {local_id}")]
    ManualResolutionRequired { object_type: String, local_id: String },

    #[error("remote client error: {0}")]
    Client(String),

    #[error("local store error: {0}")]
    LocalStore(String),
}

pub type Result<T> = std::result::Result<T, CrmError>;
