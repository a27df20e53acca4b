//! Host interface traits

use async_trait::async_trait;
use shield_api::{MirrorDelta, RemoteRecord};
use shield_util::{AppToken, CategoryToken, DeviceId, ShieldError};
use std::collections::BTreeSet;
use thiserror::Error;

/// Errors from remote mirror operations
#[derive(Debug, Error)]
pub enum MirrorError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Remote rejected request: status {status}: {message}")]
    Remote { status: u16, message: String },

    #[error("Failed to decode remote response: {0}")]
    Decode(String),

    #[error("Remote mirror timed out")]
    Timeout,

    #[error("Remote mirror not configured")]
    NotConfigured,
}

impl From<MirrorError> for ShieldError {
    fn from(e: MirrorError) -> Self {
        ShieldError::sync(e.to_string())
    }
}

pub type MirrorResult<T> = Result<T, MirrorError>;

/// OS enforcement primitive.
///
/// Replaces the platform's enforcement configuration wholesale on every call.
/// There is no incremental form; callers always pass the full sets.
pub trait Enforcer: Send + Sync {
    fn apply(
        &self,
        locked_applications: &BTreeSet<AppToken>,
        locked_categories: &BTreeSet<CategoryToken>,
    );
}

/// Remote record set keyed by `(child_device_id, application_token)`
#[async_trait]
pub trait RemoteMirror: Send + Sync {
    /// All rows for the given device
    async fn fetch(&self, device: &DeviceId) -> MirrorResult<Vec<RemoteRecord>>;

    /// Insert or update one row
    async fn upsert(&self, record: &RemoteRecord) -> MirrorResult<()>;

    /// Delete one row (absent rows are not an error)
    async fn delete(&self, device: &DeviceId, token: &AppToken) -> MirrorResult<()>;

    /// Push a single delta
    async fn push(&self, delta: &MirrorDelta) -> MirrorResult<()> {
        match delta {
            MirrorDelta::Upsert(record) => self.upsert(record).await,
            MirrorDelta::Delete {
                child_device_id,
                application_token,
            } => self.delete(child_device_id, application_token).await,
        }
    }
}
