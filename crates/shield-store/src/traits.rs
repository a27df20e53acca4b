//! Store trait definitions

use crate::{AuditEvent, StoreResult};

/// Main store trait
///
/// Values are addressed by a stable key string and always replaced whole.
/// Implementations must make `write_blob` atomic: a concurrent reader sees
/// either the previous value or the new one, never a mix.
pub trait Store: Send + Sync {
    // Collections

    /// Read the raw bytes stored under `key`
    ///
    /// Bytes are returned undecoded; callers decide what an unreadable
    /// value means.
    fn read_blob(&self, key: &str) -> StoreResult<Option<Vec<u8>>>;

    /// Replace the value stored under `key`
    fn write_blob(&self, key: &str, blob: &str) -> StoreResult<()>;

    /// Remove the value stored under `key`
    fn delete_blob(&self, key: &str) -> StoreResult<()>;

    // Audit log

    /// Append an audit event
    fn append_audit(&self, event: AuditEvent) -> StoreResult<()>;

    /// Get recent audit events, newest first
    fn get_recent_audits(&self, limit: usize) -> StoreResult<Vec<AuditEvent>>;

    // Health

    /// Check if store is healthy
    fn is_healthy(&self) -> bool;
}
