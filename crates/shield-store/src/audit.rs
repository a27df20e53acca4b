//! Audit event types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shield_util::{AppToken, CategoryToken, SessionId};

/// Types of audit events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditEventType {
    /// Service started
    ServiceStarted,

    /// Service stopped
    ServiceStopped,

    /// Application added to (or replaced in) the restricted set
    RestrictionAdded {
        token: AppToken,
        name: String,
        replaced: bool,
    },

    /// Application removed from the restricted set
    RestrictionRemoved { token: AppToken },

    /// Category added to the restricted set
    CategoryRestricted { category: CategoryToken, label: String },

    /// Category removed from the restricted set
    CategoryUnrestricted { category: CategoryToken },

    /// Temporary access granted
    AccessGranted {
        session_id: SessionId,
        token: AppToken,
        duration_minutes: u32,
        expiry: DateTime<Utc>,
        superseded: Vec<SessionId>,
    },

    /// Access requested for an application that is not restricted
    GrantIgnored { token: AppToken },

    /// Grant revoked before expiry
    Reshielded {
        token: AppToken,
        sessions: Vec<SessionId>,
    },

    /// Expired or duplicate sessions removed during reconciliation
    SessionsPurged { count: usize },

    /// Restricted set merged from the remote mirror
    MirrorSynced { added: usize, removed: usize },

    /// Passcode configured or changed
    PasscodeSet,

    /// Passcode removed
    PasscodeReset,

    /// Too many failed passcode attempts
    LockoutStarted { until: DateTime<Utc> },
}

/// Full audit event with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Unique event ID
    pub id: i64,

    /// Event timestamp
    pub timestamp: DateTime<Utc>,

    /// Event type and details
    pub event: AuditEventType,
}

impl AuditEvent {
    pub fn new(event: AuditEventType) -> Self {
        Self::at(event, shield_util::now())
    }

    /// Event stamped with a caller-supplied time
    pub fn at(event: AuditEventType, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: 0, // Will be set by store
            timestamp,
            event,
        }
    }
}
