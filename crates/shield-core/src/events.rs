//! Outcomes returned by the engine

use chrono::{DateTime, Utc};
use shield_api::{
    ApplicationProfile, CategoryRestriction, DecisionSet, MirrorDelta, RemoteRecord,
    UnlockSession,
};
use shield_util::{AppToken, CategoryToken, DeviceId, SessionId};

/// Change made by a guardian-facing engine operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShieldEvent {
    RestrictionAdded {
        profile: ApplicationProfile,
        replaced: bool,
    },

    RestrictionRemoved {
        token: AppToken,
        profile: Option<ApplicationProfile>,
        ended_sessions: Vec<SessionId>,
    },

    CategoryRestricted {
        category: CategoryRestriction,
    },

    CategoryUnrestricted {
        category: CategoryToken,
        removed: bool,
    },

    /// Grant revoked before expiry
    Reshielded {
        token: AppToken,
        profile: Option<ApplicationProfile>,
        ended_sessions: Vec<SessionId>,
    },
}

impl ShieldEvent {
    /// Rows to push so the remote mirror reflects this change
    pub fn mirror_deltas(&self, device: &DeviceId, _now: DateTime<Utc>) -> Vec<MirrorDelta> {
        match self {
            ShieldEvent::RestrictionAdded { profile, .. } => {
                vec![MirrorDelta::Upsert(RemoteRecord::shielded(device, profile))]
            }
            ShieldEvent::RestrictionRemoved { token, .. } => vec![MirrorDelta::Delete {
                child_device_id: device.clone(),
                application_token: token.clone(),
            }],
            ShieldEvent::Reshielded {
                profile: Some(profile),
                ..
            } => vec![MirrorDelta::Upsert(RemoteRecord::shielded(device, profile))],
            ShieldEvent::Reshielded { profile: None, .. }
            | ShieldEvent::CategoryRestricted { .. }
            | ShieldEvent::CategoryUnrestricted { .. } => Vec::new(),
        }
    }
}

/// Outcome of a temporary-access request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GrantOutcome {
    Granted {
        session: UnlockSession,
        superseded: Vec<UnlockSession>,
    },

    /// The token is not in the restricted set; nothing was granted
    NotRestricted { token: AppToken },
}

impl GrantOutcome {
    pub fn session(&self) -> Option<&UnlockSession> {
        match self {
            GrantOutcome::Granted { session, .. } => Some(session),
            GrantOutcome::NotRestricted { .. } => None,
        }
    }

    /// The row shows the grant until it lapses, then the restriction again
    pub fn mirror_deltas(&self, device: &DeviceId, now: DateTime<Utc>) -> Vec<MirrorDelta> {
        match self {
            GrantOutcome::Granted { session, .. } if !session.is_expired(now) => {
                vec![MirrorDelta::Upsert(RemoteRecord::unlocked(device, session))]
            }
            GrantOutcome::Granted { session, .. } => {
                let profile = ApplicationProfile::new(
                    session.application_token.clone(),
                    session.application_name.clone(),
                );
                vec![MirrorDelta::Upsert(RemoteRecord::shielded(device, &profile))]
            }
            GrantOutcome::NotRestricted { .. } => Vec::new(),
        }
    }
}

/// Result of one reconciliation pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciliation {
    /// Sessions removed because they had expired
    pub purged: Vec<UnlockSession>,
    /// Active sessions dropped because a later grant for the same token existed
    pub collapsed: Vec<UnlockSession>,
    /// Restrictions whose grant lapsed in this pass and are locked again
    pub relocked: Vec<ApplicationProfile>,
    pub decision: DecisionSet,
}

impl Reconciliation {
    pub fn changed(&self) -> bool {
        !self.purged.is_empty() || !self.collapsed.is_empty()
    }

    pub fn mirror_deltas(&self, device: &DeviceId, _now: DateTime<Utc>) -> Vec<MirrorDelta> {
        self.relocked
            .iter()
            .map(|profile| MirrorDelta::Upsert(RemoteRecord::shielded(device, profile)))
            .collect()
    }
}

/// Result of pulling the restricted set from the remote mirror
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub added: Vec<AppToken>,
    pub removed: Vec<AppToken>,
    pub decision: DecisionSet,
}

impl SyncReport {
    pub fn changed(&self) -> bool {
        !self.added.is_empty() || !self.removed.is_empty()
    }
}

/// Stored state that should not exist if every write had completed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsistencyReport {
    /// Sessions whose token is not in the restricted set
    pub orphan_sessions: Vec<UnlockSession>,
    /// Tokens with more than one active session
    pub duplicate_tokens: Vec<AppToken>,
}

impl ConsistencyReport {
    pub fn is_consistent(&self) -> bool {
        self.orphan_sessions.is_empty() && self.duplicate_tokens.is_empty()
    }
}
