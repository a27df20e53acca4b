//! Status views for display

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shield_util::{AppToken, SessionId};
use std::time::Duration;

use crate::{ApplicationProfile, CategoryRestriction, DecisionSet, UnlockSession};

/// An active grant as seen at a particular instant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionView {
    pub session_id: SessionId,
    pub application_token: AppToken,
    pub application_name: String,
    pub expiry_date: DateTime<Utc>,
    pub time_remaining: Duration,
}

impl SessionView {
    pub fn new(session: &UnlockSession, now: DateTime<Utc>) -> Self {
        Self {
            session_id: session.id,
            application_token: session.application_token.clone(),
            application_name: session.application_name.clone(),
            expiry_date: session.expiry_date,
            time_remaining: session.remaining_time(now),
        }
    }
}

/// One restricted application and its current enforcement state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestrictionView {
    pub profile: ApplicationProfile,
    pub locked: bool,
    pub session: Option<SessionView>,
}

/// Snapshot of everything the engine knows at one instant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShieldStatus {
    pub restrictions: Vec<RestrictionView>,
    pub categories: Vec<CategoryRestriction>,
    /// Grants whose token is no longer restricted
    pub orphan_sessions: Vec<SessionView>,
    pub decision: DecisionSet,
}
