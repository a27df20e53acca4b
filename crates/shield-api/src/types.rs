//! Persisted record types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shield_util::{AppToken, CategoryToken, ProfileId, SessionId, minutes, saturating_until};
use std::time::Duration;

/// An application the guardian has placed in the restricted set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationProfile {
    pub id: ProfileId,
    pub application_token: AppToken,
    pub application_name: String,
}

impl ApplicationProfile {
    pub fn new(application_token: AppToken, application_name: impl Into<String>) -> Self {
        Self {
            id: ProfileId::new(),
            application_token,
            application_name: application_name.into(),
        }
    }
}

/// A restricted application category
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryRestriction {
    pub category_token: CategoryToken,
    pub label: String,
}

impl CategoryRestriction {
    pub fn new(category_token: CategoryToken, label: impl Into<String>) -> Self {
        Self {
            category_token,
            label: label.into(),
        }
    }
}

/// A temporary-access grant for one application.
///
/// There is no stored "expired" flag: expiry is always computed against a
/// caller-supplied `now`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnlockSession {
    pub id: SessionId,
    pub application_token: AppToken,
    /// Denormalized label for display without a join
    pub application_name: String,
    pub unlock_date: DateTime<Utc>,
    pub duration_minutes: u32,
    pub expiry_date: DateTime<Utc>,
}

impl UnlockSession {
    pub fn new(
        application_token: AppToken,
        application_name: impl Into<String>,
        unlock_date: DateTime<Utc>,
        duration_minutes: u32,
    ) -> Self {
        Self {
            id: SessionId::new(),
            application_token,
            application_name: application_name.into(),
            unlock_date,
            duration_minutes,
            expiry_date: unlock_date + minutes(duration_minutes),
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expiry_date
    }

    pub fn remaining_time(&self, now: DateTime<Utc>) -> Duration {
        saturating_until(self.expiry_date, now)
    }
}

/// Passcode configuration and failed-attempt accounting
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PasscodeState {
    pub is_enabled: bool,
    /// Hex-encoded one-way digest; the raw passcode is never stored
    pub hashed_passcode: String,
    /// Hex-encoded salt used for the digest
    pub salt: String,
    pub failed_attempts: u32,
    pub lockout_until: Option<DateTime<Utc>>,
}

impl PasscodeState {
    /// Lockout is in force at `now`
    pub fn is_locked_out(&self, now: DateTime<Utc>) -> bool {
        self.lockout_until.is_some_and(|until| now < until)
    }
}
