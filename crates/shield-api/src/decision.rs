//! Restriction decision set

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shield_util::{AppToken, CategoryToken};
use std::collections::BTreeSet;

/// The applications and categories to block at one instant.
///
/// Derived, never persisted, never patched: always rebuilt from the restricted
/// set and the active-session set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionSet {
    pub computed_at: DateTime<Utc>,
    pub locked_applications: BTreeSet<AppToken>,
    pub locked_categories: BTreeSet<CategoryToken>,
}

impl DecisionSet {
    /// `Locked(app) = app ∈ restricted ∧ app ∉ unlocked`
    pub fn compute<'a>(
        restricted: impl IntoIterator<Item = &'a AppToken>,
        unlocked: &BTreeSet<AppToken>,
        categories: impl IntoIterator<Item = &'a CategoryToken>,
        computed_at: DateTime<Utc>,
    ) -> Self {
        let locked_applications = restricted
            .into_iter()
            .filter(|token| !unlocked.contains(*token))
            .cloned()
            .collect();

        Self {
            computed_at,
            locked_applications,
            locked_categories: categories.into_iter().cloned().collect(),
        }
    }

    pub fn is_locked(&self, token: &AppToken) -> bool {
        self.locked_applications.contains(token)
    }

    /// Same enforcement content, ignoring when it was computed
    pub fn same_enforcement(&self, other: &DecisionSet) -> bool {
        self.locked_applications == other.locked_applications
            && self.locked_categories == other.locked_categories
    }
}
