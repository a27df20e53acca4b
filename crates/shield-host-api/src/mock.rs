//! Mock host implementations for testing

use async_trait::async_trait;
use shield_api::RemoteRecord;
use shield_util::{AppToken, CategoryToken, DeviceId};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::{Enforcer, MirrorError, MirrorResult, RemoteMirror};

/// One call to [`Enforcer::apply`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedDecision {
    pub locked_applications: BTreeSet<AppToken>,
    pub locked_categories: BTreeSet<CategoryToken>,
}

/// Enforcer that records every decision it is handed
#[derive(Debug, Default)]
pub struct MockEnforcer {
    applied: Mutex<Vec<AppliedDecision>>,
}

impl MockEnforcer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of times `apply` was called
    pub fn apply_count(&self) -> usize {
        self.applied.lock().unwrap().len()
    }

    /// Most recent decision, if any
    pub fn last(&self) -> Option<AppliedDecision> {
        self.applied.lock().unwrap().last().cloned()
    }

    /// Whether the most recent decision locks `token`
    pub fn is_locked(&self, token: &AppToken) -> bool {
        self.last()
            .is_some_and(|d| d.locked_applications.contains(token))
    }

    pub fn history(&self) -> Vec<AppliedDecision> {
        self.applied.lock().unwrap().clone()
    }
}

impl Enforcer for MockEnforcer {
    fn apply(
        &self,
        locked_applications: &BTreeSet<AppToken>,
        locked_categories: &BTreeSet<CategoryToken>,
    ) {
        self.applied.lock().unwrap().push(AppliedDecision {
            locked_applications: locked_applications.clone(),
            locked_categories: locked_categories.clone(),
        });
    }
}

/// In-memory remote mirror for unit/integration testing
#[derive(Default)]
pub struct MockMirror {
    rows: Mutex<HashMap<(DeviceId, AppToken), RemoteRecord>>,

    /// Configure every call to fail with a network error
    pub fail_requests: Arc<Mutex<bool>>,

    /// Delay applied to `fetch` (simulates a slow network)
    pub fetch_delay: Arc<Mutex<Option<Duration>>>,
}

impl MockMirror {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a row directly, bypassing the trait
    pub fn insert_row(&self, record: RemoteRecord) {
        let key = (
            record.child_device_id.clone(),
            record.application_token.clone(),
        );
        self.rows.lock().unwrap().insert(key, record);
    }

    /// Remove a row directly, bypassing the trait
    pub fn remove_row(&self, device: &DeviceId, token: &AppToken) {
        self.rows
            .lock()
            .unwrap()
            .remove(&(device.clone(), token.clone()));
    }

    pub fn row(&self, device: &DeviceId, token: &AppToken) -> Option<RemoteRecord> {
        self.rows
            .lock()
            .unwrap()
            .get(&(device.clone(), token.clone()))
            .cloned()
    }

    pub fn row_count(&self) -> usize {
        self.rows.lock().unwrap().len()
    }

    pub fn set_failing(&self, failing: bool) {
        *self.fail_requests.lock().unwrap() = failing;
    }

    pub fn set_fetch_delay(&self, delay: Option<Duration>) {
        *self.fetch_delay.lock().unwrap() = delay;
    }

    fn check_failure(&self) -> MirrorResult<()> {
        if *self.fail_requests.lock().unwrap() {
            return Err(MirrorError::Network("Mock network failure".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteMirror for MockMirror {
    async fn fetch(&self, device: &DeviceId) -> MirrorResult<Vec<RemoteRecord>> {
        let delay = *self.fetch_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.check_failure()?;

        Ok(self
            .rows
            .lock()
            .unwrap()
            .values()
            .filter(|r| &r.child_device_id == device)
            .cloned()
            .collect())
    }

    async fn upsert(&self, record: &RemoteRecord) -> MirrorResult<()> {
        self.check_failure()?;
        self.insert_row(record.clone());
        Ok(())
    }

    async fn delete(&self, device: &DeviceId, token: &AppToken) -> MirrorResult<()> {
        self.check_failure()?;
        self.remove_row(device, token);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shield_api::{ApplicationProfile, MirrorDelta};

    fn record(device: &DeviceId, b: u8) -> RemoteRecord {
        let profile = ApplicationProfile::new(AppToken::from_bytes(vec![b]), format!("App {b}"));
        RemoteRecord::shielded(device, &profile)
    }

    #[test]
    fn mock_enforcer_records_calls() {
        let enforcer = MockEnforcer::new();
        let token = AppToken::from_bytes(vec![1]);
        let locked: BTreeSet<_> = [token.clone()].into_iter().collect();

        enforcer.apply(&locked, &BTreeSet::new());
        assert_eq!(enforcer.apply_count(), 1);
        assert!(enforcer.is_locked(&token));

        enforcer.apply(&BTreeSet::new(), &BTreeSet::new());
        assert_eq!(enforcer.apply_count(), 2);
        assert!(!enforcer.is_locked(&token));
    }

    #[tokio::test]
    async fn mock_mirror_fetch_is_per_device() {
        let mirror = MockMirror::new();
        let child = DeviceId::new("child");
        let sibling = DeviceId::new("sibling");

        mirror.upsert(&record(&child, 1)).await.unwrap();
        mirror.upsert(&record(&child, 2)).await.unwrap();
        mirror.upsert(&record(&sibling, 1)).await.unwrap();

        assert_eq!(mirror.fetch(&child).await.unwrap().len(), 2);
        assert_eq!(mirror.fetch(&sibling).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn mock_mirror_push_delete() {
        let mirror = MockMirror::new();
        let child = DeviceId::new("child");
        let row = record(&child, 1);
        mirror.push(&MirrorDelta::Upsert(row.clone())).await.unwrap();
        assert_eq!(mirror.row_count(), 1);

        mirror
            .push(&MirrorDelta::Delete {
                child_device_id: child.clone(),
                application_token: row.application_token.clone(),
            })
            .await
            .unwrap();
        assert_eq!(mirror.row_count(), 0);
    }

    #[tokio::test]
    async fn mock_mirror_failure() {
        let mirror = MockMirror::new();
        mirror.set_failing(true);

        let result = mirror.fetch(&DeviceId::new("child")).await;
        assert!(matches!(result, Err(MirrorError::Network(_))));
    }
}
