//! Decision file enforcer
//!
//! Publishes the full decision set as a JSON file that a platform agent
//! watches. The file is replaced atomically (write to a sibling temp file,
//! then rename) so the agent never reads a partial set.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shield_host_api::Enforcer;
use shield_util::{AppToken, CategoryToken, Clock};
use std::collections::BTreeSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// Decision file name inside the data directory
pub const DECISION_FILENAME: &str = "decision.json";

/// Contents of the decision file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionFile {
    pub updated_at: DateTime<Utc>,
    pub locked_applications: BTreeSet<AppToken>,
    pub locked_categories: BTreeSet<CategoryToken>,
}

impl DecisionFile {
    pub fn read(path: &Path) -> std::io::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        serde_json::from_str(&contents).map_err(std::io::Error::other)
    }
}

/// Enforcer that writes each decision to a file
pub struct FileEnforcer {
    path: PathBuf,
    clock: Arc<dyn Clock>,
}

impl FileEnforcer {
    pub fn new(path: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> Self {
        Self {
            path: path.into(),
            clock,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write(&self, file: &DecisionFile) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_vec_pretty(file).map_err(std::io::Error::other)?;
        let tmp_path = self.path.with_extension("json.tmp");
        {
            let mut tmp = std::fs::File::create(&tmp_path)?;
            tmp.write_all(&json)?;
            tmp.sync_all()?;
        }
        std::fs::rename(&tmp_path, &self.path)
    }
}

impl Enforcer for FileEnforcer {
    fn apply(
        &self,
        locked_applications: &BTreeSet<AppToken>,
        locked_categories: &BTreeSet<CategoryToken>,
    ) {
        let file = DecisionFile {
            updated_at: self.clock.now(),
            locked_applications: locked_applications.clone(),
            locked_categories: locked_categories.clone(),
        };

        match self.write(&file) {
            Ok(()) => debug!(
                path = %self.path.display(),
                locked_applications = locked_applications.len(),
                locked_categories = locked_categories.len(),
                "Decision file written"
            ),
            Err(e) => warn!(
                path = %self.path.display(),
                error = %e,
                "Failed to write decision file"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shield_util::ManualClock;
    use tempfile::tempdir;

    #[test]
    fn writes_full_set_each_time() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("agent").join(DECISION_FILENAME);
        let clock = Arc::new(ManualClock::fixed());
        let enforcer = FileEnforcer::new(&path, clock.clone());

        let a = AppToken::from_bytes(vec![1]);
        let b = AppToken::from_bytes(vec![2]);
        let social = CategoryToken::from_bytes(vec![9]);

        enforcer.apply(
            &[a.clone(), b.clone()].into_iter().collect(),
            &[social.clone()].into_iter().collect(),
        );
        let file = DecisionFile::read(&path).unwrap();
        assert_eq!(file.locked_applications.len(), 2);
        assert!(file.locked_categories.contains(&social));
        assert_eq!(file.updated_at, clock.now());

        enforcer.apply(&[b.clone()].into_iter().collect(), &BTreeSet::new());
        let file = DecisionFile::read(&path).unwrap();
        assert_eq!(file.locked_applications, [b].into_iter().collect());
        assert!(file.locked_categories.is_empty());
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn unwritable_path_does_not_panic() {
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"file").unwrap();

        let enforcer = FileEnforcer::new(
            blocker.join(DECISION_FILENAME),
            Arc::new(ManualClock::fixed()),
        );
        enforcer.apply(&BTreeSet::new(), &BTreeSet::new());
        assert!(!blocker.join(DECISION_FILENAME).exists());
    }
}
