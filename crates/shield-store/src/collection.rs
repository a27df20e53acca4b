//! Typed whole-collection access on top of [`Store`]

use serde::Serialize;
use serde::de::DeserializeOwned;
use shield_api::{ApplicationProfile, CategoryRestriction, PasscodeState, UnlockSession};
use shield_util::{AppToken, CategoryToken, SessionId};
use std::collections::BTreeMap;
use tracing::{debug, warn};

use crate::{Store, StoreResult};

/// Key under which passcode state is stored
pub const PASSCODE_KEY: &str = "passcode";

/// A record type stored as one collection
pub trait Record: Serialize + DeserializeOwned + Clone {
    type Key: Ord + Clone;

    /// Stable key of the collection in the store
    const COLLECTION: &'static str;

    fn key(&self) -> Self::Key;
}

impl Record for ApplicationProfile {
    type Key = AppToken;
    const COLLECTION: &'static str = "restricted_apps";

    fn key(&self) -> AppToken {
        self.application_token.clone()
    }
}

impl Record for CategoryRestriction {
    type Key = CategoryToken;
    const COLLECTION: &'static str = "restricted_categories";

    fn key(&self) -> CategoryToken {
        self.category_token.clone()
    }
}

impl Record for UnlockSession {
    type Key = SessionId;
    const COLLECTION: &'static str = "unlock_sessions";

    fn key(&self) -> SessionId {
        self.id
    }
}

/// Collection-level operations available on every store
pub trait StoreExt: Store {
    /// Load a whole collection, keyed by each record's key.
    ///
    /// A stored value that fails to decode yields an empty collection.
    fn load_collection<R: Record>(&self) -> StoreResult<BTreeMap<R::Key, R>> {
        let Some(blob) = self.read_blob(R::COLLECTION)? else {
            return Ok(BTreeMap::new());
        };

        match serde_json::from_slice::<Vec<R>>(&blob) {
            Ok(records) => Ok(records.into_iter().map(|r| (r.key(), r)).collect()),
            Err(e) => {
                warn!(
                    collection = R::COLLECTION,
                    error = %e,
                    "Stored collection failed to decode, treating as empty"
                );
                Ok(BTreeMap::new())
            }
        }
    }

    /// Replace a whole collection
    fn save_collection<R: Record>(&self, records: &BTreeMap<R::Key, R>) -> StoreResult<()> {
        let values: Vec<&R> = records.values().collect();
        let blob = serde_json::to_string(&values)?;
        self.write_blob(R::COLLECTION, &blob)?;
        debug!(collection = R::COLLECTION, count = values.len(), "Collection saved");
        Ok(())
    }

    fn get_record<R: Record>(&self, key: &R::Key) -> StoreResult<Option<R>> {
        Ok(self.load_collection::<R>()?.remove(key))
    }

    /// Insert or overwrite by key; returns the record that was replaced
    fn put_record<R: Record>(&self, record: R) -> StoreResult<Option<R>> {
        let mut records = self.load_collection::<R>()?;
        let previous = records.insert(record.key(), record);
        self.save_collection(&records)?;
        Ok(previous)
    }

    fn remove_record<R: Record>(&self, key: &R::Key) -> StoreResult<Option<R>> {
        let mut records = self.load_collection::<R>()?;
        let removed = records.remove(key);
        if removed.is_some() {
            self.save_collection(&records)?;
        }
        Ok(removed)
    }

    /// Load a single value; an undecodable value reads as absent
    fn load_value<T: DeserializeOwned>(&self, key: &str) -> StoreResult<Option<T>> {
        let Some(blob) = self.read_blob(key)? else {
            return Ok(None);
        };

        match serde_json::from_slice(&blob) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                warn!(key, error = %e, "Stored value failed to decode, treating as absent");
                Ok(None)
            }
        }
    }

    fn save_value<T: Serialize>(&self, key: &str, value: &T) -> StoreResult<()> {
        let blob = serde_json::to_string(value)?;
        self.write_blob(key, &blob)
    }

    fn load_passcode(&self) -> StoreResult<Option<PasscodeState>> {
        self.load_value(PASSCODE_KEY)
    }

    fn save_passcode(&self, state: &PasscodeState) -> StoreResult<()> {
        self.save_value(PASSCODE_KEY, state)
    }

    fn clear_passcode(&self) -> StoreResult<()> {
        self.delete_blob(PASSCODE_KEY)
    }
}

impl<S: Store + ?Sized> StoreExt for S {}
