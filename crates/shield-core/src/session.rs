//! Unlock session lifecycle
//!
//! Sessions live in the store, never in memory between calls. Every operation
//! loads the collection, changes it and writes it back in one blob write. The
//! associated functions on [`SessionManager`] work on an already-loaded map so
//! the engine can batch a session change with other collection changes.

use chrono::{DateTime, Utc};
use shield_api::UnlockSession;
use shield_store::{Store, StoreExt, StoreResult};
use shield_util::{AppToken, Clock, SessionId};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

pub type SessionMap = BTreeMap<SessionId, UnlockSession>;

/// Result of starting a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStart {
    pub session: UnlockSession,
    /// Sessions for the same token that the new one replaced
    pub superseded: Vec<UnlockSession>,
}

/// Creates, queries, expires and purges unlock sessions
///
/// Writes here neither take the engine's lock nor re-issue a decision set.
/// Code running alongside a [`ShieldEngine`](crate::ShieldEngine) changes
/// sessions through the engine instead.
#[derive(Clone)]
pub struct SessionManager {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
}

impl SessionManager {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Start a grant for `token`, superseding any existing grant for it
    pub fn start_session(
        &self,
        token: &AppToken,
        application_name: &str,
        duration_minutes: u32,
    ) -> StoreResult<SessionStart> {
        let mut sessions = self.all_sessions()?;
        let session = UnlockSession::new(
            token.clone(),
            application_name,
            self.clock.now(),
            duration_minutes,
        );

        let superseded = Self::insert_superseding(&mut sessions, session.clone());
        self.store.save_collection(&sessions)?;

        info!(
            session_id = %session.id,
            token = %token,
            duration_minutes,
            expiry = %session.expiry_date,
            superseded = superseded.len(),
            "Unlock session started"
        );

        Ok(SessionStart {
            session,
            superseded,
        })
    }

    /// Sessions that are not expired right now
    pub fn active_sessions(&self) -> StoreResult<SessionMap> {
        let sessions = self.all_sessions()?;
        Ok(Self::active_in(&sessions, self.clock.now()))
    }

    /// Every stored session, expired or not
    pub fn all_sessions(&self) -> StoreResult<SessionMap> {
        self.store.load_collection::<UnlockSession>()
    }

    /// Remove one session regardless of its expiry
    pub fn end_session(&self, id: &SessionId) -> StoreResult<Option<UnlockSession>> {
        let ended = self.store.remove_record::<UnlockSession>(id)?;
        if let Some(session) = &ended {
            info!(session_id = %session.id, token = %session.application_token, "Unlock session ended");
        }
        Ok(ended)
    }

    /// Remove every session for `token`
    pub fn end_sessions_for(&self, token: &AppToken) -> StoreResult<Vec<UnlockSession>> {
        let mut sessions = self.all_sessions()?;
        let ended = Self::remove_for_token(&mut sessions, token);
        if !ended.is_empty() {
            self.store.save_collection(&sessions)?;
            info!(token = %token, count = ended.len(), "Unlock sessions ended");
        }
        Ok(ended)
    }

    /// Remove every session expired as of now. Idempotent.
    pub fn purge_expired(&self) -> StoreResult<Vec<UnlockSession>> {
        let mut sessions = self.all_sessions()?;
        let purged = Self::remove_expired(&mut sessions, self.clock.now());
        if !purged.is_empty() {
            self.store.save_collection(&sessions)?;
            info!(count = purged.len(), "Expired unlock sessions purged");
        }
        Ok(purged)
    }

    /// Keep only the latest-expiring active session per token
    pub fn collapse_duplicates(&self) -> StoreResult<Vec<UnlockSession>> {
        let mut sessions = self.all_sessions()?;
        let dropped = Self::remove_duplicates(&mut sessions, self.clock.now());
        if !dropped.is_empty() {
            self.store.save_collection(&sessions)?;
            info!(count = dropped.len(), "Duplicate unlock sessions collapsed");
        }
        Ok(dropped)
    }

    /// Insert `session` after removing every other session for its token
    pub fn insert_superseding(
        sessions: &mut SessionMap,
        session: UnlockSession,
    ) -> Vec<UnlockSession> {
        let superseded = Self::remove_for_token(sessions, &session.application_token);
        for old in &superseded {
            debug!(session_id = %old.id, replaced_by = %session.id, "Session superseded");
        }
        sessions.insert(session.id, session);
        superseded
    }

    pub fn active_in(sessions: &SessionMap, now: DateTime<Utc>) -> SessionMap {
        sessions
            .iter()
            .filter(|(_, s)| !s.is_expired(now))
            .map(|(id, s)| (*id, s.clone()))
            .collect()
    }

    pub fn remove_for_token(sessions: &mut SessionMap, token: &AppToken) -> Vec<UnlockSession> {
        Self::extract(sessions, |s| &s.application_token == token)
    }

    pub fn remove_expired(sessions: &mut SessionMap, now: DateTime<Utc>) -> Vec<UnlockSession> {
        Self::extract(sessions, |s| s.is_expired(now))
    }

    /// Among active sessions sharing a token, drop all but the latest expiry
    pub fn remove_duplicates(sessions: &mut SessionMap, now: DateTime<Utc>) -> Vec<UnlockSession> {
        let mut keep: BTreeMap<AppToken, (DateTime<Utc>, SessionId)> = BTreeMap::new();
        for session in sessions.values().filter(|s| !s.is_expired(now)) {
            let candidate = (session.expiry_date, session.id);
            keep.entry(session.application_token.clone())
                .and_modify(|best| {
                    if candidate > *best {
                        *best = candidate;
                    }
                })
                .or_insert(candidate);
        }

        Self::extract(sessions, |s| {
            !s.is_expired(now)
                && keep
                    .get(&s.application_token)
                    .is_some_and(|(_, id)| *id != s.id)
        })
    }

    fn extract(
        sessions: &mut SessionMap,
        mut predicate: impl FnMut(&UnlockSession) -> bool,
    ) -> Vec<UnlockSession> {
        let ids: Vec<SessionId> = sessions
            .values()
            .filter(|s| predicate(s))
            .map(|s| s.id)
            .collect();

        ids.iter().filter_map(|id| sessions.remove(id)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use shield_store::SqliteStore;
    use shield_util::ManualClock;

    fn token(b: u8) -> AppToken {
        AppToken::from_bytes(vec![b])
    }

    fn setup() -> (SessionManager, Arc<ManualClock>) {
        let store: Arc<dyn Store> = Arc::new(SqliteStore::in_memory().unwrap());
        let clock = Arc::new(ManualClock::fixed());
        (SessionManager::new(store, clock.clone()), clock)
    }

    #[test]
    fn start_and_list() {
        let (manager, _clock) = setup();
        let started = manager.start_session(&token(1), "Game", 10).unwrap();

        assert!(started.superseded.is_empty());
        let active = manager.active_sessions().unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[&started.session.id].application_name, "Game");
    }

    #[test]
    fn new_grant_supersedes_old() {
        let (manager, clock) = setup();
        let first = manager.start_session(&token(1), "Game", 10).unwrap();
        clock.advance(chrono::Duration::minutes(2));
        let second = manager.start_session(&token(1), "Game", 30).unwrap();

        assert_eq!(second.superseded, vec![first.session.clone()]);
        let all = manager.all_sessions().unwrap();
        assert_eq!(all.len(), 1);
        assert!(all.contains_key(&second.session.id));
    }

    #[test]
    fn expiry_is_pure_function_of_clock() {
        let (manager, clock) = setup();
        manager.start_session(&token(1), "Game", 5).unwrap();

        clock.advance(chrono::Duration::minutes(4) + chrono::Duration::seconds(59));
        assert_eq!(manager.active_sessions().unwrap().len(), 1);

        clock.advance(chrono::Duration::seconds(1));
        assert!(manager.active_sessions().unwrap().is_empty());
        // Still stored until purged
        assert_eq!(manager.all_sessions().unwrap().len(), 1);

        // Rewinding the clock makes it active again; nothing was cached
        clock.rewind(chrono::Duration::seconds(30));
        assert_eq!(manager.active_sessions().unwrap().len(), 1);
    }

    #[test]
    fn purge_is_idempotent() {
        let (manager, clock) = setup();
        manager.start_session(&token(1), "A", 5).unwrap();
        manager.start_session(&token(2), "B", 60).unwrap();

        clock.advance(chrono::Duration::minutes(10));
        let purged = manager.purge_expired().unwrap();
        assert_eq!(purged.len(), 1);
        assert_eq!(purged[0].application_token, token(1));

        assert!(manager.purge_expired().unwrap().is_empty());
        assert_eq!(manager.all_sessions().unwrap().len(), 1);
    }

    #[test]
    fn end_session_and_end_for_token() {
        let (manager, _clock) = setup();
        let a = manager.start_session(&token(1), "A", 5).unwrap();
        manager.start_session(&token(2), "B", 5).unwrap();

        assert!(manager.end_session(&a.session.id).unwrap().is_some());
        assert!(manager.end_session(&a.session.id).unwrap().is_none());

        let ended = manager.end_sessions_for(&token(2)).unwrap();
        assert_eq!(ended.len(), 1);
        assert!(manager.all_sessions().unwrap().is_empty());
    }

    #[test]
    fn collapse_keeps_latest_expiry() {
        let (manager, clock) = setup();
        let now = clock.now();
        let mut sessions = SessionMap::new();
        let short = UnlockSession::new(token(1), "A", now, 5);
        let long = UnlockSession::new(token(1), "A", now, 50);
        let other = UnlockSession::new(token(2), "B", now, 5);
        for s in [&short, &long, &other] {
            sessions.insert(s.id, s.clone());
        }
        manager.store.save_collection(&sessions).unwrap();

        let dropped = manager.collapse_duplicates().unwrap();
        assert_eq!(dropped, vec![short]);

        let remaining = manager.all_sessions().unwrap();
        assert!(remaining.contains_key(&long.id));
        assert!(remaining.contains_key(&other.id));
    }

    #[derive(Debug, Clone)]
    enum Op {
        Start(u8, u32),
        Advance(i64),
        Purge,
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0u8..4, 1u32..30).prop_map(|(t, m)| Op::Start(t, m)),
            (1i64..600).prop_map(Op::Advance),
            Just(Op::Purge),
        ]
    }

    proptest! {
        #[test]
        fn prop_at_most_one_active_session_per_token(ops in prop::collection::vec(op(), 1..40)) {
            let (manager, clock) = setup();

            for op in ops {
                match op {
                    Op::Start(t, m) => { manager.start_session(&token(t), "App", m).unwrap(); }
                    Op::Advance(secs) => clock.advance(chrono::Duration::seconds(secs)),
                    Op::Purge => { manager.purge_expired().unwrap(); }
                }

                let active = manager.active_sessions().unwrap();
                let mut seen = std::collections::BTreeSet::new();
                for session in active.values() {
                    prop_assert!(seen.insert(session.application_token.clone()));
                }
            }
        }
    }
}
