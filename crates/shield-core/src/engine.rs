//! Shield policy engine

use chrono::{DateTime, Utc};
use shield_api::{
    ApplicationProfile, CategoryRestriction, DecisionSet, RemoteRecord, RestrictionView,
    SessionView, ShieldStatus, UnlockSession,
};
use shield_config::ShieldSettings;
use shield_host_api::{Enforcer, MirrorError, RemoteMirror};
use shield_store::{AuditEvent, AuditEventType, Store, StoreExt, StoreResult};
use shield_util::{AppToken, CategoryToken, Clock, DeviceId, SessionId, ShieldResult};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::{
    ConsistencyReport, GrantOutcome, Reconciliation, SessionManager, SessionMap, ShieldEvent,
    SyncReport,
};

/// Everything the decision set is derived from
#[derive(Debug, Clone, Default)]
struct ShieldState {
    restricted: BTreeMap<AppToken, ApplicationProfile>,
    categories: BTreeMap<CategoryToken, CategoryRestriction>,
    sessions: SessionMap,
}

/// Collections changed by an operation
#[derive(Debug, Clone, Copy, Default)]
struct Dirty {
    restricted: bool,
    categories: bool,
    sessions: bool,
}

impl Dirty {
    const ALL: Dirty = Dirty {
        restricted: true,
        categories: true,
        sessions: true,
    };
}

/// The shield policy engine.
///
/// Owns no long-lived copy of the restricted set or the sessions: each
/// operation reads the store, changes what it needs, writes it back and
/// re-issues the full decision set to the enforcer. Mutations are serialized
/// through one in-process lock.
pub struct ShieldEngine {
    store: Arc<dyn Store>,
    enforcer: Arc<dyn Enforcer>,
    clock: Arc<dyn Clock>,
    settings: ShieldSettings,
    write_lock: Mutex<()>,
    /// State whose save failed; written again by the next operation
    unsaved: Mutex<Option<ShieldState>>,
    last_issued: Mutex<Option<DecisionSet>>,
}

impl ShieldEngine {
    pub fn new(
        store: Arc<dyn Store>,
        enforcer: Arc<dyn Enforcer>,
        clock: Arc<dyn Clock>,
        settings: ShieldSettings,
    ) -> Self {
        info!(
            default_unlock_minutes = settings.default_unlock_minutes,
            max_unlock_minutes = settings.max_unlock_minutes,
            "Shield engine initialized"
        );

        Self {
            store,
            enforcer,
            clock,
            settings,
            write_lock: Mutex::new(()),
            unsaved: Mutex::new(None),
            last_issued: Mutex::new(None),
        }
    }

    pub fn settings(&self) -> &ShieldSettings {
        &self.settings
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Add an application to the restricted set, replacing any profile with
    /// the same token
    pub fn add_restriction(&self, profile: ApplicationProfile) -> ShieldResult<ShieldEvent> {
        let _guard = self.write_guard();
        let now = self.clock.now();
        let (mut state, mut dirty) = self.load_state()?;

        let replaced = state
            .restricted
            .insert(profile.application_token.clone(), profile.clone())
            .is_some();
        dirty.restricted = true;
        self.commit(&state, dirty, now)?;

        self.audit(
            AuditEventType::RestrictionAdded {
                token: profile.application_token.clone(),
                name: profile.application_name.clone(),
                replaced,
            },
            now,
        );
        info!(
            token = %profile.application_token,
            name = %profile.application_name,
            replaced,
            "Restriction added"
        );

        Ok(ShieldEvent::RestrictionAdded { profile, replaced })
    }

    /// Remove an application from the restricted set and end its grants
    pub fn remove_restriction(&self, token: &AppToken) -> ShieldResult<ShieldEvent> {
        let _guard = self.write_guard();
        let now = self.clock.now();
        let (mut state, mut dirty) = self.load_state()?;

        let profile = state.restricted.remove(token);
        let ended = SessionManager::remove_for_token(&mut state.sessions, token);
        dirty.restricted |= profile.is_some();
        dirty.sessions |= !ended.is_empty();
        self.commit(&state, dirty, now)?;

        if profile.is_some() {
            self.audit(
                AuditEventType::RestrictionRemoved {
                    token: token.clone(),
                },
                now,
            );
            info!(token = %token, ended_sessions = ended.len(), "Restriction removed");
        } else {
            debug!(token = %token, "Remove requested for unrestricted application");
        }

        Ok(ShieldEvent::RestrictionRemoved {
            token: token.clone(),
            profile,
            ended_sessions: ended.iter().map(|s| s.id).collect(),
        })
    }

    pub fn add_category_restriction(
        &self,
        category: CategoryRestriction,
    ) -> ShieldResult<ShieldEvent> {
        let _guard = self.write_guard();
        let now = self.clock.now();
        let (mut state, mut dirty) = self.load_state()?;

        state
            .categories
            .insert(category.category_token.clone(), category.clone());
        dirty.categories = true;
        self.commit(&state, dirty, now)?;

        self.audit(
            AuditEventType::CategoryRestricted {
                category: category.category_token.clone(),
                label: category.label.clone(),
            },
            now,
        );
        info!(category = %category.category_token, label = %category.label, "Category restricted");

        Ok(ShieldEvent::CategoryRestricted { category })
    }

    pub fn remove_category_restriction(
        &self,
        category: &CategoryToken,
    ) -> ShieldResult<ShieldEvent> {
        let _guard = self.write_guard();
        let now = self.clock.now();
        let (mut state, mut dirty) = self.load_state()?;

        let removed = state.categories.remove(category).is_some();
        dirty.categories |= removed;
        self.commit(&state, dirty, now)?;

        if removed {
            self.audit(
                AuditEventType::CategoryUnrestricted {
                    category: category.clone(),
                },
                now,
            );
            info!(category = %category, "Category unrestricted");
        }

        Ok(ShieldEvent::CategoryUnrestricted {
            category: category.clone(),
            removed,
        })
    }

    /// Grant temporary access to a restricted application.
    ///
    /// The requested length is clamped to `1..=max_unlock_minutes`. A request
    /// for an application outside the restricted set grants nothing.
    pub fn grant_temporary_access(
        &self,
        token: &AppToken,
        duration_minutes: u32,
    ) -> ShieldResult<GrantOutcome> {
        let _guard = self.write_guard();
        let now = self.clock.now();
        let (mut state, mut dirty) = self.load_state()?;

        let Some(profile) = state.restricted.get(token).cloned() else {
            warn!(token = %token, "Temporary access requested for an application that is not restricted");
            self.commit(&state, dirty, now)?;
            self.audit(
                AuditEventType::GrantIgnored {
                    token: token.clone(),
                },
                now,
            );
            return Ok(GrantOutcome::NotRestricted {
                token: token.clone(),
            });
        };

        let minutes = self.settings.clamp_unlock_minutes(duration_minutes);
        if minutes != duration_minutes {
            debug!(requested = duration_minutes, granted = minutes, "Grant length clamped");
        }

        let session = UnlockSession::new(token.clone(), profile.application_name, now, minutes);
        let superseded = SessionManager::insert_superseding(&mut state.sessions, session.clone());
        dirty.sessions = true;
        self.commit(&state, dirty, now)?;

        self.audit(
            AuditEventType::AccessGranted {
                session_id: session.id,
                token: token.clone(),
                duration_minutes: minutes,
                expiry: session.expiry_date,
                superseded: superseded.iter().map(|s| s.id).collect(),
            },
            now,
        );
        info!(
            session_id = %session.id,
            token = %token,
            duration_minutes = minutes,
            expiry = %session.expiry_date,
            superseded = superseded.len(),
            "Temporary access granted"
        );

        Ok(GrantOutcome::Granted {
            session,
            superseded,
        })
    }

    /// Entry point for the OS shield-action callback: grant the default length
    pub fn handle_shield_action(&self, token: &AppToken) -> ShieldResult<GrantOutcome> {
        debug!(token = %token, "Shield action received");
        self.grant_temporary_access(token, self.settings.default_unlock_minutes)
    }

    /// End any grant for `token` before it expires
    pub fn reshield(&self, token: &AppToken) -> ShieldResult<ShieldEvent> {
        let _guard = self.write_guard();
        let now = self.clock.now();
        let (mut state, mut dirty) = self.load_state()?;

        let ended = SessionManager::remove_for_token(&mut state.sessions, token);
        dirty.sessions |= !ended.is_empty();
        self.commit(&state, dirty, now)?;

        let ended_sessions: Vec<_> = ended.iter().map(|s| s.id).collect();
        if !ended_sessions.is_empty() {
            self.audit(
                AuditEventType::Reshielded {
                    token: token.clone(),
                    sessions: ended_sessions.clone(),
                },
                now,
            );
            info!(token = %token, count = ended_sessions.len(), "Application re-shielded");
        }

        Ok(ShieldEvent::Reshielded {
            token: token.clone(),
            profile: state.restricted.get(token).cloned(),
            ended_sessions,
        })
    }

    /// End one grant by id and re-issue
    pub fn end_session(&self, id: &SessionId) -> ShieldResult<Option<UnlockSession>> {
        let _guard = self.write_guard();
        let now = self.clock.now();
        let (mut state, mut dirty) = self.load_state()?;

        let ended = state.sessions.remove(id);
        dirty.sessions |= ended.is_some();
        self.commit(&state, dirty, now)?;

        if let Some(session) = &ended {
            self.audit(
                AuditEventType::Reshielded {
                    token: session.application_token.clone(),
                    sessions: vec![session.id],
                },
                now,
            );
            info!(session_id = %session.id, token = %session.application_token, "Session ended");
        }
        Ok(ended)
    }

    /// Collapse duplicate grants, purge expired ones and re-issue. Idempotent.
    pub fn reconcile(&self) -> ShieldResult<Reconciliation> {
        let _guard = self.write_guard();
        let now = self.clock.now();
        let (mut state, mut dirty) = self.load_state()?;

        let collapsed = SessionManager::remove_duplicates(&mut state.sessions, now);
        let purged = SessionManager::remove_expired(&mut state.sessions, now);

        let still_unlocked: BTreeSet<&AppToken> = state
            .sessions
            .values()
            .map(|s| &s.application_token)
            .collect();
        let relocked: BTreeMap<AppToken, ApplicationProfile> = purged
            .iter()
            .filter(|s| !still_unlocked.contains(&s.application_token))
            .filter_map(|s| state.restricted.get(&s.application_token))
            .map(|p| (p.application_token.clone(), p.clone()))
            .collect();

        dirty.sessions |= !collapsed.is_empty() || !purged.is_empty();
        let decision = self.commit(&state, dirty, now)?;

        let count = collapsed.len() + purged.len();
        if count > 0 {
            self.audit(AuditEventType::SessionsPurged { count }, now);
            info!(
                purged = purged.len(),
                collapsed = collapsed.len(),
                relocked = relocked.len(),
                "Unlock sessions reconciled"
            );
        }

        Ok(Reconciliation {
            purged,
            collapsed,
            relocked: relocked.into_values().collect(),
            decision,
        })
    }

    /// Pull this device's restricted set from the remote mirror.
    ///
    /// The fetch runs without holding the write lock. A failed or timed-out
    /// fetch leaves local state untouched. Tokens restricted locally but
    /// absent remotely are removed, and tokens present remotely but absent
    /// locally are added, in a single write. Local additions are not pushed
    /// back here.
    pub async fn sync_with_remote_mirror(
        &self,
        mirror: &dyn RemoteMirror,
        device: &DeviceId,
        timeout: Duration,
    ) -> ShieldResult<SyncReport> {
        let rows = match tokio::time::timeout(timeout, mirror.fetch(device)).await {
            Ok(Ok(rows)) => rows,
            Ok(Err(e)) => {
                warn!(device = %device, error = %e, "Remote mirror fetch failed, keeping local restrictions");
                return Err(e.into());
            }
            Err(_) => {
                warn!(
                    device = %device,
                    timeout_ms = timeout.as_millis() as u64,
                    "Remote mirror fetch timed out, keeping local restrictions"
                );
                return Err(MirrorError::Timeout.into());
            }
        };

        self.apply_remote_rows(device, rows)
    }

    fn apply_remote_rows(
        &self,
        device: &DeviceId,
        rows: Vec<RemoteRecord>,
    ) -> ShieldResult<SyncReport> {
        let remote: BTreeMap<AppToken, RemoteRecord> = rows
            .into_iter()
            .filter(|row| &row.child_device_id == device)
            .map(|row| (row.application_token.clone(), row))
            .collect();

        let _guard = self.write_guard();
        let now = self.clock.now();
        let (mut state, mut dirty) = self.load_state()?;

        let removed: Vec<AppToken> = state
            .restricted
            .keys()
            .filter(|token| !remote.contains_key(*token))
            .cloned()
            .collect();
        for token in &removed {
            state.restricted.remove(token);
        }

        let mut added = Vec::new();
        for (token, row) in &remote {
            if !state.restricted.contains_key(token) {
                state.restricted.insert(token.clone(), row.to_profile());
                added.push(token.clone());
            }
        }

        dirty.restricted |= !added.is_empty() || !removed.is_empty();
        let decision = self.commit(&state, dirty, now)?;

        if !added.is_empty() || !removed.is_empty() {
            self.audit(
                AuditEventType::MirrorSynced {
                    added: added.len(),
                    removed: removed.len(),
                },
                now,
            );
            info!(
                device = %device,
                added = added.len(),
                removed = removed.len(),
                "Restricted set synced from remote mirror"
            );
        } else {
            debug!(device = %device, rows = remote.len(), "Remote mirror in sync");
        }

        Ok(SyncReport {
            added,
            removed,
            decision,
        })
    }

    /// Compute the current decision set without issuing it
    pub fn decision_set(&self) -> ShieldResult<DecisionSet> {
        let state = self.snapshot()?;
        Ok(Self::compute(&state, self.clock.now()))
    }

    /// The decision most recently handed to the enforcer
    pub fn last_issued(&self) -> Option<DecisionSet> {
        self.last_issued
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Unexpired grants, including any not yet saved
    pub fn active_sessions(&self) -> ShieldResult<SessionMap> {
        let state = self.snapshot()?;
        Ok(SessionManager::active_in(&state.sessions, self.clock.now()))
    }

    /// Every stored grant, expired or not
    pub fn all_sessions(&self) -> ShieldResult<SessionMap> {
        Ok(self.snapshot()?.sessions)
    }

    pub fn restricted_applications(&self) -> ShieldResult<Vec<ApplicationProfile>> {
        Ok(self.snapshot()?.restricted.into_values().collect())
    }

    /// Everything the engine knows, evaluated at the current instant
    pub fn status(&self) -> ShieldResult<ShieldStatus> {
        let state = self.snapshot()?;
        let now = self.clock.now();
        let decision = Self::compute(&state, now);
        let active = SessionManager::active_in(&state.sessions, now);

        let mut latest: BTreeMap<&AppToken, &UnlockSession> = BTreeMap::new();
        for session in active.values() {
            latest
                .entry(&session.application_token)
                .and_modify(|current| {
                    if session.expiry_date > current.expiry_date {
                        *current = session;
                    }
                })
                .or_insert(session);
        }

        let restrictions = state
            .restricted
            .values()
            .map(|profile| RestrictionView {
                profile: profile.clone(),
                locked: decision.is_locked(&profile.application_token),
                session: latest
                    .get(&profile.application_token)
                    .map(|s| SessionView::new(s, now)),
            })
            .collect();

        let orphan_sessions = active
            .values()
            .filter(|s| !state.restricted.contains_key(&s.application_token))
            .map(|s| SessionView::new(s, now))
            .collect();

        Ok(ShieldStatus {
            restrictions,
            categories: state.categories.into_values().collect(),
            orphan_sessions,
            decision,
        })
    }

    /// Report stored state left behind by interrupted or racing writes
    pub fn consistency_report(&self) -> ShieldResult<ConsistencyReport> {
        let state = self.snapshot()?;
        let now = self.clock.now();

        let orphan_sessions = state
            .sessions
            .values()
            .filter(|s| !state.restricted.contains_key(&s.application_token))
            .cloned()
            .collect();

        let mut per_token: BTreeMap<AppToken, usize> = BTreeMap::new();
        for session in state.sessions.values().filter(|s| !s.is_expired(now)) {
            *per_token.entry(session.application_token.clone()).or_default() += 1;
        }
        let duplicate_tokens = per_token
            .into_iter()
            .filter(|(_, count)| *count > 1)
            .map(|(token, _)| token)
            .collect();

        Ok(ConsistencyReport {
            orphan_sessions,
            duplicate_tokens,
        })
    }

    /// Rebuild the decision set from the stored state and hand it to the
    /// enforcer, retrying any save that failed earlier
    pub fn recompute_and_issue(&self) -> ShieldResult<DecisionSet> {
        let _guard = self.write_guard();
        let now = self.clock.now();
        let (state, dirty) = self.load_state()?;
        self.commit(&state, dirty, now)
    }

    fn compute(state: &ShieldState, now: DateTime<Utc>) -> DecisionSet {
        let unlocked: BTreeSet<AppToken> = SessionManager::active_in(&state.sessions, now)
            .into_values()
            .map(|s| s.application_token)
            .collect();

        DecisionSet::compute(
            state.restricted.keys(),
            &unlocked,
            state.categories.keys(),
            now,
        )
    }

    fn issue(&self, state: &ShieldState, now: DateTime<Utc>) -> DecisionSet {
        let decision = Self::compute(state, now);
        self.enforcer
            .apply(&decision.locked_applications, &decision.locked_categories);

        debug!(
            locked_applications = decision.locked_applications.len(),
            locked_categories = decision.locked_categories.len(),
            "Decision set issued"
        );

        *self.last_issued.lock().unwrap_or_else(|e| e.into_inner()) = Some(decision.clone());
        decision
    }

    /// Persist what changed, then issue the decision for the in-memory state
    /// whether or not the save succeeded
    fn commit(
        &self,
        state: &ShieldState,
        dirty: Dirty,
        now: DateTime<Utc>,
    ) -> ShieldResult<DecisionSet> {
        let saved = self.persist(state, dirty);
        let decision = self.issue(state, now);

        match saved {
            Ok(()) => Ok(decision),
            Err(e) => {
                warn!(error = %e, "Failed to persist shield state; decision issued from memory");
                *self.unsaved_slot() = Some(state.clone());
                Err(e.into())
            }
        }
    }

    fn persist(&self, state: &ShieldState, dirty: Dirty) -> StoreResult<()> {
        if dirty.restricted {
            self.store.save_collection(&state.restricted)?;
        }
        if dirty.categories {
            self.store.save_collection(&state.categories)?;
        }
        if dirty.sessions {
            self.store.save_collection(&state.sessions)?;
        }
        Ok(())
    }

    /// State for a mutation; a previously unsaved state takes precedence and
    /// is written in full
    fn load_state(&self) -> StoreResult<(ShieldState, Dirty)> {
        if let Some(state) = self.unsaved_slot().take() {
            debug!("Retrying save of unsaved shield state");
            return Ok((state, Dirty::ALL));
        }
        Ok((self.read_state()?, Dirty::default()))
    }

    fn snapshot(&self) -> StoreResult<ShieldState> {
        if let Some(state) = self.unsaved_slot().as_ref() {
            return Ok(state.clone());
        }
        self.read_state()
    }

    fn read_state(&self) -> StoreResult<ShieldState> {
        Ok(ShieldState {
            restricted: self.store.load_collection()?,
            categories: self.store.load_collection()?,
            sessions: self.store.load_collection()?,
        })
    }

    fn unsaved_slot(&self) -> MutexGuard<'_, Option<ShieldState>> {
        self.unsaved.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn write_guard(&self) -> MutexGuard<'_, ()> {
        self.write_lock.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn audit(&self, event: AuditEventType, now: DateTime<Utc>) {
        if let Err(e) = self.store.append_audit(AuditEvent::at(event, now)) {
            warn!(error = %e, "Failed to append audit event");
        }
    }
}
