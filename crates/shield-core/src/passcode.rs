//! Guardian passcode gate
//!
//! State machine:
//!
//! ```text
//! Disabled --set--> Unlocked --force_lock--> Locked --validate ok--> Unlocked
//!                                            Locked --N failures--> LockedOut
//!                                         LockedOut --elapsed--> Locked
//! ```
//!
//! `Disabled` and `LockedOut` are derived from the persisted [`PasscodeState`];
//! `Unlocked` versus `Locked` is an in-memory flag that starts out locked.

use argon2::{Algorithm, Argon2, Params, Version};
use chrono::{DateTime, Utc};
use shield_api::PasscodeState;
use shield_config::PasscodeSettings;
use shield_store::{AuditEvent, AuditEventType, Store, StoreError, StoreExt};
use shield_util::{Clock, ShieldError};
use std::sync::{Arc, Mutex, MutexGuard};
use subtle::ConstantTimeEq;
use thiserror::Error;
use tracing::{debug, info, warn};

const HASH_M_COST_KIB: u32 = 19 * 1024;
const HASH_T_COST: u32 = 2;
const HASH_P_COST: u32 = 1;
const HASH_LEN: usize = 32;
const SALT_LEN: usize = 16;

/// Passcode gate errors
#[derive(Debug, Error)]
pub enum PasscodeError {
    #[error("Invalid passcode format: {0}")]
    InvalidFormat(String),

    #[error("Passcode gate is locked")]
    GateLocked,

    #[error("Passcode hashing failed: {0}")]
    Hash(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<PasscodeError> for ShieldError {
    fn from(e: PasscodeError) -> Self {
        match e {
            PasscodeError::Store(store) => store.into(),
            other => ShieldError::passcode(other.to_string()),
        }
    }
}

pub type PasscodeResult<T> = Result<T, PasscodeError>;

/// Current gate state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    /// No passcode configured; guardian surfaces are open
    Disabled,
    Unlocked,
    Locked,
    LockedOut { until: DateTime<Utc> },
}

/// Result of a validation attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationOutcome {
    Accepted,
    Rejected { remaining_attempts: u32 },
    LockedOut {
        until: DateTime<Utc>,
        remaining_seconds: u64,
    },
    NotConfigured,
}

/// Guards guardian-only surfaces behind a numeric passcode
pub struct PasscodeGate {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    settings: PasscodeSettings,
    unlocked: Mutex<bool>,
    write_lock: Mutex<()>,
}

impl PasscodeGate {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>, settings: PasscodeSettings) -> Self {
        Self {
            store,
            clock,
            settings,
            unlocked: Mutex::new(false),
            write_lock: Mutex::new(()),
        }
    }

    /// Configure or change the passcode.
    ///
    /// Changing an existing passcode requires the gate to be unlocked.
    pub fn set_passcode(&self, code: &str) -> PasscodeResult<()> {
        let _guard = self.write_guard();
        self.check_format(code)?;

        if let Some(existing) = self.store.load_passcode()?
            && existing.is_enabled
            && !*self.unlocked_flag()
        {
            return Err(PasscodeError::GateLocked);
        }

        let salt = generate_salt();
        let digest = hash_passcode(code, &salt)?;
        let state = PasscodeState {
            is_enabled: true,
            hashed_passcode: hex::encode(digest),
            salt: hex::encode(salt),
            failed_attempts: 0,
            lockout_until: None,
        };

        self.store.save_passcode(&state)?;
        *self.unlocked_flag() = true;
        self.audit(AuditEventType::PasscodeSet);
        info!("Passcode set");
        Ok(())
    }

    /// Check a passcode attempt.
    ///
    /// An elapsed lockout is cleared before the attempt is checked. Attempts
    /// made during a lockout are not counted.
    pub fn validate(&self, code: &str) -> PasscodeResult<ValidationOutcome> {
        let _guard = self.write_guard();
        let Some(mut state) = self.store.load_passcode()?.filter(|s| s.is_enabled) else {
            return Ok(ValidationOutcome::NotConfigured);
        };

        let now = self.clock.now();
        let lockout = chrono::Duration::from_std(self.settings.lockout_duration)
            .unwrap_or(chrono::Duration::zero());

        if let Some(until) = state.lockout_until {
            let latest = now + lockout;
            if until > latest {
                warn!(
                    stored_until = %until,
                    clamped_until = %latest,
                    "Lockout ends further out than the lockout duration, clamping"
                );
                state.lockout_until = Some(latest);
                self.store.save_passcode(&state)?;
            }

            if state.is_locked_out(now) {
                let until = state.lockout_until.unwrap_or(latest);
                debug!(until = %until, "Passcode attempt during lockout");
                return Ok(locked_out(until, now));
            }

            state.lockout_until = None;
            state.failed_attempts = 0;
            debug!("Lockout elapsed, attempts reset");
        }

        if verify_passcode(code, &state)? {
            state.failed_attempts = 0;
            self.store.save_passcode(&state)?;
            *self.unlocked_flag() = true;
            info!("Passcode accepted");
            return Ok(ValidationOutcome::Accepted);
        }

        state.failed_attempts = state.failed_attempts.saturating_add(1);
        *self.unlocked_flag() = false;

        if state.failed_attempts >= self.settings.max_attempts {
            let until = now + lockout;
            state.lockout_until = Some(until);
            self.store.save_passcode(&state)?;
            self.audit(AuditEventType::LockoutStarted { until });
            warn!(
                attempts = state.failed_attempts,
                until = %until,
                "Too many failed passcode attempts, locking out"
            );
            return Ok(locked_out(until, now));
        }

        self.store.save_passcode(&state)?;
        let remaining_attempts = self.settings.max_attempts - state.failed_attempts;
        info!(remaining_attempts, "Passcode rejected");
        Ok(ValidationOutcome::Rejected { remaining_attempts })
    }

    pub fn force_lock(&self) {
        *self.unlocked_flag() = false;
        debug!("Passcode gate locked");
    }

    pub fn force_unlock(&self) {
        *self.unlocked_flag() = true;
        debug!("Passcode gate unlocked");
    }

    pub fn state(&self) -> PasscodeResult<GateState> {
        let Some(stored) = self.store.load_passcode()?.filter(|s| s.is_enabled) else {
            return Ok(GateState::Disabled);
        };

        let now = self.clock.now();
        if let Some(until) = stored.lockout_until
            && stored.is_locked_out(now)
        {
            return Ok(GateState::LockedOut { until });
        }

        if *self.unlocked_flag() {
            Ok(GateState::Unlocked)
        } else {
            Ok(GateState::Locked)
        }
    }

    /// Guardian surfaces may be shown
    pub fn is_unlocked(&self) -> PasscodeResult<bool> {
        Ok(matches!(
            self.state()?,
            GateState::Disabled | GateState::Unlocked
        ))
    }

    /// Remove the passcode entirely, returning to `Disabled`
    pub fn reset_passcode(&self) -> PasscodeResult<()> {
        let _guard = self.write_guard();
        self.store.clear_passcode()?;
        *self.unlocked_flag() = false;
        self.audit(AuditEventType::PasscodeReset);
        info!("Passcode reset");
        Ok(())
    }

    fn check_format(&self, code: &str) -> PasscodeResult<()> {
        let len = code.chars().count();
        if len < self.settings.min_length || len > self.settings.max_length {
            return Err(PasscodeError::InvalidFormat(format!(
                "must be {} to {} digits",
                self.settings.min_length, self.settings.max_length
            )));
        }
        if !code.chars().all(|c| c.is_ascii_digit()) {
            return Err(PasscodeError::InvalidFormat("must contain only digits".into()));
        }
        Ok(())
    }

    fn unlocked_flag(&self) -> MutexGuard<'_, bool> {
        self.unlocked.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn write_guard(&self) -> MutexGuard<'_, ()> {
        self.write_lock.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn audit(&self, event: AuditEventType) {
        let event = AuditEvent::at(event, self.clock.now());
        if let Err(e) = self.store.append_audit(event) {
            warn!(error = %e, "Failed to append audit event");
        }
    }
}

fn locked_out(until: DateTime<Utc>, now: DateTime<Utc>) -> ValidationOutcome {
    let millis = (until - now).num_milliseconds().max(0) as u64;
    ValidationOutcome::LockedOut {
        until,
        remaining_seconds: millis.div_ceil(1000),
    }
}

fn hash_passcode(code: &str, salt: &[u8]) -> PasscodeResult<[u8; HASH_LEN]> {
    let params = Params::new(HASH_M_COST_KIB, HASH_T_COST, HASH_P_COST, Some(HASH_LEN))
        .map_err(|e| PasscodeError::Hash(e.to_string()))?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    let mut output = [0u8; HASH_LEN];
    argon2
        .hash_password_into(code.as_bytes(), salt, &mut output)
        .map_err(|e| PasscodeError::Hash(e.to_string()))?;
    Ok(output)
}

fn verify_passcode(code: &str, state: &PasscodeState) -> PasscodeResult<bool> {
    let (Ok(salt), Ok(expected)) = (hex::decode(&state.salt), hex::decode(&state.hashed_passcode))
    else {
        warn!("Stored passcode digest is not valid hex, rejecting attempt");
        return Ok(false);
    };

    let digest = hash_passcode(code, &salt)?;
    Ok(bool::from(digest.as_slice().ct_eq(expected.as_slice())))
}

fn generate_salt() -> [u8; SALT_LEN] {
    let mut salt = [0u8; SALT_LEN];
    rand::RngCore::fill_bytes(&mut rand::rngs::OsRng, &mut salt);
    salt
}

#[cfg(test)]
mod tests {
    use super::*;
    use shield_store::SqliteStore;
    use shield_util::ManualClock;
    use std::time::Duration;

    fn setup() -> (PasscodeGate, Arc<dyn Store>, Arc<ManualClock>) {
        let store: Arc<dyn Store> = Arc::new(SqliteStore::in_memory().unwrap());
        let clock = Arc::new(ManualClock::fixed());
        let gate = PasscodeGate::new(store.clone(), clock.clone(), PasscodeSettings::default());
        (gate, store, clock)
    }

    #[test]
    fn starts_disabled() {
        let (gate, _store, _clock) = setup();
        assert_eq!(gate.state().unwrap(), GateState::Disabled);
        assert!(gate.is_unlocked().unwrap());
        assert_eq!(gate.validate("1234").unwrap(), ValidationOutcome::NotConfigured);
    }

    #[test]
    fn set_then_validate() {
        let (gate, store, _clock) = setup();
        gate.set_passcode("1234").unwrap();
        assert_eq!(gate.state().unwrap(), GateState::Unlocked);

        let stored = store.load_passcode().unwrap().unwrap();
        assert_ne!(stored.hashed_passcode, "1234");
        assert!(!stored.hashed_passcode.contains("1234"));

        gate.force_lock();
        assert_eq!(gate.state().unwrap(), GateState::Locked);
        assert_eq!(gate.validate("1234").unwrap(), ValidationOutcome::Accepted);
        assert_eq!(gate.state().unwrap(), GateState::Unlocked);
    }

    #[test]
    fn format_is_checked() {
        let (gate, _store, _clock) = setup();
        assert!(matches!(gate.set_passcode("12"), Err(PasscodeError::InvalidFormat(_))));
        assert!(matches!(gate.set_passcode("12ab"), Err(PasscodeError::InvalidFormat(_))));
        assert!(matches!(
            gate.set_passcode("123456789"),
            Err(PasscodeError::InvalidFormat(_))
        ));
        assert_eq!(gate.state().unwrap(), GateState::Disabled);
    }

    #[test]
    fn changing_passcode_requires_unlocked_gate() {
        let (gate, _store, _clock) = setup();
        gate.set_passcode("1234").unwrap();
        gate.force_lock();

        assert!(matches!(gate.set_passcode("5678"), Err(PasscodeError::GateLocked)));

        gate.validate("1234").unwrap();
        gate.set_passcode("5678").unwrap();
        gate.force_lock();
        assert!(matches!(
            gate.validate("1234").unwrap(),
            ValidationOutcome::Rejected { .. }
        ));
        assert_eq!(gate.validate("5678").unwrap(), ValidationOutcome::Accepted);
    }

    #[test]
    fn lockout_after_threshold() {
        let (gate, store, clock) = setup();
        gate.set_passcode("1234").unwrap();
        gate.force_lock();

        assert_eq!(
            gate.validate("0000").unwrap(),
            ValidationOutcome::Rejected { remaining_attempts: 2 }
        );
        assert_eq!(
            gate.validate("0000").unwrap(),
            ValidationOutcome::Rejected { remaining_attempts: 1 }
        );

        let until = clock.now() + chrono::Duration::seconds(300);
        assert_eq!(
            gate.validate("0000").unwrap(),
            ValidationOutcome::LockedOut {
                until,
                remaining_seconds: 300
            }
        );
        assert_eq!(gate.state().unwrap(), GateState::LockedOut { until });

        // The correct passcode is refused and not counted during lockout
        clock.advance(chrono::Duration::seconds(100));
        assert_eq!(
            gate.validate("1234").unwrap(),
            ValidationOutcome::LockedOut {
                until,
                remaining_seconds: 200
            }
        );
        assert_eq!(store.load_passcode().unwrap().unwrap().failed_attempts, 3);
    }

    #[test]
    fn lockout_clears_when_elapsed() {
        let (gate, store, clock) = setup();
        gate.set_passcode("1234").unwrap();
        gate.force_lock();
        for _ in 0..3 {
            gate.validate("0000").unwrap();
        }

        clock.advance(chrono::Duration::seconds(300));
        assert_eq!(gate.state().unwrap(), GateState::Locked);

        assert_eq!(
            gate.validate("0000").unwrap(),
            ValidationOutcome::Rejected { remaining_attempts: 2 }
        );
        let stored = store.load_passcode().unwrap().unwrap();
        assert_eq!(stored.failed_attempts, 1);
        assert!(stored.lockout_until.is_none());

        assert_eq!(gate.validate("1234").unwrap(), ValidationOutcome::Accepted);
        assert_eq!(store.load_passcode().unwrap().unwrap().failed_attempts, 0);
    }

    #[test]
    fn lockout_is_clamped_when_clock_moves_back() {
        let (gate, store, clock) = setup();
        gate.set_passcode("1234").unwrap();
        gate.force_lock();
        for _ in 0..3 {
            gate.validate("0000").unwrap();
        }

        clock.rewind(chrono::Duration::hours(2));
        let outcome = gate.validate("1234").unwrap();
        assert_eq!(
            outcome,
            ValidationOutcome::LockedOut {
                until: clock.now() + chrono::Duration::seconds(300),
                remaining_seconds: 300
            }
        );
        assert_eq!(
            store.load_passcode().unwrap().unwrap().lockout_until,
            Some(clock.now() + chrono::Duration::seconds(300))
        );
    }

    #[test]
    fn reset_returns_to_disabled() {
        let (gate, store, _clock) = setup();
        gate.set_passcode("1234").unwrap();
        gate.force_lock();
        for _ in 0..3 {
            gate.validate("0000").unwrap();
        }

        gate.reset_passcode().unwrap();
        assert_eq!(gate.state().unwrap(), GateState::Disabled);
        assert!(store.load_passcode().unwrap().is_none());
    }

    #[test]
    fn unlocked_flag_is_not_persisted() {
        let (gate, store, clock) = setup();
        gate.set_passcode("1234").unwrap();

        let restarted = PasscodeGate::new(store, clock, PasscodeSettings::default());
        assert_eq!(restarted.state().unwrap(), GateState::Locked);
    }

    #[test]
    fn single_attempt_threshold() {
        let store: Arc<dyn Store> = Arc::new(SqliteStore::in_memory().unwrap());
        let clock = Arc::new(ManualClock::fixed());
        let settings = PasscodeSettings {
            max_attempts: 1,
            lockout_duration: Duration::from_secs(60),
            ..Default::default()
        };
        let gate = PasscodeGate::new(store, clock, settings);
        gate.set_passcode("1234").unwrap();
        gate.force_lock();

        assert!(matches!(
            gate.validate("9999").unwrap(),
            ValidationOutcome::LockedOut {
                remaining_seconds: 60,
                ..
            }
        ));
    }

    #[test]
    fn corrupt_digest_rejects() {
        let (gate, store, _clock) = setup();
        gate.set_passcode("1234").unwrap();
        let mut stored = store.load_passcode().unwrap().unwrap();
        stored.salt = "not hex".into();
        store.save_passcode(&stored).unwrap();
        gate.force_lock();

        assert!(matches!(
            gate.validate("1234").unwrap(),
            ValidationOutcome::Rejected { .. }
        ));
    }

    #[test]
    fn salts_are_random_and_full_length() {
        let (gate, store, _clock) = setup();
        gate.set_passcode("1234").unwrap();
        let first = store.load_passcode().unwrap().unwrap();
        gate.set_passcode("1234").unwrap();
        let second = store.load_passcode().unwrap().unwrap();

        assert_eq!(hex::decode(&first.salt).unwrap().len(), SALT_LEN);
        assert_ne!(first.salt, second.salt);
        assert_ne!(first.hashed_passcode, second.hashed_passcode);
    }

    #[test]
    fn truncated_digest_rejects() {
        let (gate, store, _clock) = setup();
        gate.set_passcode("1234").unwrap();
        let mut stored = store.load_passcode().unwrap().unwrap();
        stored.hashed_passcode.truncate(HASH_LEN);
        store.save_passcode(&stored).unwrap();
        gate.force_lock();

        assert!(matches!(
            gate.validate("1234").unwrap(),
            ValidationOutcome::Rejected { .. }
        ));
    }
}
