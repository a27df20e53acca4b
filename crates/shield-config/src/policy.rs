//! Validated policy structures

use crate::schema::{RawConfig, RawMirrorConfig, RawPasscodeConfig, RawServiceConfig, RawShieldConfig};
use shield_util::{DeviceId, default_data_dir};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_UNLOCK_MINUTES: u32 = 15;
pub const DEFAULT_MAX_UNLOCK_MINUTES: u32 = 240;
pub const DEFAULT_RECONCILE_INTERVAL_SECS: u64 = 30;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_LOCKOUT_SECS: u64 = 300;
pub const DEFAULT_PASSCODE_MIN_LENGTH: usize = 4;
pub const DEFAULT_PASSCODE_MAX_LENGTH: usize = 8;
pub const DEFAULT_MIRROR_TABLE: &str = "shielded_apps";
pub const DEFAULT_MIRROR_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_MIRROR_SYNC_INTERVAL_SECS: u64 = 300;

/// Validated configuration ready for use by the engine and service
#[derive(Debug, Clone, Default)]
pub struct Policy {
    pub service: ServiceConfig,
    pub shield: ShieldSettings,
    pub passcode: PasscodeSettings,
    /// None means remote sync is disabled
    pub mirror: Option<MirrorConfig>,
}

impl Policy {
    /// Convert from raw config (after validation)
    pub fn from_raw(raw: RawConfig) -> Self {
        Self {
            service: ServiceConfig::from_raw(raw.service),
            shield: ShieldSettings::from_raw(raw.shield),
            passcode: PasscodeSettings::from_raw(raw.passcode),
            mirror: raw.mirror.map(MirrorConfig::from_raw),
        }
    }
}

/// Process-level settings
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub data_dir: PathBuf,
    pub device_id: Option<DeviceId>,
}

impl ServiceConfig {
    fn from_raw(raw: RawServiceConfig) -> Self {
        Self {
            data_dir: raw.data_dir.unwrap_or_else(default_data_dir),
            device_id: raw.device_id.map(DeviceId::new),
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            device_id: None,
        }
    }
}

/// Temporary-access settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShieldSettings {
    pub default_unlock_minutes: u32,
    pub max_unlock_minutes: u32,
    pub reconcile_interval: Duration,
}

impl ShieldSettings {
    fn from_raw(raw: RawShieldConfig) -> Self {
        Self {
            default_unlock_minutes: raw
                .default_unlock_minutes
                .unwrap_or(DEFAULT_UNLOCK_MINUTES),
            max_unlock_minutes: raw.max_unlock_minutes.unwrap_or(DEFAULT_MAX_UNLOCK_MINUTES),
            reconcile_interval: Duration::from_secs(
                raw.reconcile_interval_seconds
                    .unwrap_or(DEFAULT_RECONCILE_INTERVAL_SECS),
            ),
        }
    }

    /// Clamp a requested grant length into `1..=max_unlock_minutes`
    pub fn clamp_unlock_minutes(&self, requested: u32) -> u32 {
        requested.clamp(1, self.max_unlock_minutes.max(1))
    }
}

impl Default for ShieldSettings {
    fn default() -> Self {
        Self::from_raw(RawShieldConfig::default())
    }
}

/// Passcode gate settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasscodeSettings {
    pub max_attempts: u32,
    pub lockout_duration: Duration,
    pub min_length: usize,
    pub max_length: usize,
}

impl PasscodeSettings {
    fn from_raw(raw: RawPasscodeConfig) -> Self {
        Self {
            max_attempts: raw.max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS),
            lockout_duration: Duration::from_secs(
                raw.lockout_seconds.unwrap_or(DEFAULT_LOCKOUT_SECS),
            ),
            min_length: raw.min_length.unwrap_or(DEFAULT_PASSCODE_MIN_LENGTH),
            max_length: raw.max_length.unwrap_or(DEFAULT_PASSCODE_MAX_LENGTH),
        }
    }
}

impl Default for PasscodeSettings {
    fn default() -> Self {
        Self::from_raw(RawPasscodeConfig::default())
    }
}

/// Remote mirror connection
#[derive(Debug, Clone)]
pub struct MirrorConfig {
    pub url: String,
    pub api_key: Option<String>,
    pub table: String,
    pub timeout: Duration,
    pub sync_interval: Duration,
}

impl MirrorConfig {
    fn from_raw(raw: RawMirrorConfig) -> Self {
        Self {
            url: raw.url.trim_end_matches('/').to_string(),
            api_key: raw.api_key,
            table: raw.table.unwrap_or_else(|| DEFAULT_MIRROR_TABLE.to_string()),
            timeout: Duration::from_secs(
                raw.timeout_seconds.unwrap_or(DEFAULT_MIRROR_TIMEOUT_SECS),
            ),
            sync_interval: Duration::from_secs(
                raw.sync_interval_seconds
                    .unwrap_or(DEFAULT_MIRROR_SYNC_INTERVAL_SECS),
            ),
        }
    }
}
