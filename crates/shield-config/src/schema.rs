//! Raw configuration schema (as parsed from TOML)

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Raw configuration as parsed from TOML
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawConfig {
    /// Config schema version
    pub config_version: u32,

    /// Process-level settings
    #[serde(default)]
    pub service: RawServiceConfig,

    /// Temporary-access settings
    #[serde(default)]
    pub shield: RawShieldConfig,

    /// Passcode gate settings
    #[serde(default)]
    pub passcode: RawPasscodeConfig,

    /// Remote mirror connection (sync disabled when absent)
    #[serde(default)]
    pub mirror: Option<RawMirrorConfig>,
}

/// Process-level settings
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawServiceConfig {
    /// Data directory for the store
    pub data_dir: Option<PathBuf>,

    /// Identity of this device in the remote mirror
    pub device_id: Option<String>,
}

/// Temporary-access settings
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawShieldConfig {
    /// Grant length used by the shield-action callback
    pub default_unlock_minutes: Option<u32>,

    /// Upper bound on any single grant
    pub max_unlock_minutes: Option<u32>,

    /// How often the service reconciles expired grants
    pub reconcile_interval_seconds: Option<u64>,
}

/// Passcode gate settings
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawPasscodeConfig {
    /// Consecutive failures before lockout
    pub max_attempts: Option<u32>,

    /// Lockout duration in seconds
    pub lockout_seconds: Option<u64>,

    /// Minimum passcode length (digits)
    pub min_length: Option<usize>,

    /// Maximum passcode length (digits)
    pub max_length: Option<usize>,
}

/// Remote mirror connection
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawMirrorConfig {
    /// Base URL of the mirror's REST endpoint
    pub url: String,

    /// API key sent with every request
    pub api_key: Option<String>,

    /// Table holding the shielded-application rows
    pub table: Option<String>,

    /// Per-request timeout in seconds
    pub timeout_seconds: Option<u64>,

    /// How often the service pulls the restricted set
    pub sync_interval_seconds: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_sections() {
        let toml_str = r#"
            config_version = 1

            [shield]
            default_unlock_minutes = 20

            [mirror]
            url = "https://mirror.example.com"
            table = "apps"
        "#;

        let config: RawConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.shield.default_unlock_minutes, Some(20));
        assert!(config.passcode.max_attempts.is_none());
        assert_eq!(config.mirror.unwrap().table.as_deref(), Some("apps"));
    }

    #[test]
    fn missing_sections_default() {
        let config: RawConfig = toml::from_str("config_version = 1").unwrap();
        assert!(config.service.device_id.is_none());
        assert!(config.mirror.is_none());
    }
}
