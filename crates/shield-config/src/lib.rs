//! Configuration parsing and validation for shield
//!
//! Supports TOML configuration with:
//! - Versioned schema
//! - Unlock duration defaults and bounds
//! - Passcode attempt threshold and lockout duration
//! - Optional remote mirror connection
//! - Validation with clear error messages

mod policy;
mod schema;
mod validation;

pub use policy::*;
pub use schema::*;
pub use validation::*;

use std::path::Path;
use thiserror::Error;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Validation failed: {errors:?}")]
    ValidationFailed { errors: Vec<ValidationError> },

    #[error("Unsupported config version: {0}")]
    UnsupportedVersion(u32),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Load and validate configuration from a TOML file
pub fn load_config(path: impl AsRef<Path>) -> ConfigResult<Policy> {
    let content = std::fs::read_to_string(path)?;
    parse_config(&content)
}

/// Parse and validate configuration from a TOML string
pub fn parse_config(content: &str) -> ConfigResult<Policy> {
    let raw: RawConfig = toml::from_str(content)?;

    // Check version
    if raw.config_version != CURRENT_CONFIG_VERSION {
        return Err(ConfigError::UnsupportedVersion(raw.config_version));
    }

    // Validate
    let errors = validate_config(&raw);
    if !errors.is_empty() {
        return Err(ConfigError::ValidationFailed { errors });
    }

    // Convert to policy
    Ok(Policy::from_raw(raw))
}

/// Current supported config version
pub const CURRENT_CONFIG_VERSION: u32 = 1;

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn parse_minimal_config() {
        let config = r#"
            config_version = 1
        "#;

        let policy = parse_config(config).unwrap();
        assert_eq!(policy.shield.default_unlock_minutes, DEFAULT_UNLOCK_MINUTES);
        assert_eq!(policy.passcode.max_attempts, DEFAULT_MAX_ATTEMPTS);
        assert!(policy.mirror.is_none());
    }

    #[test]
    fn parse_full_config() {
        let config = r#"
            config_version = 1

            [service]
            data_dir = "/var/lib/shield"
            device_id = "child-ipad"

            [shield]
            default_unlock_minutes = 10
            max_unlock_minutes = 60
            reconcile_interval_seconds = 15

            [passcode]
            max_attempts = 5
            lockout_seconds = 600

            [mirror]
            url = "https://mirror.example.com"
            api_key = "secret"
        "#;

        let policy = parse_config(config).unwrap();
        assert_eq!(policy.service.device_id.as_ref().unwrap().as_str(), "child-ipad");
        assert_eq!(policy.shield.default_unlock_minutes, 10);
        assert_eq!(policy.shield.reconcile_interval, Duration::from_secs(15));
        assert_eq!(policy.passcode.max_attempts, 5);
        assert_eq!(policy.passcode.lockout_duration, Duration::from_secs(600));

        let mirror = policy.mirror.unwrap();
        assert_eq!(mirror.table, DEFAULT_MIRROR_TABLE);
        assert_eq!(mirror.timeout, Duration::from_secs(DEFAULT_MIRROR_TIMEOUT_SECS));
    }

    #[test]
    fn reject_wrong_version() {
        let config = r#"
            config_version = 99
        "#;

        let result = parse_config(config);
        assert!(matches!(result, Err(ConfigError::UnsupportedVersion(99))));
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "config_version = 1\n[passcode]\nmax_attempts = 4\n").unwrap();

        let policy = load_config(&path).unwrap();
        assert_eq!(policy.passcode.max_attempts, 4);
    }
}
