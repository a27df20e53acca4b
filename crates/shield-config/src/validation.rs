//! Configuration validation

use crate::policy::{
    DEFAULT_MAX_UNLOCK_MINUTES, DEFAULT_PASSCODE_MAX_LENGTH, DEFAULT_PASSCODE_MIN_LENGTH,
    DEFAULT_UNLOCK_MINUTES,
};
use crate::schema::{RawConfig, RawMirrorConfig};
use thiserror::Error;

/// Validation error
#[derive(Debug, Clone, Error)]
pub enum ValidationError {
    #[error("[{section}] {field}: {message}")]
    InvalidValue {
        section: &'static str,
        field: &'static str,
        message: String,
    },

    #[error("default_unlock_minutes {default} exceeds max_unlock_minutes {max}")]
    DefaultExceedsMax { default: u32, max: u32 },

    #[error("passcode min_length {min} exceeds max_length {max}")]
    PasscodeLengthRange { min: usize, max: usize },

    #[error("[mirror] requires [service] device_id")]
    MirrorWithoutDevice,
}

fn invalid(section: &'static str, field: &'static str, message: impl Into<String>) -> ValidationError {
    ValidationError::InvalidValue {
        section,
        field,
        message: message.into(),
    }
}

/// Validate a raw configuration
pub fn validate_config(config: &RawConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    // Service
    if let Some(device_id) = &config.service.device_id
        && device_id.trim().is_empty()
    {
        errors.push(invalid("service", "device_id", "cannot be empty"));
    }

    // Shield
    let default = config
        .shield
        .default_unlock_minutes
        .unwrap_or(DEFAULT_UNLOCK_MINUTES);
    let max = config
        .shield
        .max_unlock_minutes
        .unwrap_or(DEFAULT_MAX_UNLOCK_MINUTES);

    if default == 0 {
        errors.push(invalid("shield", "default_unlock_minutes", "must be at least 1"));
    }
    if max == 0 {
        errors.push(invalid("shield", "max_unlock_minutes", "must be at least 1"));
    }
    if default > max {
        errors.push(ValidationError::DefaultExceedsMax { default, max });
    }
    if config.shield.reconcile_interval_seconds == Some(0) {
        errors.push(invalid("shield", "reconcile_interval_seconds", "must be at least 1"));
    }

    // Passcode
    if config.passcode.max_attempts == Some(0) {
        errors.push(invalid("passcode", "max_attempts", "must be at least 1"));
    }
    if config.passcode.lockout_seconds == Some(0) {
        errors.push(invalid("passcode", "lockout_seconds", "must be at least 1"));
    }

    let min_len = config
        .passcode
        .min_length
        .unwrap_or(DEFAULT_PASSCODE_MIN_LENGTH);
    let max_len = config
        .passcode
        .max_length
        .unwrap_or(DEFAULT_PASSCODE_MAX_LENGTH);
    if min_len == 0 {
        errors.push(invalid("passcode", "min_length", "must be at least 1"));
    }
    if min_len > max_len {
        errors.push(ValidationError::PasscodeLengthRange {
            min: min_len,
            max: max_len,
        });
    }

    // Mirror
    if let Some(mirror) = &config.mirror {
        errors.extend(validate_mirror(mirror));

        if config.service.device_id.is_none() {
            errors.push(ValidationError::MirrorWithoutDevice);
        }
    }

    errors
}

fn validate_mirror(mirror: &RawMirrorConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if !(mirror.url.starts_with("https://") || mirror.url.starts_with("http://")) {
        errors.push(invalid("mirror", "url", format!("'{}' is not an http(s) URL", mirror.url)));
    }

    if let Some(table) = &mirror.table
        && (table.is_empty()
            || !table
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_'))
    {
        errors.push(invalid("mirror", "table", format!("'{}' is not a valid table name", table)));
    }

    if mirror.timeout_seconds == Some(0) {
        errors.push(invalid("mirror", "timeout_seconds", "must be at least 1"));
    }
    if mirror.sync_interval_seconds == Some(0) {
        errors.push(invalid("mirror", "sync_interval_seconds", "must be at least 1"));
    }

    errors
}
