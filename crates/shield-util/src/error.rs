//! Error types for shield

use thiserror::Error;

/// Core error type for shield operations
///
/// Only genuine faults end up here. Business conditions such as an expired
/// session, a missing restriction or an active lockout are ordinary return
/// values.
#[derive(Debug, Error)]
pub enum ShieldError {
    #[error("Store error: {0}")]
    StoreError(String),

    #[error("Sync error: {0}")]
    SyncError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Passcode error: {0}")]
    PasscodeError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ShieldError {
    pub fn store(msg: impl Into<String>) -> Self {
        Self::StoreError(msg.into())
    }

    pub fn sync(msg: impl Into<String>) -> Self {
        Self::SyncError(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    pub fn passcode(msg: impl Into<String>) -> Self {
        Self::PasscodeError(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether this error came from the remote mirror
    pub fn is_sync(&self) -> bool {
        matches!(self, Self::SyncError(_))
    }
}

pub type ShieldResult<T> = std::result::Result<T, ShieldError>;
