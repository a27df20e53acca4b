//! Persistence layer for shield
//!
//! Provides:
//! - Whole-collection storage for restricted apps, categories and unlock sessions
//! - Single-value storage for passcode state
//! - Audit log (append-only)
//!
//! Every collection is read and written as one serialized value. A value that
//! no longer decodes is treated as an empty collection so a corrupted cache
//! never wedges the engine.

mod audit;
mod collection;
mod sqlite;
mod traits;

pub use audit::*;
pub use collection::*;
pub use sqlite::*;
pub use traits::*;

use shield_util::ShieldError;
use thiserror::Error;

/// Store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

impl From<StoreError> for ShieldError {
    fn from(e: StoreError) -> Self {
        ShieldError::store(e.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
