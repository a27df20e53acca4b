//! Shared utilities for shield
//!
//! This crate provides:
//! - ID types (ProfileId, SessionId, DeviceId)
//! - Opaque platform tokens (AppToken, CategoryToken)
//! - Time utilities (injectable clocks, mock time)
//! - Error types
//! - Default paths for config and data directories

mod error;
mod ids;
mod paths;
mod time;

pub use error::*;
pub use ids::*;
pub use paths::*;
pub use time::*;
