//! Host adapters for shieldd
//!
//! Provides:
//! - A file-based enforcer that publishes the decision set for an OS agent
//! - An HTTP client for the remote mirror's REST table

mod enforcer;
mod mirror;

pub use enforcer::*;
pub use mirror::*;
