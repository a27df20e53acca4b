//! Host interfaces for shield
//!
//! This crate defines the narrow seams between the policy engine and the
//! outside world. It contains no platform code itself:
//! - [`Enforcer`]: the OS primitive that blocks applications
//! - [`RemoteMirror`]: the guardian-side record set kept in sync

mod mock;
mod traits;

pub use mock::*;
pub use traits::*;
