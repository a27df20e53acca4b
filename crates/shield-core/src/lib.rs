//! Core policy engine for shield
//!
//! This crate is the heart of shield, containing:
//! - Unlock session lifecycle (start, supersede, expire, purge)
//! - Shield policy engine (restricted set, decision set, reconciliation, mirror sync)
//! - Passcode gate (Disabled -> Unlocked <-> Locked -> LockedOut)
//!
//! Expiry and lockout are always evaluated against an injected clock; nothing
//! time-dependent is cached as a flag.

mod engine;
mod events;
mod passcode;
mod session;

pub use engine::*;
pub use events::*;
pub use passcode::*;
pub use session::*;
