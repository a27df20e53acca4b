//! Shared types for shield
//!
//! This crate defines the records and views exchanged between crates:
//! - Persisted records (restricted applications, unlock sessions, passcode state)
//! - The derived restriction decision set
//! - Remote mirror rows and deltas
//! - Status views for display

mod decision;
mod remote;
mod types;
mod views;

pub use decision::*;
pub use remote::*;
pub use types::*;
pub use views::*;
