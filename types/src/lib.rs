//! Core domain types for Warden.
//!
//! This crate contains pure domain types with no IO, no async, and minimal dependencies.
//! Everything here can be used from any layer of the application.

// Pedantic lint configuration - these are intentional design choices
#![allow(clippy::missing_errors_doc)] // Result-returning functions are self-explanatory
#![allow(clippy::missing_panics_doc)] // Panics are documented in assertions

mod fingerprint;
mod ids;
mod intent;
mod ledger;
mod rejection;
mod resource;

pub use fingerprint::{Fingerprint, FingerprintParseError};
pub use ids::{EntryId, IdError, IntentId, TaskId};
pub use intent::{Intent, IntentStatus};
pub use ledger::{ContentRange, Contributor, ContributorKind, LedgerEntry, MutationClass};
pub use rejection::{BlockKind, Rejection};
pub use resource::{ResourcePath, ResourcePathError};
