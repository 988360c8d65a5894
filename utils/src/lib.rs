//! Shared infrastructure utilities for Warden.
//!
//! This crate provides cross-cutting utilities that multiple Warden crates need
//! but that don't belong in the domain-pure `warden-types` crate:
//!
//! - **`fingerprint`**: SHA-256 content and line-range digests
//! - **`atomic_write`**: Crash-safe file persistence (temp + rename)
//! - **`diff`**: Line diff stats and changed ranges

pub mod atomic_write;
pub mod diff;
pub mod fingerprint;

pub use atomic_write::{
    AtomicWriteOptions, FileSyncPolicy, ParentDirSyncPolicy, PersistMode, atomic_write,
    atomic_write_with_options, recover_bak_file,
};
pub use diff::{changed_line_ranges, compute_diff_stats, line_count};
pub use fingerprint::{fingerprint, fingerprint_file, fingerprint_lines};
