//! Current VCS revision, stamped onto ledger entries.

use std::path::Path;
use std::process::Command;

/// `git rev-parse HEAD` in `root`, or `None` outside a repository or when git
/// is unavailable.
#[must_use]
pub fn current_revision(root: &Path) -> Option<String> {
    let output = Command::new("git")
        .arg("-C")
        .arg(root)
        .args(["rev-parse", "HEAD"])
        .output()
        .ok()?;

    if !output.status.success() {
        tracing::trace!(root = %root.display(), "No git revision available");
        return None;
    }
    let revision = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!revision.is_empty()).then_some(revision)
}
