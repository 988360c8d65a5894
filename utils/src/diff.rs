//! Line diff stats and changed ranges.

use std::str;

use similar::{ChangeTag, DiffTag, TextDiff};

/// Number of lines in `bytes` (a trailing newline does not start a new line).
#[must_use]
pub fn line_count(bytes: &[u8]) -> u32 {
    let text = str::from_utf8(bytes).unwrap_or("");
    text.lines().count() as u32
}

/// Compute diff stats (additions and deletions) between old and new content.
#[must_use]
pub fn compute_diff_stats(old_bytes: &[u8], new_bytes: &[u8]) -> (u32, u32) {
    let old_text = str::from_utf8(old_bytes).unwrap_or("");
    let new_text = str::from_utf8(new_bytes).unwrap_or("");

    let diff = TextDiff::from_lines(old_text, new_text);

    let mut additions: u32 = 0;
    let mut deletions: u32 = 0;

    for change in diff.iter_all_changes() {
        match change.tag() {
            ChangeTag::Insert => additions += 1,
            ChangeTag::Delete => deletions += 1,
            ChangeTag::Equal => {}
        }
    }

    (additions, deletions)
}

/// Line ranges of `new_bytes` (1-indexed, inclusive) that were inserted or
/// replaced relative to `old_bytes`.
///
/// Adjacent hunks are reported separately. Pure deletions produce no range.
#[must_use]
pub fn changed_line_ranges(old_bytes: &[u8], new_bytes: &[u8]) -> Vec<(u32, u32)> {
    let old_text = str::from_utf8(old_bytes).unwrap_or("");
    let new_text = str::from_utf8(new_bytes).unwrap_or("");

    let diff = TextDiff::from_lines(old_text, new_text);

    diff.ops()
        .iter()
        .filter(|op| matches!(op.tag(), DiffTag::Insert | DiffTag::Replace))
        .filter_map(|op| {
            let range = op.new_range();
            if range.is_empty() {
                None
            } else {
                Some(((range.start + 1) as u32, range.end as u32))
            }
        })
        .collect()
}
