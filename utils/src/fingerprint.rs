//! SHA-256 content fingerprints.
//!
//! Whole-content digests detect stale reads; line-range digests describe a
//! changed region independent of where it sits in the file.

use std::io::{self, BufRead};
use std::path::Path;

use sha2::{Digest, Sha256};
use warden_types::Fingerprint;

/// Digest of the exact bytes.
#[must_use]
pub fn fingerprint(bytes: &[u8]) -> Fingerprint {
    Fingerprint::from_bytes(Sha256::digest(bytes).into())
}

/// Digest of lines [start, end] inclusive (1-indexed), each terminated by `\n`.
///
/// Line endings are normalized so a CRLF checkout hashes like LF.
#[must_use]
pub fn fingerprint_lines(bytes: &[u8], start: u32, end: u32) -> Fingerprint {
    let mut hasher = Sha256::new();
    if start > end {
        return Fingerprint::from_bytes(hasher.finalize().into());
    }

    let reader = io::BufReader::new(bytes);
    for (idx, line_result) in reader.lines().enumerate() {
        let line_num = (idx + 1) as u32;
        if line_num > end {
            break;
        }
        if line_num >= start
            && let Ok(line) = line_result
        {
            hasher.update(line.trim_end_matches('\r').as_bytes());
            hasher.update(b"\n");
        }
    }

    Fingerprint::from_bytes(hasher.finalize().into())
}

/// Digest of a file on disk, or `None` when it does not exist.
pub fn fingerprint_file(path: &Path) -> io::Result<Option<Fingerprint>> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(Some(fingerprint(&bytes))),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err),
    }
}
