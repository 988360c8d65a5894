//! Append-only mutation ledger stored as JSON lines.
//!
//! One line per mutation, one `write_all` per line, file opened in append
//! mode. The log is never rewritten; line order is the authoritative order.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Lines, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use thiserror::Error;
use warden_types::{
    ContentRange, Contributor, EntryId, IntentId, LedgerEntry, MutationClass, ResourcePath,
};

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("ledger {} is not writable: {source}", path.display())]
    Persistence {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to encode ledger entry: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Everything about a mutation except what the ledger assigns itself
/// (entry id and timestamp).
#[derive(Debug, Clone)]
pub struct MutationRecord {
    pub resource: ResourcePath,
    pub ranges: Vec<ContentRange>,
    pub contributor: Contributor,
    pub intent_id: Option<IntentId>,
    pub classification: MutationClass,
    pub revision: Option<String>,
}

#[derive(Debug)]
pub struct MutationLedger {
    path: PathBuf,
    /// Serializes appenders and holds the last timestamp handed out.
    append_lock: Mutex<Option<DateTime<Utc>>>,
}

impl MutationLedger {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            append_lock: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Durably append one entry.
    ///
    /// Timestamps never go backwards within this process: a clock step back
    /// reuses the previous timestamp.
    pub fn append(&self, record: MutationRecord) -> Result<LedgerEntry, LedgerError> {
        let mut last = self
            .append_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let now = Utc::now();
        let timestamp = match *last {
            Some(prev) if prev > now => prev,
            _ => now,
        };

        let entry = LedgerEntry {
            id: EntryId::generate(),
            timestamp,
            revision: record.revision,
            resource: record.resource,
            ranges: record.ranges,
            contributor: record.contributor,
            intent_id: record.intent_id,
            classification: record.classification,
        };

        let mut line = serde_json::to_string(&entry)?;
        line.push('\n');
        self.write_line(line.as_bytes())
            .map_err(|source| LedgerError::Persistence {
                path: self.path.clone(),
                source,
            })?;

        *last = Some(timestamp);
        tracing::debug!(
            entry = %entry.id,
            resource = %entry.resource,
            intent = entry.intent_id.as_ref().map(IntentId::as_str),
            classification = entry.classification.as_str(),
            "Appended ledger entry"
        );
        Ok(entry)
    }

    fn write_line(&self, line: &[u8]) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line)?;
        file.flush()
    }

    /// Every entry in append order. A missing log is an empty history.
    pub fn entries(&self) -> Result<LedgerIter, LedgerError> {
        let lines = match File::open(&self.path) {
            Ok(file) => Some(BufReader::new(file).lines()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => None,
            Err(source) => {
                return Err(LedgerError::Persistence {
                    path: self.path.clone(),
                    source,
                });
            }
        };
        Ok(LedgerIter {
            path: self.path.clone(),
            lines,
            line_no: 0,
        })
    }

    pub fn query_by_resource(
        &self,
        resource: &ResourcePath,
    ) -> Result<impl Iterator<Item = LedgerEntry> + use<>, LedgerError> {
        let resource = resource.clone();
        Ok(self.entries()?.filter(move |e| e.resource == resource))
    }

    pub fn query_by_intent(
        &self,
        intent: &IntentId,
    ) -> Result<impl Iterator<Item = LedgerEntry> + use<>, LedgerError> {
        let intent = intent.clone();
        Ok(self
            .entries()?
            .filter(move |e| e.intent_id.as_ref() == Some(&intent)))
    }
}

/// Lazy reader over the log. Malformed lines are skipped with a warning; a
/// read error ends iteration.
#[derive(Debug)]
pub struct LedgerIter {
    path: PathBuf,
    lines: Option<Lines<BufReader<File>>>,
    line_no: usize,
}

impl Iterator for LedgerIter {
    type Item = LedgerEntry;

    fn next(&mut self) -> Option<LedgerEntry> {
        loop {
            let line = match self.lines.as_mut()?.next()? {
                Ok(line) => line,
                Err(err) => {
                    tracing::warn!(path = %self.path.display(), line = self.line_no + 1, "Ledger read failed: {err}");
                    self.lines = None;
                    return None;
                }
            };
            self.line_no += 1;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(&line) {
                Ok(entry) => return Some(entry),
                Err(err) => {
                    tracing::warn!(
                        path = %self.path.display(),
                        line = self.line_no,
                        "Skipping malformed ledger line: {err}"
                    );
                }
            }
        }
    }
}
