//! Append-only project notes ("lessons learned").

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use chrono::{SecondsFormat, Utc};

/// Destination for free-form notes recorded by agents or operators.
pub trait KnowledgeSink: Send + Sync {
    fn append_note(&self, category: &str, note: &str) -> io::Result<()>;
}

/// Markdown file of `- <timestamp> [<category>] <note>` lines.
#[derive(Debug)]
pub struct NotesFile {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl NotesFile {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl KnowledgeSink for NotesFile {
    fn append_note(&self, category: &str, note: &str) -> io::Result<()> {
        let category = category.trim();
        let note = note.split_whitespace().collect::<Vec<_>>().join(" ");
        if note.is_empty() {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "note is empty"));
        }
        let category = if category.is_empty() { "general" } else { category };
        let line = format!(
            "- {} [{category}] {note}\n",
            Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
        );

        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())?;
        tracing::debug!(path = %self.path.display(), category, "Appended note");
        Ok(())
    }
}
