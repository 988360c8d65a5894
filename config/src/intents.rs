//! Intent document discovery, parsing and status persistence.
//!
//! Candidates are tried in order and the first one that exists *and* parses
//! wins. Documents are never merged. A candidate that exists but fails to
//! parse is recorded as a candidate failure and the search continues.
//!
//! ```toml
//! [[intents]]
//! id = "INT-001"
//! name = "JWT authentication"
//! owned_scope = ["src/auth/**", "tests/auth/**"]
//! constraints = ["Must not touch the session store"]
//! acceptance_criteria = ["Login returns a signed token"]
//! status = "declared"
//! ```

use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use warden_types::{Intent, IntentId, IntentStatus};
use warden_utils::{AtomicWriteOptions, PersistMode, atomic_write_with_options};

/// Built-in candidate locations, relative to the workspace root.
pub const INTENT_CANDIDATES: &[&str] = &[
    ".warden/intents.toml",
    ".warden/intents.json",
    ".orchestration/active_intents.toml",
    ".orchestration/active_intents.json",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Toml,
    Json,
}

impl DocumentFormat {
    fn of(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => Self::Json,
            _ => Self::Toml,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct IntentDocument {
    #[serde(default)]
    pub intents: Vec<Intent>,
}

/// A successfully loaded intent document.
#[derive(Debug)]
pub struct IntentSource {
    pub path: PathBuf,
    pub format: DocumentFormat,
    pub intents: Vec<Intent>,
}

#[derive(Debug, Clone)]
pub struct CandidateFailure {
    pub path: PathBuf,
    pub reason: String,
}

impl fmt::Display for CandidateFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path.display(), self.reason)
    }
}

#[derive(Debug, Error)]
pub enum IntentSourceError {
    #[error("no intent document found (tried: {})", format_tried(.tried))]
    Unavailable {
        tried: Vec<PathBuf>,
        failures: Vec<CandidateFailure>,
    },
    #[error("intent '{id}' not present in {}", path.display())]
    UnknownIntent { path: PathBuf, id: IntentId },
    #[error("failed to update {}: {message}", path.display())]
    Persist { path: PathBuf, message: String },
}

fn format_tried(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Ordered candidate list: optional override first, then the built-ins.
#[must_use]
pub fn intent_candidates(root: &Path, override_path: Option<&Path>) -> Vec<PathBuf> {
    override_path
        .map(Path::to_path_buf)
        .into_iter()
        .chain(INTENT_CANDIDATES.iter().map(|rel| root.join(rel)))
        .collect()
}

pub fn load_intent_document(
    root: &Path,
    override_path: Option<&Path>,
) -> Result<IntentSource, IntentSourceError> {
    let tried = intent_candidates(root, override_path);
    let mut failures = Vec::new();

    for path in &tried {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
            Err(err) => {
                tracing::warn!(path = %path.display(), "Failed to read intent document: {err}");
                failures.push(CandidateFailure {
                    path: path.clone(),
                    reason: err.to_string(),
                });
                continue;
            }
        };

        let format = DocumentFormat::of(path);
        match parse_document(&content, format) {
            Ok(intents) => {
                tracing::info!(
                    path = %path.display(),
                    count = intents.len(),
                    "Loaded intent document"
                );
                return Ok(IntentSource {
                    path: path.clone(),
                    format,
                    intents,
                });
            }
            Err(reason) => {
                tracing::warn!(path = %path.display(), "Skipping unparseable intent document: {reason}");
                failures.push(CandidateFailure {
                    path: path.clone(),
                    reason,
                });
            }
        }
    }

    Err(IntentSourceError::Unavailable { tried, failures })
}

fn parse_document(content: &str, format: DocumentFormat) -> Result<Vec<Intent>, String> {
    let doc: IntentDocument = match format {
        DocumentFormat::Toml => toml::from_str(content).map_err(|e| e.to_string())?,
        DocumentFormat::Json => serde_json::from_str(content).map_err(|e| e.to_string())?,
    };

    let mut seen = HashSet::new();
    for intent in &doc.intents {
        if !seen.insert(intent.id.clone()) {
            return Err(format!("duplicate intent id '{}'", intent.id));
        }
    }
    Ok(doc.intents)
}

/// Rewrite the `status` of one intent in place.
///
/// TOML documents are edited with `toml_edit` so comments and layout survive.
pub fn persist_intent_status(
    source: &IntentSource,
    id: &IntentId,
    status: IntentStatus,
) -> Result<(), IntentSourceError> {
    let path = &source.path;
    let persist_err = |message: String| IntentSourceError::Persist {
        path: path.clone(),
        message,
    };

    let content = fs::read_to_string(path).map_err(|e| persist_err(e.to_string()))?;
    let updated = match source.format {
        DocumentFormat::Toml => {
            let mut doc = content
                .parse::<toml_edit::DocumentMut>()
                .map_err(|e| persist_err(e.to_string()))?;
            let tables = doc
                .get_mut("intents")
                .and_then(toml_edit::Item::as_array_of_tables_mut)
                .ok_or_else(|| persist_err("missing [[intents]] tables".to_string()))?;
            let table = tables
                .iter_mut()
                .find(|t| t.get("id").and_then(toml_edit::Item::as_str) == Some(id.as_str()))
                .ok_or_else(|| IntentSourceError::UnknownIntent {
                    path: path.clone(),
                    id: id.clone(),
                })?;
            table["status"] = toml_edit::value(status.as_str());
            doc.to_string()
        }
        DocumentFormat::Json => {
            let mut doc: serde_json::Value =
                serde_json::from_str(&content).map_err(|e| persist_err(e.to_string()))?;
            let entry = doc
                .get_mut("intents")
                .and_then(serde_json::Value::as_array_mut)
                .and_then(|list| {
                    list.iter_mut()
                        .find(|i| i.get("id").and_then(serde_json::Value::as_str) == Some(id.as_str()))
                })
                .ok_or_else(|| IntentSourceError::UnknownIntent {
                    path: path.clone(),
                    id: id.clone(),
                })?;
            entry["status"] = serde_json::Value::String(status.as_str().to_string());
            let mut out =
                serde_json::to_string_pretty(&doc).map_err(|e| persist_err(e.to_string()))?;
            out.push('\n');
            out
        }
    };

    atomic_write_with_options(
        path,
        updated.as_bytes(),
        AtomicWriteOptions {
            mode: PersistMode::of_existing(path),
            ..AtomicWriteOptions::default()
        },
    )
    .map_err(|e| persist_err(e.to_string()))
}
