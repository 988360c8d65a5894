use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{EntryId, Fingerprint, IntentId, ResourcePath};

/// Coarse, heuristic label for a mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MutationClass {
    /// Surface-preserving change under unchanged acceptance criteria.
    AstRefactor,
    /// New file, new visible symbol, changed criteria, or a large delta.
    IntentEvolution,
}

impl MutationClass {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AstRefactor => "AST_REFACTOR",
            Self::IntentEvolution => "INTENT_EVOLUTION",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContributorKind {
    Ai,
    Human,
    #[default]
    Unknown,
}

/// Who performed a mutation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contributor {
    pub entity_type: ContributorKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_identifier: Option<String>,
}

impl Contributor {
    #[must_use]
    pub fn ai(model: impl Into<String>) -> Self {
        Self {
            entity_type: ContributorKind::Ai,
            model_identifier: Some(model.into()),
        }
    }

    #[must_use]
    pub fn human() -> Self {
        Self {
            entity_type: ContributorKind::Human,
            model_identifier: None,
        }
    }
}

/// A changed line range (1-indexed, inclusive) and the digest of its text.
///
/// The digest covers only the lines in the range, so it stays valid when
/// unrelated edits shift the range up or down the file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentRange {
    pub start_line: u32,
    pub end_line: u32,
    pub content_hash: Fingerprint,
}

/// One immutable mutation record.
///
/// Position in the log is authoritative for ordering; `timestamp` is
/// informational and may skew between processes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: EntryId,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,
    pub resource: ResourcePath,
    pub ranges: Vec<ContentRange>,
    pub contributor: Contributor,
    #[serde(default)]
    pub intent_id: Option<IntentId>,
    pub classification: MutationClass,
}
