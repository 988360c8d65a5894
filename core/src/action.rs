//! Agent actions and how they are governed.

use std::collections::{BTreeSet, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use warden_config::Settings;
use warden_types::{ResourcePath, ResourcePathError};

/// Parameters that name a single target resource.
const PATH_PARAMS: &[&str] = &["path", "file_path", "target_file", "resource"];
/// Parameters that carry a unified diff or an apply_patch envelope.
const PATCH_PARAMS: &[&str] = &["patch", "diff", "input"];
const PATCH_FILE_MARKERS: &[&str] = &[
    "*** Update File:",
    "*** Add File:",
    "*** Delete File:",
    "*** Move to:",
];

/// A named action with free-form JSON parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub name: String,
    #[serde(default)]
    pub params: Value,
}

impl Action {
    #[must_use]
    pub fn new(name: impl Into<String>, params: Value) -> Self {
        Self {
            name: name.into(),
            params,
        }
    }

    fn str_param(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(Value::as_str)
    }

    /// Intent id argument of a select-intent action.
    #[must_use]
    pub fn requested_intent(&self) -> Option<&str> {
        self.str_param("intent_id").or_else(|| self.str_param("id"))
    }

    /// Every resource this action names, canonicalized, deduplicated and sorted.
    ///
    /// An empty result means the targets could not be determined.
    pub fn targets(&self, root: &Path) -> Result<Vec<ResourcePath>, ActionError> {
        let mut raw: Vec<&str> = PATH_PARAMS
            .iter()
            .filter_map(|key| self.str_param(key))
            .collect();
        if let Some(list) = self.params.get("paths").and_then(Value::as_array) {
            raw.extend(list.iter().filter_map(Value::as_str));
        }
        for key in PATCH_PARAMS {
            if let Some(patch) = self.str_param(key) {
                raw.extend(patch_targets(patch));
            }
        }

        let mut targets = BTreeSet::new();
        for candidate in raw {
            let path = ResourcePath::from_workspace(candidate, root).map_err(|source| {
                ActionError::InvalidTarget {
                    action: self.name.clone(),
                    raw: candidate.to_string(),
                    source,
                }
            })?;
            targets.insert(path);
        }
        Ok(targets.into_iter().collect())
    }
}

#[derive(Debug, Error)]
pub enum ActionError {
    #[error("{action}: invalid target '{raw}': {source}")]
    InvalidTarget {
        action: String,
        raw: String,
        #[source]
        source: ResourcePathError,
    },
}

/// File paths named by a unified diff (`---`/`+++` header pairs) or an
/// apply_patch envelope (`*** Update File:` and friends).
fn patch_targets(patch: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut lines = patch.lines().peekable();

    while let Some(line) = lines.next() {
        if let Some(old) = line.strip_prefix("--- ")
            && let Some(new) = lines.peek().and_then(|next| next.strip_prefix("+++ "))
        {
            out.extend([old, new].into_iter().filter_map(diff_header_path));
            lines.next();
            continue;
        }
        if let Some(path) = PATCH_FILE_MARKERS
            .iter()
            .find_map(|marker| line.strip_prefix(marker))
            .map(str::trim)
            .filter(|p| !p.is_empty())
        {
            out.push(path);
        }
    }

    out
}

fn diff_header_path(header: &str) -> Option<&str> {
    // Strip git's optional tab-separated timestamp.
    let path = header.split('\t').next().unwrap_or(header).trim();
    if path.is_empty() || path == "/dev/null" {
        return None;
    }
    Some(
        path.strip_prefix("a/")
            .or_else(|| path.strip_prefix("b/"))
            .unwrap_or(path),
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    SelectIntent,
    NonMutating,
    Mutating,
}

/// Maps action names to their governance class.
#[derive(Debug, Clone)]
pub struct ActionCatalog {
    select_intent: String,
    mutating: HashSet<String>,
}

impl ActionCatalog {
    #[must_use]
    pub fn new(select_intent: impl Into<String>, mutating: impl IntoIterator<Item = String>) -> Self {
        Self {
            select_intent: select_intent.into(),
            mutating: mutating.into_iter().collect(),
        }
    }

    #[must_use]
    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(
            settings.select_intent_action.clone(),
            settings.mutating_actions.iter().cloned(),
        )
    }

    #[must_use]
    pub fn kind(&self, action: &Action) -> ActionKind {
        if action.name == self.select_intent {
            ActionKind::SelectIntent
        } else if self.mutating.contains(&action.name) {
            ActionKind::Mutating
        } else {
            ActionKind::NonMutating
        }
    }
}
