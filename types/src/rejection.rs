//! Structured, agent-consumable block results.
//!
//! A rejection is a value, not an error: the calling agent is expected to
//! read `kind`, follow `hint`, and retry.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::{Fingerprint, IntentId, ResourcePath};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BlockKind {
    NoActiveIntent,
    OutOfScope,
    StaleResource,
    IntentNotFound,
}

impl BlockKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NoActiveIntent => "NO_ACTIVE_INTENT",
            Self::OutOfScope => "OUT_OF_SCOPE",
            Self::StaleResource => "STALE_RESOURCE",
            Self::IntentNotFound => "INTENT_NOT_FOUND",
        }
    }

    /// Remediation shown alongside every block of this kind.
    #[must_use]
    pub const fn hint(self) -> &'static str {
        match self {
            Self::NoActiveIntent => {
                "Call select_active_intent with a declared intent id before mutating files."
            }
            Self::OutOfScope => {
                "Pick a file inside the active intent's owned scope, or select an intent that owns it."
            }
            Self::StaleResource => "Re-read the file before writing; it changed since you last read it.",
            Self::IntentNotFound => "Choose one of the listed intent ids.",
        }
    }
}

impl fmt::Display for BlockKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rejection {
    pub kind: BlockKind,
    pub message: String,
    pub hint: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub details: Value,
}

impl Rejection {
    fn new(kind: BlockKind, message: String, details: Value) -> Self {
        Self {
            kind,
            message,
            hint: kind.hint().to_string(),
            details,
        }
    }

    #[must_use]
    pub fn no_active_intent(resource: Option<&ResourcePath>) -> Self {
        let message = match resource {
            Some(resource) => format!("No active intent: refusing to modify {resource}"),
            None => "No active intent: mutating actions require a selected intent".to_string(),
        };
        Self::new(
            BlockKind::NoActiveIntent,
            message,
            json!({ "resource": resource.map(ResourcePath::as_str) }),
        )
    }

    #[must_use]
    pub fn out_of_scope(
        intent: Option<&IntentId>,
        resource: Option<&ResourcePath>,
        scope: &[String],
    ) -> Self {
        let owner = intent.map_or_else(|| "the session".to_string(), |id| format!("intent {id}"));
        let message = match resource {
            Some(resource) => format!("{resource} is outside the owned scope of {owner}"),
            None => format!("Action target could not be resolved against the scope of {owner}"),
        };
        Self::new(
            BlockKind::OutOfScope,
            message,
            json!({
                "intent_id": intent.map(IntentId::as_str),
                "resource": resource.map(ResourcePath::as_str),
                "owned_scope": scope,
            }),
        )
    }

    #[must_use]
    pub fn stale_resource(
        resource: &ResourcePath,
        baseline: Option<Fingerprint>,
        current: Option<Fingerprint>,
    ) -> Self {
        let message = match (baseline, current) {
            (Some(baseline), Some(current)) => format!(
                "{resource} changed since it was read (baseline {}, now {})",
                baseline.short(),
                current.short()
            ),
            (Some(_), None) => format!("{resource} was read but is now missing or unreadable"),
            (None, _) => format!("{resource} appeared after it was checked as absent"),
        };
        Self::new(
            BlockKind::StaleResource,
            message,
            json!({
                "resource": resource.as_str(),
                "baseline": baseline.map(|fp| fp.to_string()),
                "current": current.map(|fp| fp.to_string()),
            }),
        )
    }

    #[must_use]
    pub fn intent_not_found(requested: &str, valid_ids: &[IntentId]) -> Self {
        let valid: Vec<&str> = valid_ids.iter().map(IntentId::as_str).collect();
        let message = if valid.is_empty() {
            format!("Intent '{requested}' not found; no selectable intents are declared")
        } else {
            format!(
                "Intent '{requested}' not found. Valid ids: {}",
                valid.join(", ")
            )
        };
        Self::new(
            BlockKind::IntentNotFound,
            message,
            json!({ "requested": requested, "valid_ids": valid }),
        )
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {} ({})", self.kind, self.message, self.hint)
    }
}
