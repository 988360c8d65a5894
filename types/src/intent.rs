use serde::{Deserialize, Serialize};

use crate::IntentId;

/// Lifecycle of an intent within a session.
///
/// `Declared -> Active -> Completed`. Intents are never removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentStatus {
    #[default]
    Declared,
    Active,
    Completed,
}

impl IntentStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Declared => "declared",
            Self::Active => "active",
            Self::Completed => "completed",
        }
    }
}

/// A declared unit of business scope.
///
/// `owned_scope` is fixed for the lifetime of the value; widening scope means
/// declaring a new intent. `constraints` and `acceptance_criteria` are advisory
/// free text and are never enforced beyond scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Intent {
    pub id: IntentId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub owned_scope: Vec<String>,
    #[serde(default)]
    pub constraints: Vec<String>,
    #[serde(default)]
    pub acceptance_criteria: Vec<String>,
    #[serde(default)]
    pub status: IntentStatus,
}

impl Intent {
    #[must_use]
    pub fn display_name(&self) -> &str {
        if self.name.trim().is_empty() {
            self.id.as_str()
        } else {
            &self.name
        }
    }
}
