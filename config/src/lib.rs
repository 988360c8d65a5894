//! Configuration loading for Warden.
//!
//! Two documents are read from the workspace:
//!
//! - `.warden/config.toml`: governance settings (all sections optional)
//! - the intent document, found via an ordered candidate list (see [`intents`])

pub mod intents;

use serde::Deserialize;
use std::{
    env, fs,
    path::{Path, PathBuf},
};
use thiserror::Error;

pub use intents::{
    CandidateFailure, DocumentFormat, IntentDocument, IntentSource, IntentSourceError,
    intent_candidates, load_intent_document, persist_intent_status,
};

/// Directory (relative to the workspace root) that holds Warden state.
pub const STATE_DIR: &str = ".warden";

pub const DEFAULT_LEDGER_PATH: &str = ".warden/ledger.jsonl";
pub const DEFAULT_NOTES_PATH: &str = ".warden/NOTES.md";
pub const DEFAULT_SELECT_INTENT_ACTION: &str = "select_active_intent";
pub const DEFAULT_CLASSIFIER_THRESHOLD: f64 = 0.20;

/// Action names treated as mutating unless `[actions] mutating` overrides them.
pub const DEFAULT_MUTATING_ACTIONS: &[&str] = &[
    "write_file",
    "write_to_file",
    "edit_file",
    "apply_patch",
    "apply_diff",
    "insert_content",
    "search_and_replace",
    "delete_file",
];

// Default value function for serde (bool::default() is false, so only true needs a fn)
pub(crate) const fn default_true() -> bool {
    true
}

#[derive(Debug, Default, Deserialize)]
pub struct WardenConfig {
    pub ledger: Option<LedgerConfig>,
    pub intents: Option<IntentsConfig>,
    pub enforcement: Option<EnforcementConfig>,
    pub classifier: Option<ClassifierConfig>,
    pub actions: Option<ActionsConfig>,
    pub knowledge: Option<KnowledgeConfig>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

impl ConfigError {
    pub fn path(&self) -> &PathBuf {
        match self {
            ConfigError::Read { path, .. } | ConfigError::Parse { path, .. } => path,
        }
    }
}

/// Mutation ledger location.
///
/// ```toml
/// [ledger]
/// path = ".warden/ledger.jsonl"
/// record_revision = true
/// ```
#[derive(Debug, Default, Deserialize)]
pub struct LedgerConfig {
    pub path: Option<String>,
    /// Stamp entries with the current VCS revision. Default: true.
    #[serde(default = "default_true")]
    pub record_revision: bool,
}

/// Intent document override; tried before the built-in candidates.
#[derive(Debug, Default, Deserialize)]
pub struct IntentsConfig {
    pub path: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EnforcementMode {
    /// Mutations without an active intent are blocked.
    #[default]
    Strict,
    /// Mutations without an active intent proceed and are ledgered unlinked.
    Unlinked,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UnresolvedTargetPolicy {
    /// Let the action through without scope or freshness checks.
    #[default]
    Allow,
    /// Reject the action as out of scope.
    Block,
}

/// ```toml
/// [enforcement]
/// mode = "strict"
/// unresolved_targets = "allow"
/// track_reads = true
/// ```
#[derive(Debug, Deserialize)]
pub struct EnforcementConfig {
    #[serde(default)]
    pub mode: EnforcementMode,
    #[serde(default)]
    pub unresolved_targets: UnresolvedTargetPolicy,
    /// Record an observation for every non-mutating action. Default: true.
    #[serde(default = "default_true")]
    pub track_reads: bool,
}

impl Default for EnforcementConfig {
    fn default() -> Self {
        Self {
            mode: EnforcementMode::Strict,
            unresolved_targets: UnresolvedTargetPolicy::Allow,
            track_reads: true,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ClassifierConfig {
    /// Relative line delta above which a change counts as intent evolution.
    pub threshold: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ActionsConfig {
    pub select_intent: Option<String>,
    pub mutating: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
pub struct KnowledgeConfig {
    pub path: Option<String>,
}

/// Settings with every default applied and paths resolved against the workspace.
#[derive(Debug, Clone)]
pub struct Settings {
    pub root: PathBuf,
    pub ledger_path: PathBuf,
    pub record_revision: bool,
    pub intents_override: Option<PathBuf>,
    pub enforcement: EnforcementMode,
    pub unresolved_targets: UnresolvedTargetPolicy,
    pub track_reads: bool,
    pub classifier_threshold: f64,
    pub select_intent_action: String,
    pub mutating_actions: Vec<String>,
    pub notes_path: PathBuf,
}

impl Settings {
    #[must_use]
    pub fn defaults(root: impl Into<PathBuf>) -> Self {
        Self::from_config(root, None)
    }

    #[must_use]
    pub fn from_config(root: impl Into<PathBuf>, config: Option<&WardenConfig>) -> Self {
        let root = root.into();
        let resolve = |raw: &str| {
            let expanded = PathBuf::from(expand_env_vars(raw));
            if expanded.is_absolute() {
                expanded
            } else {
                root.join(expanded)
            }
        };

        let ledger = config.and_then(|c| c.ledger.as_ref());
        let enforcement = config
            .and_then(|c| c.enforcement.as_ref())
            .map_or_else(EnforcementConfig::default, |e| EnforcementConfig {
                mode: e.mode,
                unresolved_targets: e.unresolved_targets,
                track_reads: e.track_reads,
            });
        let actions = config.and_then(|c| c.actions.as_ref());

        let threshold = config
            .and_then(|c| c.classifier.as_ref())
            .and_then(|c| c.threshold)
            .filter(|t| {
                let valid = t.is_finite() && *t >= 0.0;
                if !valid {
                    tracing::warn!("Ignoring invalid classifier threshold {t}");
                }
                valid
            })
            .unwrap_or(DEFAULT_CLASSIFIER_THRESHOLD);

        Self {
            ledger_path: resolve(
                ledger
                    .and_then(|l| l.path.as_deref())
                    .unwrap_or(DEFAULT_LEDGER_PATH),
            ),
            record_revision: ledger.is_none_or(|l| l.record_revision),
            intents_override: config
                .and_then(|c| c.intents.as_ref())
                .and_then(|i| i.path.as_deref())
                .map(resolve),
            enforcement: enforcement.mode,
            unresolved_targets: enforcement.unresolved_targets,
            track_reads: enforcement.track_reads,
            classifier_threshold: threshold,
            select_intent_action: actions
                .and_then(|a| a.select_intent.clone())
                .unwrap_or_else(|| DEFAULT_SELECT_INTENT_ACTION.to_string()),
            mutating_actions: actions
                .and_then(|a| a.mutating.clone())
                .unwrap_or_else(|| {
                    DEFAULT_MUTATING_ACTIONS
                        .iter()
                        .map(ToString::to_string)
                        .collect()
                }),
            notes_path: resolve(
                config
                    .and_then(|c| c.knowledge.as_ref())
                    .and_then(|k| k.path.as_deref())
                    .unwrap_or(DEFAULT_NOTES_PATH),
            ),
            root,
        }
    }

    /// Load `.warden/config.toml` (or the user-level fallback) and resolve it.
    ///
    /// The root is made absolute first so absolute action paths can be
    /// matched against it.
    pub fn load(root: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let root = absolute_root(root.into());
        let config = WardenConfig::load(&root)?;
        Ok(Self::from_config(root, config.as_ref()))
    }
}

/// Canonical form of `root`, or a lexically absolute one when it does not exist yet.
fn absolute_root(root: PathBuf) -> PathBuf {
    fs::canonicalize(&root)
        .or_else(|_| std::path::absolute(&root))
        .unwrap_or(root)
}

pub fn expand_env_vars(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let var = &after[..end];
                if !var.is_empty() {
                    out.push_str(&env::var(var).unwrap_or_default());
                }
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);

    out
}

impl WardenConfig {
    /// First existing file among [`config_candidates`] wins; later ones are not merged.
    pub fn load(root: &Path) -> Result<Option<Self>, ConfigError> {
        let Some(path) = config_candidates(root).into_iter().find(|p| p.exists()) else {
            return Ok(None);
        };

        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(err) => {
                tracing::warn!("Failed to read config at {:?}: {}", path, err);
                return Err(ConfigError::Read { path, source: err });
            }
        };

        match toml::from_str(&content) {
            Ok(config) => {
                tracing::debug!(path = %path.display(), "Loaded config");
                Ok(Some(config))
            }
            Err(err) => {
                tracing::warn!("Failed to parse config at {:?}: {}", path, err);
                Err(ConfigError::Parse { path, source: err })
            }
        }
    }
}

#[must_use]
pub fn config_candidates(root: &Path) -> Vec<PathBuf> {
    let mut candidates = vec![root.join(STATE_DIR).join("config.toml")];
    if let Some(home) = user_state_dir() {
        candidates.push(home.join("config.toml"));
    }
    candidates
}

/// `~/.warden`, when a home directory is known.
#[must_use]
pub fn user_state_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(STATE_DIR))
}
