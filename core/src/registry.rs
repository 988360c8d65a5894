//! Intent registry: declared intents, scope matching and per-task selection.
//!
//! The intent document is loaded lazily on first use and cached. A failed
//! load is not cached, so fixing the document and retrying works without a
//! restart.
//!
//! Selection is keyed by task: two tasks may hold different active intents at
//! the same time, and selecting replaces a task's previous choice.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use thiserror::Error;
use warden_config::{IntentSource, IntentSourceError, load_intent_document, persist_intent_status};
use warden_types::{Intent, IntentId, IntentStatus, ResourcePath, TaskId};

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("intent configuration unavailable: {0}")]
    ConfigUnavailable(#[source] IntentSourceError),
    #[error("intent '{requested}' not found")]
    IntentNotFound {
        requested: String,
        valid_ids: Vec<IntentId>,
    },
    #[error("intent '{intent}' has invalid scope pattern '{pattern}': {message}")]
    InvalidScope {
        intent: IntentId,
        pattern: String,
        message: String,
    },
    #[error("failed to persist intent status: {0}")]
    Persist(#[source] IntentSourceError),
}

/// Compiled owned-scope patterns.
///
/// Case-sensitive; `*` stays within one path segment, `**` crosses segments.
#[derive(Debug, Clone)]
pub struct ScopeMatcher {
    set: GlobSet,
}

impl ScopeMatcher {
    pub fn new(patterns: &[String]) -> Result<Self, (String, globset::Error)> {
        let mut builder = GlobSetBuilder::new();
        for pat in patterns {
            let glob = GlobBuilder::new(pat.trim_start_matches("./"))
                .case_insensitive(false)
                .literal_separator(true)
                .build()
                .map_err(|e| (pat.clone(), e))?;
            builder.add(glob);
        }
        let set = builder.build().map_err(|e| (String::new(), e))?;
        Ok(Self { set })
    }

    #[must_use]
    pub fn matches(&self, resource: &ResourcePath) -> bool {
        self.set.is_match(resource.as_str())
    }
}

#[derive(Debug)]
struct LoadedIntents {
    source: Option<IntentSource>,
    intents: Vec<Arc<Intent>>,
    scopes: HashMap<IntentId, ScopeMatcher>,
}

impl LoadedIntents {
    fn build(intents: Vec<Intent>, source: Option<IntentSource>) -> Result<Self, RegistryError> {
        let mut scopes = HashMap::with_capacity(intents.len());
        for intent in &intents {
            let matcher = ScopeMatcher::new(&intent.owned_scope).map_err(|(pattern, e)| {
                RegistryError::InvalidScope {
                    intent: intent.id.clone(),
                    pattern,
                    message: e.to_string(),
                }
            })?;
            scopes.insert(intent.id.clone(), matcher);
        }
        Ok(Self {
            source,
            intents: intents.into_iter().map(Arc::new).collect(),
            scopes,
        })
    }

    fn get(&self, id: &IntentId) -> Option<&Arc<Intent>> {
        self.intents.iter().find(|i| &i.id == id)
    }
}

#[derive(Debug)]
enum Origin {
    Workspace {
        root: PathBuf,
        override_path: Option<PathBuf>,
    },
    Fixed(Vec<Intent>),
}

#[derive(Debug)]
pub struct IntentRegistry {
    origin: Origin,
    loaded: Mutex<Option<Arc<LoadedIntents>>>,
    active: Mutex<HashMap<TaskId, IntentId>>,
    completed: Mutex<HashSet<IntentId>>,
}

impl IntentRegistry {
    /// Registry backed by the intent document under `root`.
    #[must_use]
    pub fn for_workspace(root: impl Into<PathBuf>, override_path: Option<PathBuf>) -> Self {
        Self::with_origin(Origin::Workspace {
            root: root.into(),
            override_path,
        })
    }

    /// Registry over a fixed, in-memory set of intents.
    #[must_use]
    pub fn from_intents(intents: Vec<Intent>) -> Self {
        Self::with_origin(Origin::Fixed(intents))
    }

    fn with_origin(origin: Origin) -> Self {
        Self {
            origin,
            loaded: Mutex::new(None),
            active: Mutex::new(HashMap::new()),
            completed: Mutex::new(HashSet::new()),
        }
    }

    fn load(&self) -> Result<Arc<LoadedIntents>, RegistryError> {
        let mut slot = self.loaded.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(loaded) = slot.as_ref() {
            return Ok(Arc::clone(loaded));
        }
        let loaded = Arc::new(self.read_origin()?);
        *slot = Some(Arc::clone(&loaded));
        Ok(loaded)
    }

    fn read_origin(&self) -> Result<LoadedIntents, RegistryError> {
        match &self.origin {
            Origin::Workspace {
                root,
                override_path,
            } => {
                let mut source = load_intent_document(root, override_path.as_deref())
                    .map_err(RegistryError::ConfigUnavailable)?;
                let intents = std::mem::take(&mut source.intents);
                LoadedIntents::build(intents, Some(source))
            }
            Origin::Fixed(intents) => LoadedIntents::build(intents.clone(), None),
        }
    }

    /// Re-read the intent document.
    ///
    /// On failure the previously loaded intents stay in effect. Task
    /// selections survive when the selected id still exists.
    pub fn reload(&self) -> Result<(), RegistryError> {
        let fresh = Arc::new(self.read_origin()?);
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|_, id| fresh.get(id).is_some());
        tracing::debug!(count = fresh.intents.len(), "Reloaded intent document");
        *self.loaded.lock().unwrap_or_else(PoisonError::into_inner) = Some(fresh);
        Ok(())
    }

    pub fn list_intents(&self) -> Result<Vec<Arc<Intent>>, RegistryError> {
        Ok(self.load()?.intents.clone())
    }

    pub fn get(&self, id: &IntentId) -> Result<Option<Arc<Intent>>, RegistryError> {
        Ok(self.load()?.get(id).cloned())
    }

    fn is_completed(&self, intent: &Intent) -> bool {
        intent.status == IntentStatus::Completed
            || self
                .completed
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .contains(&intent.id)
    }

    /// Make `requested` the active intent for `task`.
    ///
    /// Replaces any earlier selection; selecting the current intent again is a no-op.
    pub fn select_intent(&self, task: &TaskId, requested: &str) -> Result<Arc<Intent>, RegistryError> {
        let loaded = self.load()?;
        let found = IntentId::new(requested)
            .ok()
            .and_then(|id| loaded.get(&id).cloned())
            .filter(|intent| !self.is_completed(intent));

        let Some(intent) = found else {
            let valid_ids = loaded
                .intents
                .iter()
                .filter(|i| !self.is_completed(i))
                .map(|i| i.id.clone())
                .collect();
            tracing::info!(task = %task, requested, "Rejected unknown intent selection");
            return Err(RegistryError::IntentNotFound {
                requested: requested.to_string(),
                valid_ids,
            });
        };

        let previous = self
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(task.clone(), intent.id.clone());
        if previous.as_ref() != Some(&intent.id) {
            tracing::info!(
                task = %task,
                intent = %intent.id,
                previous = previous.as_ref().map(IntentId::as_str),
                "Selected active intent"
            );
        }
        Ok(intent)
    }

    #[must_use]
    pub fn active_intent(&self, task: &TaskId) -> Option<Arc<Intent>> {
        let id = self
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(task)
            .cloned()?;
        let loaded = self.load().ok()?;
        loaded.get(&id).cloned()
    }

    /// Whether `resource` falls inside the owned scope of `intent`.
    #[must_use]
    pub fn is_in_scope(&self, intent: &Intent, resource: &ResourcePath) -> bool {
        if let Ok(loaded) = self.load()
            && let Some(matcher) = loaded.scopes.get(&intent.id)
        {
            return matcher.matches(resource);
        }
        ScopeMatcher::new(&intent.owned_scope).is_ok_and(|m| m.matches(resource))
    }

    /// Scope check against the task's active intent; false when none is selected.
    #[must_use]
    pub fn task_in_scope(&self, task: &TaskId, resource: &ResourcePath) -> bool {
        self.active_intent(task)
            .is_some_and(|intent| self.is_in_scope(&intent, resource))
    }

    /// Forget `task`'s selection.
    pub fn release_task(&self, task: &TaskId) {
        let removed = self
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(task);
        if let Some(id) = removed {
            tracing::debug!(task = %task, intent = %id, "Released active intent");
        }
    }

    /// Mark an intent completed and release every task holding it.
    pub fn complete_intent(&self, id: &IntentId) -> Result<(), RegistryError> {
        let loaded = self.load()?;
        if loaded.get(id).is_none() {
            return Err(RegistryError::IntentNotFound {
                requested: id.to_string(),
                valid_ids: loaded.intents.iter().map(|i| i.id.clone()).collect(),
            });
        }
        self.completed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.clone());
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|_, held| held != id);
        tracing::info!(intent = %id, "Intent completed");
        Ok(())
    }

    /// Write the intent's current status back into its source document.
    ///
    /// No-op for registries built with [`IntentRegistry::from_intents`].
    pub fn persist_status(&self, id: &IntentId) -> Result<(), RegistryError> {
        let loaded = self.load()?;
        let Some(status) = self.status(id) else {
            return Err(RegistryError::IntentNotFound {
                requested: id.to_string(),
                valid_ids: loaded.intents.iter().map(|i| i.id.clone()).collect(),
            });
        };
        match &loaded.source {
            Some(source) => persist_intent_status(source, id, status).map_err(RegistryError::Persist),
            None => Ok(()),
        }
    }

    /// Derived lifecycle status; `None` for unknown ids or when loading fails.
    #[must_use]
    pub fn status(&self, id: &IntentId) -> Option<IntentStatus> {
        let loaded = self.load().ok()?;
        let intent = loaded.get(id)?;
        if self.is_completed(intent) {
            return Some(IntentStatus::Completed);
        }
        let held = self
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .any(|held| held == id);
        Some(if held {
            IntentStatus::Active
        } else {
            intent.status
        })
    }

    /// Path of the loaded intent document, if any.
    #[must_use]
    pub fn source_path(&self) -> Option<PathBuf> {
        self.load()
            .ok()
            .and_then(|loaded| loaded.source.as_ref().map(|s| s.path.clone()))
    }
}
