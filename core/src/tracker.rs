//! Optimistic concurrency tracking.
//!
//! Each task records a fingerprint of what it read. Before a write, the
//! resource's current fingerprint is compared against that baseline:
//!
//! ```text
//! Unobserved --record_observation--> Observed --check--> Fresh | Stale
//! ```
//!
//! `Unobserved` is reported as such and callers allow it; a missing or
//! unreadable resource that has a baseline is always `Stale`.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use warden_types::{Fingerprint, IntentId, ResourcePath, TaskId};
use warden_utils::fingerprint;

/// What a task saw when it last read a resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    pub resource: ResourcePath,
    pub fingerprint: Fingerprint,
    pub observed_at: DateTime<Utc>,
    pub intent_id: Option<IntentId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    Fresh,
    Stale {
        baseline: Fingerprint,
        /// `None` when the resource is gone or could not be read.
        current: Option<Fingerprint>,
    },
    Unobserved,
}

impl Freshness {
    #[must_use]
    pub fn is_stale(self) -> bool {
        matches!(self, Self::Stale { .. })
    }
}

/// Shared store of per-task observations.
///
/// Only a task's own pipeline writes its entries; the mutex makes teardown
/// concurrent with a check safe (last writer wins).
#[derive(Debug, Default)]
pub struct ConcurrencyTracker {
    observations: Mutex<HashMap<TaskId, HashMap<ResourcePath, Observation>>>,
}

impl ConcurrencyTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record (or overwrite) the baseline for `(task, resource)`.
    pub fn record_observation(
        &self,
        task: &TaskId,
        resource: &ResourcePath,
        content: &[u8],
        intent: Option<&IntentId>,
    ) {
        self.record_fingerprint(task, resource, fingerprint(content), intent);
    }

    /// Post-write refresh: `None` content means the resource was deleted.
    pub fn rebaseline(
        &self,
        task: &TaskId,
        resource: &ResourcePath,
        content: Option<&[u8]>,
        intent: Option<&IntentId>,
    ) {
        match content {
            Some(content) => self.record_observation(task, resource, content, intent),
            None => self.untrack(task, resource),
        }
    }

    pub fn record_fingerprint(
        &self,
        task: &TaskId,
        resource: &ResourcePath,
        fingerprint: Fingerprint,
        intent: Option<&IntentId>,
    ) {
        let observation = Observation {
            resource: resource.clone(),
            fingerprint,
            observed_at: Utc::now(),
            intent_id: intent.cloned(),
        };
        tracing::trace!(task = %task, resource = %resource, fingerprint = %fingerprint.short(), "Recorded observation");
        self.observations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(task.clone())
            .or_default()
            .insert(resource.clone(), observation);
    }

    /// Compare the baseline against `current` content (`None` = missing/unreadable).
    #[must_use]
    pub fn check_freshness(
        &self,
        task: &TaskId,
        resource: &ResourcePath,
        current: Option<&[u8]>,
    ) -> Freshness {
        let Some(baseline) = self.baseline(task, resource) else {
            return Freshness::Unobserved;
        };
        let current = current.map(fingerprint);
        if current == Some(baseline) {
            Freshness::Fresh
        } else {
            Freshness::Stale { baseline, current }
        }
    }

    #[must_use]
    pub fn baseline(&self, task: &TaskId, resource: &ResourcePath) -> Option<Fingerprint> {
        self.observation(task, resource).map(|o| o.fingerprint)
    }

    #[must_use]
    pub fn observation(&self, task: &TaskId, resource: &ResourcePath) -> Option<Observation> {
        self.observations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(task)
            .and_then(|per_task| per_task.get(resource))
            .cloned()
    }

    pub fn untrack(&self, task: &TaskId, resource: &ResourcePath) {
        let mut map = self
            .observations
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(per_task) = map.get_mut(task) {
            per_task.remove(resource);
            if per_task.is_empty() {
                map.remove(task);
            }
        }
    }

    /// Drop every observation owned by `task`.
    pub fn clear_task(&self, task: &TaskId) {
        let removed = self
            .observations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(task);
        if let Some(per_task) = removed {
            tracing::debug!(task = %task, count = per_task.len(), "Cleared task observations");
        }
    }

    #[must_use]
    pub fn tracked_count(&self, task: &TaskId) -> usize {
        self.observations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(task)
            .map_or(0, HashMap::len)
    }
}
