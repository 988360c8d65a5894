//! Per-resource async locks.
//!
//! The pipeline holds these across freshness check, execution and ledger
//! append so two tasks cannot interleave on the same resource.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use warden_types::ResourcePath;

#[derive(Debug, Default)]
pub struct ResourceLocks {
    slots: Mutex<HashMap<ResourcePath, Arc<AsyncMutex<()>>>>,
}

/// Guards released together on drop.
#[derive(Debug)]
pub struct HeldLocks {
    _guards: Vec<OwnedMutexGuard<()>>,
}

impl ResourceLocks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, resource: &ResourcePath) -> Arc<AsyncMutex<()>> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(slots.entry(resource.clone()).or_default())
    }

    /// Lock every resource in `resources`.
    ///
    /// Locks are taken in sorted order with duplicates removed, so callers
    /// locking overlapping sets cannot deadlock.
    pub async fn acquire(&self, resources: &[ResourcePath]) -> HeldLocks {
        let mut ordered: Vec<&ResourcePath> = resources.iter().collect();
        ordered.sort();
        ordered.dedup();

        let mut guards = Vec::with_capacity(ordered.len());
        for resource in ordered {
            guards.push(self.slot(resource).lock_owned().await);
        }
        HeldLocks { _guards: guards }
    }

    /// Drop slots nobody holds or waits on.
    pub fn prune(&self) {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|_, slot| Arc::strong_count(slot) > 1);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
