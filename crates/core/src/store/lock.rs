//! Per-entity exclusive locks.
//!
//! A read-check-write on an entity runs while holding the entity's lock.
//! `lock_many` takes a whole set of ids at once, so callers that need
//! several entities never hold one while waiting for another.

use std::collections::HashSet;
use std::sync::{Condvar, Mutex, PoisonError};

use uuid::Uuid;

use crate::store::StoreError;

/// Registry of currently held entity locks.
#[derive(Debug, Default)]
pub struct LockRegistry {
    held: Mutex<HashSet<Uuid>>,
    released: Condvar,
}

/// Releases its ids when dropped.
#[derive(Debug)]
pub struct LockGuard<'a> {
    registry: &'a LockRegistry,
    ids: Vec<Uuid>,
}

impl LockGuard<'_> {
    /// Ids held by this guard, sorted.
    #[must_use]
    pub fn ids(&self) -> &[Uuid] {
        &self.ids
    }
}

impl LockRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Blocks until `id` is free and takes it.
    pub fn lock(&self, id: impl Into<Uuid>) -> Result<LockGuard<'_>, StoreError> {
        self.lock_many([id.into()])
    }

    /// Blocks until every id is free and takes them together.
    pub fn lock_many<I>(&self, ids: I) -> Result<LockGuard<'_>, StoreError>
    where
        I: IntoIterator,
        I::Item: Into<Uuid>,
    {
        let mut ids: Vec<Uuid> = ids.into_iter().map(Into::into).collect();
        ids.sort_unstable();
        ids.dedup();

        let mut held = self.held.lock().map_err(|_| poisoned())?;
        while ids.iter().any(|id| held.contains(id)) {
            held = self.released.wait(held).map_err(|_| poisoned())?;
        }
        held.extend(ids.iter().copied());

        Ok(LockGuard {
            registry: self,
            ids,
        })
    }

    /// Returns true if `id` is currently held.
    #[must_use]
    pub fn is_locked(&self, id: impl Into<Uuid>) -> bool {
        let id = id.into();
        self.held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&id)
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        let mut held = self
            .registry
            .held
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        for id in &self.ids {
            held.remove(id);
        }
        drop(held);
        self.registry.released.notify_all();
    }
}

fn poisoned() -> StoreError {
    StoreError::Unavailable("lock registry poisoned".to_string())
}
