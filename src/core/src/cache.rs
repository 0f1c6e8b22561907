//! Per-type subject data caching over the data store
//!
//! [`SubjectDataReference`] is the mutable cell holding the current
//! immutable data for one subject and slot; [`SubjectDataCache`] owns
//! one reference per cached identifier and keeps them consistent with
//! the store.

use crate::error::Result;
use crate::listener::{ListenerHandle, ListenerRegistry};
use crate::segment::ImmutableSubjectData;
use crate::store::DataStore;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Notified after a reference commits new data
pub trait SubjectDataUpdateListener: Send + Sync {
    fn data_updated(&self, new_data: &Arc<ImmutableSubjectData>);
}

/// Mutable cell wrapping the current immutable data for one
/// subject+slot
///
/// Supports atomic read-modify-write with compare-and-retry semantics
/// and notifies listeners on every committed change.
pub struct SubjectDataReference {
    data: RwLock<Arc<ImmutableSubjectData>>,
    stale: AtomicBool,
    listeners: ListenerRegistry<dyn SubjectDataUpdateListener>,
}

impl SubjectDataReference {
    pub fn new(initial: Arc<ImmutableSubjectData>) -> Self {
        Self {
            data: RwLock::new(initial),
            stale: AtomicBool::new(false),
            listeners: ListenerRegistry::new(),
        }
    }

    /// Current data snapshot
    pub fn get(&self) -> Arc<ImmutableSubjectData> {
        self.data.read().clone()
    }

    /// Apply a pure function with compare-and-retry
    ///
    /// Reads the current value, applies `f`, and commits only if no
    /// concurrent commit happened in between; otherwise retries with
    /// the fresh value. Unchanged results short-circuit without
    /// notifying.
    pub fn update(
        &self,
        f: impl Fn(&ImmutableSubjectData) -> ImmutableSubjectData,
    ) -> Arc<ImmutableSubjectData> {
        loop {
            let current = self.get();
            let updated = f(&current);
            if updated == *current {
                return current;
            }
            let updated = Arc::new(updated);

            {
                let mut slot = self.data.write();
                if !Arc::ptr_eq(&*slot, &current) {
                    continue;
                }
                *slot = updated.clone();
            }

            self.stale.store(false, Ordering::Release);
            self.listeners.notify(|l| l.data_updated(&updated));
            return updated;
        }
    }

    /// Replace the held data outright (e.g., after a store round-trip)
    ///
    /// Notifies listeners only when the value actually changed.
    pub fn replace(&self, new_data: Arc<ImmutableSubjectData>) -> Arc<ImmutableSubjectData> {
        let previous = {
            let mut slot = self.data.write();
            let previous = slot.clone();
            *slot = new_data.clone();
            previous
        };
        self.stale.store(false, Ordering::Release);
        if *previous != *new_data {
            self.listeners.notify(|l| l.data_updated(&new_data));
        }
        previous
    }

    /// Mark the held data as out of date with the store
    pub fn mark_stale(&self) {
        self.stale.store(true, Ordering::Release);
    }

    pub fn is_stale(&self) -> bool {
        self.stale.load(Ordering::Acquire)
    }

    /// Register an update listener; dropping the handle unregisters
    pub fn on_update(&self, listener: Arc<dyn SubjectDataUpdateListener>) -> ListenerHandle {
        self.listeners.register(listener)
    }
}

impl std::fmt::Debug for SubjectDataReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubjectDataReference")
            .field("segments", &self.get().len())
            .field("stale", &self.is_stale())
            .finish()
    }
}

/// Cache statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStats {
    /// Cached subject data references
    pub entries: usize,
}

/// Per-type cache of subject data over the data store
pub struct SubjectDataCache {
    subject_type: String,
    store: Arc<dyn DataStore>,
    entries: DashMap<String, Arc<SubjectDataReference>>,
}

impl SubjectDataCache {
    pub fn new(store: Arc<dyn DataStore>, subject_type: impl Into<String>) -> Self {
        Self {
            subject_type: subject_type.into(),
            store,
            entries: DashMap::new(),
        }
    }

    pub fn subject_type(&self) -> &str {
        &self.subject_type
    }

    /// The reference cell for an identifier, loading from the store on
    /// miss (suspension point)
    pub async fn reference(&self, identifier: &str) -> Result<Arc<SubjectDataReference>> {
        if let Some(reference) = self.entries.get(identifier) {
            return Ok(reference.clone());
        }

        let data = self.store.get_data(&self.subject_type, identifier).await?;
        let reference = Arc::new(SubjectDataReference::new(Arc::new(data)));
        Ok(self
            .entries
            .entry(identifier.to_string())
            .or_insert(reference)
            .clone())
    }

    /// Current data for an identifier, refreshing stale entries from
    /// the store
    pub async fn get(&self, identifier: &str) -> Result<Arc<ImmutableSubjectData>> {
        let reference = self.reference(identifier).await?;
        if reference.is_stale() {
            let fresh = self.store.get_data(&self.subject_type, identifier).await?;
            reference.replace(Arc::new(fresh));
        }
        Ok(reference.get())
    }

    /// Read-modify-write through the store
    ///
    /// Unchanged results short-circuit without a store write. On
    /// success the cache entry is updated and its listeners notified.
    pub async fn update(
        &self,
        identifier: &str,
        f: impl FnOnce(&ImmutableSubjectData) -> ImmutableSubjectData,
    ) -> Result<Arc<ImmutableSubjectData>> {
        let reference = self.reference(identifier).await?;
        let current = reference.get();
        let updated = f(&current);
        if updated == *current {
            return Ok(current);
        }

        let stored = self
            .store
            .set_data(&self.subject_type, identifier, updated)
            .await?;
        let stored = Arc::new(stored);
        reference.replace(stored.clone());
        debug!(
            subject = %format!("{}:{}", self.subject_type, identifier),
            "Subject data updated"
        );
        Ok(stored)
    }

    /// Mark a cached entry as out of date with the store
    pub fn mark_stale(&self, identifier: &str) {
        if let Some(reference) = self.entries.get(identifier) {
            reference.mark_stale();
        }
    }

    /// Drop a cached entry and all listeners registered on it
    pub fn invalidate(&self, identifier: &str) {
        self.entries.remove(identifier);
    }

    /// Drop every cached entry
    pub fn invalidate_all(&self) {
        self.entries.clear();
    }

    /// The cached reference, if any, without touching the store
    pub fn cached(&self, identifier: &str) -> Option<Arc<SubjectDataReference>> {
        self.entries.get(identifier).map(|r| r.clone())
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
        }
    }
}

impl std::fmt::Debug for SubjectDataCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubjectDataCache")
            .field("subject_type", &self.subject_type)
            .field("entries", &self.entries.len())
            .finish()
    }
}
