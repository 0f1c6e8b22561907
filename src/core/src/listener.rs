//! Listener registration with scoped, drop-released handles
//!
//! Registration returns a [`ListenerHandle`] that unregisters on drop,
//! so caches never accumulate listeners for consumers that went away.
//! A panicking listener is isolated from the notification path.

use dashmap::DashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::warn;

/// Concurrent set of listeners of one trait-object type
pub struct ListenerRegistry<T: ?Sized> {
    listeners: Arc<DashMap<u64, Arc<T>>>,
    next_id: AtomicU64,
}

impl<T: ?Sized + Send + Sync + 'static> ListenerRegistry<T> {
    pub fn new() -> Self {
        Self {
            listeners: Arc::new(DashMap::new()),
            next_id: AtomicU64::new(0),
        }
    }

    /// Register a listener; dropping the handle unregisters it
    pub fn register(&self, listener: Arc<T>) -> ListenerHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners.insert(id, listener);

        let map = Arc::downgrade(&self.listeners);
        ListenerHandle {
            unregister: Some(Box::new(move || {
                if let Some(map) = map.upgrade() {
                    map.remove(&id);
                }
            })),
        }
    }

    /// Invoke `f` for every registered listener
    ///
    /// Listener references are collected up front so no map shard is
    /// held during callbacks, and each invocation runs under
    /// `catch_unwind`.
    pub fn notify(&self, mut f: impl FnMut(&T)) {
        let targets: Vec<Arc<T>> = self.listeners.iter().map(|e| e.value().clone()).collect();
        for listener in targets {
            if catch_unwind(AssertUnwindSafe(|| f(&listener))).is_err() {
                warn!("Listener panicked during notification; continuing");
            }
        }
    }

    /// Drop every registration
    pub fn clear(&self) {
        self.listeners.clear();
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }
}

impl<T: ?Sized + Send + Sync + 'static> Default for ListenerRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ?Sized> fmt::Debug for ListenerRegistry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

/// Capability for one listener registration
///
/// Unregisters on drop. Use [`detach`](Self::detach) for registrations
/// that should outlive the handle.
pub struct ListenerHandle {
    unregister: Option<Box<dyn FnOnce() + Send>>,
}

impl ListenerHandle {
    /// Unregister now instead of at drop time
    pub fn release(mut self) {
        if let Some(unregister) = self.unregister.take() {
            unregister();
        }
    }

    /// Keep the registration alive for the registry's lifetime
    pub fn detach(mut self) {
        self.unregister = None;
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        if let Some(unregister) = self.unregister.take() {
            unregister();
        }
    }
}

impl fmt::Debug for ListenerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerHandle")
            .field("active", &self.unregister.is_some())
            .finish()
    }
}
