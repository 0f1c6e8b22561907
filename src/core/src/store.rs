//! Data store boundary and the in-memory reference implementation
//!
//! The store is the single source of truth for persistent subject data,
//! rank ladders, and context inheritance. It must notify registered
//! listeners about every committed change, including changes made
//! through a different cache instance over the same backend.

use crate::context::ContextInheritance;
use crate::error::Result;
use crate::ladder::RankLadder;
use crate::listener::{ListenerHandle, ListenerRegistry};
use crate::segment::ImmutableSubjectData;
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::Arc;

/// Change notifications pushed by a [`DataStore`]
pub trait DataStoreListener: Send + Sync {
    /// A subject's persistent data changed
    fn data_changed(&self, subject_type: &str, identifier: &str);

    /// A rank ladder changed
    fn ladder_changed(&self, _name: &str) {}

    /// The context inheritance configuration changed
    fn context_inheritance_changed(&self) {}
}

/// Persistence boundary consumed by the engine
///
/// Implementations must serialize or safely interleave concurrent
/// writes per identifier. Transient failures surface as
/// [`StratumError::Store`](crate::StratumError::Store); the engine does
/// not retry.
#[async_trait]
pub trait DataStore: Send + Sync {
    /// Load a subject's data; unknown subjects yield empty data
    async fn get_data(&self, subject_type: &str, identifier: &str)
        -> Result<ImmutableSubjectData>;

    /// Persist a subject's data, returning the stored value
    ///
    /// Storing empty data unregisters the subject.
    async fn set_data(
        &self,
        subject_type: &str,
        identifier: &str,
        data: ImmutableSubjectData,
    ) -> Result<ImmutableSubjectData>;

    /// Whether the subject has stored data
    async fn is_registered(&self, subject_type: &str, identifier: &str) -> Result<bool>;

    /// All identifiers with stored data for a type
    async fn get_all_identifiers(&self, subject_type: &str) -> Result<Vec<String>>;

    /// Load a rank ladder; unknown names yield an empty ladder
    async fn get_rank_ladder(&self, name: &str) -> Result<RankLadder>;

    /// Persist a rank ladder, returning the stored value
    async fn set_rank_ladder(&self, name: &str, ladder: RankLadder) -> Result<RankLadder>;

    /// Current context inheritance configuration
    async fn get_context_inheritance(&self) -> Result<ContextInheritance>;

    /// Replace the context inheritance configuration
    async fn set_context_inheritance(
        &self,
        inheritance: ContextInheritance,
    ) -> Result<ContextInheritance>;

    /// Register for change notifications
    fn register_listener(&self, listener: Arc<dyn DataStoreListener>) -> ListenerHandle;
}

/// In-memory reference store
///
/// Backs tests and embedded use; notifies listeners synchronously after
/// each committed write.
#[derive(Debug, Default)]
pub struct MemoryDataStore {
    subjects: DashMap<(String, String), ImmutableSubjectData>,
    ladders: DashMap<String, RankLadder>,
    context_inheritance: RwLock<ContextInheritance>,
    listeners: ListenerRegistry<dyn DataStoreListener>,
}

impl MemoryDataStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(subject_type: &str, identifier: &str) -> (String, String) {
        (subject_type.to_string(), identifier.to_string())
    }
}

#[async_trait]
impl DataStore for MemoryDataStore {
    async fn get_data(
        &self,
        subject_type: &str,
        identifier: &str,
    ) -> Result<ImmutableSubjectData> {
        Ok(self
            .subjects
            .get(&Self::key(subject_type, identifier))
            .map(|d| d.clone())
            .unwrap_or_default())
    }

    async fn set_data(
        &self,
        subject_type: &str,
        identifier: &str,
        data: ImmutableSubjectData,
    ) -> Result<ImmutableSubjectData> {
        let key = Self::key(subject_type, identifier);
        if data.is_empty() {
            self.subjects.remove(&key);
        } else {
            self.subjects.insert(key, data.clone());
        }
        self.listeners
            .notify(|l| l.data_changed(subject_type, identifier));
        Ok(data)
    }

    async fn is_registered(&self, subject_type: &str, identifier: &str) -> Result<bool> {
        Ok(self
            .subjects
            .contains_key(&Self::key(subject_type, identifier)))
    }

    async fn get_all_identifiers(&self, subject_type: &str) -> Result<Vec<String>> {
        let mut identifiers: Vec<String> = self
            .subjects
            .iter()
            .filter(|e| e.key().0 == subject_type)
            .map(|e| e.key().1.clone())
            .collect();
        identifiers.sort();
        Ok(identifiers)
    }

    async fn get_rank_ladder(&self, name: &str) -> Result<RankLadder> {
        Ok(self
            .ladders
            .get(name)
            .map(|l| l.clone())
            .unwrap_or_else(|| RankLadder::new(name)))
    }

    async fn set_rank_ladder(&self, name: &str, ladder: RankLadder) -> Result<RankLadder> {
        self.ladders.insert(name.to_string(), ladder.clone());
        self.listeners.notify(|l| l.ladder_changed(name));
        Ok(ladder)
    }

    async fn get_context_inheritance(&self) -> Result<ContextInheritance> {
        Ok(self.context_inheritance.read().clone())
    }

    async fn set_context_inheritance(
        &self,
        inheritance: ContextInheritance,
    ) -> Result<ContextInheritance> {
        *self.context_inheritance.write() = inheritance.clone();
        self.listeners.notify(|l| l.context_inheritance_changed());
        Ok(inheritance)
    }

    fn register_listener(&self, listener: Arc<dyn DataStoreListener>) -> ListenerHandle {
        self.listeners.register(listener)
    }
}
