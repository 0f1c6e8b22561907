//! Ordered rank ladders with functional updates and a store-backed cache

use crate::error::Result;
use crate::store::DataStore;
use crate::types::SubjectRef;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// An ordered list of subjects, lowest rank first
///
/// All operations are functional: they return a new ladder and leave
/// the receiver untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankLadder {
    name: String,
    ranks: Vec<SubjectRef>,
}

impl RankLadder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ranks: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Ranks from lowest to highest
    pub fn ranks(&self) -> &[SubjectRef] {
        &self.ranks
    }

    pub fn contains(&self, subject: &SubjectRef) -> bool {
        self.ranks.contains(subject)
    }

    /// Index of a subject on the ladder, lowest rank = 0
    pub fn position(&self, subject: &SubjectRef) -> Option<usize> {
        self.ranks.iter().position(|r| r == subject)
    }

    /// Move a subject one rank up; an absent subject joins at the
    /// lowest rank, the highest rank stays put
    pub fn promote(&self, subject: &SubjectRef) -> Self {
        let mut next = self.clone();
        match next.position(subject) {
            None => next.ranks.insert(0, subject.clone()),
            Some(index) if index + 1 < next.ranks.len() => next.ranks.swap(index, index + 1),
            Some(_) => {}
        }
        next
    }

    /// Move a subject one rank down; the lowest rank drops off the
    /// ladder, an absent subject is a no-op
    pub fn demote(&self, subject: &SubjectRef) -> Self {
        let mut next = self.clone();
        match next.position(subject) {
            Some(0) => {
                next.ranks.remove(0);
            }
            Some(index) => next.ranks.swap(index, index - 1),
            None => {}
        }
        next
    }

    /// Insert a subject at an index, clamped to the ladder's length
    pub fn add_at(&self, index: usize, subject: SubjectRef) -> Self {
        let mut next = self.remove(&subject);
        let index = index.min(next.ranks.len());
        next.ranks.insert(index, subject);
        next
    }

    /// Append a subject at the highest rank
    pub fn add(&self, subject: SubjectRef) -> Self {
        let mut next = self.remove(&subject);
        next.ranks.push(subject);
        next
    }

    /// Remove a subject from the ladder
    pub fn remove(&self, subject: &SubjectRef) -> Self {
        let mut next = self.clone();
        next.ranks.retain(|r| r != subject);
        next
    }

    pub fn is_empty(&self) -> bool {
        self.ranks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ranks.len()
    }
}

/// Store-backed ladder cache, invalidated the same way as subject data
pub struct RankLadderCache {
    store: Arc<dyn DataStore>,
    entries: DashMap<String, Arc<RankLadder>>,
}

impl RankLadderCache {
    pub fn new(store: Arc<dyn DataStore>) -> Self {
        Self {
            store,
            entries: DashMap::new(),
        }
    }

    /// Fetch a ladder, loading from the store on miss
    pub async fn get(&self, name: &str) -> Result<Arc<RankLadder>> {
        if let Some(ladder) = self.entries.get(name) {
            return Ok(ladder.clone());
        }
        let ladder = Arc::new(self.store.get_rank_ladder(name).await?);
        Ok(self
            .entries
            .entry(name.to_string())
            .or_insert(ladder)
            .clone())
    }

    /// Read-modify-write a ladder; unchanged results short-circuit
    /// without a store write
    pub async fn update(
        &self,
        name: &str,
        f: impl FnOnce(&RankLadder) -> RankLadder,
    ) -> Result<Arc<RankLadder>> {
        let current = self.get(name).await?;
        let updated = f(&current);
        if updated == *current {
            return Ok(current);
        }

        let stored = Arc::new(self.store.set_rank_ladder(name, updated).await?);
        self.entries.insert(name.to_string(), stored.clone());
        debug!(ladder = name, "Rank ladder updated");
        Ok(stored)
    }

    /// Drop a cached ladder
    pub fn invalidate(&self, name: &str) {
        self.entries.remove(name);
    }

    /// Drop every cached ladder
    pub fn invalidate_all(&self) {
        self.entries.clear();
    }

    pub fn cached_count(&self) -> usize {
        self.entries.len()
    }
}

impl std::fmt::Debug for RankLadderCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RankLadderCache")
            .field("entries", &self.entries.len())
            .finish()
    }
}
