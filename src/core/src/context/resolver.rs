//! Transitive closure of active context sets under context inheritance

use super::{ContextInheritance, ContextSet, ContextValue};
use crate::error::Result;
use crate::store::DataStore;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

/// Expands an active context set into its full transitive closure
///
/// Inheritance configuration lives behind the [`DataStore`] boundary;
/// the resolver consults it, it does not own it.
pub struct ContextResolver {
    store: Arc<dyn DataStore>,
}

impl ContextResolver {
    pub fn new(store: Arc<dyn DataStore>) -> Self {
        Self { store }
    }

    /// Expand `contexts` under the store's current inheritance map
    ///
    /// Suspension point: reads the inheritance configuration from the
    /// store.
    pub async fn expand(&self, contexts: &ContextSet) -> Result<ContextSet> {
        let inheritance = self.store.get_context_inheritance().await?;
        Ok(Self::expand_with(contexts, &inheritance))
    }

    /// Pure breadth-first expansion against a given inheritance map
    ///
    /// Membership is checked before a value is expanded, so a value is
    /// never re-expanded and cyclic inheritance terminates without
    /// explicit cycle detection. Expanding an already-expanded set
    /// returns an equal set.
    pub fn expand_with(contexts: &ContextSet, inheritance: &ContextInheritance) -> ContextSet {
        let mut seen: HashSet<ContextValue> = HashSet::new();
        let mut queue: VecDeque<ContextValue> = contexts.iter().cloned().collect();

        while let Some(value) = queue.pop_front() {
            if !seen.insert(value.clone()) {
                continue;
            }
            if let Some(parents) = inheritance.get(&value) {
                queue.extend(parents.iter().cloned());
            }
        }

        ContextSet::from_values(seen)
    }
}
