//! Environmental context values, sets, and pluggable definitions
//!
//! A context value is a `(key, value)` condition supplied by external
//! accumulators. Stored segments are gated on context sets; whether a
//! stored value is satisfied by an active one is decided by the key's
//! registered [`ContextDefinition`].

pub mod resolver;

pub use resolver::ContextResolver;

use crate::types::SubjectRef;
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Context-to-context inheritance configuration
///
/// Maps a context value to the parent values it implies. Owned by the
/// data store; consulted by the [`ContextResolver`].
pub type ContextInheritance = HashMap<ContextValue, Vec<ContextValue>>;

/// One environmental condition: a key and a raw value
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContextValue {
    /// Context key (e.g., "world", "server-tag")
    pub key: String,

    /// Raw value as produced by an accumulator
    pub value: String,
}

impl ContextValue {
    /// Create a new context value
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

impl fmt::Display for ContextValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.key, self.value)
    }
}

/// An immutable, canonically ordered set of context values
///
/// Sorted and deduplicated on construction so that equal sets hash
/// equally; usable directly as a cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct ContextSet {
    values: Vec<ContextValue>,
}

impl ContextSet {
    /// The empty context set (matches only context-free segments)
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a canonical set from any collection of values
    pub fn from_values(values: impl IntoIterator<Item = ContextValue>) -> Self {
        let mut values: Vec<ContextValue> = values.into_iter().collect();
        values.sort();
        values.dedup();
        Self { values }
    }

    /// A set containing a single value
    pub fn single(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            values: vec![ContextValue::new(key, value)],
        }
    }

    /// A new set with `value` added
    pub fn with(&self, value: ContextValue) -> Self {
        let mut values = self.values.clone();
        values.push(value);
        Self::from_values(values)
    }

    /// Whether the set contains an exact value
    pub fn contains(&self, value: &ContextValue) -> bool {
        self.values.binary_search(value).is_ok()
    }

    /// Whether the set contains any value for `key`
    pub fn contains_key(&self, key: &str) -> bool {
        self.values.iter().any(|v| v.key == key)
    }

    /// Iterate values in canonical order
    pub fn iter(&self) -> std::slice::Iter<'_, ContextValue> {
        self.values.iter()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl FromIterator<ContextValue> for ContextSet {
    fn from_iter<I: IntoIterator<Item = ContextValue>>(iter: I) -> Self {
        Self::from_values(iter)
    }
}

impl fmt::Display for ContextSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for value in &self.values {
            if !first {
                write!(f, ",")?;
            }
            write!(f, "{}", value)?;
            first = false;
        }
        Ok(())
    }
}

/// Pluggable semantics for one context key
///
/// A definition decides whether a stored context value is satisfied by
/// an active one. Resolving a value to its comparable representation
/// may suspend (e.g., a store-backed lookup), so the test is async and
/// invoked lazily per comparison.
#[async_trait]
pub trait ContextDefinition: Send + Sync {
    /// Context key this definition handles
    fn key(&self) -> &str;

    /// Whether `active` satisfies `stored`
    ///
    /// Both values carry this definition's key. Equality is the common
    /// case; containment semantics (e.g., CIDR ranges, time windows)
    /// are definition-specific.
    async fn matches(&self, stored: &ContextValue, active: &ContextValue) -> bool;
}

/// Exact string-equality definition, the fallback for unregistered keys
#[derive(Debug, Clone)]
pub struct SimpleContextDefinition {
    key: String,
}

impl SimpleContextDefinition {
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }
}

#[async_trait]
impl ContextDefinition for SimpleContextDefinition {
    fn key(&self) -> &str {
        &self.key
    }

    async fn matches(&self, stored: &ContextValue, active: &ContextValue) -> bool {
        stored.value == active.value
    }
}

/// Registry of context definitions, keyed by context key
#[derive(Default)]
pub struct ContextDefinitions {
    definitions: DashMap<String, Arc<dyn ContextDefinition>>,
}

impl ContextDefinitions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a definition, replacing any previous one for the key
    pub fn register(&self, definition: Arc<dyn ContextDefinition>) {
        self.definitions
            .insert(definition.key().to_string(), definition);
    }

    /// Look up the definition for a key
    pub fn get(&self, key: &str) -> Option<Arc<dyn ContextDefinition>> {
        self.definitions.get(key).map(|d| d.clone())
    }

    /// Whether `active` satisfies `stored` under the stored key's
    /// definition; unregistered keys fall back to exact equality
    pub async fn value_matches(&self, stored: &ContextValue, active: &ContextValue) -> bool {
        if stored.key != active.key {
            return false;
        }
        match self.get(&stored.key) {
            Some(definition) => definition.matches(stored, active).await,
            None => stored.value == active.value,
        }
    }
}

impl fmt::Debug for ContextDefinitions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextDefinitions")
            .field("registered", &self.definitions.len())
            .finish()
    }
}

/// Per-key provider of currently applicable context values
///
/// Invoked when a calculated subject recomputes its active-contexts
/// snapshot. External code implements this (e.g., "what world is this
/// subject in right now").
#[async_trait]
pub trait ContextAccumulator: Send + Sync {
    /// Context key this accumulator produces values for
    fn key(&self) -> &str;

    /// Zero or more currently applicable values for the subject
    async fn accumulate(&self, subject: &SubjectRef) -> Vec<ContextValue>;
}
