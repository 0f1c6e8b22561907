//! Immutable subject data: segments keyed by context set, weight, and
//! inheritability
//!
//! All mutation is functional; an update produces a new value and the
//! previous one stays valid for concurrent readers. Removal deletes the
//! key outright, so the maps never contain tombstones.

use crate::context::ContextSet;
use crate::types::SubjectRef;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Scoping key for one data segment
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SegmentKey {
    /// Context set gating when the segment applies
    pub contexts: ContextSet,

    /// Orders same-subject segments; higher weight is processed first
    pub weight: i32,

    /// Whether the segment's parents are emitted when the subject is
    /// visited as someone else's ancestor
    pub inheritable: bool,
}

impl SegmentKey {
    pub fn new(contexts: ContextSet, weight: i32, inheritable: bool) -> Self {
        Self {
            contexts,
            weight,
            inheritable,
        }
    }

    /// The context-free, weight-zero, inheritable key
    pub fn global() -> Self {
        Self::new(ContextSet::empty(), 0, true)
    }

    /// A context-gated key with default weight and inheritability
    pub fn in_contexts(contexts: ContextSet) -> Self {
        Self::new(contexts, 0, true)
    }
}

impl Default for SegmentKey {
    fn default() -> Self {
        Self::global()
    }
}

/// Payload of one segment key
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DataSegment {
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    permissions: HashMap<String, i32>,

    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    options: HashMap<String, String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    parents: Vec<SubjectRef>,

    /// Fallback verdict when no permission key matches; 0 = unset
    #[serde(default, skip_serializing_if = "is_zero")]
    default_value: i32,
}

fn is_zero(value: &i32) -> bool {
    *value == 0
}

impl DataSegment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn permissions(&self) -> &HashMap<String, i32> {
        &self.permissions
    }

    pub fn options(&self) -> &HashMap<String, String> {
        &self.options
    }

    pub fn parents(&self) -> &[SubjectRef] {
        &self.parents
    }

    pub fn default_value(&self) -> i32 {
        self.default_value
    }

    /// New segment with a permission set; a zero value deletes the key
    pub fn with_permission(&self, key: impl Into<String>, value: i32) -> Self {
        let mut next = self.clone();
        let key = key.into();
        if value == 0 {
            next.permissions.remove(&key);
        } else {
            next.permissions.insert(key, value);
        }
        next
    }

    /// New segment with an option set
    pub fn with_option(&self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let mut next = self.clone();
        next.options.insert(key.into(), value.into());
        next
    }

    /// New segment with an option removed
    pub fn without_option(&self, key: &str) -> Self {
        let mut next = self.clone();
        next.options.remove(key);
        next
    }

    /// New segment with a parent appended (order preserved)
    pub fn with_parent(&self, parent: SubjectRef) -> Self {
        let mut next = self.clone();
        next.parents.push(parent);
        next
    }

    /// New segment with every occurrence of a parent removed
    pub fn without_parent(&self, parent: &SubjectRef) -> Self {
        let mut next = self.clone();
        next.parents.retain(|p| p != parent);
        next
    }

    /// New segment with the parent list replaced
    pub fn with_parents(&self, parents: Vec<SubjectRef>) -> Self {
        let mut next = self.clone();
        next.parents = parents;
        next
    }

    /// New segment with the default verdict replaced; 0 clears it
    pub fn with_default_value(&self, value: i32) -> Self {
        let mut next = self.clone();
        next.default_value = value;
        next
    }

    /// New segment with all permissions cleared
    pub fn without_permissions(&self) -> Self {
        let mut next = self.clone();
        next.permissions.clear();
        next
    }

    pub fn is_empty(&self) -> bool {
        self.permissions.is_empty()
            && self.options.is_empty()
            && self.parents.is_empty()
            && self.default_value == 0
    }
}

/// All segments for one subject in one persistence slot
///
/// One instance exists per (subject, persistent-or-transient) slot and
/// lives until the next mutation or cache eviction replaces it.
/// Serialized as an ordered list of `(key, segment)` entries, since the
/// segment key is structured.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ImmutableSubjectData {
    #[serde(with = "segments_serde")]
    segments: HashMap<SegmentKey, DataSegment>,
}

mod segments_serde {
    use super::{DataSegment, SegmentKey};
    use serde::ser::SerializeSeq;
    use serde::{Deserialize, Deserializer, Serializer};
    use std::collections::HashMap;

    pub fn serialize<S: Serializer>(
        segments: &HashMap<SegmentKey, DataSegment>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let mut entries: Vec<(&SegmentKey, &DataSegment)> = segments.iter().collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));

        let mut seq = serializer.serialize_seq(Some(entries.len()))?;
        for entry in entries {
            seq.serialize_element(&entry)?;
        }
        seq.end()
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<HashMap<SegmentKey, DataSegment>, D::Error> {
        let entries: Vec<(SegmentKey, DataSegment)> = Vec::deserialize(deserializer)?;
        Ok(entries.into_iter().collect())
    }
}

impl ImmutableSubjectData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Segment lookup by exact key
    pub fn segment(&self, key: &SegmentKey) -> Option<&DataSegment> {
        self.segments.get(key)
    }

    /// Enumerate all segments
    pub fn segments(&self) -> impl Iterator<Item = (&SegmentKey, &DataSegment)> {
        self.segments.iter()
    }

    /// New instance with a segment replaced; an empty segment deletes
    /// the entry
    pub fn with_segment(&self, key: SegmentKey, segment: DataSegment) -> Self {
        let mut next = self.clone();
        if segment.is_empty() {
            next.segments.remove(&key);
        } else {
            next.segments.insert(key, segment);
        }
        next
    }

    /// New instance with a segment transformed through `f`
    ///
    /// A missing segment is presented to `f` as empty, so this doubles
    /// as insertion.
    pub fn update_segment(
        &self,
        key: SegmentKey,
        f: impl FnOnce(DataSegment) -> DataSegment,
    ) -> Self {
        let current = self.segments.get(&key).cloned().unwrap_or_default();
        self.with_segment(key, f(current))
    }

    /// New instance with a segment removed
    pub fn without_segment(&self, key: &SegmentKey) -> Self {
        let mut next = self.clone();
        next.segments.remove(key);
        next
    }

    /// New empty instance
    pub fn cleared(&self) -> Self {
        Self::new()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }
}
