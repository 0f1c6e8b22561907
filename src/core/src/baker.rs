//! Inheritance walker: flattens a subject's graph into baked data
//!
//! Depth-first traversal of the subject inheritance graph under an
//! expanded active context set, combining matching segments into a
//! permission trie, an option map, and a parent list.

use crate::context::ContextSet;
use crate::engine::EngineInner;
use crate::error::Result;
use crate::segment::{DataSegment, ImmutableSubjectData, SegmentKey};
use crate::tree::NodeTree;
use crate::types::{SourcePriority, SubjectRef};
use crate::glob;
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{debug, warn};

/// Flattened result of one bake for one (subject, context set)
#[derive(Debug, Clone, PartialEq)]
pub struct BakedSubjectData {
    permissions: NodeTree,
    parents: Vec<SubjectRef>,
    options: HashMap<String, String>,
}

impl BakedSubjectData {
    /// The combined permission trie
    pub fn permissions(&self) -> &NodeTree {
        &self.permissions
    }

    /// All parent edges encountered during the walk, in visit order
    pub fn parents(&self) -> &[SubjectRef] {
        &self.parents
    }

    /// The combined option map
    pub fn options(&self) -> &HashMap<String, String> {
        &self.options
    }

    /// Sign-coded permission lookup through the trie
    pub fn permission(&self, name: &str) -> i32 {
        self.permissions.get(name)
    }

    /// Option lookup
    pub fn option(&self, name: &str) -> Option<&str> {
        self.options.get(name).map(|v| v.as_str())
    }
}

/// Accumulators for one walk
#[derive(Default)]
struct BakeState {
    permissions: HashMap<String, i32>,
    options: HashMap<String, String>,
    parents: Vec<SubjectRef>,
    default_value: i32,
    visit_counts: HashMap<SubjectRef, u32>,
    found_data: bool,
}

/// Depth-first walker over the subject inheritance graph
pub struct InheritanceWalker {
    engine: Arc<EngineInner>,
}

impl InheritanceWalker {
    pub(crate) fn new(engine: Arc<EngineInner>) -> Self {
        Self { engine }
    }

    /// Produce baked data for one subject under one active context set
    ///
    /// The context set is expanded through the context resolver before
    /// the walk. May suspend on store access; the first store error
    /// fails the whole bake.
    pub(crate) async fn bake(
        &self,
        subject: &SubjectRef,
        contexts: &ContextSet,
    ) -> Result<Arc<BakedSubjectData>> {
        self.engine.bakes_performed.fetch_add(1, Ordering::Relaxed);

        let active = self.engine.resolver.expand(contexts).await?;
        debug!(subject = %subject, contexts = %active, "Baking subject data");

        let mut state = BakeState::default();
        self.visit(&mut state, &active, subject.clone(), 0).await?;

        // Last-resort source when the subject's own graph held nothing.
        // Only user-authored segments count toward this emptiness
        // check; the forced defaults visits below run afterwards.
        if !state.found_data {
            let fallback = SubjectRef::fallback_for(&subject.subject_type);
            if *subject != fallback {
                self.visit(&mut state, &active, fallback, 1).await?;
            }
        }

        // Global fallback policy always applies.
        if !subject.is_defaults() {
            self.visit(
                &mut state,
                &active,
                SubjectRef::type_defaults(&subject.subject_type),
                1,
            )
            .await?;
            self.visit(&mut state, &active, SubjectRef::global_defaults(), 2)
                .await?;
        }

        Ok(Arc::new(BakedSubjectData {
            permissions: NodeTree::of(&state.permissions, state.default_value),
            parents: state.parents,
            options: state.options,
        }))
    }

    /// Visit one subject at an inheritance level, then its parents
    fn visit<'a>(
        &'a self,
        state: &'a mut BakeState,
        active: &'a ContextSet,
        subject: SubjectRef,
        level: u32,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let visits = state.visit_counts.entry(subject.clone()).or_insert(0);
            if *visits >= self.engine.config.circular_inheritance_limit {
                warn!(subject = %subject, "Circular inheritance detected, pruning branch");
                return Ok(());
            }
            *visits += 1;

            let collection = self.engine.subject_type(&subject.subject_type);
            let persistent = collection.data_cache().get(&subject.identifier).await?;
            let transient = collection.transient_data(&subject.identifier).get();

            let sources: [Arc<ImmutableSubjectData>; 2] = match collection.priority() {
                SourcePriority::PersistentFirst => [persistent, transient],
                SourcePriority::TransientFirst => [transient, persistent],
            };

            let mut discovered = Vec::new();
            for data in &sources {
                self.process_data(state, active, data.as_ref(), level, &mut discovered)
                    .await;
            }

            // First-listed parent is fully visited, including its own
            // recursion, before the next.
            for parent in discovered {
                self.visit(&mut *state, active, parent, level + 1).await?;
            }

            Ok(())
        })
    }

    /// Process every segment of one source whose context set is
    /// satisfied by the active set
    async fn process_data(
        &self,
        state: &mut BakeState,
        active: &ContextSet,
        data: &ImmutableSubjectData,
        level: u32,
        discovered: &mut Vec<SubjectRef>,
    ) {
        let mut segments: Vec<(&SegmentKey, &DataSegment)> = data.segments().collect();
        segments.sort_by(|(a, _), (b, _)| b.weight.cmp(&a.weight).then_with(|| a.cmp(b)));

        for (key, segment) in segments {
            if !self.matches_contexts(&key.contexts, active).await {
                continue;
            }
            self.process_segment(state, key, segment, level, discovered);
        }
    }

    /// Whether every stored context value is satisfied by some active
    /// value under its definition
    async fn matches_contexts(&self, stored: &ContextSet, active: &ContextSet) -> bool {
        'stored: for stored_value in stored.iter() {
            for active_value in active.iter().filter(|a| a.key == stored_value.key) {
                if self
                    .engine
                    .context_definitions
                    .value_matches(stored_value, active_value)
                    .await
                {
                    continue 'stored;
                }
            }
            return false;
        }
        true
    }

    /// Merge one matching segment into the accumulators
    fn process_segment(
        &self,
        state: &mut BakeState,
        key: &SegmentKey,
        segment: &DataSegment,
        level: u32,
        discovered: &mut Vec<SubjectRef>,
    ) {
        let mut entries: Vec<(&String, &i32)> = segment.permissions().iter().collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));

        for (raw, value) in entries {
            let mut name = raw.as_str();
            // Exclusion markers are only honored for the subject's own
            // data or its direct data-holder.
            if let Some(stripped) = name.strip_prefix('#') {
                if level > 1 {
                    continue;
                }
                name = stripped;
            }
            state.found_data = true;

            match glob::expand(name) {
                Ok(expanded) => {
                    for literal in expanded {
                        combine_permission(&mut state.permissions, literal, *value);
                    }
                }
                Err(err) => {
                    debug!(pattern = name, %err, "Unparseable pattern merged literally");
                    combine_permission(&mut state.permissions, name.to_string(), *value);
                }
            }
        }

        for (option, value) in segment.options() {
            state.found_data = true;
            state
                .options
                .entry(option.clone())
                .or_insert_with(|| value.clone());
        }

        if segment.default_value() != 0 {
            state.found_data = true;
            state.default_value = combine_value(state.default_value, segment.default_value());
        }

        if (level == 0 || key.inheritable) && !segment.parents().is_empty() {
            state.found_data = true;
            for parent in segment.parents() {
                state.parents.push(parent.clone());
                discovered.push(parent.clone());
            }
        }
    }
}

/// Magnitude-wins combination: an existing value is replaced only when
/// the incoming one is strictly stronger, so the first-seen value wins
/// ties
fn combine_value(existing: i32, incoming: i32) -> i32 {
    if incoming.unsigned_abs() > existing.unsigned_abs() {
        incoming
    } else {
        existing
    }
}

fn combine_permission(permissions: &mut HashMap<String, i32>, key: String, value: i32) {
    match permissions.entry(key) {
        std::collections::hash_map::Entry::Occupied(mut entry) => {
            let combined = combine_value(*entry.get(), value);
            entry.insert(combined);
        }
        std::collections::hash_map::Entry::Vacant(entry) => {
            entry.insert(value);
        }
    }
}
