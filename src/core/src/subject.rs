//! Per-subject runtime unit: bake-result cache and invalidation
//!
//! A [`CalculatedSubject`] is what callers query. It owns a bounded,
//! TTL'd cache of baked results keyed by active context set, shares
//! in-flight bakes between concurrent callers, and drives conservative
//! cross-subject invalidation when its data changes.

use crate::baker::{BakedSubjectData, InheritanceWalker};
use crate::cache::{SubjectDataReference, SubjectDataUpdateListener};
use crate::context::ContextSet;
use crate::engine::{EngineConfig, EngineInner};
use crate::error::{Result, StratumError};
use crate::listener::ListenerHandle;
use crate::notifier::CheckNotifier;
use crate::segment::ImmutableSubjectData;
use crate::tree::NodeTree;
use crate::types::SubjectRef;
use dashmap::DashMap;
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use lru::LruCache;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;
use tracing::warn;

/// Cloneable failure observed through a shared in-flight bake
#[derive(Debug, Clone)]
struct BakeFailure(Arc<StratumError>);

type SharedBake = Shared<BoxFuture<'static, std::result::Result<Arc<BakedSubjectData>, BakeFailure>>>;

struct BakedEntry {
    data: Arc<BakedSubjectData>,
    last_access: Instant,
}

struct ActiveSnapshot {
    computed_at: Instant,
    contexts: ContextSet,
}

/// The per-subject runtime unit callers query
pub struct CalculatedSubject {
    subject: SubjectRef,
    persistent: Arc<SubjectDataReference>,
    transient: Arc<SubjectDataReference>,
    engine: Weak<EngineInner>,
    config: EngineConfig,
    baked: Mutex<LruCache<ContextSet, BakedEntry>>,
    pending: DashMap<ContextSet, (u64, SharedBake)>,
    generation: AtomicU64,
    active_snapshot: Mutex<Option<ActiveSnapshot>>,
    listener_handles: Mutex<Vec<ListenerHandle>>,
}

/// Bridges data-reference commits to bake-cache invalidation
struct InvalidationListener {
    subject: Weak<CalculatedSubject>,
}

impl SubjectDataUpdateListener for InvalidationListener {
    fn data_updated(&self, _new_data: &Arc<ImmutableSubjectData>) {
        if let Some(subject) = self.subject.upgrade() {
            subject.handle_data_change();
        }
    }
}

impl CalculatedSubject {
    pub(crate) fn new(
        subject: SubjectRef,
        persistent: Arc<SubjectDataReference>,
        transient: Arc<SubjectDataReference>,
        engine: &Arc<EngineInner>,
    ) -> Arc<Self> {
        let config = engine.config.clone();
        let capacity =
            NonZeroUsize::new(config.bake_cache.capacity).unwrap_or(NonZeroUsize::MIN);

        let calculated = Arc::new(Self {
            subject,
            persistent: persistent.clone(),
            transient: transient.clone(),
            engine: Arc::downgrade(engine),
            config,
            baked: Mutex::new(LruCache::new(capacity)),
            pending: DashMap::new(),
            generation: AtomicU64::new(0),
            active_snapshot: Mutex::new(None),
            listener_handles: Mutex::new(Vec::new()),
        });

        let listener: Arc<dyn SubjectDataUpdateListener> = Arc::new(InvalidationListener {
            subject: Arc::downgrade(&calculated),
        });
        let mut handles = calculated.listener_handles.lock();
        handles.push(persistent.on_update(listener.clone()));
        handles.push(transient.on_update(listener));
        drop(handles);

        calculated
    }

    /// The subject this unit resolves data for
    pub fn subject_ref(&self) -> &SubjectRef {
        &self.subject
    }

    /// Current persistent data snapshot
    pub fn persistent_data(&self) -> Arc<ImmutableSubjectData> {
        self.persistent.get()
    }

    /// Current transient (session-only) data snapshot
    pub fn transient_data(&self) -> Arc<ImmutableSubjectData> {
        self.transient.get()
    }

    /// Atomically transform the transient data
    ///
    /// Commits trigger the same invalidation as persistent changes.
    pub fn update_transient(
        &self,
        f: impl Fn(&ImmutableSubjectData) -> ImmutableSubjectData,
    ) -> Arc<ImmutableSubjectData> {
        self.transient.update(f)
    }

    /// Baked data for a context set, `None` meaning the subject's
    /// current active contexts
    pub async fn baked_data(
        self: &Arc<Self>,
        contexts: Option<&ContextSet>,
    ) -> Result<Arc<BakedSubjectData>> {
        let contexts = self.resolve_contexts(contexts).await;
        self.get_or_bake(contexts).await
    }

    /// The combined permission trie
    pub async fn permissions(
        self: &Arc<Self>,
        contexts: Option<&ContextSet>,
    ) -> Result<NodeTree> {
        Ok(self.baked_data(contexts).await?.permissions().clone())
    }

    /// Sign-coded permission lookup: `> 0` allow, `< 0` deny, `0`
    /// undefined
    pub async fn permission(
        self: &Arc<Self>,
        contexts: Option<&ContextSet>,
        name: &str,
    ) -> Result<i32> {
        let resolved = self.resolve_contexts(contexts).await;
        let baked = self.get_or_bake(resolved.clone()).await?;
        let value = baked.permission(name);
        self.notify(|n| n.permission_checked(&self.subject, &resolved, name, value));
        Ok(value)
    }

    /// Whether a permission resolves to an explicit allow
    pub async fn has_permission(
        self: &Arc<Self>,
        contexts: Option<&ContextSet>,
        name: &str,
    ) -> Result<bool> {
        Ok(self.permission(contexts, name).await? > 0)
    }

    /// The combined option map
    pub async fn options(
        self: &Arc<Self>,
        contexts: Option<&ContextSet>,
    ) -> Result<HashMap<String, String>> {
        Ok(self.baked_data(contexts).await?.options().clone())
    }

    /// A single option value
    pub async fn option(
        self: &Arc<Self>,
        contexts: Option<&ContextSet>,
        name: &str,
    ) -> Result<Option<String>> {
        let resolved = self.resolve_contexts(contexts).await;
        let baked = self.get_or_bake(resolved.clone()).await?;
        let value = baked.option(name).map(|v| v.to_string());
        self.notify(|n| n.option_checked(&self.subject, &resolved, name, value.as_deref()));
        Ok(value)
    }

    /// All parent edges encountered during the bake, in visit order
    pub async fn parents(
        self: &Arc<Self>,
        contexts: Option<&ContextSet>,
    ) -> Result<Vec<SubjectRef>> {
        let resolved = self.resolve_contexts(contexts).await;
        let baked = self.get_or_bake(resolved.clone()).await?;
        let parents = baked.parents().to_vec();
        self.notify(|n| n.parents_checked(&self.subject, &resolved, &parents));
        Ok(parents)
    }

    /// Current active contexts from the registered accumulators
    ///
    /// Recomputed at most once per refresh interval; in between,
    /// lookups share the snapshot.
    pub async fn active_contexts(&self) -> ContextSet {
        if let Some(snapshot) = self.active_snapshot.lock().as_ref() {
            if snapshot.computed_at.elapsed() < self.config.active_context_refresh {
                return snapshot.contexts.clone();
            }
        }

        let accumulators = match self.engine.upgrade() {
            Some(engine) => engine.accumulators(),
            None => Vec::new(),
        };

        let mut values = Vec::new();
        for accumulator in accumulators {
            values.extend(accumulator.accumulate(&self.subject).await);
        }

        let contexts = ContextSet::from_values(values);
        *self.active_snapshot.lock() = Some(ActiveSnapshot {
            computed_at: Instant::now(),
            contexts: contexts.clone(),
        });
        contexts
    }

    /// Drop every cached and in-flight bake for this subject
    pub fn invalidate_baked(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.baked.lock().clear();
        self.pending.clear();
    }

    /// Whether any currently cached result lists `subject` among its
    /// parents
    pub(crate) fn depends_on(&self, subject: &SubjectRef) -> bool {
        self.baked
            .lock()
            .iter()
            .any(|(_, entry)| entry.data.parents().contains(subject))
    }

    /// Number of cached bake results
    pub fn baked_count(&self) -> usize {
        self.baked.lock().len()
    }

    /// Own data changed: drop our results, then conservatively clear
    /// every live subject whose cached results used us as an ancestor
    pub(crate) fn handle_data_change(self: &Arc<Self>) {
        self.invalidate_baked();
        if let Some(engine) = self.engine.upgrade() {
            engine.invalidate_dependents(&self.subject);
        }
    }

    async fn resolve_contexts(&self, contexts: Option<&ContextSet>) -> ContextSet {
        match contexts {
            Some(contexts) => contexts.clone(),
            None => self.active_contexts().await,
        }
    }

    /// Fetch-or-bake with at most one in-flight bake per context set
    async fn get_or_bake(self: &Arc<Self>, contexts: ContextSet) -> Result<Arc<BakedSubjectData>> {
        if let Some(hit) = self.cached_bake(&contexts) {
            return Ok(hit);
        }

        let shared = {
            let generation = self.generation.load(Ordering::Acquire);
            match self.pending.entry(contexts.clone()) {
                dashmap::mapref::entry::Entry::Occupied(entry) => entry.get().1.clone(),
                dashmap::mapref::entry::Entry::Vacant(entry) => {
                    let future = self.bake_future(contexts.clone(), generation);
                    entry.insert((generation, future.clone()));
                    future
                }
            }
        };

        shared
            .await
            .map_err(|failure| StratumError::Shared(failure.0))
    }

    fn bake_future(self: &Arc<Self>, contexts: ContextSet, generation: u64) -> SharedBake {
        let this = Arc::clone(self);
        async move {
            let result = match this.engine.upgrade() {
                Some(engine) => {
                    InheritanceWalker::new(engine)
                        .bake(&this.subject, &contexts)
                        .await
                }
                None => Err(StratumError::Internal("engine dropped".to_string())),
            };

            match result {
                Ok(data) => {
                    // A concurrent invalidation means this result may
                    // already be stale; serve it but do not cache it.
                    if this.generation.load(Ordering::Acquire) == generation {
                        this.store_bake(contexts.clone(), data.clone());
                    }
                    this.pending.remove_if(&contexts, |_, (g, _)| *g == generation);
                    Ok(data)
                }
                Err(err) => {
                    // Failed bakes are never cached; the next request
                    // retries.
                    this.pending.remove_if(&contexts, |_, (g, _)| *g == generation);
                    Err(BakeFailure(Arc::new(err)))
                }
            }
        }
        .boxed()
        .shared()
    }

    fn cached_bake(&self, contexts: &ContextSet) -> Option<Arc<BakedSubjectData>> {
        let mut baked = self.baked.lock();
        if let Some(entry) = baked.get_mut(contexts) {
            if entry.last_access.elapsed() > self.config.bake_cache.ttl {
                baked.pop(contexts);
                return None;
            }
            entry.last_access = Instant::now();
            return Some(entry.data.clone());
        }
        None
    }

    fn store_bake(&self, contexts: ContextSet, data: Arc<BakedSubjectData>) {
        self.baked.lock().put(
            contexts,
            BakedEntry {
                data,
                last_access: Instant::now(),
            },
        );
    }

    fn notify(&self, f: impl FnOnce(&dyn CheckNotifier)) {
        if let Some(engine) = self.engine.upgrade() {
            let notifier = engine.notifier();
            if catch_unwind(AssertUnwindSafe(|| f(notifier.as_ref()))).is_err() {
                warn!(subject = %self.subject, "Check notifier panicked; lookup unaffected");
            }
        }
    }
}

impl std::fmt::Debug for CalculatedSubject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CalculatedSubject")
            .field("subject", &self.subject)
            .field("baked", &self.baked.lock().len())
            .finish()
    }
}
