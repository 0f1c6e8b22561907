//! Engine root: subject type collections, configuration, and
//! cross-subject invalidation
//!
//! [`PermissionEngine`] orchestrates the resolver components: it owns
//! one [`SubjectTypeCollection`] per subject type, the context
//! definition registry and accumulators, the rank ladder cache, and the
//! store change listener that keeps every cache honest.

use crate::cache::{CacheStats, SubjectDataCache, SubjectDataReference};
use crate::context::{ContextAccumulator, ContextDefinition, ContextDefinitions, ContextResolver};
use crate::error::{Result, StratumError};
use crate::ladder::RankLadderCache;
use crate::listener::ListenerHandle;
use crate::notifier::{CheckNotifier, NoopCheckNotifier};
use crate::segment::ImmutableSubjectData;
use crate::store::{DataStore, DataStoreListener};
use crate::subject::CalculatedSubject;
use crate::types::{SourcePriority, SubjectRef, SubjectTypeConfig, FALLBACK_TYPE};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, info};

/// Bake-result cache settings
#[derive(Debug, Clone)]
pub struct BakeCacheConfig {
    /// Maximum distinct context-set results kept per subject
    pub capacity: usize,

    /// Entries expire after this long without access
    pub ttl: Duration,
}

impl Default for BakeCacheConfig {
    fn default() -> Self {
        Self {
            capacity: 32,
            ttl: Duration::from_secs(60),
        }
    }
}

/// Engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Per-subject bake cache settings
    pub bake_cache: BakeCacheConfig,

    /// Active-contexts snapshots are recomputed at most this often
    pub active_context_refresh: Duration,

    /// Visits per subject before a walk branch is pruned as circular
    pub circular_inheritance_limit: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            bake_cache: BakeCacheConfig::default(),
            active_context_refresh: Duration::from_millis(50),
            circular_inheritance_limit: 3,
        }
    }
}

/// Engine-wide statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineStats {
    /// Subject type collections created so far
    pub subject_types: usize,

    /// Live calculated subjects across all types
    pub live_subjects: usize,

    /// Cached subject data references across all types
    pub cached_data_entries: usize,

    /// Inheritance walks performed since engine creation
    pub bakes_performed: u64,
}

pub(crate) struct EngineInner {
    pub(crate) config: EngineConfig,
    pub(crate) store: Arc<dyn DataStore>,
    pub(crate) resolver: ContextResolver,
    pub(crate) context_definitions: ContextDefinitions,
    pub(crate) bakes_performed: AtomicU64,
    collections: DashMap<String, Arc<SubjectTypeCollection>>,
    accumulators: RwLock<Vec<Arc<dyn ContextAccumulator>>>,
    notifier: RwLock<Arc<dyn CheckNotifier>>,
    ladders: RankLadderCache,
}

impl EngineInner {
    /// The collection for a subject type, created lazily
    pub(crate) fn subject_type(self: &Arc<Self>, name: &str) -> Arc<SubjectTypeCollection> {
        if let Some(collection) = self.collections.get(name) {
            return collection.clone();
        }
        let collection = Arc::new(SubjectTypeCollection::new(name, self));
        self.collections
            .entry(name.to_string())
            .or_insert(collection)
            .clone()
    }

    pub(crate) fn cached_collection(&self, name: &str) -> Option<Arc<SubjectTypeCollection>> {
        self.collections.get(name).map(|c| c.clone())
    }

    pub(crate) fn accumulators(&self) -> Vec<Arc<dyn ContextAccumulator>> {
        self.accumulators.read().clone()
    }

    pub(crate) fn notifier(&self) -> Arc<dyn CheckNotifier> {
        self.notifier.read().clone()
    }

    fn all_collections(&self) -> Vec<Arc<SubjectTypeCollection>> {
        self.collections.iter().map(|e| e.value().clone()).collect()
    }

    /// Conservative invalidation after `changed`'s data changed
    ///
    /// Clears the changed subject's own results, then every live
    /// subject whose cached results list it among their parents. No
    /// global lock is taken, so the scan may observe a slightly stale
    /// set of live subjects; over-invalidation is safe.
    pub(crate) fn invalidate_dependents(&self, changed: &SubjectRef) {
        // Defaults and fallback subjects feed every bake without
        // appearing as parents, so a change to one clears everything.
        if changed.is_defaults() || changed.subject_type == FALLBACK_TYPE {
            self.invalidate_all_baked();
            return;
        }

        for collection in self.all_collections() {
            for subject in collection.live_subjects() {
                if subject.subject_ref() == changed || subject.depends_on(changed) {
                    subject.invalidate_baked();
                }
            }
        }
    }

    /// Clear every live subject's bake cache
    pub(crate) fn invalidate_all_baked(&self) {
        for collection in self.all_collections() {
            for subject in collection.live_subjects() {
                subject.invalidate_baked();
            }
        }
    }
}

/// One subject type: its data cache, transient slots, and live
/// calculated subjects
pub struct SubjectTypeCollection {
    name: String,
    config: RwLock<SubjectTypeConfig>,
    data_cache: SubjectDataCache,
    transient: DashMap<String, Arc<SubjectDataReference>>,
    subjects: DashMap<String, Arc<CalculatedSubject>>,
    engine: Weak<EngineInner>,
}

impl SubjectTypeCollection {
    fn new(name: &str, engine: &Arc<EngineInner>) -> Self {
        Self {
            name: name.to_string(),
            config: RwLock::new(SubjectTypeConfig::new(name)),
            data_cache: SubjectDataCache::new(engine.store.clone(), name),
            transient: DashMap::new(),
            subjects: DashMap::new(),
            engine: Arc::downgrade(engine),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn set_config(&self, config: SubjectTypeConfig) {
        *self.config.write() = config;
    }

    /// Transient/persistent processing order for this type
    pub fn priority(&self) -> SourcePriority {
        self.config.read().priority()
    }

    /// The calculated subject for an identifier, created on first use
    ///
    /// Identifier validation happens before any cache or store access;
    /// a rejected identifier is a caller-contract violation, not a
    /// transient condition.
    pub async fn subject(&self, identifier: &str) -> Result<Arc<CalculatedSubject>> {
        self.validate(identifier)?;

        if let Some(subject) = self.subjects.get(identifier) {
            return Ok(subject.clone());
        }

        let engine = self
            .engine
            .upgrade()
            .ok_or_else(|| StratumError::Internal("engine dropped".to_string()))?;
        let persistent = self.data_cache.reference(identifier).await?;
        let transient = self.transient_data(identifier);
        let subject = CalculatedSubject::new(
            SubjectRef::new(&self.name, identifier),
            persistent,
            transient,
            &engine,
        );

        Ok(self
            .subjects
            .entry(identifier.to_string())
            .or_insert(subject)
            .clone())
    }

    /// The live calculated subject, if any, without creating one
    pub fn cached_subject(&self, identifier: &str) -> Option<Arc<CalculatedSubject>> {
        self.subjects.get(identifier).map(|s| s.clone())
    }

    pub(crate) fn live_subjects(&self) -> Vec<Arc<CalculatedSubject>> {
        self.subjects.iter().map(|e| e.value().clone()).collect()
    }

    /// The per-type subject data cache
    pub fn data_cache(&self) -> &SubjectDataCache {
        &self.data_cache
    }

    /// The transient data slot for an identifier, created on demand
    pub fn transient_data(&self, identifier: &str) -> Arc<SubjectDataReference> {
        self.transient
            .entry(identifier.to_string())
            .or_insert_with(|| {
                Arc::new(SubjectDataReference::new(Arc::new(
                    ImmutableSubjectData::new(),
                )))
            })
            .clone()
    }

    /// Read-modify-write a subject's persistent data through the store
    pub async fn update_data(
        &self,
        identifier: &str,
        f: impl FnOnce(&ImmutableSubjectData) -> ImmutableSubjectData,
    ) -> Result<Arc<ImmutableSubjectData>> {
        self.validate(identifier)?;
        self.data_cache.update(identifier, f).await
    }

    /// Whether the subject has stored data
    pub async fn is_registered(&self, identifier: &str) -> Result<bool> {
        self.validate(identifier)?;
        let engine = self
            .engine
            .upgrade()
            .ok_or_else(|| StratumError::Internal("engine dropped".to_string()))?;
        engine.store.is_registered(&self.name, identifier).await
    }

    /// All identifiers with stored data for this type
    pub async fn all_identifiers(&self) -> Result<Vec<String>> {
        let engine = self
            .engine
            .upgrade()
            .ok_or_else(|| StratumError::Internal("engine dropped".to_string()))?;
        engine.store.get_all_identifiers(&self.name).await
    }

    /// Evict a subject: its live unit, data cache entry, and transient
    /// slot
    pub fn evict(&self, identifier: &str) {
        self.subjects.remove(identifier);
        self.data_cache.invalidate(identifier);
        self.transient.remove(identifier);
    }

    /// Cached data-reference statistics for this type
    pub fn cache_stats(&self) -> CacheStats {
        self.data_cache.stats()
    }

    /// Live calculated subjects for this type
    pub fn live_count(&self) -> usize {
        self.subjects.len()
    }

    fn validate(&self, identifier: &str) -> Result<()> {
        if !self.config.read().is_valid_identifier(identifier) {
            return Err(StratumError::InvalidIdentifier {
                subject_type: self.name.clone(),
                identifier: identifier.to_string(),
            });
        }
        Ok(())
    }
}

impl std::fmt::Debug for SubjectTypeCollection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubjectTypeCollection")
            .field("name", &self.name)
            .field("live_subjects", &self.subjects.len())
            .finish()
    }
}

/// Keeps engine caches consistent with store-side changes, including
/// writes made through other cache instances over the same backend
struct EngineStoreListener {
    inner: Weak<EngineInner>,
}

impl DataStoreListener for EngineStoreListener {
    fn data_changed(&self, subject_type: &str, identifier: &str) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        if let Some(collection) = inner.cached_collection(subject_type) {
            collection.data_cache().mark_stale(identifier);
        }
        inner.invalidate_dependents(&SubjectRef::new(subject_type, identifier));
    }

    fn ladder_changed(&self, name: &str) {
        if let Some(inner) = self.inner.upgrade() {
            inner.ladders.invalidate(name);
        }
    }

    fn context_inheritance_changed(&self) {
        if let Some(inner) = self.inner.upgrade() {
            debug!("Context inheritance changed; clearing all baked data");
            inner.invalidate_all_baked();
        }
    }
}

/// The resolution engine callers construct and query
pub struct PermissionEngine {
    inner: Arc<EngineInner>,
    _store_listener: ListenerHandle,
}

impl PermissionEngine {
    /// Create an engine over a data store
    pub fn new(config: EngineConfig, store: Arc<dyn DataStore>) -> Self {
        let inner = Arc::new(EngineInner {
            config,
            resolver: ContextResolver::new(store.clone()),
            context_definitions: ContextDefinitions::new(),
            bakes_performed: AtomicU64::new(0),
            collections: DashMap::new(),
            accumulators: RwLock::new(Vec::new()),
            notifier: RwLock::new(Arc::new(NoopCheckNotifier)),
            ladders: RankLadderCache::new(store.clone()),
            store,
        });

        let store_listener = inner.store.register_listener(Arc::new(EngineStoreListener {
            inner: Arc::downgrade(&inner),
        }));

        info!("Permission engine initialized");
        Self {
            inner,
            _store_listener: store_listener,
        }
    }

    /// The collection for a subject type, created lazily with default
    /// configuration
    pub fn subject_type(&self, name: &str) -> Arc<SubjectTypeCollection> {
        self.inner.subject_type(name)
    }

    /// Register (or replace) a subject type's configuration
    pub fn register_subject_type(&self, config: SubjectTypeConfig) {
        let collection = self.inner.subject_type(config.name());
        collection.set_config(config);
    }

    /// Register a context definition
    pub fn register_context_definition(&self, definition: Arc<dyn ContextDefinition>) {
        self.inner.context_definitions.register(definition);
    }

    /// Register a context accumulator feeding active-contexts snapshots
    pub fn register_context_accumulator(&self, accumulator: Arc<dyn ContextAccumulator>) {
        self.inner.accumulators.write().push(accumulator);
    }

    /// Replace the check notifier
    pub fn set_check_notifier(&self, notifier: Arc<dyn CheckNotifier>) {
        *self.inner.notifier.write() = notifier;
    }

    /// The rank ladder cache
    pub fn ladders(&self) -> &RankLadderCache {
        &self.inner.ladders
    }

    /// The underlying data store
    pub fn store(&self) -> &Arc<dyn DataStore> {
        &self.inner.store
    }

    /// Drop every cache in the engine
    pub fn invalidate_all(&self) {
        for collection in self.inner.all_collections() {
            collection.data_cache().invalidate_all();
        }
        self.inner.invalidate_all_baked();
        self.inner.ladders.invalidate_all();
        info!("All engine caches invalidated");
    }

    /// Inheritance walks performed since engine creation
    pub fn bakes_performed(&self) -> u64 {
        self.inner.bakes_performed.load(Ordering::Relaxed)
    }

    /// Engine-wide statistics
    pub fn stats(&self) -> EngineStats {
        let collections = self.inner.all_collections();
        EngineStats {
            subject_types: collections.len(),
            live_subjects: collections.iter().map(|c| c.live_count()).sum(),
            cached_data_entries: collections.iter().map(|c| c.cache_stats().entries).sum(),
            bakes_performed: self.bakes_performed(),
        }
    }
}

impl std::fmt::Debug for PermissionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PermissionEngine")
            .field("stats", &self.stats())
            .finish()
    }
}
