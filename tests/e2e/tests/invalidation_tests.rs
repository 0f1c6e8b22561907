//! End-to-end cache behavior: invalidation propagation, shared
//! in-flight bakes, failure handling, and the observation boundary

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use stratum_core::{
    CheckNotifier, ContextAccumulator, ContextSet, ContextValue, DataStore, EngineConfig,
    ImmutableSubjectData, MemoryDataStore, PermissionEngine, SegmentKey, StratumError, SubjectRef,
};
use stratum_e2e_tests::{seed_parent, seed_permission, test_engine};

#[tokio::test]
async fn ancestor_change_invalidates_dependent_bakes() {
    let (engine, _store) = test_engine();

    seed_parent(&engine, "user", "alice", "group", "staff").await.unwrap();
    seed_permission(&engine, "group", "staff", "build", 1).await.unwrap();

    let alice = engine.subject_type("user").subject("alice").await.unwrap();
    let contexts = ContextSet::empty();
    assert_eq!(alice.permission(Some(&contexts), "build").await.unwrap(), 1);

    // Change the ancestor; alice's cached result must not survive.
    engine
        .subject_type("group")
        .update_data("staff", |d| {
            d.update_segment(SegmentKey::global(), |s| s.with_permission("build", -5))
        })
        .await
        .unwrap();

    assert_eq!(alice.permission(Some(&contexts), "build").await.unwrap(), -5);
}

#[tokio::test]
async fn own_change_invalidates_own_bakes() {
    let (engine, _store) = test_engine();

    seed_permission(&engine, "user", "alice", "chat.send", 1).await.unwrap();
    let alice = engine.subject_type("user").subject("alice").await.unwrap();
    let contexts = ContextSet::empty();
    assert_eq!(alice.permission(Some(&contexts), "chat.send").await.unwrap(), 1);

    seed_permission(&engine, "user", "alice", "chat.send", -2).await.unwrap();
    assert_eq!(alice.permission(Some(&contexts), "chat.send").await.unwrap(), -2);
}

#[tokio::test]
async fn transient_update_invalidates() {
    let (engine, _store) = test_engine();

    seed_permission(&engine, "user", "alice", "fly", 1).await.unwrap();
    let alice = engine.subject_type("user").subject("alice").await.unwrap();
    let contexts = ContextSet::empty();
    assert_eq!(alice.permission(Some(&contexts), "fly").await.unwrap(), 1);

    // Session-only deny with stronger magnitude.
    alice.update_transient(|d| {
        d.update_segment(SegmentKey::global(), |s| s.with_permission("fly", -5))
    });

    assert_eq!(alice.permission(Some(&contexts), "fly").await.unwrap(), -5);
}

#[tokio::test]
async fn store_side_write_reaches_live_subjects() {
    let (engine, store) = test_engine();

    seed_permission(&engine, "user", "alice", "chat.send", 1).await.unwrap();
    let alice = engine.subject_type("user").subject("alice").await.unwrap();
    let contexts = ContextSet::empty();
    assert_eq!(alice.permission(Some(&contexts), "chat.send").await.unwrap(), 1);

    // Write directly against the store, bypassing the engine's caches,
    // as a hot-swapped backend or second cache instance would.
    let external = ImmutableSubjectData::new()
        .update_segment(SegmentKey::global(), |s| s.with_permission("chat.send", -3));
    store.set_data("user", "alice", external).await.unwrap();

    assert_eq!(alice.permission(Some(&contexts), "chat.send").await.unwrap(), -3);
}

#[tokio::test]
async fn defaults_change_invalidates_everyone() {
    let (engine, _store) = test_engine();

    seed_permission(&engine, "user", "alice", "chat.send", 1).await.unwrap();
    let alice = engine.subject_type("user").subject("alice").await.unwrap();
    let contexts = ContextSet::empty();
    assert_eq!(alice.permission(Some(&contexts), "spawn").await.unwrap(), 0);

    seed_permission(&engine, "user", "defaults", "spawn", 1).await.unwrap();
    assert_eq!(alice.permission(Some(&contexts), "spawn").await.unwrap(), 1);
}

#[tokio::test]
async fn context_inheritance_change_invalidates_bakes() {
    let (engine, store) = test_engine();

    engine
        .subject_type("user")
        .update_data("alice", |d| {
            d.update_segment(
                SegmentKey::in_contexts(ContextSet::single("world-group", "hostile")),
                |s| s.with_permission("pvp", 1),
            )
        })
        .await
        .unwrap();

    let alice = engine.subject_type("user").subject("alice").await.unwrap();
    let nether = ContextSet::single("world", "nether");
    assert_eq!(alice.permission(Some(&nether), "pvp").await.unwrap(), 0);

    let mut inheritance: stratum_core::ContextInheritance = HashMap::new();
    inheritance.insert(
        ContextValue::new("world", "nether"),
        vec![ContextValue::new("world-group", "hostile")],
    );
    store.set_context_inheritance(inheritance).await.unwrap();

    assert_eq!(alice.permission(Some(&nether), "pvp").await.unwrap(), 1);
}

#[tokio::test]
async fn concurrent_lookups_share_one_walk() {
    let (engine, _store) = test_engine();

    seed_permission(&engine, "user", "alice", "chat.send", 1).await.unwrap();
    let alice = engine.subject_type("user").subject("alice").await.unwrap();
    let contexts = ContextSet::empty();

    let before = engine.bakes_performed();
    let (a, b) = tokio::join!(
        alice.permission(Some(&contexts), "chat.send"),
        alice.permission(Some(&contexts), "chat.send"),
    );

    assert_eq!(a.unwrap(), 1);
    assert_eq!(b.unwrap(), 1);
    assert_eq!(engine.bakes_performed() - before, 1);
}

/// Store wrapper that fails reads on demand
struct FlakyStore {
    inner: MemoryDataStore,
    fail_reads: AtomicBool,
}

#[async_trait]
impl DataStore for FlakyStore {
    async fn get_data(
        &self,
        subject_type: &str,
        identifier: &str,
    ) -> stratum_core::Result<ImmutableSubjectData> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StratumError::Store("injected read failure".to_string()));
        }
        self.inner.get_data(subject_type, identifier).await
    }

    async fn set_data(
        &self,
        subject_type: &str,
        identifier: &str,
        data: ImmutableSubjectData,
    ) -> stratum_core::Result<ImmutableSubjectData> {
        self.inner.set_data(subject_type, identifier, data).await
    }

    async fn is_registered(
        &self,
        subject_type: &str,
        identifier: &str,
    ) -> stratum_core::Result<bool> {
        self.inner.is_registered(subject_type, identifier).await
    }

    async fn get_all_identifiers(&self, subject_type: &str) -> stratum_core::Result<Vec<String>> {
        self.inner.get_all_identifiers(subject_type).await
    }

    async fn get_rank_ladder(&self, name: &str) -> stratum_core::Result<stratum_core::RankLadder> {
        self.inner.get_rank_ladder(name).await
    }

    async fn set_rank_ladder(
        &self,
        name: &str,
        ladder: stratum_core::RankLadder,
    ) -> stratum_core::Result<stratum_core::RankLadder> {
        self.inner.set_rank_ladder(name, ladder).await
    }

    async fn get_context_inheritance(&self) -> stratum_core::Result<stratum_core::ContextInheritance> {
        self.inner.get_context_inheritance().await
    }

    async fn set_context_inheritance(
        &self,
        inheritance: stratum_core::ContextInheritance,
    ) -> stratum_core::Result<stratum_core::ContextInheritance> {
        self.inner.set_context_inheritance(inheritance).await
    }

    fn register_listener(
        &self,
        listener: Arc<dyn stratum_core::DataStoreListener>,
    ) -> stratum_core::ListenerHandle {
        self.inner.register_listener(listener)
    }
}

#[tokio::test]
async fn failed_bake_is_not_cached() {
    stratum_e2e_tests::init_tracing();
    let store = Arc::new(FlakyStore {
        inner: MemoryDataStore::new(),
        fail_reads: AtomicBool::new(false),
    });
    let engine = PermissionEngine::new(EngineConfig::default(), store.clone());

    engine
        .subject_type("user")
        .update_data("alice", |d| {
            d.update_segment(SegmentKey::global(), |s| {
                s.with_permission("chat.send", 1)
                    .with_parent(SubjectRef::new("group", "staff"))
            })
        })
        .await
        .unwrap();
    let alice = engine.subject_type("user").subject("alice").await.unwrap();

    // The walk reaches the parent, whose load fails.
    store.fail_reads.store(true, Ordering::SeqCst);
    let contexts = ContextSet::empty();
    assert!(alice.permission(Some(&contexts), "chat.send").await.is_err());

    // The failure was not cached; a healthy store means a clean retry.
    store.fail_reads.store(false, Ordering::SeqCst);
    assert_eq!(alice.permission(Some(&contexts), "chat.send").await.unwrap(), 1);
}

struct WorldAccumulator;

#[async_trait]
impl ContextAccumulator for WorldAccumulator {
    fn key(&self) -> &str {
        "world"
    }

    async fn accumulate(&self, _subject: &SubjectRef) -> Vec<ContextValue> {
        vec![ContextValue::new("world", "nether")]
    }
}

#[tokio::test]
async fn active_contexts_come_from_accumulators() {
    let (engine, _store) = test_engine();
    engine.register_context_accumulator(Arc::new(WorldAccumulator));

    engine
        .subject_type("user")
        .update_data("alice", |d| {
            d.update_segment(
                SegmentKey::in_contexts(ContextSet::single("world", "nether")),
                |s| s.with_permission("portal.use", 1),
            )
        })
        .await
        .unwrap();

    let alice = engine.subject_type("user").subject("alice").await.unwrap();
    // No explicit set: the accumulator-provided snapshot applies.
    assert_eq!(alice.permission(None, "portal.use").await.unwrap(), 1);
}

#[derive(Default)]
struct RecordingNotifier {
    checks: Mutex<Vec<(SubjectRef, String, i32)>>,
}

impl CheckNotifier for RecordingNotifier {
    fn permission_checked(
        &self,
        subject: &SubjectRef,
        _contexts: &ContextSet,
        permission: &str,
        value: i32,
    ) {
        self.checks
            .lock()
            .unwrap()
            .push((subject.clone(), permission.to_string(), value));
    }

    fn option_checked(
        &self,
        _subject: &SubjectRef,
        _contexts: &ContextSet,
        _option: &str,
        _value: Option<&str>,
    ) {
    }

    fn parents_checked(
        &self,
        _subject: &SubjectRef,
        _contexts: &ContextSet,
        _parents: &[SubjectRef],
    ) {
    }
}

#[tokio::test]
async fn lookups_report_to_the_check_notifier() {
    let (engine, _store) = test_engine();
    let notifier = Arc::new(RecordingNotifier::default());
    engine.set_check_notifier(notifier.clone());

    seed_permission(&engine, "user", "alice", "chat.send", 1).await.unwrap();
    let alice = engine.subject_type("user").subject("alice").await.unwrap();
    alice
        .permission(Some(&ContextSet::empty()), "chat.send")
        .await
        .unwrap();

    let checks = notifier.checks.lock().unwrap();
    assert_eq!(
        checks.as_slice(),
        &[(SubjectRef::new("user", "alice"), "chat.send".to_string(), 1)]
    );
}

struct PanickingNotifier;

impl CheckNotifier for PanickingNotifier {
    fn permission_checked(&self, _: &SubjectRef, _: &ContextSet, _: &str, _: i32) {
        panic!("observer misbehaved");
    }

    fn option_checked(&self, _: &SubjectRef, _: &ContextSet, _: &str, _: Option<&str>) {}

    fn parents_checked(&self, _: &SubjectRef, _: &ContextSet, _: &[SubjectRef]) {}
}

#[tokio::test]
async fn panicking_notifier_does_not_affect_lookups() {
    let (engine, _store) = test_engine();
    engine.set_check_notifier(Arc::new(PanickingNotifier));

    seed_permission(&engine, "user", "alice", "chat.send", 1).await.unwrap();
    let alice = engine.subject_type("user").subject("alice").await.unwrap();

    assert_eq!(
        alice
            .permission(Some(&ContextSet::empty()), "chat.send")
            .await
            .unwrap(),
        1
    );
}

#[tokio::test]
async fn rank_ladder_round_trip_and_invalidation() {
    let (engine, store) = test_engine();

    let member = SubjectRef::new("group", "member");
    let admin = SubjectRef::new("group", "admin");

    engine
        .ladders()
        .update("staff", |l| l.add(member.clone()).add(admin.clone()))
        .await
        .unwrap();

    let ladder = engine.ladders().get("staff").await.unwrap();
    assert_eq!(ladder.position(&member), Some(0));

    let promoted = engine
        .ladders()
        .update("staff", |l| l.promote(&member))
        .await
        .unwrap();
    assert_eq!(promoted.position(&member), Some(1));

    // Store-side replacement reaches the cache through the listener.
    store
        .set_rank_ladder("staff", stratum_core::RankLadder::new("staff").add(admin.clone()))
        .await
        .unwrap();
    let reloaded = engine.ladders().get("staff").await.unwrap();
    assert_eq!(reloaded.len(), 1);
    assert!(reloaded.contains(&admin));
}

#[tokio::test]
async fn rebaking_unchanged_inputs_is_reproducible() {
    let (engine, _store) = test_engine();

    seed_permission(&engine, "user", "alice", "chat.{send,read}", 1).await.unwrap();
    seed_parent(&engine, "user", "alice", "group", "staff").await.unwrap();
    seed_permission(&engine, "group", "staff", "build.*", 4).await.unwrap();

    let alice = engine.subject_type("user").subject("alice").await.unwrap();
    let contexts = ContextSet::empty();
    let first = alice.baked_data(Some(&contexts)).await.unwrap();

    alice.invalidate_baked();
    let second = alice.baked_data(Some(&contexts)).await.unwrap();

    assert_eq!(*first, *second);
}

#[tokio::test]
async fn eviction_loses_no_data() {
    let (engine, _store) = test_engine();

    seed_permission(&engine, "user", "alice", "chat.send", 1).await.unwrap();
    let users = engine.subject_type("user");
    {
        let alice = users.subject("alice").await.unwrap();
        assert_eq!(
            alice
                .permission(Some(&ContextSet::empty()), "chat.send")
                .await
                .unwrap(),
            1
        );
    }

    // Pure-cache eviction: everything is recomputable from the store.
    users.evict("alice");
    let alice = users.subject("alice").await.unwrap();
    assert_eq!(
        alice
            .permission(Some(&ContextSet::empty()), "chat.send")
            .await
            .unwrap(),
        1
    );
}
