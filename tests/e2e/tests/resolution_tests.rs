//! End-to-end resolution behavior: combination rules, globs,
//! exclusion markers, cycles, and context closure

use std::collections::HashMap;
use stratum_core::{ContextSet, ContextValue, SegmentKey, SubjectRef};
use stratum_e2e_tests::{seed_parent, seed_permission, test_engine};

#[tokio::test]
async fn magnitude_wins_across_inheritance() {
    let (engine, _store) = test_engine();

    // Own data asserts weakly, a later-visited parent asserts strongly.
    seed_permission(&engine, "user", "alice", "x.y", 1).await.unwrap();
    seed_parent(&engine, "user", "alice", "group", "banned").await.unwrap();
    seed_permission(&engine, "group", "banned", "x.y", -5).await.unwrap();

    let alice = engine.subject_type("user").subject("alice").await.unwrap();
    assert_eq!(
        alice.permission(Some(&ContextSet::empty()), "x.y").await.unwrap(),
        -5
    );
}

#[tokio::test]
async fn equal_magnitude_first_seen_wins() {
    let (engine, _store) = test_engine();

    seed_permission(&engine, "user", "alice", "x.y", 1).await.unwrap();
    seed_parent(&engine, "user", "alice", "group", "other").await.unwrap();
    seed_permission(&engine, "group", "other", "x.y", -1).await.unwrap();

    let alice = engine.subject_type("user").subject("alice").await.unwrap();
    assert_eq!(
        alice.permission(Some(&ContextSet::empty()), "x.y").await.unwrap(),
        1
    );
}

#[tokio::test]
async fn wildcard_key_answers_subtree_queries() {
    let (engine, _store) = test_engine();

    engine
        .subject_type("user")
        .update_data("alice", |d| {
            d.update_segment(SegmentKey::global(), |s| {
                s.with_permission("foo.*", 5).with_default_value(-2)
            })
        })
        .await
        .unwrap();

    let alice = engine.subject_type("user").subject("alice").await.unwrap();
    assert_eq!(
        alice.permission(Some(&ContextSet::empty()), "foo.bar").await.unwrap(),
        5
    );
    // No match at all falls through to the segment's default value.
    assert_eq!(
        alice.permission(Some(&ContextSet::empty()), "baz").await.unwrap(),
        -2
    );
}

#[tokio::test]
async fn glob_alternation_expands_to_literals() {
    let (engine, _store) = test_engine();

    seed_permission(&engine, "user", "alice", "foo.{read,write}", 3).await.unwrap();

    let alice = engine.subject_type("user").subject("alice").await.unwrap();
    let contexts = ContextSet::empty();
    assert_eq!(alice.permission(Some(&contexts), "foo.read").await.unwrap(), 3);
    assert_eq!(alice.permission(Some(&contexts), "foo.write").await.unwrap(), 3);
    assert_eq!(alice.permission(Some(&contexts), "foo.other").await.unwrap(), 0);
}

#[tokio::test]
async fn malformed_glob_merges_literally() {
    let (engine, _store) = test_engine();

    seed_permission(&engine, "user", "alice", "foo.{unclosed", 2).await.unwrap();

    let alice = engine.subject_type("user").subject("alice").await.unwrap();
    assert_eq!(
        alice
            .permission(Some(&ContextSet::empty()), "foo.{unclosed")
            .await
            .unwrap(),
        2
    );
}

#[tokio::test]
async fn exclusion_marker_honored_only_near_the_top() {
    let (engine, _store) = test_engine();

    // alice -> staff -> hidden, with the marker two levels up.
    seed_parent(&engine, "user", "alice", "group", "staff").await.unwrap();
    seed_parent(&engine, "group", "staff", "group", "hidden").await.unwrap();
    seed_permission(&engine, "group", "hidden", "#secret", 1).await.unwrap();

    let alice = engine.subject_type("user").subject("alice").await.unwrap();
    assert_eq!(
        alice.permission(Some(&ContextSet::empty()), "secret").await.unwrap(),
        0
    );

    // Queried directly, the marker is the subject's own data.
    let hidden = engine.subject_type("group").subject("hidden").await.unwrap();
    assert_eq!(
        hidden.permission(Some(&ContextSet::empty()), "secret").await.unwrap(),
        1
    );
}

#[tokio::test]
async fn circular_inheritance_terminates_with_both_sides() {
    let (engine, _store) = test_engine();

    seed_permission(&engine, "group", "a", "a.perm", 1).await.unwrap();
    seed_parent(&engine, "group", "a", "group", "b").await.unwrap();
    seed_permission(&engine, "group", "b", "b.perm", 1).await.unwrap();
    seed_parent(&engine, "group", "b", "group", "a").await.unwrap();

    let a = engine.subject_type("group").subject("a").await.unwrap();
    let contexts = ContextSet::empty();
    assert_eq!(a.permission(Some(&contexts), "a.perm").await.unwrap(), 1);
    assert_eq!(a.permission(Some(&contexts), "b.perm").await.unwrap(), 1);
}

#[tokio::test]
async fn context_closure_applies_inherited_contexts() {
    let (engine, store) = test_engine();

    let mut inheritance: stratum_core::ContextInheritance = HashMap::new();
    inheritance.insert(
        ContextValue::new("world", "nether"),
        vec![ContextValue::new("world-group", "hostile")],
    );
    use stratum_core::DataStore;
    store.set_context_inheritance(inheritance).await.unwrap();

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
    assert_eq!(
        alice
            .permission(Some(&ContextSet::single("world", "nether")), "pvp")
            .await
            .unwrap(),
        1
    );
    assert_eq!(
        alice
            .permission(Some(&ContextSet::single("world", "overworld")), "pvp")
            .await
            .unwrap(),
        0
    );
}

#[tokio::test]
async fn options_are_first_write_wins() {
    let (engine, _store) = test_engine();

    engine
        .subject_type("user")
        .update_data("alice", |d| {
            d.update_segment(SegmentKey::global(), |s| {
                s.with_option("prefix", "[user]")
                    .with_parent(SubjectRef::new("group", "admin"))
            })
        })
        .await
        .unwrap();
    engine
        .subject_type("group")
        .update_data("admin", |d| {
            d.update_segment(SegmentKey::global(), |s| {
                s.with_option("prefix", "[admin]").with_option("color", "red")
            })
        })
        .await
        .unwrap();

    let alice = engine.subject_type("user").subject("alice").await.unwrap();
    let contexts = ContextSet::empty();
    // Own value was written first and is never overwritten.
    assert_eq!(
        alice.option(Some(&contexts), "prefix").await.unwrap().as_deref(),
        Some("[user]")
    );
    // Parent-only options are inherited.
    assert_eq!(
        alice.option(Some(&contexts), "color").await.unwrap().as_deref(),
        Some("red")
    );
}

#[tokio::test]
async fn inherited_default_value_backstops_unset_permissions() {
    let (engine, _store) = test_engine();

    seed_parent(&engine, "user", "alice", "group", "restricted").await.unwrap();
    engine
        .subject_type("group")
        .update_data("restricted", |d| {
            d.update_segment(SegmentKey::global(), |s| s.with_default_value(-1))
        })
        .await
        .unwrap();

    let alice = engine.subject_type("user").subject("alice").await.unwrap();
    assert_eq!(
        alice
            .permission(Some(&ContextSet::empty()), "anything.unset")
            .await
            .unwrap(),
        -1
    );
}

#[tokio::test]
async fn non_inheritable_segment_keeps_parents_private() {
    let (engine, _store) = test_engine();

    // staff's parent edge is marked non-inheritable.
    engine
        .subject_type("group")
        .update_data("staff", |d| {
            d.update_segment(
                SegmentKey::new(ContextSet::empty(), 0, false),
                |s| s.with_parent(SubjectRef::new("group", "admin")),
            )
        })
        .await
        .unwrap();
    seed_permission(&engine, "group", "admin", "kick", 1).await.unwrap();
    seed_parent(&engine, "user", "alice", "group", "staff").await.unwrap();

    // Visited as an ancestor, staff does not emit its parents.
    let alice = engine.subject_type("user").subject("alice").await.unwrap();
    assert_eq!(
        alice.permission(Some(&ContextSet::empty()), "kick").await.unwrap(),
        0
    );

    // Queried directly, it does.
    let staff = engine.subject_type("group").subject("staff").await.unwrap();
    assert_eq!(
        staff.permission(Some(&ContextSet::empty()), "kick").await.unwrap(),
        1
    );
}

#[tokio::test]
async fn global_defaults_reach_every_type() {
    let (engine, _store) = test_engine();

    seed_permission(&engine, "defaults", "global", "motd.view", 1).await.unwrap();

    let alice = engine.subject_type("user").subject("alice").await.unwrap();
    let system = engine.subject_type("system").subject("console").await.unwrap();
    let contexts = ContextSet::empty();
    assert_eq!(alice.permission(Some(&contexts), "motd.view").await.unwrap(), 1);
    assert_eq!(system.permission(Some(&contexts), "motd.view").await.unwrap(), 1);
}
