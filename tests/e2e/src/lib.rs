//! Shared helpers for the end-to-end test suite

use std::sync::Arc;
use stratum_core::{
    EngineConfig, ImmutableSubjectData, MemoryDataStore, PermissionEngine, SegmentKey,
};

/// Initialize test logging once; respects `RUST_LOG`
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A fresh engine over a fresh in-memory store
pub fn test_engine() -> (PermissionEngine, Arc<MemoryDataStore>) {
    init_tracing();
    let store = Arc::new(MemoryDataStore::new());
    let engine = PermissionEngine::new(EngineConfig::default(), store.clone());
    (engine, store)
}

/// Seed one permission on a subject's context-free segment
pub async fn seed_permission(
    engine: &PermissionEngine,
    subject_type: &str,
    identifier: &str,
    permission: &str,
    value: i32,
) -> anyhow::Result<()> {
    engine
        .subject_type(subject_type)
        .update_data(identifier, |d| {
            d.update_segment(SegmentKey::global(), |s| {
                s.with_permission(permission, value)
            })
        })
        .await?;
    Ok(())
}

/// Seed a parent edge on a subject's context-free segment
pub async fn seed_parent(
    engine: &PermissionEngine,
    subject_type: &str,
    identifier: &str,
    parent_type: &str,
    parent_identifier: &str,
) -> anyhow::Result<()> {
    let parent = stratum_core::SubjectRef::new(parent_type, parent_identifier);
    engine
        .subject_type(subject_type)
        .update_data(identifier, |d| {
            d.update_segment(SegmentKey::global(), |s| s.with_parent(parent.clone()))
        })
        .await?;
    Ok(())
}

/// Build subject data holding a single context-free segment
pub fn global_data(build: impl FnOnce(stratum_core::DataSegment) -> stratum_core::DataSegment) -> ImmutableSubjectData {
    ImmutableSubjectData::new().update_segment(SegmentKey::global(), build)
}
