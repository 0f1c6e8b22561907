//! # Stratum
//!
//! Contextual permission resolution engine. Resolves *effective*
//! authorization data (permissions, options, group memberships) for
//! named subjects, combining multi-level inheritance, environmental
//! context, and transient/persistent precedence into cached, correctly
//! invalidated results.
//!
//! ## Architecture
//!
//! ```text
//! caller → CalculatedSubject → bake cache
//!                                 ↓ miss
//!            ContextResolver → InheritanceWalker → BakedSubjectData
//!                                 ↓
//!            SubjectDataCache → DataStore
//! ```
//!
//! Any committed write to a subject's segments invalidates that
//! subject's baked results and, conservatively, every other live
//! subject whose results used it as an ancestor.
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use stratum_core::{
//!     ContextSet, EngineConfig, MemoryDataStore, PermissionEngine, SegmentKey,
//! };
//!
//! #[tokio::main]
//! async fn main() -> stratum_core::Result<()> {
//!     let engine = PermissionEngine::new(
//!         EngineConfig::default(),
//!         Arc::new(MemoryDataStore::new()),
//!     );
//!
//!     let users = engine.subject_type("user");
//!     users
//!         .update_data("alice", |d| {
//!             d.update_segment(SegmentKey::global(), |s| {
//!                 s.with_permission("chat.send", 1)
//!             })
//!         })
//!         .await?;
//!
//!     let alice = users.subject("alice").await?;
//!     assert!(alice.has_permission(Some(&ContextSet::empty()), "chat.send").await?);
//!     Ok(())
//! }
//! ```

pub mod baker;
pub mod cache;
pub mod context;
pub mod engine;
pub mod error;
pub mod glob;
pub mod ladder;
pub mod listener;
pub mod notifier;
pub mod segment;
pub mod store;
pub mod subject;
pub mod tree;
pub mod types;

// Re-export commonly used types
pub use baker::BakedSubjectData;
pub use cache::{CacheStats, SubjectDataCache, SubjectDataReference, SubjectDataUpdateListener};
pub use context::{
    ContextAccumulator, ContextDefinition, ContextDefinitions, ContextInheritance,
    ContextResolver, ContextSet, ContextValue, SimpleContextDefinition,
};
pub use engine::{
    BakeCacheConfig, EngineConfig, EngineStats, PermissionEngine, SubjectTypeCollection,
};
pub use error::{Result, StratumError};
pub use ladder::{RankLadder, RankLadderCache};
pub use listener::{ListenerHandle, ListenerRegistry};
pub use notifier::{CheckNotifier, NoopCheckNotifier};
pub use segment::{DataSegment, ImmutableSubjectData, SegmentKey};
pub use store::{DataStore, DataStoreListener, MemoryDataStore};
pub use subject::CalculatedSubject;
pub use tree::NodeTree;
pub use types::{SourcePriority, SubjectRef, SubjectTypeConfig};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
