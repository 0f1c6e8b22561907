//! Observation boundary for resolved lookups
//!
//! Every permission/option/parent lookup on a calculated subject is
//! reported here. Purely observational: a notifier never affects the
//! result, and a panicking notifier is isolated from the lookup path.

use crate::context::ContextSet;
use crate::types::SubjectRef;

/// External observer of resolved lookups
pub trait CheckNotifier: Send + Sync {
    /// A permission was looked up
    fn permission_checked(
        &self,
        subject: &SubjectRef,
        contexts: &ContextSet,
        permission: &str,
        value: i32,
    );

    /// An option was looked up
    fn option_checked(
        &self,
        subject: &SubjectRef,
        contexts: &ContextSet,
        option: &str,
        value: Option<&str>,
    );

    /// A subject's parent list was looked up
    fn parents_checked(&self, subject: &SubjectRef, contexts: &ContextSet, parents: &[SubjectRef]);
}

/// Default notifier that ignores everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCheckNotifier;

impl CheckNotifier for NoopCheckNotifier {
    fn permission_checked(
        &self,
        _subject: &SubjectRef,
        _contexts: &ContextSet,
        _permission: &str,
        _value: i32,
    ) {
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
