//! Core subject types

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Subject type that holds global defaults
pub const DEFAULTS_TYPE: &str = "defaults";

/// Identifier of the per-type defaults subject within each type
pub const DEFAULTS_IDENTIFIER: &str = "defaults";

/// Identifier of the global defaults subject within [`DEFAULTS_TYPE`]
pub const GLOBAL_IDENTIFIER: &str = "global";

/// Subject type that holds last-resort fallback data
pub const FALLBACK_TYPE: &str = "fallback";

/// Reference to a named subject (e.g., a user, a group, a role)
///
/// Value-equal and hashable; used as a graph node key and as a parent
/// pointer inside data segments.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubjectRef {
    /// Subject type (e.g., "user", "group")
    #[serde(rename = "type")]
    pub subject_type: String,

    /// Identifier within the type (e.g., a name or UUID string)
    pub identifier: String,
}

impl SubjectRef {
    /// Create a new subject reference
    pub fn new(subject_type: impl Into<String>, identifier: impl Into<String>) -> Self {
        Self {
            subject_type: subject_type.into(),
            identifier: identifier.into(),
        }
    }

    /// The per-type defaults subject for a subject type
    pub fn type_defaults(subject_type: &str) -> Self {
        Self::new(subject_type, DEFAULTS_IDENTIFIER)
    }

    /// The global defaults subject
    pub fn global_defaults() -> Self {
        Self::new(DEFAULTS_TYPE, GLOBAL_IDENTIFIER)
    }

    /// The last-resort fallback subject for a subject type
    pub fn fallback_for(subject_type: &str) -> Self {
        Self::new(FALLBACK_TYPE, subject_type)
    }

    /// Whether this subject is itself a defaults subject
    pub fn is_defaults(&self) -> bool {
        self.subject_type == DEFAULTS_TYPE || self.identifier == DEFAULTS_IDENTIFIER
    }
}

impl fmt::Display for SubjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.subject_type, self.identifier)
    }
}

/// Priority order between transient and persistent data sources
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SourcePriority {
    /// Persistent segments are processed before transient ones (default)
    #[default]
    PersistentFirst,
    /// Transient segments are processed before persistent ones
    TransientFirst,
}

/// Per-identifier validation predicate
pub type IdentifierValidator = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Configuration for one subject type
///
/// Consumed by the inheritance walker (source priority) and by the
/// subject collection (identifier validation, checked before any cache
/// or store access).
#[derive(Clone)]
pub struct SubjectTypeConfig {
    name: String,
    priority: SourcePriority,
    validator: Option<IdentifierValidator>,
}

impl SubjectTypeConfig {
    /// Create a configuration with default settings
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            priority: SourcePriority::default(),
            validator: None,
        }
    }

    /// Set the transient/persistent processing order
    pub fn with_priority(mut self, priority: SourcePriority) -> Self {
        self.priority = priority;
        self
    }

    /// Set an identifier validation predicate
    pub fn with_identifier_validator(
        mut self,
        validator: impl Fn(&str) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.validator = Some(Arc::new(validator));
        self
    }

    /// Subject type name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Source processing order for this type
    pub fn priority(&self) -> SourcePriority {
        self.priority
    }

    /// Whether an identifier passes this type's validator
    pub fn is_valid_identifier(&self, identifier: &str) -> bool {
        match &self.validator {
            Some(validator) => validator(identifier),
            None => true,
        }
    }
}

impl fmt::Debug for SubjectTypeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubjectTypeConfig")
            .field("name", &self.name)
            .field("priority", &self.priority)
            .field("has_validator", &self.validator.is_some())
            .finish()
    }
}
