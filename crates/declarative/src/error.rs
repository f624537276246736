//! Error types for the reconciliation engine.
//!
//! Errors are grouped into categories that decide how far a failure
//! propagates. Configuration, graph, state and conflict errors abort the
//! whole run before anything is mutated. Provider errors are contained to
//! the failing operation and the operations that depend on it.

use std::path::PathBuf;
use thiserror::Error;

/// Broad classes of engine errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Missing or invalid run configuration
    Configuration,
    /// Duplicate names, dangling references, cycles
    Graph,
    /// Locked, corrupt or unreadable state snapshot
    State,
    /// A provider call failed
    Provider,
    /// A structural planner invariant was violated
    Conflict,
}

impl ErrorCategory {
    /// Whether an error of this category aborts the entire run.
    pub fn aborts_run(&self) -> bool {
        !matches!(self, Self::Provider)
    }

    /// Short user-facing label for this category.
    pub fn description(&self) -> &'static str {
        match self {
            Self::Configuration => "configuration error",
            Self::Graph => "resource graph error",
            Self::State => "state error",
            Self::Provider => "provider error",
            Self::Conflict => "internal engine error",
        }
    }
}

/// Errors reported by providers.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The physical resource does not exist
    #[error("resource '{id}' not found")]
    NotFound { id: String },

    /// The provider call failed
    #[error("{message}")]
    Failed {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl ProviderError {
    /// Create a failure with a plain message.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
            source: None,
        }
    }

    /// Create a failure wrapping an underlying error.
    pub fn with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Failed {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Errors that can occur while building, planning or applying a stack.
#[derive(Debug, Error)]
pub enum Error {
    #[error("missing required configuration key '{key}'")]
    MissingConfig { key: String },

    #[error("invalid configuration value for '{key}': {message}")]
    InvalidConfig { key: String, message: String },

    #[error("failed to parse configuration {}: {message}", .path.display())]
    ConfigParse { path: PathBuf, message: String },

    #[error("resource '{name}' is declared more than once")]
    DuplicateName { name: String },

    #[error(
        "resource '{resource}' property '{property}' references undeclared resource '{target}'"
    )]
    DanglingReference {
        resource: String,
        property: String,
        target: String,
    },

    #[error("cyclic dependency: {}", .cycle.join(" -> "))]
    CyclicDependency { cycle: Vec<String> },

    #[error("state {} is locked by {holder}", .path.display())]
    Locked { path: PathBuf, holder: String },

    #[error("state {} is corrupt: {reason}", .path.display())]
    CorruptState { path: PathBuf, reason: String },

    #[error("state schema version {found} is newer than the supported version {supported}")]
    UnsupportedStateVersion { found: u32, supported: u32 },

    #[error("state I/O error on {}: {source}", .path.display())]
    StateIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{operation} of '{resource}' failed: {source}")]
    Provider {
        resource: String,
        operation: &'static str,
        #[source]
        source: ProviderError,
    },

    #[error("no provider registered for kind '{kind}' (resource '{resource}')")]
    UnknownKind { kind: String, resource: String },

    #[error("resource '{name}' is protected and cannot be {action}")]
    ProtectedResource { name: String, action: &'static str },

    #[error("plan conflict: {message}")]
    PlanConflict { message: String },

    #[error("failed to start worker pool: {message}")]
    WorkerPool { message: String },
}

impl Error {
    /// The category that decides how this error propagates.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::MissingConfig { .. }
            | Error::InvalidConfig { .. }
            | Error::ConfigParse { .. }
            | Error::UnknownKind { .. }
            | Error::ProtectedResource { .. } => ErrorCategory::Configuration,
            Error::DuplicateName { .. }
            | Error::DanglingReference { .. }
            | Error::CyclicDependency { .. } => ErrorCategory::Graph,
            Error::Locked { .. }
            | Error::CorruptState { .. }
            | Error::UnsupportedStateVersion { .. }
            | Error::StateIo { .. } => ErrorCategory::State,
            Error::Provider { .. } => ErrorCategory::Provider,
            Error::PlanConflict { .. } | Error::WorkerPool { .. } => ErrorCategory::Conflict,
        }
    }

    pub(crate) fn state_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::StateIo {
            path: path.into(),
            source,
        }
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_abort_policy() {
        assert!(ErrorCategory::Configuration.aborts_run());
        assert!(ErrorCategory::Graph.aborts_run());
        assert!(ErrorCategory::State.aborts_run());
        assert!(ErrorCategory::Conflict.aborts_run());
        assert!(!ErrorCategory::Provider.aborts_run());
    }

    #[test]
    fn test_cycle_message_lists_path() {
        let err = Error::CyclicDependency {
            cycle: vec!["a".into(), "b".into(), "c".into(), "a".into()],
        };
        assert_eq!(err.to_string(), "cyclic dependency: a -> b -> c -> a");
        assert_eq!(err.category(), ErrorCategory::Graph);
    }

    #[test]
    fn test_provider_error_names_resource() {
        let err = Error::Provider {
            resource: "vm1".into(),
            operation: "read",
            source: ProviderError::failed("quota exceeded"),
        };
        assert_eq!(err.to_string(), "read of 'vm1' failed: quota exceeded");
        assert_eq!(err.category(), ErrorCategory::Provider);
    }

    #[test]
    fn test_missing_config_is_configuration() {
        let err = Error::MissingConfig {
            key: "gcp:region".into(),
        };
        assert!(err.to_string().contains("gcp:region"));
        assert_eq!(err.category(), ErrorCategory::Configuration);
    }
}
