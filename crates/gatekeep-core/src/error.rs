//! Error types module
//!
//! `RegistryError` is what storage implementations return. `ConstraintError` is what
//! callers of the engine see: invalid input, storage faults wrapped with the
//! operation that hit them, contention, and unsatisfiable consumers.
//!
//! Expected no-op outcomes (finishing a consumer that is not active, unblocking one
//! that is not blocked) are not errors; those operations return `false`.

use crate::models::{ConstraintId, ConstraintUnit, ConsumerId};

/// Log level for error reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Debug level - for expected errors like validation failures
    Debug,
    /// Warning level - for recoverable issues like contention
    Warn,
    /// Error level - for unexpected failures
    Error,
}

/// Describes how an error should be handled by callers.
pub trait ErrorMetadata {
    /// Machine-readable error code (e.g., "INVALID_PERMITS")
    fn error_code(&self) -> &'static str;

    /// Whether retrying the same call may succeed
    fn is_recoverable(&self) -> bool;

    /// Suggested action for the caller
    fn suggested_action(&self) -> Option<&'static str>;

    /// Log level for this error
    fn log_level(&self) -> LogLevel;
}

/// Failures reported by a [`crate::registry::ConstraintRegistry`] implementation.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Unit {constraint_id}/{unit} was modified concurrently (expected version {expected})")]
    Conflict {
        constraint_id: ConstraintId,
        unit: ConstraintUnit,
        expected: u64,
    },

    #[error("Constraint {0} already exists")]
    DuplicateConstraint(ConstraintId),

    #[error("Consumer {consumer_id} is already registered on {constraint_id}/{unit}")]
    DuplicateConsumer {
        constraint_id: ConstraintId,
        unit: ConstraintUnit,
        consumer_id: ConsumerId,
    },

    #[error("Storage error: {0}")]
    Storage(#[source] anyhow::Error),
}

impl RegistryError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, RegistryError::Conflict { .. })
    }
}

impl From<anyhow::Error> for RegistryError {
    fn from(err: anyhow::Error) -> Self {
        RegistryError::Storage(err)
    }
}

/// Failures surfaced by [`crate::Constraint`] operations.
#[derive(Debug, thiserror::Error)]
pub enum ConstraintError {
    #[error("Invalid permits: {permits} requested, must be within 1..={limits}")]
    InvalidPermits { permits: u32, limits: u32 },

    #[error("Invalid constraint spec: {0}")]
    InvalidSpec(String),

    #[error("Unable to save constraint {id}")]
    UnableToSaveConstraint {
        id: ConstraintId,
        #[source]
        source: RegistryError,
    },

    #[error("Unable to load constraint {id}")]
    UnableToLoadConstraint {
        id: ConstraintId,
        #[source]
        source: RegistryError,
    },

    #[error("Unable to register consumer {consumer_id}")]
    UnableToRegisterConsumer {
        consumer_id: ConsumerId,
        #[source]
        source: RegistryError,
    },

    #[error("Consumer {consumer_id} needs {permits} permits but the constraint only has {limits}")]
    PermanentlyBlockedConsumer {
        consumer_id: ConsumerId,
        permits: u32,
        limits: u32,
    },

    #[error("Concurrent modification, retry the operation")]
    Conflict(#[source] RegistryError),

    #[error("Registry error: {0}")]
    Registry(#[source] RegistryError),
}

impl ConstraintError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, ConstraintError::Conflict(_))
    }
}

impl From<RegistryError> for ConstraintError {
    fn from(err: RegistryError) -> Self {
        if err.is_conflict() {
            ConstraintError::Conflict(err)
        } else {
            ConstraintError::Registry(err)
        }
    }
}

/// Static metadata for each variant: (error_code, recoverable, suggested_action, log_level).
fn constraint_error_static_metadata(
    err: &ConstraintError,
) -> (&'static str, bool, Option<&'static str>, LogLevel) {
    match err {
        ConstraintError::InvalidPermits { .. } => (
            "INVALID_PERMITS",
            false,
            Some("Request between 1 and the constraint's limits permits"),
            LogLevel::Debug,
        ),
        ConstraintError::InvalidSpec(_) => (
            "INVALID_SPEC",
            false,
            Some("Use a positive limit and a known strategy"),
            LogLevel::Debug,
        ),
        ConstraintError::UnableToSaveConstraint { source, .. } => (
            "UNABLE_TO_SAVE_CONSTRAINT",
            !matches!(source, RegistryError::DuplicateConstraint(_)),
            Some("Retry with backoff, or pick a new constraint id if it already exists"),
            LogLevel::Error,
        ),
        ConstraintError::UnableToLoadConstraint { .. } => (
            "UNABLE_TO_LOAD_CONSTRAINT",
            true,
            Some("Retry after a short delay"),
            LogLevel::Error,
        ),
        ConstraintError::UnableToRegisterConsumer { source, .. } => (
            "UNABLE_TO_REGISTER_CONSUMER",
            !matches!(source, RegistryError::DuplicateConsumer { .. }),
            Some("Retry after a short delay"),
            LogLevel::Error,
        ),
        ConstraintError::PermanentlyBlockedConsumer { .. } => (
            "PERMANENTLY_BLOCKED_CONSUMER",
            false,
            Some("Treat the consumer as failed and withdraw it"),
            LogLevel::Warn,
        ),
        ConstraintError::Conflict(_) => (
            "CONFLICT",
            true,
            Some("Retry immediately"),
            LogLevel::Warn,
        ),
        ConstraintError::Registry(_) => (
            "REGISTRY_ERROR",
            true,
            Some("Retry after a short delay"),
            LogLevel::Error,
        ),
    }
}

impl ErrorMetadata for ConstraintError {
    fn error_code(&self) -> &'static str {
        constraint_error_static_metadata(self).0
    }

    fn is_recoverable(&self) -> bool {
        constraint_error_static_metadata(self).1
    }

    fn suggested_action(&self) -> Option<&'static str> {
        constraint_error_static_metadata(self).2
    }

    fn log_level(&self) -> LogLevel {
        constraint_error_static_metadata(self).3
    }
}

impl ConstraintError {
    /// Get detailed error information including error chain
    pub fn detailed_message(&self) -> String {
        use std::error::Error;

        let mut details = self.to_string();

        let mut source = self.source();
        let mut depth = 0;
        while let Some(err) = source {
            depth += 1;
            if depth > 5 {
                details.push_str("\n  ... (truncated)");
                break;
            }
            details.push_str(&format!("\n  Caused by: {}", err));
            source = err.source();
        }

        details
    }
}
