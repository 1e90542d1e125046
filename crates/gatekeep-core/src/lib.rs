//! Gatekeep Core Library
//!
//! Admission control for capacity-bounded resources. A [`Constraint`] defines a
//! strategy and a permit capacity; each unit of the constraint keeps its own queue
//! of consumers in a pluggable [`ConstraintRegistry`].

pub mod config;
pub mod constants;
pub mod constraint;
pub mod error;
pub mod models;
pub mod registry;
pub mod retry;

// Re-export commonly used types
pub use config::{Config, DatabaseConfig, DrainConfig};
pub use constraint::Constraint;
pub use error::{ConstraintError, ErrorMetadata, LogLevel, RegistryError};
pub use models::{
    Consumer, ConsumerContext, ConsumerId, ConstraintId, ConstraintUnit, RunnableConsumers, Spec,
    State, Strategy, UnitQueue,
};
pub use registry::{ConstraintRegistry, InMemoryRegistry, RegistryResult};
pub use retry::retry_on_conflict;
