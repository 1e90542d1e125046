//! Storage contract for constraints and their consumers
//!
//! A registry owns every persisted constraint and consumer record. Implementations
//! must make operations on the same (constraint id, unit) pair linearizable: the
//! engine reads a [`UnitQueue`] snapshot, decides, and then issues one write that
//! is conditional on the snapshot's `version` whenever the decision depends on
//! capacity. A stale write must fail with [`RegistryError::Conflict`] and leave the
//! unit untouched.

mod memory;

pub use memory::InMemoryRegistry;

use async_trait::async_trait;

use crate::constraint::Constraint;
use crate::error::RegistryError;
use crate::models::{
    Consumer, ConsumerContext, ConsumerId, ConstraintId, ConstraintUnit, UnitQueue,
};

pub type RegistryResult<T> = Result<T, RegistryError>;

#[async_trait]
pub trait ConstraintRegistry: Send + Sync {
    /// Persist a new constraint. Fails with `DuplicateConstraint` if the id exists.
    async fn save(&self, constraint: Constraint) -> RegistryResult<Constraint>;

    /// Look up a constraint; `None` if it was never created.
    async fn load(&self, id: &ConstraintId) -> RegistryResult<Option<Constraint>>;

    /// All constraints, ordered by id.
    async fn list_constraints(&self) -> RegistryResult<Vec<Constraint>>;

    /// Units of a constraint that have at least one consumer record.
    /// A unit whose records were all pruned is not listed.
    async fn list_units(&self, id: &ConstraintId) -> RegistryResult<Vec<ConstraintUnit>>;

    /// Consumers of a unit in registration order, with the unit's version.
    /// An untouched unit yields an empty queue at version 0.
    async fn load_consumers(
        &self,
        id: &ConstraintId,
        unit: &ConstraintUnit,
    ) -> RegistryResult<UnitQueue>;

    /// Append a consumer at the tail of the unit's queue.
    ///
    /// Fails with `Conflict` if the unit is no longer at `expected_version`, and with
    /// `DuplicateConsumer` if the consumer id is already present in the unit.
    async fn register_consumer(
        &self,
        id: &ConstraintId,
        unit: &ConstraintUnit,
        consumer: Consumer,
        expected_version: u64,
    ) -> RegistryResult<()>;

    /// Move a blocked consumer to active, merging `context` into its stored context.
    ///
    /// Returns `false` without writing if the consumer is absent or not blocked.
    /// Fails with `Conflict` if the unit is no longer at `expected_version`.
    async fn consumer_unblocked(
        &self,
        id: &ConstraintId,
        unit: &ConstraintUnit,
        consumer_id: &ConsumerId,
        context: &ConsumerContext,
        expected_version: u64,
    ) -> RegistryResult<bool>;

    /// Move an active consumer to finished. Returns `false` if it is not active.
    async fn consumer_finished(
        &self,
        id: &ConstraintId,
        unit: &ConstraintUnit,
        consumer_id: &ConsumerId,
        context: &ConsumerContext,
    ) -> RegistryResult<bool>;

    /// Move a blocked consumer to withdrawn. Returns `false` if it is not blocked.
    async fn consumer_withdrawn(
        &self,
        id: &ConstraintId,
        unit: &ConstraintUnit,
        consumer_id: &ConsumerId,
        context: &ConsumerContext,
    ) -> RegistryResult<bool>;

    /// Drop finished and withdrawn records of a unit and return how many were removed.
    ///
    /// Active and blocked consumers keep their order. The unit's version is kept, so
    /// snapshots taken before the prune stay comparable. A pruned consumer id may be
    /// registered again.
    async fn prune_finished(
        &self,
        id: &ConstraintId,
        unit: &ConstraintUnit,
    ) -> RegistryResult<usize>;
}

/// Merge `extra` into `context`, overwriting keys that already exist.
pub fn merge_context(context: &mut ConsumerContext, extra: &ConsumerContext) {
    for (key, value) in extra {
        context.insert(key.clone(), value.clone());
    }
}
