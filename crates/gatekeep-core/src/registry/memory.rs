//! In-process registry backed by a mutex-guarded map.
//!
//! Every operation takes the single lock, so operations on any unit are trivially
//! linearizable. Useful for tests and single-process deployments.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use super::{merge_context, ConstraintRegistry, RegistryResult};
use crate::constraint::Constraint;
use crate::error::RegistryError;
use crate::models::{
    Consumer, ConsumerContext, ConsumerId, ConstraintId, ConstraintUnit, State, UnitQueue,
};

type UnitKey = (ConstraintId, ConstraintUnit);

#[derive(Default)]
struct Inner {
    constraints: BTreeMap<ConstraintId, Constraint>,
    units: HashMap<UnitKey, UnitQueue>,
}

/// Registry holding all state in memory. Clones share the same state.
#[derive(Clone, Default)]
pub struct InMemoryRegistry {
    inner: Arc<Mutex<Inner>>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> RegistryResult<MutexGuard<'_, Inner>> {
        self.inner.lock().map_err(|_| {
            RegistryError::Storage(anyhow::anyhow!("in-memory registry lock poisoned"))
        })
    }

    /// Move a consumer currently in `from` to `to`, bumping the unit version.
    #[allow(clippy::too_many_arguments)]
    fn transition(
        &self,
        id: &ConstraintId,
        unit: &ConstraintUnit,
        consumer_id: &ConsumerId,
        context: &ConsumerContext,
        from: State,
        to: State,
        expected_version: Option<u64>,
    ) -> RegistryResult<bool> {
        let mut inner = self.lock()?;
        let Some(queue) = inner.units.get_mut(&(id.clone(), unit.clone())) else {
            return Ok(false);
        };

        let current_version = queue.version;
        let Some(consumer) = queue.consumers.iter_mut().find(|c| &c.id == consumer_id) else {
            return Ok(false);
        };
        if consumer.state != from {
            return Ok(false);
        }
        if let Some(expected) = expected_version {
            if expected != current_version {
                return Err(RegistryError::Conflict {
                    constraint_id: id.clone(),
                    unit: unit.clone(),
                    expected,
                });
            }
        }

        consumer.state = to;
        merge_context(&mut consumer.context, context);
        queue.version += 1;
        Ok(true)
    }
}

#[async_trait]
impl ConstraintRegistry for InMemoryRegistry {
    async fn save(&self, constraint: Constraint) -> RegistryResult<Constraint> {
        let mut inner = self.lock()?;
        if inner.constraints.contains_key(constraint.id()) {
            return Err(RegistryError::DuplicateConstraint(constraint.id().clone()));
        }
        inner
            .constraints
            .insert(constraint.id().clone(), constraint.clone());
        Ok(constraint)
    }

    async fn load(&self, id: &ConstraintId) -> RegistryResult<Option<Constraint>> {
        Ok(self.lock()?.constraints.get(id).cloned())
    }

    async fn list_constraints(&self) -> RegistryResult<Vec<Constraint>> {
        Ok(self.lock()?.constraints.values().cloned().collect())
    }

    async fn list_units(&self, id: &ConstraintId) -> RegistryResult<Vec<ConstraintUnit>> {
        let inner = self.lock()?;
        let mut units: Vec<ConstraintUnit> = inner
            .units
            .iter()
            .filter(|((constraint_id, _), queue)| {
                constraint_id == id && !queue.consumers.is_empty()
            })
            .map(|((_, unit), _)| unit.clone())
            .collect();
        units.sort();
        Ok(units)
    }

    async fn load_consumers(
        &self,
        id: &ConstraintId,
        unit: &ConstraintUnit,
    ) -> RegistryResult<UnitQueue> {
        Ok(self
            .lock()?
            .units
            .get(&(id.clone(), unit.clone()))
            .cloned()
            .unwrap_or_default())
    }

    async fn register_consumer(
        &self,
        id: &ConstraintId,
        unit: &ConstraintUnit,
        consumer: Consumer,
        expected_version: u64,
    ) -> RegistryResult<()> {
        let mut inner = self.lock()?;
        let key = (id.clone(), unit.clone());
        let current_version = inner.units.get(&key).map_or(0, |q| q.version);
        if current_version != expected_version {
            return Err(RegistryError::Conflict {
                constraint_id: id.clone(),
                unit: unit.clone(),
                expected: expected_version,
            });
        }

        let queue = inner.units.entry(key).or_default();
        if queue.find(&consumer.id).is_some() {
            return Err(RegistryError::DuplicateConsumer {
                constraint_id: id.clone(),
                unit: unit.clone(),
                consumer_id: consumer.id,
            });
        }

        queue.consumers.push(consumer);
        queue.version += 1;
        Ok(())
    }

    async fn consumer_unblocked(
        &self,
        id: &ConstraintId,
        unit: &ConstraintUnit,
        consumer_id: &ConsumerId,
        context: &ConsumerContext,
        expected_version: u64,
    ) -> RegistryResult<bool> {
        self.transition(
            id,
            unit,
            consumer_id,
            context,
            State::Blocked,
            State::Active,
            Some(expected_version),
        )
    }

    async fn consumer_finished(
        &self,
        id: &ConstraintId,
        unit: &ConstraintUnit,
        consumer_id: &ConsumerId,
        context: &ConsumerContext,
    ) -> RegistryResult<bool> {
        self.transition(
            id,
            unit,
            consumer_id,
            context,
            State::Active,
            State::Finished,
            None,
        )
    }

    async fn consumer_withdrawn(
        &self,
        id: &ConstraintId,
        unit: &ConstraintUnit,
        consumer_id: &ConsumerId,
        context: &ConsumerContext,
    ) -> RegistryResult<bool> {
        self.transition(
            id,
            unit,
            consumer_id,
            context,
            State::Blocked,
            State::Withdrawn,
            None,
        )
    }

    async fn prune_finished(
        &self,
        id: &ConstraintId,
        unit: &ConstraintUnit,
    ) -> RegistryResult<usize> {
        let mut inner = self.lock()?;
        let Some(queue) = inner.units.get_mut(&(id.clone(), unit.clone())) else {
            return Ok(0);
        };
        let before = queue.consumers.len();
        queue.consumers.retain(|c| !c.state.is_terminal());
        Ok(before - queue.consumers.len())
    }
}
