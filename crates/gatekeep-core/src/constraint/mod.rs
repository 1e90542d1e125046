//! The constraint aggregate and its admission algorithm
//!
//! A [`Constraint`] pairs an id with an immutable [`Spec`]. Every operation re-reads
//! the unit's queue from the registry, decides in memory, and issues at most one
//! write. Writes whose outcome depends on capacity are conditional on the version
//! that was read, so a concurrent change surfaces as [`ConstraintError::Conflict`]
//! and the caller retries (see [`crate::retry::retry_on_conflict`]).

mod admission;

use serde::Serialize;
use serde_json::Value;

use crate::constants::MAX_BLOCKED_CONSUMERS;
use crate::error::ConstraintError;
use crate::models::{
    queue_limit_enabled, Consumer, ConsumerContext, ConsumerId, ConstraintId, ConstraintUnit,
    RunnableConsumers, Spec, State, Strategy, UnitQueue,
};
use crate::registry::ConstraintRegistry;

use admission::{admission_scan, remaining_capacity};

/// Constructed only through [`Constraint::new`], so `limits` is always positive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Constraint {
    id: ConstraintId,
    spec: Spec,
}

impl Constraint {
    /// Build a constraint without persisting it. Fails if `limits` is zero.
    pub fn new(id: ConstraintId, spec: Spec) -> Result<Self, ConstraintError> {
        if spec.limits == 0 {
            return Err(ConstraintError::InvalidSpec(format!(
                "limits for constraint {} must be greater than 0",
                id
            )));
        }
        Ok(Self { id, spec })
    }

    pub fn id(&self) -> &ConstraintId {
        &self.id
    }

    pub fn spec(&self) -> &Spec {
        &self.spec
    }

    /// Validate and persist a new constraint.
    #[tracing::instrument(skip(registry))]
    pub async fn create(
        id: ConstraintId,
        spec: Spec,
        registry: &dyn ConstraintRegistry,
    ) -> Result<Constraint, ConstraintError> {
        let constraint = Constraint::new(id.clone(), spec)?;
        let saved = registry
            .save(constraint)
            .await
            .map_err(|source| ConstraintError::UnableToSaveConstraint { id, source })?;

        tracing::info!(
            constraint_id = %saved.id,
            strategy = %saved.spec.strategy,
            limits = saved.spec.limits,
            "Constraint created"
        );
        Ok(saved)
    }

    /// Look up a constraint. A missing id is `Ok(None)`, not an error.
    #[tracing::instrument(skip(registry))]
    pub async fn load(
        id: &ConstraintId,
        registry: &dyn ConstraintRegistry,
    ) -> Result<Option<Constraint>, ConstraintError> {
        registry
            .load(id)
            .await
            .map_err(|source| ConstraintError::UnableToLoadConstraint {
                id: id.clone(),
                source,
            })
    }

    /// Request admission for `consumer_id` on `unit`.
    ///
    /// Returns the state the consumer was recorded in (`Active` or `Blocked`), or
    /// `Rejected` when the registration opted into the queue limit and the unit
    /// already holds [`MAX_BLOCKED_CONSUMERS`] blocked consumers. Rejected
    /// registrations are not persisted.
    #[tracing::instrument(
        skip(self, context, registry),
        fields(constraint_id = %self.id, strategy = %self.spec.strategy)
    )]
    pub async fn register_consumer(
        &self,
        unit: &ConstraintUnit,
        consumer_id: &ConsumerId,
        permits: u32,
        context: ConsumerContext,
        registry: &dyn ConstraintRegistry,
    ) -> Result<State, ConstraintError> {
        if !self.spec.accepts_permits(permits) {
            return Err(ConstraintError::InvalidPermits {
                permits,
                limits: self.spec.limits,
            });
        }

        let queue = registry
            .load_consumers(&self.id, unit)
            .await
            .map_err(|source| ConstraintError::UnableToRegisterConsumer {
                consumer_id: consumer_id.clone(),
                source,
            })?;

        let state = if self.admits_new(&queue, permits) {
            State::Active
        } else if queue_limit_enabled(&context) && queue.blocked_count() >= MAX_BLOCKED_CONSUMERS
        {
            tracing::warn!(
                unit = %unit,
                consumer_id = %consumer_id,
                blocked = queue.blocked_count(),
                "Queue limit reached, rejecting consumer"
            );
            return Ok(State::Rejected);
        } else {
            State::Blocked
        };

        let consumer = Consumer::new(consumer_id.clone(), permits, state, context);
        registry
            .register_consumer(&self.id, unit, consumer, queue.version)
            .await
            .map_err(|source| {
                if source.is_conflict() {
                    ConstraintError::Conflict(source)
                } else {
                    ConstraintError::UnableToRegisterConsumer {
                        consumer_id: consumer_id.clone(),
                        source,
                    }
                }
            })?;

        tracing::info!(
            unit = %unit,
            consumer_id = %consumer_id,
            permits,
            state = %state,
            "Consumer registered"
        );
        Ok(state)
    }

    /// Blocked consumers that could be admitted now, without changing anything.
    #[tracing::instrument(skip(self, registry), fields(constraint_id = %self.id))]
    pub async fn runnable_consumers(
        &self,
        unit: &ConstraintUnit,
        registry: &dyn ConstraintRegistry,
    ) -> Result<RunnableConsumers, ConstraintError> {
        let queue = registry.load_consumers(&self.id, unit).await?;
        Ok(self.compute_runnable(&queue))
    }

    /// Promote a blocked consumer to active if it is still admissible.
    ///
    /// Returns `false` when the consumer is absent, not blocked, or not admissible
    /// under the current capacity and strategy. Under FIFO a consumer is only
    /// admissible once no earlier satisfiable consumer is still blocked. Fails with
    /// `PermanentlyBlockedConsumer` when its permits exceed the constraint's limits.
    #[tracing::instrument(skip(self, context, registry), fields(constraint_id = %self.id))]
    pub async fn consumer_unblocked(
        &self,
        unit: &ConstraintUnit,
        consumer_id: &ConsumerId,
        context: &ConsumerContext,
        registry: &dyn ConstraintRegistry,
    ) -> Result<bool, ConstraintError> {
        let queue = registry.load_consumers(&self.id, unit).await?;

        let Some(consumer) = queue.find(consumer_id) else {
            return Ok(false);
        };
        if !consumer.is_blocked() {
            return Ok(false);
        }
        if consumer.permits > self.spec.limits {
            return Err(ConstraintError::PermanentlyBlockedConsumer {
                consumer_id: consumer_id.clone(),
                permits: consumer.permits,
                limits: self.spec.limits,
            });
        }
        let runnable = self.compute_runnable(&queue);
        let admissible = match self.spec.strategy {
            // Every earlier blocked consumer that can ever run goes first
            Strategy::Fifo => runnable.consumer_ids.first() == Some(consumer_id),
            Strategy::Asap => runnable.contains(consumer_id),
        };
        if !admissible {
            tracing::debug!(
                unit = %unit,
                consumer_id = %consumer_id,
                "Consumer not yet admissible"
            );
            return Ok(false);
        }

        let promoted = registry
            .consumer_unblocked(&self.id, unit, consumer_id, context, queue.version)
            .await?;
        if promoted {
            tracing::info!(unit = %unit, consumer_id = %consumer_id, "Consumer unblocked");
        }
        Ok(promoted)
    }

    /// Release an active consumer's permits. Returns `false` if it was not active.
    #[tracing::instrument(skip(self, context, registry), fields(constraint_id = %self.id))]
    pub async fn consumer_finished(
        &self,
        unit: &ConstraintUnit,
        consumer_id: &ConsumerId,
        context: &ConsumerContext,
        registry: &dyn ConstraintRegistry,
    ) -> Result<bool, ConstraintError> {
        let finished = registry
            .consumer_finished(&self.id, unit, consumer_id, context)
            .await?;
        if finished {
            tracing::info!(unit = %unit, consumer_id = %consumer_id, "Consumer finished");
        }
        Ok(finished)
    }

    /// Give up a blocked consumer's place in the queue. Returns `false` if it was
    /// not blocked; active consumers must finish instead.
    #[tracing::instrument(skip(self, context, registry), fields(constraint_id = %self.id))]
    pub async fn consumer_withdrawn(
        &self,
        unit: &ConstraintUnit,
        consumer_id: &ConsumerId,
        context: &ConsumerContext,
        registry: &dyn ConstraintRegistry,
    ) -> Result<bool, ConstraintError> {
        let withdrawn = registry
            .consumer_withdrawn(&self.id, unit, consumer_id, context)
            .await?;
        if withdrawn {
            tracing::info!(unit = %unit, consumer_id = %consumer_id, "Consumer withdrawn");
        }
        Ok(withdrawn)
    }

    /// Unblock every consumer that is runnable right now and return the promoted ids.
    ///
    /// A consumer that loses a race to another promoter is skipped; the next pass
    /// picks it up if it is still admissible.
    #[tracing::instrument(skip(self, context, registry), fields(constraint_id = %self.id))]
    pub async fn promote_runnable(
        &self,
        unit: &ConstraintUnit,
        context: &ConsumerContext,
        registry: &dyn ConstraintRegistry,
    ) -> Result<Vec<ConsumerId>, ConstraintError> {
        let runnable = self.runnable_consumers(unit, registry).await?;
        let mut promoted = Vec::with_capacity(runnable.len());

        for consumer_id in runnable.consumer_ids {
            match self
                .consumer_unblocked(unit, &consumer_id, context, registry)
                .await
            {
                Ok(true) => promoted.push(consumer_id),
                Ok(false) => {}
                Err(e) if e.is_conflict() => {
                    tracing::warn!(
                        unit = %unit,
                        consumer_id = %consumer_id,
                        "Unit changed during promotion, skipping consumer"
                    );
                }
                Err(e) => return Err(e),
            }
        }

        Ok(promoted)
    }

    /// Consumers of `unit` whose context carries `key` with exactly `value`.
    pub async fn consumers_by_context(
        &self,
        unit: &ConstraintUnit,
        key: &str,
        value: &Value,
        registry: &dyn ConstraintRegistry,
    ) -> Result<Vec<Consumer>, ConstraintError> {
        let queue = registry.load_consumers(&self.id, unit).await?;
        Ok(queue
            .consumers
            .into_iter()
            .filter(|c| c.context_matches(key, value))
            .collect())
    }

    /// Drop finished and withdrawn consumers of `unit`. They no longer affect
    /// admission, so the queue only has to keep live consumers.
    #[tracing::instrument(skip(self, registry), fields(constraint_id = %self.id))]
    pub async fn prune_finished(
        &self,
        unit: &ConstraintUnit,
        registry: &dyn ConstraintRegistry,
    ) -> Result<usize, ConstraintError> {
        let pruned = registry.prune_finished(&self.id, unit).await?;
        if pruned > 0 {
            tracing::debug!(unit = %unit, pruned, "Finished consumers pruned");
        }
        Ok(pruned)
    }

    fn compute_runnable(&self, queue: &UnitQueue) -> RunnableConsumers {
        let admitted = admission_scan(
            queue.blocked(),
            self.spec.limits,
            remaining_capacity(&self.spec, queue),
            self.spec.strategy.stops_at_first_miss(),
        );
        RunnableConsumers {
            consumer_ids: admitted.into_iter().map(|c| c.id.clone()).collect(),
            used_permits: queue.used_permits(),
        }
    }

    /// Whether a new request for `permits` can start immediately.
    ///
    /// Under FIFO any admissible blocked consumer ahead holds it back. Under ASAP it
    /// is scanned after the blocked queue, so earlier consumers that fit reserve
    /// their capacity first.
    fn admits_new(&self, queue: &UnitQueue, permits: u32) -> bool {
        let remaining = remaining_capacity(&self.spec, queue);
        match self.spec.strategy {
            Strategy::Fifo => {
                let waiting_ahead = queue.blocked().any(|c| c.permits <= self.spec.limits);
                !waiting_ahead && permits <= remaining
            }
            Strategy::Asap => {
                let reserved: u32 =
                    admission_scan(queue.blocked(), self.spec.limits, remaining, false)
                        .into_iter()
                        .map(|c| c.permits)
                        .sum();
                permits <= remaining - reserved
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn consumer(id: &str, permits: u32, state: State) -> Consumer {
        Consumer::new(id.into(), permits, state, ConsumerContext::new())
    }

    fn constraint(strategy: Strategy, limits: u32) -> Constraint {
        Constraint::new("deploys".into(), Spec::new(strategy, limits)).unwrap()
    }

    #[test]
    fn zero_limits_rejected() {
        let err = Constraint::new("deploys".into(), Spec::new(Strategy::Asap, 0)).unwrap_err();
        assert!(matches!(err, ConstraintError::InvalidSpec(_)));
    }

    #[test]
    fn fifo_new_request_waits_behind_blocked_consumer() {
        let queue = UnitQueue::new(
            vec![
                consumer("a", 1, State::Active),
                consumer("b", 10, State::Blocked),
            ],
            2,
        );
        assert!(!constraint(Strategy::Fifo, 10).admits_new(&queue, 1));
        assert!(constraint(Strategy::Asap, 10).admits_new(&queue, 1));
    }

    #[test]
    fn fifo_ignores_oversized_blocked_consumers() {
        let queue = UnitQueue::new(vec![consumer("big", 12, State::Blocked)], 1);
        assert!(constraint(Strategy::Fifo, 10).admits_new(&queue, 4));
    }

    #[test]
    fn asap_new_request_respects_earlier_reservations() {
        let queue = UnitQueue::new(
            vec![
                consumer("a", 4, State::Active),
                consumer("b", 5, State::Blocked),
            ],
            2,
        );
        let asap = constraint(Strategy::Asap, 10);
        assert!(asap.admits_new(&queue, 1));
        assert!(!asap.admits_new(&queue, 2));
    }

    #[test]
    fn runnable_reports_used_permits() {
        let queue = UnitQueue::new(
            vec![
                consumer("a", 6, State::Active),
                consumer("b", 5, State::Blocked),
                consumer("c", 4, State::Blocked),
            ],
            3,
        );
        let runnable = constraint(Strategy::Asap, 10).compute_runnable(&queue);
        assert_eq!(runnable.used_permits, 6);
        assert_eq!(runnable.consumer_ids, vec![ConsumerId::from("c")]);

        let runnable = constraint(Strategy::Fifo, 10).compute_runnable(&queue);
        assert!(runnable.is_empty());
    }

    #[test]
    fn lowered_limits_saturate_remaining_capacity() {
        let queue = UnitQueue::new(
            vec![
                consumer("a", 8, State::Active),
                consumer("b", 1, State::Blocked),
            ],
            2,
        );
        let runnable = constraint(Strategy::Asap, 5).compute_runnable(&queue);
        assert!(runnable.is_empty());
        assert_eq!(runnable.used_permits, 8);
    }
}
