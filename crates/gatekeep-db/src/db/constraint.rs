use anyhow::Context;
use async_trait::async_trait;
use gatekeep_core::registry::{ConstraintRegistry, RegistryResult};
use gatekeep_core::{
    Constraint, Consumer, ConsumerContext, ConsumerId, ConstraintId, ConstraintUnit,
    RegistryError, Spec, State, UnitQueue,
};
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Transaction};

#[derive(sqlx::FromRow)]
struct ConstraintRow {
    id: String,
    strategy: String,
    limits: i32,
}

impl ConstraintRow {
    fn into_constraint(self) -> RegistryResult<Constraint> {
        let strategy = self.strategy.parse()?;
        let limits = u32::try_from(self.limits).with_context(|| {
            format!("Invalid limits {} for constraint {}", self.limits, self.id)
        })?;
        Constraint::new(self.id.into(), Spec::new(strategy, limits))
            .map_err(|e| RegistryError::Storage(e.into()))
    }
}

#[derive(sqlx::FromRow)]
struct ConsumerRow {
    consumer_id: String,
    permits: i32,
    state: State,
    context: Json<ConsumerContext>,
}

impl ConsumerRow {
    fn into_consumer(self) -> RegistryResult<Consumer> {
        let permits = u32::try_from(self.permits).with_context(|| {
            format!("Invalid permits {} for consumer {}", self.permits, self.consumer_id)
        })?;
        Ok(Consumer::new(
            self.consumer_id.into(),
            permits,
            self.state,
            self.context.0,
        ))
    }
}

fn from_db_version(version: i64) -> RegistryResult<u64> {
    Ok(u64::try_from(version).context("Negative unit version in database")?)
}

/// Registry backed by PostgreSQL.
///
/// Each unit has a row in `constraint_units` whose lock serializes writers and whose
/// `version` column is the token conditional writes are checked against.
#[derive(Clone)]
pub struct PgConstraintRegistry {
    pool: PgPool,
}

impl PgConstraintRegistry {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Lock the unit row for the rest of the transaction and return its version.
    async fn lock_unit(
        tx: &mut Transaction<'_, Postgres>,
        id: &ConstraintId,
        unit: &ConstraintUnit,
    ) -> RegistryResult<Option<u64>> {
        let version: Option<i64> = sqlx::query_scalar::<Postgres, i64>(
            r#"
            SELECT version
            FROM constraint_units
            WHERE constraint_id = $1 AND unit = $2
            FOR UPDATE
            "#,
        )
        .bind(id.as_str())
        .bind(unit.as_str())
        .fetch_optional(&mut **tx)
        .await
        .context("Failed to lock constraint unit")?;

        version.map(from_db_version).transpose()
    }

    async fn bump_version(
        tx: &mut Transaction<'_, Postgres>,
        id: &ConstraintId,
        unit: &ConstraintUnit,
    ) -> RegistryResult<()> {
        sqlx::query(
            r#"
            UPDATE constraint_units
            SET version = version + 1,
                updated_at = NOW()
            WHERE constraint_id = $1 AND unit = $2
            "#,
        )
        .bind(id.as_str())
        .bind(unit.as_str())
        .execute(&mut **tx)
        .await
        .context("Failed to bump unit version")?;
        Ok(())
    }

    /// Move a consumer currently in `from` to `to`, merging `context` into its
    /// stored context.
    #[allow(clippy::too_many_arguments)]
    async fn transition(
        &self,
        id: &ConstraintId,
        unit: &ConstraintUnit,
        consumer_id: &ConsumerId,
        context: &ConsumerContext,
        from: State,
        to: State,
        expected_version: Option<u64>,
    ) -> RegistryResult<bool> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin transaction")?;

        let Some(version) = Self::lock_unit(&mut tx, id, unit).await? else {
            return Ok(false);
        };

        let state: Option<State> = sqlx::query_scalar::<Postgres, State>(
            r#"
            SELECT state
            FROM constraint_consumers
            WHERE constraint_id = $1 AND unit = $2 AND consumer_id = $3
            "#,
        )
        .bind(id.as_str())
        .bind(unit.as_str())
        .bind(consumer_id.as_str())
        .fetch_optional(&mut *tx)
        .await
        .context("Failed to fetch consumer state")?;

        if state != Some(from) {
            return Ok(false);
        }
        if let Some(expected) = expected_version {
            if expected != version {
                return Err(RegistryError::Conflict {
                    constraint_id: id.clone(),
                    unit: unit.clone(),
                    expected,
                });
            }
        }

        sqlx::query(
            r#"
            UPDATE constraint_consumers
            SET state = $4,
                context = context || $5,
                updated_at = NOW()
            WHERE constraint_id = $1 AND unit = $2 AND consumer_id = $3
            "#,
        )
        .bind(id.as_str())
        .bind(unit.as_str())
        .bind(consumer_id.as_str())
        .bind(to)
        .bind(Json(context))
        .execute(&mut *tx)
        .await
        .context("Failed to update consumer state")?;

        Self::bump_version(&mut tx, id, unit).await?;
        tx.commit().await.context("Failed to commit transaction")?;

        tracing::info!(
            constraint_id = %id,
            unit = %unit,
            consumer_id = %consumer_id,
            from = %from,
            to = %to,
            "Consumer state updated"
        );
        Ok(true)
    }
}

#[async_trait]
impl ConstraintRegistry for PgConstraintRegistry {
    #[tracing::instrument(skip(self))]
    async fn save(&self, constraint: Constraint) -> RegistryResult<Constraint> {
        let limits = i32::try_from(constraint.spec().limits).context("Limits out of range")?;

        let inserted: Option<String> = sqlx::query_scalar::<Postgres, String>(
            r#"
            INSERT INTO constraints (id, strategy, limits)
            VALUES ($1, $2, $3)
            ON CONFLICT (id) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(constraint.id().as_str())
        .bind(constraint.spec().strategy.to_string())
        .bind(limits)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to insert constraint")?;

        if inserted.is_none() {
            return Err(RegistryError::DuplicateConstraint(constraint.id().clone()));
        }
        Ok(constraint)
    }

    #[tracing::instrument(skip(self))]
    async fn load(&self, id: &ConstraintId) -> RegistryResult<Option<Constraint>> {
        let row: Option<ConstraintRow> = sqlx::query_as::<Postgres, ConstraintRow>(
            r#"
            SELECT id, strategy, limits
            FROM constraints
            WHERE id = $1
            "#,
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch constraint")?;

        row.map(ConstraintRow::into_constraint).transpose()
    }

    #[tracing::instrument(skip(self))]
    async fn list_constraints(&self) -> RegistryResult<Vec<Constraint>> {
        let rows: Vec<ConstraintRow> = sqlx::query_as::<Postgres, ConstraintRow>(
            r#"
            SELECT id, strategy, limits
            FROM constraints
            ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to list constraints")?;

        rows.into_iter().map(ConstraintRow::into_constraint).collect()
    }

    #[tracing::instrument(skip(self))]
    async fn list_units(&self, id: &ConstraintId) -> RegistryResult<Vec<ConstraintUnit>> {
        let units: Vec<String> = sqlx::query_scalar::<Postgres, String>(
            r#"
            SELECT DISTINCT unit
            FROM constraint_consumers
            WHERE constraint_id = $1
            ORDER BY unit
            "#,
        )
        .bind(id.as_str())
        .fetch_all(&self.pool)
        .await
        .context("Failed to list constraint units")?;

        Ok(units.into_iter().map(ConstraintUnit::from).collect())
    }

    #[tracing::instrument(skip(self))]
    async fn load_consumers(
        &self,
        id: &ConstraintId,
        unit: &ConstraintUnit,
    ) -> RegistryResult<UnitQueue> {
        // Version is read before the consumers: a write landing in between leaves the
        // snapshot with an older version, so the next conditional write conflicts
        // instead of acting on newer data.
        let version: Option<i64> = sqlx::query_scalar::<Postgres, i64>(
            r#"
            SELECT version
            FROM constraint_units
            WHERE constraint_id = $1 AND unit = $2
            "#,
        )
        .bind(id.as_str())
        .bind(unit.as_str())
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch unit version")?;

        let rows: Vec<ConsumerRow> = sqlx::query_as::<Postgres, ConsumerRow>(
            r#"
            SELECT consumer_id, permits, state, context
            FROM constraint_consumers
            WHERE constraint_id = $1 AND unit = $2
            ORDER BY seq ASC
            "#,
        )
        .bind(id.as_str())
        .bind(unit.as_str())
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch consumers")?;

        let consumers = rows
            .into_iter()
            .map(ConsumerRow::into_consumer)
            .collect::<RegistryResult<Vec<_>>>()?;
        let version = version.map(from_db_version).transpose()?.unwrap_or(0);

        Ok(UnitQueue::new(consumers, version))
    }

    #[tracing::instrument(skip(self, consumer), fields(consumer_id = %consumer.id))]
    async fn register_consumer(
        &self,
        id: &ConstraintId,
        unit: &ConstraintUnit,
        consumer: Consumer,
        expected_version: u64,
    ) -> RegistryResult<()> {
        let permits = i32::try_from(consumer.permits).context("Permits out of range")?;

        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin transaction for consumer registration")?;

        sqlx::query(
            r#"
            INSERT INTO constraint_units (constraint_id, unit)
            VALUES ($1, $2)
            ON CONFLICT (constraint_id, unit) DO NOTHING
            "#,
        )
        .bind(id.as_str())
        .bind(unit.as_str())
        .execute(&mut *tx)
        .await
        .context("Failed to create constraint unit")?;

        let version = Self::lock_unit(&mut tx, id, unit).await?.unwrap_or(0);
        if version != expected_version {
            // Dropping the transaction rolls back the unit insert
            return Err(RegistryError::Conflict {
                constraint_id: id.clone(),
                unit: unit.clone(),
                expected: expected_version,
            });
        }

        let inserted: Option<i64> = sqlx::query_scalar::<Postgres, i64>(
            r#"
            INSERT INTO constraint_consumers (
                constraint_id, unit, consumer_id, permits, state, context
            )
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (constraint_id, unit, consumer_id) DO NOTHING
            RETURNING seq
            "#,
        )
        .bind(id.as_str())
        .bind(unit.as_str())
        .bind(consumer.id.as_str())
        .bind(permits)
        .bind(consumer.state)
        .bind(Json(&consumer.context))
        .fetch_optional(&mut *tx)
        .await
        .context("Failed to insert consumer")?;

        if inserted.is_none() {
            return Err(RegistryError::DuplicateConsumer {
                constraint_id: id.clone(),
                unit: unit.clone(),
                consumer_id: consumer.id,
            });
        }

        Self::bump_version(&mut tx, id, unit).await?;
        tx.commit()
            .await
            .context("Failed to commit consumer registration")?;

        tracing::info!(
            constraint_id = %id,
            unit = %unit,
            consumer_id = %consumer.id,
            state = %consumer.state,
            version = version + 1,
            "Consumer persisted"
        );
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
        .await
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
        .await
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
        .await
    }

    #[tracing::instrument(skip(self))]
    async fn prune_finished(
        &self,
        id: &ConstraintId,
        unit: &ConstraintUnit,
    ) -> RegistryResult<usize> {
        // The constraint_units row and its version stay behind
        let result = sqlx::query(
            r#"
            DELETE FROM constraint_consumers
            WHERE constraint_id = $1 AND unit = $2
              AND state IN ('finished', 'withdrawn')
            "#,
        )
        .bind(id.as_str())
        .bind(unit.as_str())
        .execute(&self.pool)
        .await
        .context("Failed to prune finished consumers")?;

        let pruned = usize::try_from(result.rows_affected()).context("Pruned count overflow")?;
        if pruned > 0 {
            tracing::debug!(
                constraint_id = %id,
                unit = %unit,
                pruned,
                "Pruned finished consumers"
            );
        }
        Ok(pruned)
    }
}

