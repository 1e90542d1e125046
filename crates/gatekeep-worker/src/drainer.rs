//! Queue drainer: background loop that promotes runnable consumers.
//!
//! Each pass walks every constraint and every unit that has consumers, runs
//! [`Constraint::promote_runnable`] on the unit and then prunes its finished
//! consumers. Units are independent, so a pass drains up to `max_concurrent_units`
//! of them at once.
//!
//! Shutdown: [`QueueDrainer::shutdown`] signals the loop to stop; it does not wait for
//! a pass that is already running.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio::time::sleep;

use gatekeep_core::{
    Constraint, ConstraintError, ConstraintId, ConstraintRegistry, ConstraintUnit,
    ConsumerContext, ConsumerId, DrainConfig, ErrorMetadata, LogLevel,
};

/// A consumer moved from blocked to active by the drainer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Promotion {
    pub constraint_id: ConstraintId,
    pub unit: ConstraintUnit,
    pub consumer_id: ConsumerId,
}

/// Optional sender notified for every promotion, so callers can start the admitted work.
pub type PromotionSender = mpsc::Sender<Promotion>;

pub struct QueueDrainer {
    registry: Arc<dyn ConstraintRegistry>,
    config: DrainConfig,
    shutdown_tx: mpsc::Sender<()>,
}

impl QueueDrainer {
    /// Create a drainer and spawn its loop, which runs a pass every `poll_interval_ms`.
    pub fn new(
        registry: Arc<dyn ConstraintRegistry>,
        config: DrainConfig,
        promotion_tx: Option<PromotionSender>,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        let registry_clone = Arc::clone(&registry);
        let config_clone = config.clone();

        tokio::spawn(async move {
            Self::drain_loop(registry_clone, config_clone, shutdown_rx, promotion_tx).await;
        });

        Self {
            registry,
            config,
            shutdown_tx,
        }
    }

    /// Run a single pass now, independent of the background loop.
    pub async fn drain_once(&self, promotion_tx: Option<&PromotionSender>) -> Result<usize> {
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_units));
        Self::drain_pass(&self.registry, &semaphore, promotion_tx).await
    }

    async fn drain_loop(
        registry: Arc<dyn ConstraintRegistry>,
        config: DrainConfig,
        mut shutdown_rx: mpsc::Receiver<()>,
        promotion_tx: Option<PromotionSender>,
    ) {
        tracing::info!(
            poll_interval_ms = config.poll_interval_ms,
            max_concurrent_units = config.max_concurrent_units,
            "Queue drainer started"
        );

        let semaphore = Arc::new(Semaphore::new(config.max_concurrent_units));
        let poll_interval = Duration::from_millis(config.poll_interval_ms);

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    tracing::info!("Queue drainer shutting down");
                    break;
                }
                _ = sleep(poll_interval) => {
                    match Self::drain_pass(&registry, &semaphore, promotion_tx.as_ref()).await {
                        Ok(0) => tracing::trace!("No consumers promoted"),
                        Ok(promoted) => tracing::info!(promoted, "Drain pass promoted consumers"),
                        Err(e) => tracing::error!(error = %e, "Drain pass failed"),
                    }
                }
            }
        }

        tracing::info!("Queue drainer stopped");
    }

    /// Promote runnable consumers on every unit. Returns how many were promoted.
    ///
    /// A unit that fails is logged and skipped; only failing to enumerate constraints
    /// or units fails the pass.
    async fn drain_pass(
        registry: &Arc<dyn ConstraintRegistry>,
        semaphore: &Arc<Semaphore>,
        promotion_tx: Option<&PromotionSender>,
    ) -> Result<usize> {
        let constraints = registry
            .list_constraints()
            .await
            .context("Failed to list constraints")?;

        let mut handles = Vec::new();
        for constraint in constraints {
            let units = registry
                .list_units(constraint.id())
                .await
                .with_context(|| format!("Failed to list units of {}", constraint.id()))?;

            for unit in units {
                let permit = semaphore
                    .clone()
                    .acquire_owned()
                    .await
                    .context("Drain semaphore closed")?;
                let registry = Arc::clone(registry);
                let constraint = constraint.clone();

                handles.push(tokio::spawn(async move {
                    let _permit = permit;
                    let promoted = Self::drain_unit(&constraint, &unit, registry.as_ref()).await;
                    (constraint, unit, promoted)
                }));
            }
        }

        let mut total = 0;
        for handle in handles {
            let (constraint, unit, promoted) = handle.await.context("Drain task panicked")?;
            let promoted = match promoted {
                Ok(promoted) => promoted,
                Err(e) => {
                    log_unit_failure(&constraint, &unit, &e);
                    continue;
                }
            };

            total += promoted.len();
            if let Some(tx) = promotion_tx {
                for consumer_id in promoted {
                    let promotion = Promotion {
                        constraint_id: constraint.id().clone(),
                        unit: unit.clone(),
                        consumer_id,
                    };
                    if tx.send(promotion).await.is_err() {
                        tracing::warn!("Promotion receiver dropped");
                        break;
                    }
                }
            }
        }

        Ok(total)
    }

    async fn drain_unit(
        constraint: &Constraint,
        unit: &ConstraintUnit,
        registry: &dyn ConstraintRegistry,
    ) -> Result<Vec<ConsumerId>, ConstraintError> {
        let promoted = constraint
            .promote_runnable(unit, &ConsumerContext::new(), registry)
            .await?;
        constraint.prune_finished(unit, registry).await?;
        Ok(promoted)
    }

    /// Signals the drain loop to stop.
    pub async fn shutdown(&self) {
        tracing::info!("Initiating queue drainer shutdown");
        let _ = self.shutdown_tx.send(()).await;
    }
}

fn log_unit_failure(constraint: &Constraint, unit: &ConstraintUnit, err: &ConstraintError) {
    let constraint_id = constraint.id();
    let error_code = err.error_code();
    let action = err.suggested_action().unwrap_or("none");
    let details = err.detailed_message();
    match err.log_level() {
        LogLevel::Debug => tracing::debug!(
            %constraint_id, %unit, error_code, action, error = %details,
            "Failed to drain unit"
        ),
        LogLevel::Warn => tracing::warn!(
            %constraint_id, %unit, error_code, action, error = %details,
            "Failed to drain unit"
        ),
        LogLevel::Error => tracing::error!(
            %constraint_id, %unit, error_code, action, error = %details,
            "Failed to drain unit"
        ),
    }
}
