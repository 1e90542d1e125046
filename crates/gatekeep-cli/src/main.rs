//! Gatekeep CLI: administer constraints and consumers in a PostgreSQL registry.
//!
//! Set GATEKEEP_DATABASE_URL (or DATABASE_URL). Migrations run on startup.

use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};
use gatekeep_cli::{build_context, init_tracing};
use gatekeep_core::{
    retry_on_conflict, Config, Constraint, ConstraintId, ConstraintRegistry, ConstraintUnit,
    ConsumerContext, ConsumerId, Spec, Strategy,
};
use gatekeep_db::{setup_database, PgConstraintRegistry};
use gatekeep_worker::QueueDrainer;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Parser)]
#[command(name = "gatekeep", about = "Admission control for capacity-bounded resources")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a constraint
    Create {
        /// Constraint id
        id: String,
        /// Admission strategy: FIFO or ASAP
        #[arg(long, default_value = "FIFO")]
        strategy: Strategy,
        /// Permit capacity per unit
        #[arg(long)]
        limits: u32,
    },
    /// Show a constraint and the units it has consumers on
    Show {
        /// Constraint id
        id: String,
    },
    /// List all constraints
    List,
    /// Register a consumer on a unit
    Register {
        #[command(flatten)]
        target: ConsumerTarget,
        /// Permits requested
        #[arg(long, default_value = "1")]
        permits: u32,
        /// Context entry as key=value (repeatable)
        #[arg(long = "context")]
        context: Vec<String>,
        /// Reject instead of queueing when the unit's blocked queue is full
        #[arg(long)]
        queue_limit: bool,
    },
    /// Promote a blocked consumer if it is admissible now
    Unblock {
        #[command(flatten)]
        target: ConsumerTarget,
        /// Context entry as key=value (repeatable)
        #[arg(long = "context")]
        context: Vec<String>,
    },
    /// Mark an active consumer as finished
    Finish {
        #[command(flatten)]
        target: ConsumerTarget,
        /// Context entry as key=value (repeatable)
        #[arg(long = "context")]
        context: Vec<String>,
    },
    /// Withdraw a blocked consumer
    Withdraw {
        #[command(flatten)]
        target: ConsumerTarget,
        /// Context entry as key=value (repeatable)
        #[arg(long = "context")]
        context: Vec<String>,
    },
    /// Show consumers that could be promoted on a unit
    Runnable {
        /// Constraint id
        id: String,
        /// Unit
        unit: String,
    },
    /// Promote every runnable consumer on a unit
    Promote {
        /// Constraint id
        id: String,
        /// Unit
        unit: String,
    },
    /// Drop finished and withdrawn consumers of a unit
    Prune {
        /// Constraint id
        id: String,
        /// Unit
        unit: String,
    },
    /// List consumers on a unit, optionally filtered by a context entry
    Consumers {
        /// Constraint id
        id: String,
        /// Unit
        unit: String,
        /// Only consumers whose context has this key=value
        #[arg(long)]
        filter: Option<String>,
    },
    /// Run the queue drainer until interrupted
    Drain,
}

#[derive(clap::Args)]
struct ConsumerTarget {
    /// Constraint id
    id: String,
    /// Unit
    unit: String,
    /// Consumer id
    consumer: String,
}

impl ConsumerTarget {
    fn unit(&self) -> ConstraintUnit {
        self.unit.as_str().into()
    }

    fn consumer(&self) -> ConsumerId {
        self.consumer.as_str().into()
    }
}

fn print_json(value: &impl Serialize) -> anyhow::Result<()> {
    let out = serde_json::to_string_pretty(value).context("Serialize response")?;
    println!("{}", out);
    Ok(())
}

/// Print `{ "consumer_id": .., <key>: <value> }`.
fn print_outcome(
    consumer_id: &ConsumerId,
    key: &str,
    value: impl Serialize,
) -> anyhow::Result<()> {
    let mut response = serde_json::Map::new();
    let value = serde_json::to_value(value).context("Serialize response")?;
    response.insert("consumer_id".to_string(), consumer_id.to_string().into());
    response.insert(key.to_string(), value);
    print_json(&response)
}

async fn load_constraint(
    id: &str,
    registry: &dyn ConstraintRegistry,
) -> anyhow::Result<Constraint> {
    let id = ConstraintId::from(id);
    Constraint::load(&id, registry)
        .await?
        .ok_or_else(|| anyhow!("Constraint {} not found", id))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = Config::from_env().context("Invalid configuration")?;
    let pool = setup_database(&config.database).await?;
    let registry = Arc::new(PgConstraintRegistry::new(pool));
    let max_retries = config.conflict_max_retries;

    match cli.command {
        Commands::Create {
            id,
            strategy,
            limits,
        } => {
            let constraint =
                Constraint::create(id.into(), Spec::new(strategy, limits), registry.as_ref())
                    .await?;
            print_json(&constraint)?;
        }
        Commands::Show { id } => {
            let constraint = load_constraint(&id, registry.as_ref()).await?;
            let units = registry.list_units(constraint.id()).await?;
            print_json(&serde_json::json!({ "constraint": constraint, "units": units }))?;
        }
        Commands::List => {
            let constraints = registry.list_constraints().await?;
            print_json(&constraints)?;
        }
        Commands::Register {
            target,
            permits,
            context,
            queue_limit,
        } => {
            let constraint = load_constraint(&target.id, registry.as_ref()).await?;
            let mut context = build_context(&context)?;
            if queue_limit {
                context.insert(
                    gatekeep_core::constants::QUEUE_LIMIT_CONTEXT_KEY.to_string(),
                    serde_json::Value::Bool(true),
                );
            }
            let (unit, consumer_id) = (target.unit(), target.consumer());
            let state = retry_on_conflict(max_retries, || {
                constraint.register_consumer(
                    &unit,
                    &consumer_id,
                    permits,
                    context.clone(),
                    registry.as_ref(),
                )
            })
            .await?;
            print_outcome(&consumer_id, "state", state)?;
        }
        Commands::Unblock { target, context } => {
            let constraint = load_constraint(&target.id, registry.as_ref()).await?;
            let context = build_context(&context)?;
            let (unit, consumer_id) = (target.unit(), target.consumer());
            let unblocked = retry_on_conflict(max_retries, || {
                constraint.consumer_unblocked(&unit, &consumer_id, &context, registry.as_ref())
            })
            .await?;
            print_outcome(&consumer_id, "unblocked", unblocked)?;
        }
        Commands::Finish { target, context } => {
            let constraint = load_constraint(&target.id, registry.as_ref()).await?;
            let context = build_context(&context)?;
            let consumer_id = target.consumer();
            let finished = constraint
                .consumer_finished(&target.unit(), &consumer_id, &context, registry.as_ref())
                .await?;
            print_outcome(&consumer_id, "finished", finished)?;
        }
        Commands::Withdraw { target, context } => {
            let constraint = load_constraint(&target.id, registry.as_ref()).await?;
            let context = build_context(&context)?;
            let consumer_id = target.consumer();
            let withdrawn = constraint
                .consumer_withdrawn(&target.unit(), &consumer_id, &context, registry.as_ref())
                .await?;
            print_outcome(&consumer_id, "withdrawn", withdrawn)?;
        }
        Commands::Runnable { id, unit } => {
            let constraint = load_constraint(&id, registry.as_ref()).await?;
            let runnable = constraint
                .runnable_consumers(&unit.into(), registry.as_ref())
                .await?;
            print_json(&runnable)?;
        }
        Commands::Promote { id, unit } => {
            let constraint = load_constraint(&id, registry.as_ref()).await?;
            let promoted = constraint
                .promote_runnable(&unit.into(), &ConsumerContext::new(), registry.as_ref())
                .await?;
            print_json(&promoted)?;
        }
        Commands::Prune { id, unit } => {
            let constraint = load_constraint(&id, registry.as_ref()).await?;
            let pruned = constraint
                .prune_finished(&unit.into(), registry.as_ref())
                .await?;
            print_json(&serde_json::json!({ "pruned": pruned }))?;
        }
        Commands::Consumers { id, unit, filter } => {
            let constraint = load_constraint(&id, registry.as_ref()).await?;
            let unit = ConstraintUnit::from(unit);
            let consumers = match filter {
                Some(filter) => {
                    let (key, value) = gatekeep_cli::parse_context_entry(&filter)?;
                    constraint
                        .consumers_by_context(&unit, &key, &value, registry.as_ref())
                        .await?
                }
                None => {
                    registry
                        .load_consumers(constraint.id(), &unit)
                        .await?
                        .consumers
                }
            };
            print_json(&consumers)?;
        }
        Commands::Drain => {
            let (promotion_tx, mut promotion_rx) = mpsc::channel(64);
            let drainer =
                QueueDrainer::new(registry.clone(), config.drain.clone(), Some(promotion_tx));

            loop {
                tokio::select! {
                    Some(promotion) = promotion_rx.recv() => {
                        println!(
                            "{} {} {}",
                            promotion.constraint_id, promotion.unit, promotion.consumer_id
                        );
                    }
                    result = tokio::signal::ctrl_c() => {
                        result.context("Failed to listen for ctrl-c")?;
                        drainer.shutdown().await;
                        break;
                    }
                }
            }
        }
    }

    Ok(())
}
