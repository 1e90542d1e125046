use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

use crate::constants::QUEUE_LIMIT_CONTEXT_KEY;
use crate::models::ConsumerId;

/// Opaque caller metadata attached to a consumer.
pub type ConsumerContext = serde_json::Map<String, serde_json::Value>;

/// Lifecycle state of a consumer.
///
/// `Active` holds permits. `Blocked` waits for capacity. `Finished`, `Rejected` and
/// `Withdrawn` are terminal; `Rejected` is only ever returned at registration and is
/// never persisted.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(
    feature = "sqlx",
    sqlx(type_name = "consumer_state", rename_all = "lowercase")
)]
#[serde(rename_all = "UPPERCASE")]
pub enum State {
    Active,
    Blocked,
    Finished,
    Rejected,
    Withdrawn,
}

impl State {
    pub fn is_terminal(&self) -> bool {
        matches!(self, State::Finished | State::Rejected | State::Withdrawn)
    }
}

impl Display for State {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            State::Active => write!(f, "ACTIVE"),
            State::Blocked => write!(f, "BLOCKED"),
            State::Finished => write!(f, "FINISHED"),
            State::Rejected => write!(f, "REJECTED"),
            State::Withdrawn => write!(f, "WITHDRAWN"),
        }
    }
}

impl FromStr for State {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "ACTIVE" => Ok(State::Active),
            "BLOCKED" => Ok(State::Blocked),
            "FINISHED" => Ok(State::Finished),
            "REJECTED" => Ok(State::Rejected),
            "WITHDRAWN" => Ok(State::Withdrawn),
            _ => Err(anyhow::anyhow!("Invalid consumer state: {}", s)),
        }
    }
}

/// One admission request on a unit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Consumer {
    pub id: ConsumerId,
    pub permits: u32,
    pub state: State,
    #[serde(default)]
    pub context: ConsumerContext,
}

impl Consumer {
    pub fn new(id: ConsumerId, permits: u32, state: State, context: ConsumerContext) -> Self {
        Self {
            id,
            permits,
            state,
            context,
        }
    }

    pub fn is_active(&self) -> bool {
        self.state == State::Active
    }

    pub fn is_blocked(&self) -> bool {
        self.state == State::Blocked
    }

    /// Whether the context carries `key` with exactly `value`.
    pub fn context_matches(&self, key: &str, value: &serde_json::Value) -> bool {
        self.context.get(key) == Some(value)
    }
}

/// Whether a registration context opts into max-queue enforcement.
pub fn queue_limit_enabled(context: &ConsumerContext) -> bool {
    context
        .get(QUEUE_LIMIT_CONTEXT_KEY)
        .and_then(|v| v.as_bool())
        .unwrap_or(false)
}

/// Snapshot of one unit's consumers in registration order, with the version token
/// that conditional writes are checked against.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UnitQueue {
    pub consumers: Vec<Consumer>,
    pub version: u64,
}

impl UnitQueue {
    pub fn new(consumers: Vec<Consumer>, version: u64) -> Self {
        Self { consumers, version }
    }

    /// Sum of permits held by active consumers.
    pub fn used_permits(&self) -> u32 {
        self.consumers
            .iter()
            .filter(|c| c.is_active())
            .map(|c| c.permits)
            .sum()
    }

    /// Blocked consumers in arrival order.
    pub fn blocked(&self) -> impl Iterator<Item = &Consumer> {
        self.consumers.iter().filter(|c| c.is_blocked())
    }

    pub fn blocked_count(&self) -> usize {
        self.blocked().count()
    }

    pub fn find(&self, consumer_id: &ConsumerId) -> Option<&Consumer> {
        self.consumers.iter().find(|c| &c.id == consumer_id)
    }
}
