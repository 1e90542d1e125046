use serde::Serialize;

use crate::models::ConsumerId;

/// Blocked consumers that could be admitted right now, in admission order, and the
/// capacity currently held by active consumers. Recomputed on demand, never stored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunnableConsumers {
    pub consumer_ids: Vec<ConsumerId>,
    pub used_permits: u32,
}

impl RunnableConsumers {
    pub fn contains(&self, consumer_id: &ConsumerId) -> bool {
        self.consumer_ids.contains(consumer_id)
    }

    pub fn is_empty(&self) -> bool {
        self.consumer_ids.is_empty()
    }

    pub fn len(&self) -> usize {
        self.consumer_ids.len()
    }
}
