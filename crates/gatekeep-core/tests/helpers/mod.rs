#![allow(dead_code)]

use gatekeep_core::{
    Constraint, ConstraintRegistry, ConstraintUnit, ConsumerContext, InMemoryRegistry, Spec,
    State, Strategy,
};
use gatekeep_core::constants::QUEUE_LIMIT_CONTEXT_KEY;
use serde_json::{json, Value};

pub struct TestEnv {
    pub registry: InMemoryRegistry,
    pub constraint: Constraint,
    pub unit: ConstraintUnit,
}

impl TestEnv {
    pub fn registry(&self) -> &dyn ConstraintRegistry {
        &self.registry
    }

    pub async fn register(&self, consumer_id: &str, permits: u32) -> State {
        self.register_with(consumer_id, permits, ConsumerContext::new())
            .await
    }

    pub async fn register_with(
        &self,
        consumer_id: &str,
        permits: u32,
        context: ConsumerContext,
    ) -> State {
        self.constraint
            .register_consumer(
                &self.unit,
                &consumer_id.into(),
                permits,
                context,
                self.registry(),
            )
            .await
            .expect("registration failed")
    }

    pub async fn finish(&self, consumer_id: &str) -> bool {
        self.constraint
            .consumer_finished(
                &self.unit,
                &consumer_id.into(),
                &ConsumerContext::new(),
                self.registry(),
            )
            .await
            .expect("finish failed")
    }

    pub async fn unblock(&self, consumer_id: &str) -> bool {
        self.constraint
            .consumer_unblocked(
                &self.unit,
                &consumer_id.into(),
                &ConsumerContext::new(),
                self.registry(),
            )
            .await
            .expect("unblock failed")
    }

    pub async fn runnable(&self) -> Vec<String> {
        self.constraint
            .runnable_consumers(&self.unit, self.registry())
            .await
            .expect("runnable query failed")
            .consumer_ids
            .into_iter()
            .map(|id| id.to_string())
            .collect()
    }

    pub async fn state_of(&self, consumer_id: &str) -> Option<State> {
        self.registry
            .load_consumers(self.constraint.id(), &self.unit)
            .await
            .expect("load failed")
            .find(&consumer_id.into())
            .map(|c| c.state)
    }

    /// Permits held by active consumers, read straight from the registry.
    pub async fn used_permits(&self) -> u32 {
        self.registry
            .load_consumers(self.constraint.id(), &self.unit)
            .await
            .expect("load failed")
            .used_permits()
    }
}

pub async fn setup(strategy: Strategy, limits: u32) -> TestEnv {
    let registry = InMemoryRegistry::new();
    let constraint = Constraint::create(
        "concurrent-deploys-per-infra".into(),
        Spec::new(strategy, limits),
        &registry,
    )
    .await
    .expect("constraint creation failed");

    TestEnv {
        registry,
        constraint,
        unit: "infra-1".into(),
    }
}

pub fn context(pairs: &[(&str, Value)]) -> ConsumerContext {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

pub fn queue_limited() -> ConsumerContext {
    context(&[(QUEUE_LIMIT_CONTEXT_KEY, json!(true))])
}
