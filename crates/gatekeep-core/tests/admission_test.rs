#[path = "helpers/mod.rs"]
mod helpers;

use gatekeep_core::{
    Constraint, ConstraintError, ConstraintRegistry, ConstraintUnit, ConsumerContext,
    InMemoryRegistry, State, Strategy,
};
use helpers::{queue_limited, setup};

#[tokio::test]
async fn test_fifo_blocks_behind_head_of_line() {
    let env = setup(Strategy::Fifo, 10).await;

    assert_eq!(env.register("consumer1", 1).await, State::Active);
    assert_eq!(env.register("consumer2", 10).await, State::Blocked);
    // Fits capacity but consumer2 is still waiting ahead of it
    assert_eq!(env.register("consumer3", 1).await, State::Blocked);
}

#[tokio::test]
async fn test_asap_runnable_skips_oversized_consumer() {
    let env = setup(Strategy::Asap, 10).await;

    assert_eq!(env.register("consumer1", 10).await, State::Active);
    assert_eq!(env.register("consumer2", 3).await, State::Blocked);
    assert_eq!(env.register("consumer3", 8).await, State::Blocked);
    assert_eq!(env.register("consumer4", 3).await, State::Blocked);

    assert!(env.finish("consumer1").await);
    assert_eq!(env.runnable().await, vec!["consumer2", "consumer4"]);
}

#[tokio::test]
async fn test_fifo_runnable_stops_at_first_miss() {
    let env = setup(Strategy::Fifo, 10).await;

    assert_eq!(env.register("consumer1", 10).await, State::Active);
    assert_eq!(env.register("consumer2", 3).await, State::Blocked);
    assert_eq!(env.register("consumer3", 8).await, State::Blocked);
    assert_eq!(env.register("consumer4", 3).await, State::Blocked);

    assert!(env.finish("consumer1").await);
    assert_eq!(env.runnable().await, vec!["consumer2"]);
}

#[tokio::test]
async fn test_load_missing_constraint_returns_none() {
    let registry = InMemoryRegistry::new();
    let loaded = Constraint::load(&"never-created".into(), &registry)
        .await
        .unwrap();
    assert!(loaded.is_none());
}

#[tokio::test]
async fn test_load_returns_created_constraint() {
    let env = setup(Strategy::Asap, 4).await;
    let loaded = Constraint::load(env.constraint.id(), env.registry())
        .await
        .unwrap();
    assert_eq!(loaded, Some(env.constraint.clone()));
}

#[tokio::test]
async fn test_create_duplicate_fails_to_save() {
    let env = setup(Strategy::Asap, 4).await;
    let err = Constraint::create(
        env.constraint.id().clone(),
        *env.constraint.spec(),
        env.registry(),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ConstraintError::UnableToSaveConstraint { .. }));
}

#[tokio::test]
async fn test_invalid_permits_rejected_before_persistence() {
    let env = setup(Strategy::Fifo, 10).await;

    for permits in [0, 11] {
        let err = env
            .constraint
            .register_consumer(
                &env.unit,
                &"bad".into(),
                permits,
                ConsumerContext::new(),
                env.registry(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ConstraintError::InvalidPermits { .. }));
    }
    assert_eq!(env.state_of("bad").await, None);
}

#[tokio::test]
async fn test_duplicate_consumer_fails_to_register() {
    let env = setup(Strategy::Asap, 10).await;
    assert_eq!(env.register("consumer1", 1).await, State::Active);

    let err = env
        .constraint
        .register_consumer(
            &env.unit,
            &"consumer1".into(),
            1,
            ConsumerContext::new(),
            env.registry(),
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ConstraintError::UnableToRegisterConsumer { .. }
    ));
}

#[tokio::test]
async fn test_capacity_invariant_under_churn() {
    for strategy in [Strategy::Fifo, Strategy::Asap] {
        let env = setup(strategy, 10).await;
        let sizes = [4, 7, 2, 5, 1, 9, 3, 6, 2, 8];

        for (i, permits) in sizes.iter().enumerate() {
            env.register(&format!("c{}", i), *permits).await;
            assert!(env.used_permits().await <= 10);
        }

        for i in 0..sizes.len() {
            env.finish(&format!("c{}", i)).await;
            env.constraint
                .promote_runnable(&env.unit, &ConsumerContext::new(), env.registry())
                .await
                .unwrap();
            assert!(env.used_permits().await <= 10);
        }
    }
}

#[tokio::test]
async fn test_fifo_admits_in_arrival_order() {
    let env = setup(Strategy::Fifo, 4).await;

    assert_eq!(env.register("holder", 4).await, State::Active);
    assert_eq!(env.register("a", 3).await, State::Blocked);
    assert_eq!(env.register("b", 1).await, State::Blocked);
    assert_eq!(env.register("c", 2).await, State::Blocked);

    // b would fit next to a, but c must not overtake b
    assert!(!env.unblock("b").await);
    assert!(env.finish("holder").await);
    assert!(!env.unblock("c").await);

    assert!(env.unblock("a").await);
    assert!(env.unblock("b").await);
    assert_eq!(env.state_of("c").await, Some(State::Blocked));

    assert!(env.finish("a").await);
    assert!(env.unblock("c").await);
}

#[tokio::test]
async fn test_fifo_unblock_out_of_order_refused() {
    let env = setup(Strategy::Fifo, 10).await;

    assert_eq!(env.register("holder", 10).await, State::Active);
    assert_eq!(env.register("a", 3).await, State::Blocked);
    assert_eq!(env.register("b", 3).await, State::Blocked);
    assert!(env.finish("holder").await);

    // Both fit, but b must not start while a is still waiting
    assert_eq!(env.runnable().await, vec!["a", "b"]);
    assert!(!env.unblock("b").await);
    assert_eq!(env.state_of("a").await, Some(State::Blocked));
    assert_eq!(env.state_of("b").await, Some(State::Blocked));

    assert!(env.unblock("a").await);
    assert!(env.unblock("b").await);
    assert_eq!(env.used_permits().await, 6);
}

#[tokio::test]
async fn test_asap_admits_smaller_later_request_first() {
    let env = setup(Strategy::Asap, 10).await;

    assert_eq!(env.register("holder", 6).await, State::Active);
    assert_eq!(env.register("large", 8).await, State::Blocked);
    assert_eq!(env.register("small", 4).await, State::Active);

    assert!(env.finish("holder").await);
    assert!(!env.unblock("large").await);
    assert!(env.finish("small").await);
    assert!(env.unblock("large").await);
}

#[tokio::test]
async fn test_asap_registration_respects_runnable_blocked_consumers() {
    let env = setup(Strategy::Asap, 10).await;

    assert_eq!(env.register("holder", 10).await, State::Active);
    assert_eq!(env.register("waiting", 6).await, State::Blocked);
    assert!(env.finish("holder").await);

    // waiting is runnable but not yet promoted; a newcomer may only use what is left
    assert_eq!(env.register("big", 5).await, State::Blocked);
    assert_eq!(env.register("fits", 4).await, State::Active);
    assert!(env.unblock("waiting").await);
    assert_eq!(env.used_permits().await, 10);
}

#[tokio::test]
async fn test_queue_limit_rejects_twenty_first_blocked_registration() {
    let env = setup(Strategy::Fifo, 1).await;
    assert_eq!(env.register("holder", 1).await, State::Active);

    for i in 0..20 {
        let state = env.register_with(&format!("w{}", i), 1, queue_limited()).await;
        assert_eq!(state, State::Blocked);
    }

    let state = env.register_with("w20", 1, queue_limited()).await;
    assert_eq!(state, State::Rejected);
    assert_eq!(env.state_of("w20").await, None);

    let queue = env
        .registry
        .load_consumers(env.constraint.id(), &env.unit)
        .await
        .unwrap();
    assert_eq!(queue.blocked_count(), 20);
}

#[tokio::test]
async fn test_queue_limit_ignored_without_flag() {
    let env = setup(Strategy::Fifo, 1).await;
    assert_eq!(env.register("holder", 1).await, State::Active);

    for i in 0..25 {
        assert_eq!(env.register(&format!("w{}", i), 1).await, State::Blocked);
    }
}

#[tokio::test]
async fn test_queue_limit_does_not_reject_admissible_request() {
    let env = setup(Strategy::Asap, 10).await;
    assert_eq!(env.register("holder", 9).await, State::Active);

    for i in 0..20 {
        env.register_with(&format!("w{}", i), 5, queue_limited()).await;
    }

    assert_eq!(
        env.register_with("tiny", 1, queue_limited()).await,
        State::Active
    );
}

#[tokio::test]
async fn test_units_are_independent() {
    let env = setup(Strategy::Fifo, 2).await;
    let other = ConstraintUnit::from("infra-2");

    assert_eq!(env.register("a", 2).await, State::Active);
    let state = env
        .constraint
        .register_consumer(
            &other,
            &"b".into(),
            2,
            ConsumerContext::new(),
            env.registry(),
        )
        .await
        .unwrap();
    assert_eq!(state, State::Active);

    let units = env
        .registry
        .list_units(env.constraint.id())
        .await
        .unwrap();
    assert_eq!(units.len(), 2);
}
