//! Signal delivery and the delegation protocol.

use std::sync::Arc;

use serde_json::json;
use tokio_test::assert_ok;

use plexus::config::Config;
use plexus::error::{Error, RoutingPhase};
use plexus::signal::{
    Delegator, DeliveryNotice, LocalRouter, RouterImpl, Signal, Worker, WorkerRole,
};

fn quick_config() -> Config {
    Config {
        delivery_timeout_ms: 200,
        response_timeout_ms: 500,
        ..Config::default()
    }
}

#[tokio::test]
async fn test_subscribed_route_confirms_delivery() {
    let router = LocalRouter::new(&Config::default());
    assert_ok!(router.start().await);
    let mut inbox = router.register_worker("bob").await;

    let signal = Signal::new("ping", json!({"k": 1}), "alice", "bob");
    let confirmation = router.subscribe(signal.id).await.unwrap();
    router.route(signal.clone()).await.unwrap();

    assert_eq!(
        confirmation.await.unwrap(),
        DeliveryNotice::Delivered(signal.id)
    );
    assert_eq!(inbox.recv().await.unwrap().id, signal.id);
}

#[tokio::test]
async fn test_delegation_roundtrip_with_worker_loop() {
    let router = Arc::new(LocalRouter::new(&Config::default()));
    let caller_inbox = router.register_worker("planner").await;
    let mut worker_inbox = router.register_worker("analyst").await;

    // The worker echoes back a summary of what it was asked to do.
    let worker_router = router.clone();
    tokio::spawn(async move {
        while let Some(request) = worker_inbox.recv().await {
            let response = Signal::new(
                "step_result",
                json!({"handled": request.payload}),
                "analyst",
                &request.sender,
            );
            let _ = worker_router.route(response).await;
        }
    });

    let mut delegator = Delegator::new(
        "planner",
        vec![Worker::new("analyst", WorkerRole::Member, "analysis")],
        router,
        caller_inbox,
        &quick_config(),
    );

    let result = delegator
        .delegate("statistical analysis", json!({"dataset": "d1"}))
        .await
        .unwrap();
    assert_eq!(result, json!({"handled": {"dataset": "d1"}}));

    // The same delegator can go again.
    let result = delegator
        .delegate("statistical analysis", json!({"dataset": "d2"}))
        .await
        .unwrap();
    assert_eq!(result, json!({"handled": {"dataset": "d2"}}));
}

#[tokio::test]
async fn test_delegation_prefers_coordinator() {
    let router = Arc::new(LocalRouter::new(&Config::default()));
    let caller_inbox = router.register_worker("planner").await;
    let mut coord_inbox = router.register_worker("coord").await;
    let _member_inbox = router.register_worker("member").await;

    let worker_router = router.clone();
    tokio::spawn(async move {
        let request = coord_inbox.recv().await.unwrap();
        let _ = worker_router
            .route(Signal::new(
                "step_result",
                json!("from coordinator"),
                "coord",
                &request.sender,
            ))
            .await;
    });

    let mut delegator = Delegator::new(
        "planner",
        vec![
            Worker::new("member", WorkerRole::Member, "review"),
            Worker::new("coord", WorkerRole::Coordinator, "review"),
        ],
        router,
        caller_inbox,
        &quick_config(),
    );

    let result = delegator.delegate("review the draft", json!({})).await.unwrap();
    assert_eq!(result, json!("from coordinator"));
}

#[tokio::test]
async fn test_delegation_times_out_on_silent_worker() {
    let router = Arc::new(LocalRouter::new(&Config::default()));
    let caller_inbox = router.register_worker("planner").await;
    let _silent_inbox = router.register_worker("silent").await;

    let mut delegator = Delegator::new(
        "planner",
        vec![Worker::new("silent", WorkerRole::Member, "analysis")],
        router,
        caller_inbox,
        &quick_config(),
    );

    let err = delegator.delegate("analysis", json!({})).await.unwrap_err();
    assert!(matches!(
        err,
        Error::RoutingTimeout {
            phase: RoutingPhase::Response,
            ..
        }
    ));
}
