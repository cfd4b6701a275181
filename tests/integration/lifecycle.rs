//! Objective provisioning, execution bookkeeping, and teardown.

use serde_json::json;

use plexus::artifacts::{ArtifactFilter, StoreOptions};
use plexus::error::Error;
use plexus::events::RuntimeEvent;
use plexus::objective::ObjectiveStatus;
use plexus::tracker::TaskStatus;

use crate::fixtures::{drain_events, test_supervisor};

#[tokio::test]
async fn test_full_objective_lifecycle() {
    let (sup, mut events) = test_supervisor();

    let objective = sup
        .provision("obj_full", vec!["collect".to_string(), "report".to_string()])
        .await
        .unwrap();

    objective.initialize().await.unwrap();
    objective.start().await.unwrap();
    objective.set_current_step("collect").await.unwrap();

    // Work the first step through the tracker.
    let tracker = objective.task_tracker();
    let task_id = tracker.create_task("collect").await.unwrap();
    tracker.assign_task(task_id, "agent_a").await.unwrap();
    tracker.start_task(task_id, "agent_a").await.unwrap();
    tracker
        .complete_task(task_id, json!({"rows": 42}))
        .await
        .unwrap();

    let task = tracker.get_task(task_id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.result, Some(json!({"rows": 42})));

    // Record its output in the artifact store.
    let store = objective.artifact_store();
    let artifact_id = store
        .store(
            "collected_rows",
            json!({"rows": 42}),
            "application/json",
            StoreOptions {
                step_id: Some("collect".to_string()),
                created_by: Some("agent_a".to_string()),
                tags: vec!["dataset".to_string()],
                ..StoreOptions::default()
            },
        )
        .await
        .unwrap();

    let by_step = store.list_by_step("collect").await.unwrap();
    assert_eq!(by_step.len(), 1);
    assert_eq!(by_step[0].id, artifact_id);

    objective.update_progress(50).await.unwrap();
    objective.set_current_step("report").await.unwrap();
    objective.complete().await.unwrap();

    let snapshot = objective.snapshot().await.unwrap();
    assert_eq!(snapshot.status, ObjectiveStatus::Completed);
    assert_eq!(snapshot.progress, 100);

    // All three owners reported to the aggregator.
    let seen = drain_events(&mut events);
    assert!(seen
        .iter()
        .any(|e| matches!(e, RuntimeEvent::TaskTracker { .. })));
    assert!(seen
        .iter()
        .any(|e| matches!(e, RuntimeEvent::ArtifactStore { .. })));
    assert!(seen
        .iter()
        .any(|e| matches!(e, RuntimeEvent::Objective { .. })));
}

#[tokio::test]
async fn test_tracker_guards_enforced_end_to_end() {
    let (sup, _events) = test_supervisor();
    let objective = sup.provision("obj_guards", vec![]).await.unwrap();
    let tracker = objective.task_tracker();

    let task_id = tracker.create_task("step").await.unwrap();

    // Starting before assignment is a status conflict.
    let err = tracker.start_task(task_id, "agent_a").await.unwrap_err();
    assert!(matches!(err, Error::TaskStatusConflict { .. }));

    tracker.assign_task(task_id, "agent_a").await.unwrap();

    // Only the assigned agent may start it.
    let err = tracker.start_task(task_id, "agent_b").await.unwrap_err();
    assert!(matches!(err, Error::WrongAgent { .. }));

    // The failed attempts changed nothing.
    let task = tracker.get_task(task_id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Assigned);
}

#[tokio::test]
async fn test_artifact_filter_across_steps() {
    let (sup, _events) = test_supervisor();
    let objective = sup.provision("obj_filter", vec![]).await.unwrap();
    let store = objective.artifact_store();

    store
        .store(
            "tagged",
            json!(1),
            "text/plain",
            StoreOptions {
                tags: vec!["a".to_string(), "b".to_string()],
                ..StoreOptions::default()
            },
        )
        .await
        .unwrap();
    store
        .store(
            "partial",
            json!(2),
            "text/plain",
            StoreOptions {
                tags: vec!["a".to_string()],
                ..StoreOptions::default()
            },
        )
        .await
        .unwrap();

    let matched = store
        .list(ArtifactFilter {
            tags: Some(vec!["a".to_string(), "b".to_string()]),
            ..ArtifactFilter::default()
        })
        .await
        .unwrap();
    assert_eq!(matched.len(), 1);
    assert_eq!(matched[0].name, "tagged");
}

#[tokio::test]
async fn test_teardown_stops_owners() {
    let (sup, _events) = test_supervisor();
    let objective = sup.provision("obj_gone", vec![]).await.unwrap();
    let tracker = objective.task_tracker().clone();

    sup.teardown("obj_gone").await.unwrap();

    // The tracker's mailbox is closed after teardown.
    assert!(tracker.create_task("late").await.is_err());
    // And the directory no longer knows the objective.
    assert!(sup.directory().objective("obj_gone").await.is_err());
    assert!(sup.get("obj_gone").await.is_err());
}

#[tokio::test]
async fn test_objectives_are_isolated() {
    let (sup, _events) = test_supervisor();
    let first = sup.provision("obj_one", vec![]).await.unwrap();
    let second = sup.provision("obj_two", vec![]).await.unwrap();

    first.task_tracker().create_task("only_one").await.unwrap();

    let tasks = second.task_tracker().list_tasks().await.unwrap();
    assert!(tasks.is_empty());

    sup.teardown("obj_one").await.unwrap();

    // The sibling is untouched.
    second.task_tracker().create_task("still_up").await.unwrap();
    assert_eq!(sup.list().await, vec!["obj_two"]);
}
