//! End-to-end step tree execution.

use serde_json::{json, Value};

use plexus::engine::{ParamValue, PathKey, Step, StepStatus, StepTree};

use crate::fixtures::arithmetic_engine;

/// The reference two-step run: input 5, step1 doubles it to 10, step2
/// reads step1's result and adds one, giving 11. The log carries both
/// steps at indices 0 and 1.
#[tokio::test]
async fn test_two_step_reference_resolution() {
    let engine = arithmetic_engine();

    let tree = StepTree::sequence(vec![
        StepTree::leaf(
            Step::new("step1", "double")
                .with_param("n", ParamValue::InputRef(vec![PathKey::key("n")])),
        ),
        StepTree::leaf(
            Step::new("step2", "add_one").with_param("n", ParamValue::step_result("step1")),
        ),
    ]);

    let outcome = engine.run(&tree, json!({"n": 5}), true).await;

    let last = outcome.result.unwrap();
    assert_eq!(last.result, Some(json!(11)));
    assert_eq!(last.status, StepStatus::Completed);

    assert_eq!(outcome.context.steps["step1"].result, Some(json!(10)));
    assert_eq!(outcome.context.steps["step2"].result, Some(json!(11)));

    let log = outcome.log.unwrap();
    assert_eq!(log.entries.len(), 2);
    assert_eq!(log.entries[0].step_id, "step1");
    assert_eq!(log.entries[0].step_index, 0);
    assert_eq!(log.entries[1].step_id, "step2");
    assert_eq!(log.entries[1].step_index, 1);
    assert!(log.started_at <= log.completed_at);
}

#[tokio::test]
async fn test_mixed_tree_with_parallel_group() {
    let engine = arithmetic_engine();

    // seed, then two parallel doublings of the seed, then a final add_one
    // over one parallel result.
    let tree = StepTree::sequence(vec![
        StepTree::leaf(Step::new("seed", "add_one").with_literal("n", json!(0))),
        StepTree::parallel(vec![
            StepTree::leaf(
                Step::new("left", "double").with_param("n", ParamValue::step_result("seed")),
            ),
            StepTree::leaf(
                Step::new("right", "double").with_param("n", ParamValue::step_result("seed")),
            ),
        ]),
        StepTree::leaf(
            Step::new("final", "add_one").with_param("n", ParamValue::step_result("left")),
        ),
    ]);

    let outcome = engine.run(&tree, Value::Null, true).await;
    let last = outcome.result.unwrap();
    assert_eq!(last.result, Some(json!(3)));

    // Indices are contiguous 0..=3 with the parallel children at their
    // declared positions.
    let log = outcome.log.unwrap();
    let ids: Vec<&str> = log.entries.iter().map(|e| e.step_id.as_str()).collect();
    assert_eq!(ids, vec!["seed", "left", "right", "final"]);
    let indices: Vec<u64> = log.entries.iter().map(|e| e.step_index).collect();
    assert_eq!(indices, vec![0, 1, 2, 3]);
}

#[tokio::test]
async fn test_failure_leaves_partial_context() {
    let engine = arithmetic_engine();

    let tree = StepTree::sequence(vec![
        StepTree::leaf(Step::new("ok", "add_one").with_literal("n", json!(1))),
        StepTree::leaf(Step::new("boom", "fail")),
        StepTree::leaf(Step::new("never", "add_one").with_literal("n", json!(1))),
    ]);

    let outcome = engine.run(&tree, Value::Null, true).await;
    assert!(outcome.result.is_err());

    // The completed step and the failed step are recorded; the step after
    // the failure never ran.
    assert_eq!(outcome.context.steps["ok"].status, StepStatus::Completed);
    assert_eq!(outcome.context.steps["boom"].status, StepStatus::Failed);
    assert!(!outcome.context.steps.contains_key("never"));

    let log = outcome.log.unwrap();
    assert_eq!(log.entries.len(), 2);
    assert!(log.entries[1].error.is_some());
}
