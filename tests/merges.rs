//! Merge completion policy and branch cancellation, end to end.

use std::sync::Arc;

use filament::flow::{FlowBuilder, MergeBehavior};
use filament::instance::WorkflowInstance;
use filament::trace::TraceEvent;
use filament::types::InstanceStatus;
use serde_json::json;

mod common;
use common::*;

#[tokio::test]
async fn wait_all_merge_fires_once_after_every_branch() {
    let graph = two_branch_wait_all();
    let mut instance = WorkflowInstance::new(graph, input_with_log()).unwrap();
    instance.run().await.unwrap();

    let fired: Vec<_> = instance
        .trace()
        .entries()
        .iter()
        .filter(|e| matches!(e.event, TraceEvent::MergeFired))
        .collect();
    assert_eq!(fired.len(), 1);
    // The successor ran after both branches finished.
    assert_eq!(log_entries(&instance.variables()).last().map(String::as_str), Some("after"));
}

#[tokio::test]
async fn wait_all_merge_waits_for_a_suspended_branch() {
    // Branch A completes immediately; branch B parks on a bookmark. The
    // merge must not fire until B is resumed.
    let mut builder = FlowBuilder::new();
    let quick = builder.step("quick", Append("quick"));
    let wait = builder.step("wait", WaitFor("signal"));
    let merge = builder.merge("join", MergeBehavior::WaitAll);
    builder.connect(quick, merge);
    builder.connect(wait, merge);
    let split = builder.split("fan", [quick, wait], merge);
    let after = builder.step("after", Append("after"));
    builder.connect(merge, after);
    builder.start(split);

    let mut instance =
        WorkflowInstance::new(Arc::new(builder.build()), input_with_log()).unwrap();
    let status = instance.run().await.unwrap();
    assert_eq!(status, InstanceStatus::Idle);
    assert!(!log_entries(&instance.variables()).contains(&"after".to_string()));

    let status = instance.resume("signal", json!("go")).await.unwrap();
    assert_eq!(status, InstanceStatus::Completed);
    assert_eq!(log_entries(&instance.variables()).last().map(String::as_str), Some("after"));
}

#[tokio::test]
async fn first_merge_cancels_the_straggler_branch() {
    let graph = first_merge_with_straggler();
    let mut instance = WorkflowInstance::new(graph, input_with_log()).unwrap();
    let status = instance.run().await.unwrap();

    // The straggler's bookmark was dropped, so nothing is outstanding.
    assert_eq!(status, InstanceStatus::Completed);
    assert!(instance.bookmark_names().is_empty());

    // Its cancellation path ran exactly once.
    let log = log_entries(&instance.variables());
    assert_eq!(
        log.iter().filter(|e| *e == "canceled:straggler").count(),
        1
    );
    // The merge fired and the successor ran.
    assert_eq!(log.last().map(String::as_str), Some("after"));
}

#[tokio::test]
async fn resuming_a_canceled_bookmark_misses() {
    let graph = first_merge_with_straggler();
    let mut instance = WorkflowInstance::new(graph, input_with_log()).unwrap();
    instance.run().await.unwrap();

    // The instance completed, so the dropped bookmark reports a miss.
    let err = instance.resume("straggler", json!(null)).await.unwrap_err();
    assert!(err.to_string().contains("straggler"));
}

#[tokio::test]
async fn first_merge_fires_exactly_once() {
    let graph = first_merge_with_straggler();
    let mut instance = WorkflowInstance::new(graph, input_with_log()).unwrap();
    instance.run().await.unwrap();

    let fired = instance
        .trace()
        .entries()
        .iter()
        .filter(|e| matches!(e.event, TraceEvent::MergeFired))
        .count();
    assert_eq!(fired, 1);
    assert_eq!(
        log_entries(&instance.variables())
            .iter()
            .filter(|e| *e == "after")
            .count(),
        1
    );
}

#[tokio::test]
async fn nested_split_cancellation_tears_down_the_inner_split() {
    // Outer First race: a one-step branch against a branch that opens an
    // inner WaitAll split whose branches both suspend. Winning the race
    // must drop both inner bookmarks and run both cancellation paths.
    let mut builder = FlowBuilder::new();

    let inner_a = builder.step("inner-a", WaitFor("inner-a"));
    let inner_b = builder.step("inner-b", WaitFor("inner-b"));
    let inner_merge = builder.merge("inner-join", MergeBehavior::WaitAll);
    builder.connect(inner_a, inner_merge);
    builder.connect(inner_b, inner_merge);
    let inner_split = builder.split("inner-fan", [inner_a, inner_b], inner_merge);

    let fast = builder.step("fast", Append("fast"));
    let outer_merge = builder.merge("race", MergeBehavior::First);
    builder.connect(fast, outer_merge);
    builder.connect(inner_merge, outer_merge);
    let outer_split = builder.split("outer-fan", [fast, inner_split], outer_merge);
    let after = builder.step("after", Append("after"));
    builder.connect(outer_merge, after);
    builder.start(outer_split);

    let mut instance =
        WorkflowInstance::new(Arc::new(builder.build()), input_with_log()).unwrap();
    let status = instance.run().await.unwrap();

    assert_eq!(status, InstanceStatus::Completed);
    assert!(instance.bookmark_names().is_empty());
    let log = log_entries(&instance.variables());
    assert!(log.contains(&"canceled:inner-a".to_string()));
    assert!(log.contains(&"canceled:inner-b".to_string()));
    assert_eq!(log.last().map(String::as_str), Some("after"));
}

#[tokio::test]
async fn sibling_scopes_are_isolated_but_share_the_root() {
    // Each branch defines a local name and also increments the shared
    // counter through the root binding.
    let mut builder = FlowBuilder::new();
    let a = builder.step("a", SetVar("mine", json!("a")));
    let a2 = builder.step("a2", Increment);
    builder.connect(a, a2);
    let b = builder.step("b", SetVar("mine", json!("b")));
    let b2 = builder.step("b2", Increment);
    builder.connect(b, b2);
    let merge = builder.merge("join", MergeBehavior::WaitAll);
    builder.connect(a2, merge);
    builder.connect(b2, merge);
    let split = builder.split("fan", [a, b], merge);
    builder.start(split);

    let mut input = input_with_log();
    input.insert("counter".into(), json!(0));
    let mut instance = WorkflowInstance::new(Arc::new(builder.build()), input).unwrap();
    instance.run().await.unwrap();

    let variables = instance.variables();
    // Both increments landed on the shared root counter.
    assert_eq!(variables.get("counter"), Some(&json!(2)));
    // Neither branch-local binding leaked to the root.
    assert!(!variables.contains_key("mine"));
}

#[tokio::test]
async fn instance_cancel_runs_cancellation_paths_and_is_idempotent() {
    let graph = suspend_in_the_middle();
    let mut instance = WorkflowInstance::new(graph, input_with_log()).unwrap();
    let status = instance.run().await.unwrap();
    assert_eq!(status, InstanceStatus::Idle);

    instance.cancel().await.unwrap();
    assert_eq!(instance.status(), InstanceStatus::Canceled);
    assert!(instance.bookmark_names().is_empty());
    assert!(
        log_entries(&instance.variables()).contains(&"canceled:approval".to_string())
    );

    // Terminal cancel is a no-op.
    instance.cancel().await.unwrap();
    assert_eq!(instance.status(), InstanceStatus::Canceled);

    // A canceled instance cannot be resumed.
    let err = instance.resume("approval", json!(null)).await.unwrap_err();
    assert!(err.to_string().contains("canceled"));
}
