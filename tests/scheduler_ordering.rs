//! Ordering guarantees of the cooperative scheduler.

use std::sync::Arc;

use filament::flow::{FlowBuilder, MergeBehavior};
use filament::instance::WorkflowInstance;
use filament::types::InstanceStatus;
use serde_json::json;

mod common;
use common::*;

#[tokio::test]
async fn sequential_steps_run_in_graph_order() {
    let mut builder = FlowBuilder::new();
    let first = builder.step("first", Append("first"));
    let second = builder.step("second", Append("second"));
    let third = builder.step("third", Append("third"));
    builder.connect(first, second);
    builder.connect(second, third);
    builder.start(first);

    let mut instance =
        WorkflowInstance::new(Arc::new(builder.build()), input_with_log()).unwrap();
    let status = instance.run().await.unwrap();

    assert_eq!(status, InstanceStatus::Completed);
    assert_eq!(log_entries(&instance.variables()), ["first", "second", "third"]);
}

#[tokio::test]
async fn branches_start_in_reverse_declaration_order_and_interleave() {
    let graph = two_branch_wait_all();
    let mut instance = WorkflowInstance::new(graph, input_with_log()).unwrap();
    let status = instance.run().await.unwrap();

    assert_eq!(status, InstanceStatus::Completed);
    // Branch B (declared second) runs its first step before branch A, and
    // neither branch runs a second step before the other has run its first.
    assert_eq!(
        log_entries(&instance.variables()),
        ["b1", "a1", "b2", "a2", "after"]
    );
}

#[tokio::test]
async fn three_branches_interleave_round_robin() {
    let mut builder = FlowBuilder::new();
    let a = builder.step("a", Append("a"));
    let b = builder.step("b", Append("b"));
    let c = builder.step("c", Append("c"));
    let merge = builder.merge("join", MergeBehavior::WaitAll);
    builder.connect(a, merge);
    builder.connect(b, merge);
    builder.connect(c, merge);
    let split = builder.split("fan", [a, b, c], merge);
    builder.start(split);

    let mut instance =
        WorkflowInstance::new(Arc::new(builder.build()), input_with_log()).unwrap();
    instance.run().await.unwrap();

    assert_eq!(log_entries(&instance.variables()), ["c", "b", "a"]);
}

#[tokio::test]
async fn decision_routes_on_the_predicate() {
    let mut builder = FlowBuilder::new();
    let gate = builder.decision(
        "gate",
        Arc::new(|view| Ok(view.get_bool("go").unwrap_or(false))),
    );
    let yes = builder.step("yes", Append("yes"));
    let no = builder.step("no", Append("no"));
    builder.connect_true(gate, yes);
    builder.connect_false(gate, no);
    builder.start(gate);
    let graph = Arc::new(builder.build());

    let mut input = input_with_log();
    input.insert("go".into(), json!(true));
    let mut instance = WorkflowInstance::new(Arc::clone(&graph), input).unwrap();
    instance.run().await.unwrap();
    assert_eq!(log_entries(&instance.variables()), ["yes"]);

    let mut instance = WorkflowInstance::new(graph, input_with_log()).unwrap();
    instance.run().await.unwrap();
    assert_eq!(log_entries(&instance.variables()), ["no"]);
}

#[tokio::test]
async fn decision_loop_terminates_when_the_predicate_flips() {
    // work -> gate; gate loops back to work until counter reaches 3.
    let mut builder = FlowBuilder::new();
    let work = builder.step("work", Increment);
    let gate = builder.decision(
        "again?",
        Arc::new(|view| Ok(view.get_i64("counter").unwrap_or(0) < 3)),
    );
    let done = builder.step("done", Append("done"));
    builder.connect(work, gate);
    builder.connect_true(gate, work);
    builder.connect_false(gate, done);
    builder.start(work);

    let mut instance =
        WorkflowInstance::new(Arc::new(builder.build()), input_with_log()).unwrap();
    let status = instance.run().await.unwrap();

    assert_eq!(status, InstanceStatus::Completed);
    assert_eq!(instance.variables().get("counter"), Some(&json!(3)));
    assert_eq!(log_entries(&instance.variables()), ["done"]);
}

#[tokio::test]
async fn activity_fault_aborts_the_instance() {
    let mut builder = FlowBuilder::new();
    let first = builder.step("first", Append("first"));
    let boom = builder.step("boom", Explode("wires crossed"));
    let unreached = builder.step("unreached", Append("unreached"));
    builder.connect(first, boom);
    builder.connect(boom, unreached);
    builder.start(first);

    let mut instance =
        WorkflowInstance::new(Arc::new(builder.build()), input_with_log()).unwrap();
    let err = instance.run().await.unwrap_err();

    assert_eq!(instance.status(), InstanceStatus::Faulted);
    let fault = instance.fault().expect("fault info recorded");
    assert_eq!(fault.label, "boom");
    assert!(err.to_string().contains("wires crossed"));
    // Nothing past the faulting node ran.
    assert_eq!(log_entries(&instance.variables()), ["first"]);
}

#[tokio::test]
async fn decision_predicate_error_faults_the_instance() {
    let mut builder = FlowBuilder::new();
    let first = builder.step("first", Append("first"));
    let gate = builder.decision(
        "gate",
        Arc::new(|view| {
            view.get_bool("go")
                .ok_or_else(|| filament::activity::ActivityError::missing("go"))
        }),
    );
    let unreached = builder.step("unreached", Append("unreached"));
    builder.connect(first, gate);
    builder.connect_true(gate, unreached);
    builder.connect_false(gate, unreached);
    builder.start(first);

    // "go" is never bound, so the predicate errors and the fault is
    // attributed to the decision node.
    let mut instance =
        WorkflowInstance::new(Arc::new(builder.build()), input_with_log()).unwrap();
    let err = instance.run().await.unwrap_err();

    assert_eq!(instance.status(), InstanceStatus::Faulted);
    let fault = instance.fault().expect("fault info recorded");
    assert_eq!(fault.label, "gate");
    assert!(err.to_string().contains("go"));
    assert_eq!(log_entries(&instance.variables()), ["first"]);
}

#[tokio::test]
async fn structural_errors_block_instantiation() {
    let mut builder = FlowBuilder::new();
    let orphan = builder.merge("orphan", MergeBehavior::WaitAll);
    let start = builder.step("start", Noop);
    builder.connect(start, orphan);
    builder.start(start);

    let err = WorkflowInstance::new(Arc::new(builder.build()), input_with_log()).unwrap_err();
    assert!(!err.errors.is_empty());
}
