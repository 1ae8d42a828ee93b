use std::sync::Arc;

use filament::flow::{FlowBuilder, FlowGraph, MergeBehavior};
use filament::variables::{VariableMap, new_variable_map};
use serde_json::json;

use super::activities::{Append, WaitFor};

/// Run input with the shared `log` array pre-seeded at the root scope.
pub fn input_with_log() -> VariableMap {
    let mut input = new_variable_map();
    input.insert("log".into(), json!([]));
    input
}

/// `split(a1 -> a2 | b1 -> b2) -> merge(WaitAll) -> after`
pub fn two_branch_wait_all() -> Arc<FlowGraph> {
    let mut builder = FlowBuilder::new();
    let a1 = builder.step("a1", Append("a1"));
    let a2 = builder.step("a2", Append("a2"));
    builder.connect(a1, a2);
    let b1 = builder.step("b1", Append("b1"));
    let b2 = builder.step("b2", Append("b2"));
    builder.connect(b1, b2);

    let merge = builder.merge("join", MergeBehavior::WaitAll);
    builder.connect(a2, merge);
    builder.connect(b2, merge);
    let split = builder.split("fan-out", [a1, b1], merge);
    let after = builder.step("after", Append("after"));
    builder.connect(merge, after);
    builder.start(split);
    Arc::new(builder.build())
}

/// A First merge where one branch completes in a single step and the other
/// parks on a bookmark it will never see resumed:
/// `split(fast | slow(bookmark)) -> merge(First) -> after`
pub fn first_merge_with_straggler() -> Arc<FlowGraph> {
    let mut builder = FlowBuilder::new();
    let fast = builder.step("fast", Append("fast"));
    let slow = builder.step("slow", WaitFor("straggler"));

    let merge = builder.merge("race", MergeBehavior::First);
    builder.connect(fast, merge);
    builder.connect(slow, merge);
    let split = builder.split("race-out", [fast, slow], merge);
    let after = builder.step("after", Append("after"));
    builder.connect(merge, after);
    builder.start(split);
    Arc::new(builder.build())
}

/// `before -> wait(bookmark "approval") -> after`
pub fn suspend_in_the_middle() -> Arc<FlowGraph> {
    let mut builder = FlowBuilder::new();
    let before = builder.step("before", Append("before"));
    let wait = builder.step("wait", WaitFor("approval"));
    let after = builder.step("after", Append("after"));
    builder.connect(before, wait);
    builder.connect(wait, after);
    builder.start(before);
    Arc::new(builder.build())
}
