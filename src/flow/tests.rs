use std::sync::Arc;

use async_trait::async_trait;

use crate::activity::{Activity, ActivityContext, ActivityError, Outcome};
use crate::flow::{FlowBuilder, MergeBehavior, StructuralError, validate};

struct Noop;

#[async_trait]
impl Activity for Noop {
    async fn execute(&self, _ctx: &mut ActivityContext<'_>) -> Result<Outcome, ActivityError> {
        Ok(Outcome::Completed)
    }
}

#[test]
fn well_formed_split_validates_clean() {
    let mut b = FlowBuilder::new();
    let a = b.step("a", Noop);
    let c = b.step("c", Noop);
    let merge = b.merge("join", MergeBehavior::WaitAll);
    let split = b.split("fan", [a, c], merge);
    let done = b.step("done", Noop);
    b.connect(a, merge);
    b.connect(c, merge);
    b.connect(merge, done);
    b.start(split);

    let graph = b.build();
    assert!(validate(&graph).is_empty());
}

#[test]
fn missing_start_is_reported() {
    let mut b = FlowBuilder::new();
    let _ = b.step("only", Noop);
    let graph = b.build();
    assert_eq!(validate(&graph), vec![StructuralError::MissingStart]);
}

#[test]
fn shared_merge_is_attributed_to_the_merge() {
    let mut b = FlowBuilder::new();
    let a = b.step("a", Noop);
    let c = b.step("c", Noop);
    let merge = b.merge("shared", MergeBehavior::WaitAll);
    let split1 = b.split("s1", [a], merge);
    let split2 = b.split("s2", [c], merge);
    b.connect(a, merge);
    b.connect(c, merge);
    let entry = b.step("entry", Noop);
    b.connect(entry, split1);
    // split2 dangles off the entry path; both splits claim the same merge.
    let _ = split2;
    b.start(entry);

    let graph = b.build();
    let errors = validate(&graph);
    assert!(
        errors.contains(&StructuralError::SharedMerge { merge }),
        "expected SharedMerge for {merge}, got {errors:?}"
    );
}

#[test]
fn dead_end_branch_is_attributed_to_the_merge() {
    let mut b = FlowBuilder::new();
    let a = b.step("a", Noop);
    let stray = b.step("stray", Noop); // never connected to the merge
    let merge = b.merge("join", MergeBehavior::WaitAll);
    let split = b.split("fan", [a, stray], merge);
    b.connect(a, merge);
    let done = b.step("done", Noop);
    b.connect(merge, done);
    b.start(split);

    let graph = b.build();
    let errors = validate(&graph);
    assert!(errors.contains(&StructuralError::BranchDeadEnd { merge, branch: 1 }));
}

#[test]
fn foreign_merge_reach_is_cross_split() {
    // Split s1's branch routes into s2's merge without owning it.
    let mut b = FlowBuilder::new();
    let inner = b.step("inner", Noop);
    let m2 = b.merge("m2", MergeBehavior::WaitAll);
    let s2 = b.split("s2", [inner], m2);
    b.connect(inner, m2);

    let leak = b.step("leak", Noop);
    let m1 = b.merge("m1", MergeBehavior::WaitAll);
    let s1 = b.split("s1", [leak], m1);
    b.connect(leak, m2); // wrong merge

    let entry = b.step("entry", Noop);
    b.connect(entry, s1);
    b.start(entry);
    let _ = s2;

    let graph = b.build();
    let errors = validate(&graph);
    assert!(errors.contains(&StructuralError::CrossSplitMerge {
        merge: m2,
        from_split: s1,
    }));
    assert!(errors.contains(&StructuralError::BranchDeadEnd { merge: m1, branch: 0 }));
}

#[test]
fn validation_is_idempotent() {
    let mut b = FlowBuilder::new();
    let a = b.step("a", Noop);
    let merge = b.merge("join", MergeBehavior::WaitAll);
    let split1 = b.split("s1", [a], merge);
    let split2 = b.split("s2", [a], merge);
    b.connect(a, merge);
    b.start(split1);
    let _ = split2;

    let graph = b.build();
    let first = validate(&graph);
    let second = validate(&graph);
    assert_eq!(first, second);
    assert!(!first.is_empty());
}

#[test]
fn decision_cycles_do_not_hang_validation() {
    let mut b = FlowBuilder::new();
    let work = b.step("work", Noop);
    let again: crate::flow::DecisionPredicate = Arc::new(|_| Ok(false));
    let check = b.decision("check", again);
    let merge = b.merge("join", MergeBehavior::WaitAll);
    let split = b.split("fan", [work], merge);
    b.connect(work, check);
    b.connect_true(check, work); // loop back
    b.connect_false(check, merge);
    let done = b.step("done", Noop);
    b.connect(merge, done);
    b.start(split);

    let graph = b.build();
    assert!(validate(&graph).is_empty());
}

#[test]
fn connect_on_split_is_ignored() {
    let mut b = FlowBuilder::new();
    let a = b.step("a", Noop);
    let merge = b.merge("join", MergeBehavior::WaitAll);
    let split = b.split("fan", [a], merge);
    let other = b.step("other", Noop);
    b.connect(split, other); // no-op with a warning
    b.connect(a, merge);
    b.start(split);

    let graph = b.build();
    // The split still routes through its branches only.
    match &graph.node(split).body {
        crate::flow::NodeBody::Split { branches, .. } => assert_eq!(branches.len(), 1),
        other => panic!("unexpected body: {other:?}"),
    }
}
