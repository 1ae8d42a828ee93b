//! Structural validation of flow graphs.
//!
//! [`validate`] walks a graph once before any execution and returns every
//! structural error it finds, each attributed to the owning node. It is
//! pure: re-running it on the same graph yields an equivalent error list,
//! with no accumulation and no side effects on the graph.

use miette::Diagnostic;
use rustc_hash::FxHashSet;
use thiserror::Error;

use crate::types::NodeId;

use super::node::{FlowGraph, NodeBody};

/// A structural defect in a graph, reported before any execution.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Error, Diagnostic)]
pub enum StructuralError {
    /// The graph declared no entry node.
    #[error("graph has no start node")]
    #[diagnostic(
        code(filament::validate::missing_start),
        help("Call FlowBuilder::start with the entry node before building.")
    )]
    MissingStart,

    /// A Split declared no branches.
    #[error("split {split} has no branches")]
    #[diagnostic(code(filament::validate::empty_split))]
    EmptySplit { split: NodeId },

    /// A Merge is not owned by any Split.
    #[error("merge {merge} is not owned by any split")]
    #[diagnostic(
        code(filament::validate::unowned_merge),
        help("Every merge must be the declared join point of exactly one split.")
    )]
    UnownedMerge { merge: NodeId },

    /// Two or more Splits declare the same Merge as their join point.
    #[error("merge {merge} is owned by more than one split")]
    #[diagnostic(
        code(filament::validate::shared_merge),
        help("Give each split its own merge; merges cannot be shared across splits.")
    )]
    SharedMerge { merge: NodeId },

    /// A branch walk of one Split reached a Merge owned by a different
    /// Split. Attributed to the merge, not to either split.
    #[error("merge {merge} is reachable from a foreign split {from_split}")]
    #[diagnostic(
        code(filament::validate::cross_split_merge),
        help("Branches must stay inside their split; route through nested splits instead.")
    )]
    CrossSplitMerge { merge: NodeId, from_split: NodeId },

    /// A branch cannot reach its Split's Merge at all. Attributed to the
    /// merge per the engine's error model.
    #[error("branch #{branch} never reaches its merge {merge}")]
    #[diagnostic(
        code(filament::validate::branch_dead_end),
        help("Every branch must terminate at its split's merge.")
    )]
    BranchDeadEnd { merge: NodeId, branch: usize },

    /// A Split declares a join point that is not a Merge node.
    #[error("split {split} declares {node} as its merge, but it is a {kind}")]
    #[diagnostic(code(filament::validate::not_a_merge))]
    NotAMerge {
        split: NodeId,
        node: NodeId,
        kind: &'static str,
    },
}

/// An aggregate validation failure, used where an operation needs a single
/// error value (e.g. instance construction).
#[derive(Debug, Clone, PartialEq, Eq, Error, Diagnostic)]
#[error("graph failed validation with {} error(s)", errors.len())]
#[diagnostic(code(filament::validate::invalid_graph))]
pub struct InvalidGraph {
    pub errors: Vec<StructuralError>,
}

/// Validates `graph`, returning every structural error in deterministic
/// (node-index) order.
#[must_use]
pub fn validate(graph: &FlowGraph) -> Vec<StructuralError> {
    let mut errors: Vec<StructuralError> = Vec::new();
    let mut report = |e: StructuralError, errors: &mut Vec<StructuralError>| {
        if !errors.contains(&e) {
            errors.push(e);
        }
    };

    if graph.start().is_none() {
        errors.push(StructuralError::MissingStart);
    }

    // Merge ownership: exactly one split per merge.
    for node in graph.iter() {
        if let NodeBody::Merge { .. } = node.body {
            let mut owners = 0usize;
            for other in graph.iter() {
                if let NodeBody::Split { merge, .. } = &other.body
                    && *merge == node.id
                {
                    owners += 1;
                }
            }
            match owners {
                0 => report(StructuralError::UnownedMerge { merge: node.id }, &mut errors),
                1 => {}
                _ => report(StructuralError::SharedMerge { merge: node.id }, &mut errors),
            }
        }
    }

    // Branch reachability: every branch of every split must reach that
    // split's merge.
    for node in graph.iter() {
        let NodeBody::Split { branches, merge } = &node.body else {
            continue;
        };
        if let Some(join) = graph.get(*merge)
            && !matches!(join.body, NodeBody::Merge { .. })
        {
            report(
                StructuralError::NotAMerge {
                    split: node.id,
                    node: *merge,
                    kind: join.body.kind(),
                },
                &mut errors,
            );
            continue;
        }
        if branches.is_empty() {
            report(StructuralError::EmptySplit { split: node.id }, &mut errors);
            continue;
        }
        for (index, branch) in branches.iter().enumerate() {
            let reached = walk_branch(graph, node.id, branch.start, *merge, &mut errors);
            if !reached {
                report(
                    StructuralError::BranchDeadEnd {
                        merge: *merge,
                        branch: index,
                    },
                    &mut errors,
                );
            }
        }
    }

    errors
}

/// Walks one branch from `start` looking for `target` (the owning split's
/// merge). Nested splits are traversed by jumping to their own merge's
/// successor; foreign merges encountered on the way are reported as
/// cross-split errors. Returns whether `target` is reachable. Cycles
/// (legal through Decision back-edges) are handled with a visited set.
fn walk_branch(
    graph: &FlowGraph,
    split: NodeId,
    start: NodeId,
    target: NodeId,
    errors: &mut Vec<StructuralError>,
) -> bool {
    let mut visited: FxHashSet<NodeId> = FxHashSet::default();
    let mut stack = vec![start];
    let mut reached = false;

    while let Some(id) = stack.pop() {
        if !visited.insert(id) {
            continue;
        }
        if id == target {
            reached = true;
            continue;
        }
        let Some(node) = graph.get(id) else {
            continue;
        };
        match &node.body {
            NodeBody::Step { next, .. } => {
                if let Some(n) = next {
                    stack.push(*n);
                }
            }
            NodeBody::Decision {
                when_true,
                when_false,
                ..
            } => {
                if let Some(n) = when_true {
                    stack.push(*n);
                }
                if let Some(n) = when_false {
                    stack.push(*n);
                }
            }
            NodeBody::Split { merge, .. } => {
                // A nested split's interior belongs to that split; the outer
                // branch continues from the nested merge's successor.
                if *merge == target {
                    // Ownership conflict is reported separately; the branch
                    // does reach the node.
                    reached = true;
                    continue;
                }
                if let Some(NodeBody::Merge { next, .. }) = graph.get(*merge).map(|n| &n.body)
                    && let Some(n) = next
                {
                    stack.push(*n);
                }
            }
            NodeBody::Merge { .. } => {
                // A merge other than the target belongs to some other split.
                let e = StructuralError::CrossSplitMerge {
                    merge: id,
                    from_split: split,
                };
                if !errors.contains(&e) {
                    errors.push(e);
                }
            }
        }
    }
    reached
}
