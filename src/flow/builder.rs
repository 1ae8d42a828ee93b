//! FlowBuilder: constructing activity graphs node by node.
//!
//! Because Splits reference their Merge and successors are often declared
//! before their targets exist, the builder hands out [`NodeId`]s as nodes
//! are added and lets edges be wired afterwards. Misuse (connecting out of
//! a node kind that has no such pointer) is ignored with a warning rather
//! than panicking; structural soundness is the validator's job.

use std::sync::Arc;

use crate::activity::Activity;
use crate::types::NodeId;

use super::node::{Branch, DecisionPredicate, FlowGraph, FlowNode, MergeBehavior, NodeBody};

/// Builder for [`FlowGraph`]s.
///
/// # Examples
///
/// ```rust
/// use filament::flow::{FlowBuilder, MergeBehavior};
/// # use async_trait::async_trait;
/// # use filament::activity::{Activity, ActivityContext, ActivityError, Outcome};
/// # struct Work;
/// # #[async_trait]
/// # impl Activity for Work {
/// #     async fn execute(&self, _: &mut ActivityContext<'_>) -> Result<Outcome, ActivityError> {
/// #         Ok(Outcome::Completed)
/// #     }
/// # }
///
/// let mut b = FlowBuilder::new();
/// let a = b.step("a", Work);
/// let c = b.step("c", Work);
/// let merge = b.merge("join", MergeBehavior::WaitAll);
/// let split = b.split("fan-out", [a, c], merge);
/// let done = b.step("done", Work);
///
/// b.connect(a, merge);
/// b.connect(c, merge);
/// b.connect(merge, done);
/// b.start(split);
///
/// let graph = b.build();
/// assert_eq!(graph.len(), 5);
/// ```
#[derive(Default)]
pub struct FlowBuilder {
    nodes: Vec<FlowNode>,
    start: Option<NodeId>,
}

impl FlowBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, label: impl Into<String>, body: NodeBody) -> NodeId {
        let id = NodeId::new(self.nodes.len());
        self.nodes.push(FlowNode {
            id,
            label: label.into(),
            body,
        });
        id
    }

    /// Adds a Step wrapping `activity`. Successor unset until
    /// [`connect`](Self::connect) is called.
    pub fn step(&mut self, label: impl Into<String>, activity: impl Activity + 'static) -> NodeId {
        self.push(
            label,
            NodeBody::Step {
                activity: Arc::new(activity),
                next: None,
            },
        )
    }

    /// Adds a Split over `branches` (declaration order preserved) owning
    /// `merge` as its join point.
    pub fn split(
        &mut self,
        label: impl Into<String>,
        branches: impl IntoIterator<Item = NodeId>,
        merge: NodeId,
    ) -> NodeId {
        let branches = branches
            .into_iter()
            .map(|start| Branch { start })
            .collect::<Vec<_>>();
        self.push(label, NodeBody::Split { branches, merge })
    }

    /// Adds a Merge with the given completion policy.
    pub fn merge(&mut self, label: impl Into<String>, behavior: MergeBehavior) -> NodeId {
        self.push(label, NodeBody::Merge {
            behavior,
            next: None,
        })
    }

    /// Adds a Decision evaluating `predicate`.
    pub fn decision(&mut self, label: impl Into<String>, predicate: DecisionPredicate) -> NodeId {
        self.push(label, NodeBody::Decision {
            predicate,
            when_true: None,
            when_false: None,
        })
    }

    /// Sets the successor pointer of a Step or Merge.
    ///
    /// Splits route through their branches and Decisions through
    /// [`connect_true`](Self::connect_true)/[`connect_false`](Self::connect_false);
    /// connecting out of either is ignored with a warning.
    pub fn connect(&mut self, from: NodeId, to: NodeId) {
        match &mut self.nodes[from.index()].body {
            NodeBody::Step { next, .. } | NodeBody::Merge { next, .. } => *next = Some(to),
            body => {
                tracing::warn!(
                    from = %from,
                    kind = body.kind(),
                    "cannot set a plain successor on this node kind; ignoring"
                );
            }
        }
    }

    /// Sets the true-successor of a Decision.
    pub fn connect_true(&mut self, decision: NodeId, to: NodeId) {
        match &mut self.nodes[decision.index()].body {
            NodeBody::Decision { when_true, .. } => *when_true = Some(to),
            body => {
                tracing::warn!(
                    from = %decision,
                    kind = body.kind(),
                    "connect_true on a non-decision node; ignoring"
                );
            }
        }
    }

    /// Sets the false-successor of a Decision.
    pub fn connect_false(&mut self, decision: NodeId, to: NodeId) {
        match &mut self.nodes[decision.index()].body {
            NodeBody::Decision { when_false, .. } => *when_false = Some(to),
            body => {
                tracing::warn!(
                    from = %decision,
                    kind = body.kind(),
                    "connect_false on a non-decision node; ignoring"
                );
            }
        }
    }

    /// Declares the entry node.
    pub fn start(&mut self, id: NodeId) {
        self.start = Some(id);
    }

    /// Finalizes the graph. Structural soundness is checked separately by
    /// [`validate`](crate::flow::validate).
    #[must_use]
    pub fn build(self) -> FlowGraph {
        FlowGraph::from_parts(self.nodes, self.start)
    }
}
