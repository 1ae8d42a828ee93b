//! The flow graph model: typed node variants and their connection rules.
//!
//! A [`FlowGraph`] is an arena of [`FlowNode`]s addressed by stable
//! [`NodeId`] indices. Ownership edges (Split → branches, Split → Merge,
//! successor pointers) are index fields, never back-pointers, so the graph
//! itself carries everything a snapshot needs to re-resolve continuation
//! state after a restore.
//!
//! The variant set is closed: the scheduler switches exhaustively on
//! [`NodeBody`] rather than virtual-dispatching an execute method, which
//! keeps the state machine auditable and easy to test.

use std::fmt;
use std::sync::Arc;

use crate::activity::{Activity, ActivityError};
use crate::types::NodeId;
use crate::variables::VariableView;

/// Completion policy of a Merge node.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MergeBehavior {
    /// Fire only once every branch of the owning Split has reported an
    /// outcome (Completed or Canceled).
    WaitAll,
    /// Fire on the first completed branch; cancellation is requested on all
    /// siblings and the merge successor waits for every acknowledgment.
    First,
}

impl fmt::Display for MergeBehavior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WaitAll => write!(f, "wait-all"),
            Self::First => write!(f, "first"),
        }
    }
}

/// Boolean condition evaluated by a Decision node.
///
/// Evaluation is synchronous and read-only; an `Err` is equivalent to the
/// evaluating branch faulting.
///
/// # Examples
///
/// ```rust
/// use std::sync::Arc;
/// use filament::flow::DecisionPredicate;
///
/// let retry_needed: DecisionPredicate = Arc::new(|vars| {
///     Ok(vars.get_i64("attempts").unwrap_or(0) < 3)
/// });
/// ```
pub type DecisionPredicate =
    Arc<dyn Fn(&VariableView<'_>) -> Result<bool, ActivityError> + Send + Sync + 'static>;

/// One parallel arm of a Split, identified by its position in the Split's
/// branch list and holding the arm's start node.
///
/// Branches belong to exactly one Split and are never shared.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Branch {
    pub start: NodeId,
}

/// The behavior variant of a node.
pub enum NodeBody {
    /// Wraps one activity body and a single successor pointer.
    Step {
        activity: Arc<dyn Activity>,
        next: Option<NodeId>,
    },
    /// Fan-out: an ordered list of branches and exactly one owned Merge.
    Split { branches: Vec<Branch>, merge: NodeId },
    /// Join point with a pluggable completion policy and one successor.
    /// The owning Split is derived from the graph, not stored here.
    Merge {
        behavior: MergeBehavior,
        next: Option<NodeId>,
    },
    /// Boolean-valued condition with true/false successor pointers.
    /// Cycles are legal only through Decision back-edges.
    Decision {
        predicate: DecisionPredicate,
        when_true: Option<NodeId>,
        when_false: Option<NodeId>,
    },
}

impl NodeBody {
    /// Short variant name for diagnostics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Step { .. } => "step",
            Self::Split { .. } => "split",
            Self::Merge { .. } => "merge",
            Self::Decision { .. } => "decision",
        }
    }
}

impl fmt::Debug for NodeBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Step { next, .. } => f.debug_struct("Step").field("next", next).finish(),
            Self::Split { branches, merge } => f
                .debug_struct("Split")
                .field("branches", branches)
                .field("merge", merge)
                .finish(),
            Self::Merge { behavior, next } => f
                .debug_struct("Merge")
                .field("behavior", behavior)
                .field("next", next)
                .finish(),
            Self::Decision {
                when_true,
                when_false,
                ..
            } => f
                .debug_struct("Decision")
                .field("when_true", when_true)
                .field("when_false", when_false)
                .finish(),
        }
    }
}

/// A node: stable identity, human-readable label, and behavior variant.
#[derive(Debug)]
pub struct FlowNode {
    pub id: NodeId,
    pub label: String,
    pub body: NodeBody,
}

/// An immutable activity graph, built once by
/// [`FlowBuilder`](crate::flow::FlowBuilder) and shared across instances
/// behind an `Arc`.
#[derive(Debug, Default)]
pub struct FlowGraph {
    nodes: Vec<FlowNode>,
    start: Option<NodeId>,
}

impl FlowGraph {
    pub(crate) fn from_parts(nodes: Vec<FlowNode>, start: Option<NodeId>) -> Self {
        Self { nodes, start }
    }

    /// The entry node, if one was declared.
    #[must_use]
    pub fn start(&self) -> Option<NodeId> {
        self.start
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// The node at `id`.
    ///
    /// # Panics
    ///
    /// Panics if `id` was not issued by this graph's builder; use
    /// [`get`](Self::get) for ids of unknown provenance.
    #[must_use]
    pub fn node(&self, id: NodeId) -> &FlowNode {
        &self.nodes[id.index()]
    }

    #[must_use]
    pub fn get(&self, id: NodeId) -> Option<&FlowNode> {
        self.nodes.get(id.index())
    }

    pub fn iter(&self) -> impl Iterator<Item = &FlowNode> {
        self.nodes.iter()
    }

    /// Label of `id`, or a placeholder for out-of-range ids.
    #[must_use]
    pub fn label(&self, id: NodeId) -> &str {
        self.get(id).map_or("<unknown>", |n| n.label.as_str())
    }

    /// The Split that owns `merge`, when exactly one does.
    ///
    /// Validation rejects graphs where this is ambiguous; at run time the
    /// scheduler relies on activations instead of recomputing ownership.
    #[must_use]
    pub fn merge_owner(&self, merge: NodeId) -> Option<NodeId> {
        let mut owner = None;
        for node in &self.nodes {
            if let NodeBody::Split { merge: m, .. } = &node.body
                && *m == merge
            {
                if owner.is_some() {
                    return None;
                }
                owner = Some(node.id);
            }
        }
        owner
    }

    /// The activity of a Step node, if `id` names one.
    #[must_use]
    pub(crate) fn step_activity(&self, id: NodeId) -> Option<Arc<dyn Activity>> {
        match &self.get(id)?.body {
            NodeBody::Step { activity, .. } => Some(Arc::clone(activity)),
            _ => None,
        }
    }

    /// The successor of a Step node, if `id` names one.
    #[must_use]
    pub(crate) fn step_next(&self, id: NodeId) -> Option<NodeId> {
        match &self.get(id)?.body {
            NodeBody::Step { next, .. } => *next,
            _ => None,
        }
    }
}
