//! The cooperative scheduler: one work queue, one logical thread per
//! instance.
//!
//! The scheduler maintains a queue of ready continuations and drains it one
//! item at a time, executing each to completion or to an explicit suspend.
//! Two insertion disciplines give the engine its load-bearing ordering
//! guarantee:
//!
//! - a Split pushes its branch starts onto the **front** of the queue in
//!   declaration order (LIFO), so sibling branches begin executing in
//!   reverse declaration order;
//! - completed nodes push their successor onto the **back**, so sibling
//!   branches interleave one step at a time instead of running to
//!   completion depth-first.
//!
//! When the queue empties, the instance is `Idle` if bookmarks remain
//! outstanding and `Completed` otherwise. A fault anywhere aborts the whole
//! instance; nothing is swallowed locally.
//!
//! This module holds the queue types and the engine half of
//! [`WorkflowInstance`]; the aggregate itself lives in
//! [`crate::instance`].

use std::collections::VecDeque;
use std::sync::Arc;

use miette::Diagnostic;
use thiserror::Error;

use crate::activity::{ActivityContext, ActivityError, Outcome};
use crate::bookmarks::BookmarkError;
use crate::flow::{MergeBehavior, NodeBody};
use crate::instance::{FaultInfo, WorkflowInstance};
use crate::merge::{BranchOutcome, MergeDecision, SplitActivation, membership_is_under};
use crate::trace::TraceEvent;
use crate::types::{ActivationId, InstanceStatus, Membership, NodeId, ScopeId};
use crate::variables::VariableView;

/// One ready continuation: a node identity plus the execution context it
/// runs in. Owned by the work queue; destroyed on completion, suspension,
/// or cancellation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WorkItem {
    pub node: NodeId,
    pub scope: ScopeId,
    pub membership: Option<Membership>,
}

/// The instance's queue of ready continuations.
///
/// See the module docs for the two insertion disciplines.
#[derive(Clone, Debug, Default)]
pub struct WorkQueue {
    items: VecDeque<WorkItem>,
}

impl WorkQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Branch starts jump the queue (LIFO front insertion).
    pub fn push_branch(&mut self, item: WorkItem) {
        self.items.push_front(item);
    }

    /// Successors line up behind existing work (FIFO back insertion).
    pub fn push_next(&mut self, item: WorkItem) {
        self.items.push_back(item);
    }

    pub fn pop(&mut self) -> Option<WorkItem> {
        self.items.pop_front()
    }

    /// Removes and returns the entire queue in order, used by cancellation
    /// to partition items without aliasing the instance.
    pub fn take_all(&mut self) -> VecDeque<WorkItem> {
        std::mem::take(&mut self.items)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &WorkItem> {
        self.items.iter()
    }
}

/// Errors surfaced by running, resuming, or canceling an instance.
#[derive(Debug, Error, Diagnostic)]
pub enum RunError {
    /// An activity body (or decision predicate) faulted; instance-fatal.
    #[error("activity fault at {node} ({label}): {source}")]
    #[diagnostic(
        code(filament::scheduler::fault),
        help("The instance transitioned to Faulted; inspect WorkflowInstance::fault.")
    )]
    Fault {
        node: NodeId,
        label: String,
        #[source]
        source: ActivityError,
    },

    /// An activity suspended under a name already pending in the instance;
    /// instance-fatal, attributed to the suspending node.
    #[error("duplicate bookmark {name:?} registered at {node}")]
    #[diagnostic(code(filament::scheduler::duplicate_bookmark))]
    DuplicateBookmark { node: NodeId, name: String },

    /// Bookmark protocol error on a host operation (stale resume).
    #[error(transparent)]
    #[diagnostic(code(filament::scheduler::bookmark))]
    Bookmark(#[from] BookmarkError),

    /// The operation is not valid for the instance's current status.
    #[error("instance is {status} and cannot run")]
    #[diagnostic(code(filament::scheduler::not_runnable))]
    NotRunnable { status: InstanceStatus },

    /// A persisted continuation resolved to a node that cannot host it.
    #[error("continuation at {node} does not resolve to a step activity")]
    #[diagnostic(
        code(filament::scheduler::corrupt_continuation),
        help("The snapshot was restored against a different graph than it was built from.")
    )]
    CorruptContinuation { node: NodeId },
}

// Engine half of WorkflowInstance: the drain loop and everything it calls.
impl WorkflowInstance {
    /// Drains the work queue, transitioning to Idle or Completed when it
    /// empties, or Faulted when an item errors.
    pub(crate) async fn drain(&mut self) -> Result<InstanceStatus, RunError> {
        while let Some(item) = self.queue.pop() {
            tracing::trace!(node = %item.node, scope = %item.scope, "executing continuation");
            if let Err(error) = self.execute_item(item).await {
                self.record_failure(&error);
                return Err(error);
            }
        }
        self.status = if self.bookmarks.is_empty() {
            InstanceStatus::Completed
        } else {
            InstanceStatus::Idle
        };
        tracing::debug!(status = %self.status, bookmarks = self.bookmarks.len(), "queue drained");
        Ok(self.status)
    }

    /// Records fault metadata for host inspection and flips the status.
    pub(crate) fn record_failure(&mut self, error: &RunError) {
        self.status = InstanceStatus::Faulted;
        self.fault = match error {
            RunError::Fault {
                node,
                label,
                source,
            } => Some(FaultInfo {
                node: *node,
                label: label.clone(),
                message: source.to_string(),
            }),
            RunError::DuplicateBookmark { node, name } => Some(FaultInfo {
                node: *node,
                label: self.graph.label(*node).to_string(),
                message: format!("duplicate bookmark {name:?}"),
            }),
            RunError::CorruptContinuation { node } => Some(FaultInfo {
                node: *node,
                label: self.graph.label(*node).to_string(),
                message: "corrupt continuation".to_string(),
            }),
            RunError::Bookmark(_) | RunError::NotRunnable { .. } => None,
        };
    }

    /// Executes one continuation to completion or suspension.
    async fn execute_item(&mut self, item: WorkItem) -> Result<(), RunError> {
        let graph = Arc::clone(&self.graph);
        let node = graph.node(item.node);
        match &node.body {
            NodeBody::Step { activity, next } => {
                self.trace.push(item.node, &node.label, TraceEvent::Started);
                let outcome = {
                    let mut ctx = ActivityContext::new(
                        item.node,
                        &node.label,
                        item.scope,
                        &mut self.scopes,
                        &mut self.trace,
                    );
                    activity.execute(&mut ctx).await
                }
                .map_err(|source| RunError::Fault {
                    node: item.node,
                    label: node.label.clone(),
                    source,
                })?;
                self.settle_step(item, *next, outcome)
            }
            NodeBody::Decision {
                predicate,
                when_true,
                when_false,
            } => {
                let branch = {
                    let view = VariableView::new(&self.scopes, item.scope);
                    predicate(&view)
                }
                .map_err(|source| RunError::Fault {
                    node: item.node,
                    label: node.label.clone(),
                    source,
                })?;
                self.trace
                    .push(item.node, &node.label, TraceEvent::Decided { branch });
                let target = if branch { *when_true } else { *when_false };
                if let Some(next) = target {
                    self.queue.push_next(WorkItem { node: next, ..item });
                } else if item.membership.is_some() {
                    tracing::warn!(node = %item.node, "decision dead-ends inside a branch");
                }
                Ok(())
            }
            NodeBody::Split { branches, merge } => {
                let activation = ActivationId::new(self.activations.len());
                self.activations.push(SplitActivation::new(
                    item.node,
                    *merge,
                    branches.len(),
                    item.scope,
                    item.membership,
                ));
                tracing::debug!(
                    split = %item.node,
                    %activation,
                    branches = branches.len(),
                    "split activated"
                );
                // Declaration-order LIFO insertion: branches begin in
                // reverse declaration order, one step at a time.
                for (index, branch) in branches.iter().enumerate() {
                    let scope = self.scopes.child(item.scope);
                    self.queue.push_branch(WorkItem {
                        node: branch.start,
                        scope,
                        membership: Some(Membership {
                            activation,
                            branch: index,
                        }),
                    });
                }
                Ok(())
            }
            NodeBody::Merge { next, .. } => match item.membership {
                Some(membership) => {
                    self.branch_arrived(membership, BranchOutcome::Completed)
                        .await
                }
                None => {
                    // Only reachable when the caller skipped validation.
                    tracing::warn!(node = %item.node, "merge reached outside any split; passing through");
                    if let Some(next) = next {
                        self.queue.push_next(WorkItem { node: *next, ..item });
                    }
                    Ok(())
                }
            },
        }
    }

    /// Applies a Step/resume outcome: schedule the successor or park a
    /// bookmark.
    pub(crate) fn settle_step(
        &mut self,
        item: WorkItem,
        next: Option<NodeId>,
        outcome: Outcome,
    ) -> Result<(), RunError> {
        let graph = Arc::clone(&self.graph);
        let label = &graph.node(item.node).label;
        match outcome {
            Outcome::Completed => {
                self.trace.push(item.node, label, TraceEvent::Completed);
                if let Some(next) = next {
                    self.queue.push_next(WorkItem { node: next, ..item });
                } else if item.membership.is_some() {
                    tracing::warn!(node = %item.node, "step dead-ends inside a branch");
                }
                Ok(())
            }
            Outcome::Suspend { bookmark } => {
                self.bookmarks
                    .create(bookmark.clone(), item.node, item.scope, item.membership)
                    .map_err(|_| RunError::DuplicateBookmark {
                        node: item.node,
                        name: bookmark.clone(),
                    })?;
                self.trace
                    .push(item.node, label, TraceEvent::Suspended { bookmark });
                Ok(())
            }
        }
    }

    /// Handles a branch reporting its outcome to its activation's merge.
    ///
    /// Under `First`, the first completed arrival requests cancellation of
    /// every unreported sibling; the merge successor is scheduled only once
    /// all of them have acknowledged.
    async fn branch_arrived(
        &mut self,
        membership: Membership,
        outcome: BranchOutcome,
    ) -> Result<(), RunError> {
        let graph = Arc::clone(&self.graph);
        let activation = membership.activation;
        let merge_id = self.activations[activation.index()].merge;
        let (behavior, merge_next) = match &graph.node(merge_id).body {
            NodeBody::Merge { behavior, next } => (*behavior, *next),
            // Validation guarantees the activation's merge is a Merge.
            other => {
                tracing::error!(merge = %merge_id, kind = other.kind(), "activation merge is not a merge node");
                return Err(RunError::CorruptContinuation {
                    node: self.activations[activation.index()].split,
                });
            }
        };

        let first_completion = self.activations[activation.index()].is_first_completion()
            && outcome == BranchOutcome::Completed;
        let mut decision =
            self.activations[activation.index()].on_branch_arrive(membership.branch, outcome);

        if behavior == MergeBehavior::First
            && first_completion
            && decision == MergeDecision::Wait
        {
            let pending = self.activations[activation.index()].unreported();
            tracing::debug!(
                merge = %merge_id,
                winner = membership.branch,
                siblings = pending.len(),
                "first merge won; canceling siblings"
            );
            for branch in pending {
                if self.cancel_branch(activation, branch).await == MergeDecision::Fire {
                    decision = MergeDecision::Fire;
                }
            }
        }

        if decision == MergeDecision::Fire {
            self.trace
                .push(merge_id, graph.label(merge_id), TraceEvent::MergeFired);
            let act = &self.activations[activation.index()];
            if let Some(next) = merge_next {
                self.queue.push_next(WorkItem {
                    node: next,
                    scope: act.origin_scope,
                    membership: act.parent,
                });
            } else if act.parent.is_some() {
                tracing::warn!(merge = %merge_id, "merge dead-ends inside an outer branch");
            }
        }
        Ok(())
    }

    /// Cooperatively cancels one branch of an activation: removes its queued
    /// work, drops its bookmarks, runs cancellation paths, closes nested
    /// activations, and records the Canceled acknowledgment.
    async fn cancel_branch(&mut self, activation: ActivationId, branch: usize) -> MergeDecision {
        let target = Membership { activation, branch };
        let graph = Arc::clone(&self.graph);
        tracing::debug!(%target, "canceling branch");

        // Queued items under the target branch, preserving queue order for
        // the survivors.
        let items = self.queue.take_all();
        let mut doomed = Vec::new();
        for item in items {
            if membership_is_under(&self.activations, item.membership, target) {
                doomed.push(item);
            } else {
                self.queue.push_next(item);
            }
        }
        for item in doomed {
            let label = &graph.node(item.node).label;
            if let Some(activity) = graph.step_activity(item.node) {
                let mut ctx = ActivityContext::new(
                    item.node,
                    label,
                    item.scope,
                    &mut self.scopes,
                    &mut self.trace,
                );
                activity.on_cancel(&mut ctx).await;
            }
            self.trace
                .push(item.node, label, TraceEvent::Canceled { bookmark: None });
        }

        // Outstanding bookmarks under the target branch are dropped without
        // firing; the suspended activity gets its cancellation path.
        let marks = {
            let activations = &self.activations;
            self.bookmarks
                .remove_where(|bm| membership_is_under(activations, bm.membership, target))
        };
        for bm in marks {
            let label = &graph.node(bm.node).label;
            if let Some(activity) = graph.step_activity(bm.node) {
                let mut ctx = ActivityContext::new(
                    bm.node,
                    label,
                    bm.scope,
                    &mut self.scopes,
                    &mut self.trace,
                );
                activity.on_cancel(&mut ctx).await;
            }
            self.trace.push(bm.node, label, TraceEvent::Canceled {
                bookmark: Some(bm.name),
            });
        }

        // Nested activations under the canceled branch never fire.
        let to_close: Vec<usize> = self
            .activations
            .iter()
            .enumerate()
            .filter(|(_, a)| {
                !a.closed && !a.fired && membership_is_under(&self.activations, a.parent, target)
            })
            .map(|(i, _)| i)
            .collect();
        for index in to_close {
            self.activations[index].closed = true;
        }

        self.activations[activation.index()].on_branch_arrive(branch, BranchOutcome::Canceled)
    }

    /// Instance-wide cancellation: every queued item and bookmark gets its
    /// cancellation path, every unfired activation closes.
    pub(crate) async fn cancel_all(&mut self) {
        let graph = Arc::clone(&self.graph);
        let items = self.queue.take_all();
        for item in items {
            let label = &graph.node(item.node).label;
            if let Some(activity) = graph.step_activity(item.node) {
                let mut ctx = ActivityContext::new(
                    item.node,
                    label,
                    item.scope,
                    &mut self.scopes,
                    &mut self.trace,
                );
                activity.on_cancel(&mut ctx).await;
            }
            self.trace
                .push(item.node, label, TraceEvent::Canceled { bookmark: None });
        }
        let marks = self.bookmarks.remove_where(|_| true);
        for bm in marks {
            let label = &graph.node(bm.node).label;
            if let Some(activity) = graph.step_activity(bm.node) {
                let mut ctx = ActivityContext::new(
                    bm.node,
                    label,
                    bm.scope,
                    &mut self.scopes,
                    &mut self.trace,
                );
                activity.on_cancel(&mut ctx).await;
            }
            self.trace.push(bm.node, label, TraceEvent::Canceled {
                bookmark: Some(bm.name),
            });
        }
        for act in &mut self.activations {
            if !act.fired {
                act.closed = true;
            }
        }
    }
}
