//! The workflow instance aggregate: one flowchart, one variable tree, one
//! queue, one trace, one status.
//!
//! A [`WorkflowInstance`] is single-threaded by construction; every host
//! operation takes `&mut self` and runs to quiescence before returning.
//! Hosts that want concurrency run many instances, not many threads inside
//! one.

use std::sync::Arc;

use serde_json::Value;

use crate::bookmarks::{BookmarkError, BookmarkManager};
use crate::flow::{FlowGraph, InvalidGraph, validate};
use crate::merge::SplitActivation;
use crate::scheduler::{RunError, WorkItem, WorkQueue};
use crate::trace::{Trace, TraceEvent};
use crate::types::{InstanceId, InstanceStatus, NodeId, ScopeId};
use crate::variables::{ScopeTree, VariableMap};

/// Where and why an instance faulted, kept for host inspection after the
/// fact.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FaultInfo {
    pub node: NodeId,
    pub label: String,
    pub message: String,
}

/// A single running (or parked) execution of a flowchart.
#[derive(Debug)]
pub struct WorkflowInstance {
    pub(crate) id: InstanceId,
    pub(crate) graph: Arc<FlowGraph>,
    pub(crate) scopes: ScopeTree,
    pub(crate) queue: WorkQueue,
    pub(crate) activations: Vec<SplitActivation>,
    pub(crate) bookmarks: BookmarkManager,
    pub(crate) trace: Trace,
    pub(crate) status: InstanceStatus,
    pub(crate) fault: Option<FaultInfo>,
}

impl WorkflowInstance {
    /// Builds a fresh instance over a validated graph, seeded with the
    /// host-supplied input variables at the root scope.
    ///
    /// Validation runs unconditionally; a flowchart with structural errors
    /// never becomes an instance.
    pub fn new(graph: Arc<FlowGraph>, input: VariableMap) -> Result<Self, InvalidGraph> {
        let errors = validate(&graph);
        if !errors.is_empty() {
            return Err(InvalidGraph { errors });
        }
        let mut queue = WorkQueue::new();
        if let Some(start) = graph.start() {
            queue.push_next(WorkItem {
                node: start,
                scope: ScopeId::ROOT,
                membership: None,
            });
        }
        Ok(Self {
            id: InstanceId::generate(),
            graph,
            scopes: ScopeTree::new(input),
            queue,
            activations: Vec::new(),
            bookmarks: BookmarkManager::new(),
            trace: Trace::new(),
            status: InstanceStatus::Running,
            fault: None,
        })
    }

    /// Restore path: assembles an instance from pre-built parts. Bounds and
    /// shape checks happen in [`crate::persistence`] before this is called.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn from_parts(
        id: InstanceId,
        graph: Arc<FlowGraph>,
        scopes: ScopeTree,
        queue: WorkQueue,
        activations: Vec<SplitActivation>,
        bookmarks: BookmarkManager,
        trace: Trace,
        status: InstanceStatus,
    ) -> Self {
        Self {
            id,
            graph,
            scopes,
            queue,
            activations,
            bookmarks,
            trace,
            status,
            fault: None,
        }
    }

    #[must_use]
    pub fn id(&self) -> InstanceId {
        self.id
    }

    #[must_use]
    pub fn status(&self) -> InstanceStatus {
        self.status
    }

    #[must_use]
    pub fn graph(&self) -> &Arc<FlowGraph> {
        &self.graph
    }

    #[must_use]
    pub fn trace(&self) -> &Trace {
        &self.trace
    }

    /// Fault metadata from the most recent failed run, if any.
    #[must_use]
    pub fn fault(&self) -> Option<&FaultInfo> {
        self.fault.as_ref()
    }

    /// Names of all outstanding bookmarks, sorted.
    #[must_use]
    pub fn bookmark_names(&self) -> Vec<String> {
        self.bookmarks.names().into_iter().map(str::to_string).collect()
    }

    /// Snapshot of the root-scope variables, for host inspection after a
    /// run.
    #[must_use]
    pub fn variables(&self) -> VariableMap {
        self.scopes.root_snapshot()
    }

    /// Runs the instance until it completes, parks on bookmarks, or faults.
    #[tracing::instrument(skip(self), fields(instance = %self.id))]
    pub async fn run(&mut self) -> Result<InstanceStatus, RunError> {
        if self.status.is_terminal() {
            return Err(RunError::NotRunnable {
                status: self.status,
            });
        }
        self.status = InstanceStatus::Running;
        self.drain().await
    }

    /// Delivers a resumption payload to the bookmark named `name` and runs
    /// the instance back to quiescence.
    ///
    /// A miss (unknown or already-consumed name) has no side effects, so a
    /// stale resume is safe to ignore and retry against another instance.
    #[tracing::instrument(skip(self, value), fields(instance = %self.id))]
    pub async fn resume(&mut self, name: &str, value: Value) -> Result<InstanceStatus, RunError> {
        match self.status {
            // A completed instance has no bookmarks by definition, so the
            // miss shape is the honest answer.
            InstanceStatus::Completed => {
                return Err(RunError::Bookmark(BookmarkError::NotFound {
                    name: name.to_string(),
                }));
            }
            InstanceStatus::Canceled | InstanceStatus::Faulted => {
                return Err(RunError::NotRunnable {
                    status: self.status,
                });
            }
            InstanceStatus::Running | InstanceStatus::Idle => {}
        }

        let bookmark = self.bookmarks.consume(name)?;
        self.status = InstanceStatus::Running;

        let graph = Arc::clone(&self.graph);
        let label = graph.label(bookmark.node);
        self.trace.push(bookmark.node, label, TraceEvent::Resumed {
            bookmark: bookmark.name.clone(),
        });

        let activity = graph
            .step_activity(bookmark.node)
            .ok_or(RunError::CorruptContinuation {
                node: bookmark.node,
            })?;
        let item = WorkItem {
            node: bookmark.node,
            scope: bookmark.scope,
            membership: bookmark.membership,
        };
        let outcome = {
            let mut ctx = crate::activity::ActivityContext::new(
                bookmark.node,
                label,
                bookmark.scope,
                &mut self.scopes,
                &mut self.trace,
            );
            activity.resume(&mut ctx, value).await
        }
        .map_err(|source| RunError::Fault {
            node: bookmark.node,
            label: label.to_string(),
            source,
        });
        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(error) => {
                self.record_failure(&error);
                return Err(error);
            }
        };
        let next = graph.step_next(bookmark.node);
        if let Err(error) = self.settle_step(item, next, outcome) {
            self.record_failure(&error);
            return Err(error);
        }
        self.drain().await
    }

    /// Cancels the whole instance: queued work and bookmarks get their
    /// cancellation paths, then the instance becomes `Canceled`.
    ///
    /// Canceling a terminal instance is a no-op.
    #[tracing::instrument(skip(self), fields(instance = %self.id))]
    pub async fn cancel(&mut self) -> Result<(), RunError> {
        if self.status.is_terminal() {
            return Ok(());
        }
        self.cancel_all().await;
        self.status = InstanceStatus::Canceled;
        Ok(())
    }
}
