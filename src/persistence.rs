//! Serde bridge between live instances and durable snapshots.
//!
//! The live [`WorkflowInstance`] holds `Arc<dyn Activity>` handles and other
//! process-local state that cannot be serialized. This module defines the
//! mirror types that can: plain-data `Persisted*` structs that capture every
//! continuation as graph indices, plus the conversions in both directions.
//!
//! A snapshot deliberately excludes the graph itself. The graph is code; the
//! host re-registers it and [`WorkflowInstance::restore`] stitches the
//! persisted indices back onto it, rejecting any snapshot whose indices do
//! not resolve against the supplied graph.
//!
//! # Example
//!
//! ```rust,no_run
//! use filament::persistence::{JsonSerializable, PersistedInstance};
//! # fn demo(instance: &filament::instance::WorkflowInstance) -> miette::Result<()> {
//! let snapshot = PersistedInstance::from(instance);
//! let json = snapshot.to_json_string().map_err(|e| miette::miette!(e))?;
//! let back = PersistedInstance::from_json_str(&json).map_err(|e| miette::miette!(e))?;
//! assert_eq!(snapshot, back);
//! # Ok(())
//! # }
//! ```

use std::str::FromStr;
use std::sync::Arc;

use chrono::Utc;
use miette::Diagnostic;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use thiserror::Error;

use crate::bookmarks::BookmarkManager;
use crate::flow::{FlowGraph, NodeBody};
use crate::instance::WorkflowInstance;
use crate::merge::{BranchOutcome, SplitActivation};
use crate::scheduler::{WorkItem, WorkQueue};
use crate::trace::{Trace, TraceEntry};
use crate::types::{ActivationId, InstanceId, InstanceStatus, Membership, NodeId, ScopeId};
use crate::variables::{Scope, ScopeTree, VariableMap};

/// Convenience JSON helpers for every persisted model.
pub trait JsonSerializable: Serialize + DeserializeOwned {
    fn to_json_string(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    fn from_json_str(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

impl<T: Serialize + DeserializeOwned> JsonSerializable for T {}

/// Errors raised while converting between live and persisted forms.
#[derive(Debug, Error, Diagnostic)]
pub enum PersistenceError {
    #[error("serialization error: {source}")]
    #[diagnostic(code(filament::persistence::serde))]
    Serde {
        #[from]
        source: serde_json::Error,
    },

    /// The snapshot does not resolve against the supplied graph.
    #[error("invalid snapshot: {what}")]
    #[diagnostic(
        code(filament::persistence::invalid),
        help("Snapshots only restore against the exact graph they were taken from.")
    )]
    Invalid { what: String },
}

impl PersistenceError {
    pub(crate) fn invalid(what: impl Into<String>) -> Self {
        Self::Invalid { what: what.into() }
    }
}

/// One variable scope: parent index plus local bindings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedScope {
    pub parent: Option<usize>,
    pub values: VariableMap,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedMembership {
    pub activation: usize,
    pub branch: usize,
}

impl From<Membership> for PersistedMembership {
    fn from(m: Membership) -> Self {
        Self {
            activation: m.activation.index(),
            branch: m.branch,
        }
    }
}

impl From<PersistedMembership> for Membership {
    fn from(m: PersistedMembership) -> Self {
        Self {
            activation: ActivationId::new(m.activation),
            branch: m.branch,
        }
    }
}

/// One queued continuation, captured as graph/scope indices.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedWorkItem {
    pub node: usize,
    pub scope: usize,
    pub membership: Option<PersistedMembership>,
}

impl From<&WorkItem> for PersistedWorkItem {
    fn from(item: &WorkItem) -> Self {
        Self {
            node: item.node.index(),
            scope: item.scope.index(),
            membership: item.membership.map(PersistedMembership::from),
        }
    }
}

/// One split activation's bookkeeping record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedActivation {
    pub split: usize,
    pub merge: usize,
    pub origin_scope: usize,
    pub parent: Option<PersistedMembership>,
    pub outcomes: Vec<Option<BranchOutcome>>,
    pub fired: bool,
    pub closed: bool,
}

impl From<&SplitActivation> for PersistedActivation {
    fn from(a: &SplitActivation) -> Self {
        Self {
            split: a.split.index(),
            merge: a.merge.index(),
            origin_scope: a.origin_scope.index(),
            parent: a.parent.map(PersistedMembership::from),
            outcomes: a.outcomes.clone(),
            fired: a.fired,
            closed: a.closed,
        }
    }
}

/// One outstanding bookmark.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedBookmark {
    pub name: String,
    pub node: usize,
    pub scope: usize,
    pub membership: Option<PersistedMembership>,
}

/// Whole-instance snapshot: everything needed to resume an instance in a
/// fresh process, minus the graph.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedInstance {
    pub instance_id: String,
    pub status: InstanceStatus,
    pub scopes: Vec<PersistedScope>,
    pub queue: Vec<PersistedWorkItem>,
    pub activations: Vec<PersistedActivation>,
    /// Sorted by name so byte-identical state yields byte-identical
    /// snapshots.
    pub bookmarks: Vec<PersistedBookmark>,
    #[serde(default)]
    pub trace: Vec<TraceEntry>,
    /// RFC 3339 capture timestamp; informational only.
    pub saved_at: String,
}

impl From<&WorkflowInstance> for PersistedInstance {
    fn from(instance: &WorkflowInstance) -> Self {
        let scopes = instance
            .scopes
            .scopes()
            .iter()
            .map(|s| PersistedScope {
                parent: s.parent.map(ScopeId::index),
                values: s.values.clone(),
            })
            .collect();
        let mut bookmarks: Vec<PersistedBookmark> = instance
            .bookmarks
            .iter()
            .map(|bm| PersistedBookmark {
                name: bm.name.clone(),
                node: bm.node.index(),
                scope: bm.scope.index(),
                membership: bm.membership.map(PersistedMembership::from),
            })
            .collect();
        bookmarks.sort_by(|a, b| a.name.cmp(&b.name));
        Self {
            instance_id: instance.id.to_string(),
            status: instance.status,
            scopes,
            queue: instance.queue.iter().map(PersistedWorkItem::from).collect(),
            activations: instance
                .activations
                .iter()
                .map(PersistedActivation::from)
                .collect(),
            bookmarks,
            trace: instance.trace.entries().to_vec(),
            saved_at: Utc::now().to_rfc3339(),
        }
    }
}

fn check_node(graph: &FlowGraph, index: usize, what: &str) -> Result<NodeId, PersistenceError> {
    let id = NodeId::new(index);
    if graph.get(id).is_none() {
        return Err(PersistenceError::invalid(format!(
            "{what} refers to {id}, but the graph has {} nodes",
            graph.len()
        )));
    }
    Ok(id)
}

fn check_scope(count: usize, index: usize, what: &str) -> Result<ScopeId, PersistenceError> {
    if index >= count {
        return Err(PersistenceError::invalid(format!(
            "{what} refers to scope#{index}, but the snapshot has {count} scopes"
        )));
    }
    Ok(ScopeId::new(index))
}

fn check_membership(
    activations: &[PersistedActivation],
    membership: Option<PersistedMembership>,
    what: &str,
) -> Result<Option<Membership>, PersistenceError> {
    match membership {
        None => Ok(None),
        Some(m) => {
            let Some(activation) = activations.get(m.activation) else {
                return Err(PersistenceError::invalid(format!(
                    "{what} refers to activation#{}, but the snapshot has {} activations",
                    m.activation,
                    activations.len()
                )));
            };
            if m.branch >= activation.outcomes.len() {
                return Err(PersistenceError::invalid(format!(
                    "{what} refers to branch#{} of activation#{}, which has {} branches",
                    m.branch,
                    m.activation,
                    activation.outcomes.len()
                )));
            }
            Ok(Some(m.into()))
        }
    }
}

impl WorkflowInstance {
    /// Restores a snapshot against the graph it was taken from.
    ///
    /// Every index in the snapshot is bounds-checked against the supplied
    /// graph and against the snapshot's own arenas, and every bookmark must
    /// resolve to a Step node, so a snapshot taken from a different graph
    /// is rejected instead of silently resuming in the wrong place.
    pub fn restore(
        graph: Arc<FlowGraph>,
        persisted: &PersistedInstance,
    ) -> Result<Self, PersistenceError> {
        let id = InstanceId::from_str(&persisted.instance_id)
            .map_err(|e| PersistenceError::invalid(format!("instance id: {e}")))?;

        let scope_count = persisted.scopes.len();
        if scope_count == 0 {
            return Err(PersistenceError::invalid("snapshot has no root scope"));
        }
        let mut scopes = Vec::with_capacity(scope_count);
        for (index, s) in persisted.scopes.iter().enumerate() {
            let parent = match s.parent {
                None => None,
                // Scopes are allocated child-after-parent, so a valid parent
                // index is always smaller; this also rules out cycles.
                Some(p) if p < index => Some(ScopeId::new(p)),
                Some(p) => {
                    return Err(PersistenceError::invalid(format!(
                        "scope#{index} has out-of-order parent scope#{p}"
                    )));
                }
            };
            scopes.push(Scope {
                parent,
                values: s.values.clone(),
            });
        }

        let mut activations = Vec::with_capacity(persisted.activations.len());
        for (index, a) in persisted.activations.iter().enumerate() {
            let split = check_node(&graph, a.split, "activation split")?;
            let merge = check_node(&graph, a.merge, "activation merge")?;
            if !matches!(graph.node(merge).body, NodeBody::Merge { .. }) {
                return Err(PersistenceError::invalid(format!(
                    "activation#{index} merge {merge} is not a merge node"
                )));
            }
            activations.push(SplitActivation {
                split,
                merge,
                origin_scope: check_scope(scope_count, a.origin_scope, "activation")?,
                parent: check_membership(&persisted.activations, a.parent, "activation parent")?,
                outcomes: a.outcomes.clone(),
                fired: a.fired,
                closed: a.closed,
            });
        }

        let mut queue = WorkQueue::new();
        for item in &persisted.queue {
            queue.push_next(WorkItem {
                node: check_node(&graph, item.node, "work item")?,
                scope: check_scope(scope_count, item.scope, "work item")?,
                membership: check_membership(&persisted.activations, item.membership, "work item")?,
            });
        }

        let mut bookmarks = BookmarkManager::new();
        for bm in &persisted.bookmarks {
            let node = check_node(&graph, bm.node, "bookmark")?;
            if !matches!(graph.node(node).body, NodeBody::Step { .. }) {
                return Err(PersistenceError::invalid(format!(
                    "bookmark {:?} refers to {node}, which is not a step",
                    bm.name
                )));
            }
            let scope = check_scope(scope_count, bm.scope, "bookmark")?;
            let membership = check_membership(&persisted.activations, bm.membership, "bookmark")?;
            bookmarks
                .create(bm.name.clone(), node, scope, membership)
                .map_err(|_| {
                    PersistenceError::invalid(format!("duplicate bookmark {:?}", bm.name))
                })?;
        }

        Ok(Self::from_parts(
            id,
            graph,
            ScopeTree::from_scopes(scopes),
            queue,
            activations,
            bookmarks,
            Trace::from_entries(persisted.trace.clone()),
            persisted.status,
        ))
    }
}
