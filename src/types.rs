//! Core identity types for the filament workflow engine.
//!
//! Everything the engine needs to name is addressed by one of the handles in
//! this module. Graph entities use stable arena indices ([`NodeId`],
//! [`ScopeId`], [`ActivationId`]) so that continuation state can be
//! serialized and restored without process-local pointers; host-level
//! entities use UUIDs ([`InstanceId`], [`OwnerId`]).
//!
//! # Examples
//!
//! ```rust
//! use filament::types::{InstanceId, InstanceStatus, NodeId};
//!
//! let node = NodeId::new(3);
//! assert_eq!(node.to_string(), "node#3");
//!
//! let id = InstanceId::generate();
//! assert_eq!(id, id.to_string().parse().unwrap());
//!
//! assert!(InstanceStatus::Completed.is_terminal());
//! assert!(!InstanceStatus::Idle.is_terminal());
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Stable identity of a node within a [`FlowGraph`](crate::flow::FlowGraph).
///
/// Node ids are arena indices assigned by the builder in insertion order.
/// They are the resumption key for everything the engine persists: work
/// items, bookmarks, and split activations all refer to nodes by `NodeId`,
/// never by pointer, so a snapshot restored into the same graph resolves
/// to the same nodes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(usize);

impl NodeId {
    #[must_use]
    pub fn new(index: usize) -> Self {
        Self(index)
    }

    /// Arena index of this node within its graph.
    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node#{}", self.0)
    }
}

/// Identity of a variable scope within an instance's scope tree.
///
/// Scope 0 is always the root scope seeded from the run input.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScopeId(usize);

impl ScopeId {
    /// The root scope of every instance.
    pub const ROOT: ScopeId = ScopeId(0);

    #[must_use]
    pub fn new(index: usize) -> Self {
        Self(index)
    }

    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "scope#{}", self.0)
    }
}

/// Identity of one activation of a Split node.
///
/// A Decision loop may drive execution through the same Split node more than
/// once; each pass gets a fresh activation so the "a Merge never fires twice
/// per activation" invariant is checkable. Activations are appended to an
/// arena and never removed, so the id is a stable index.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActivationId(usize);

impl ActivationId {
    #[must_use]
    pub fn new(index: usize) -> Self {
        Self(index)
    }

    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for ActivationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "activation#{}", self.0)
    }
}

/// Position of a continuation inside the branch structure of an instance:
/// which split activation it runs under, and which branch of that split.
///
/// Work items and bookmarks at the top level (outside any Split) carry no
/// membership. Nested splits chain through
/// [`SplitActivation::parent`](crate::merge::SplitActivation), so a single
/// innermost membership is enough to locate any continuation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Membership {
    pub activation: ActivationId,
    pub branch: usize,
}

impl fmt::Display for Membership {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/branch#{}", self.activation, self.branch)
    }
}

/// Lifecycle status of a workflow instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InstanceStatus {
    /// The scheduler is draining the work queue.
    Running,
    /// No continuation is ready but bookmarks remain outstanding; control
    /// has returned to the host, which may persist the instance.
    Idle,
    /// The work queue drained with no outstanding bookmarks.
    Completed,
    /// The host canceled the instance; no error is exposed.
    Canceled,
    /// An activity fault aborted the instance; the triggering error and node
    /// identity are exposed via [`WorkflowInstance::fault`](crate::instance::WorkflowInstance::fault).
    Faulted,
}

impl InstanceStatus {
    /// Terminal statuses admit no further execution.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Canceled | Self::Faulted)
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Running => "running",
            Self::Idle => "idle",
            Self::Completed => "completed",
            Self::Canceled => "canceled",
            Self::Faulted => "faulted",
        };
        write!(f, "{s}")
    }
}

/// Identity of a workflow instance, unique across hosts and stores.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstanceId(Uuid);

impl InstanceId {
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    #[must_use]
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for InstanceId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Logical owner handle registered with an instance store.
///
/// Stores grant exclusive instance locks to owners; a host holds exactly one
/// owner id for its lifetime.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OwnerId(Uuid);

impl OwnerId {
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    #[must_use]
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for OwnerId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}
