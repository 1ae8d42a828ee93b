//! Activity execution framework: the unit of work wrapped by a Step node.
//!
//! This module provides the [`Activity`] trait, the [`ActivityContext`]
//! handed to activity bodies, the [`Outcome`] an activity reports back to
//! the scheduler, and the fault taxonomy ([`ActivityError`]).
//!
//! # Suspension model
//!
//! An activity never blocks waiting for an external event. To wait, it
//! returns [`Outcome::Suspend`] naming a bookmark; the scheduler registers
//! the bookmark and parks the continuation. When the host later resumes the
//! bookmark with a payload, the engine calls [`Activity::resume`] on the
//! same node. Because suspension is an explicit returned request rather than
//! a held coroutine frame, the parked continuation is trivially
//! serializable.
//!
//! # Error handling
//!
//! Returning `Err(ActivityError)` is instance-fatal: the fault propagates up
//! through the scheduler, the instance transitions to `Faulted`, and the
//! host receives the original error together with the faulting node's
//! identity. Recoverable conditions should be written into variables or the
//! trace instead.

use async_trait::async_trait;
use miette::Diagnostic;
use serde_json::Value;
use thiserror::Error;

use crate::trace::{Trace, TraceEvent};
use crate::types::{NodeId, ScopeId};
use crate::variables::ScopeTree;

/// What a Step activity reports back to the scheduler.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// The activity finished; the scheduler moves on to the node's successor.
    Completed,
    /// Park this continuation until the named bookmark is resumed.
    ///
    /// The name must be unique within the instance; a duplicate faults the
    /// instance with [`BookmarkError::Duplicate`](crate::bookmarks::BookmarkError).
    Suspend { bookmark: String },
}

impl Outcome {
    /// Convenience constructor for [`Outcome::Suspend`].
    #[must_use]
    pub fn suspend(bookmark: impl Into<String>) -> Self {
        Self::Suspend {
            bookmark: bookmark.into(),
        }
    }
}

/// Executable behavior wrapped by a Step node.
///
/// Implementations must be stateless across invocations: all durable state
/// belongs in the variable scopes, which the engine persists. The three
/// methods map onto the three ways a continuation at a node can be driven:
/// initial execution, resumption with an external payload, and cooperative
/// cancellation.
///
/// # Examples
///
/// ```rust
/// use async_trait::async_trait;
/// use filament::activity::{Activity, ActivityContext, ActivityError, Outcome};
/// use serde_json::Value;
///
/// /// Waits for an external approval signal, then records the verdict.
/// struct AwaitApproval;
///
/// #[async_trait]
/// impl Activity for AwaitApproval {
///     async fn execute(
///         &self,
///         _ctx: &mut ActivityContext<'_>,
///     ) -> Result<Outcome, ActivityError> {
///         Ok(Outcome::suspend("approval"))
///     }
///
///     async fn resume(
///         &self,
///         ctx: &mut ActivityContext<'_>,
///         value: Value,
///     ) -> Result<Outcome, ActivityError> {
///         ctx.set("verdict", value);
///         Ok(Outcome::Completed)
///     }
/// }
/// ```
#[async_trait]
pub trait Activity: Send + Sync {
    /// Execute this activity. Runs to completion or to an explicit suspend;
    /// this is the only place an instance may yield control to the host.
    async fn execute(&self, ctx: &mut ActivityContext<'_>) -> Result<Outcome, ActivityError>;

    /// Continue after one of this activity's bookmarks is resumed.
    ///
    /// `value` is the host-supplied payload. The default implementation
    /// completes immediately, which suits pure wait-style activities.
    async fn resume(
        &self,
        ctx: &mut ActivityContext<'_>,
        value: Value,
    ) -> Result<Outcome, ActivityError> {
        let _ = (ctx, value);
        Ok(Outcome::Completed)
    }

    /// Cancellation path, invoked when a sibling branch wins a First merge
    /// or the host cancels the instance. Cancellation is advisory and
    /// cooperative; the default does nothing.
    async fn on_cancel(&self, ctx: &mut ActivityContext<'_>) {
        let _ = ctx;
    }
}

/// Execution context passed to an activity for the duration of one call.
///
/// Borrows the instance's scope tree and trace; all mutation happens on the
/// scheduler's own turn, so no synchronization is involved.
pub struct ActivityContext<'a> {
    node: NodeId,
    label: &'a str,
    scope: ScopeId,
    scopes: &'a mut ScopeTree,
    trace: &'a mut Trace,
}

impl<'a> ActivityContext<'a> {
    pub(crate) fn new(
        node: NodeId,
        label: &'a str,
        scope: ScopeId,
        scopes: &'a mut ScopeTree,
        trace: &'a mut Trace,
    ) -> Self {
        Self {
            node,
            label,
            scope,
            scopes,
            trace,
        }
    }

    /// Identity of the node this activity is executing as.
    #[must_use]
    pub fn node(&self) -> NodeId {
        self.node
    }

    /// Label of the node, for diagnostics.
    #[must_use]
    pub fn label(&self) -> &str {
        self.label
    }

    /// Reads a variable, resolving up the scope chain.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.scopes.get(self.scope, name)
    }

    /// Writes a variable, assigning to the nearest scope that binds it.
    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        self.scopes.set(self.scope, name, value);
    }

    /// Defines a variable in the current branch scope only.
    pub fn set_local(&mut self, name: impl Into<String>, value: Value) {
        self.scopes.set_local(self.scope, name, value);
    }

    /// Appends a note to the instance trace, attributed to this node.
    pub fn note(&mut self, message: impl Into<String>) {
        self.trace.push(
            self.node,
            self.label,
            TraceEvent::Note {
                message: message.into(),
            },
        );
    }
}

/// Fatal errors raised by activity bodies.
///
/// Any of these aborts the whole instance; see the module docs.
#[derive(Debug, Error, Diagnostic)]
pub enum ActivityError {
    /// A variable the activity depends on is not bound in scope.
    #[error("missing expected variable: {name}")]
    #[diagnostic(
        code(filament::activity::missing_variable),
        help("Check that an upstream step or the run input binds this name.")
    )]
    MissingVariable { name: String },

    /// JSON payload serialization/deserialization error.
    #[error(transparent)]
    #[diagnostic(code(filament::activity::serde_json))]
    Serde(#[from] serde_json::Error),

    /// Domain failure reported by the activity itself.
    #[error("activity failed: {0}")]
    #[diagnostic(code(filament::activity::failed))]
    Failed(String),
}

impl ActivityError {
    /// Convenience constructor for [`ActivityError::Failed`].
    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    /// Convenience constructor for [`ActivityError::MissingVariable`].
    #[must_use]
    pub fn missing(name: impl Into<String>) -> Self {
        Self::MissingVariable { name: name.into() }
    }
}
