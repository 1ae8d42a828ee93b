//! Execution trace: the ordered, serializable record of what an instance did.
//!
//! The trace is part of the instance aggregate and travels with every
//! snapshot, so a restored instance keeps its full history. It is also the
//! observable surface for the engine's ordering guarantees: branch
//! interleaving, merge firing, and cancellation acknowledgment all leave
//! entries here in the exact order they happened.

use serde::{Deserialize, Serialize};

use crate::types::NodeId;

/// What happened at a node.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TraceEvent {
    /// A Step activity began executing.
    Started,
    /// A Step activity (or resumed continuation) completed.
    Completed,
    /// A Decision evaluated its condition.
    Decided { branch: bool },
    /// A Step suspended by registering a bookmark.
    Suspended { bookmark: String },
    /// A bookmark was resumed with a host-supplied value.
    Resumed { bookmark: String },
    /// The continuation at this node was canceled; for suspended branches
    /// the bookmark name that was dropped is recorded.
    Canceled { bookmark: Option<String> },
    /// A Merge fired and scheduled its successor.
    MergeFired,
    /// Free-form note appended by an activity.
    Note { message: String },
}

/// One entry in the execution trace.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceEntry {
    pub node: NodeId,
    pub label: String,
    pub event: TraceEvent,
}

/// Append-only execution log of a workflow instance.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trace {
    entries: Vec<TraceEntry>,
}

impl Trace {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds a trace from persisted entries (restore path).
    #[must_use]
    pub(crate) fn from_entries(entries: Vec<TraceEntry>) -> Self {
        Self { entries }
    }

    pub(crate) fn push(&mut self, node: NodeId, label: impl Into<String>, event: TraceEvent) {
        self.entries.push(TraceEntry {
            node,
            label: label.into(),
            event,
        });
    }

    #[must_use]
    pub fn entries(&self) -> &[TraceEntry] {
        &self.entries
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Labels of all entries matching `pred`, in trace order.
    ///
    /// Convenient for asserting execution order in tests:
    ///
    /// ```rust
    /// # use filament::trace::{Trace, TraceEvent};
    /// let trace = Trace::new();
    /// let completed: Vec<&str> =
    ///     trace.labels_where(|e| matches!(e, TraceEvent::Completed));
    /// assert!(completed.is_empty());
    /// ```
    #[must_use]
    pub fn labels_where(&self, mut pred: impl FnMut(&TraceEvent) -> bool) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|e| pred(&e.event))
            .map(|e| e.label.as_str())
            .collect()
    }

    /// Labels of all [`TraceEvent::Completed`] entries, in completion order.
    #[must_use]
    pub fn completed_labels(&self) -> Vec<&str> {
        self.labels_where(|e| matches!(e, TraceEvent::Completed))
    }

    /// Labels of all [`TraceEvent::Started`] entries, in start order.
    #[must_use]
    pub fn started_labels(&self) -> Vec<&str> {
        self.labels_where(|e| matches!(e, TraceEvent::Started))
    }

    /// Labels of all [`TraceEvent::Canceled`] entries, in acknowledgment order.
    #[must_use]
    pub fn canceled_labels(&self) -> Vec<&str> {
        self.labels_where(|e| matches!(e, TraceEvent::Canceled { .. }))
    }
}
