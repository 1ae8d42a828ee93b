//! Bookmark manager: the suspension/resumption primitive.
//!
//! A bookmark is a named, single-use continuation point. It records only
//! serializable facts (the registering node's identity, the scope the
//! continuation runs in, and its branch membership) and never a callback
//! pointer, so a bookmark that survives a persist/reload cycle resolves to
//! the same node and stays resumable under the same external name.
//!
//! Names are instance-scoped, not global. Creation fails on duplicates;
//! consumption removes the bookmark exactly once; dropping removes it
//! without firing (the cancellation path).

use miette::Diagnostic;
use rustc_hash::FxHashMap;
use thiserror::Error;

use crate::types::{Membership, NodeId, ScopeId};

/// A pending continuation keyed by an opaque external name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Bookmark {
    pub name: String,
    /// Node whose activity will be resumed. Always a Step.
    pub node: NodeId,
    /// Scope the parked continuation runs in.
    pub scope: ScopeId,
    /// Branch membership of the parked continuation, if under a Split.
    pub membership: Option<Membership>,
}

/// Bookmark protocol errors. Local and recoverable by the caller of the
/// failing operation; they never abort other instances.
#[derive(Debug, Error, Diagnostic)]
pub enum BookmarkError {
    /// An activity registered a name already pending in this instance.
    #[error("bookmark already registered: {name}")]
    #[diagnostic(
        code(filament::bookmarks::duplicate),
        help("Bookmark names are instance-scoped; pick a unique name per pending wait.")
    )]
    Duplicate { name: String },

    /// A resume named a bookmark that is unknown or already consumed.
    #[error("bookmark not found: {name}")]
    #[diagnostic(
        code(filament::bookmarks::not_found),
        help("The bookmark may already have been resumed, dropped by cancellation, or never created.")
    )]
    NotFound { name: String },
}

/// Instance-scoped registry of outstanding bookmarks.
#[derive(Clone, Debug, Default)]
pub struct BookmarkManager {
    marks: FxHashMap<String, Bookmark>,
}

impl BookmarkManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a bookmark. Fails with [`BookmarkError::Duplicate`] if the
    /// name is already pending.
    pub fn create(
        &mut self,
        name: impl Into<String>,
        node: NodeId,
        scope: ScopeId,
        membership: Option<Membership>,
    ) -> Result<(), BookmarkError> {
        let name = name.into();
        if self.marks.contains_key(&name) {
            return Err(BookmarkError::Duplicate { name });
        }
        tracing::debug!(bookmark = %name, node = %node, "bookmark created");
        self.marks.insert(name.clone(), Bookmark {
            name,
            node,
            scope,
            membership,
        });
        Ok(())
    }

    /// Looks up and removes a bookmark for resumption. A miss has no
    /// observable side effect on the registry.
    pub fn consume(&mut self, name: &str) -> Result<Bookmark, BookmarkError> {
        self.marks
            .remove(name)
            .inspect(|bm| tracing::debug!(bookmark = %bm.name, node = %bm.node, "bookmark consumed"))
            .ok_or_else(|| BookmarkError::NotFound {
                name: name.to_string(),
            })
    }

    /// Removes a bookmark without firing it (cancellation).
    pub fn drop_bookmark(&mut self, name: &str) -> Option<Bookmark> {
        self.marks
            .remove(name)
            .inspect(|bm| tracing::debug!(bookmark = %bm.name, "bookmark dropped"))
    }

    /// Removes and returns every bookmark matching `pred`, used when a
    /// branch or the whole instance is canceled.
    pub fn remove_where(&mut self, mut pred: impl FnMut(&Bookmark) -> bool) -> Vec<Bookmark> {
        let doomed: Vec<String> = self
            .marks
            .values()
            .filter(|bm| pred(bm))
            .map(|bm| bm.name.clone())
            .collect();
        let mut removed: Vec<Bookmark> = doomed
            .into_iter()
            .filter_map(|name| self.marks.remove(&name))
            .collect();
        // Deterministic acknowledgment order regardless of hash order.
        removed.sort_by(|a, b| a.name.cmp(&b.name));
        removed
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Bookmark> {
        self.marks.get(name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.marks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.marks.is_empty()
    }

    /// Pending bookmark names, sorted for deterministic observation.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.marks.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn iter(&self) -> impl Iterator<Item = &Bookmark> {
        self.marks.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_name_is_rejected() {
        let mut mgr = BookmarkManager::new();
        mgr.create("wait", NodeId::new(0), ScopeId::ROOT, None)
            .unwrap();
        let err = mgr
            .create("wait", NodeId::new(1), ScopeId::ROOT, None)
            .unwrap_err();
        assert!(matches!(err, BookmarkError::Duplicate { name } if name == "wait"));
        // The original registration is untouched.
        assert_eq!(mgr.get("wait").unwrap().node, NodeId::new(0));
    }

    #[test]
    fn consume_is_single_use() {
        let mut mgr = BookmarkManager::new();
        mgr.create("once", NodeId::new(2), ScopeId::ROOT, None)
            .unwrap();
        assert!(mgr.consume("once").is_ok());
        assert!(matches!(
            mgr.consume("once"),
            Err(BookmarkError::NotFound { .. })
        ));
    }

    #[test]
    fn drop_does_not_error_on_missing() {
        let mut mgr = BookmarkManager::new();
        assert!(mgr.drop_bookmark("ghost").is_none());
    }
}
