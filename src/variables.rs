//! Variable scopes for workflow instances.
//!
//! Variables live in a tree of scopes: one root scope seeded from the run
//! input, plus a child scope per Split branch. Reads resolve up the parent
//! chain; writes resolve to the nearest scope that already binds the name,
//! falling back to a fresh binding in the current scope. Logically parallel
//! branches therefore share mutable state through their common ancestor
//! scopes while keeping branch-local names isolated.
//!
//! Because the whole instance runs on one scheduler turn at a time, no
//! locking is needed here; the tree is plain owned data and serializes as
//! part of every snapshot.
//!
//! # Examples
//!
//! ```rust
//! use filament::variables::{ScopeTree, new_variable_map};
//! use filament::types::ScopeId;
//! use serde_json::json;
//!
//! let mut root_vars = new_variable_map();
//! root_vars.insert("count".into(), json!(0));
//! let mut tree = ScopeTree::new(root_vars);
//!
//! let branch = tree.child(ScopeId::ROOT);
//! // Chain-resolving write: lands on the root binding.
//! tree.set(branch, "count", json!(1));
//! assert_eq!(tree.get(ScopeId::ROOT, "count"), Some(&json!(1)));
//!
//! // Local write: invisible to the root.
//! tree.set_local(branch, "scratch", json!("branch-only"));
//! assert!(tree.get(ScopeId::ROOT, "scratch").is_none());
//! assert!(tree.get(branch, "scratch").is_some());
//! ```

use rustc_hash::FxHashMap;
use serde_json::Value;

use crate::types::ScopeId;

/// Name-to-JSON bindings of a single scope, and the host-facing shape of run
/// input and output.
pub type VariableMap = FxHashMap<String, Value>;

/// Creates a new, empty variable map with the engine's standard hasher.
#[must_use]
pub fn new_variable_map() -> VariableMap {
    VariableMap::default()
}

/// One scope: a parent link and its local bindings.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Scope {
    pub parent: Option<ScopeId>,
    pub values: FxHashMap<String, Value>,
}

/// Arena of scopes forming the instance's variable scope tree.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScopeTree {
    scopes: Vec<Scope>,
}

impl ScopeTree {
    /// Creates a tree whose root scope holds `root_values`.
    #[must_use]
    pub fn new(root_values: FxHashMap<String, Value>) -> Self {
        Self {
            scopes: vec![Scope {
                parent: None,
                values: root_values,
            }],
        }
    }

    /// Rebuild a tree from already-structured scopes (restore path).
    ///
    /// The caller is responsible for index validity; the persistence bridge
    /// checks parent references before calling this.
    #[must_use]
    pub(crate) fn from_scopes(scopes: Vec<Scope>) -> Self {
        Self { scopes }
    }

    /// Allocates a child scope under `parent`.
    pub fn child(&mut self, parent: ScopeId) -> ScopeId {
        let id = ScopeId::new(self.scopes.len());
        self.scopes.push(Scope {
            parent: Some(parent),
            values: FxHashMap::default(),
        });
        id
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.scopes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.scopes.is_empty()
    }

    #[must_use]
    pub fn scopes(&self) -> &[Scope] {
        &self.scopes
    }

    /// Reads `name` starting at `scope`, resolving up the parent chain.
    #[must_use]
    pub fn get(&self, scope: ScopeId, name: &str) -> Option<&Value> {
        let mut cursor = Some(scope);
        while let Some(id) = cursor {
            let s = &self.scopes[id.index()];
            if let Some(v) = s.values.get(name) {
                return Some(v);
            }
            cursor = s.parent;
        }
        None
    }

    /// Writes `name`, assigning to the nearest enclosing scope that already
    /// binds it; defines it in `scope` if no binding exists anywhere.
    pub fn set(&mut self, scope: ScopeId, name: impl Into<String>, value: Value) {
        let name = name.into();
        let mut cursor = Some(scope);
        while let Some(id) = cursor {
            if self.scopes[id.index()].values.contains_key(&name) {
                self.scopes[id.index()].values.insert(name, value);
                return;
            }
            cursor = self.scopes[id.index()].parent;
        }
        self.scopes[scope.index()].values.insert(name, value);
    }

    /// Defines `name` in `scope` itself, shadowing any outer binding.
    pub fn set_local(&mut self, scope: ScopeId, name: impl Into<String>, value: Value) {
        self.scopes[scope.index()].values.insert(name.into(), value);
    }

    /// Clone of the root scope's bindings, the host-visible output of a run.
    #[must_use]
    pub fn root_snapshot(&self) -> FxHashMap<String, Value> {
        self.scopes[ScopeId::ROOT.index()].values.clone()
    }
}

/// Read-only view of the scope chain at a fixed position.
///
/// Passed to [`DecisionPredicate`](crate::flow::DecisionPredicate)s, which
/// must observe state without mutating it.
#[derive(Clone, Copy, Debug)]
pub struct VariableView<'a> {
    tree: &'a ScopeTree,
    scope: ScopeId,
}

impl<'a> VariableView<'a> {
    #[must_use]
    pub fn new(tree: &'a ScopeTree, scope: ScopeId) -> Self {
        Self { tree, scope }
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&'a Value> {
        self.tree.get(self.scope, name)
    }

    /// Reads `name` as a boolean; `None` if absent or not a boolean.
    #[must_use]
    pub fn get_bool(&self, name: &str) -> Option<bool> {
        self.get(name).and_then(Value::as_bool)
    }

    /// Reads `name` as an i64; `None` if absent or not numeric.
    #[must_use]
    pub fn get_i64(&self, name: &str) -> Option<i64> {
        self.get(name).and_then(Value::as_i64)
    }
}
