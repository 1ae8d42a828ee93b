//! Flow graph definition: node model, builder, and structural validation.
//!
//! A flow graph is the static shape of a workflow: Steps, Splits, Merges,
//! and Decisions wired together by index-based successor pointers. Graphs
//! are built with [`FlowBuilder`], checked with [`validate`], and then
//! shared immutably (behind an `Arc`) across every instance that executes
//! them.

pub mod builder;
pub mod node;
pub mod validate;

pub use builder::FlowBuilder;
pub use node::{Branch, DecisionPredicate, FlowGraph, FlowNode, MergeBehavior, NodeBody};
pub use validate::{InvalidGraph, StructuralError, validate};

#[cfg(test)]
mod tests;
