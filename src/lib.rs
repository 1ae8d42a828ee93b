//! # Filament: Embeddable Durable Workflow Engine
//!
//! Filament executes long-running flowchart workflows inside a host
//! application. A workflow is a graph of typed nodes (sequential steps,
//! parallel splits, merges, and decisions) executed cooperatively on a
//! single logical thread per instance. When a step needs outside input it
//! parks a named **bookmark** and returns control to the host; days later
//! (and possibly in a different process) the host resumes that bookmark
//! with a payload and execution continues exactly where it left off.
//!
//! ## Core Concepts
//!
//! - **Flowchart**: a [`flow::FlowGraph`] built with [`flow::FlowBuilder`]
//!   from Step, Split, Merge, and Decision nodes
//! - **Activity**: the [`activity::Activity`] trait, an async unit of work
//!   that completes or suspends on a bookmark
//! - **Instance**: one execution of a graph; queue, variable scopes,
//!   bookmarks, and trace, all owned by
//!   [`instance::WorkflowInstance`]
//! - **Host**: [`host::WorkflowHost`], the embedding surface that runs,
//!   resumes, cancels, and persists instances
//! - **Store**: the [`store::InstanceStore`] command protocol for durable
//!   snapshots, with an in-memory backend and a SQLite backend behind the
//!   `sqlite` feature
//!
//! ## Quick Start
//!
//! ```
//! use std::sync::Arc;
//! use async_trait::async_trait;
//! use filament::activity::{Activity, ActivityContext, ActivityError, Outcome};
//! use filament::flow::FlowBuilder;
//! use filament::instance::WorkflowInstance;
//! use filament::types::InstanceStatus;
//! use filament::variables::new_variable_map;
//! use serde_json::json;
//!
//! struct Record(&'static str);
//!
//! #[async_trait]
//! impl Activity for Record {
//!     async fn execute(&self, ctx: &mut ActivityContext<'_>) -> Result<Outcome, ActivityError> {
//!         ctx.set(self.0, json!(true));
//!         Ok(Outcome::Completed)
//!     }
//! }
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> miette::Result<()> {
//! let mut builder = FlowBuilder::new();
//! let first = builder.step("first", Record("first_ran"));
//! let second = builder.step("second", Record("second_ran"));
//! builder.connect(first, second);
//! builder.start(first);
//!
//! let graph = Arc::new(builder.build());
//! let mut instance = WorkflowInstance::new(graph, new_variable_map())
//!     .map_err(|e| miette::miette!(e))?;
//! let status = instance.run().await.map_err(|e| miette::miette!(e))?;
//!
//! assert_eq!(status, InstanceStatus::Completed);
//! assert_eq!(instance.variables().get("second_ran"), Some(&json!(true)));
//! # Ok(())
//! # }
//! ```
//!
//! ## Suspension and Resumption
//!
//! An activity returns [`activity::Outcome::suspend`] with a bookmark name;
//! the instance goes [`types::InstanceStatus::Idle`] once no other work
//! remains, and the host later calls
//! [`WorkflowInstance::resume`](instance::WorkflowInstance::resume) (or
//! [`WorkflowHost::resume`](host::WorkflowHost::resume)) with that name and
//! a JSON payload. Between the two, the instance can be snapshotted with
//! [`persistence::PersistedInstance`], stored, and restored in another
//! process; the graph is code and is re-registered, never serialized.
//!
//! ## Module Guide
//!
//! - [`flow`] - Graph model, builder, and structural validation
//! - [`activity`] - The activity trait and execution context
//! - [`instance`] - The workflow instance aggregate
//! - [`scheduler`] - Work queue and the cooperative drain loop
//! - [`merge`] - Split activations and merge completion policy
//! - [`bookmarks`] - Named suspension points
//! - [`variables`] - Hierarchical variable scopes
//! - [`trace`] - Append-only execution log
//! - [`persistence`] - Snapshot models and restore
//! - [`store`] - Durable-store command protocol and backends
//! - [`host`] - The embedding surface
//! - [`telemetry`] - Tracing subscriber setup helper

pub mod activity;
pub mod bookmarks;
pub mod flow;
pub mod host;
pub mod instance;
pub mod merge;
pub mod persistence;
pub mod scheduler;
pub mod store;
pub mod telemetry;
pub mod trace;
pub mod types;
pub mod variables;
