//! The embedding surface: a [`WorkflowHost`] owns live instances and
//! brokers between them and an optional durable store.
//!
//! A host is single-owner by construction. It generates one [`OwnerId`] at
//! build time, registers it with the store on first use, and every store
//! command it issues carries that id, so instance locks always resolve to
//! this host. Hosts that want parallelism run several hosts over one store;
//! the lock protocol keeps them off each other's instances.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use filament::flow::FlowBuilder;
//! use filament::host::{RunOutcome, WorkflowHost};
//! use filament::variables::new_variable_map;
//! # use filament::activity::{Activity, ActivityContext, ActivityError, Outcome};
//! # struct Noop;
//! # #[async_trait::async_trait]
//! # impl Activity for Noop {
//! #     async fn execute(&self, _: &mut ActivityContext<'_>) -> Result<Outcome, ActivityError> {
//! #         Ok(Outcome::Completed)
//! #     }
//! # }
//!
//! # async fn demo() -> miette::Result<()> {
//! let mut builder = FlowBuilder::new();
//! let hello = builder.step("hello", Noop);
//! builder.start(hello);
//! let graph = Arc::new(builder.build());
//!
//! let mut host = WorkflowHost::in_memory();
//! match host.run(graph, new_variable_map()).await.map_err(|e| miette::miette!(e))? {
//!     RunOutcome::Completed(id) => println!("instance {id} finished"),
//!     RunOutcome::Idle(id) => println!("instance {id} is waiting on bookmarks"),
//! }
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use miette::Diagnostic;
use rustc_hash::FxHashMap;
use serde_json::Value;
use thiserror::Error;
use tracing::instrument;

use crate::flow::{FlowGraph, InvalidGraph};
use crate::instance::WorkflowInstance;
use crate::persistence::{PersistedInstance, PersistenceError};
use crate::scheduler::RunError;
use crate::store::{InstanceStore, StoreCommand, StoreError, StoreResponse};
use crate::types::{InstanceId, InstanceStatus, OwnerId};
use crate::variables::VariableMap;

/// Host construction options.
#[derive(Clone, Debug, Default)]
pub struct HostConfig {
    /// Metadata attached to the owner registration in the store.
    pub owner_metadata: VariableMap,
    /// Save a snapshot to the store after every run/resume that leaves the
    /// instance idle, instead of only on [`WorkflowHost::unload`].
    pub autosave: bool,
}

/// How a run (or resume) left the instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunOutcome {
    /// The instance ran to completion.
    Completed(InstanceId),
    /// The instance parked on one or more bookmarks.
    Idle(InstanceId),
}

impl RunOutcome {
    #[must_use]
    pub fn instance(self) -> InstanceId {
        match self {
            Self::Completed(id) | Self::Idle(id) => id,
        }
    }
}

/// Errors surfaced by host operations.
#[derive(Debug, Error, Diagnostic)]
pub enum HostError {
    #[error("instance {instance} is not loaded in this host")]
    #[diagnostic(
        code(filament::host::instance_not_found),
        help("Load the instance first, or check the id against WorkflowHost::run's outcome.")
    )]
    InstanceNotFound { instance: InstanceId },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Invalid(#[from] InvalidGraph),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Run(#[from] RunError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Persistence(#[from] PersistenceError),

    /// A store operation was requested on a host built without a store.
    #[error("this host has no instance store configured")]
    #[diagnostic(code(filament::host::no_store))]
    NoStore,

    /// The store answered a command with a response shape the protocol does
    /// not permit for it.
    #[error("store returned an unexpected response to {command}")]
    #[diagnostic(code(filament::host::protocol))]
    Protocol { command: &'static str },
}

/// A workflow host: the in-process home of live instances.
///
/// All operations take `&mut self`; per-instance execution is serialized by
/// construction.
pub struct WorkflowHost {
    owner: OwnerId,
    config: HostConfig,
    store: Option<Arc<dyn InstanceStore>>,
    owner_registered: bool,
    instances: FxHashMap<InstanceId, WorkflowInstance>,
}

impl std::fmt::Debug for WorkflowHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowHost")
            .field("owner", &self.owner)
            .field("instances", &self.instances.len())
            .finish()
    }
}

impl WorkflowHost {
    /// A host with no store: instances live and die in memory.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            owner: OwnerId::generate(),
            config: HostConfig::default(),
            store: None,
            owner_registered: false,
            instances: FxHashMap::default(),
        }
    }

    /// A host backed by `store`.
    #[must_use]
    pub fn with_store(store: Arc<dyn InstanceStore>, config: HostConfig) -> Self {
        Self {
            owner: OwnerId::generate(),
            config,
            store: Some(store),
            owner_registered: false,
            instances: FxHashMap::default(),
        }
    }

    #[must_use]
    pub fn owner(&self) -> OwnerId {
        self.owner
    }

    /// Read access to a loaded instance.
    #[must_use]
    pub fn instance(&self, id: InstanceId) -> Option<&WorkflowInstance> {
        self.instances.get(&id)
    }

    /// Ids of every instance currently loaded.
    #[must_use]
    pub fn loaded(&self) -> Vec<InstanceId> {
        self.instances.keys().copied().collect()
    }

    async fn store(&mut self) -> Result<Arc<dyn InstanceStore>, HostError> {
        let store = self.store.as_ref().ok_or(HostError::NoStore)?.clone();
        if !self.owner_registered {
            store
                .execute(StoreCommand::CreateOwner {
                    owner: self.owner,
                    metadata: self.config.owner_metadata.clone(),
                })
                .await?;
            self.owner_registered = true;
        }
        Ok(store)
    }

    async fn save(&mut self, id: InstanceId, complete: bool) -> Result<(), HostError> {
        let store = self.store().await?;
        let instance = self
            .instances
            .get(&id)
            .ok_or(HostError::InstanceNotFound { instance: id })?;
        let snapshot = PersistedInstance::from(instance);
        match store
            .execute(StoreCommand::SaveInstance {
                owner: self.owner,
                instance: id,
                snapshot,
                keys: Vec::new(),
                complete,
            })
            .await?
        {
            StoreResponse::Saved => Ok(()),
            _ => Err(HostError::Protocol {
                command: "SaveInstance",
            }),
        }
    }

    /// Autosave hook after run/resume. A failed autosave is an error, never
    /// a silent drop; the instance stays loaded either way.
    async fn after_quiescence(
        &mut self,
        id: InstanceId,
        status: InstanceStatus,
    ) -> Result<(), HostError> {
        if self.config.autosave && self.store.is_some() {
            self.save(id, status == InstanceStatus::Completed).await?;
        }
        Ok(())
    }

    /// Creates an instance from `graph` and runs it to quiescence.
    ///
    /// The instance is registered with the host even when the run faults,
    /// so the fault details remain inspectable via
    /// [`WorkflowHost::instance`].
    #[instrument(skip(self, graph, input))]
    pub async fn run(
        &mut self,
        graph: Arc<FlowGraph>,
        input: VariableMap,
    ) -> Result<RunOutcome, HostError> {
        let mut instance = WorkflowInstance::new(graph, input)?;
        let id = instance.id();
        let result = instance.run().await;
        self.instances.insert(id, instance);
        let status = result?;
        self.after_quiescence(id, status).await?;
        Ok(match status {
            InstanceStatus::Completed => RunOutcome::Completed(id),
            _ => RunOutcome::Idle(id),
        })
    }

    /// Resumes the named bookmark on a loaded instance.
    #[instrument(skip(self, value))]
    pub async fn resume(
        &mut self,
        id: InstanceId,
        bookmark: &str,
        value: Value,
    ) -> Result<RunOutcome, HostError> {
        let instance = self
            .instances
            .get_mut(&id)
            .ok_or(HostError::InstanceNotFound { instance: id })?;
        let status = instance.resume(bookmark, value).await?;
        self.after_quiescence(id, status).await?;
        Ok(match status {
            InstanceStatus::Completed => RunOutcome::Completed(id),
            _ => RunOutcome::Idle(id),
        })
    }

    /// Cancels a loaded instance. The instance stays loaded for
    /// inspection.
    #[instrument(skip(self))]
    pub async fn cancel(&mut self, id: InstanceId) -> Result<(), HostError> {
        let instance = self
            .instances
            .get_mut(&id)
            .ok_or(HostError::InstanceNotFound { instance: id })?;
        instance.cancel().await?;
        Ok(())
    }

    /// Saves an instance to the store and evicts it from memory.
    ///
    /// If the save fails the instance stays loaded, unchanged; unload is
    /// all-or-nothing.
    #[instrument(skip(self))]
    pub async fn unload(&mut self, id: InstanceId) -> Result<(), HostError> {
        if !self.instances.contains_key(&id) {
            return Err(HostError::InstanceNotFound { instance: id });
        }
        let complete = self
            .instances
            .get(&id)
            .is_some_and(|i| i.status() == InstanceStatus::Completed);
        self.save(id, complete).await?;
        self.instances.remove(&id);
        Ok(())
    }

    /// Loads a persisted instance from the store, locking it to this host,
    /// and restores it against `graph`.
    #[instrument(skip(self, graph))]
    pub async fn load(
        &mut self,
        id: InstanceId,
        graph: Arc<FlowGraph>,
    ) -> Result<InstanceId, HostError> {
        let store = self.store().await?;
        let snapshot = match store
            .execute(StoreCommand::LoadInstance {
                owner: self.owner,
                instance: id,
            })
            .await?
        {
            StoreResponse::Loaded(snapshot) => snapshot,
            _ => {
                return Err(HostError::Protocol {
                    command: "LoadInstance",
                });
            }
        };
        let instance = WorkflowInstance::restore(graph, &snapshot)?;
        let id = instance.id();
        self.instances.insert(id, instance);
        Ok(id)
    }

    /// Loads and restores any runnable instance from the store, if one
    /// exists.
    #[instrument(skip(self, graph))]
    pub async fn load_runnable(
        &mut self,
        graph: Arc<FlowGraph>,
    ) -> Result<Option<InstanceId>, HostError> {
        let store = self.store().await?;
        match store
            .execute(StoreCommand::TryLoadRunnable { owner: self.owner })
            .await?
        {
            StoreResponse::Runnable(None) => Ok(None),
            StoreResponse::Runnable(Some((_, snapshot))) => {
                let instance = WorkflowInstance::restore(graph, &snapshot)?;
                let id = instance.id();
                self.instances.insert(id, instance);
                Ok(Some(id))
            }
            _ => Err(HostError::Protocol {
                command: "TryLoadRunnable",
            }),
        }
    }
}
