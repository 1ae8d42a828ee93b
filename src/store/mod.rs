//! The durable-store command protocol.
//!
//! Hosts do not talk to storage backends through ad-hoc method calls; every
//! interaction is one [`StoreCommand`] handed to an [`InstanceStore`], which
//! executes it atomically and returns one [`StoreResponse`]. The command
//! enum is closed: backends implement six operations and nothing else, and
//! each command self-describes its transactional needs via
//! [`StoreCommand::is_transaction_enlistment_optional`] and its locking
//! behavior via [`StoreCommand::automatically_acquires_lock`].
//!
//! Locking is the exclusivity mechanism: a loaded instance is locked to the
//! loading owner until saved, so two hosts sharing one store never run the
//! same instance concurrently.
//!
//! [`InMemoryInstanceStore`] is the reference backend; a SQLite-backed
//! [`SqliteInstanceStore`](sqlite::SqliteInstanceStore) ships behind the
//! `sqlite` feature.

pub mod memory;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use memory::InMemoryInstanceStore;

use async_trait::async_trait;
use miette::Diagnostic;
use thiserror::Error;

use crate::persistence::PersistedInstance;
use crate::types::{InstanceId, OwnerId};
use crate::variables::VariableMap;

/// One atomic storage operation.
///
/// Commands carry everything the backend needs; backends hold no
/// per-command state between calls.
#[derive(Clone, Debug)]
pub enum StoreCommand {
    /// Registers `owner` with the store, optionally attaching metadata.
    CreateOwner {
        owner: OwnerId,
        metadata: VariableMap,
    },
    /// Unregisters `owner` and releases every lock it holds.
    DeleteOwner { owner: OwnerId },
    /// Loads an instance snapshot and locks it to `owner`.
    LoadInstance {
        owner: OwnerId,
        instance: InstanceId,
    },
    /// Saves a snapshot and releases the owner's lock on it.
    ///
    /// `complete` marks the instance finished; completed instances are
    /// retained for inspection but excluded from
    /// [`StoreCommand::TryLoadRunnable`]. `keys` associates lookup keys
    /// with the instance for [`StoreCommand::LoadByKey`].
    SaveInstance {
        owner: OwnerId,
        instance: InstanceId,
        snapshot: PersistedInstance,
        keys: Vec<String>,
        complete: bool,
    },
    /// Resolves `key` to an instance and locks it to `owner`.
    ///
    /// With `accept_uninitialized`, an unknown key reserves a fresh
    /// instance id instead of failing, and `associate_keys` are bound to it
    /// at the same time.
    LoadByKey {
        owner: OwnerId,
        key: String,
        associate_keys: Vec<String>,
        accept_uninitialized: bool,
    },
    /// Loads and locks any one runnable (saved, unlocked, not complete)
    /// instance, or reports that none exists.
    TryLoadRunnable { owner: OwnerId },
}

impl StoreCommand {
    /// Whether the backend may execute this command outside a transaction.
    ///
    /// Commands that mutate more than one record, or whose partial effects
    /// would be observable, require one.
    #[must_use]
    pub fn is_transaction_enlistment_optional(&self) -> bool {
        match self {
            Self::CreateOwner { metadata, .. } => metadata.is_empty(),
            Self::DeleteOwner { .. } => true,
            Self::LoadInstance { .. } => false,
            Self::SaveInstance { .. } => false,
            Self::LoadByKey { associate_keys, .. } => associate_keys.is_empty(),
            Self::TryLoadRunnable { .. } => true,
        }
    }

    /// Whether executing this command leaves the touched instance locked to
    /// the issuing owner.
    #[must_use]
    pub fn automatically_acquires_lock(&self) -> bool {
        matches!(
            self,
            Self::LoadInstance { .. } | Self::LoadByKey { .. } | Self::TryLoadRunnable { .. }
        )
    }

    /// Command name for logging.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::CreateOwner { .. } => "CreateOwner",
            Self::DeleteOwner { .. } => "DeleteOwner",
            Self::LoadInstance { .. } => "LoadInstance",
            Self::SaveInstance { .. } => "SaveInstance",
            Self::LoadByKey { .. } => "LoadByKey",
            Self::TryLoadRunnable { .. } => "TryLoadRunnable",
        }
    }
}

/// Successful result of one [`StoreCommand`], by command.
#[derive(Clone, Debug)]
pub enum StoreResponse {
    OwnerCreated,
    OwnerDeleted,
    /// `LoadInstance` succeeded; the instance is now locked to the owner.
    Loaded(PersistedInstance),
    Saved,
    /// `LoadByKey` resolved; `snapshot` is `None` for a freshly reserved
    /// (uninitialized) instance.
    KeyResolved {
        instance: InstanceId,
        snapshot: Option<PersistedInstance>,
    },
    /// `TryLoadRunnable` outcome; `None` means nothing is runnable.
    Runnable(Option<(InstanceId, PersistedInstance)>),
}

/// Errors a store backend may return.
#[derive(Debug, Error, Diagnostic)]
pub enum StoreError {
    #[error("owner {owner} is already registered")]
    #[diagnostic(code(filament::store::owner_exists))]
    OwnerExists { owner: OwnerId },

    #[error("owner {owner} is not registered")]
    #[diagnostic(
        code(filament::store::unknown_owner),
        help("Issue CreateOwner before any other command.")
    )]
    UnknownOwner { owner: OwnerId },

    #[error("instance {instance} does not exist")]
    #[diagnostic(code(filament::store::unknown_instance))]
    UnknownInstance { instance: InstanceId },

    /// The instance exists but is locked to a different owner.
    #[error("instance {instance} is locked by another owner")]
    #[diagnostic(
        code(filament::store::locked),
        help("The lock releases when the holding owner saves or is deleted.")
    )]
    Locked { instance: InstanceId },

    /// A save was attempted by an owner that does not hold the lock.
    #[error("owner {owner} does not hold the lock on instance {instance}")]
    #[diagnostic(code(filament::store::not_locked))]
    NotLocked {
        owner: OwnerId,
        instance: InstanceId,
    },

    #[error("no instance is associated with key {key:?}")]
    #[diagnostic(code(filament::store::unknown_key))]
    UnknownKey { key: String },

    /// A key in `associate_keys` is already bound to a different instance.
    #[error("key {key:?} is already bound to instance {instance}")]
    #[diagnostic(code(filament::store::key_collision))]
    KeyCollision {
        key: String,
        instance: InstanceId,
    },

    #[error("backend error: {message}")]
    #[diagnostic(code(filament::store::backend))]
    Backend { message: String },

    #[error("serialization error: {source}")]
    #[diagnostic(code(filament::store::serde))]
    Serde {
        #[from]
        source: serde_json::Error,
    },
}

/// A durable instance store.
///
/// `execute` is the entire surface: one command in, one response or error
/// out, atomically. Backends take `&self`; interior synchronization is
/// their concern.
#[async_trait]
pub trait InstanceStore: Send + Sync {
    async fn execute(&self, command: StoreCommand) -> Result<StoreResponse, StoreError>;
}
