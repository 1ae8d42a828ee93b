//! Reference in-memory store backend.
//!
//! Implements the full command protocol, locks included, against a plain
//! mutex-guarded map. Useful for tests and for hosts that want the
//! suspend/resume lifecycle without durability; the SQLite backend mirrors
//! this one's semantics.

use std::sync::Mutex;

use async_trait::async_trait;
use rustc_hash::FxHashMap;

use crate::persistence::PersistedInstance;
use crate::types::{InstanceId, OwnerId};
use crate::variables::VariableMap;

use super::{InstanceStore, StoreCommand, StoreError, StoreResponse};

#[derive(Debug)]
struct StoredInstance {
    snapshot: Option<PersistedInstance>,
    locked_by: Option<OwnerId>,
    complete: bool,
}

#[derive(Debug, Default)]
struct Inner {
    owners: FxHashMap<OwnerId, VariableMap>,
    instances: FxHashMap<InstanceId, StoredInstance>,
    keys: FxHashMap<String, InstanceId>,
    /// Insertion order of instance ids, so `TryLoadRunnable` picks
    /// deterministically (oldest first).
    order: Vec<InstanceId>,
}

/// In-memory [`InstanceStore`].
#[derive(Debug, Default)]
pub struct InMemoryInstanceStore {
    inner: Mutex<Inner>,
}

impl InMemoryInstanceStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Inner {
    fn require_owner(&self, owner: OwnerId) -> Result<(), StoreError> {
        if self.owners.contains_key(&owner) {
            Ok(())
        } else {
            Err(StoreError::UnknownOwner { owner })
        }
    }

    fn register(&mut self, instance: InstanceId) -> &mut StoredInstance {
        if !self.instances.contains_key(&instance) {
            self.order.push(instance);
        }
        self.instances.entry(instance).or_insert_with(|| StoredInstance {
            snapshot: None,
            locked_by: None,
            complete: false,
        })
    }

    /// Binds `keys` to `instance`, all or nothing: collisions are detected
    /// before any binding happens.
    fn bind_keys(
        &mut self,
        instance: InstanceId,
        keys: &[String],
    ) -> Result<(), StoreError> {
        for key in keys {
            if let Some(bound) = self.keys.get(key)
                && *bound != instance
            {
                return Err(StoreError::KeyCollision {
                    key: key.clone(),
                    instance: *bound,
                });
            }
        }
        for key in keys {
            self.keys.insert(key.clone(), instance);
        }
        Ok(())
    }
}

#[async_trait]
impl InstanceStore for InMemoryInstanceStore {
    async fn execute(&self, command: StoreCommand) -> Result<StoreResponse, StoreError> {
        let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        tracing::trace!(command = command.kind(), "store command");
        match command {
            StoreCommand::CreateOwner { owner, metadata } => {
                if inner.owners.contains_key(&owner) {
                    return Err(StoreError::OwnerExists { owner });
                }
                inner.owners.insert(owner, metadata);
                Ok(StoreResponse::OwnerCreated)
            }

            StoreCommand::DeleteOwner { owner } => {
                inner.require_owner(owner)?;
                inner.owners.remove(&owner);
                // Orphaned locks release so other owners can take over.
                for stored in inner.instances.values_mut() {
                    if stored.locked_by == Some(owner) {
                        stored.locked_by = None;
                    }
                }
                Ok(StoreResponse::OwnerDeleted)
            }

            StoreCommand::LoadInstance { owner, instance } => {
                inner.require_owner(owner)?;
                let stored = inner
                    .instances
                    .get_mut(&instance)
                    .ok_or(StoreError::UnknownInstance { instance })?;
                match stored.locked_by {
                    Some(holder) if holder != owner => {
                        return Err(StoreError::Locked { instance });
                    }
                    _ => {}
                }
                let snapshot = stored
                    .snapshot
                    .clone()
                    .ok_or(StoreError::UnknownInstance { instance })?;
                stored.locked_by = Some(owner);
                Ok(StoreResponse::Loaded(snapshot))
            }

            StoreCommand::SaveInstance {
                owner,
                instance,
                snapshot,
                keys,
                complete,
            } => {
                inner.require_owner(owner)?;
                // All checks happen before any state changes so a failed
                // save is a no-op.
                if let Some(stored) = inner.instances.get(&instance)
                    && let Some(holder) = stored.locked_by
                    && holder != owner
                {
                    return Err(StoreError::NotLocked { owner, instance });
                }
                inner.bind_keys(instance, &keys)?;
                let stored = inner.register(instance);
                stored.snapshot = Some(snapshot);
                stored.complete = complete;
                stored.locked_by = None;
                Ok(StoreResponse::Saved)
            }

            StoreCommand::LoadByKey {
                owner,
                key,
                associate_keys,
                accept_uninitialized,
            } => {
                inner.require_owner(owner)?;
                let instance = match inner.keys.get(&key).copied() {
                    Some(id) => id,
                    None if accept_uninitialized => {
                        let id = InstanceId::generate();
                        inner.keys.insert(key.clone(), id);
                        inner.register(id);
                        id
                    }
                    None => return Err(StoreError::UnknownKey { key }),
                };
                inner.bind_keys(instance, &associate_keys)?;
                let stored = inner
                    .instances
                    .get_mut(&instance)
                    .ok_or(StoreError::UnknownInstance { instance })?;
                match stored.locked_by {
                    Some(holder) if holder != owner => {
                        return Err(StoreError::Locked { instance });
                    }
                    _ => {}
                }
                stored.locked_by = Some(owner);
                Ok(StoreResponse::KeyResolved {
                    instance,
                    snapshot: stored.snapshot.clone(),
                })
            }

            StoreCommand::TryLoadRunnable { owner } => {
                inner.require_owner(owner)?;
                let candidate = inner.order.iter().copied().find(|id| {
                    inner.instances.get(id).is_some_and(|s| {
                        s.snapshot.is_some() && s.locked_by.is_none() && !s.complete
                    })
                });
                match candidate {
                    None => Ok(StoreResponse::Runnable(None)),
                    Some(id) => {
                        let stored = inner
                            .instances
                            .get_mut(&id)
                            .ok_or(StoreError::UnknownInstance { instance: id })?;
                        stored.locked_by = Some(owner);
                        let snapshot = stored
                            .snapshot
                            .clone()
                            .ok_or(StoreError::UnknownInstance { instance: id })?;
                        Ok(StoreResponse::Runnable(Some((id, snapshot))))
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owner() -> OwnerId {
        OwnerId::generate()
    }

    async fn registered(store: &InMemoryInstanceStore) -> OwnerId {
        let id = owner();
        store
            .execute(StoreCommand::CreateOwner {
                owner: id,
                metadata: VariableMap::default(),
            })
            .await
            .unwrap();
        id
    }

    #[tokio::test]
    async fn commands_require_a_registered_owner() {
        let store = InMemoryInstanceStore::new();
        let err = store
            .execute(StoreCommand::TryLoadRunnable { owner: owner() })
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::UnknownOwner { .. }));
    }

    #[tokio::test]
    async fn duplicate_owner_registration_is_rejected() {
        let store = InMemoryInstanceStore::new();
        let id = registered(&store).await;
        let err = store
            .execute(StoreCommand::CreateOwner {
                owner: id,
                metadata: VariableMap::default(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::OwnerExists { .. }));
    }

    #[tokio::test]
    async fn load_by_unknown_key_reserves_when_accepted() {
        let store = InMemoryInstanceStore::new();
        let id = registered(&store).await;

        let err = store
            .execute(StoreCommand::LoadByKey {
                owner: id,
                key: "order-17".into(),
                associate_keys: vec![],
                accept_uninitialized: false,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::UnknownKey { .. }));

        let resolved = store
            .execute(StoreCommand::LoadByKey {
                owner: id,
                key: "order-17".into(),
                associate_keys: vec!["customer-3".into()],
                accept_uninitialized: true,
            })
            .await
            .unwrap();
        let StoreResponse::KeyResolved { instance, snapshot } = resolved else {
            panic!("expected KeyResolved");
        };
        assert!(snapshot.is_none());

        // Both keys now resolve to the same reserved instance.
        let again = store
            .execute(StoreCommand::LoadByKey {
                owner: id,
                key: "customer-3".into(),
                associate_keys: vec![],
                accept_uninitialized: false,
            })
            .await
            .unwrap();
        let StoreResponse::KeyResolved { instance: same, .. } = again else {
            panic!("expected KeyResolved");
        };
        assert_eq!(instance, same);
    }

    #[test]
    fn transaction_enlistment_classification() {
        let o = owner();
        assert!(
            StoreCommand::CreateOwner {
                owner: o,
                metadata: VariableMap::default()
            }
            .is_transaction_enlistment_optional()
        );
        let mut metadata = VariableMap::default();
        metadata.insert("region".into(), serde_json::json!("eu"));
        assert!(
            !StoreCommand::CreateOwner {
                owner: o,
                metadata
            }
            .is_transaction_enlistment_optional()
        );
        assert!(
            !StoreCommand::LoadInstance {
                owner: o,
                instance: InstanceId::generate()
            }
            .is_transaction_enlistment_optional()
        );
        assert!(StoreCommand::TryLoadRunnable { owner: o }.is_transaction_enlistment_optional());
    }

    #[test]
    fn lock_acquisition_classification() {
        let o = owner();
        assert!(
            StoreCommand::LoadInstance {
                owner: o,
                instance: InstanceId::generate()
            }
            .automatically_acquires_lock()
        );
        assert!(!StoreCommand::DeleteOwner { owner: o }.automatically_acquires_lock());
    }
}
