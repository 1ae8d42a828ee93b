//! SQLite-backed instance store (feature `sqlite`).
//!
//! Mirrors [`InMemoryInstanceStore`](super::InMemoryInstanceStore)'s
//! semantics on top of three tables:
//!
//! - `owners.id` ← owner uuid, `owners.metadata_json` ← owner metadata
//! - `instances.id` ← instance uuid, `instances.snapshot_json` ← serialized
//!   [`PersistedInstance`], plus `locked_by` and `complete` columns
//! - `instance_keys.key` ← lookup key, `instance_keys.instance_id` ← bound
//!   instance
//!
//! Commands whose [`is_transaction_enlistment_optional`][opt] answer is
//! `false` run inside one SQLite transaction; single-statement commands go
//! straight to the pool. Locks are plain columns, not SQLite locks, so they
//! survive process restarts; a crashed host's locks release when its owner
//! is deleted.
//!
//! [opt]: super::StoreCommand::is_transaction_enlistment_optional

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Row, SqlitePool};
use tracing::instrument;

use crate::persistence::{JsonSerializable, PersistedInstance};
use crate::types::{InstanceId, OwnerId};
use crate::variables::VariableMap;

use super::{InstanceStore, StoreCommand, StoreError, StoreResponse};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS owners (
    id            TEXT PRIMARY KEY,
    metadata_json TEXT NOT NULL,
    created_at    TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS instances (
    id            TEXT PRIMARY KEY,
    snapshot_json TEXT,
    locked_by     TEXT,
    complete      INTEGER NOT NULL DEFAULT 0,
    created_at    TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS instance_keys (
    key         TEXT PRIMARY KEY,
    instance_id TEXT NOT NULL REFERENCES instances(id)
);
";

/// Durable [`InstanceStore`] over a SQLite database.
pub struct SqliteInstanceStore {
    pool: SqlitePool,
}

impl std::fmt::Debug for SqliteInstanceStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteInstanceStore").finish()
    }
}

fn backend(e: sqlx::Error) -> StoreError {
    StoreError::Backend {
        message: e.to_string(),
    }
}

fn parse_instance(id: &str) -> Result<InstanceId, StoreError> {
    id.parse().map_err(|e| StoreError::Backend {
        message: format!("corrupt instance id {id:?}: {e}"),
    })
}

impl SqliteInstanceStore {
    /// Connects to (or creates) the database at `database_url` and applies
    /// the schema. Example URL: `sqlite://instances.db?mode=rwc`.
    #[instrument(skip(database_url))]
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = SqlitePool::connect(database_url).await.map_err(backend)?;
        sqlx::raw_sql(SCHEMA).execute(&pool).await.map_err(backend)?;
        Ok(Self { pool })
    }

    async fn require_owner<'e, E>(executor: E, owner: OwnerId) -> Result<(), StoreError>
    where
        E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
    {
        let row = sqlx::query("SELECT 1 FROM owners WHERE id = ?1")
            .bind(owner.to_string())
            .fetch_optional(executor)
            .await
            .map_err(backend)?;
        if row.is_none() {
            return Err(StoreError::UnknownOwner { owner });
        }
        Ok(())
    }

    async fn create_owner(
        &self,
        owner: OwnerId,
        metadata: VariableMap,
    ) -> Result<StoreResponse, StoreError> {
        let metadata_json = metadata.to_json_string()?;
        let result = sqlx::query(
            "INSERT OR IGNORE INTO owners (id, metadata_json, created_at) VALUES (?1, ?2, ?3)",
        )
        .bind(owner.to_string())
        .bind(metadata_json)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::OwnerExists { owner });
        }
        Ok(StoreResponse::OwnerCreated)
    }

    async fn delete_owner(&self, owner: OwnerId) -> Result<StoreResponse, StoreError> {
        let mut tx = self.pool.begin().await.map_err(backend)?;
        Self::require_owner(&mut *tx, owner).await?;
        sqlx::query("UPDATE instances SET locked_by = NULL WHERE locked_by = ?1")
            .bind(owner.to_string())
            .execute(&mut *tx)
            .await
            .map_err(backend)?;
        sqlx::query("DELETE FROM owners WHERE id = ?1")
            .bind(owner.to_string())
            .execute(&mut *tx)
            .await
            .map_err(backend)?;
        tx.commit().await.map_err(backend)?;
        Ok(StoreResponse::OwnerDeleted)
    }

    async fn load_instance(
        &self,
        owner: OwnerId,
        instance: InstanceId,
    ) -> Result<StoreResponse, StoreError> {
        let mut tx = self.pool.begin().await.map_err(backend)?;
        Self::require_owner(&mut *tx, owner).await?;
        let row = sqlx::query("SELECT snapshot_json, locked_by FROM instances WHERE id = ?1")
            .bind(instance.to_string())
            .fetch_optional(&mut *tx)
            .await
            .map_err(backend)?
            .ok_or(StoreError::UnknownInstance { instance })?;
        let locked_by: Option<String> = row.get("locked_by");
        if let Some(holder) = locked_by
            && holder != owner.to_string()
        {
            return Err(StoreError::Locked { instance });
        }
        let snapshot_json: Option<String> = row.get("snapshot_json");
        let snapshot_json = snapshot_json.ok_or(StoreError::UnknownInstance { instance })?;
        let snapshot = PersistedInstance::from_json_str(&snapshot_json)?;
        sqlx::query("UPDATE instances SET locked_by = ?1 WHERE id = ?2")
            .bind(owner.to_string())
            .bind(instance.to_string())
            .execute(&mut *tx)
            .await
            .map_err(backend)?;
        tx.commit().await.map_err(backend)?;
        Ok(StoreResponse::Loaded(snapshot))
    }

    async fn save_instance(
        &self,
        owner: OwnerId,
        instance: InstanceId,
        snapshot: PersistedInstance,
        keys: Vec<String>,
        complete: bool,
    ) -> Result<StoreResponse, StoreError> {
        let snapshot_json = snapshot.to_json_string()?;
        let mut tx = self.pool.begin().await.map_err(backend)?;
        Self::require_owner(&mut *tx, owner).await?;
        let row = sqlx::query("SELECT locked_by FROM instances WHERE id = ?1")
            .bind(instance.to_string())
            .fetch_optional(&mut *tx)
            .await
            .map_err(backend)?;
        if let Some(row) = row {
            let locked_by: Option<String> = row.get("locked_by");
            if let Some(holder) = locked_by
                && holder != owner.to_string()
            {
                return Err(StoreError::NotLocked { owner, instance });
            }
        }
        for key in &keys {
            let bound = sqlx::query("SELECT instance_id FROM instance_keys WHERE key = ?1")
                .bind(key)
                .fetch_optional(&mut *tx)
                .await
                .map_err(backend)?;
            if let Some(row) = bound {
                let bound_id: String = row.get("instance_id");
                if bound_id != instance.to_string() {
                    return Err(StoreError::KeyCollision {
                        key: key.clone(),
                        instance: parse_instance(&bound_id)?,
                    });
                }
            }
        }
        sqlx::query(
            "INSERT INTO instances (id, snapshot_json, locked_by, complete, created_at)
             VALUES (?1, ?2, NULL, ?3, ?4)
             ON CONFLICT(id) DO UPDATE
             SET snapshot_json = excluded.snapshot_json,
                 locked_by = NULL,
                 complete = excluded.complete",
        )
        .bind(instance.to_string())
        .bind(snapshot_json)
        .bind(i64::from(complete))
        .bind(Utc::now().to_rfc3339())
        .execute(&mut *tx)
        .await
        .map_err(backend)?;
        for key in &keys {
            sqlx::query("INSERT OR REPLACE INTO instance_keys (key, instance_id) VALUES (?1, ?2)")
                .bind(key)
                .bind(instance.to_string())
                .execute(&mut *tx)
                .await
                .map_err(backend)?;
        }
        tx.commit().await.map_err(backend)?;
        Ok(StoreResponse::Saved)
    }

    async fn load_by_key(
        &self,
        owner: OwnerId,
        key: String,
        associate_keys: Vec<String>,
        accept_uninitialized: bool,
    ) -> Result<StoreResponse, StoreError> {
        let mut tx = self.pool.begin().await.map_err(backend)?;
        Self::require_owner(&mut *tx, owner).await?;
        let bound = sqlx::query("SELECT instance_id FROM instance_keys WHERE key = ?1")
            .bind(&key)
            .fetch_optional(&mut *tx)
            .await
            .map_err(backend)?;
        let instance = match bound {
            Some(row) => {
                let id: String = row.get("instance_id");
                parse_instance(&id)?
            }
            None if accept_uninitialized => {
                let id = InstanceId::generate();
                sqlx::query(
                    "INSERT INTO instances (id, snapshot_json, locked_by, complete, created_at)
                     VALUES (?1, NULL, NULL, 0, ?2)",
                )
                .bind(id.to_string())
                .bind(Utc::now().to_rfc3339())
                .execute(&mut *tx)
                .await
                .map_err(backend)?;
                sqlx::query("INSERT INTO instance_keys (key, instance_id) VALUES (?1, ?2)")
                    .bind(&key)
                    .bind(id.to_string())
                    .execute(&mut *tx)
                    .await
                    .map_err(backend)?;
                id
            }
            None => return Err(StoreError::UnknownKey { key }),
        };
        for extra in &associate_keys {
            let bound = sqlx::query("SELECT instance_id FROM instance_keys WHERE key = ?1")
                .bind(extra)
                .fetch_optional(&mut *tx)
                .await
                .map_err(backend)?;
            match bound {
                Some(row) => {
                    let bound_id: String = row.get("instance_id");
                    if bound_id != instance.to_string() {
                        return Err(StoreError::KeyCollision {
                            key: extra.clone(),
                            instance: parse_instance(&bound_id)?,
                        });
                    }
                }
                None => {
                    sqlx::query("INSERT INTO instance_keys (key, instance_id) VALUES (?1, ?2)")
                        .bind(extra)
                        .bind(instance.to_string())
                        .execute(&mut *tx)
                        .await
                        .map_err(backend)?;
                }
            }
        }
        let row = sqlx::query("SELECT snapshot_json, locked_by FROM instances WHERE id = ?1")
            .bind(instance.to_string())
            .fetch_optional(&mut *tx)
            .await
            .map_err(backend)?
            .ok_or(StoreError::UnknownInstance { instance })?;
        let locked_by: Option<String> = row.get("locked_by");
        if let Some(holder) = locked_by
            && holder != owner.to_string()
        {
            return Err(StoreError::Locked { instance });
        }
        let snapshot_json: Option<String> = row.get("snapshot_json");
        let snapshot = match snapshot_json {
            Some(json) => Some(PersistedInstance::from_json_str(&json)?),
            None => None,
        };
        sqlx::query("UPDATE instances SET locked_by = ?1 WHERE id = ?2")
            .bind(owner.to_string())
            .bind(instance.to_string())
            .execute(&mut *tx)
            .await
            .map_err(backend)?;
        tx.commit().await.map_err(backend)?;
        Ok(StoreResponse::KeyResolved { instance, snapshot })
    }

    async fn try_load_runnable(&self, owner: OwnerId) -> Result<StoreResponse, StoreError> {
        let mut tx = self.pool.begin().await.map_err(backend)?;
        Self::require_owner(&mut *tx, owner).await?;
        let row = sqlx::query(
            "SELECT id, snapshot_json FROM instances
             WHERE snapshot_json IS NOT NULL AND locked_by IS NULL AND complete = 0
             ORDER BY rowid LIMIT 1",
        )
        .fetch_optional(&mut *tx)
        .await
        .map_err(backend)?;
        let Some(row) = row else {
            return Ok(StoreResponse::Runnable(None));
        };
        let id: String = row.get("id");
        let snapshot_json: String = row.get("snapshot_json");
        let instance = parse_instance(&id)?;
        let snapshot = PersistedInstance::from_json_str(&snapshot_json)?;
        sqlx::query("UPDATE instances SET locked_by = ?1 WHERE id = ?2")
            .bind(owner.to_string())
            .bind(&id)
            .execute(&mut *tx)
            .await
            .map_err(backend)?;
        tx.commit().await.map_err(backend)?;
        Ok(StoreResponse::Runnable(Some((instance, snapshot))))
    }
}

#[async_trait]
impl InstanceStore for SqliteInstanceStore {
    #[instrument(skip(self, command), fields(command = command.kind()))]
    async fn execute(&self, command: StoreCommand) -> Result<StoreResponse, StoreError> {
        match command {
            StoreCommand::CreateOwner { owner, metadata } => {
                self.create_owner(owner, metadata).await
            }
            StoreCommand::DeleteOwner { owner } => self.delete_owner(owner).await,
            StoreCommand::LoadInstance { owner, instance } => {
                self.load_instance(owner, instance).await
            }
            StoreCommand::SaveInstance {
                owner,
                instance,
                snapshot,
                keys,
                complete,
            } => {
                self.save_instance(owner, instance, snapshot, keys, complete)
                    .await
            }
            StoreCommand::LoadByKey {
                owner,
                key,
                associate_keys,
                accept_uninitialized,
            } => {
                self.load_by_key(owner, key, associate_keys, accept_uninitialized)
                    .await
            }
            StoreCommand::TryLoadRunnable { owner } => self.try_load_runnable(owner).await,
        }
    }
}
