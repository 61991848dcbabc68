use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::db::MappingDb;
use crate::mapping::types::{EntityType, LinkOutcome, MappingRecord};

#[derive(Debug, thiserror::Error)]
pub enum MappingStoreError {
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("db error: {0}")]
    Db(String),
}

/// Durable storage for entity mappings.
///
/// Every method is scoped by namespace; `(namespace, entity_type, local_id)`
/// identifies at most one record.
#[async_trait]
pub trait MappingStore: Send + Sync {
    fn driver_name(&self) -> &'static str;

    async fn upsert(
        &self,
        namespace: &str,
        entity_type: EntityType,
        local_id: &str,
        remote_id: u64,
        now: DateTime<Utc>,
    ) -> Result<MappingRecord, MappingStoreError>;

    async fn insert_if_absent(
        &self,
        namespace: &str,
        entity_type: EntityType,
        local_id: &str,
        remote_id: u64,
        now: DateTime<Utc>,
    ) -> Result<LinkOutcome, MappingStoreError>;

    async fn get(
        &self,
        namespace: &str,
        entity_type: EntityType,
        local_id: &str,
    ) -> Result<Option<MappingRecord>, MappingStoreError>;

    /// Most recently updated record pointing at `remote_id`.
    async fn get_by_remote(
        &self,
        namespace: &str,
        entity_type: EntityType,
        remote_id: u64,
    ) -> Result<Option<MappingRecord>, MappingStoreError>;

    async fn delete(
        &self,
        namespace: &str,
        entity_type: EntityType,
        local_id: &str,
    ) -> Result<bool, MappingStoreError>;

    /// Deletes the record only while it still points at `remote_id`.
    async fn delete_if_remote(
        &self,
        namespace: &str,
        entity_type: EntityType,
        local_id: &str,
        remote_id: u64,
    ) -> Result<bool, MappingStoreError>;

    async fn delete_namespace(&self, namespace: &str) -> Result<u64, MappingStoreError>;

    async fn ping(&self) -> Result<(), MappingStoreError>;
}

pub fn memory() -> Arc<dyn MappingStore> {
    Arc::new(MemoryMappingStore::default())
}

pub fn postgres(db: Arc<MappingDb>) -> Arc<dyn MappingStore> {
    Arc::new(PostgresMappingStore { db })
}

type MappingKey = (String, EntityType, String);

#[derive(Default)]
struct MemoryMappingStore {
    inner: Mutex<MemoryMappingStoreInner>,
}

#[derive(Default)]
struct MemoryMappingStoreInner {
    next_id: i64,
    rows: HashMap<MappingKey, MappingRecord>,
}

impl MemoryMappingStoreInner {
    fn allocate_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

fn key(namespace: &str, entity_type: EntityType, local_id: &str) -> MappingKey {
    (namespace.to_string(), entity_type, local_id.to_string())
}

#[async_trait]
impl MappingStore for MemoryMappingStore {
    fn driver_name(&self) -> &'static str {
        "memory"
    }

    async fn upsert(
        &self,
        namespace: &str,
        entity_type: EntityType,
        local_id: &str,
        remote_id: u64,
        now: DateTime<Utc>,
    ) -> Result<MappingRecord, MappingStoreError> {
        let mut inner = self.inner.lock().await;
        let key = key(namespace, entity_type, local_id);
        if let Some(existing) = inner.rows.get_mut(&key) {
            existing.remote_id = remote_id;
            existing.updated_at = now;
            return Ok(existing.clone());
        }
        let record = MappingRecord {
            id: inner.allocate_id(),
            namespace: namespace.to_string(),
            entity_type,
            local_id: local_id.to_string(),
            remote_id,
            created_at: now,
            updated_at: now,
        };
        inner.rows.insert(key, record.clone());
        Ok(record)
    }

    async fn insert_if_absent(
        &self,
        namespace: &str,
        entity_type: EntityType,
        local_id: &str,
        remote_id: u64,
        now: DateTime<Utc>,
    ) -> Result<LinkOutcome, MappingStoreError> {
        let mut inner = self.inner.lock().await;
        let key = key(namespace, entity_type, local_id);
        if let Some(existing) = inner.rows.get(&key) {
            return Ok(LinkOutcome::Existing(existing.clone()));
        }
        let record = MappingRecord {
            id: inner.allocate_id(),
            namespace: namespace.to_string(),
            entity_type,
            local_id: local_id.to_string(),
            remote_id,
            created_at: now,
            updated_at: now,
        };
        inner.rows.insert(key, record.clone());
        Ok(LinkOutcome::Inserted(record))
    }

    async fn get(
        &self,
        namespace: &str,
        entity_type: EntityType,
        local_id: &str,
    ) -> Result<Option<MappingRecord>, MappingStoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .rows
            .get(&key(namespace, entity_type, local_id))
            .cloned())
    }

    async fn get_by_remote(
        &self,
        namespace: &str,
        entity_type: EntityType,
        remote_id: u64,
    ) -> Result<Option<MappingRecord>, MappingStoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .rows
            .values()
            .filter(|record| {
                record.namespace == namespace
                    && record.entity_type == entity_type
                    && record.remote_id == remote_id
            })
            .max_by_key(|record| (record.updated_at, record.id))
            .cloned())
    }

    async fn delete(
        &self,
        namespace: &str,
        entity_type: EntityType,
        local_id: &str,
    ) -> Result<bool, MappingStoreError> {
        let mut inner = self.inner.lock().await;
        Ok(inner
            .rows
            .remove(&key(namespace, entity_type, local_id))
            .is_some())
    }

    async fn delete_if_remote(
        &self,
        namespace: &str,
        entity_type: EntityType,
        local_id: &str,
        remote_id: u64,
    ) -> Result<bool, MappingStoreError> {
        let mut inner = self.inner.lock().await;
        let key = key(namespace, entity_type, local_id);
        if inner
            .rows
            .get(&key)
            .is_some_and(|record| record.remote_id == remote_id)
        {
            inner.rows.remove(&key);
            return Ok(true);
        }
        Ok(false)
    }

    async fn delete_namespace(&self, namespace: &str) -> Result<u64, MappingStoreError> {
        let mut inner = self.inner.lock().await;
        let before = inner.rows.len();
        inner.rows.retain(|(row_namespace, _, _), _| row_namespace != namespace);
        Ok((before - inner.rows.len()) as u64)
    }

    async fn ping(&self) -> Result<(), MappingStoreError> {
        Ok(())
    }
}

struct PostgresMappingStore {
    db: Arc<MappingDb>,
}

const RETURNING_COLUMNS: &str =
    "id, namespace, entity_type, local_id, remote_id, created_at, updated_at";

#[async_trait]
impl MappingStore for PostgresMappingStore {
    fn driver_name(&self) -> &'static str {
        "postgres"
    }

    async fn upsert(
        &self,
        namespace: &str,
        entity_type: EntityType,
        local_id: &str,
        remote_id: u64,
        now: DateTime<Utc>,
    ) -> Result<MappingRecord, MappingStoreError> {
        let remote_id = to_db_remote_id(remote_id)?;
        let client = self.db.client();
        let client = client.lock().await;
        let row = client
            .query_one(
                format!(
                    r#"
                    INSERT INTO migration.entity_mappings (
                        namespace, entity_type, local_id, remote_id, created_at, updated_at
                    ) VALUES ($1, $2, $3, $4, $5, $5)
                    ON CONFLICT (local_id, entity_type, namespace)
                    DO UPDATE SET remote_id = EXCLUDED.remote_id,
                                  updated_at = EXCLUDED.updated_at
                    RETURNING {RETURNING_COLUMNS}
                    "#
                )
                .as_str(),
                &[&namespace, &entity_type.as_str(), &local_id, &remote_id, &now],
            )
            .await
            .map_err(|error| MappingStoreError::Db(error.to_string()))?;
        map_mapping_row(&row).map_err(MappingStoreError::Db)
    }

    async fn insert_if_absent(
        &self,
        namespace: &str,
        entity_type: EntityType,
        local_id: &str,
        remote_id: u64,
        now: DateTime<Utc>,
    ) -> Result<LinkOutcome, MappingStoreError> {
        let remote_id = to_db_remote_id(remote_id)?;
        let client = self.db.client();
        let client = client.lock().await;
        let inserted = client
            .query_opt(
                format!(
                    r#"
                    INSERT INTO migration.entity_mappings (
                        namespace, entity_type, local_id, remote_id, created_at, updated_at
                    ) VALUES ($1, $2, $3, $4, $5, $5)
                    ON CONFLICT (local_id, entity_type, namespace) DO NOTHING
                    RETURNING {RETURNING_COLUMNS}
                    "#
                )
                .as_str(),
                &[&namespace, &entity_type.as_str(), &local_id, &remote_id, &now],
            )
            .await
            .map_err(|error| MappingStoreError::Db(error.to_string()))?;
        if let Some(row) = inserted {
            return map_mapping_row(&row)
                .map(LinkOutcome::Inserted)
                .map_err(MappingStoreError::Db);
        }

        let existing = client
            .query_opt(
                format!(
                    r#"
                    SELECT {RETURNING_COLUMNS}
                      FROM migration.entity_mappings
                     WHERE namespace = $1 AND entity_type = $2 AND local_id = $3
                    "#
                )
                .as_str(),
                &[&namespace, &entity_type.as_str(), &local_id],
            )
            .await
            .map_err(|error| MappingStoreError::Db(error.to_string()))?;
        match existing {
            Some(row) => map_mapping_row(&row)
                .map(LinkOutcome::Existing)
                .map_err(MappingStoreError::Db),
            // The winner was removed between the two statements.
            None => Err(MappingStoreError::Conflict(format!(
                "{entity_type}:{local_id} changed during insert"
            ))),
        }
    }

    async fn get(
        &self,
        namespace: &str,
        entity_type: EntityType,
        local_id: &str,
    ) -> Result<Option<MappingRecord>, MappingStoreError> {
        let client = self.db.client();
        let client = client.lock().await;
        let row = client
            .query_opt(
                format!(
                    r#"
                    SELECT {RETURNING_COLUMNS}
                      FROM migration.entity_mappings
                     WHERE namespace = $1 AND entity_type = $2 AND local_id = $3
                    "#
                )
                .as_str(),
                &[&namespace, &entity_type.as_str(), &local_id],
            )
            .await
            .map_err(|error| MappingStoreError::Db(error.to_string()))?;
        row.as_ref()
            .map(map_mapping_row)
            .transpose()
            .map_err(MappingStoreError::Db)
    }

    async fn get_by_remote(
        &self,
        namespace: &str,
        entity_type: EntityType,
        remote_id: u64,
    ) -> Result<Option<MappingRecord>, MappingStoreError> {
        let remote_id = to_db_remote_id(remote_id)?;
        let client = self.db.client();
        let client = client.lock().await;
        let row = client
            .query_opt(
                format!(
                    r#"
                    SELECT {RETURNING_COLUMNS}
                      FROM migration.entity_mappings
                     WHERE remote_id = $1 AND entity_type = $2 AND namespace = $3
                     ORDER BY updated_at DESC, id DESC
                     LIMIT 1
                    "#
                )
                .as_str(),
                &[&remote_id, &entity_type.as_str(), &namespace],
            )
            .await
            .map_err(|error| MappingStoreError::Db(error.to_string()))?;
        row.as_ref()
            .map(map_mapping_row)
            .transpose()
            .map_err(MappingStoreError::Db)
    }

    async fn delete(
        &self,
        namespace: &str,
        entity_type: EntityType,
        local_id: &str,
    ) -> Result<bool, MappingStoreError> {
        let client = self.db.client();
        let client = client.lock().await;
        let deleted = client
            .execute(
                r#"
                DELETE FROM migration.entity_mappings
                 WHERE namespace = $1 AND entity_type = $2 AND local_id = $3
                "#,
                &[&namespace, &entity_type.as_str(), &local_id],
            )
            .await
            .map_err(|error| MappingStoreError::Db(error.to_string()))?;
        Ok(deleted > 0)
    }

    async fn delete_if_remote(
        &self,
        namespace: &str,
        entity_type: EntityType,
        local_id: &str,
        remote_id: u64,
    ) -> Result<bool, MappingStoreError> {
        let remote_id = to_db_remote_id(remote_id)?;
        let client = self.db.client();
        let client = client.lock().await;
        let deleted = client
            .execute(
                r#"
                DELETE FROM migration.entity_mappings
                 WHERE namespace = $1 AND entity_type = $2 AND local_id = $3
                   AND remote_id = $4
                "#,
                &[&namespace, &entity_type.as_str(), &local_id, &remote_id],
            )
            .await
            .map_err(|error| MappingStoreError::Db(error.to_string()))?;
        Ok(deleted > 0)
    }

    async fn delete_namespace(&self, namespace: &str) -> Result<u64, MappingStoreError> {
        let client = self.db.client();
        let client = client.lock().await;
        client
            .execute(
                "DELETE FROM migration.entity_mappings WHERE namespace = $1",
                &[&namespace],
            )
            .await
            .map_err(|error| MappingStoreError::Db(error.to_string()))
    }

    async fn ping(&self) -> Result<(), MappingStoreError> {
        let client = self.db.client();
        let client = client.lock().await;
        client
            .execute("SELECT 1", &[])
            .await
            .map(|_| ())
            .map_err(|error| MappingStoreError::Db(error.to_string()))
    }
}

fn to_db_remote_id(remote_id: u64) -> Result<i64, MappingStoreError> {
    i64::try_from(remote_id)
        .map_err(|_| MappingStoreError::Db(format!("remote id {remote_id} exceeds BIGINT")))
}

fn map_mapping_row(row: &tokio_postgres::Row) -> Result<MappingRecord, String> {
    let entity_type: String = row.try_get("entity_type").map_err(|e| e.to_string())?;
    let remote_id: i64 = row.try_get("remote_id").map_err(|e| e.to_string())?;
    Ok(MappingRecord {
        id: row.try_get("id").map_err(|e| e.to_string())?,
        namespace: row.try_get("namespace").map_err(|e| e.to_string())?,
        entity_type: entity_type
            .parse::<EntityType>()
            .map_err(|e| e.to_string())?,
        local_id: row.try_get("local_id").map_err(|e| e.to_string())?,
        remote_id: u64::try_from(remote_id)
            .map_err(|_| format!("negative remote id {remote_id}"))?,
        created_at: row.try_get("created_at").map_err(|e| e.to_string())?,
        updated_at: row.try_get("updated_at").map_err(|e| e.to_string())?,
    })
}
