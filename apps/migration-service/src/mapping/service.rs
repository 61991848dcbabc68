use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};

use crate::mapping::store::{MappingStore, MappingStoreError};
use crate::mapping::types::{EntityType, LinkOutcome, MappingRecord};

/// Namespace-bound view over a [`MappingStore`].
///
/// One mapper exists per source platform; it is built once at startup and
/// passed to every engine that needs it.
#[derive(Clone)]
pub struct EntityMapper {
    namespace: String,
    store: Arc<dyn MappingStore>,
}

impl EntityMapper {
    pub fn new(namespace: impl Into<String>, store: Arc<dyn MappingStore>) -> Self {
        Self {
            namespace: namespace.into(),
            store,
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn store_driver(&self) -> &'static str {
        self.store.driver_name()
    }

    /// Upserts the mapping; an existing record keeps its id and creation
    /// time and takes the new remote id.
    pub async fn link(
        &self,
        entity_type: EntityType,
        local_id: &str,
        remote_id: u64,
    ) -> Result<MappingRecord, MappingStoreError> {
        let record = self
            .store
            .upsert(&self.namespace, entity_type, local_id, remote_id, Utc::now())
            .await?;
        debug!(
            namespace = %self.namespace,
            entity_type = %entity_type,
            local_id,
            remote_id,
            "entity linked"
        );
        Ok(record)
    }

    /// Writes the mapping only when the key is free. The losing writer gets
    /// the winner's record back and must adopt it.
    pub async fn link_if_absent(
        &self,
        entity_type: EntityType,
        local_id: &str,
        remote_id: u64,
    ) -> Result<LinkOutcome, MappingStoreError> {
        self.store
            .insert_if_absent(&self.namespace, entity_type, local_id, remote_id, Utc::now())
            .await
    }

    pub async fn get(
        &self,
        entity_type: EntityType,
        local_id: &str,
    ) -> Result<Option<MappingRecord>, MappingStoreError> {
        self.store.get(&self.namespace, entity_type, local_id).await
    }

    pub async fn get_remote_id(
        &self,
        entity_type: EntityType,
        local_id: &str,
    ) -> Result<Option<u64>, MappingStoreError> {
        Ok(self
            .get(entity_type, local_id)
            .await?
            .map(|record| record.remote_id))
    }

    pub async fn get_by_remote(
        &self,
        entity_type: EntityType,
        remote_id: u64,
    ) -> Result<Option<MappingRecord>, MappingStoreError> {
        self.store
            .get_by_remote(&self.namespace, entity_type, remote_id)
            .await
    }

    pub async fn unlink(
        &self,
        entity_type: EntityType,
        local_id: &str,
    ) -> Result<bool, MappingStoreError> {
        let removed = self
            .store
            .delete(&self.namespace, entity_type, local_id)
            .await?;
        if removed {
            info!(
                namespace = %self.namespace,
                entity_type = %entity_type,
                local_id,
                "entity unlinked"
            );
        }
        Ok(removed)
    }

    /// Like [`EntityMapper::unlink`], but keeps a record that was relinked
    /// to another remote id in the meantime.
    pub async fn unlink_if_remote(
        &self,
        entity_type: EntityType,
        local_id: &str,
        remote_id: u64,
    ) -> Result<bool, MappingStoreError> {
        self.store
            .delete_if_remote(&self.namespace, entity_type, local_id, remote_id)
            .await
    }

    pub async fn clear_mapping(&self) -> Result<u64, MappingStoreError> {
        let removed = self.store.delete_namespace(&self.namespace).await?;
        info!(namespace = %self.namespace, removed, "entity mapping cleared");
        Ok(removed)
    }

    pub async fn ping(&self) -> Result<(), MappingStoreError> {
        self.store.ping().await
    }
}
