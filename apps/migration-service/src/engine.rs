//! Pieces shared by the catalog and licensing engines.

use licensing_api_client::ApiError;
use tracing::warn;

use crate::mapping::{EntityMapper, EntityType, LinkOutcome, MappingStoreError};
use crate::source::SourceError;

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("licensing platform call failed: {0}")]
    Remote(#[from] ApiError),
    #[error("entity mapping store failed: {0}")]
    Store(#[from] MappingStoreError),
    #[error("storefront lookup failed: {0}")]
    Source(#[from] SourceError),
    /// A prerequisite entity has no mapping yet; the caller ran steps out of
    /// order or the module was never synced.
    #[error("{entity_type} `{local_id}` has not been migrated")]
    NotMigrated {
        entity_type: EntityType,
        local_id: String,
    },
    #[error("licensing platform response is missing `{0}`")]
    MissingRemoteField(&'static str),
}

impl SyncError {
    pub fn not_migrated(entity_type: EntityType, local_id: impl Into<String>) -> Self {
        Self::NotMigrated {
            entity_type,
            local_id: local_id.into(),
        }
    }
}

/// Resolves a mapping that must already exist.
pub(crate) async fn require_remote_id(
    mapper: &EntityMapper,
    entity_type: EntityType,
    local_id: &str,
) -> Result<u64, SyncError> {
    mapper
        .get_remote_id(entity_type, local_id)
        .await?
        .ok_or_else(|| SyncError::not_migrated(entity_type, local_id))
}

/// Records a freshly created remote entity. When a concurrent migration
/// linked the same local id first, its remote id wins and is returned.
pub(crate) async fn link_created(
    mapper: &EntityMapper,
    entity_type: EntityType,
    local_id: &str,
    remote_id: u64,
) -> Result<u64, SyncError> {
    match mapper
        .link_if_absent(entity_type, local_id, remote_id)
        .await?
    {
        LinkOutcome::Inserted(record) => Ok(record.remote_id),
        LinkOutcome::Existing(record) => {
            warn!(
                entity_type = %entity_type,
                local_id,
                created_remote_id = remote_id,
                stored_remote_id = record.remote_id,
                "concurrent migration linked entity first; adopting stored remote id"
            );
            Ok(record.remote_id)
        }
    }
}
