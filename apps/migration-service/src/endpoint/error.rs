use axum::http::StatusCode;
use licensing_api_client::codes;
use serde_json::{Value, json};

use crate::engine::SyncError;
use crate::mapping::MappingStoreError;
use crate::source::SourceError;

/// Every failure the migration endpoint can answer with.
#[derive(Debug, thiserror::Error)]
pub enum MigrationError {
    #[error("missing required parameter `{param}`")]
    MissingParam { param: &'static str },
    #[error("site {site_index} is missing required parameter `{param}`")]
    MissingSiteParam {
        site_index: usize,
        param: &'static str,
    },
    #[error("license key is empty")]
    EmptyLicenseKey,
    #[error("none of the sites carries a license key")]
    NoLicenseKeys,
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("module {0} is not part of this migration")]
    InvalidModuleId(u64),
    #[error("license key is not valid for this module")]
    InvalidLicenseKey,
    #[error("license has expired")]
    LicenseExpired,
    #[error("license is disabled")]
    LicenseDisabled,
    #[error("a migration for this license is already running")]
    MigrationInProgress,
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Sync(#[from] SyncError),
    #[error("{0}")]
    Internal(String),
}

impl From<MappingStoreError> for MigrationError {
    fn from(error: MappingStoreError) -> Self {
        Self::Sync(SyncError::Store(error))
    }
}

impl From<SourceError> for MigrationError {
    fn from(error: SourceError) -> Self {
        Self::Sync(SyncError::Source(error))
    }
}

/// Platform validation codes surfaced to the client unchanged.
const FORWARDED_REMOTE_CODES: [&str; 4] = [
    codes::EMPTY_LICENSE_KEY,
    codes::INVALID_LICENSE_KEY,
    codes::LICENSE_EXPIRED,
    codes::LICENSE_DISABLED,
];

impl MigrationError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingParam { .. } => "missing_param",
            Self::MissingSiteParam { .. } => "missing_site_param",
            Self::EmptyLicenseKey => codes::EMPTY_LICENSE_KEY,
            Self::NoLicenseKeys => "no_license_keys",
            Self::InvalidRequest(_) => "invalid_request",
            Self::InvalidModuleId(_) => "invalid_module_id",
            Self::InvalidLicenseKey => codes::INVALID_LICENSE_KEY,
            Self::LicenseExpired => codes::LICENSE_EXPIRED,
            Self::LicenseDisabled => codes::LICENSE_DISABLED,
            Self::MigrationInProgress => "migration_in_progress",
            Self::Unauthorized(_) => "unauthorized",
            Self::Forbidden(_) => "forbidden",
            Self::NotFound(_) => "not_found",
            Self::Sync(SyncError::Remote(error)) => FORWARDED_REMOTE_CODES
                .into_iter()
                .find(|code| error.is(code))
                .unwrap_or("migration_failed"),
            Self::Sync(SyncError::MissingRemoteField(_)) => "migration_failed",
            Self::Sync(SyncError::NotMigrated { .. }) => "prerequisite_not_migrated",
            Self::Sync(_) | Self::Internal(_) => "internal_error",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self.code() {
            "missing_param" | "missing_site_param" | "empty_license_key" | "no_license_keys"
            | "invalid_request" => StatusCode::BAD_REQUEST,
            "invalid_module_id" | "invalid_license_key" | "not_found" => StatusCode::NOT_FOUND,
            "license_expired" | "license_disabled" | "forbidden" => StatusCode::FORBIDDEN,
            "migration_in_progress" => StatusCode::CONFLICT,
            "unauthorized" => StatusCode::UNAUTHORIZED,
            "migration_failed" => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Coarse error family reported as `error.type`.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Unauthorized(_) | Self::Forbidden(_) => "auth_error",
            Self::MigrationInProgress => "conflict_error",
            Self::Sync(SyncError::Remote(_) | SyncError::MissingRemoteField(_)) => {
                "remote_error"
            }
            Self::Sync(SyncError::NotMigrated { .. }) => "integration_error",
            Self::Sync(_) | Self::Internal(_) => "internal_error",
            _ => "validation_error",
        }
    }

    pub fn data(&self) -> Option<Value> {
        match self {
            Self::MissingParam { param } => Some(json!({ "param": param })),
            Self::MissingSiteParam { site_index, param } => {
                Some(json!({ "site_index": site_index, "param": param }))
            }
            Self::InvalidModuleId(module_id) => Some(json!({ "module_id": module_id })),
            Self::Sync(SyncError::Remote(error)) => {
                Some(json!({ "remote_code": error.code, "remote_http": error.http }))
            }
            Self::Sync(SyncError::NotMigrated {
                entity_type,
                local_id,
            }) => Some(json!({ "entity_type": entity_type, "local_id": local_id })),
            _ => None,
        }
    }

    /// Text safe to return to the caller; storage and source details are
    /// only logged.
    pub fn public_message(&self) -> String {
        match self {
            Self::Sync(SyncError::Store(_) | SyncError::Source(_)) | Self::Internal(_) => {
                "internal error".to_string()
            }
            Self::Sync(SyncError::Remote(error)) => error.message.clone(),
            other => other.to_string(),
        }
    }
}
