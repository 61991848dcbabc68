use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use tracing::{error, info};

use crate::endpoint::MigrationError;

pub type ApiErrorTuple = (StatusCode, Json<ApiErrorResponse>);

#[derive(Debug, Serialize)]
pub struct ApiDataEnvelope<T> {
    pub success: bool,
    pub data: T,
}

#[derive(Debug, Serialize)]
pub struct ApiErrorDetail {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub message: String,
    pub code: &'static str,
    pub http: u16,
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

#[derive(Debug, Serialize)]
pub struct ApiErrorResponse {
    pub success: bool,
    pub error: ApiErrorDetail,
}

pub fn ok_data<T: Serialize>(data: T) -> (StatusCode, Json<ApiDataEnvelope<T>>) {
    (
        StatusCode::OK,
        Json(ApiDataEnvelope {
            success: true,
            data,
        }),
    )
}

pub fn error_response(error: &MigrationError) -> ApiErrorTuple {
    let status = error.status();
    (
        status,
        Json(ApiErrorResponse {
            success: false,
            error: ApiErrorDetail {
                kind: error.category(),
                message: error.public_message(),
                code: error.code(),
                http: status.as_u16(),
                timestamp: Utc::now().to_rfc3339(),
                data: error.data(),
            },
        }),
    )
}

impl IntoResponse for MigrationError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(
                code = self.code(),
                status = status.as_u16(),
                error = %self,
                "migration request failed"
            );
        } else {
            info!(
                code = self.code(),
                status = status.as_u16(),
                error = %self,
                "migration request rejected"
            );
        }
        error_response(&self).into_response()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApiErrorMatrixEntry {
    pub code: &'static str,
    pub status: u16,
    pub category: &'static str,
}

const API_ERROR_MATRIX: [ApiErrorMatrixEntry; 16] = [
    ApiErrorMatrixEntry {
        code: "missing_param",
        status: 400,
        category: "validation_error",
    },
    ApiErrorMatrixEntry {
        code: "missing_site_param",
        status: 400,
        category: "validation_error",
    },
    ApiErrorMatrixEntry {
        code: "empty_license_key",
        status: 400,
        category: "validation_error",
    },
    ApiErrorMatrixEntry {
        code: "no_license_keys",
        status: 400,
        category: "validation_error",
    },
    ApiErrorMatrixEntry {
        code: "invalid_request",
        status: 400,
        category: "validation_error",
    },
    ApiErrorMatrixEntry {
        code: "invalid_module_id",
        status: 404,
        category: "validation_error",
    },
    ApiErrorMatrixEntry {
        code: "invalid_license_key",
        status: 404,
        category: "validation_error",
    },
    ApiErrorMatrixEntry {
        code: "license_expired",
        status: 403,
        category: "validation_error",
    },
    ApiErrorMatrixEntry {
        code: "license_disabled",
        status: 403,
        category: "validation_error",
    },
    ApiErrorMatrixEntry {
        code: "not_found",
        status: 404,
        category: "validation_error",
    },
    ApiErrorMatrixEntry {
        code: "migration_in_progress",
        status: 409,
        category: "conflict_error",
    },
    ApiErrorMatrixEntry {
        code: "unauthorized",
        status: 401,
        category: "auth_error",
    },
    ApiErrorMatrixEntry {
        code: "forbidden",
        status: 403,
        category: "auth_error",
    },
    ApiErrorMatrixEntry {
        code: "migration_failed",
        status: 502,
        category: "remote_error",
    },
    ApiErrorMatrixEntry {
        code: "prerequisite_not_migrated",
        status: 500,
        category: "integration_error",
    },
    ApiErrorMatrixEntry {
        code: "internal_error",
        status: 500,
        category: "internal_error",
    },
];

pub fn api_error_matrix() -> &'static [ApiErrorMatrixEntry] {
    &API_ERROR_MATRIX
}
