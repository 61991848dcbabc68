use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode, header::AUTHORIZATION},
    routing::{delete, get, post},
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tower::ServiceBuilder;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::api_envelope::{ApiDataEnvelope, ok_data};
use crate::catalog::{CatalogSync, ModuleSyncReport};
use crate::config::Config;
use crate::endpoint::{MigrationEndpoint, MigrationError, MigrationRequest, MigrationResponse};
use crate::licensing::{LicenseMigration, RenewalOutcome};
use crate::mapping::{EntityMapper, EntityType, MappingRecord};
use crate::remote::LicensingRemote;
use crate::source::{LocalPayment, SourcePlatform};

#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    mapper: EntityMapper,
    source: Arc<dyn SourcePlatform>,
    endpoint: MigrationEndpoint,
    catalog: CatalogSync,
    started_at: chrono::DateTime<Utc>,
}

impl AppState {
    #[must_use]
    pub fn new(
        config: Config,
        mapper: EntityMapper,
        source: Arc<dyn SourcePlatform>,
        remote: LicensingRemote,
    ) -> Self {
        let licenses = LicenseMigration::new(mapper.clone(), remote.clone());
        let endpoint = MigrationEndpoint::new(mapper.clone(), source.clone(), licenses);
        let catalog = CatalogSync::new(mapper.clone(), remote);
        Self {
            config: Arc::new(config),
            mapper,
            source,
            endpoint,
            catalog,
            started_at: Utc::now(),
        }
    }
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    service: String,
    build_sha: String,
    namespace: String,
    store_driver: &'static str,
    uptime_seconds: i64,
}

#[derive(Debug, Serialize)]
struct ReadinessResponse {
    status: &'static str,
    store_driver: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RenewalWebhookBody {
    subscription_id: String,
    payment: LocalPayment,
}

#[derive(Debug, Default, Deserialize)]
struct SyncQuery {
    #[serde(default)]
    flush: bool,
}

#[derive(Debug, Serialize)]
struct ClearMappingResponse {
    namespace: String,
    removed: u64,
}

type ApiResult<T> = Result<(StatusCode, Json<ApiDataEnvelope<T>>), MigrationError>;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(health))
        .route("/readyz", get(readiness))
        .route("/v1/modules/:module_id/migrate", post(migrate))
        .route(
            "/v1/modules/:module_id/webhooks/renewal",
            post(renewal_webhook),
        )
        .route(
            "/v1/admin/modules/:local_module_id/sync",
            post(admin_sync_module),
        )
        .route(
            "/v1/admin/mappings/:entity_type/:local_id",
            get(admin_show_mapping),
        )
        .route("/v1/admin/mappings", delete(admin_clear_mapping))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(PropagateRequestIdLayer::x_request_id())
                .layer(TraceLayer::new_for_http()),
        )
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let uptime_seconds = (Utc::now() - state.started_at).num_seconds().max(0);
    Json(HealthResponse {
        status: "ok",
        service: state.config.service_name.clone(),
        build_sha: state.config.build_sha.clone(),
        namespace: state.mapper.namespace().to_string(),
        store_driver: state.mapper.store_driver(),
        uptime_seconds,
    })
}

async fn readiness(State(state): State<AppState>) -> (StatusCode, Json<ReadinessResponse>) {
    let store_driver = state.mapper.store_driver();
    match state.mapper.ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(ReadinessResponse {
                status: "ready",
                store_driver,
                reason: None,
            }),
        ),
        Err(error) => {
            warn!(reason = %error, store_driver, "mapping store is not reachable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ReadinessResponse {
                    status: "not_ready",
                    store_driver,
                    reason: Some("mapping store unreachable".to_string()),
                }),
            )
        }
    }
}

async fn migrate(
    State(state): State<AppState>,
    Path(module_id): Path<String>,
    body: Bytes,
) -> ApiResult<MigrationResponse> {
    let remote_module_id = parse_module_id(&module_id)?;
    let request: MigrationRequest = serde_json::from_slice(&body).map_err(|error| {
        MigrationError::InvalidRequest(format!("request body is not valid JSON: {error}"))
    })?;
    let response = state.endpoint.migrate(remote_module_id, request).await?;
    info!(remote_module_id, "migration request completed");
    Ok(ok_data(response))
}

async fn renewal_webhook(
    State(state): State<AppState>,
    Path(module_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<RenewalOutcome> {
    authorize_admin(&state, &headers)?;
    let remote_module_id = parse_module_id(&module_id)?;
    let body: RenewalWebhookBody = serde_json::from_slice(&body).map_err(|error| {
        MigrationError::InvalidRequest(format!("renewal body is invalid: {error}"))
    })?;
    let outcome = state
        .endpoint
        .migrate_renewal(remote_module_id, &body.subscription_id, &body.payment)
        .await?;
    Ok(ok_data(outcome))
}

async fn admin_sync_module(
    State(state): State<AppState>,
    Path(local_module_id): Path<String>,
    Query(query): Query<SyncQuery>,
    headers: HeaderMap,
) -> ApiResult<ModuleSyncReport> {
    authorize_admin(&state, &headers)?;
    let module = state
        .source
        .module(&local_module_id)
        .await?
        .ok_or_else(|| {
            MigrationError::NotFound(format!("module `{local_module_id}` does not exist"))
        })?;
    let report = state.catalog.sync_module(&module, query.flush).await?;
    Ok(ok_data(report))
}

async fn admin_show_mapping(
    State(state): State<AppState>,
    Path((entity_type, local_id)): Path<(String, String)>,
    headers: HeaderMap,
) -> ApiResult<MappingRecord> {
    authorize_admin(&state, &headers)?;
    let entity_type = entity_type
        .parse::<EntityType>()
        .map_err(|error| MigrationError::InvalidRequest(error.to_string()))?;
    let record = state
        .mapper
        .get(entity_type, &local_id)
        .await?
        .ok_or_else(|| {
            MigrationError::NotFound(format!("no {entity_type} mapping for `{local_id}`"))
        })?;
    Ok(ok_data(record))
}

async fn admin_clear_mapping(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<ClearMappingResponse> {
    authorize_admin(&state, &headers)?;
    let removed = state.mapper.clear_mapping().await?;
    Ok(ok_data(ClearMappingResponse {
        namespace: state.mapper.namespace().to_string(),
        removed,
    }))
}

fn parse_module_id(raw: &str) -> Result<u64, MigrationError> {
    raw.trim().parse::<u64>().map_err(|_| {
        MigrationError::InvalidRequest(format!("module id `{raw}` is not a number"))
    })
}

fn authorize_admin(state: &AppState, headers: &HeaderMap) -> Result<(), MigrationError> {
    let Some(expected) = state.config.admin_token.as_deref() else {
        return Err(MigrationError::Forbidden(
            "admin routes are disabled".to_string(),
        ));
    };
    match bearer_token(headers) {
        Some(token) if token == expected => Ok(()),
        _ => Err(MigrationError::Unauthorized(
            "admin bearer token is missing or invalid".to_string(),
        )),
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let authorization = headers.get(AUTHORIZATION)?.to_str().ok()?.trim();
    let token = authorization.strip_prefix("Bearer ")?.trim();
    if token.is_empty() { None } else { Some(token) }
}
