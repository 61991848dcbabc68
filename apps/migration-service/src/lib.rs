#![forbid(unsafe_code)]

use std::sync::Arc;

use anyhow::{Context, Result};
use licensing_api_client::LicensingApiClient;
use tokio::net::TcpListener;
use tracing::info;

use crate::{
    config::Config,
    db::MappingDb,
    mapping::{EntityMapper, MappingStore, store},
    remote::LicensingRemote,
    server::{AppState, build_router},
    source::{ExportedStorefront, SourcePlatform},
};

pub mod api_envelope;
pub mod catalog;
pub mod config;
pub mod db;
pub mod endpoint;
pub mod engine;
pub mod licensing;
pub mod mapping;
pub mod remote;
pub mod server;
pub mod source;

#[cfg(test)]
mod fake_platform;
#[cfg(test)]
mod fixtures;

/// Services shared by the HTTP server and the operator CLI.
pub struct MigrationServices {
    pub mapper: EntityMapper,
    pub source: Arc<dyn SourcePlatform>,
    pub remote: LicensingRemote,
}

pub async fn build_mapping_store(config: &Config) -> Result<Arc<dyn MappingStore>> {
    match config.db_url.as_deref() {
        Some(url) => {
            let db = MappingDb::connect(url).await?;
            db.ensure_schema().await?;
            Ok(store::postgres(Arc::new(db)))
        }
        None => Ok(store::memory()),
    }
}

pub fn load_source(config: &Config) -> Result<Arc<dyn SourcePlatform>> {
    let storefront = match config.legacy_export_path.as_deref() {
        Some(path) => ExportedStorefront::from_path(path, &config.namespace)
            .with_context(|| format!("load storefront export {}", path.display()))?,
        None => ExportedStorefront::empty(config.namespace.clone()),
    };
    Ok(Arc::new(storefront))
}

pub async fn build_services(config: &Config) -> Result<MigrationServices> {
    let store = build_mapping_store(config).await?;
    let mapper = EntityMapper::new(config.namespace.clone(), store);
    let source = load_source(config)?;
    let client = LicensingApiClient::new(config.remote_api_config()?)
        .context("build licensing api client")?;
    Ok(MigrationServices {
        mapper,
        source,
        remote: LicensingRemote::new(Arc::new(client)),
    })
}

pub async fn build_state(config: Config) -> Result<AppState> {
    let services = build_services(&config).await?;
    Ok(AppState::new(
        config,
        services.mapper,
        services.source,
        services.remote,
    ))
}

pub async fn build_app(config: Config) -> Result<axum::Router> {
    Ok(build_router(build_state(config).await?))
}

pub async fn serve(config: Config) -> Result<()> {
    let listener = TcpListener::bind(config.bind_addr).await?;
    info!(
        service = %config.service_name,
        bind_addr = %config.bind_addr,
        namespace = %config.namespace,
        "migration service listening"
    );
    axum::serve(listener, build_app(config).await?).await?;
    Ok(())
}
