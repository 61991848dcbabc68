use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::Mutex;
use tokio_postgres::{Client, NoTls};

const ENTITY_MAPPINGS_SCHEMA: &str = include_str!("../migrations/0001_entity_mappings.sql");

#[derive(Clone)]
pub struct MappingDb {
    client: Arc<Mutex<Client>>,
}

impl MappingDb {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let (client, connection) = tokio_postgres::connect(database_url, NoTls)
            .await
            .context("connect to postgres")?;

        tokio::spawn(async move {
            if let Err(error) = connection.await {
                tracing::error!(reason = %error, "mapping postgres connection error");
            }
        });

        Ok(Self {
            client: Arc::new(Mutex::new(client)),
        })
    }

    /// Applies the mapping table schema; safe to run on every start.
    pub async fn ensure_schema(&self) -> Result<()> {
        let client = self.client.lock().await;
        client
            .batch_execute(ENTITY_MAPPINGS_SCHEMA)
            .await
            .context("apply entity mapping schema")
    }

    pub fn client(&self) -> Arc<Mutex<Client>> {
        self.client.clone()
    }
}
