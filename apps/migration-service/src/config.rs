use std::{
    env,
    net::{AddrParseError, SocketAddr},
    path::PathBuf,
};

use licensing_api_client::LicensingApiConfig;
use thiserror::Error;

const DEFAULT_BIND_ADDR: &str = "127.0.0.1:4200";
const DEFAULT_NAMESPACE: &str = "edd";
const DEFAULT_REMOTE_BASE_URL: &str = "https://api.licensing.example/v1";
const DEFAULT_REMOTE_TIMEOUT_MS: u64 = 10_000;
const MIN_REMOTE_TIMEOUT_MS: u64 = 250;
const MAX_REMOTE_TIMEOUT_MS: u64 = 120_000;
const DEFAULT_REMOTE_READ_ATTEMPTS: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl LogFormat {
    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "text" | "" => Some(Self::Text),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    pub service_name: String,
    pub bind_addr: SocketAddr,
    pub build_sha: String,
    pub db_url: Option<String>,
    pub namespace: String,
    pub legacy_export_path: Option<PathBuf>,
    pub remote_base_url: String,
    pub remote_developer_id: Option<u64>,
    pub remote_api_token: Option<String>,
    pub remote_timeout_ms: u64,
    pub remote_read_attempts: usize,
    pub admin_token: Option<String>,
    pub log_format: LogFormat,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid MIGRATION_BIND_ADDR: {0}")]
    BindAddrParse(#[from] AddrParseError),
    #[error("invalid MIGRATION_NAMESPACE `{0}`: expected non-empty [a-z0-9_-]")]
    InvalidNamespace(String),
    #[error("invalid {key}: {message}")]
    InvalidNumber { key: &'static str, message: String },
    #[error("invalid MIGRATION_LOG_FORMAT `{0}`: expected text or json")]
    InvalidLogFormat(String),
    #[error("MIGRATION_REMOTE_DEVELOPER_ID is required")]
    MissingDeveloperId,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let bind_addr = lookup("MIGRATION_BIND_ADDR")
            .and_then(non_empty)
            .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string())
            .parse::<SocketAddr>()?;
        let service_name = lookup("MIGRATION_SERVICE_NAME")
            .and_then(non_empty)
            .unwrap_or_else(|| "storefront-migration".to_string());
        let build_sha = lookup("MIGRATION_BUILD_SHA")
            .and_then(non_empty)
            .unwrap_or_else(|| "dev".to_string());
        let db_url = lookup("DB_URL")
            .and_then(non_empty)
            .or_else(|| lookup("DATABASE_URL").and_then(non_empty));

        let namespace = lookup("MIGRATION_NAMESPACE")
            .map(|value| value.trim().to_string())
            .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string());
        if !is_valid_namespace(&namespace) {
            return Err(ConfigError::InvalidNamespace(namespace));
        }

        let legacy_export_path = lookup("MIGRATION_LEGACY_EXPORT_PATH")
            .and_then(non_empty)
            .map(PathBuf::from);
        let remote_base_url = lookup("MIGRATION_REMOTE_BASE_URL")
            .and_then(non_empty)
            .unwrap_or_else(|| DEFAULT_REMOTE_BASE_URL.to_string());
        let remote_developer_id =
            parse_optional_number::<u64>(&lookup, "MIGRATION_REMOTE_DEVELOPER_ID")?;
        let remote_api_token = lookup("MIGRATION_REMOTE_API_TOKEN").and_then(non_empty);
        let remote_timeout_ms =
            parse_optional_number::<u64>(&lookup, "MIGRATION_REMOTE_TIMEOUT_MS")?
                .unwrap_or(DEFAULT_REMOTE_TIMEOUT_MS)
                .clamp(MIN_REMOTE_TIMEOUT_MS, MAX_REMOTE_TIMEOUT_MS);
        let remote_read_attempts =
            parse_optional_number::<usize>(&lookup, "MIGRATION_REMOTE_READ_ATTEMPTS")?
                .unwrap_or(DEFAULT_REMOTE_READ_ATTEMPTS)
                .max(1);
        let admin_token = lookup("MIGRATION_ADMIN_TOKEN").and_then(non_empty);

        let raw_log_format = lookup("MIGRATION_LOG_FORMAT").unwrap_or_default();
        let log_format = LogFormat::parse(&raw_log_format)
            .ok_or(ConfigError::InvalidLogFormat(raw_log_format))?;

        Ok(Self {
            service_name,
            bind_addr,
            build_sha,
            db_url,
            namespace,
            legacy_export_path,
            remote_base_url,
            remote_developer_id,
            remote_api_token,
            remote_timeout_ms,
            remote_read_attempts,
            admin_token,
            log_format,
        })
    }

    /// Client settings for the licensing platform. Fails when no developer
    /// scope is configured.
    pub fn remote_api_config(&self) -> Result<LicensingApiConfig, ConfigError> {
        let developer_id = self
            .remote_developer_id
            .ok_or(ConfigError::MissingDeveloperId)?;
        let mut config = LicensingApiConfig::new(self.remote_base_url.clone(), developer_id);
        config.api_token = self.remote_api_token.clone();
        config.timeout_ms = self.remote_timeout_ms;
        config.read_attempts = self.remote_read_attempts;
        Ok(config)
    }

    #[cfg(test)]
    pub fn for_tests() -> Self {
        Self {
            service_name: "migration-test".to_string(),
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            build_sha: "test".to_string(),
            db_url: None,
            namespace: DEFAULT_NAMESPACE.to_string(),
            legacy_export_path: None,
            remote_base_url: DEFAULT_REMOTE_BASE_URL.to_string(),
            remote_developer_id: Some(7),
            remote_api_token: None,
            remote_timeout_ms: DEFAULT_REMOTE_TIMEOUT_MS,
            remote_read_attempts: DEFAULT_REMOTE_READ_ATTEMPTS,
            admin_token: Some("admin-secret".to_string()),
            log_format: LogFormat::Text,
        }
    }
}

fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn is_valid_namespace(namespace: &str) -> bool {
    !namespace.is_empty()
        && namespace.bytes().all(|byte| {
            byte.is_ascii_lowercase() || byte.is_ascii_digit() || matches!(byte, b'_' | b'-')
        })
}

fn parse_optional_number<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    lookup(key)
        .and_then(non_empty)
        .map(|raw| {
            raw.parse::<T>().map_err(|error| ConfigError::InvalidNumber {
                key,
                message: error.to_string(),
            })
        })
        .transpose()
}
