use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

pub const DEFAULT_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_READ_ATTEMPTS: usize = 2;

/// Error codes the licensing platform returns that callers branch on.
pub mod codes {
    pub const USER_EXIST: &str = "user_exist";
    pub const INSTALL_NOT_FOUND: &str = "install_not_found";
    pub const EMPTY_LICENSE_KEY: &str = "empty_license_key";
    pub const INVALID_LICENSE_KEY: &str = "invalid_license_key";
    pub const LICENSE_EXPIRED: &str = "license_expired";
    pub const LICENSE_DISABLED: &str = "license_disabled";
    pub const NOT_FOUND: &str = "not_found";

    pub const TRANSPORT_ERROR: &str = "transport_error";
    pub const DECODE_ERROR: &str = "decode_error";
    pub const BASE_URL_MISSING: &str = "client_base_url_missing";
    pub const INVALID_PATH: &str = "client_invalid_path";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
}

impl HttpMethod {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
        }
    }

    const fn is_read(self) -> bool {
        matches!(self, Self::Get)
    }
}

/// Structured error returned by every remote call.
///
/// Transport failures have `http == 0`; bodies that are not the platform's
/// error envelope are reported as `http_<status>`.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{code}: {message}")]
pub struct ApiError {
    pub code: String,
    pub message: String,
    pub http: u16,
}

impl ApiError {
    pub fn new(code: impl Into<String>, message: impl Into<String>, http: u16) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            http,
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(codes::TRANSPORT_ERROR, message, 0)
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self::new(codes::DECODE_ERROR, message, 0)
    }

    #[must_use]
    pub fn is(&self, code: &str) -> bool {
        self.code == code
    }

    /// Builds an error from a non-success response body.
    pub fn from_response(status: StatusCode, body: &[u8]) -> Self {
        #[derive(Deserialize)]
        struct Envelope {
            error: EnvelopeError,
        }

        #[derive(Deserialize)]
        struct EnvelopeError {
            code: Option<String>,
            message: Option<String>,
            http: Option<u16>,
        }

        if let Ok(envelope) = serde_json::from_slice::<Envelope>(body) {
            return Self::new(
                envelope
                    .error
                    .code
                    .unwrap_or_else(|| format!("http_{}", status.as_u16())),
                envelope
                    .error
                    .message
                    .unwrap_or_else(|| "remote error".to_string()),
                envelope.error.http.unwrap_or(status.as_u16()),
            );
        }

        let body = non_empty_string(String::from_utf8_lossy(body).to_string())
            .unwrap_or_else(|| "<empty>".to_string());
        Self::new(format!("http_{}", status.as_u16()), body, status.as_u16())
    }
}

/// The single seam through which the migration engines reach the platform.
#[async_trait]
pub trait RemoteApi: Send + Sync {
    async fn call(&self, path: &str, method: HttpMethod, params: Value) -> Result<Value, ApiError>;
}

#[derive(Debug, Clone)]
pub struct LicensingApiConfig {
    pub base_url: String,
    pub developer_id: u64,
    pub api_token: Option<String>,
    pub timeout_ms: u64,
    pub read_attempts: usize,
}

impl LicensingApiConfig {
    #[must_use]
    pub fn new(base_url: impl Into<String>, developer_id: u64) -> Self {
        Self {
            base_url: base_url.into(),
            developer_id,
            api_token: None,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            read_attempts: DEFAULT_READ_ATTEMPTS,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LicensingApiClient {
    base_url: String,
    api_token: Option<String>,
    timeout: Duration,
    read_attempts: usize,
    http: reqwest::Client,
}

impl LicensingApiClient {
    pub fn new(config: LicensingApiConfig) -> Result<Self, ApiError> {
        let base_url = normalize_base_url(&config.base_url)?;
        Ok(Self {
            base_url: format!("{base_url}/developers/{}", config.developer_id),
            api_token: config
                .api_token
                .and_then(non_empty_string),
            timeout: Duration::from_millis(config.timeout_ms.clamp(250, 120_000)),
            read_attempts: config.read_attempts.max(1),
            http: reqwest::Client::new(),
        })
    }

    #[must_use]
    pub fn endpoint(&self, path: &str) -> Option<String> {
        let trimmed = path.trim();
        if trimmed.is_empty() {
            return None;
        }
        if trimmed.starts_with('/') {
            Some(format!("{}{}", self.base_url, trimmed))
        } else {
            Some(format!("{}/{}", self.base_url, trimmed))
        }
    }

    fn request(
        &self,
        url: &str,
        method: HttpMethod,
        params: &Value,
    ) -> reqwest::RequestBuilder {
        let builder = match method {
            HttpMethod::Get => self.http.get(url).query(&query_pairs(params)),
            HttpMethod::Post => self.http.post(url),
            HttpMethod::Put => self.http.put(url),
            HttpMethod::Delete => self.http.delete(url),
        };
        let builder = builder
            .header("x-request-id", format!("req_{}", Uuid::new_v4().simple()))
            .timeout(self.timeout);
        let builder = match self.api_token.as_deref() {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        };
        if method.is_read() || params.is_null() {
            builder
        } else {
            builder.json(params)
        }
    }
}

#[async_trait]
impl RemoteApi for LicensingApiClient {
    async fn call(&self, path: &str, method: HttpMethod, params: Value) -> Result<Value, ApiError> {
        let url = self.endpoint(path).ok_or_else(|| {
            ApiError::new(codes::INVALID_PATH, format!("invalid path `{path}`"), 0)
        })?;
        // Writes are sent once: a retried create could duplicate remote state.
        let attempts = if method.is_read() {
            self.read_attempts
        } else {
            1
        };
        let mut last_error: Option<String> = None;

        for attempt in 0..attempts {
            match self.request(url.as_str(), method, &params).send().await {
                Ok(response) => return decode_json_response(response).await,
                Err(error) => {
                    tracing::warn!(
                        method = method.as_str(),
                        path,
                        attempt,
                        reason = %error,
                        "licensing api request failed"
                    );
                    last_error = Some(error.to_string());
                }
            }
        }

        Err(ApiError::transport(
            last_error.unwrap_or_else(|| "unknown".to_string()),
        ))
    }
}

fn normalize_base_url(base_url: &str) -> Result<String, ApiError> {
    let trimmed = base_url.trim();
    if trimmed.is_empty() {
        return Err(ApiError::new(
            codes::BASE_URL_MISSING,
            "licensing api base url is empty",
            0,
        ));
    }
    Ok(trimmed.trim_end_matches('/').to_string())
}

fn query_pairs(params: &Value) -> Vec<(String, String)> {
    let Some(object) = params.as_object() else {
        return Vec::new();
    };
    object
        .iter()
        .filter_map(|(key, value)| {
            let value = match value {
                Value::Null => return None,
                Value::String(text) => text.clone(),
                other => other.to_string(),
            };
            Some((key.clone(), value))
        })
        .collect()
}

async fn decode_json_response(response: reqwest::Response) -> Result<Value, ApiError> {
    let status = response.status();
    let bytes = response
        .bytes()
        .await
        .map_err(|error| ApiError::transport(error.to_string()))?;

    if !status.is_success() {
        return Err(ApiError::from_response(status, &bytes));
    }
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Object(serde_json::Map::new()));
    }

    let value = serde_json::from_slice::<Value>(&bytes)
        .map_err(|error| ApiError::decode(error.to_string()))?;
    // Some gateways answer 200 with an error envelope.
    if let Some(error) = value.get("error").filter(|error| error.is_object()) {
        let code = error
            .get("code")
            .and_then(Value::as_str)
            .unwrap_or("remote_error");
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("remote error");
        let http = error
            .get("http")
            .and_then(Value::as_u64)
            .map_or(status.as_u16(), |http| http as u16);
        return Err(ApiError::new(code, message, http));
    }
    Ok(value)
}

fn non_empty_string(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
