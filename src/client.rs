// Upstream flight search API client
// One synchronous request per call; the fetcher decides what to do with each failure kind.

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

use crate::config::ApiConfig;
use crate::params::SearchParams;

const AUTH_FAILURE_MARKER: &str = "invalid api key";

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Request timeout after {0}ms")]
    Timeout(u64),

    // The only error that stops a whole batch
    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("API error: {status_code} - {message}")]
    ApiResponseError { status_code: u16, message: String },

    #[error("Upstream error: {0}")]
    UpstreamError(String),

    #[error("Deserialization error: {0}")]
    DeserializationError(String),
}

impl ApiError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, ApiError::InvalidCredentials(_))
    }
}

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Initialization error: {0}")]
    InitError(String),
}

// Classify the `error` field of an upstream payload
pub fn classify_upstream_error(status_code: u16, message: &str) -> ApiError {
    if status_code == 401 || message.to_lowercase().contains(AUTH_FAILURE_MARKER) {
        ApiError::InvalidCredentials(message.to_string())
    } else if (200..300).contains(&status_code) {
        ApiError::UpstreamError(message.to_string())
    } else {
        ApiError::ApiResponseError {
            status_code,
            message: message.to_string(),
        }
    }
}

#[async_trait]
pub trait FlightApi: Send + Sync + 'static {
    // Issue one search and return the raw JSON payload
    async fn search(&self, params: &SearchParams) -> Result<Value, ApiError>;
}

pub struct SerpApiClient {
    http: reqwest::Client,
    base_url: String,
    timeout_ms: u64,
}

impl SerpApiClient {
    pub fn new(config: &ApiConfig) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| ClientError::InitError(e.to_string()))?;
        Ok(Self {
            http,
            base_url: config.base_url.clone(),
            timeout_ms: config.timeout_ms,
        })
    }

    fn map_transport_error(&self, error: reqwest::Error) -> ApiError {
        if error.is_timeout() {
            ApiError::Timeout(self.timeout_ms)
        } else {
            ApiError::NetworkError(error.to_string())
        }
    }
}

#[async_trait]
impl FlightApi for SerpApiClient {
    async fn search(&self, params: &SearchParams) -> Result<Value, ApiError> {
        let query: Vec<(&String, &String)> = params.iter().collect();
        let response = self
            .http
            .get(&self.base_url)
            .query(&query)
            .send()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        let status = response.status();
        let body: Value = match response.json().await {
            Ok(body) => body,
            Err(e) if e.is_timeout() => return Err(ApiError::Timeout(self.timeout_ms)),
            Err(e) if status.is_success() => {
                return Err(ApiError::DeserializationError(e.to_string()))
            }
            Err(_) => {
                return Err(classify_upstream_error(
                    status.as_u16(),
                    status.canonical_reason().unwrap_or("unknown status"),
                ))
            }
        };

        if let Some(message) = body.get("error").and_then(Value::as_str) {
            return Err(classify_upstream_error(status.as_u16(), message));
        }
        if !status.is_success() {
            return Err(classify_upstream_error(status.as_u16(), status.as_str()));
        }

        Ok(body)
    }
}
