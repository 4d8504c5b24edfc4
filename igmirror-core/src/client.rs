//! HTTP client wrapper for provider APIs.
//!
//! Every call goes through the [`RequestLogSink`]: the log row is opened
//! before the request is sent and finalized once the call returns. Responses
//! with a 4xx/5xx status are logged as `success` (the provider did answer)
//! and only then turned into [`ApiError::Status`].

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, Method, StatusCode};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::error::MirrorError;
use crate::models::LogStatus;
use crate::request_log::{
    body_to_json, headers_to_json, LogCompletion, LogFailure, NewRequestLog, PartialResponse,
    RequestLogSink,
};
use crate::settings::CoreApiSettings;

/// Per-request timeout used when the caller does not pick one.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

// ============================================================================
// Error types
// ============================================================================

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    Configuration(String),

    #[error("Request timeout: {0}")]
    Timeout(#[source] reqwest::Error),

    #[error("Network error: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("HTTP status {status} for url {url}")]
    Status { status: u16, url: String, body: Value },

    #[error("Invalid JSON in response: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("Store error: {0}")]
    Store(#[from] MirrorError),
}

impl ApiError {
    /// Timeouts and network failures, as opposed to answers from the provider.
    pub fn is_transport(&self) -> bool {
        matches!(self, ApiError::Timeout(_) | ApiError::Transport(_))
    }
}

// ============================================================================
// ProviderEndpoint
// ============================================================================

/// Resolved base URL + bearer token for one provider.
///
/// Built from a fresh settings read right before a session is created.
#[derive(Debug, Clone)]
pub struct ProviderEndpoint {
    base_url: String,
    token: String,
}

impl ProviderEndpoint {
    /// `label` names the provider in configuration error messages.
    pub fn new(
        label: &str,
        base_url: impl Into<String>,
        token: impl Into<String>,
    ) -> Result<Self, ApiError> {
        let base_url = base_url.into();
        let token = token.into();

        if base_url.trim().is_empty() {
            return Err(ApiError::Configuration(format!(
                "{label} URL is not configured in settings"
            )));
        }
        if token.trim().is_empty() {
            return Err(ApiError::Configuration(format!(
                "{label} token is not configured in settings"
            )));
        }

        Ok(Self {
            base_url: base_url.trim().to_string(),
            token: token.trim().to_string(),
        })
    }

    pub fn core_api(settings: &CoreApiSettings) -> Result<Self, ApiError> {
        Self::new("Core API", &settings.api_url, &settings.api_token)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `{base}/{endpoint}` with exactly one slash between the two.
    pub fn url_for(&self, endpoint: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            endpoint.trim_start_matches('/')
        )
    }
}

// ============================================================================
// ApiClient
// ============================================================================

/// A provider answer with a non-error status.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub text: String,
}

impl ApiResponse {
    pub fn json(&self) -> Result<Value, ApiError> {
        Ok(serde_json::from_str(&self.text)?)
    }
}

/// Authenticated session against one provider endpoint.
#[derive(Clone)]
pub struct ApiClient {
    http: Client,
    endpoint: ProviderEndpoint,
    session_headers: HeaderMap,
    log: Arc<dyn RequestLogSink>,
}

impl ApiClient {
    pub fn new(endpoint: ProviderEndpoint, log: Arc<dyn RequestLogSink>) -> Result<Self, ApiError> {
        let mut session_headers = HeaderMap::new();
        let bearer = HeaderValue::from_str(&format!("Bearer {}", endpoint.token)).map_err(|_| {
            ApiError::Configuration("Provider token contains invalid header characters".into())
        })?;
        session_headers.insert(AUTHORIZATION, bearer);
        session_headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let http = Client::builder()
            .default_headers(session_headers.clone())
            .build()
            .map_err(ApiError::Transport)?;

        Ok(Self {
            http,
            endpoint,
            session_headers,
            log,
        })
    }

    pub fn endpoint(&self) -> &ProviderEndpoint {
        &self.endpoint
    }

    /// GET with query parameters and the default timeout.
    pub async fn get(
        &self,
        endpoint: &str,
        params: Option<&Map<String, Value>>,
    ) -> Result<ApiResponse, ApiError> {
        self.request("GET", endpoint, None, params, DEFAULT_TIMEOUT).await
    }

    /// Issue one request and record it in the request log.
    pub async fn request(
        &self,
        method: &str,
        endpoint: &str,
        data: Option<&Value>,
        params: Option<&Map<String, Value>>,
        timeout: Duration,
    ) -> Result<ApiResponse, ApiError> {
        let method_name = method.to_uppercase();
        let method = Method::from_bytes(method_name.as_bytes()).map_err(|_| {
            ApiError::Configuration(format!("Unsupported HTTP method: {method_name}"))
        })?;
        let url = self.endpoint.url_for(endpoint);

        let log_id = self
            .log
            .begin(NewRequestLog {
                method: method_name.clone(),
                url: url.clone(),
                headers: headers_to_json(&self.session_headers),
                params: params
                    .map(|p| Value::Object(p.clone()))
                    .unwrap_or_else(|| serde_json::json!({})),
                body: data.cloned().unwrap_or_else(|| serde_json::json!({})),
            })
            .await?;

        let start = Instant::now();

        let mut request = self.http.request(method, &url).timeout(timeout);
        if let Some(p) = params {
            request = request.query(p);
        }
        if let Some(d) = data {
            request = request.json(d);
        }

        let response = match request.send().await {
            Ok(r) => r,
            Err(e) => return Err(self.record_failure(log_id, start, e, None).await),
        };

        let status = response.status();
        let headers = response.headers().clone();

        let text = match response.text().await {
            Ok(t) => t,
            Err(e) => {
                let partial = PartialResponse {
                    status_code: status.as_u16(),
                    headers: headers_to_json(&headers),
                    body: serde_json::json!({}),
                };
                return Err(self.record_failure(log_id, start, e, Some(partial)).await);
            }
        };

        let body = body_to_json(&text);
        self.log
            .complete(
                log_id,
                LogCompletion {
                    status_code: status.as_u16(),
                    headers: headers_to_json(&headers),
                    body: body.clone(),
                    duration_ms: elapsed_ms(start),
                },
            )
            .await?;

        if status.is_client_error() || status.is_server_error() {
            tracing::error!(
                status = status.as_u16(),
                url = %url,
                "Provider API returned an error status"
            );
            return Err(ApiError::Status {
                status: status.as_u16(),
                url,
                body,
            });
        }

        Ok(ApiResponse {
            status,
            headers,
            text,
        })
    }

    async fn record_failure(
        &self,
        log_id: i64,
        start: Instant,
        error: reqwest::Error,
        partial: Option<PartialResponse>,
    ) -> ApiError {
        let timed_out = error.is_timeout();
        let partial = partial.or_else(|| {
            error.status().map(|s| PartialResponse {
                status_code: s.as_u16(),
                headers: serde_json::json!({}),
                body: serde_json::json!({}),
            })
        });

        let failure = LogFailure {
            status: if timed_out {
                LogStatus::Timeout
            } else {
                LogStatus::Error
            },
            error_message: error.to_string(),
            duration_ms: elapsed_ms(start),
            partial,
        };

        if let Err(log_err) = self.log.fail(log_id, failure).await {
            tracing::error!(log_id, error = %log_err, "Failed to finalize request log");
            return ApiError::Store(log_err);
        }

        if timed_out {
            tracing::error!(error = %error, "Provider API request timeout");
            ApiError::Timeout(error)
        } else {
            tracing::error!(error = %error, "Provider API request failed");
            ApiError::Transport(error)
        }
    }
}

fn elapsed_ms(start: Instant) -> i64 {
    start.elapsed().as_millis() as i64
}

// ============================================================================
// TESTS
// ============================================================================
