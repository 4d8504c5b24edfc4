//! Request logger: one durable audit row per outbound provider call.
//!
//! A row is created in `pending` state before the request is sent and is
//! finalized exactly once with `success`, `error` or `timeout`. Finalization
//! is guarded by `WHERE status = 'pending'`, so a second attempt is rejected
//! with [`MirrorError::LogFinalized`] and leaves the row untouched.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, AUTHORIZATION};
use serde_json::{Map, Value};
use sqlx::PgPool;

use crate::error::MirrorError;
use crate::models::{LogStatus, RequestLog};

/// Key under which an unparseable response body is stored.
pub const RAW_CONTENT_KEY: &str = "raw_content";

/// Number of characters of a non-JSON body kept in the log.
pub const RAW_CONTENT_LIMIT: usize = 1000;

/// Request side of a log row, captured before sending.
#[derive(Debug, Clone)]
pub struct NewRequestLog {
    pub method: String,
    pub url: String,
    pub headers: Value,
    pub params: Value,
    pub body: Value,
}

/// Response fields captured when the provider answered.
#[derive(Debug, Clone)]
pub struct LogCompletion {
    pub status_code: u16,
    pub headers: Value,
    pub body: Value,
    pub duration_ms: i64,
}

/// Whatever part of a response an errored call still carried.
#[derive(Debug, Clone)]
pub struct PartialResponse {
    pub status_code: u16,
    pub headers: Value,
    pub body: Value,
}

#[derive(Debug, Clone)]
pub struct LogFailure {
    pub status: LogStatus,
    pub error_message: String,
    pub duration_ms: i64,
    pub partial: Option<PartialResponse>,
}

/// Sink the HTTP client wrapper reports every call to.
#[async_trait]
pub trait RequestLogSink: Send + Sync {
    /// Create the `pending` row and return its id.
    async fn begin(&self, entry: NewRequestLog) -> Result<i64, MirrorError>;

    /// Finalize as `success` with the received response.
    async fn complete(&self, id: i64, completion: LogCompletion) -> Result<(), MirrorError>;

    /// Finalize as `error` or `timeout`.
    async fn fail(&self, id: i64, failure: LogFailure) -> Result<(), MirrorError>;
}

/// Operator read access to the log.
#[async_trait]
pub trait RequestLogReader: Send + Sync {
    /// Most recent rows first.
    async fn list_recent(&self, limit: i64) -> Result<Vec<RequestLog>, MirrorError>;

    async fn get(&self, id: i64) -> Result<Option<RequestLog>, MirrorError>;
}

/// Parse a response body as JSON, falling back to the truncated raw text
/// under [`RAW_CONTENT_KEY`].
pub fn body_to_json(text: &str) -> Value {
    match serde_json::from_str::<Value>(text) {
        Ok(v) => v,
        Err(_) => {
            let truncated: String = text.chars().take(RAW_CONTENT_LIMIT).collect();
            serde_json::json!({ RAW_CONTENT_KEY: truncated })
        }
    }
}

/// Convert a header map into a JSON object, masking the bearer secret.
pub fn headers_to_json(headers: &HeaderMap) -> Value {
    let mut map = Map::new();
    for (name, value) in headers {
        let text = if *name == AUTHORIZATION {
            mask_authorization(value.to_str().unwrap_or_default())
        } else {
            String::from_utf8_lossy(value.as_bytes()).into_owned()
        };
        map.insert(name.as_str().to_string(), Value::String(text));
    }
    Value::Object(map)
}

fn mask_authorization(value: &str) -> String {
    match value.split_once(' ') {
        Some((scheme, _)) => format!("{scheme} ***"),
        None => "***".to_string(),
    }
}

// ============================================================================
// PostgreSQL sink
// ============================================================================

#[derive(Clone)]
pub struct PgRequestLog {
    pool: PgPool,
}

impl PgRequestLog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RequestLogReader for PgRequestLog {
    async fn list_recent(&self, limit: i64) -> Result<Vec<RequestLog>, MirrorError> {
        let rows = sqlx::query_as::<_, RequestLog>(
            "SELECT * FROM api_request_logs ORDER BY created_at DESC, id DESC LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn get(&self, id: i64) -> Result<Option<RequestLog>, MirrorError> {
        let row = sqlx::query_as::<_, RequestLog>("SELECT * FROM api_request_logs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }
}

#[async_trait]
impl RequestLogSink for PgRequestLog {
    async fn begin(&self, entry: NewRequestLog) -> Result<i64, MirrorError> {
        let row: (i64,) = sqlx::query_as(
            r#"
            INSERT INTO api_request_logs
                (method, url, request_headers, request_params, request_body, status)
            VALUES ($1, $2, $3, $4, $5, 'pending')
            RETURNING id
            "#,
        )
        .bind(&entry.method)
        .bind(&entry.url)
        .bind(&entry.headers)
        .bind(&entry.params)
        .bind(&entry.body)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.0)
    }

    async fn complete(&self, id: i64, completion: LogCompletion) -> Result<(), MirrorError> {
        let result = sqlx::query(
            r#"
            UPDATE api_request_logs
            SET status = 'success',
                response_status_code = $2,
                response_headers = $3,
                response_body = $4,
                duration_ms = $5,
                updated_at = NOW()
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(id)
        .bind(completion.status_code as i32)
        .bind(&completion.headers)
        .bind(&completion.body)
        .bind(completion.duration_ms)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(MirrorError::LogFinalized(id));
        }
        Ok(())
    }

    async fn fail(&self, id: i64, failure: LogFailure) -> Result<(), MirrorError> {
        if !matches!(failure.status, LogStatus::Error | LogStatus::Timeout) {
            return Err(MirrorError::Other(format!(
                "request log cannot fail with status {}",
                failure.status
            )));
        }

        let (code, headers, body) = match failure.partial {
            Some(p) => (Some(p.status_code as i32), p.headers, p.body),
            None => (None, serde_json::json!({}), serde_json::json!({})),
        };

        let result = sqlx::query(
            r#"
            UPDATE api_request_logs
            SET status = $2,
                error_message = $3,
                duration_ms = $4,
                response_status_code = COALESCE($5, response_status_code),
                response_headers = $6,
                response_body = $7,
                updated_at = NOW()
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(id)
        .bind(failure.status.as_str())
        .bind(&failure.error_message)
        .bind(failure.duration_ms)
        .bind(code)
        .bind(&headers)
        .bind(&body)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(MirrorError::LogFinalized(id));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::{HeaderValue, CONTENT_TYPE};

    #[test]
    fn test_body_to_json_parses_structured_body() {
        let v = body_to_json(r#"{"data": {"status": true}}"#);
        assert_eq!(v["data"]["status"], true);
    }

    #[test]
    fn test_body_to_json_truncates_raw_text() {
        let text = "x".repeat(2500);
        let v = body_to_json(&text);
        let raw = v[RAW_CONTENT_KEY].as_str().unwrap();
        assert_eq!(raw.len(), RAW_CONTENT_LIMIT);
    }

    #[test]
    fn test_body_to_json_truncates_by_chars_not_bytes() {
        let text = "é".repeat(1200);
        let v = body_to_json(&text);
        assert_eq!(v[RAW_CONTENT_KEY].as_str().unwrap().chars().count(), 1000);
    }

    #[test]
    fn test_headers_to_json_masks_bearer_token() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer s3cr3t"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let v = headers_to_json(&headers);
        assert_eq!(v["authorization"], "Bearer ***");
        assert_eq!(v["content-type"], "application/json");
    }
}
