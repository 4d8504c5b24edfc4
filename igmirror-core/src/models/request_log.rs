use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle of one outbound call: `pending` until the call returns, then
/// exactly one terminal status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogStatus {
    Pending,
    Success,
    Error,
    Timeout,
}

impl LogStatus {
    pub const ALL: [LogStatus; 4] = [
        LogStatus::Pending,
        LogStatus::Success,
        LogStatus::Error,
        LogStatus::Timeout,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LogStatus::Pending => "pending",
            LogStatus::Success => "success",
            LogStatus::Error => "error",
            LogStatus::Timeout => "timeout",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, LogStatus::Pending)
    }
}

impl fmt::Display for LogStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(LogStatus::Pending),
            "success" => Ok(LogStatus::Success),
            "error" => Ok(LogStatus::Error),
            "timeout" => Ok(LogStatus::Timeout),
            other => Err(format!("unknown request log status: {other}")),
        }
    }
}

impl TryFrom<String> for LogStatus {
    type Error = String;

    fn try_from(value: String) -> Result<Self, String> {
        value.parse()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct RequestLog {
    pub id: i64,
    pub method: String,
    pub url: String,
    pub request_headers: serde_json::Value,
    pub request_params: serde_json::Value,
    pub request_body: serde_json::Value,
    pub response_status_code: Option<i32>,
    pub response_headers: serde_json::Value,
    pub response_body: serde_json::Value,
    #[sqlx(try_from = "String")]
    pub status: LogStatus,
    pub duration_ms: Option<i64>,
    pub error_message: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RequestLog {
    pub fn is_successful(&self) -> bool {
        self.status == LogStatus::Success
            && (200..300).contains(&self.response_status_code.unwrap_or(0))
    }

    pub fn duration_seconds(&self) -> Option<f64> {
        match self.duration_ms {
            Some(ms) if ms > 0 => Some(ms as f64 / 1000.0),
            _ => None,
        }
    }
}

impl fmt::Display for RequestLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let endpoint = match self.url.rsplit('/').next() {
            Some(last) if !self.url.is_empty() => last,
            _ => "unknown",
        };
        write!(f, "{} {} - {}", self.method, endpoint, self.status)
    }
}
