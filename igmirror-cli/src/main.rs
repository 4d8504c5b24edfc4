//! igmirror-cli: operator frontend for the igmirror REST API
//!
//! # Subcommands
//! - `status`: server health
//! - `update-profile <id>`: sync one profile now
//! - `update-stories <id>`: queue a story sync
//! - `job <id>`: status of a queued job
//! - `logs [-n <limit>] [--json]`: recent outbound API calls
//! - `log <id>`: one request log in full
//! - `settings get|set|check <provider>`: provider settings

use clap::{Parser, Subcommand};
use serde::Deserialize;
use serde_json::Value;

const DEFAULT_SERVER: &str = "http://127.0.0.1:8000";
const DEFAULT_LIMIT: i64 = 20;

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Debug, Parser)]
#[command(name = "igmirror-cli", version, about = "igmirror operator CLI")]
struct Cli {
    /// igmirror HTTP server URL (overrides IGMIRROR_HTTP_URL env var)
    #[arg(long, env = "IGMIRROR_HTTP_URL", default_value = DEFAULT_SERVER)]
    server: String,

    /// Access token issued by /login-with-google/
    #[arg(long, env = "IGMIRROR_TOKEN", hide_env_values = true)]
    token: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Show server health
    Status,

    /// Refresh one profile from the Core API right away
    UpdateProfile {
        /// Profile id (UUID)
        id: String,
    },

    /// Queue a story sync for one profile
    UpdateStories {
        /// Profile id (UUID)
        id: String,
    },

    /// Show the status of a queued sync job
    Job {
        /// Job id returned by update-stories
        id: String,
    },

    /// List recent outbound API calls
    Logs {
        #[arg(short = 'n', long, default_value_t = DEFAULT_LIMIT)]
        limit: i64,

        /// Print the raw JSON response
        #[arg(long)]
        json: bool,
    },

    /// Show one request log in full
    Log { id: i64 },

    /// Read, update or check provider settings
    Settings {
        #[command(subcommand)]
        action: SettingsAction,
    },
}

#[derive(Debug, Subcommand)]
enum SettingsAction {
    /// Show settings with secrets masked
    Get { provider: String },

    /// Update settings from a JSON object; omitted keys keep their value
    Set {
        provider: String,
        /// e.g. '{"api_url": "https://...", "api_token": "..."}'
        json: String,
    },

    /// Validate settings and probe the provider
    Check { provider: String },
}

// ============================================================================
// API Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct LogRow {
    pub id: i64,
    pub method: String,
    pub url: String,
    pub status: String,
    pub response_status_code: Option<i32>,
    pub duration_ms: Option<i64>,
    pub created_at: String,
    #[serde(default)]
    pub error_message: String,
}

#[derive(Debug, Deserialize)]
pub struct LogList {
    pub count: usize,
    pub results: Vec<LogRow>,
}

/// One table line for `logs`.
pub fn format_log_row(r: &LogRow) -> String {
    let code = r
        .response_status_code
        .map(|c| c.to_string())
        .unwrap_or_else(|| "-".to_string());
    let duration = r
        .duration_ms
        .map(|ms| format!("{ms}ms"))
        .unwrap_or_else(|| "-".to_string());
    let mut line = format!(
        "{:>6}  {:<7} {:<6} {:>4} {:>8}  {}",
        r.id, r.status, r.method, code, duration, r.url
    );
    if !r.error_message.is_empty() {
        let err: String = r.error_message.chars().take(80).collect();
        line.push_str(&format!("  ({err})"));
    }
    line
}

/// The `error`/`detail` field of an error body, or the raw text.
pub fn error_text(body: &str) -> String {
    match serde_json::from_str::<Value>(body) {
        Ok(v) => v["error"]
            .as_str()
            .or_else(|| v["detail"].as_str())
            .map(str::to_string)
            .unwrap_or_else(|| body.to_string()),
        Err(_) => body.to_string(),
    }
}

// ============================================================================
// HTTP Client Calls
// ============================================================================

struct Api {
    server: String,
    token: Option<String>,
    client: reqwest::blocking::Client,
}

impl Api {
    fn new(server: &str, token: Option<String>) -> anyhow::Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()?;
        Ok(Self {
            server: server.trim_end_matches('/').to_string(),
            token,
            client,
        })
    }

    fn send(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<&Value>,
    ) -> anyhow::Result<Value> {
        let url = format!("{}{}", self.server, path);
        let mut req = self.client.request(method, &url);
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }
        if let Some(b) = body {
            req = req.json(b);
        }

        let resp = req
            .send()
            .map_err(|e| anyhow::anyhow!("connection failed to {}: {}", url, e))?;
        let status = resp.status();
        let text = resp.text().unwrap_or_default();

        if !status.is_success() {
            anyhow::bail!("server returned {}: {}", status, error_text(&text));
        }
        Ok(serde_json::from_str(&text).unwrap_or(Value::Null))
    }

    fn get(&self, path: &str) -> anyhow::Result<Value> {
        self.send(reqwest::Method::GET, path, None)
    }

    fn post(&self, path: &str) -> anyhow::Result<Value> {
        self.send(reqwest::Method::POST, path, None)
    }

    fn put(&self, path: &str, body: &Value) -> anyhow::Result<Value> {
        self.send(reqwest::Method::PUT, path, Some(body))
    }
}

fn print_json(v: &Value) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(v)?);
    Ok(())
}

fn do_status(api: &Api) -> anyhow::Result<()> {
    let body = api.get("/health")?;
    println!("igmirror server: {}", body["status"].as_str().unwrap_or("unknown"));
    println!("Version:         {}", body["version"].as_str().unwrap_or("?"));
    println!("PostgreSQL:      {}", body["postgresql"].as_str().unwrap_or("?"));
    if let Some(n) = body["queued_jobs"].as_i64() {
        println!("Queued jobs:     {}", n);
    }
    Ok(())
}

fn do_logs(api: &Api, limit: i64, json: bool) -> anyhow::Result<()> {
    let body = api.get(&format!("/admin/request-logs?limit={limit}"))?;
    if json {
        return print_json(&body);
    }
    let list: LogList = serde_json::from_value(body)?;
    if list.count == 0 {
        eprintln!("No request logs yet");
        return Ok(());
    }
    for row in &list.results {
        println!("{}", format_log_row(row));
    }
    Ok(())
}

fn do_settings(api: &Api, action: SettingsAction) -> anyhow::Result<()> {
    let body = match action {
        SettingsAction::Get { provider } => api.get(&format!("/admin/settings/{provider}"))?,
        SettingsAction::Set { provider, json } => {
            let doc: Value = serde_json::from_str(&json)
                .map_err(|e| anyhow::anyhow!("settings must be a JSON object: {}", e))?;
            api.put(&format!("/admin/settings/{provider}"), &doc)?
        }
        SettingsAction::Check { provider } => {
            api.get(&format!("/admin/settings/{provider}/check"))?
        }
    };
    print_json(&body)
}

// ============================================================================
// Main
// ============================================================================

fn run(cli: Cli) -> anyhow::Result<()> {
    let api = Api::new(&cli.server, cli.token)?;

    match cli.command {
        Commands::Status => do_status(&api),
        Commands::UpdateProfile { id } => {
            let body = api.post(&format!("/admin/users/{id}/update-from-api"))?;
            println!("{}", body["message"].as_str().unwrap_or("done"));
            Ok(())
        }
        Commands::UpdateStories { id } => {
            let body = api.post(&format!("/admin/users/{id}/update-stories-from-api"))?;
            println!("{}", body["message"].as_str().unwrap_or("queued"));
            Ok(())
        }
        Commands::Job { id } => print_json(&api.get(&format!("/admin/jobs/{id}"))?),
        Commands::Logs { limit, json } => do_logs(&api, limit, json),
        Commands::Log { id } => print_json(&api.get(&format!("/admin/request-logs/{id}"))?),
        Commands::Settings { action } => do_settings(&api, action),
    }
}

fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        eprintln!("igmirror-cli: {}", e);
        std::process::exit(1);
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn row(status: &str, code: Option<i32>, error: &str) -> LogRow {
        LogRow {
            id: 12,
            method: "GET".into(),
            url: "https://core.example.com/api/v1/health/check".into(),
            status: status.into(),
            response_status_code: code,
            duration_ms: Some(42),
            created_at: "2026-01-01T00:00:00Z".into(),
            error_message: error.into(),
        }
    }

    #[test]
    fn test_format_log_row_success() {
        let line = format_log_row(&row("success", Some(200), ""));
        assert!(line.contains("success"));
        assert!(line.contains("200"));
        assert!(line.contains("42ms"));
        assert!(line.ends_with("/api/v1/health/check"));
    }

    #[test]
    fn test_format_log_row_timeout_shows_error() {
        let line = format_log_row(&row("timeout", None, "operation timed out"));
        assert!(line.contains(" - "), "missing status code renders as '-'");
        assert!(line.ends_with("(operation timed out)"));
    }

    #[test]
    fn test_error_text_prefers_error_then_detail() {
        assert_eq!(error_text(r#"{"error":"Invalid token"}"#), "Invalid token");
        assert_eq!(
            error_text(r#"{"detail":"Token is valid"}"#),
            "Token is valid"
        );
        assert_eq!(error_text("Bad Gateway"), "Bad Gateway");
    }

    #[test]
    fn test_log_list_parses_server_shape() {
        let body = serde_json::json!({
            "count": 1,
            "results": [{
                "id": 3,
                "method": "GET",
                "url": "https://x/y",
                "status": "error",
                "response_status_code": 503,
                "duration_ms": 9,
                "created_at": "2026-01-01T00:00:00Z",
                "error_message": "",
                "display": "GET y - error",
                "is_successful": false
            }]
        });
        let list: LogList = serde_json::from_value(body).unwrap();
        assert_eq!(list.count, 1);
        assert_eq!(list.results[0].response_status_code, Some(503));
    }

    #[test]
    fn test_cli_parses_settings_set() {
        let cli = Cli::try_parse_from([
            "igmirror-cli",
            "--token",
            "abc",
            "settings",
            "set",
            "core_api",
            r#"{"api_url":"https://core"}"#,
        ])
        .unwrap();
        assert_eq!(cli.token.as_deref(), Some("abc"));
        assert!(matches!(
            cli.command,
            Commands::Settings {
                action: SettingsAction::Set { .. }
            }
        ));
    }
}
