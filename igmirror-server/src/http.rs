//! igmirror HTTP REST API
//!
//! Each endpoint has a thin axum handler that delegates to an inner function
//! returning `(StatusCode, serde_json::Value)`; the inner functions are
//! tested directly without going through axum dispatch.
//!
//! Endpoints:
//! - GET  /health, /version
//! - POST /login-with-google/, /refresh/, /validate/
//! - POST /inject-data/ (Bearer)
//! - /admin/... operator endpoints (Bearer), including job status lookup

use std::str::FromStr;
use std::sync::Arc;

use anyhow::Result;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use igmirror_core::models::Account;
use igmirror_core::request_log::RequestLogReader;
use igmirror_core::settings::{
    self, CoreApiSettings, FirebaseAdminSettings, OpenAiSettings, Provider, ProviderSettings,
    SettingsStore,
};
use igmirror_core::store::AccountStore;
use igmirror_core::{instagram, openai, MirrorConfig, MirrorError, SyncJob};
use serde::Deserialize;
use serde_json::{json, Value};
use sqlx::PgPool;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::auth::{bearer_token, JwtKeys};
use crate::context::SyncContext;
use crate::firebase::{self, TokenVerifier};
use crate::subsystems::inject::{self, InjectRequest};
use crate::subsystems::{profile_sync, SyncError};

const DEFAULT_LOG_LIMIT: i64 = 50;
const MAX_LOG_LIMIT: i64 = 500;

/// Shared state for all HTTP handlers
pub struct HttpState {
    pub config: MirrorConfig,
    /// `None` when running without a database (tests).
    pub pool: Option<PgPool>,
    pub ctx: SyncContext,
    pub accounts: Arc<dyn AccountStore>,
    pub request_logs: Arc<dyn RequestLogReader>,
    pub verifier: Arc<dyn TokenVerifier>,
    pub keys: JwtKeys,
}

/// Build the Axum router with all endpoints
pub fn build_router(state: Arc<HttpState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        .route("/login-with-google/", post(login_handler))
        .route("/refresh/", post(refresh_handler))
        .route("/validate/", post(validate_handler))
        .route("/inject-data/", post(inject_handler))
        .route("/admin/users/:id/update-from-api", post(update_from_api_handler))
        .route(
            "/admin/users/:id/update-stories-from-api",
            post(update_stories_handler),
        )
        .route("/admin/jobs/:id", get(job_status_handler))
        .route("/admin/request-logs", get(request_logs_handler))
        .route("/admin/request-logs/:id", get(request_log_handler))
        .route(
            "/admin/settings/:provider",
            get(settings_get_handler).put(settings_put_handler),
        )
        .route("/admin/settings/:provider/check", get(settings_check_handler))
        .with_state(state)
}

/// Start the HTTP server on the configured address.
/// Gracefully shuts down when the broadcast shutdown signal fires.
pub async fn start_http_server(
    state: HttpState,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let addr = format!("{}:{}", state.config.http.host, state.config.http.port);
    let app = build_router(Arc::new(state));
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("igmirror HTTP API listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
            tracing::info!("HTTP server shutting down...");
        })
        .await?;

    Ok(())
}

// ============================================================================
// Request DTOs
// ============================================================================

#[derive(Debug, Deserialize, Default)]
pub struct LoginRequest {
    pub token: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct RefreshRequest {
    pub refresh: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct LogListQuery {
    pub limit: Option<i64>,
}

fn field_required(field: &str) -> Value {
    json!({ field: ["This field is required."] })
}

// ============================================================================
// Inner (directly testable) business logic functions
// ============================================================================

pub async fn health_inner(pool: Option<&PgPool>) -> (StatusCode, Value) {
    let Some(pool) = pool else {
        return (
            StatusCode::OK,
            json!({
                "status": "healthy",
                "version": env!("CARGO_PKG_VERSION"),
                "postgresql": "not configured",
            }),
        );
    };

    let pg_ver = match igmirror_core::db::health_check(pool).await {
        Ok(v) => v,
        Err(e) => {
            return (
                StatusCode::SERVICE_UNAVAILABLE,
                json!({
                    "status": "unhealthy",
                    "error": e.to_string(),
                }),
            );
        }
    };

    let queued = igmirror_core::db::queue_depth(pool).await.unwrap_or(-1);

    (
        StatusCode::OK,
        json!({
            "status": "healthy",
            "version": env!("CARGO_PKG_VERSION"),
            "postgresql": pg_ver,
            "queued_jobs": queued,
        }),
    )
}

pub fn version_inner() -> Value {
    json!({
        "version": env!("CARGO_PKG_VERSION"),
        "service": "igmirror",
    })
}

/// Verify the Google ID token, get-or-create the account and issue a pair.
pub async fn login_inner(state: &HttpState, req: LoginRequest) -> (StatusCode, Value) {
    let token = match req.token {
        Some(t) if !t.trim().is_empty() => t,
        _ => return (StatusCode::BAD_REQUEST, field_required("token")),
    };

    let identity = match state.verifier.verify(token.trim()).await {
        Ok(identity) => identity,
        Err(e) => {
            tracing::warn!(error = %e, "Google sign-in rejected");
            return (
                StatusCode::UNAUTHORIZED,
                json!({
                    "error": "Authentication failed",
                    "detail": "Invalid or expired token",
                }),
            );
        }
    };

    let account = match state.accounts.upsert_google_account(&identity).await {
        Ok(account) => account,
        Err(e) => {
            tracing::error!(email = %identity.email, error = %e, "Account upsert failed");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "error": "Authentication failed", "detail": e.to_string() }),
            );
        }
    };

    match state.keys.issue_pair(account.id) {
        Ok(pair) => {
            tracing::info!(account_id = %account.id, email = %account.email, "Signed in with Google");
            (StatusCode::OK, json!(pair))
        }
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            json!({ "error": "Authentication failed", "detail": e.to_string() }),
        ),
    }
}

pub fn refresh_inner(keys: &JwtKeys, req: RefreshRequest) -> (StatusCode, Value) {
    let token = match req.refresh {
        Some(t) if !t.trim().is_empty() => t,
        _ => return (StatusCode::BAD_REQUEST, field_required("refresh")),
    };

    match keys.refresh(token.trim()) {
        Ok(pair) => (StatusCode::OK, json!(pair)),
        Err(e) => {
            tracing::debug!(error = %e, "Refresh rejected");
            (
                StatusCode::BAD_REQUEST,
                json!({ "error": "Invalid refresh token" }),
            )
        }
    }
}

/// Resolve the Bearer token to an active account.
pub async fn authenticate(state: &HttpState, headers: &HeaderMap) -> Option<Account> {
    let token = bearer_token(headers)?;
    let claims = state.keys.validate_access(token).ok()?;
    match state.accounts.get_account(claims.sub).await {
        Ok(Some(account)) if account.is_active => Some(account),
        Ok(_) => None,
        Err(e) => {
            tracing::warn!(account_id = %claims.sub, error = %e, "Account lookup failed");
            None
        }
    }
}

fn unauthorized() -> (StatusCode, Value) {
    (
        StatusCode::UNAUTHORIZED,
        json!({ "detail": "Authentication credentials were not provided or are invalid." }),
    )
}

pub async fn validate_inner(state: &HttpState, headers: &HeaderMap) -> (StatusCode, Value) {
    match authenticate(state, headers).await {
        Some(_) => (StatusCode::OK, json!({ "detail": "Token is valid" })),
        None => (StatusCode::UNAUTHORIZED, json!({ "error": "Invalid token" })),
    }
}

pub async fn inject_inner(
    state: &HttpState,
    headers: &HeaderMap,
    req: InjectRequest,
) -> (StatusCode, Value) {
    if authenticate(state, headers).await.is_none() {
        return unauthorized();
    }

    let data = match req.validate() {
        Ok(data) => data,
        Err(errors) => return (StatusCode::BAD_REQUEST, Value::Object(errors)),
    };

    match inject::inject_story(state.ctx.profiles.as_ref(), data).await {
        Ok(result) => (StatusCode::CREATED, json!(result)),
        Err(e) => {
            tracing::error!(error = %e, "Inject failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "error": format!("Failed to process data: {e}") }),
            )
        }
    }
}

/// Synchronous profile sync for one profile.
pub async fn update_from_api_inner(ctx: &SyncContext, profile_id: Uuid) -> (StatusCode, Value) {
    match profile_sync::update_profile_from_api(ctx, profile_id).await {
        Ok(sync) => (
            StatusCode::OK,
            json!({
                "message": format!(
                    "Successfully updated {} from Instagram API.",
                    sync.profile.username
                ),
                "lookup": sync.lookup.as_str(),
                "avatar_job": sync.avatar_job,
            }),
        ),
        Err(e) => {
            let status = match e {
                SyncError::NotFound => StatusCode::NOT_FOUND,
                _ => StatusCode::BAD_REQUEST,
            };
            (
                status,
                json!({ "error": format!("Failed to update user from API: {e}") }),
            )
        }
    }
}

pub async fn update_stories_inner(ctx: &SyncContext, profile_id: Uuid) -> (StatusCode, Value) {
    let profile = match ctx.profiles.get_profile(profile_id).await {
        Ok(Some(p)) => p,
        Ok(None) => {
            return (
                StatusCode::NOT_FOUND,
                json!({ "error": "Failed to queue story update task: User not found" }),
            )
        }
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                json!({ "error": format!("Failed to queue story update task: {e}") }),
            )
        }
    };

    match ctx.queue.enqueue(&SyncJob::UpdateStories { profile_id }).await {
        Ok(task_id) => (
            StatusCode::ACCEPTED,
            json!({
                "message": format!(
                    "Successfully queued story update task for {}. Task ID: {}",
                    profile.username, task_id
                ),
                "task_id": task_id,
            }),
        ),
        Err(e) => (
            StatusCode::BAD_REQUEST,
            json!({ "error": format!("Failed to queue story update task: {e}") }),
        ),
    }
}

pub async fn job_status_inner(ctx: &SyncContext, job_id: Uuid) -> (StatusCode, Value) {
    match ctx.queue.status(job_id).await {
        Ok(Some(status)) => (StatusCode::OK, json!(status)),
        Ok(None) => (StatusCode::NOT_FOUND, json!({ "error": "Job not found" })),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            json!({ "error": e.to_string() }),
        ),
    }
}

/// Clamp a requested page size into `1..=MAX_LOG_LIMIT`.
pub fn log_limit(requested: Option<i64>) -> i64 {
    requested.unwrap_or(DEFAULT_LOG_LIMIT).clamp(1, MAX_LOG_LIMIT)
}

fn log_view(log: &igmirror_core::models::RequestLog) -> Value {
    let mut v = json!(log);
    if let Some(obj) = v.as_object_mut() {
        obj.insert("display".into(), json!(log.to_string()));
        obj.insert("is_successful".into(), json!(log.is_successful()));
        obj.insert("duration_seconds".into(), json!(log.duration_seconds()));
    }
    v
}

pub async fn request_logs_inner(
    reader: &dyn RequestLogReader,
    limit: Option<i64>,
) -> (StatusCode, Value) {
    match reader.list_recent(log_limit(limit)).await {
        Ok(rows) => {
            let results: Vec<Value> = rows.iter().map(log_view).collect();
            (
                StatusCode::OK,
                json!({ "count": results.len(), "results": results }),
            )
        }
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            json!({ "error": e.to_string() }),
        ),
    }
}

pub async fn request_log_inner(reader: &dyn RequestLogReader, id: i64) -> (StatusCode, Value) {
    match reader.get(id).await {
        Ok(Some(log)) => (StatusCode::OK, log_view(&log)),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            json!({ "error": "Request log not found" }),
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            json!({ "error": e.to_string() }),
        ),
    }
}

fn unknown_provider(raw: &str) -> (StatusCode, Value) {
    (
        StatusCode::NOT_FOUND,
        json!({ "error": format!("Unknown provider: {raw}") }),
    )
}

async fn settings_view<T: ProviderSettings>(store: &dyn SettingsStore) -> (StatusCode, Value) {
    match settings::load::<T>(store).await {
        Ok(s) => (
            StatusCode::OK,
            json!({
                "provider": T::PROVIDER.as_str(),
                "configured": s.is_configured(),
                "settings": s.masked(),
            }),
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            json!({ "error": e.to_string() }),
        ),
    }
}

async fn settings_update<T: ProviderSettings>(
    store: &dyn SettingsStore,
    body: Value,
) -> (StatusCode, Value) {
    let Value::Object(patch) = body else {
        return (
            StatusCode::BAD_REQUEST,
            json!({ "error": "Invalid settings: expected a JSON object" }),
        );
    };
    if let Err(e) = settings::merge::<T>(store, &patch).await {
        return match e {
            MirrorError::Serde(e) => (
                StatusCode::BAD_REQUEST,
                json!({ "error": format!("Invalid settings: {e}") }),
            ),
            e => (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "error": e.to_string() }),
            ),
        };
    }
    tracing::info!(
        provider = T::PROVIDER.as_str(),
        keys = patch.len(),
        "Provider settings updated"
    );
    settings_view::<T>(store).await
}

pub async fn settings_get_inner(store: &dyn SettingsStore, provider: &str) -> (StatusCode, Value) {
    match Provider::from_str(provider) {
        Ok(Provider::CoreApi) => settings_view::<CoreApiSettings>(store).await,
        Ok(Provider::OpenAi) => settings_view::<OpenAiSettings>(store).await,
        Ok(Provider::FirebaseAdmin) => settings_view::<FirebaseAdminSettings>(store).await,
        Err(_) => unknown_provider(provider),
    }
}

pub async fn settings_put_inner(
    store: &dyn SettingsStore,
    provider: &str,
    body: Value,
) -> (StatusCode, Value) {
    match Provider::from_str(provider) {
        Ok(Provider::CoreApi) => settings_update::<CoreApiSettings>(store, body).await,
        Ok(Provider::OpenAi) => settings_update::<OpenAiSettings>(store, body).await,
        Ok(Provider::FirebaseAdmin) => {
            settings_update::<FirebaseAdminSettings>(store, body).await
        }
        Err(_) => unknown_provider(provider),
    }
}

/// Validate a provider's settings and, where possible, probe the remote.
pub async fn settings_check_inner(
    ctx: &SyncContext,
    config: &MirrorConfig,
    provider: &str,
) -> (StatusCode, Value) {
    let provider = match Provider::from_str(provider) {
        Ok(p) => p,
        Err(_) => return unknown_provider(provider),
    };

    let checked: Result<Option<bool>, String> = match provider {
        Provider::CoreApi => match instagram::validate_settings(ctx.settings.as_ref()).await {
            Ok(()) => match ctx.core_api().await {
                Ok(api) => Ok(Some(api.check_connection().await)),
                Err(e) => Err(e.to_string()),
            },
            Err(e) => Err(e.to_string()),
        },
        Provider::OpenAi => openai::check_connection(
            ctx.settings.as_ref(),
            &config.openai.base_url,
            ctx.request_log.clone(),
        )
        .await
        .map(Some)
        .map_err(|e| e.to_string()),
        Provider::FirebaseAdmin => {
            match settings::load::<FirebaseAdminSettings>(ctx.settings.as_ref()).await {
                Ok(s) => firebase::project_id(&s).map(|_| None).map_err(|e| e.to_string()),
                Err(e) => Err(e.to_string()),
            }
        }
    };

    match checked {
        Ok(connected) => (
            StatusCode::OK,
            json!({
                "provider": provider.as_str(),
                "valid": true,
                "connected": connected,
            }),
        ),
        Err(error) => (
            StatusCode::OK,
            json!({
                "provider": provider.as_str(),
                "valid": false,
                "error": error,
            }),
        ),
    }
}

// ============================================================================
// Axum handler wrappers (thin, delegate to inner functions)
// ============================================================================

pub async fn health_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let (status, body) = health_inner(state.pool.as_ref()).await;
    (status, Json(body))
}

pub async fn version_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(version_inner()))
}

pub async fn login_handler(
    State(state): State<Arc<HttpState>>,
    Json(req): Json<LoginRequest>,
) -> impl IntoResponse {
    let (status, body) = login_inner(&state, req).await;
    (status, Json(body))
}

pub async fn refresh_handler(
    State(state): State<Arc<HttpState>>,
    Json(req): Json<RefreshRequest>,
) -> impl IntoResponse {
    let (status, body) = refresh_inner(&state.keys, req);
    (status, Json(body))
}

pub async fn validate_handler(
    State(state): State<Arc<HttpState>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let (status, body) = validate_inner(&state, &headers).await;
    (status, Json(body))
}

pub async fn inject_handler(
    State(state): State<Arc<HttpState>>,
    headers: HeaderMap,
    Json(req): Json<InjectRequest>,
) -> impl IntoResponse {
    let (status, body) = inject_inner(&state, &headers, req).await;
    (status, Json(body))
}

pub async fn update_from_api_handler(
    State(state): State<Arc<HttpState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    let (status, body) = match authenticate(&state, &headers).await {
        Some(_) => update_from_api_inner(&state.ctx, id).await,
        None => unauthorized(),
    };
    (status, Json(body))
}

pub async fn update_stories_handler(
    State(state): State<Arc<HttpState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    let (status, body) = match authenticate(&state, &headers).await {
        Some(_) => update_stories_inner(&state.ctx, id).await,
        None => unauthorized(),
    };
    (status, Json(body))
}

pub async fn job_status_handler(
    State(state): State<Arc<HttpState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    let (status, body) = match authenticate(&state, &headers).await {
        Some(_) => job_status_inner(&state.ctx, id).await,
        None => unauthorized(),
    };
    (status, Json(body))
}

pub async fn request_logs_handler(
    State(state): State<Arc<HttpState>>,
    headers: HeaderMap,
    Query(query): Query<LogListQuery>,
) -> impl IntoResponse {
    let (status, body) = match authenticate(&state, &headers).await {
        Some(_) => request_logs_inner(state.request_logs.as_ref(), query.limit).await,
        None => unauthorized(),
    };
    (status, Json(body))
}

pub async fn request_log_handler(
    State(state): State<Arc<HttpState>>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> impl IntoResponse {
    let (status, body) = match authenticate(&state, &headers).await {
        Some(_) => request_log_inner(state.request_logs.as_ref(), id).await,
        None => unauthorized(),
    };
    (status, Json(body))
}

pub async fn settings_get_handler(
    State(state): State<Arc<HttpState>>,
    headers: HeaderMap,
    Path(provider): Path<String>,
) -> impl IntoResponse {
    let (status, body) = match authenticate(&state, &headers).await {
        Some(_) => settings_get_inner(state.ctx.settings.as_ref(), &provider).await,
        None => unauthorized(),
    };
    (status, Json(body))
}

pub async fn settings_put_handler(
    State(state): State<Arc<HttpState>>,
    headers: HeaderMap,
    Path(provider): Path<String>,
    Json(body): Json<Value>,
) -> impl IntoResponse {
    let (status, body) = match authenticate(&state, &headers).await {
        Some(_) => settings_put_inner(state.ctx.settings.as_ref(), &provider, body).await,
        None => unauthorized(),
    };
    (status, Json(body))
}

pub async fn settings_check_handler(
    State(state): State<Arc<HttpState>>,
    headers: HeaderMap,
    Path(provider): Path<String>,
) -> impl IntoResponse {
    let (status, body) = match authenticate(&state, &headers).await {
        Some(_) => settings_check_inner(&state.ctx, &state.config, &provider).await,
        None => unauthorized(),
    };
    (status, Json(body))
}

// ============================================================================
// Unit Tests: call inner functions directly
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use igmirror_core::models::LogStatus;
    use igmirror_core::request_log::{LogCompletion, NewRequestLog, RequestLogSink};
    use igmirror_core::testing::{MemoryRequestLog, MemorySettings};

    #[test]
    fn test_version_inner_pure() {
        let v = version_inner();
        assert!(v["version"].is_string());
        assert_eq!(v["service"], "igmirror");
    }

    #[test]
    fn test_log_limit_clamps() {
        assert_eq!(log_limit(None), 50);
        assert_eq!(log_limit(Some(0)), 1);
        assert_eq!(log_limit(Some(10_000)), 500);
        assert_eq!(log_limit(Some(20)), 20);
    }

    #[test]
    fn test_refresh_inner_blank_and_garbage() {
        let keys = JwtKeys::new("test-secret-that-is-long-enough-for-hmac", 60, 7);

        let (status, body) = refresh_inner(&keys, RefreshRequest { refresh: None });
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["refresh"][0], "This field is required.");

        let (status, body) = refresh_inner(
            &keys,
            RefreshRequest {
                refresh: Some("not-a-jwt".into()),
            },
        );
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Invalid refresh token");
    }

    #[test]
    fn test_refresh_inner_rejects_access_token() {
        let keys = JwtKeys::new("test-secret-that-is-long-enough-for-hmac", 60, 7);
        let pair = keys.issue_pair(Uuid::new_v4()).unwrap();

        let (status, _) = refresh_inner(
            &keys,
            RefreshRequest {
                refresh: Some(pair.access),
            },
        );
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = refresh_inner(
            &keys,
            RefreshRequest {
                refresh: Some(pair.refresh.clone()),
            },
        );
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["refresh"], pair.refresh.as_str());
        assert!(body["access"].is_string());
    }

    #[tokio::test]
    async fn test_health_inner_without_database() {
        let (status, body) = health_inner(None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["postgresql"], "not configured");
    }

    #[tokio::test]
    async fn test_settings_get_masks_secrets() {
        let store = MemorySettings::default();
        settings::save(
            &store,
            &CoreApiSettings {
                api_url: "https://core.example.com".into(),
                api_token: "tok-abcdef123456".into(),
            },
        )
        .await
        .unwrap();

        let (status, body) = settings_get_inner(&store, "core_api").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["configured"], true);
        assert_eq!(body["settings"]["api_url"], "https://core.example.com");
        assert_eq!(body["settings"]["api_token"], "****3456");
    }

    #[tokio::test]
    async fn test_settings_put_then_get() {
        let store = MemorySettings::default();
        let (status, body) =
            settings_put_inner(&store, "openai", json!({"api_key": "sk-0000ffff"})).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["settings"]["api_key"], "****ffff");

        let loaded: OpenAiSettings = settings::load(&store).await.unwrap();
        assert_eq!(loaded.api_key, "sk-0000ffff");
    }

    #[tokio::test]
    async fn test_settings_put_keeps_omitted_secret() {
        let store = MemorySettings::default();
        settings_put_inner(
            &store,
            "core_api",
            json!({"api_url": "https://core.example.com", "api_token": "tok-abcdef123456"}),
        )
        .await;

        let (status, body) =
            settings_put_inner(&store, "core_api", json!({"api_url": "https://core2.example.com"}))
                .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["configured"], true);
        assert_eq!(body["settings"]["api_url"], "https://core2.example.com");
        assert_eq!(body["settings"]["api_token"], "****3456");
    }

    #[tokio::test]
    async fn test_settings_put_rejects_non_object() {
        let store = MemorySettings::default();
        let (status, body) = settings_put_inner(&store, "openai", json!(["sk-1"])).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Invalid settings: expected a JSON object");

        let (status, _) = settings_put_inner(&store, "openai", json!({"api_key": 7})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_settings_unknown_provider() {
        let store = MemorySettings::default();
        let (status, body) = settings_get_inner(&store, "twitter").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Unknown provider: twitter");
    }

    #[tokio::test]
    async fn test_request_log_views() {
        let log = MemoryRequestLog::default();
        let id = log
            .begin(NewRequestLog {
                method: "GET".into(),
                url: "https://core.example.com/api/v1/health/check".into(),
                headers: json!({}),
                params: json!({}),
                body: json!({}),
            })
            .await
            .unwrap();
        log.complete(
            id,
            LogCompletion {
                status_code: 200,
                headers: json!({}),
                body: json!({"ok": true}),
                duration_ms: 12,
            },
        )
        .await
        .unwrap();

        let (status, body) = request_logs_inner(&log, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["count"], 1);
        assert_eq!(body["results"][0]["display"], "GET check - success");
        assert_eq!(body["results"][0]["is_successful"], true);
        assert_eq!(body["results"][0]["status"], LogStatus::Success.as_str());

        let (status, _) = request_log_inner(&log, id + 100).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
