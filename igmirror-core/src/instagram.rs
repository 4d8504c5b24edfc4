//! Content fetch functions for the Core API provider.
//!
//! Settings are read from the store every time a [`CoreApi`] is connected, so
//! credential changes apply to the next call without a restart.

use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;

use crate::client::{ApiClient, ApiError, ProviderEndpoint};
use crate::request_log::RequestLogSink;
use crate::settings::{self, CoreApiSettings, SettingsStore};

pub const USER_INFO_BY_USERNAME_PATH: &str =
    "/api/v1/instagram/web_app/fetch_user_info_by_username_v2";
pub const USER_INFO_BY_ID_PATH: &str = "/api/v1/instagram/web_app/fetch_user_info_by_user_id";
pub const USER_STORIES_BY_ID_PATH: &str =
    "/api/v1/instagram/web_app/fetch_user_stories_by_user_id";
pub const HEALTH_CHECK_PATH: &str = "/api/v1/health/check";

const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(10);

/// Authenticated session against the Core API.
pub struct CoreApi {
    client: ApiClient,
}

impl CoreApi {
    /// Build a session from the current `core_api` settings row.
    pub async fn connect(
        store: &dyn SettingsStore,
        log: Arc<dyn RequestLogSink>,
    ) -> Result<Self, ApiError> {
        let settings: CoreApiSettings = settings::load(store).await?;
        let endpoint = ProviderEndpoint::core_api(&settings)?;
        Ok(Self {
            client: ApiClient::new(endpoint, log)?,
        })
    }

    pub fn from_client(client: ApiClient) -> Self {
        Self { client }
    }

    pub async fn fetch_user_info_by_username_v2(&self, username: &str) -> Result<Value, ApiError> {
        tracing::info!(username, "Fetching user info by username");
        let result = self
            .fetch(USER_INFO_BY_USERNAME_PATH, "username", username)
            .await;
        match &result {
            Ok(_) => tracing::info!(username, "Fetched user info by username"),
            Err(e) => tracing::error!(username, error = %e, "Failed to fetch user info by username"),
        }
        result
    }

    pub async fn fetch_user_info_by_user_id(&self, user_id: &str) -> Result<Value, ApiError> {
        tracing::info!(user_id, "Fetching user info by id");
        let result = self.fetch(USER_INFO_BY_ID_PATH, "user_id", user_id).await;
        match &result {
            Ok(_) => tracing::info!(user_id, "Fetched user info by id"),
            Err(e) => tracing::error!(user_id, error = %e, "Failed to fetch user info by id"),
        }
        result
    }

    pub async fn fetch_user_stories_by_user_id(&self, user_id: &str) -> Result<Value, ApiError> {
        tracing::info!(user_id, "Fetching user stories");
        let result = self.fetch(USER_STORIES_BY_ID_PATH, "user_id", user_id).await;
        match &result {
            Ok(_) => tracing::info!(user_id, "Fetched user stories"),
            Err(e) => tracing::error!(user_id, error = %e, "Failed to fetch user stories"),
        }
        result
    }

    /// `true` when the provider health endpoint answers with a 2xx.
    pub async fn check_connection(&self) -> bool {
        match self
            .client
            .request("GET", HEALTH_CHECK_PATH, None, None, HEALTH_CHECK_TIMEOUT)
            .await
        {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(error = %e, "Core API connection check failed");
                false
            }
        }
    }

    async fn fetch(&self, path: &str, key: &str, value: &str) -> Result<Value, ApiError> {
        let mut params = Map::new();
        params.insert(key.to_string(), Value::String(value.to_string()));
        self.client.get(path, Some(&params)).await?.json()
    }
}

/// Check that the `core_api` row carries a URL and a token.
pub async fn validate_settings(store: &dyn SettingsStore) -> Result<(), ApiError> {
    let settings: CoreApiSettings = settings::load(store).await?;
    ProviderEndpoint::core_api(&settings).map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::LogStatus;
    use crate::testing::{MemoryRequestLog, MemorySettings};
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn settings_for(uri: &str) -> MemorySettings {
        let store = MemorySettings::default();
        settings::save(
            &store,
            &CoreApiSettings {
                api_url: uri.to_string(),
                api_token: "core-token".into(),
            },
        )
        .await
        .unwrap();
        store
    }

    #[tokio::test]
    async fn test_connect_without_settings_is_configuration_error() {
        let store = MemorySettings::default();
        let log = Arc::new(MemoryRequestLog::default());
        let err = CoreApi::connect(&store, log.clone()).await.err().unwrap();
        assert!(matches!(err, ApiError::Configuration(_)));
        assert!(log.rows().is_empty());
        assert!(validate_settings(&store).await.is_err());
    }

    #[tokio::test]
    async fn test_fetch_by_username_returns_payload_unmodified() {
        let server = MockServer::start().await;
        let payload = serde_json::json!({"data": {"status": true, "pk": "42", "extra": [1, 2]}});
        Mock::given(method("GET"))
            .and(path(USER_INFO_BY_USERNAME_PATH))
            .and(query_param("username", "alice"))
            .respond_with(ResponseTemplate::new(200).set_body_json(payload.clone()))
            .expect(1)
            .mount(&server)
            .await;

        let store = settings_for(&server.uri()).await;
        let log = Arc::new(MemoryRequestLog::default());
        let api = CoreApi::connect(&store, log.clone()).await.unwrap();

        let got = api.fetch_user_info_by_username_v2("alice").await.unwrap();
        assert_eq!(got, payload);
        assert_eq!(log.rows()[0].status, LogStatus::Success);
    }

    #[tokio::test]
    async fn test_fetch_stories_by_id_hits_stories_endpoint() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(USER_STORIES_BY_ID_PATH))
            .and(query_param("user_id", "42"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"data": {}})))
            .expect(1)
            .mount(&server)
            .await;

        let store = settings_for(&server.uri()).await;
        let api = CoreApi::connect(&store, Arc::new(MemoryRequestLog::default()))
            .await
            .unwrap();
        api.fetch_user_stories_by_user_id("42").await.unwrap();
    }

    #[tokio::test]
    async fn test_fetch_propagates_status_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(USER_INFO_BY_ID_PATH))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let store = settings_for(&server.uri()).await;
        let api = CoreApi::connect(&store, Arc::new(MemoryRequestLog::default()))
            .await
            .unwrap();
        let err = api.fetch_user_info_by_user_id("42").await.unwrap_err();
        assert!(matches!(err, ApiError::Status { status: 502, .. }));
    }

    #[tokio::test]
    async fn test_check_connection() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(HEALTH_CHECK_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
            .mount(&server)
            .await;

        let store = settings_for(&server.uri()).await;
        let api = CoreApi::connect(&store, Arc::new(MemoryRequestLog::default()))
            .await
            .unwrap();
        assert!(api.check_connection().await);

        let down = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&down)
            .await;
        let store = settings_for(&down.uri()).await;
        let api = CoreApi::connect(&store, Arc::new(MemoryRequestLog::default()))
            .await
            .unwrap();
        assert!(!api.check_connection().await);
    }
}
