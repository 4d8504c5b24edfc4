//! OpenAI provider helpers: settings validation and a connectivity probe.

use std::sync::Arc;

use crate::client::{ApiClient, ApiError, ProviderEndpoint, DEFAULT_TIMEOUT};
use crate::request_log::RequestLogSink;
use crate::settings::{self, OpenAiSettings, SettingsStore};

pub async fn validate_settings(store: &dyn SettingsStore) -> Result<OpenAiSettings, ApiError> {
    let settings: OpenAiSettings = settings::load(store).await?;
    if settings.api_key.trim().is_empty() {
        return Err(ApiError::Configuration(
            "OpenAI API key is not configured in settings".into(),
        ));
    }
    Ok(settings)
}

/// List models with the configured key; any 2xx counts as reachable.
pub async fn check_connection(
    store: &dyn SettingsStore,
    base_url: &str,
    log: Arc<dyn RequestLogSink>,
) -> Result<bool, ApiError> {
    let settings = validate_settings(store).await?;
    let endpoint = ProviderEndpoint::new("OpenAI API", base_url, settings.api_key)?;
    let client = ApiClient::new(endpoint, log)?;

    match client.request("GET", "models", None, None, DEFAULT_TIMEOUT).await {
        Ok(_) => Ok(true),
        Err(ApiError::Status { status, .. }) => {
            tracing::warn!(status, "OpenAI connection check rejected");
            Ok(false)
        }
        Err(e) if e.is_transport() => {
            tracing::warn!(error = %e, "OpenAI connection check failed");
            Ok(false)
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MemoryRequestLog, MemorySettings};
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_blank_key_is_configuration_error() {
        let store = MemorySettings::default();
        let err = validate_settings(&store).await.unwrap_err();
        assert!(matches!(err, ApiError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_check_connection_lists_models() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/models"))
            .and(header("authorization", "Bearer sk-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"data": []})))
            .expect(1)
            .mount(&server)
            .await;

        let store = MemorySettings::default();
        settings::save(
            &store,
            &OpenAiSettings {
                api_key: "sk-test".into(),
                model_name: "gpt-4o-mini".into(),
            },
        )
        .await
        .unwrap();

        let log = Arc::new(MemoryRequestLog::default());
        let ok = check_connection(&store, &format!("{}/v1", server.uri()), log.clone())
            .await
            .unwrap();
        assert!(ok);
        assert_eq!(log.rows().len(), 1);
    }

    #[tokio::test]
    async fn test_check_connection_rejected_key() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let store = MemorySettings::default();
        settings::save(
            &store,
            &OpenAiSettings {
                api_key: "sk-bad".into(),
                model_name: String::new(),
            },
        )
        .await
        .unwrap();

        let ok = check_connection(&store, &server.uri(), Arc::new(MemoryRequestLog::default()))
            .await
            .unwrap();
        assert!(!ok);
    }
}
