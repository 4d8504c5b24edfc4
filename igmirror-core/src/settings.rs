//! Per-provider settings singletons.
//!
//! Each provider has at most one row in `provider_settings`, keyed by the
//! provider name. Settings are read fresh on every use so that operators can
//! rotate credentials without restarting anything. A missing row reads as the
//! provider's default (blank) settings.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sqlx::PgPool;
use std::fmt;
use std::str::FromStr;

use crate::error::MirrorError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Provider {
    #[serde(rename = "core_api")]
    CoreApi,
    #[serde(rename = "openai")]
    OpenAi,
    #[serde(rename = "firebase_admin")]
    FirebaseAdmin,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::CoreApi => "core_api",
            Provider::OpenAi => "openai",
            Provider::FirebaseAdmin => "firebase_admin",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "core_api" => Ok(Provider::CoreApi),
            "openai" => Ok(Provider::OpenAi),
            "firebase_admin" => Ok(Provider::FirebaseAdmin),
            other => Err(format!("unknown provider: {other}")),
        }
    }
}

/// Typed view of one provider's settings row.
pub trait ProviderSettings: Serialize + DeserializeOwned + Default + Send + Sync {
    const PROVIDER: Provider;

    /// All required secrets are present and non-blank.
    fn is_configured(&self) -> bool;

    /// JSON form safe to show to operators.
    fn masked(&self) -> Value;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CoreApiSettings {
    pub api_url: String,
    pub api_token: String,
}

impl ProviderSettings for CoreApiSettings {
    const PROVIDER: Provider = Provider::CoreApi;

    fn is_configured(&self) -> bool {
        !self.api_url.trim().is_empty() && !self.api_token.trim().is_empty()
    }

    fn masked(&self) -> Value {
        serde_json::json!({
            "api_url": self.api_url,
            "api_token": mask_secret(&self.api_token),
        })
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OpenAiSettings {
    pub api_key: String,
    pub model_name: String,
}

impl ProviderSettings for OpenAiSettings {
    const PROVIDER: Provider = Provider::OpenAi;

    fn is_configured(&self) -> bool {
        !self.api_key.trim().is_empty()
    }

    fn masked(&self) -> Value {
        serde_json::json!({
            "api_key": mask_secret(&self.api_key),
            "model_name": self.model_name,
        })
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FirebaseAdminSettings {
    /// Full service-account JSON document as pasted by the operator.
    pub service_account_json: String,
}

impl ProviderSettings for FirebaseAdminSettings {
    const PROVIDER: Provider = Provider::FirebaseAdmin;

    fn is_configured(&self) -> bool {
        !self.service_account_json.trim().is_empty()
    }

    fn masked(&self) -> Value {
        let configured = self.is_configured();
        serde_json::json!({
            "service_account_json": if configured { "***" } else { "" },
        })
    }
}

/// Keep the last four characters of a secret so operators can tell keys apart.
pub fn mask_secret(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.is_empty() {
        return String::new();
    }
    if chars.len() <= 4 {
        return "****".to_string();
    }
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("****{tail}")
}

/// Raw storage for provider settings rows.
#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn load_raw(&self, provider: Provider) -> Result<Option<Value>, MirrorError>;

    async fn save_raw(&self, provider: Provider, config: &Value) -> Result<(), MirrorError>;
}

/// Read the singleton for `T`, defaulting when the row does not exist yet.
pub async fn load<T: ProviderSettings>(store: &dyn SettingsStore) -> Result<T, MirrorError> {
    match store.load_raw(T::PROVIDER).await? {
        Some(raw) => Ok(serde_json::from_value(raw)?),
        None => Ok(T::default()),
    }
}

pub async fn save<T: ProviderSettings>(
    store: &dyn SettingsStore,
    settings: &T,
) -> Result<(), MirrorError> {
    let raw = serde_json::to_value(settings)?;
    store.save_raw(T::PROVIDER, &raw).await
}

/// Overlay the keys of `patch` on the stored settings for `T` and save the
/// result. Keys the patch leaves out keep their stored value.
pub async fn merge<T: ProviderSettings>(
    store: &dyn SettingsStore,
    patch: &Map<String, Value>,
) -> Result<T, MirrorError> {
    let mut merged = match store.load_raw(T::PROVIDER).await? {
        Some(Value::Object(current)) => current,
        _ => Map::new(),
    };
    for (key, value) in patch {
        merged.insert(key.clone(), value.clone());
    }
    let settings: T = serde_json::from_value(Value::Object(merged))?;
    save(store, &settings).await?;
    Ok(settings)
}

// ============================================================================
// PostgreSQL store
// ============================================================================

#[derive(Clone)]
pub struct PgSettingsStore {
    pool: PgPool,
}

impl PgSettingsStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SettingsStore for PgSettingsStore {
    async fn load_raw(&self, provider: Provider) -> Result<Option<Value>, MirrorError> {
        let row: Option<(Value,)> =
            sqlx::query_as("SELECT config FROM provider_settings WHERE provider = $1")
                .bind(provider.as_str())
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|r| r.0))
    }

    async fn save_raw(&self, provider: Provider, config: &Value) -> Result<(), MirrorError> {
        sqlx::query(
            r#"
            INSERT INTO provider_settings (provider, config)
            VALUES ($1, $2)
            ON CONFLICT (provider)
            DO UPDATE SET config = EXCLUDED.config, updated_at = NOW()
            "#,
        )
        .bind(provider.as_str())
        .bind(config)
        .execute(&self.pool)
        .await?;

        tracing::info!(provider = %provider, "Provider settings updated");
        Ok(())
    }
}
