use config::{Config, ConfigError, File};
use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Deserialize, Clone)]
pub struct MirrorConfig {
    pub service: ServiceConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub openai: OpenAiConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServiceConfig {
    pub log_level: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
    #[serde(default = "default_access_minutes")]
    pub access_token_minutes: i64,
    #[serde(default = "default_refresh_days")]
    pub refresh_token_days: i64,
    #[serde(default = "default_jwks_url")]
    pub firebase_jwks_url: String,
}

fn default_access_minutes() -> i64 {
    60
}

fn default_refresh_days() -> i64 {
    7
}

fn default_jwks_url() -> String {
    "https://www.googleapis.com/service_accounts/v1/jwk/securetoken@system.gserviceaccount.com"
        .to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct HttpConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "127.0.0.1".to_string(),
            port: 8000,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct WorkerConfig {
    pub concurrency: usize,
    pub poll_interval_ms: u64,
    /// A job left `running` longer than this is claimed again.
    #[serde(default = "default_lease_secs")]
    pub lease_secs: u64,
}

fn default_lease_secs() -> u64 {
    15 * 60
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            poll_interval_ms: 1000,
            lease_secs: default_lease_secs(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SchedulerConfig {
    pub enabled: bool,
    pub profile_interval_minutes: u64,
    pub stories_interval_minutes: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            profile_interval_minutes: 24 * 60,
            stories_interval_minutes: 60,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    pub media_root: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            media_root: "./media".to_string(),
        }
    }
}

impl StorageConfig {
    /// Media root with `~` and `$VAR` expanded.
    pub fn media_root_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::full(&self.media_root).map_or_else(
            |_| self.media_root.clone(),
            |expanded| expanded.into_owned(),
        ))
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct OpenAiConfig {
    pub base_url: String,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
        }
    }
}

impl MirrorConfig {
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::with_name(path))
            .set_override_option("auth.jwt_secret", std::env::var("JWT_SECRET").ok())?
            .build()?;
        s.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_media_root_expands_env_vars() {
        std::env::set_var("IGMIRROR_TEST_MEDIA", "/srv/media");
        let storage = StorageConfig {
            media_root: "$IGMIRROR_TEST_MEDIA/assets".to_string(),
        };
        assert_eq!(storage.media_root_path(), PathBuf::from("/srv/media/assets"));
    }

    #[test]
    fn test_media_root_keeps_unknown_vars_verbatim() {
        let storage = StorageConfig {
            media_root: "$IGMIRROR_SURELY_UNSET_VAR/assets".to_string(),
        };
        assert_eq!(
            storage.media_root_path(),
            PathBuf::from("$IGMIRROR_SURELY_UNSET_VAR/assets")
        );
    }

    #[test]
    fn test_optional_sections_have_defaults() {
        assert!(HttpConfig::default().enabled);
        assert_eq!(WorkerConfig::default().concurrency, 4);
        assert_eq!(WorkerConfig::default().lease_secs, 900);
        assert_eq!(SchedulerConfig::default().stories_interval_minutes, 60);
        assert!(OpenAiConfig::default().base_url.starts_with("https://"));
    }
}
