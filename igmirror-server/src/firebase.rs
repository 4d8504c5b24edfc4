//! Firebase ID token verification for Google sign-in.
//!
//! The service-account JSON lives in the `firebase_admin` settings row and is
//! re-read for every verification. Signing keys come from Google's public JWK
//! set.

use async_trait::async_trait;
use igmirror_core::settings::{self, FirebaseAdminSettings, SettingsStore};
use igmirror_core::store::GoogleIdentity;
use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::Retry;

use crate::auth::AuthError;

const JWKS_TIMEOUT: Duration = Duration::from_secs(10);
const JWKS_RETRIES: usize = 2;

/// Turns a client-supplied identity token into a verified Google identity.
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    async fn verify(&self, id_token: &str) -> Result<GoogleIdentity, AuthError>;
}

#[derive(Debug, Deserialize)]
struct ServiceAccount {
    project_id: Option<String>,
}

/// `project_id` from the configured service-account JSON.
pub fn project_id(settings: &FirebaseAdminSettings) -> Result<String, AuthError> {
    if !settings.service_account_json.trim().is_empty() {
        let account: ServiceAccount = serde_json::from_str(&settings.service_account_json)
            .map_err(|_| {
                AuthError::Configuration("Invalid Firebase service account JSON content".into())
            })?;
        return match account.project_id {
            Some(id) if !id.trim().is_empty() => Ok(id),
            _ => Err(AuthError::Configuration(
                "Firebase service account JSON has no project_id".into(),
            )),
        };
    }
    Err(AuthError::Configuration(
        "Firebase service account JSON content not configured".into(),
    ))
}

#[derive(Debug, Deserialize)]
struct FirebaseClaims {
    email: Option<String>,
    #[serde(default)]
    name: String,
    #[serde(default)]
    picture: String,
}

pub struct FirebaseVerifier {
    settings: Arc<dyn SettingsStore>,
    http: reqwest::Client,
    jwks_url: String,
}

impl FirebaseVerifier {
    pub fn new(settings: Arc<dyn SettingsStore>, jwks_url: impl Into<String>) -> Self {
        Self {
            settings,
            http: reqwest::Client::new(),
            jwks_url: jwks_url.into(),
        }
    }

    async fn fetch_jwks(&self) -> Result<JwkSet, AuthError> {
        let strategy = ExponentialBackoff::from_millis(100)
            .max_delay(Duration::from_secs(2))
            .map(jitter)
            .take(JWKS_RETRIES);

        Retry::spawn(strategy, || self.fetch_jwks_once())
            .await
            .map_err(|e| {
                tracing::error!(error = %e, url = %self.jwks_url, "Failed to fetch Firebase signing keys");
                AuthError::Verification(format!("signing keys unavailable: {e}"))
            })
    }

    async fn fetch_jwks_once(&self) -> Result<JwkSet, reqwest::Error> {
        self.http
            .get(&self.jwks_url)
            .timeout(JWKS_TIMEOUT)
            .send()
            .await?
            .error_for_status()?
            .json::<JwkSet>()
            .await
    }
}

#[async_trait]
impl TokenVerifier for FirebaseVerifier {
    async fn verify(&self, id_token: &str) -> Result<GoogleIdentity, AuthError> {
        let admin: FirebaseAdminSettings = settings::load(self.settings.as_ref())
            .await
            .map_err(|e| AuthError::Configuration(format!("Cannot access Firebase settings: {e}")))?;
        let project_id = project_id(&admin)?;

        let header = decode_header(id_token)?;
        let kid = header
            .kid
            .ok_or_else(|| AuthError::Verification("token header has no kid".into()))?;

        let jwks = self.fetch_jwks().await?;
        let jwk = jwks
            .find(&kid)
            .ok_or_else(|| AuthError::Verification(format!("unknown signing key {kid}")))?;
        let key = DecodingKey::from_jwk(jwk)?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_audience(&[project_id.as_str()]);
        validation.set_issuer(&[format!("https://securetoken.google.com/{project_id}")]);

        let claims = decode::<FirebaseClaims>(id_token, &key, &validation)?.claims;
        let email = claims
            .email
            .filter(|e| !e.trim().is_empty())
            .ok_or_else(|| AuthError::Verification("token carries no email".into()))?;

        Ok(GoogleIdentity {
            email,
            name: claims.name,
            photo_url: claims.picture,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use igmirror_core::testing::MemorySettings;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const TEST_KEY: &[u8] = include_bytes!("../tests/fixtures/firebase_test_key.pem");
    const TEST_JWKS: &str = include_str!("../tests/fixtures/firebase_test_jwks.json");

    fn sign(claims: serde_json::Value, kid: &str) -> String {
        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(kid.to_string());
        encode(&header, &claims, &EncodingKey::from_rsa_pem(TEST_KEY).unwrap()).unwrap()
    }

    fn claims_for(project: &str) -> serde_json::Value {
        let now = chrono::Utc::now().timestamp();
        serde_json::json!({
            "iss": format!("https://securetoken.google.com/{project}"),
            "aud": project,
            "sub": "firebase-uid-1",
            "iat": now,
            "exp": now + 600,
            "email": "ops@example.com",
            "name": "Ops Person",
            "picture": "https://lh3.example.com/photo.jpg",
        })
    }

    async fn verifier(server: &MockServer, service_account: &str) -> FirebaseVerifier {
        let store = Arc::new(MemorySettings::default());
        settings::save(
            store.as_ref(),
            &FirebaseAdminSettings {
                service_account_json: service_account.to_string(),
            },
        )
        .await
        .unwrap();
        FirebaseVerifier::new(store, format!("{}/jwks", server.uri()))
    }

    async fn jwks_server() -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(TEST_JWKS))
            .mount(&server)
            .await;
        server
    }

    #[test]
    fn test_project_id_parsing() {
        let ok = FirebaseAdminSettings {
            service_account_json: r#"{"project_id": "demo"}"#.into(),
        };
        assert_eq!(project_id(&ok).unwrap(), "demo");

        let blank = FirebaseAdminSettings::default();
        assert!(matches!(project_id(&blank), Err(AuthError::Configuration(_))));

        let broken = FirebaseAdminSettings {
            service_account_json: "{not json".into(),
        };
        assert!(matches!(project_id(&broken), Err(AuthError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_valid_token_yields_identity() {
        let server = jwks_server().await;
        let v = verifier(&server, r#"{"project_id": "demo-project"}"#).await;

        let token = sign(claims_for("demo-project"), "test-key-1");
        let identity = v.verify(&token).await.unwrap();
        assert_eq!(identity.email, "ops@example.com");
        assert_eq!(identity.name, "Ops Person");
        assert_eq!(identity.photo_url, "https://lh3.example.com/photo.jpg");
    }

    #[tokio::test]
    async fn test_wrong_audience_is_rejected() {
        let server = jwks_server().await;
        let v = verifier(&server, r#"{"project_id": "demo-project"}"#).await;

        let token = sign(claims_for("someone-else"), "test-key-1");
        assert!(v.verify(&token).await.is_err());
    }

    #[tokio::test]
    async fn test_unknown_kid_is_rejected() {
        let server = jwks_server().await;
        let v = verifier(&server, r#"{"project_id": "demo-project"}"#).await;

        let token = sign(claims_for("demo-project"), "rotated-away");
        let err = v.verify(&token).await.unwrap_err();
        assert!(matches!(err, AuthError::Verification(_)));
    }

    #[tokio::test]
    async fn test_missing_service_account_is_configuration_error() {
        let server = jwks_server().await;
        let v = verifier(&server, "").await;
        let token = sign(claims_for("demo-project"), "test-key-1");
        assert!(matches!(
            v.verify(&token).await,
            Err(AuthError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn test_garbage_token_is_rejected() {
        let server = jwks_server().await;
        let v = verifier(&server, r#"{"project_id": "demo-project"}"#).await;
        assert!(v.verify("not-a-jwt").await.is_err());
    }
}
