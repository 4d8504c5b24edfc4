//! JWT access/refresh token pair.
//!
//! Both tokens are HS256-signed and stateless. A refresh token can mint new
//! access tokens until it expires; it is never valid as an access token and
//! vice versa.

use axum::http::{header::AUTHORIZATION, HeaderMap};
use igmirror_core::config::AuthConfig;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Token error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    #[error("Wrong token type: expected {expected}")]
    WrongTokenType { expected: &'static str },

    #[error("Identity provider misconfigured: {0}")]
    Configuration(String),

    #[error("Identity verification failed: {0}")]
    Verification(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenType {
    Access,
    Refresh,
}

impl TokenType {
    fn as_str(&self) -> &'static str {
        match self {
            TokenType::Access => "access",
            TokenType::Refresh => "refresh",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    /// Account id.
    pub sub: Uuid,
    pub token_type: TokenType,
    pub exp: i64,
    pub iat: i64,
    pub jti: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TokenPair {
    pub refresh: String,
    pub access: String,
}

#[derive(Clone)]
pub struct JwtKeys {
    secret: String,
    access_minutes: i64,
    refresh_days: i64,
}

impl JwtKeys {
    pub fn new(secret: impl Into<String>, access_minutes: i64, refresh_days: i64) -> Self {
        Self {
            secret: secret.into(),
            access_minutes,
            refresh_days,
        }
    }

    pub fn from_config(config: &AuthConfig) -> Self {
        Self::new(
            config.jwt_secret.clone(),
            config.access_token_minutes,
            config.refresh_token_days,
        )
    }

    /// Fresh access + refresh pair for a signed-in account.
    pub fn issue_pair(&self, account_id: Uuid) -> Result<TokenPair, AuthError> {
        Ok(TokenPair {
            refresh: self.sign(account_id, TokenType::Refresh)?,
            access: self.sign(account_id, TokenType::Access)?,
        })
    }

    /// New access token for a still-valid refresh token; the refresh token
    /// itself is handed back unchanged.
    pub fn refresh(&self, refresh_token: &str) -> Result<TokenPair, AuthError> {
        let claims = self.decode(refresh_token, TokenType::Refresh)?;
        Ok(TokenPair {
            refresh: refresh_token.to_string(),
            access: self.sign(claims.sub, TokenType::Access)?,
        })
    }

    pub fn validate_access(&self, token: &str) -> Result<Claims, AuthError> {
        self.decode(token, TokenType::Access)
    }

    fn sign(&self, sub: Uuid, token_type: TokenType) -> Result<String, AuthError> {
        let now = chrono::Utc::now().timestamp();
        let ttl = match token_type {
            TokenType::Access => self.access_minutes * 60,
            TokenType::Refresh => self.refresh_days * 24 * 60 * 60,
        };
        let claims = Claims {
            sub,
            token_type,
            exp: now + ttl,
            iat: now,
            jti: Uuid::new_v4().to_string(),
        };
        Ok(encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )?)
    }

    fn decode(&self, token: &str, expected: TokenType) -> Result<Claims, AuthError> {
        let data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &Validation::default(),
        )?;
        if data.claims.token_type != expected {
            return Err(AuthError::WrongTokenType {
                expected: expected.as_str(),
            });
        }
        Ok(data.claims)
    }
}

/// Token from an `Authorization: Bearer <token>` header.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn keys() -> JwtKeys {
        JwtKeys::new("test-secret-that-is-long-enough-for-hmac", 60, 7)
    }

    #[test]
    fn test_issue_and_validate_access() {
        let id = Uuid::new_v4();
        let pair = keys().issue_pair(id).unwrap();
        let claims = keys().validate_access(&pair.access).unwrap();
        assert_eq!(claims.sub, id);
        assert_eq!(claims.token_type, TokenType::Access);
        assert!(claims.exp > claims.iat);
    }

    #[test]
    fn test_refresh_token_is_not_an_access_token() {
        let pair = keys().issue_pair(Uuid::new_v4()).unwrap();
        let err = keys().validate_access(&pair.refresh).unwrap_err();
        assert!(matches!(err, AuthError::WrongTokenType { .. }));
    }

    #[test]
    fn test_access_token_cannot_refresh() {
        let pair = keys().issue_pair(Uuid::new_v4()).unwrap();
        assert!(keys().refresh(&pair.access).is_err());
    }

    #[test]
    fn test_refresh_returns_same_refresh_and_new_access() {
        let id = Uuid::new_v4();
        let pair = keys().issue_pair(id).unwrap();
        let refreshed = keys().refresh(&pair.refresh).unwrap();
        assert_eq!(refreshed.refresh, pair.refresh);
        assert_eq!(keys().validate_access(&refreshed.access).unwrap().sub, id);
    }

    #[test]
    fn test_expired_token_fails() {
        let now = chrono::Utc::now().timestamp();
        let claims = Claims {
            sub: Uuid::new_v4(),
            token_type: TokenType::Access,
            exp: now - 300,
            iat: now - 600,
            jti: Uuid::new_v4().to_string(),
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(b"test-secret-that-is-long-enough-for-hmac"),
        )
        .unwrap();
        assert!(keys().validate_access(&token).is_err());
    }

    #[test]
    fn test_different_secret_fails() {
        let pair = keys().issue_pair(Uuid::new_v4()).unwrap();
        let other = JwtKeys::new("another-secret", 60, 7);
        assert!(other.validate_access(&pair.access).is_err());
    }

    #[test]
    fn test_bearer_token_parsing() {
        let mut h = HeaderMap::new();
        assert_eq!(bearer_token(&h), None);
        h.insert(AUTHORIZATION, HeaderValue::from_static("Bearer abc.def"));
        assert_eq!(bearer_token(&h), Some("abc.def"));
        h.insert(AUTHORIZATION, HeaderValue::from_static("Token abc"));
        assert_eq!(bearer_token(&h), None);
        h.insert(AUTHORIZATION, HeaderValue::from_static("Bearer   "));
        assert_eq!(bearer_token(&h), None);
    }
}
