//! # JWT Access Tokens
//!
//! Verification of the BaaS access tokens callers present to the
//! function endpoints, plus token issuing for development.
//!
//! ## Invariants
//! - Stateless validation (no lookup)
//! - HS256 only
//! - The subject is always a user UUID

use axum::http::{header::AUTHORIZATION, HeaderMap};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::errors::{AuthError, AuthResult};

/// Claims carried by an access token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JwtClaims {
    /// Subject (user ID)
    pub sub: String,

    /// User's email
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    /// Database role, `authenticated` for signed-in users
    #[serde(default = "default_role")]
    pub role: String,

    /// Audience
    pub aud: String,

    /// Expiration timestamp (Unix epoch seconds)
    pub exp: i64,

    /// Issued at timestamp (Unix epoch seconds)
    pub iat: i64,
}

fn default_role() -> String {
    "authenticated".to_string()
}

/// JWT configuration
#[derive(Debug, Clone)]
pub struct JwtConfig {
    /// Shared HS256 secret of the project
    pub secret: String,

    /// Expected audience
    pub audience: String,

    /// Lifetime of issued tokens
    pub access_token_ttl: Duration,
}

impl JwtConfig {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            audience: "authenticated".to_string(),
            access_token_ttl: Duration::hours(1),
        }
    }
}

/// Token verification and issuing
#[derive(Clone)]
pub struct JwtManager {
    config: JwtConfig,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl std::fmt::Debug for JwtManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtManager")
            .field("audience", &self.config.audience)
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

impl JwtManager {
    /// Create a manager; the secret must not be empty
    pub fn new(config: JwtConfig) -> AuthResult<Self> {
        if config.secret.is_empty() {
            return Err(AuthError::ConfigError("jwt secret must not be empty".into()));
        }

        let encoding_key = EncodingKey::from_secret(config.secret.as_bytes());
        let decoding_key = DecodingKey::from_secret(config.secret.as_bytes());

        Ok(Self {
            config,
            encoding_key,
            decoding_key,
        })
    }

    /// Issue an access token for a user
    pub fn issue(&self, user_id: Uuid, email: Option<&str>) -> AuthResult<String> {
        let now = Utc::now();
        let exp = now + self.config.access_token_ttl;

        let claims = JwtClaims {
            sub: user_id.to_string(),
            email: email.map(str::to_string),
            role: default_role(),
            aud: self.config.audience.clone(),
            exp: exp.timestamp(),
            iat: now.timestamp(),
        };

        encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|_| AuthError::TokenGenerationFailed)
    }

    /// Validate a token and extract its claims
    pub fn validate_token(&self, token: &str) -> AuthResult<JwtClaims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_audience(&[&self.config.audience]);

        let token_data =
            decode::<JwtClaims>(token, &self.decoding_key, &validation).map_err(|e| {
                match e.kind() {
                    jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::TokenExpired,
                    jsonwebtoken::errors::ErrorKind::InvalidSignature => {
                        AuthError::InvalidSignature
                    }
                    _ => AuthError::MalformedToken,
                }
            })?;

        Ok(token_data.claims)
    }

    /// Validate the bearer token of a request and return the caller
    pub fn authenticate(&self, headers: &HeaderMap) -> AuthResult<AuthenticatedUser> {
        let token = extract_bearer(headers)?;
        let claims = self.validate_token(token)?;
        AuthenticatedUser::from_claims(&claims)
    }
}

/// Caller identity derived from validated claims
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub id: Uuid,
    pub email: Option<String>,
}

impl AuthenticatedUser {
    pub fn from_claims(claims: &JwtClaims) -> AuthResult<Self> {
        let id = Uuid::parse_str(&claims.sub)
            .map_err(|_| AuthError::InvalidSubject(claims.sub.clone()))?;
        Ok(Self {
            id,
            email: claims.email.clone(),
        })
    }
}

/// Extract the bearer token from the Authorization header
pub fn extract_bearer(headers: &HeaderMap) -> AuthResult<&str> {
    let value = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(AuthError::MissingToken)?;

    let (scheme, token) = value.split_once(' ').ok_or(AuthError::MissingToken)?;
    let token = token.trim();
    if !scheme.eq_ignore_ascii_case("bearer") || token.is_empty() {
        return Err(AuthError::MissingToken);
    }

    Ok(token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn create_test_manager() -> JwtManager {
        JwtManager::new(JwtConfig::new("test_secret_key_for_testing_only")).unwrap()
    }

    #[test]
    fn test_empty_secret_rejected() {
        assert!(matches!(
            JwtManager::new(JwtConfig::new("")),
            Err(AuthError::ConfigError(_))
        ));
    }

    #[test]
    fn test_issue_and_validate() {
        let manager = create_test_manager();
        let user_id = Uuid::new_v4();

        let token = manager.issue(user_id, Some("coach@example.com")).unwrap();
        assert_eq!(token.split('.').count(), 3);

        let claims = manager.validate_token(&token).unwrap();
        assert_eq!(claims.sub, user_id.to_string());
        assert_eq!(claims.email.as_deref(), Some("coach@example.com"));
        assert_eq!(claims.role, "authenticated");
        assert_eq!(claims.aud, "authenticated");
    }

    #[test]
    fn test_invalid_token_rejected() {
        let manager = create_test_manager();

        let result = manager.validate_token("invalid.token.here");
        assert!(matches!(
            result,
            Err(AuthError::MalformedToken) | Err(AuthError::InvalidSignature)
        ));
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let manager1 = JwtManager::new(JwtConfig::new("secret_one")).unwrap();
        let manager2 = JwtManager::new(JwtConfig::new("secret_two")).unwrap();

        let token = manager1.issue(Uuid::new_v4(), None).unwrap();

        let result = manager2.validate_token(&token);
        assert!(matches!(result, Err(AuthError::InvalidSignature)));
    }

    #[test]
    fn test_expired_token_rejected() {
        let secret = "test_secret";
        let encoding_key = EncodingKey::from_secret(secret.as_bytes());

        let now = Utc::now();
        let claims = JwtClaims {
            sub: Uuid::new_v4().to_string(),
            email: None,
            role: "authenticated".to_string(),
            aud: "authenticated".to_string(),
            iat: (now - Duration::hours(2)).timestamp(),
            exp: (now - Duration::hours(1)).timestamp(),
        };
        let token = encode(&Header::default(), &claims, &encoding_key).unwrap();

        let manager = JwtManager::new(JwtConfig::new(secret)).unwrap();
        assert!(matches!(
            manager.validate_token(&token),
            Err(AuthError::TokenExpired)
        ));
    }

    #[test]
    fn test_non_uuid_subject_rejected() {
        let claims = JwtClaims {
            sub: "service-role".to_string(),
            email: None,
            role: "service_role".to_string(),
            aud: "authenticated".to_string(),
            iat: 0,
            exp: 0,
        };
        assert!(matches!(
            AuthenticatedUser::from_claims(&claims),
            Err(AuthError::InvalidSubject(_))
        ));
    }

    #[test]
    fn test_extract_bearer() {
        let mut headers = HeaderMap::new();
        assert_eq!(extract_bearer(&headers), Err(AuthError::MissingToken));

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert_eq!(extract_bearer(&headers), Err(AuthError::MissingToken));

        headers.insert(AUTHORIZATION, HeaderValue::from_static("bearer abc.def.ghi"));
        assert_eq!(extract_bearer(&headers), Ok("abc.def.ghi"));
    }

    #[test]
    fn test_authenticate_headers() {
        let manager = create_test_manager();
        let user_id = Uuid::new_v4();
        let token = manager.issue(user_id, None).unwrap();

        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", token)).unwrap(),
        );

        let user = manager.authenticate(&headers).unwrap();
        assert_eq!(user.id, user_id);
    }
}
