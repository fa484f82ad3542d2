//! Bearer-token authentication.
//!
//! Tokens are HS256 JWTs whose `sub` claim is the numeric user id. The
//! middleware verifies the token and stores an [`AuthUser`] in the request
//! extensions; handlers receive it as an extractor.

use std::sync::Arc;

use axum::extract::{FromRequestParts, Request, State};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::middleware::Next;
use axum::response::Response;
use chrono::{Duration, Utc};
use common::UserId;
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

/// JWT settings.
#[derive(Clone)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    /// Lifetime of issued tokens, in seconds.
    pub ttl_secs: i64,
}

impl std::fmt::Debug for JwtConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtConfig")
            .field("secret", &"<redacted>")
            .field("issuer", &self.issuer)
            .field("ttl_secs", &self.ttl_secs)
            .finish()
    }
}

/// Token payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
}

/// Signs and verifies tokens with one configured secret.
#[derive(Clone)]
pub struct JwtManager {
    config: JwtConfig,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl JwtManager {
    pub fn new(config: JwtConfig) -> Self {
        let encoding_key = EncodingKey::from_secret(config.secret.as_bytes());
        let decoding_key = DecodingKey::from_secret(config.secret.as_bytes());

        Self {
            config,
            encoding_key,
            decoding_key,
        }
    }

    /// Issues a token for `user_id` valid for the configured lifetime.
    pub fn issue_token(&self, user_id: UserId) -> Result<String, ApiError> {
        let now = Utc::now();
        let claims = Claims {
            sub: user_id.to_string(),
            iat: now.timestamp(),
            exp: (now + Duration::seconds(self.config.ttl_secs)).timestamp(),
            iss: self.config.issuer.clone(),
        };

        encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|e| ApiError::Internal(format!("failed to sign token: {e}")))
    }

    /// Verifies signature, expiry and issuer, and returns the claims.
    pub fn verify_token(&self, token: &str) -> Result<Claims, ApiError> {
        let mut validation = Validation::default();
        validation.set_issuer(&[&self.config.issuer]);
        validation.set_required_spec_claims(&["exp", "sub", "iss"]);

        decode::<Claims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
                    ApiError::Unauthorized("token has expired".to_string())
                }
                _ => ApiError::Unauthorized("invalid token".to_string()),
            })
    }

    /// Verifies a token and returns the user it was issued to.
    pub fn authenticate(&self, token: &str) -> Result<UserId, ApiError> {
        self.verify_token(token)?
            .sub
            .parse()
            .map_err(|_| ApiError::Unauthorized("invalid token subject".to_string()))
    }
}

/// The authenticated caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthUser(pub UserId);

impl<S: Send + Sync> FromRequestParts<S> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthUser>()
            .copied()
            .ok_or_else(|| ApiError::Unauthorized("missing bearer token".to_string()))
    }
}

/// Rejects requests without a valid bearer token.
pub async fn require_auth(
    State(jwt): State<Arc<JwtManager>>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ApiError::Unauthorized("missing bearer token".to_string()))?;

    let user_id = jwt.authenticate(token)?;
    request.extensions_mut().insert(AuthUser(user_id));
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager(secret: &str, ttl_secs: i64) -> JwtManager {
        JwtManager::new(JwtConfig {
            secret: secret.to_string(),
            issuer: "zesty-sips".to_string(),
            ttl_secs,
        })
    }

    #[test]
    fn test_issue_and_authenticate() {
        let jwt = manager("s3cret", 60);
        let token = jwt.issue_token(UserId::new(42)).unwrap();
        assert_eq!(jwt.authenticate(&token).unwrap(), UserId::new(42));
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let token = manager("one", 60).issue_token(UserId::new(1)).unwrap();
        assert!(matches!(
            manager("two", 60).authenticate(&token),
            Err(ApiError::Unauthorized(_))
        ));
    }

    #[test]
    fn test_expired_token_rejected() {
        let jwt = manager("s3cret", -3600);
        let token = jwt.issue_token(UserId::new(1)).unwrap();
        match jwt.verify_token(&token) {
            Err(ApiError::Unauthorized(msg)) => assert_eq!(msg, "token has expired"),
            other => panic!("expected expiry rejection, got {other:?}"),
        }
    }

    #[test]
    fn test_wrong_issuer_rejected() {
        let token = manager("s3cret", 60).issue_token(UserId::new(1)).unwrap();
        let other = JwtManager::new(JwtConfig {
            secret: "s3cret".to_string(),
            issuer: "someone-else".to_string(),
            ttl_secs: 60,
        });
        assert!(other.verify_token(&token).is_err());
    }

    #[test]
    fn test_debug_hides_secret() {
        let config = JwtConfig {
            secret: "hunter2".to_string(),
            issuer: "zesty-sips".to_string(),
            ttl_secs: 60,
        };
        assert!(!format!("{config:?}").contains("hunter2"));
    }
}
