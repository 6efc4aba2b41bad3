//! User identity from the data service's access token.
//!
//! Tokens are HS256 JWTs whose `sub` is the user UUID. They arrive as
//! `Authorization: Bearer <token>` or, for browser clients, in a cookie.

use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::{header, request::Parts, HeaderMap};
use chatrelay_core::config::AuthConfig;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::error::ApiError;
use crate::http::HttpState;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing access token")]
    MissingToken,

    #[error("malformed Authorization header")]
    InvalidAuthHeader,

    #[error("access token expired")]
    TokenExpired,

    #[error("invalid access token: {0}")]
    InvalidToken(String),

    #[error("token subject is not a user id")]
    InvalidSubject,

    #[error("no JWT secret configured")]
    NotConfigured,
}

impl From<AuthError> for ApiError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::NotConfigured => tracing::error!("Rejecting request: {}", e),
            _ => tracing::debug!("Rejecting request: {}", e),
        }
        ApiError::Unauthorized
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: i64,
}

/// The authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    pub id: Uuid,
}

#[derive(Clone)]
pub struct AuthState {
    decoding_key: Option<DecodingKey>,
    cookie_name: String,
}

impl AuthState {
    pub fn new(config: &AuthConfig) -> Self {
        let decoding_key = config
            .jwt_secret
            .as_ref()
            .map(|s| DecodingKey::from_secret(s.as_bytes()));
        Self {
            decoding_key,
            cookie_name: config.cookie_name.clone(),
        }
    }

    pub fn validate_token(&self, token: &str) -> Result<AuthUser, AuthError> {
        let key = self.decoding_key.as_ref().ok_or(AuthError::NotConfigured)?;

        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        // Supabase sets aud = "authenticated"; it is not checked here.
        validation.validate_aud = false;

        let data = decode::<Claims>(token, key, &validation).map_err(|e| match e.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::TokenExpired,
            _ => AuthError::InvalidToken(e.to_string()),
        })?;

        let id = Uuid::parse_str(&data.claims.sub).map_err(|_| AuthError::InvalidSubject)?;
        Ok(AuthUser { id })
    }

    /// Resolve the caller from request headers. Bearer header wins over cookie.
    pub fn authenticate(&self, headers: &HeaderMap) -> Result<AuthUser, AuthError> {
        if let Some(value) = headers.get(header::AUTHORIZATION) {
            let value = value.to_str().map_err(|_| AuthError::InvalidAuthHeader)?;
            let token = bearer_token(value)?;
            return self.validate_token(token);
        }

        let cookie_token = headers
            .get_all(header::COOKIE)
            .iter()
            .filter_map(|h| h.to_str().ok())
            .find_map(|h| cookie_value(h, &self.cookie_name));

        match cookie_token {
            Some(token) => self.validate_token(token),
            None => Err(AuthError::MissingToken),
        }
    }
}

fn bearer_token(header_value: &str) -> Result<&str, AuthError> {
    let mut parts = header_value.split_whitespace();
    let scheme = parts.next().ok_or(AuthError::InvalidAuthHeader)?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(AuthError::InvalidAuthHeader);
    }
    let token = parts.next().ok_or(AuthError::InvalidAuthHeader)?;
    if parts.next().is_some() {
        return Err(AuthError::InvalidAuthHeader);
    }
    Ok(token)
}

fn cookie_value<'a>(cookie_header: &'a str, name: &str) -> Option<&'a str> {
    cookie_header.split(';').map(str::trim).find_map(|pair| {
        let (k, v) = pair.split_once('=')?;
        (k.trim() == name && !v.trim().is_empty()).then(|| v.trim())
    })
}

/// Rejects with 401. Handlers that must check input before identity take
/// `Option<AuthUser>` instead.
#[async_trait]
impl FromRequestParts<Arc<HttpState>> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<HttpState>,
    ) -> Result<Self, Self::Rejection> {
        Ok(state.auth.authenticate(&parts.headers)?)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use jsonwebtoken::{encode, EncodingKey, Header};

    pub(crate) const SECRET: &str = "test-jwt-secret";

    pub(crate) fn token_for(user: Uuid, secret: &str, exp_offset_secs: i64) -> String {
        let claims = Claims {
            sub: user.to_string(),
            exp: chrono::Utc::now().timestamp() + exp_offset_secs,
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    fn state() -> AuthState {
        AuthState::new(&AuthConfig {
            jwt_secret: Some(SECRET.to_string()),
            cookie_name: "sb-access-token".to_string(),
        })
    }

    #[test]
    fn test_bearer_token_accepted() {
        let user = Uuid::new_v4();
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", token_for(user, SECRET, 600))).unwrap(),
        );
        let auth = state().authenticate(&headers).unwrap();
        assert_eq!(auth.id, user);
    }

    #[test]
    fn test_cookie_token_accepted() {
        let user = Uuid::new_v4();
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_str(&format!(
                "theme=dark; sb-access-token={}",
                token_for(user, SECRET, 600)
            ))
            .unwrap(),
        );
        assert_eq!(state().authenticate(&headers).unwrap().id, user);
    }

    #[test]
    fn test_missing_token() {
        assert!(matches!(
            state().authenticate(&HeaderMap::new()),
            Err(AuthError::MissingToken)
        ));
    }

    #[test]
    fn test_wrong_secret_and_expired_rejected() {
        let user = Uuid::new_v4();
        assert!(matches!(
            state().validate_token(&token_for(user, "other-secret", 600)),
            Err(AuthError::InvalidToken(_))
        ));
        assert!(matches!(
            state().validate_token(&token_for(user, SECRET, -3600)),
            Err(AuthError::TokenExpired)
        ));
    }

    #[test]
    fn test_non_bearer_scheme_rejected() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert!(matches!(
            state().authenticate(&headers),
            Err(AuthError::InvalidAuthHeader)
        ));
    }

    #[test]
    fn test_unconfigured_secret_rejects() {
        let auth = AuthState::new(&AuthConfig::default());
        assert!(matches!(
            auth.validate_token("whatever"),
            Err(AuthError::NotConfigured)
        ));
    }
}
