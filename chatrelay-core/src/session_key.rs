//! Session keys: `<tenant-slug>:<token>`.
//!
//! The slug routes a turn to its tenant's upstream before the caller is
//! authenticated; the token is random and carries no meaning.

use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Slug used when a session id carries no tenant prefix.
pub const PUBLIC_SLUG: &str = "public";

/// Minimum token length accepted at the API boundary.
pub const MIN_TOKEN_LEN: usize = 10;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionKeyError {
    #[error("session key must be '<slug>:<token>'")]
    MissingSeparator,

    #[error("invalid tenant slug: {0:?}")]
    InvalidSlug(String),

    #[error("invalid session token")]
    InvalidToken,
}

/// A validated session key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionKey(String);

impl SessionKey {
    pub fn parse(raw: &str) -> Result<Self, SessionKeyError> {
        let (slug, token) = raw
            .split_once(':')
            .ok_or(SessionKeyError::MissingSeparator)?;
        validate_slug(slug)?;
        let token_ok = token.len() >= MIN_TOKEN_LEN
            && token
                .bytes()
                .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit());
        if !token_ok {
            return Err(SessionKeyError::InvalidToken);
        }
        Ok(Self(raw.to_string()))
    }

    /// Mint a fresh key for `slug` from 128 bits of OS randomness.
    pub fn mint(slug: &str) -> Result<Self, SessionKeyError> {
        validate_slug(slug)?;
        let mut bytes = [0u8; 16];
        OsRng.fill_bytes(&mut bytes);
        let token = u128::from_be_bytes(bytes);
        Ok(Self(format!("{}:{:032x}", slug, token)))
    }

    pub fn slug(&self) -> &str {
        tenant_slug(&self.0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for SessionKey {
    type Error = SessionKeyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        SessionKey::parse(&value)
    }
}

impl From<SessionKey> for String {
    fn from(key: SessionKey) -> Self {
        key.0
    }
}

impl AsRef<str> for SessionKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

pub fn validate_slug(slug: &str) -> Result<(), SessionKeyError> {
    let ok = !slug.is_empty()
        && slug
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-');
    if ok {
        Ok(())
    } else {
        Err(SessionKeyError::InvalidSlug(slug.to_string()))
    }
}

/// Routing slug for an arbitrary, unvalidated session id: the text before the
/// first `:`, or [`PUBLIC_SLUG`] when there is no separator or the prefix is empty.
pub fn tenant_slug(session_id: &str) -> &str {
    match session_id.split_once(':') {
        Some((slug, _)) if !slug.is_empty() => slug,
        _ => PUBLIC_SLUG,
    }
}
