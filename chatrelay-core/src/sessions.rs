//! Session resolver: maps `(user, tenant)` to a canonical chat session.

use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::{ChatSession, Membership, NewSession, DEFAULT_TITLE};
use crate::session_key::{SessionKey, SessionKeyError};
use crate::store::ChatStore;

/// Retries after a key collision before minting is treated as fatal.
pub const MINT_RETRIES: usize = 3;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("No account membership found for user")]
    NoMembership,

    #[error("Session not found")]
    NotFound,

    #[error("Session belongs to another user")]
    Forbidden,

    #[error("Invalid session key: {0}")]
    InvalidKey(#[from] SessionKeyError),

    #[error("Could not mint a unique session key after {0} attempts")]
    KeyCollision(usize),

    #[error("Session store error: {0}")]
    Store(#[from] StoreError),
}

#[derive(Clone)]
pub struct SessionResolver {
    store: Arc<dyn ChatStore>,
}

impl SessionResolver {
    pub fn new(store: Arc<dyn ChatStore>) -> Self {
        Self { store }
    }

    pub async fn membership(&self, user_id: Uuid) -> Result<Membership, SessionError> {
        self.store
            .first_membership(user_id)
            .await?
            .ok_or(SessionError::NoMembership)
    }

    /// The user's most recently active session in their first account, minted
    /// under `tenant_slug` (or the account's own slug) when none exists.
    ///
    /// Concurrent first calls may each mint a session; later calls settle on
    /// whichever was active most recently.
    pub async fn current(
        &self,
        user_id: Uuid,
        tenant_slug: Option<&str>,
    ) -> Result<ChatSession, SessionError> {
        let membership = self.membership(user_id).await?;

        if let Some(existing) = self
            .store
            .latest_session(membership.account_id, user_id)
            .await?
        {
            return Ok(existing);
        }

        let slug = tenant_slug.unwrap_or(&membership.account_slug);
        let session = self
            .mint(slug, membership.account_id, user_id, DEFAULT_TITLE)
            .await?;
        tracing::info!(
            session_key = %session.session_key,
            account_id = %membership.account_id,
            "Created canonical session"
        );
        Ok(session)
    }

    /// A new session for the same `(account, user)` as `previous`, keyed under
    /// the same tenant slug.
    pub async fn fresh(
        &self,
        user_id: Uuid,
        previous: &ChatSession,
    ) -> Result<ChatSession, SessionError> {
        Self::authorize(previous, user_id)?;
        let slug = crate::session_key::tenant_slug(&previous.session_key);
        self.mint(slug, previous.account_id, user_id, DEFAULT_TITLE)
            .await
    }

    pub async fn by_key(&self, key: &SessionKey) -> Result<ChatSession, SessionError> {
        self.store
            .session_by_key(key.as_str())
            .await?
            .ok_or(SessionError::NotFound)
    }

    pub fn authorize(session: &ChatSession, user_id: Uuid) -> Result<(), SessionError> {
        if session.user_id == user_id {
            Ok(())
        } else {
            Err(SessionError::Forbidden)
        }
    }

    /// `by_key` followed by `authorize`.
    pub async fn owned(&self, key: &SessionKey, user_id: Uuid) -> Result<ChatSession, SessionError> {
        let session = self.by_key(key).await?;
        Self::authorize(&session, user_id)?;
        Ok(session)
    }

    /// Find the session `(first account, user, key)`, creating it with `title`
    /// if absent. An existing session still titled with the placeholder takes
    /// `title`. `Ok(None)` when the user has no membership.
    pub async fn ensure(
        &self,
        user_id: Uuid,
        key: &SessionKey,
        title: &str,
    ) -> Result<Option<ChatSession>, SessionError> {
        let membership = match self.membership(user_id).await {
            Ok(m) => m,
            Err(SessionError::NoMembership) => return Ok(None),
            Err(e) => return Err(e),
        };

        if let Some(mut existing) = self
            .store
            .find_session(membership.account_id, user_id, key.as_str())
            .await?
        {
            // Sessions minted by `current` carry the placeholder until their first turn.
            if existing.title == DEFAULT_TITLE
                && title != DEFAULT_TITLE
                && self.store.retitle_placeholder(existing.id, title).await?
            {
                existing.title = title.to_string();
            }
            return Ok(Some(existing));
        }

        let inserted = self
            .store
            .insert_session(&NewSession {
                session_key: key.to_string(),
                account_id: membership.account_id,
                user_id,
                title: title.to_string(),
            })
            .await;
        match inserted {
            Ok(created) => {
                tracing::debug!(session_key = %key, "Created session on first turn");
                Ok(Some(created))
            }
            // A concurrent turn on the same key created the row first. If it
            // belongs to someone else the lookup misses and the violation stands.
            Err(e) if e.is_unique_violation() => {
                match self
                    .store
                    .find_session(membership.account_id, user_id, key.as_str())
                    .await?
                {
                    Some(existing) => {
                        tracing::debug!(session_key = %key, "Session created by a concurrent turn");
                        Ok(Some(existing))
                    }
                    None => Err(e.into()),
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn mint(
        &self,
        slug: &str,
        account_id: Uuid,
        user_id: Uuid,
        title: &str,
    ) -> Result<ChatSession, SessionError> {
        for attempt in 0..=MINT_RETRIES {
            let key = SessionKey::mint(slug)?;
            let new = NewSession {
                session_key: key.to_string(),
                account_id,
                user_id,
                title: title.to_string(),
            };
            match self.store.insert_session(&new).await {
                Ok(session) => return Ok(session),
                Err(e) if e.is_unique_violation() => {
                    tracing::warn!(attempt = attempt + 1, "Session key collision, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(SessionError::KeyCollision(MINT_RETRIES + 1))
    }
}
