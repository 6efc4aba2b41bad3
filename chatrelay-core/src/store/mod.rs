//! Data service access.
//!
//! `ChatStore` is the privileged-identity view of the data service: it does
//! not enforce ownership. Callers in `sessions`, `transcript` and the HTTP
//! layer check ownership before touching a user's rows.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::{ChatMessage, ChatSession, Membership, NewMessage, NewSession, WebhookBinding};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[async_trait]
pub trait ChatStore: Send + Sync {
    /// Webhook binding for a tenant slug.
    async fn webhook_binding(&self, slug: &str) -> Result<Option<WebhookBinding>, StoreError>;

    /// The user's first account membership (oldest first).
    async fn first_membership(&self, user_id: Uuid) -> Result<Option<Membership>, StoreError>;

    /// Most recently active session for `(account, user)`.
    async fn latest_session(
        &self,
        account_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<ChatSession>, StoreError>;

    async fn session_by_key(&self, session_key: &str) -> Result<Option<ChatSession>, StoreError>;

    async fn find_session(
        &self,
        account_id: Uuid,
        user_id: Uuid,
        session_key: &str,
    ) -> Result<Option<ChatSession>, StoreError>;

    /// Insert a session row. A taken key surfaces as `StoreError::UniqueViolation`.
    async fn insert_session(&self, session: &NewSession) -> Result<ChatSession, StoreError>;

    /// Insert all rows in one transaction, denormalizing account and user from
    /// `session`. Rows without a timestamp get the store's clock.
    async fn insert_messages(
        &self,
        session: &ChatSession,
        messages: &[NewMessage],
    ) -> Result<u64, StoreError>;

    /// Messages ordered by `created_at`, insertion order breaking ties.
    async fn list_messages(&self, session_id: Uuid) -> Result<Vec<ChatMessage>, StoreError>;

    /// Delete every message of the session, reset its title and bump its timestamps.
    async fn purge_session(&self, session_id: Uuid, now: DateTime<Utc>) -> Result<(), StoreError>;

    /// Delete the session row; its messages go with it. Returns whether a row existed.
    async fn delete_session(&self, session_id: Uuid) -> Result<bool, StoreError>;

    /// Bump `updated_at` and `last_activity_at`.
    async fn touch_session(&self, session_id: Uuid, now: DateTime<Utc>) -> Result<(), StoreError>;

    /// Replace the title if it is still the placeholder. Returns whether it changed.
    async fn retitle_placeholder(&self, session_id: Uuid, title: &str) -> Result<bool, StoreError>;

    /// Backend description for health reporting.
    async fn health(&self) -> Result<String, StoreError>;
}
