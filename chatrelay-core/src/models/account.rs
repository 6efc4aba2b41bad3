use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Upstream webhook configured for a tenant slug.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct WebhookBinding {
    pub account_id: String,
    pub webhook_url: String,
    pub webhook_auth: Option<String>,
}

/// A user's membership in an account, joined with the account's slug.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Membership {
    pub user_id: Uuid,
    pub account_id: Uuid,
    pub account_slug: String,
}
