use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const DEFAULT_TITLE: &str = "New chat";

/// Maximum title length, in characters, derived from the first user turn.
pub const TITLE_MAX_CHARS: usize = 80;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct ChatSession {
    pub id: Uuid,
    pub session_key: String,
    pub account_id: Uuid,
    pub user_id: Uuid,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSession {
    pub session_key: String,
    pub account_id: Uuid,
    pub user_id: Uuid,
    pub title: String,
}

/// Title for a session first seen through a chat turn.
pub fn title_from_input(chat_input: &str) -> String {
    if chat_input.is_empty() {
        return DEFAULT_TITLE.to_string();
    }
    chat_input.chars().take(TITLE_MAX_CHARS).collect()
}
