//! Transcript store: ordered messages of a chat session.

use chrono::{DateTime, Duration, SubsecRound, Utc};
use std::sync::Arc;

use crate::error::StoreError;
use crate::models::{ChatMessage, ChatSession, NewMessage};
use crate::store::ChatStore;

#[derive(Clone)]
pub struct Transcript {
    store: Arc<dyn ChatStore>,
}

impl Transcript {
    pub fn new(store: Arc<dyn ChatStore>) -> Self {
        Self { store }
    }

    /// Append `messages` atomically. Caller timestamps are kept as given;
    /// missing ones are stamped from the wall clock, one microsecond apart
    /// in submission order.
    pub async fn append(
        &self,
        session: &ChatSession,
        messages: Vec<NewMessage>,
    ) -> Result<u64, StoreError> {
        if messages.is_empty() {
            return Ok(0);
        }
        let stamped = stamp(messages, Utc::now());
        let inserted = self.store.insert_messages(session, &stamped).await?;
        tracing::debug!(
            session_key = %session.session_key,
            inserted,
            "Appended transcript messages"
        );
        Ok(inserted)
    }

    /// Messages oldest first. An empty session yields an empty list.
    pub async fn list(&self, session: &ChatSession) -> Result<Vec<ChatMessage>, StoreError> {
        self.store.list_messages(session.id).await
    }

    /// Delete all messages but keep the session and its key.
    pub async fn purge(&self, session: &ChatSession) -> Result<(), StoreError> {
        self.store.purge_session(session.id, Utc::now()).await?;
        tracing::info!(session_key = %session.session_key, "Purged session transcript");
        Ok(())
    }

    /// Delete the session; messages cascade.
    pub async fn drop_session(&self, session: &ChatSession) -> Result<(), StoreError> {
        let existed = self.store.delete_session(session.id).await?;
        tracing::info!(
            session_key = %session.session_key,
            existed,
            "Dropped session"
        );
        Ok(())
    }

    pub async fn touch(&self, session: &ChatSession) -> Result<(), StoreError> {
        self.store.touch_session(session.id, Utc::now()).await
    }
}

fn stamp(messages: Vec<NewMessage>, now: DateTime<Utc>) -> Vec<NewMessage> {
    // Postgres keeps microseconds.
    let base = now.trunc_subsecs(6);
    messages
        .into_iter()
        .enumerate()
        .map(|(i, mut m)| {
            if m.created_at.is_none() {
                m.created_at = Some(base + Duration::microseconds(i as i64));
            }
            m
        })
        .collect()
}
