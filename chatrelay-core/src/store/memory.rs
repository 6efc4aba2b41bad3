//! In-process `ChatStore` for tests and local runs without Postgres.
//!
//! Mirrors the Postgres constraints that matter to callers: global key
//! uniqueness, cascade on session delete, all-or-none message batches.
//! Reads and writes can be made to fail to exercise degraded paths.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use super::ChatStore;
use crate::error::StoreError;
use crate::models::{
    ChatMessage, ChatSession, Membership, NewMessage, NewSession, WebhookBinding, DEFAULT_TITLE,
};

#[derive(Default)]
struct State {
    accounts: HashMap<Uuid, String>,
    memberships: Vec<(Uuid, Uuid)>,
    webhooks: HashMap<String, WebhookBinding>,
    sessions: HashMap<Uuid, ChatSession>,
    // (seq, message)
    messages: Vec<(u64, ChatMessage)>,
    next_seq: u64,
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>, StoreError> {
        self.state
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".to_string()))
    }

    fn check_read(&self) -> Result<(), StoreError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("injected read failure".to_string()));
        }
        Ok(())
    }

    fn check_write(&self) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("injected write failure".to_string()));
        }
        Ok(())
    }

    /// Make every subsequent read fail until reset.
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Make every subsequent write fail until reset.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Provision an account and return its UUID.
    pub fn add_account(&self, slug: &str) -> Result<Uuid, StoreError> {
        let mut state = self.lock()?;
        if let Some((id, _)) = state.accounts.iter().find(|(_, s)| s.as_str() == slug) {
            return Ok(*id);
        }
        let id = Uuid::new_v4();
        state.accounts.insert(id, slug.to_string());
        Ok(id)
    }

    pub fn add_membership(&self, user_id: Uuid, account_id: Uuid) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        if !state.accounts.contains_key(&account_id) {
            return Err(StoreError::Constraint(format!(
                "account {} does not exist",
                account_id
            )));
        }
        if !state.memberships.contains(&(user_id, account_id)) {
            state.memberships.push((user_id, account_id));
        }
        Ok(())
    }

    pub fn add_webhook(&self, binding: WebhookBinding) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        state.webhooks.insert(binding.account_id.clone(), binding);
        Ok(())
    }

    /// Total number of stored sessions.
    pub fn session_count(&self) -> usize {
        self.lock().map(|s| s.sessions.len()).unwrap_or(0)
    }

    /// Total number of stored messages across all sessions.
    pub fn message_count(&self) -> usize {
        self.lock().map(|s| s.messages.len()).unwrap_or(0)
    }
}

#[async_trait]
impl ChatStore for MemoryStore {
    async fn webhook_binding(&self, slug: &str) -> Result<Option<WebhookBinding>, StoreError> {
        self.check_read()?;
        Ok(self.lock()?.webhooks.get(slug).cloned())
    }

    async fn first_membership(&self, user_id: Uuid) -> Result<Option<Membership>, StoreError> {
        self.check_read()?;
        let state = self.lock()?;
        let membership = state
            .memberships
            .iter()
            .find(|(u, _)| *u == user_id)
            .and_then(|(_, account_id)| {
                state.accounts.get(account_id).map(|slug| Membership {
                    user_id,
                    account_id: *account_id,
                    account_slug: slug.clone(),
                })
            });
        Ok(membership)
    }

    async fn latest_session(
        &self,
        account_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<ChatSession>, StoreError> {
        self.check_read()?;
        let state = self.lock()?;
        Ok(state
            .sessions
            .values()
            .filter(|s| s.account_id == account_id && s.user_id == user_id)
            .max_by_key(|s| s.last_activity_at)
            .cloned())
    }

    async fn session_by_key(&self, session_key: &str) -> Result<Option<ChatSession>, StoreError> {
        self.check_read()?;
        let state = self.lock()?;
        Ok(state
            .sessions
            .values()
            .find(|s| s.session_key == session_key)
            .cloned())
    }

    async fn find_session(
        &self,
        account_id: Uuid,
        user_id: Uuid,
        session_key: &str,
    ) -> Result<Option<ChatSession>, StoreError> {
        self.check_read()?;
        let state = self.lock()?;
        Ok(state
            .sessions
            .values()
            .find(|s| {
                s.account_id == account_id && s.user_id == user_id && s.session_key == session_key
            })
            .cloned())
    }

    async fn insert_session(&self, session: &NewSession) -> Result<ChatSession, StoreError> {
        self.check_write()?;
        let mut state = self.lock()?;
        if state
            .sessions
            .values()
            .any(|s| s.session_key == session.session_key)
        {
            return Err(StoreError::UniqueViolation(format!(
                "duplicate session_key {}",
                session.session_key
            )));
        }
        if !state.accounts.contains_key(&session.account_id) {
            return Err(StoreError::Constraint(format!(
                "account {} does not exist",
                session.account_id
            )));
        }
        let now = Utc::now();
        let created = ChatSession {
            id: Uuid::new_v4(),
            session_key: session.session_key.clone(),
            account_id: session.account_id,
            user_id: session.user_id,
            title: session.title.clone(),
            created_at: now,
            updated_at: now,
            last_activity_at: now,
        };
        state.sessions.insert(created.id, created.clone());
        Ok(created)
    }

    async fn insert_messages(
        &self,
        session: &ChatSession,
        messages: &[NewMessage],
    ) -> Result<u64, StoreError> {
        self.check_write()?;
        let mut state = self.lock()?;
        if !state.sessions.contains_key(&session.id) {
            return Err(StoreError::Constraint(format!(
                "session {} does not exist",
                session.id
            )));
        }
        for message in messages {
            let created_at = message.created_at.unwrap_or_else(Utc::now);
            let seq = state.next_seq;
            state.next_seq += 1;
            state.messages.push((
                seq,
                ChatMessage {
                    id: Uuid::new_v4(),
                    session_id: session.id,
                    account_id: session.account_id,
                    user_id: session.user_id,
                    role: message.role,
                    content: message.content.clone(),
                    created_at,
                },
            ));
        }
        Ok(messages.len() as u64)
    }

    async fn list_messages(&self, session_id: Uuid) -> Result<Vec<ChatMessage>, StoreError> {
        self.check_read()?;
        let state = self.lock()?;
        let mut rows: Vec<&(u64, ChatMessage)> = state
            .messages
            .iter()
            .filter(|(_, m)| m.session_id == session_id)
            .collect();
        rows.sort_by(|(a_seq, a), (b_seq, b)| {
            a.created_at.cmp(&b.created_at).then(a_seq.cmp(b_seq))
        });
        Ok(rows.into_iter().map(|(_, m)| m.clone()).collect())
    }

    async fn purge_session(&self, session_id: Uuid, now: DateTime<Utc>) -> Result<(), StoreError> {
        self.check_write()?;
        let mut state = self.lock()?;
        state.messages.retain(|(_, m)| m.session_id != session_id);
        if let Some(session) = state.sessions.get_mut(&session_id) {
            session.title = DEFAULT_TITLE.to_string();
            session.updated_at = now;
            session.last_activity_at = now;
        }
        Ok(())
    }

    async fn delete_session(&self, session_id: Uuid) -> Result<bool, StoreError> {
        self.check_write()?;
        let mut state = self.lock()?;
        let existed = state.sessions.remove(&session_id).is_some();
        state.messages.retain(|(_, m)| m.session_id != session_id);
        Ok(existed)
    }

    async fn touch_session(&self, session_id: Uuid, now: DateTime<Utc>) -> Result<(), StoreError> {
        self.check_write()?;
        let mut state = self.lock()?;
        if let Some(session) = state.sessions.get_mut(&session_id) {
            session.updated_at = now;
            session.last_activity_at = now;
        }
        Ok(())
    }

    async fn retitle_placeholder(&self, session_id: Uuid, title: &str) -> Result<bool, StoreError> {
        self.check_write()?;
        let mut state = self.lock()?;
        match state.sessions.get_mut(&session_id) {
            Some(session) if session.title == DEFAULT_TITLE => {
                session.title = title.to_string();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn health(&self) -> Result<String, StoreError> {
        self.check_read()?;
        Ok("memory".to_string())
    }
}
