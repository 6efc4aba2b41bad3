//! History API over the session resolver and transcript store.
//!
//! Reads degrade to an empty list on any lookup problem; writes fail loudly.

use axum::http::StatusCode;
use chatrelay_core::models::{ChatMessage, MessageRole, NewMessage};
use chatrelay_core::{SessionError, SessionKey};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::http::HttpState;

#[derive(Debug, Default, Deserialize)]
pub struct SessionQuery {
    #[serde(rename = "sessionId")]
    pub session_id: Option<String>,
    pub mode: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CurrentSessionQuery {
    pub account: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct IncomingMessage {
    pub role: Option<String>,
    pub content: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Deserialize)]
pub struct AppendRequest {
    #[serde(rename = "sessionId")]
    pub session_id: Option<String>,
    #[serde(default)]
    pub messages: Option<Vec<IncomingMessage>>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ClearRequest {
    #[serde(rename = "sessionId")]
    pub session_id: Option<String>,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct HistoryMessage {
    pub role: MessageRole,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl From<ChatMessage> for HistoryMessage {
    fn from(m: ChatMessage) -> Self {
        Self {
            role: m.role,
            content: m.content,
            created_at: m.created_at,
        }
    }
}

/// How `DELETE` treats a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearMode {
    /// Empty the transcript, keep the key.
    Purge,
    /// Retire the key and mint a new one.
    Reset,
}

impl FromStr for ClearMode {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "purge" | "clear" | "truncate" | "delete" => Ok(ClearMode::Purge),
            "reset" => Ok(ClearMode::Reset),
            other => Err(ApiError::bad_request(format!("Unknown mode: {}", other))),
        }
    }
}

fn require_session_key(raw: Option<&str>) -> Result<SessionKey, ApiError> {
    match raw {
        None | Some("") => Err(ApiError::bad_request("Missing sessionId")),
        Some(s) => Ok(SessionKey::parse(s)?),
    }
}

fn require_user(user: Option<AuthUser>) -> Result<AuthUser, ApiError> {
    user.ok_or(ApiError::Unauthorized)
}

fn respond(result: Result<serde_json::Value, ApiError>) -> (StatusCode, serde_json::Value) {
    match result {
        Ok(body) => (StatusCode::OK, body),
        Err(e) => e.into_parts(),
    }
}

/// Inner current-session lookup: returns (status_code, json_body).
pub async fn current_session_inner(
    state: &HttpState,
    user: Option<AuthUser>,
    query: CurrentSessionQuery,
) -> (StatusCode, serde_json::Value) {
    respond(current_session(state, user, query).await)
}

async fn current_session(
    state: &HttpState,
    user: Option<AuthUser>,
    query: CurrentSessionQuery,
) -> Result<serde_json::Value, ApiError> {
    let user = require_user(user)?;
    let slug = query.account.as_deref().filter(|s| !s.is_empty());
    let session = state.sessions.current(user.id, slug).await?;
    Ok(serde_json::json!({ "sessionId": session.session_key }))
}

/// Inner history read: returns (status_code, json_body).
///
/// Unknown sessions, sessions owned by someone else and store failures all
/// read as an empty history.
pub async fn get_history_inner(
    state: &HttpState,
    user: Option<AuthUser>,
    query: SessionQuery,
) -> (StatusCode, serde_json::Value) {
    let key = match require_session_key(query.session_id.as_deref()) {
        Ok(k) => k,
        Err(e) => return e.into_parts(),
    };
    let user = match require_user(user) {
        Ok(u) => u,
        Err(e) => return e.into_parts(),
    };

    let messages: Vec<HistoryMessage> = match state.sessions.owned(&key, user.id).await {
        Ok(session) => match state.transcript.list(&session).await {
            Ok(rows) => rows.into_iter().map(HistoryMessage::from).collect(),
            Err(e) => {
                tracing::warn!(session_key = %key, error = %e, "History read failed");
                Vec::new()
            }
        },
        Err(SessionError::NotFound) | Err(SessionError::Forbidden) => Vec::new(),
        Err(e) => {
            tracing::warn!(session_key = %key, error = %e, "History session lookup failed");
            Vec::new()
        }
    };

    (StatusCode::OK, serde_json::json!({ "messages": messages }))
}

/// Inner history append: returns (status_code, json_body).
pub async fn append_history_inner(
    state: &HttpState,
    user: Option<AuthUser>,
    req: AppendRequest,
) -> (StatusCode, serde_json::Value) {
    respond(append_history(state, user, req).await)
}

async fn append_history(
    state: &HttpState,
    user: Option<AuthUser>,
    req: AppendRequest,
) -> Result<serde_json::Value, ApiError> {
    let key = require_session_key(req.session_id.as_deref())?;
    let messages = validate_messages(req.messages)?;
    let user = require_user(user)?;

    let session = state.sessions.owned(&key, user.id).await?;
    let inserted = state.transcript.append(&session, messages).await?;
    state.transcript.touch(&session).await?;

    Ok(serde_json::json!({ "inserted": inserted }))
}

fn validate_messages(messages: Option<Vec<IncomingMessage>>) -> Result<Vec<NewMessage>, ApiError> {
    let messages = match messages {
        Some(m) if !m.is_empty() => m,
        _ => return Err(ApiError::bad_request("messages must be a non-empty array")),
    };

    messages
        .into_iter()
        .enumerate()
        .map(|(i, m)| -> Result<NewMessage, ApiError> {
            let role = m
                .role
                .as_deref()
                .ok_or_else(|| ApiError::bad_request(format!("messages[{}].role is required", i)))?
                .parse::<MessageRole>()
                .map_err(|e| ApiError::bad_request(format!("messages[{}]: {}", i, e)))?;
            let content = m.content.ok_or_else(|| {
                ApiError::bad_request(format!("messages[{}].content is required", i))
            })?;
            Ok(NewMessage {
                role,
                content,
                created_at: m.created_at,
            })
        })
        .collect()
}

/// Inner history delete: returns (status_code, json_body).
pub async fn clear_history_inner(
    state: &HttpState,
    user: Option<AuthUser>,
    query: SessionQuery,
) -> (StatusCode, serde_json::Value) {
    respond(clear_history(state, user, query).await)
}

async fn clear_history(
    state: &HttpState,
    user: Option<AuthUser>,
    query: SessionQuery,
) -> Result<serde_json::Value, ApiError> {
    let key = require_session_key(query.session_id.as_deref())?;
    let mode = match query.mode.as_deref() {
        None | Some("") => ClearMode::Reset,
        Some(m) => m.parse()?,
    };
    let user = require_user(user)?;

    let session = state.sessions.owned(&key, user.id).await?;
    match mode {
        ClearMode::Purge => {
            state.transcript.purge(&session).await?;
            Ok(serde_json::json!({ "ok": true, "sessionId": session.session_key }))
        }
        ClearMode::Reset => {
            state.transcript.drop_session(&session).await?;
            let fresh = state.sessions.fresh(user.id, &session).await?;
            tracing::info!(
                old_session_key = %session.session_key,
                session_key = %fresh.session_key,
                "Session reset"
            );
            Ok(serde_json::json!({ "sessionId": fresh.session_key }))
        }
    }
}

/// Inner `POST /api/history/clear`: purges and returns `{ok:true}`.
pub async fn clear_post_inner(
    state: &HttpState,
    user: Option<AuthUser>,
    req: ClearRequest,
) -> (StatusCode, serde_json::Value) {
    respond(clear_post(state, user, req).await)
}

async fn clear_post(
    state: &HttpState,
    user: Option<AuthUser>,
    req: ClearRequest,
) -> Result<serde_json::Value, ApiError> {
    let key = require_session_key(req.session_id.as_deref())?;
    let user = require_user(user)?;
    let session = state.sessions.owned(&key, user.id).await?;
    state.transcript.purge(&session).await?;
    Ok(serde_json::json!({ "ok": true }))
}
