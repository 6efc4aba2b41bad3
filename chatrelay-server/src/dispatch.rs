//! Chat dispatcher: routes a user turn to its tenant's webhook and records
//! the transcript.
//!
//! The reply is authoritative. Recording it is best-effort: failures are
//! logged and never change what the caller sees.

use axum::http::StatusCode;
use chatrelay_core::models::session::title_from_input;
use chatrelay_core::models::{MessageRole, NewMessage};
use chatrelay_core::{tenant_slug, SessionError, SessionKey, SessionResolver, StoreError, Transcript};
use serde::Deserialize;
use thiserror::Error;
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::http::HttpState;
use crate::upstream::UpstreamPayload;

#[derive(Debug, Default, Deserialize)]
pub struct ChatRequest {
    #[serde(rename = "chatInput", default)]
    pub chat_input: Option<String>,
    #[serde(rename = "sessionId", default)]
    pub session_id: Option<String>,
}

/// One completed turn to be written to the transcript.
#[derive(Debug, Clone)]
pub struct TurnRecord {
    pub user_id: Uuid,
    pub session_id: String,
    pub chat_input: String,
    pub reply: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistOutcome {
    Recorded,
    SkippedMalformedKey,
    SkippedNoMembership,
}

#[derive(Error, Debug)]
pub enum PersistError {
    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Inner chat turn: returns (status_code, json_body).
pub async fn chat_inner(
    state: &HttpState,
    user: Option<AuthUser>,
    req: ChatRequest,
) -> (StatusCode, serde_json::Value) {
    let chat_input = req.chat_input.unwrap_or_default();
    let session_id = req.session_id.unwrap_or_default();
    let slug = tenant_slug(&session_id).to_string();

    let target = match state.registry.lookup(&slug).await {
        Ok(t) => t,
        Err(e) => return ApiError::from(e).into_parts(),
    };

    let payload = UpstreamPayload {
        chat_input: chat_input.clone(),
        session_id: session_id.clone(),
        account_id: slug.clone(),
    };
    let upstream = match state.upstream.send(&target, &payload).await {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!(slug = %slug, error = %e, "Upstream webhook call failed");
            return ApiError::from(e).into_parts();
        }
    };

    if let Some(user) = user.filter(|_| !session_id.is_empty()) {
        let record = TurnRecord {
            user_id: user.id,
            session_id,
            chat_input,
            reply: upstream.reply.clone(),
        };
        // Spawned so a dropped request cannot cancel it; awaited so the turn
        // is recorded before the reply goes out.
        let handle = tokio::spawn(record_turn(
            state.sessions.clone(),
            state.transcript.clone(),
            record,
        ));
        if let Err(e) = handle.await {
            tracing::error!(error = %e, "Transcript persistence task panicked");
        }
    }

    (
        upstream.status,
        serde_json::json!({ "reply": upstream.reply }),
    )
}

/// Best-effort wrapper around [`persist_turn`]: logs and swallows every error.
pub async fn record_turn(sessions: SessionResolver, transcript: Transcript, record: TurnRecord) {
    let session_id = record.session_id.clone();
    match persist_turn(&sessions, &transcript, record).await {
        Ok(PersistOutcome::Recorded) => {
            tracing::debug!(session_key = %session_id, "Turn recorded");
        }
        Ok(outcome) => {
            tracing::debug!(session_key = %session_id, ?outcome, "Turn not recorded");
        }
        Err(e) => {
            tracing::warn!(session_key = %session_id, error = %e, "Transcript persistence failed");
        }
    }
}

/// Ensure the session exists, append the user and assistant messages, and
/// bump the session's activity.
pub async fn persist_turn(
    sessions: &SessionResolver,
    transcript: &Transcript,
    record: TurnRecord,
) -> Result<PersistOutcome, PersistError> {
    let key = match SessionKey::parse(&record.session_id) {
        Ok(k) => k,
        Err(_) => return Ok(PersistOutcome::SkippedMalformedKey),
    };

    let title = title_from_input(&record.chat_input);
    let session = match sessions.ensure(record.user_id, &key, &title).await? {
        Some(s) => s,
        None => return Ok(PersistOutcome::SkippedNoMembership),
    };

    transcript
        .append(
            &session,
            vec![
                NewMessage::new(MessageRole::User, record.chat_input),
                NewMessage::new(MessageRole::Assistant, record.reply),
            ],
        )
        .await?;
    transcript.touch(&session).await?;

    Ok(PersistOutcome::Recorded)
}
