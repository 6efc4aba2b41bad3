//! Outbound calls to a tenant's workflow webhook and reply normalization.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chatrelay_core::WebhookTarget;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

/// Keys searched, in order, for the reply text in a JSON response.
pub const REPLY_KEYS: [&str; 3] = ["reply", "text", "output"];

#[derive(Error, Debug)]
pub enum UpstreamError {
    #[error("Upstream did not answer within {0:?}")]
    Timeout(Duration),

    #[error("Upstream request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Upstream returned invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

/// Body POSTed to the webhook.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UpstreamPayload {
    pub chat_input: String,
    pub session_id: String,
    pub account_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamReply {
    pub status: StatusCode,
    pub reply: String,
}

/// Single-attempt webhook client with a bounded deadline.
#[derive(Clone)]
pub struct UpstreamClient {
    client: Client,
    timeout: Duration,
}

impl UpstreamClient {
    pub fn new(timeout: Duration) -> Result<Self, UpstreamError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client, timeout })
    }

    pub async fn send(
        &self,
        target: &WebhookTarget,
        payload: &UpstreamPayload,
    ) -> Result<UpstreamReply, UpstreamError> {
        let mut request = self
            .client
            .post(&target.url)
            .header(CONTENT_TYPE, "application/json")
            .json(payload);
        if let Some(auth) = &target.auth {
            request = request.header(AUTHORIZATION, basic_auth_header(auth));
        }

        let response = request.send().await.map_err(|e| self.classify(e))?;
        let status = response.status();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        let body = response.bytes().await.map_err(|e| self.classify(e))?;

        let reply = normalize_reply(&content_type, &body)?;
        tracing::debug!(
            status = %status,
            content_type = %content_type,
            reply_len = reply.len(),
            "Upstream replied"
        );
        Ok(UpstreamReply { status, reply })
    }

    fn classify(&self, e: reqwest::Error) -> UpstreamError {
        if e.is_timeout() {
            UpstreamError::Timeout(self.timeout)
        } else {
            UpstreamError::Transport(e)
        }
    }
}

/// `Basic <base64(user:pass)>` from the literal credential string.
pub fn basic_auth_header(credentials: &str) -> String {
    format!("Basic {}", BASE64.encode(credentials.as_bytes()))
}

/// Reply text from an upstream body. JSON bodies yield the first non-empty of
/// [`REPLY_KEYS`]; anything else is taken verbatim.
pub fn normalize_reply(content_type: &str, body: &[u8]) -> Result<String, serde_json::Error> {
    if !content_type.contains("application/json") {
        return Ok(String::from_utf8_lossy(body).into_owned());
    }
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(String::new());
    }
    let value: Value = serde_json::from_slice(body)?;
    Ok(reply_from_json(&value))
}

fn reply_from_json(value: &Value) -> String {
    // Workflow tools often answer with a list of items; the first one carries the reply.
    let value = match value {
        Value::Array(items) => match items.first() {
            Some(first) => first,
            None => return String::new(),
        },
        other => other,
    };

    REPLY_KEYS
        .iter()
        .filter_map(|key| value.get(key).and_then(coerce_to_string))
        .find(|s| !s.is_empty())
        .unwrap_or_default()
}

fn coerce_to_string(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Array(_) | Value::Object(_) => Some(value.to_string()),
    }
}
