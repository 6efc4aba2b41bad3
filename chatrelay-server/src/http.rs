//! chatrelay HTTP API
//!
//! Axum-based HTTP server for chat turns and transcript history.
//!
//! Architecture: each endpoint has a thin axum handler that delegates to a pure
//! inner function returning `(StatusCode, serde_json::Value)`. The inner
//! functions live next to their domain (`dispatch`, `history`) and are
//! directly testable without axum dispatch machinery.
//!
//! Endpoints:
//! - POST   /api/chat                 route a turn to the tenant webhook
//! - GET    /api/session/current      resolve (or mint) the caller's session (POST alias)
//! - GET    /api/history              list a session's messages
//! - DELETE /api/history              reset or purge a session
//! - GET    /api/history/messages     alias of GET /api/history
//! - POST   /api/history/messages     append messages
//! - DELETE /api/history/messages     alias of DELETE /api/history
//! - POST   /api/history/clear        purge a session
//! - GET    /health, /version

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::body::Bytes;
use axum::extract::rejection::{BytesRejection, JsonRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chatrelay_core::{ChatStore, RelayConfig, SessionResolver, Transcript, WebhookRegistry};
use serde::de::DeserializeOwned;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use crate::auth::{AuthState, AuthUser};
use crate::dispatch::{self, ChatRequest};
use crate::error::ApiError;
use crate::history::{self, AppendRequest, ClearRequest, CurrentSessionQuery, SessionQuery};
use crate::upstream::{UpstreamClient, UpstreamError};

/// Shared state for all HTTP handlers
#[derive(Clone)]
pub struct HttpState {
    pub store: Arc<dyn ChatStore>,
    pub config: RelayConfig,
    pub registry: WebhookRegistry,
    pub sessions: SessionResolver,
    pub transcript: Transcript,
    pub upstream: UpstreamClient,
    pub auth: AuthState,
}

impl HttpState {
    pub fn new(store: Arc<dyn ChatStore>, config: RelayConfig) -> Result<Self, UpstreamError> {
        let upstream = UpstreamClient::new(Duration::from_secs(config.upstream.timeout_secs))?;
        Ok(Self {
            registry: WebhookRegistry::new(store.clone(), &config.webhook),
            sessions: SessionResolver::new(store.clone()),
            transcript: Transcript::new(store.clone()),
            auth: AuthState::new(&config.auth),
            upstream,
            store,
            config,
        })
    }
}

/// Build the Axum router with all endpoints
pub fn build_router(state: Arc<HttpState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        .route("/api/chat", post(chat_handler))
        .route(
            "/api/session/current",
            get(current_session_handler).post(current_session_handler),
        )
        .route(
            "/api/history",
            get(get_history_handler).delete(clear_history_handler),
        )
        .route(
            "/api/history/messages",
            get(get_history_handler)
                .post(append_history_handler)
                .delete(clear_history_handler),
        )
        .route("/api/history/clear", post(clear_post_handler))
        .with_state(state)
}

/// Start the HTTP server on the configured address.
/// Gracefully shuts down when the broadcast shutdown signal fires.
pub async fn start_http_server(
    store: Arc<dyn ChatStore>,
    config: RelayConfig,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let addr = format!("{}:{}", config.http.host, config.http.port);
    let state = Arc::new(HttpState::new(store, config)?);

    let app = build_router(state);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("chatrelay HTTP API listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
            tracing::info!("HTTP server shutting down...");
        })
        .await?;

    Ok(())
}

// ============================================================================
// Inner (directly testable) functions
// ============================================================================

/// Inner health check: pings the store and returns (status_code, json_body).
pub async fn health_inner(store: &dyn ChatStore) -> (StatusCode, serde_json::Value) {
    match store.health().await {
        Ok(backend) => (
            StatusCode::OK,
            serde_json::json!({
                "status": "healthy",
                "version": env!("CARGO_PKG_VERSION"),
                "store": backend,
            }),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            serde_json::json!({
                "status": "unhealthy",
                "error": e.to_string(),
            }),
        ),
    }
}

/// Inner version: returns version info (pure, no IO).
pub fn version_inner() -> serde_json::Value {
    serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "protocol": "chatrelay/1",
    })
}

// ============================================================================
// Axum handler wrappers (thin, delegate to inner functions)
// ============================================================================

pub async fn health_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let (status, body) = health_inner(state.store.as_ref()).await;
    (status, Json(body))
}

pub async fn version_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(version_inner()))
}

pub async fn chat_handler(
    State(state): State<Arc<HttpState>>,
    user: Option<AuthUser>,
    body: Result<Bytes, BytesRejection>,
) -> impl IntoResponse {
    let (status, body) = match raw_json_body::<ChatRequest>(body) {
        Ok(req) => dispatch::chat_inner(&state, user, req).await,
        Err(e) => e.into_parts(),
    };
    (status, Json(body))
}

pub async fn current_session_handler(
    State(state): State<Arc<HttpState>>,
    user: Option<AuthUser>,
    query: Result<Query<CurrentSessionQuery>, QueryRejection>,
) -> impl IntoResponse {
    let (status, body) = match query_params(query) {
        Ok(q) => history::current_session_inner(&state, user, q).await,
        Err(e) => e.into_parts(),
    };
    (status, Json(body))
}

pub async fn get_history_handler(
    State(state): State<Arc<HttpState>>,
    user: Option<AuthUser>,
    query: Result<Query<SessionQuery>, QueryRejection>,
) -> impl IntoResponse {
    let (status, body) = match query_params(query) {
        Ok(q) => history::get_history_inner(&state, user, q).await,
        Err(e) => e.into_parts(),
    };
    (status, Json(body))
}

pub async fn append_history_handler(
    State(state): State<Arc<HttpState>>,
    user: Option<AuthUser>,
    body: Result<Json<AppendRequest>, JsonRejection>,
) -> impl IntoResponse {
    let (status, body) = match json_body(body) {
        Ok(req) => history::append_history_inner(&state, user, req).await,
        Err(e) => e.into_parts(),
    };
    (status, Json(body))
}

pub async fn clear_history_handler(
    State(state): State<Arc<HttpState>>,
    user: Option<AuthUser>,
    query: Result<Query<SessionQuery>, QueryRejection>,
) -> impl IntoResponse {
    let (status, body) = match query_params(query) {
        Ok(q) => history::clear_history_inner(&state, user, q).await,
        Err(e) => e.into_parts(),
    };
    (status, Json(body))
}

pub async fn clear_post_handler(
    State(state): State<Arc<HttpState>>,
    user: Option<AuthUser>,
    body: Result<Json<ClearRequest>, JsonRejection>,
) -> impl IntoResponse {
    let (status, body) = match json_body(body) {
        Ok(req) => history::clear_post_inner(&state, user, req).await,
        Err(e) => e.into_parts(),
    };
    (status, Json(body))
}

// ============================================================================
// Helpers
// ============================================================================

/// Unwrap a JSON body, turning axum's plain-text rejection into a JSON 400.
fn json_body<T: DeserializeOwned>(body: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    body.map(|Json(v)| v)
        .map_err(|e| ApiError::bad_request(format!("Invalid JSON body: {}", e.body_text())))
}

/// Parse a JSON body whatever its `content-type`. Webhook-style clients often omit it.
fn raw_json_body<T: DeserializeOwned>(body: Result<Bytes, BytesRejection>) -> Result<T, ApiError> {
    let bytes = body.map_err(|e| ApiError::bad_request(e.body_text()))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| ApiError::bad_request(format!("Invalid JSON body: {}", e)))
}

/// Unwrap query parameters, turning axum's plain-text rejection into a JSON 400.
fn query_params<T>(query: Result<Query<T>, QueryRejection>) -> Result<T, ApiError> {
    query
        .map(|Query(v)| v)
        .map_err(|e| ApiError::bad_request(format!("Invalid query string: {}", e.body_text())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatrelay_core::MemoryStore;

    #[test]
    fn test_version_inner_pure() {
        let v = version_inner();
        assert!(v["version"].is_string(), "version must be string");
        assert_eq!(v["protocol"], "chatrelay/1");
    }

    #[tokio::test]
    async fn test_health_inner_ok() {
        let store = MemoryStore::new();
        let (status, body) = health_inner(&store).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["store"], "memory");
        assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    }

    #[tokio::test]
    async fn test_health_inner_unhealthy() {
        let store = MemoryStore::new();
        store.set_fail_reads(true);
        let (status, body) = health_inner(&store).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["status"], "unhealthy");
        assert!(body["error"].is_string());
    }

    #[test]
    fn test_raw_json_body_ignores_content_type() {
        let req: ChatRequest =
            raw_json_body(Ok(Bytes::from_static(br#"{"chatInput":"hi","sessionId":"acme:abcdefabcdef"}"#)))
                .unwrap();
        assert_eq!(req.chat_input.as_deref(), Some("hi"));
        assert_eq!(req.session_id.as_deref(), Some("acme:abcdefabcdef"));

        let err = raw_json_body::<ChatRequest>(Ok(Bytes::from_static(b"chatInput=hi"))).unwrap_err();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }
}
