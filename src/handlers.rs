//! HTTP endpoints of the optional health server.
//!
//! - `GET /` – name and version
//! - `GET /health` – liveness, signer address and live session counts

use alloy::primitives::Address;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router, response::IntoResponse};
use serde_json::json;
use std::sync::Arc;
use tracing::instrument;

use crate::chat_queue::ChatQueueManager;
use crate::session::SessionStore;

/// Read-only view of the bot shared with the handlers.
pub struct HealthState {
    pub signer: Address,
    pub recipient: Address,
    pub sessions: SessionStore,
    pub queues: Arc<ChatQueueManager>,
}

pub fn routes() -> Router<Arc<HealthState>> {
    Router::new()
        .route("/", get(get_root))
        .route("/health", get(get_health))
}

/// `GET /`: name and version of the running bot.
#[instrument(skip_all)]
pub async fn get_root() -> impl IntoResponse {
    let pkg_name = env!("CARGO_PKG_NAME");
    let pkg_version = env!("CARGO_PKG_VERSION");
    (StatusCode::OK, format!("{pkg_name} {pkg_version}"))
}

#[instrument(skip_all)]
pub async fn get_health(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    let queue_stats = state.queues.stats();
    (
        StatusCode::OK,
        Json(json!({
            "status": "ok",
            "version": env!("CARGO_PKG_VERSION"),
            "signer": state.signer,
            "recipient": state.recipient,
            "active_sessions": state.sessions.len(),
            "active_chats": queue_stats.active_chats,
            "queued_messages": queue_stats.queued_messages,
        })),
    )
}
