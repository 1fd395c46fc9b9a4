//! The agent-facing side of the relay.
//!
//! Every target gets its own HTTP server on a per-sandbox unix socket,
//! so the transport itself identifies the target; agents never say who
//! they are. The surface is tiny: manifest reads (`HEAD|GET
//! /agentprobes`) and event submission (`POST /events`).

use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tokio::net::UnixListener;
use tokio::sync::watch;
use tracing::{info, warn};

use amon_common::Event;

use crate::forward::EventForwarder;
use crate::manifest::{ManifestStore, TargetId};

pub struct TargetState {
    pub target: TargetId,
    pub store: Arc<ManifestStore>,
    pub forwarder: EventForwarder,
}

pub fn target_router(state: Arc<TargetState>) -> Router {
    Router::new()
        .route("/agentprobes", get(get_agentprobes_handler))
        .route("/events", post(add_events_handler))
        .with_state(state)
}

/// GET (and HEAD, which axum derives from it) for the cached manifest.
/// The `Content-MD5` header always matches the body served.
async fn get_agentprobes_handler(State(state): State<Arc<TargetState>>) -> Response {
    let (body, md5) = state.store.read(&state.target);
    (
        [
            (header::CONTENT_TYPE, "application/json".to_string()),
            (header::HeaderName::from_static("content-md5"), md5),
        ],
        body,
    )
        .into_response()
}

async fn add_events_handler(
    State(state): State<Arc<TargetState>>,
    Json(event): Json<Event>,
) -> Response {
    if let Err(err) = event.validate() {
        warn!(target = %state.target, error = %err, "Rejecting malformed event from agent.");
        let body = Json(json!({"code": err.kind().code(), "message": err.message()}));
        return (StatusCode::BAD_REQUEST, body).into_response();
    }
    state.forwarder.enqueue(event);
    StatusCode::ACCEPTED.into_response()
}

/// Serves one target's router on its unix socket until shutdown flips.
pub async fn serve_target(
    state: Arc<TargetState>,
    mut shutdown: watch::Receiver<bool>,
) -> std::io::Result<()> {
    let socket_path = state.store.socket_path(&state.target);
    // A stale socket from a previous run blocks the bind.
    let _ = std::fs::remove_file(&socket_path);
    let listener = UnixListener::bind(&socket_path)?;
    info!(target = %state.target, socket = %socket_path.display(), "Agent endpoint listening.");

    let app = target_router(state.clone());
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.changed().await;
        })
        .await?;
    let _ = std::fs::remove_file(&socket_path);
    info!(target = %state.target, "Agent endpoint stopped.");
    Ok(())
}
