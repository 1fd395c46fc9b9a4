//! Event ingest from relays.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::info;

use amon_common::Event;

use crate::cache::CacheValue;
use crate::dispatch;
use crate::web::{ApiError, AppState};

/// Ingest is idempotent on `event.uuid`: a replay within the
/// de-duplication window is acknowledged without re-dispatching. An
/// event is only marked seen after dispatch ran, so a directory outage
/// (503 to the relay) stays retryable.
pub async fn add_event_handler(
    State(state): State<Arc<AppState>>,
    Json(event): Json<Event>,
) -> Result<Response, ApiError> {
    if let Err(err) = event.validate() {
        // A bad envelope is a protocol error, not a validation conflict.
        let body = Json(json!({"code": err.kind().code(), "message": err.message()}));
        return Ok((StatusCode::BAD_REQUEST, body).into_response());
    }

    if state.caches.event_seen.get(&event.uuid).is_some() {
        info!(event_uuid = %event.uuid, "Duplicate event within the window; acknowledged.");
        return Ok(StatusCode::ACCEPTED.into_response());
    }

    dispatch::dispatch_event(
        state.directory.as_ref(),
        &state.caches,
        &state.notifiers,
        &event,
    )
    .await?;
    state
        .caches
        .event_seen
        .put(&event.uuid, CacheValue::Hit(()));
    Ok(StatusCode::ACCEPTED.into_response())
}
