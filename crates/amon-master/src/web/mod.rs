//! The master's HTTP surface.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tracing::error;

use amon_common::{Error as AmonError, ErrorKind, ProbeTypeRegistry};

use crate::accounts;
use crate::cache::MasterCaches;
use crate::directory::{Directory, DirectoryError};
use crate::mapi::MachineApi;
use crate::notify::NotifierRegistry;

pub mod agentprobes;
pub mod contacts;
pub mod events;
pub mod monitors;
pub mod probes;

pub struct AppState {
    pub directory: Arc<dyn Directory>,
    pub mapi: Arc<dyn MachineApi>,
    pub caches: MasterCaches,
    pub probe_types: ProbeTypeRegistry,
    pub notifiers: NotifierRegistry,
}

/// Domain errors rendered as `{code, message}` JSON with the kind's
/// status code.
pub struct ApiError(AmonError);

impl From<AmonError> for ApiError {
    fn from(err: AmonError) -> Self {
        Self(err)
    }
}

impl From<DirectoryError> for ApiError {
    fn from(err: DirectoryError) -> Self {
        Self(err.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.0.kind() == ErrorKind::Internal {
            error!(error = %self.0, "Request failed with an internal error.");
        }
        let status = StatusCode::from_u16(self.0.kind().http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = Json(json!({
            "code": self.0.kind().code(),
            "message": self.0.message(),
        }));
        (status, body).into_response()
    }
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ping", get(ping_handler))
        .route("/agentprobes", get(agentprobes::serve_agentprobes_handler))
        .route("/events", post(events::add_event_handler))
        .route("/pub/{login}", get(get_account_handler))
        .nest("/pub/{login}/contacts", contacts::router())
        .nest("/pub/{login}/monitors", monitors::router())
        .with_state(state)
}

async fn ping_handler() -> Json<serde_json::Value> {
    Json(json!({"ping": "pong"}))
}

async fn get_account_handler(
    State(state): State<Arc<AppState>>,
    Path(login): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let account =
        accounts::get_by_login(state.directory.as_ref(), &state.caches, &login).await?;
    Ok(Json(account.serialize()))
}
