use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use amon_common::{Error, Event, Monitor};

use crate::accounts;
use crate::dispatch;
use crate::store;
use crate::web::{probes, ApiError, AppState};

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_monitors_handler))
        .route(
            "/{monitor}",
            get(get_monitor_handler)
                .put(put_monitor_handler)
                .delete(delete_monitor_handler)
                .post(monitor_action_handler),
        )
        .route("/{monitor}/probes", get(probes::list_probes_handler))
        .route(
            "/{monitor}/probes/{probe}",
            get(probes::get_probe_handler)
                .put(probes::put_probe_handler)
                .delete(probes::delete_probe_handler),
        )
}

async fn list_monitors_handler(
    State(state): State<Arc<AppState>>,
    Path(login): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let account =
        accounts::get_by_login(state.directory.as_ref(), &state.caches, &login).await?;
    let monitors =
        store::list_monitors(state.directory.as_ref(), &state.caches, &account.uuid).await?;
    Ok(Json(Value::Array(
        monitors.iter().map(|m| m.serialize(false)).collect(),
    )))
}

async fn get_monitor_handler(
    State(state): State<Arc<AppState>>,
    Path((login, name)): Path<(String, String)>,
) -> Result<Json<Value>, ApiError> {
    let account =
        accounts::get_by_login(state.directory.as_ref(), &state.caches, &login).await?;
    let monitor =
        store::get_monitor(state.directory.as_ref(), &state.caches, &account.uuid, &name).await?;
    Ok(Json(monitor.serialize(false)))
}

async fn put_monitor_handler(
    State(state): State<Arc<AppState>>,
    Path((login, name)): Path<(String, String)>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    let account =
        accounts::get_by_login(state.directory.as_ref(), &state.caches, &login).await?;
    let monitor = Monitor::from_public(&account.uuid, &name, &body)?;
    store::put_monitor(state.directory.as_ref(), &state.caches, &monitor).await?;
    Ok(Json(monitor.serialize(false)))
}

async fn delete_monitor_handler(
    State(state): State<Arc<AppState>>,
    Path((login, name)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    let account =
        accounts::get_by_login(state.directory.as_ref(), &state.caches, &login).await?;
    store::delete_monitor(state.directory.as_ref(), &state.caches, &account.uuid, &name).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
struct ActionQuery {
    action: Option<String>,
    #[serde(default)]
    clear: bool,
}

/// `POST /pub/:login/monitors/:name?action=fakefault` pushes a synthetic
/// event through the real dispatch path.
async fn monitor_action_handler(
    State(state): State<Arc<AppState>>,
    Path((login, name)): Path<(String, String)>,
    Query(query): Query<ActionQuery>,
) -> Result<Json<Value>, ApiError> {
    let account =
        accounts::get_by_login(state.directory.as_ref(), &state.caches, &login).await?;
    match query.action.as_deref() {
        Some("fakefault") => {}
        Some(other) => {
            return Err(Error::invalid_argument(format!("unknown action \"{other}\"")).into());
        }
        None => {
            return Err(Error::missing_parameter("\"action\" is required").into());
        }
    }
    // The monitor must exist; its probes (if any) are irrelevant here.
    store::get_monitor(state.directory.as_ref(), &state.caches, &account.uuid, &name).await?;

    let event = Event::fake(&account.uuid, &name, query.clear);
    info!(monitor = %name, login = %login, clear = query.clear, "Dispatching fake fault.");
    dispatch::dispatch_event(
        state.directory.as_ref(),
        &state.caches,
        &state.notifiers,
        &event,
    )
    .await?;
    Ok(Json(json!({"success": true})))
}
