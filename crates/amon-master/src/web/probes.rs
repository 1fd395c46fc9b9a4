use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde_json::Value;

use amon_common::Probe;

use crate::accounts;
use crate::authz;
use crate::store;
use crate::web::{ApiError, AppState};

pub async fn list_probes_handler(
    State(state): State<Arc<AppState>>,
    Path((login, monitor)): Path<(String, String)>,
) -> Result<Json<Value>, ApiError> {
    let account =
        accounts::get_by_login(state.directory.as_ref(), &state.caches, &login).await?;
    // 404 for an unknown monitor, not an empty list.
    store::get_monitor(state.directory.as_ref(), &state.caches, &account.uuid, &monitor).await?;
    let probes = store::list_probes(
        state.directory.as_ref(),
        &state.caches,
        &account.uuid,
        &monitor,
    )
    .await?;
    Ok(Json(Value::Array(
        probes.iter().map(|p| p.serialize(false)).collect(),
    )))
}

pub async fn get_probe_handler(
    State(state): State<Arc<AppState>>,
    Path((login, monitor, name)): Path<(String, String, String)>,
) -> Result<Json<Value>, ApiError> {
    let account =
        accounts::get_by_login(state.directory.as_ref(), &state.caches, &login).await?;
    let probe = store::get_probe(
        state.directory.as_ref(),
        &state.caches,
        &account.uuid,
        &monitor,
        &name,
    )
    .await?;
    Ok(Json(probe.serialize(false)))
}

/// Validate, authorize, persist, invalidate.
pub async fn put_probe_handler(
    State(state): State<Arc<AppState>>,
    Path((login, monitor, name)): Path<(String, String, String)>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    let account =
        accounts::get_by_login(state.directory.as_ref(), &state.caches, &login).await?;
    // The parent monitor must exist for the same account.
    store::get_monitor(state.directory.as_ref(), &state.caches, &account.uuid, &monitor).await?;

    let probe = Probe::from_public(&account.uuid, &monitor, &name, &body, &state.probe_types)?;
    authz::authorize_probe_put(
        state.directory.as_ref(),
        &state.caches,
        state.mapi.as_ref(),
        &account,
        &probe,
    )
    .await?;
    store::put_probe(state.directory.as_ref(), &state.caches, &probe).await?;
    Ok(Json(probe.serialize(false)))
}

/// Deletion authorizes against the stored probe, so the record is
/// fetched directly from the directory first.
pub async fn delete_probe_handler(
    State(state): State<Arc<AppState>>,
    Path((login, monitor, name)): Path<(String, String, String)>,
) -> Result<StatusCode, ApiError> {
    let account =
        accounts::get_by_login(state.directory.as_ref(), &state.caches, &login).await?;
    let probe =
        store::fetch_probe_direct(state.directory.as_ref(), &account.uuid, &monitor, &name)
            .await?;
    authz::authorize_probe_delete(
        state.directory.as_ref(),
        &state.caches,
        state.mapi.as_ref(),
        &account,
        &probe,
    )
    .await?;
    store::delete_probe(state.directory.as_ref(), &state.caches, &probe).await?;
    Ok(StatusCode::NO_CONTENT)
}
