use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::Value;

use amon_common::Contact;

use crate::accounts;
use crate::store;
use crate::web::{ApiError, AppState};

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_contacts_handler))
        .route(
            "/{contact}",
            get(get_contact_handler)
                .put(put_contact_handler)
                .delete(delete_contact_handler),
        )
}

async fn list_contacts_handler(
    State(state): State<Arc<AppState>>,
    Path(login): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let account =
        accounts::get_by_login(state.directory.as_ref(), &state.caches, &login).await?;
    let contacts =
        store::list_contacts(state.directory.as_ref(), &state.caches, &account.uuid).await?;
    Ok(Json(Value::Array(
        contacts.iter().map(|c| c.serialize(false)).collect(),
    )))
}

async fn get_contact_handler(
    State(state): State<Arc<AppState>>,
    Path((login, name)): Path<(String, String)>,
) -> Result<Json<Value>, ApiError> {
    let account =
        accounts::get_by_login(state.directory.as_ref(), &state.caches, &login).await?;
    let contact =
        store::get_contact(state.directory.as_ref(), &state.caches, &account.uuid, &name).await?;
    Ok(Json(contact.serialize(false)))
}

/// Upsert. Identity comes from the route; the body carries the payload
/// fields only.
async fn put_contact_handler(
    State(state): State<Arc<AppState>>,
    Path((login, name)): Path<(String, String)>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    let account =
        accounts::get_by_login(state.directory.as_ref(), &state.caches, &login).await?;
    let contact = Contact::from_public(&account.uuid, &name, &body)?;
    store::put_contact(state.directory.as_ref(), &state.caches, &contact).await?;
    Ok(Json(contact.serialize(false)))
}

async fn delete_contact_handler(
    State(state): State<Arc<AppState>>,
    Path((login, name)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    let account =
        accounts::get_by_login(state.directory.as_ref(), &state.caches, &login).await?;
    store::delete_contact(state.directory.as_ref(), &state.caches, &account.uuid, &name).await?;
    Ok(StatusCode::NO_CONTENT)
}
