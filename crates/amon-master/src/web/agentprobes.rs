//! Manifest serving to relays: the set of probes assigned to one target.
//!
//! The body is deterministically ordered and carries a `Content-MD5`
//! header, so relays (and agents below them) can detect change without
//! re-hashing or re-parsing.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::Response;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::Deserialize;
use serde_json::Value;

use amon_common::model::{probe, validate_uuid};
use amon_common::{Error, Probe};

use crate::authz;
use crate::store;
use crate::web::{ApiError, AppState};

#[derive(Deserialize)]
pub struct AgentProbesQuery {
    machine: Option<String>,
    server: Option<String>,
}

pub fn content_md5(body: &[u8]) -> String {
    BASE64.encode(md5::compute(body).0)
}

/// Probes for one machine target: everything bound to the machine that
/// runs inside the tenant sandbox.
async fn machine_manifest(state: &AppState, machine: &str) -> Result<Vec<Probe>, ApiError> {
    validate_uuid("machine", machine)?;
    let filter = format!(
        "(&(objectclass={})(machine={machine}))",
        probe::OBJECTCLASS
    );
    let mut probes = store::search_probes(state.directory.as_ref(), &filter).await?;
    probes.retain(|p| !p.global);
    Ok(probes)
}

/// Probes for one global-zone target: everything bound to the server
/// itself, plus global probes whose machine is hosted on it.
async fn server_manifest(state: &AppState, server: &str) -> Result<Vec<Probe>, ApiError> {
    validate_uuid("server", server)?;
    let filter = format!("(&(objectclass={})(server={server}))", probe::OBJECTCLASS);
    let mut probes = store::search_probes(state.directory.as_ref(), &filter).await?;

    let global_filter = format!("(&(objectclass={})(global=true))", probe::OBJECTCLASS);
    let globals = store::search_probes(state.directory.as_ref(), &global_filter).await?;
    for probe in globals {
        let Some(machine) = &probe.machine else {
            // Server-targeted globals are already in the first batch.
            continue;
        };
        let info =
            authz::machine_info_cached(state.mapi.as_ref(), &state.caches, machine).await?;
        if info.and_then(|i| i.server).as_deref() == Some(server) {
            probes.push(probe);
        }
    }
    probes.sort_by(|a, b| (&a.user, &a.monitor, &a.name).cmp(&(&b.user, &b.monitor, &b.name)));
    Ok(probes)
}

pub async fn serve_agentprobes_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AgentProbesQuery>,
) -> Result<Response, ApiError> {
    let probes = match (&query.machine, &query.server) {
        (Some(machine), None) => machine_manifest(&state, machine).await?,
        (None, Some(server)) => server_manifest(&state, server).await?,
        (Some(_), Some(_)) => {
            return Err(
                Error::invalid_argument("only one of \"machine\" or \"server\" may be set").into(),
            );
        }
        (None, None) => {
            return Err(
                Error::missing_parameter("one of \"machine\" or \"server\" is required").into(),
            );
        }
    };

    let manifest: Vec<Value> = probes.iter().map(|p| p.serialize(true)).collect();
    let body = serde_json::to_string(&manifest)
        .map_err(|e| Error::internal(format!("manifest serialization: {e}")))?;
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/json")
        .header("content-md5", content_md5(body.as_bytes()))
        .body(body.into())
        .map_err(|e| Error::internal(format!("manifest response: {e}")).into())
}
