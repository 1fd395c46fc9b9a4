//! HTTP client for the agent's relay, over the per-sandbox unix socket.
//!
//! The socket is the agent's whole world: manifests come down from it
//! and events go back up through it. The relay knows which target the
//! socket belongs to, so requests carry no identity.

use std::path::PathBuf;

use hyper::{Body, Client, Request};
use hyperlocal::{UnixConnector, Uri as UnixUri};
use serde_json::Value;
use thiserror::Error;

use amon_common::Event;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("relay request failed: {0}")]
    Transport(#[from] hyper::Error),
    #[error("relay request build failed: {0}")]
    Http(#[from] http::Error),
    #[error("relay returned {0}")]
    Status(u16),
    #[error("relay response malformed: {0}")]
    Protocol(String),
}

pub struct RelayClient {
    client: Client<UnixConnector>,
    socket: PathBuf,
}

impl RelayClient {
    pub fn new(socket: impl Into<PathBuf>) -> Self {
        Self {
            client: Client::builder().build::<_, Body>(UnixConnector),
            socket: socket.into(),
        }
    }

    fn md5_header(response: &hyper::Response<Body>) -> Result<String, RelayError> {
        response
            .headers()
            .get("content-md5")
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| RelayError::Protocol("missing Content-MD5 header".into()))
    }

    /// The manifest hash, without the manifest.
    pub async fn head_agent_probes(&self) -> Result<String, RelayError> {
        let request = Request::builder()
            .method("HEAD")
            .uri(UnixUri::new(&self.socket, "/agentprobes"))
            .body(Body::empty())?;
        let response = self.client.request(request).await?;
        if !response.status().is_success() {
            return Err(RelayError::Status(response.status().as_u16()));
        }
        Self::md5_header(&response)
    }

    /// The manifest (raw probe objects, internal serialization) plus the
    /// hash it was served under.
    pub async fn get_agent_probes(&self) -> Result<(Vec<Value>, String), RelayError> {
        let request = Request::builder()
            .method("GET")
            .uri(UnixUri::new(&self.socket, "/agentprobes"))
            .body(Body::empty())?;
        let response = self.client.request(request).await?;
        if !response.status().is_success() {
            return Err(RelayError::Status(response.status().as_u16()));
        }
        let md5 = Self::md5_header(&response)?;
        let bytes = hyper::body::to_bytes(response.into_body()).await?;
        let manifest: Vec<Value> = serde_json::from_slice(&bytes)
            .map_err(|e| RelayError::Protocol(format!("manifest body: {e}")))?;
        Ok((manifest, md5))
    }

    pub async fn post_event(&self, event: &Event) -> Result<(), RelayError> {
        let body = serde_json::to_vec(event)
            .map_err(|e| RelayError::Protocol(format!("event serialization: {e}")))?;
        let request = Request::builder()
            .method("POST")
            .uri(UnixUri::new(&self.socket, "/events"))
            .header(http::header::CONTENT_TYPE, "application/json")
            .body(Body::from(body))?;
        let response = self.client.request(request).await?;
        if !response.status().is_success() {
            return Err(RelayError::Status(response.status().as_u16()));
        }
        Ok(())
    }
}
