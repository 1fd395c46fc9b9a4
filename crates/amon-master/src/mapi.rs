//! Client for the cloud's machine-information API, used only for
//! authorization (machine ownership, server existence) and for mapping a
//! machine to its hosting server when building global-zone manifests.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use amon_common::{Error, Result};

/// The facts the core needs about one tenant machine.
#[derive(Debug, Clone, PartialEq)]
pub struct MachineInfo {
    pub uuid: String,
    /// Owning account uuid.
    pub owner: String,
    /// Hosting compute-node uuid, when the API exposes it.
    pub server: Option<String>,
}

#[async_trait]
pub trait MachineApi: Send + Sync {
    /// `Ok(None)` means the machine does not exist in the cloud.
    async fn get_machine(&self, uuid: &str) -> Result<Option<MachineInfo>>;

    async fn server_exists(&self, uuid: &str) -> Result<bool>;
}

pub struct HttpMachineApi {
    client: reqwest::Client,
    base_url: String,
    username: String,
    password: String,
}

#[derive(Deserialize)]
struct MachineRecord {
    uuid: String,
    owner_uuid: String,
    server_uuid: Option<String>,
}

const REQUEST_TIMEOUT_SECS: u64 = 10;

impl HttpMachineApi {
    pub fn new(base_url: &str, username: &str, password: &str) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
                .build()
                .expect("reqwest client"),
            base_url: base_url.trim_end_matches('/').to_string(),
            username: username.to_string(),
            password: password.to_string(),
        }
    }

    async fn get(&self, path: &str) -> Result<reqwest::Response> {
        let url = format!("{}{path}", self.base_url);
        self.client
            .get(&url)
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await
            .map_err(|e| Error::unavailable(format!("machine API {url}: {e}")))
    }
}

#[async_trait]
impl MachineApi for HttpMachineApi {
    async fn get_machine(&self, uuid: &str) -> Result<Option<MachineInfo>> {
        let response = self.get(&format!("/machines/{uuid}")).await?;
        match response.status().as_u16() {
            404 => Ok(None),
            200 => {
                let record: MachineRecord = response
                    .json()
                    .await
                    .map_err(|e| Error::internal(format!("machine API body: {e}")))?;
                debug!(machine = %record.uuid, owner = %record.owner_uuid, "Machine lookup.");
                Ok(Some(MachineInfo {
                    uuid: record.uuid,
                    owner: record.owner_uuid,
                    server: record.server_uuid,
                }))
            }
            status if status >= 500 => Err(Error::unavailable(format!(
                "machine API returned {status} for machine {uuid}"
            ))),
            status => Err(Error::internal(format!(
                "machine API returned {status} for machine {uuid}"
            ))),
        }
    }

    async fn server_exists(&self, uuid: &str) -> Result<bool> {
        let response = self.get(&format!("/servers/{uuid}")).await?;
        match response.status().as_u16() {
            200 => Ok(true),
            404 => Ok(false),
            status if status >= 500 => Err(Error::unavailable(format!(
                "machine API returned {status} for server {uuid}"
            ))),
            status => Err(Error::internal(format!(
                "machine API returned {status} for server {uuid}"
            ))),
        }
    }
}
