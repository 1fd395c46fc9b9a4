//! Probe write authorization.
//!
//! Authorization is re-checked on every write; the caches below are
//! read-through only and never substitute for the check itself. All
//! refusals surface as `InvalidArgument` so a caller cannot distinguish
//! "no such machine" from "not your machine".

use tracing::debug;

use amon_common::{Error, Probe, Result};

use crate::accounts::{self, Account};
use crate::cache::{CacheValue, MasterCaches};
use crate::directory::Directory;
use crate::mapi::{MachineApi, MachineInfo};

/// Cache-assisted machine lookup. Negative results (machine unknown to
/// the cloud) are cached; unavailability is not.
pub async fn machine_info_cached(
    mapi: &dyn MachineApi,
    caches: &MasterCaches,
    uuid: &str,
) -> Result<Option<MachineInfo>> {
    match caches.machine_info.get(uuid) {
        Some(CacheValue::Hit(info)) => return Ok(Some(info)),
        Some(CacheValue::NegativeHit) => return Ok(None),
        None => {}
    }
    let info = mapi.get_machine(uuid).await?;
    match &info {
        Some(info) => caches.machine_info.put(uuid, CacheValue::Hit(info.clone())),
        None => caches.machine_info.put(uuid, CacheValue::NegativeHit),
    }
    Ok(info)
}

pub async fn server_exists_cached(
    mapi: &dyn MachineApi,
    caches: &MasterCaches,
    uuid: &str,
) -> Result<bool> {
    if let Some(CacheValue::Hit(exists)) = caches.server_exists.get(uuid) {
        return Ok(exists);
    }
    let exists = mapi.server_exists(uuid).await?;
    caches.server_exists.put(uuid, CacheValue::Hit(exists));
    Ok(exists)
}

/// The probe PUT rule. Exactly one of:
///
/// 1. the probe targets a machine the account owns;
/// 2. the probe targets a server, the caller is an operator, and the
///    server exists;
/// 3. the probe targets an existing machine the account does *not* own,
///    the probe type runs in the global zone, and the caller is an
///    operator (operator-imposed monitoring of a tenant machine).
pub async fn authorize_probe_put(
    directory: &dyn Directory,
    caches: &MasterCaches,
    mapi: &dyn MachineApi,
    account: &Account,
    probe: &Probe,
) -> Result<()> {
    if let Some(machine) = &probe.machine {
        let refused = || {
            Error::invalid_argument(format!(
                "machine \"{machine}\" does not exist or is not owned by account \"{}\"",
                account.login
            ))
        };
        let info = machine_info_cached(mapi, caches, machine).await?;
        match info {
            Some(info) if info.owner == account.uuid => {
                debug!(machine = %machine, login = %account.login, "Probe authorized: owned machine.");
                Ok(())
            }
            Some(_) if probe.global => {
                if accounts::is_operator(directory, caches, account).await? {
                    debug!(machine = %machine, login = %account.login, "Probe authorized: operator global-zone probe.");
                    Ok(())
                } else {
                    Err(refused())
                }
            }
            _ => Err(refused()),
        }
    } else if let Some(server) = &probe.server {
        if !accounts::is_operator(directory, caches, account).await? {
            return Err(Error::invalid_argument(
                "server-targeted probes require an operator account",
            ));
        }
        if !server_exists_cached(mapi, caches, server).await? {
            return Err(Error::invalid_argument(format!(
                "server \"{server}\" does not exist"
            )));
        }
        debug!(server = %server, login = %account.login, "Probe authorized: operator server probe.");
        Ok(())
    } else {
        // Construction enforces exactly-one-target; reaching this is a bug.
        Err(Error::internal("probe has no target"))
    }
}

/// Deletion applies the PUT rule to the stored probe; operators may
/// always delete.
pub async fn authorize_probe_delete(
    directory: &dyn Directory,
    caches: &MasterCaches,
    mapi: &dyn MachineApi,
    account: &Account,
    probe: &Probe,
) -> Result<()> {
    if accounts::is_operator(directory, caches, account).await? {
        return Ok(());
    }
    authorize_probe_put(directory, caches, mapi, account, probe).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::MemDirectory;
    use amon_common::{dn, ErrorKind, ProbeTypeRegistry};
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Mutex;

    const ALICE: &str = "11111111-2222-3333-4444-555555555555";
    const OPER: &str = "22222222-2222-3333-4444-555555555555";
    const MACHINE: &str = "aaaaaaaa-aaaa-aaaa-aaaa-aaaaaaaaaaaa";
    const SERVER: &str = "bbbbbbbb-bbbb-bbbb-bbbb-bbbbbbbbbbbb";

    /// Table-backed machine API; counts calls so caching is observable.
    #[derive(Default)]
    pub struct FakeMapi {
        machines: HashMap<String, MachineInfo>,
        servers: Vec<String>,
        pub calls: Mutex<usize>,
    }

    impl FakeMapi {
        fn with_machine(mut self, uuid: &str, owner: &str, server: &str) -> Self {
            self.machines.insert(
                uuid.to_string(),
                MachineInfo {
                    uuid: uuid.to_string(),
                    owner: owner.to_string(),
                    server: Some(server.to_string()),
                },
            );
            self
        }

        fn with_server(mut self, uuid: &str) -> Self {
            self.servers.push(uuid.to_string());
            self
        }
    }

    #[async_trait]
    impl MachineApi for FakeMapi {
        async fn get_machine(&self, uuid: &str) -> Result<Option<MachineInfo>> {
            *self.calls.lock().unwrap() += 1;
            Ok(self.machines.get(uuid).cloned())
        }

        async fn server_exists(&self, uuid: &str) -> Result<bool> {
            *self.calls.lock().unwrap() += 1;
            Ok(self.servers.iter().any(|s| s == uuid))
        }
    }

    fn alice() -> Account {
        Account {
            uuid: ALICE.into(),
            login: "alice".into(),
        }
    }

    fn operator() -> Account {
        Account {
            uuid: OPER.into(),
            login: "oper".into(),
        }
    }

    fn directory_with_operator() -> MemDirectory {
        let directory = MemDirectory::new();
        directory.seed(
            dn::OPERATORS_DN,
            vec![
                ("objectclass".into(), vec!["groupofuniquenames".into()]),
                ("uniquemember".into(), vec![dn::account_dn(OPER)]),
            ],
        );
        directory
    }

    fn machine_probe(probe_type: &str) -> Probe {
        Probe::from_public(
            ALICE,
            "whistle",
            "p",
            &json!({"type": probe_type, "machine": MACHINE, "config":
                if probe_type == "logscan" { json!({"path": "/l", "regex": "x"}) } else { json!(null) }}),
            &ProbeTypeRegistry::builtin(),
        )
        .unwrap()
    }

    fn server_probe() -> Probe {
        Probe::from_public(
            OPER,
            "whistle",
            "p",
            &json!({"type": "machineup", "server": SERVER}),
            &ProbeTypeRegistry::builtin(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn owner_may_target_their_machine() {
        let directory = directory_with_operator();
        let caches = MasterCaches::default();
        let mapi = FakeMapi::default().with_machine(MACHINE, ALICE, SERVER);

        authorize_probe_put(&directory, &caches, &mapi, &alice(), &machine_probe("logscan"))
            .await
            .unwrap();

        // Second check hits the cache.
        authorize_probe_put(&directory, &caches, &mapi, &alice(), &machine_probe("logscan"))
            .await
            .unwrap();
        assert_eq!(*mapi.calls.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn unowned_machine_is_refused_without_leaking_existence() {
        let directory = directory_with_operator();
        let caches = MasterCaches::default();
        let mapi = FakeMapi::default().with_machine(MACHINE, OPER, SERVER);

        let err =
            authorize_probe_put(&directory, &caches, &mapi, &alice(), &machine_probe("logscan"))
                .await
                .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert!(err.message().contains("does not exist or is not owned"));

        // A nonexistent machine reads identically.
        let mapi = FakeMapi::default();
        let caches = MasterCaches::default();
        let err =
            authorize_probe_put(&directory, &caches, &mapi, &alice(), &machine_probe("logscan"))
                .await
                .unwrap_err();
        assert!(err.message().contains("does not exist or is not owned"));
    }

    #[tokio::test]
    async fn server_probes_are_operator_only() {
        let directory = directory_with_operator();
        let caches = MasterCaches::default();
        let mapi = FakeMapi::default().with_server(SERVER);

        let err = authorize_probe_put(&directory, &caches, &mapi, &alice(), &server_probe())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert!(err.message().contains("operator"));

        authorize_probe_put(&directory, &caches, &mapi, &operator(), &server_probe())
            .await
            .unwrap();

        // Operator, but the server does not exist.
        let mapi = FakeMapi::default();
        let caches = MasterCaches::default();
        let err = authorize_probe_put(&directory, &caches, &mapi, &operator(), &server_probe())
            .await
            .unwrap_err();
        assert!(err.message().contains("does not exist"));
    }

    #[tokio::test]
    async fn operator_may_impose_global_probes_on_tenant_machines() {
        let directory = directory_with_operator();
        let caches = MasterCaches::default();
        let mapi = FakeMapi::default().with_machine(MACHINE, ALICE, SERVER);

        // machineup runs in the global zone, so the operator may target
        // alice's machine with it.
        authorize_probe_put(&directory, &caches, &mapi, &operator(), &machine_probe("machineup"))
            .await
            .unwrap();

        // A non-global type gets no such exception.
        let err = authorize_probe_put(
            &directory,
            &caches,
            &mapi,
            &operator(),
            &machine_probe("logscan"),
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[tokio::test]
    async fn operators_may_always_delete() {
        let directory = directory_with_operator();
        let caches = MasterCaches::default();
        let mapi = FakeMapi::default();

        authorize_probe_delete(&directory, &caches, &mapi, &operator(), &machine_probe("logscan"))
            .await
            .unwrap();

        let err = authorize_probe_delete(
            &directory,
            &caches,
            &mapi,
            &alice(),
            &machine_probe("logscan"),
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }
}
