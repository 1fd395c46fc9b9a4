//! Cache-assisted persistence for the three entity types.
//!
//! Reads go through the per-scope caches (negative results included);
//! writes are upserts (add, falling back to a full-attribute replace)
//! followed by invalidation of the entity's get key and its parent's
//! list key. Deletes fetch the entity directly from the directory first,
//! so invalidation always has the parent DN and callers get the removed
//! record back.

use tracing::debug;

use amon_common::model::{contact, monitor, probe, validate_name};
use amon_common::{dn, Contact, Error, Monitor, Probe, Result};

use crate::cache::{CacheValue, MasterCaches};
use crate::directory::{Attrs, Directory, DirectoryError, SearchScope};

async fn upsert(directory: &dyn Directory, dn: &str, attrs: Attrs) -> Result<()> {
    match directory.add(dn, attrs.clone()).await {
        Ok(()) => Ok(()),
        Err(DirectoryError::AlreadyExists(_)) => {
            debug!(dn, "Entity exists; replacing.");
            directory.replace(dn, attrs).await?;
            Ok(())
        }
        Err(err) => Err(err.into()),
    }
}

/// Fetches a single record at `dn`, straight from the directory.
/// Multiple hits for one DN are a store corruption.
async fn fetch_one(
    directory: &dyn Directory,
    dn: &str,
    objectclass: &str,
) -> Result<Option<amon_common::DirEntry>> {
    let found = directory
        .search(dn, SearchScope::Base, &format!("(objectclass={objectclass})"))
        .await?;
    match found.len() {
        0 => Ok(None),
        1 => Ok(Some(found.into_iter().next().unwrap())),
        n => Err(Error::internal(format!("{n} records at dn \"{dn}\""))),
    }
}

// ---------------------------------------------------------------------
// Contacts

pub async fn get_contact(
    directory: &dyn Directory,
    caches: &MasterCaches,
    user: &str,
    name: &str,
) -> Result<Contact> {
    validate_name("contact name", name)?;
    let dn = dn::contact_dn(user, name);
    let missing = || Error::not_found(format!("contact \"{name}\" does not exist"));
    match caches.contact_get.get(&dn) {
        Some(CacheValue::Hit(contact)) => return Ok(contact),
        Some(CacheValue::NegativeHit) => return Err(missing()),
        None => {}
    }
    match fetch_one(directory, &dn, contact::OBJECTCLASS).await? {
        Some(entry) => {
            let contact = Contact::from_entry(&entry)?;
            caches.contact_get.put(&dn, CacheValue::Hit(contact.clone()));
            Ok(contact)
        }
        None => {
            caches.contact_get.put(&dn, CacheValue::NegativeHit);
            Err(missing())
        }
    }
}

pub async fn list_contacts(
    directory: &dyn Directory,
    caches: &MasterCaches,
    user: &str,
) -> Result<Vec<Contact>> {
    let parent = dn::account_dn(user);
    if let Some(CacheValue::Hit(contacts)) = caches.contact_list.get(&parent) {
        return Ok(contacts);
    }
    let found = directory
        .search(
            &parent,
            SearchScope::One,
            &format!("(objectclass={})", contact::OBJECTCLASS),
        )
        .await?;
    let mut contacts = found
        .iter()
        .map(Contact::from_entry)
        .collect::<Result<Vec<_>>>()?;
    contacts.sort_by(|a, b| a.name.cmp(&b.name));
    caches
        .contact_list
        .put(&parent, CacheValue::Hit(contacts.clone()));
    Ok(contacts)
}

pub async fn put_contact(
    directory: &dyn Directory,
    caches: &MasterCaches,
    contact: &Contact,
) -> Result<()> {
    let dn = contact.dn();
    upsert(directory, &dn, contact.to_attrs()).await?;
    caches.contact_get.invalidate(&dn);
    caches.contact_list.invalidate(&contact.parent_dn());
    Ok(())
}

pub async fn delete_contact(
    directory: &dyn Directory,
    caches: &MasterCaches,
    user: &str,
    name: &str,
) -> Result<Contact> {
    validate_name("contact name", name)?;
    let dn = dn::contact_dn(user, name);
    let entry = fetch_one(directory, &dn, contact::OBJECTCLASS)
        .await?
        .ok_or_else(|| Error::not_found(format!("contact \"{name}\" does not exist")))?;
    let contact = Contact::from_entry(&entry)?;
    directory.delete(&dn).await?;
    caches.contact_get.invalidate(&dn);
    caches.contact_list.invalidate(&contact.parent_dn());
    Ok(contact)
}

// ---------------------------------------------------------------------
// Monitors

pub async fn get_monitor(
    directory: &dyn Directory,
    caches: &MasterCaches,
    user: &str,
    name: &str,
) -> Result<Monitor> {
    validate_name("monitor name", name)?;
    let dn = dn::monitor_dn(user, name);
    let missing = || Error::not_found(format!("monitor \"{name}\" does not exist"));
    match caches.monitor_get.get(&dn) {
        Some(CacheValue::Hit(monitor)) => return Ok(monitor),
        Some(CacheValue::NegativeHit) => return Err(missing()),
        None => {}
    }
    match fetch_one(directory, &dn, monitor::OBJECTCLASS).await? {
        Some(entry) => {
            let monitor = Monitor::from_entry(&entry)?;
            caches.monitor_get.put(&dn, CacheValue::Hit(monitor.clone()));
            Ok(monitor)
        }
        None => {
            caches.monitor_get.put(&dn, CacheValue::NegativeHit);
            Err(missing())
        }
    }
}

pub async fn list_monitors(
    directory: &dyn Directory,
    caches: &MasterCaches,
    user: &str,
) -> Result<Vec<Monitor>> {
    let parent = dn::account_dn(user);
    if let Some(CacheValue::Hit(monitors)) = caches.monitor_list.get(&parent) {
        return Ok(monitors);
    }
    let found = directory
        .search(
            &parent,
            SearchScope::One,
            &format!("(objectclass={})", monitor::OBJECTCLASS),
        )
        .await?;
    let mut monitors = found
        .iter()
        .map(Monitor::from_entry)
        .collect::<Result<Vec<_>>>()?;
    monitors.sort_by(|a, b| a.name.cmp(&b.name));
    caches
        .monitor_list
        .put(&parent, CacheValue::Hit(monitors.clone()));
    Ok(monitors)
}

pub async fn put_monitor(
    directory: &dyn Directory,
    caches: &MasterCaches,
    monitor: &Monitor,
) -> Result<()> {
    let dn = monitor.dn();
    upsert(directory, &dn, monitor.to_attrs()).await?;
    caches.monitor_get.invalidate(&dn);
    caches.monitor_list.invalidate(&monitor.parent_dn());
    Ok(())
}

/// Deleting a monitor is refused while it still has probes; there is no
/// cascade.
pub async fn delete_monitor(
    directory: &dyn Directory,
    caches: &MasterCaches,
    user: &str,
    name: &str,
) -> Result<Monitor> {
    validate_name("monitor name", name)?;
    let dn = dn::monitor_dn(user, name);
    let entry = fetch_one(directory, &dn, monitor::OBJECTCLASS)
        .await?
        .ok_or_else(|| Error::not_found(format!("monitor \"{name}\" does not exist")))?;
    let monitor = Monitor::from_entry(&entry)?;

    let probes = directory
        .search(
            &dn,
            SearchScope::One,
            &format!("(objectclass={})", probe::OBJECTCLASS),
        )
        .await?;
    if !probes.is_empty() {
        return Err(Error::constraint(format!(
            "monitor \"{name}\" still has {} probe(s)",
            probes.len()
        )));
    }

    directory.delete(&dn).await?;
    caches.monitor_get.invalidate(&dn);
    caches.monitor_list.invalidate(&monitor.parent_dn());
    Ok(monitor)
}

// ---------------------------------------------------------------------
// Probes

pub async fn get_probe(
    directory: &dyn Directory,
    caches: &MasterCaches,
    user: &str,
    monitor: &str,
    name: &str,
) -> Result<Probe> {
    validate_name("monitor name", monitor)?;
    validate_name("probe name", name)?;
    let dn = dn::probe_dn(user, monitor, name);
    let missing = || Error::not_found(format!("probe \"{name}\" does not exist"));
    match caches.probe_get.get(&dn) {
        Some(CacheValue::Hit(probe)) => return Ok(probe),
        Some(CacheValue::NegativeHit) => return Err(missing()),
        None => {}
    }
    match fetch_one(directory, &dn, probe::OBJECTCLASS).await? {
        Some(entry) => {
            let probe = Probe::from_entry(&entry)?;
            caches.probe_get.put(&dn, CacheValue::Hit(probe.clone()));
            Ok(probe)
        }
        None => {
            caches.probe_get.put(&dn, CacheValue::NegativeHit);
            Err(missing())
        }
    }
}

pub async fn list_probes(
    directory: &dyn Directory,
    caches: &MasterCaches,
    user: &str,
    monitor: &str,
) -> Result<Vec<Probe>> {
    validate_name("monitor name", monitor)?;
    let parent = dn::monitor_dn(user, monitor);
    if let Some(CacheValue::Hit(probes)) = caches.probe_list.get(&parent) {
        return Ok(probes);
    }
    let found = directory
        .search(
            &parent,
            SearchScope::One,
            &format!("(objectclass={})", probe::OBJECTCLASS),
        )
        .await?;
    let mut probes = found
        .iter()
        .map(Probe::from_entry)
        .collect::<Result<Vec<_>>>()?;
    probes.sort_by(|a, b| a.name.cmp(&b.name));
    caches.probe_list.put(&parent, CacheValue::Hit(probes.clone()));
    Ok(probes)
}

pub async fn put_probe(
    directory: &dyn Directory,
    caches: &MasterCaches,
    probe: &Probe,
) -> Result<()> {
    let dn = probe.dn();
    upsert(directory, &dn, probe.to_attrs()).await?;
    caches.probe_get.invalidate(&dn);
    caches.probe_list.invalidate(&probe.parent_dn());
    Ok(())
}

/// Fetches the stored probe directly (bypassing caches) and deletes it.
/// Authorization against the stored record is the caller's business.
pub async fn fetch_probe_direct(
    directory: &dyn Directory,
    user: &str,
    monitor: &str,
    name: &str,
) -> Result<Probe> {
    validate_name("monitor name", monitor)?;
    validate_name("probe name", name)?;
    let dn = dn::probe_dn(user, monitor, name);
    let entry = fetch_one(directory, &dn, probe::OBJECTCLASS)
        .await?
        .ok_or_else(|| Error::not_found(format!("probe \"{name}\" does not exist")))?;
    Probe::from_entry(&entry)
}

pub async fn delete_probe(
    directory: &dyn Directory,
    caches: &MasterCaches,
    probe: &Probe,
) -> Result<()> {
    let dn = probe.dn();
    directory.delete(&dn).await?;
    caches.probe_get.invalidate(&dn);
    caches.probe_list.invalidate(&probe.parent_dn());
    Ok(())
}

/// All probes matching an arbitrary filter, tree-wide. Used for
/// manifest building; results are deterministically ordered so manifest
/// bodies (and their hashes) are stable.
pub async fn search_probes(directory: &dyn Directory, filter: &str) -> Result<Vec<Probe>> {
    let found = directory
        .search(dn::USERS_DN, SearchScope::Sub, filter)
        .await?;
    let mut probes = found
        .iter()
        .map(Probe::from_entry)
        .collect::<Result<Vec<_>>>()?;
    probes.sort_by(|a, b| {
        (&a.user, &a.monitor, &a.name).cmp(&(&b.user, &b.monitor, &b.name))
    });
    Ok(probes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::MemDirectory;
    use amon_common::{ErrorKind, ProbeTypeRegistry};
    use serde_json::json;

    const USER: &str = "11111111-2222-3333-4444-555555555555";
    const MACHINE: &str = "aaaaaaaa-aaaa-aaaa-aaaa-aaaaaaaaaaaa";

    fn whistle_monitor() -> Monitor {
        Monitor::from_public(USER, "whistle", &json!({"contacts": ["oncall"]})).unwrap()
    }

    fn whistle_probe(name: &str) -> Probe {
        Probe::from_public(
            USER,
            "whistle",
            name,
            &json!({
                "type": "logscan",
                "machine": MACHINE,
                "config": {"path": "/tmp/whistle.log", "regex": "tweet"},
            }),
            &ProbeTypeRegistry::builtin(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn put_get_delete_round_trip_with_invalidation() {
        let directory = MemDirectory::new();
        let caches = MasterCaches::default();
        let monitor = whistle_monitor();

        put_monitor(&directory, &caches, &monitor).await.unwrap();
        let read = get_monitor(&directory, &caches, USER, "whistle").await.unwrap();
        assert_eq!(read, monitor);

        // Warm cache, then delete: the next read must be a miss.
        delete_monitor(&directory, &caches, USER, "whistle").await.unwrap();
        let err = get_monitor(&directory, &caches, USER, "whistle")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ResourceNotFound);
    }

    #[tokio::test]
    async fn put_is_an_upsert() {
        let directory = MemDirectory::new();
        let caches = MasterCaches::default();
        put_monitor(&directory, &caches, &whistle_monitor()).await.unwrap();

        let updated =
            Monitor::from_public(USER, "whistle", &json!({"contacts": ["oncall", "page"]}))
                .unwrap();
        put_monitor(&directory, &caches, &updated).await.unwrap();

        let read = get_monitor(&directory, &caches, USER, "whistle").await.unwrap();
        assert_eq!(read.contacts.len(), 2);
    }

    #[tokio::test]
    async fn re_put_fully_replaces_the_stored_probe() {
        let directory = MemDirectory::new();
        let caches = MasterCaches::default();
        put_probe(&directory, &caches, &whistle_probe("whistlelog"))
            .await
            .unwrap();

        // Same DN, new target and type: the old machine and logscan
        // config must not survive on the record.
        let switched = Probe::from_public(
            USER,
            "whistle",
            "whistlelog",
            &json!({
                "type": "machineup",
                "server": "bbbbbbbb-bbbb-bbbb-bbbb-bbbbbbbbbbbb",
            }),
            &ProbeTypeRegistry::builtin(),
        )
        .unwrap();
        put_probe(&directory, &caches, &switched).await.unwrap();

        let read = get_probe(&directory, &caches, USER, "whistle", "whistlelog")
            .await
            .unwrap();
        assert_eq!(read, switched);
        assert_eq!(read.machine, None);
        assert_eq!(read.config, None);
        assert!(read.global);
    }

    #[tokio::test]
    async fn monitor_delete_is_refused_while_probes_remain() {
        let directory = MemDirectory::new();
        let caches = MasterCaches::default();
        put_monitor(&directory, &caches, &whistle_monitor()).await.unwrap();
        put_probe(&directory, &caches, &whistle_probe("whistlelog"))
            .await
            .unwrap();

        let err = delete_monitor(&directory, &caches, USER, "whistle")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Constraint);
        assert!(err.message().contains("1 probe"));

        let probe = fetch_probe_direct(&directory, USER, "whistle", "whistlelog")
            .await
            .unwrap();
        delete_probe(&directory, &caches, &probe).await.unwrap();
        delete_monitor(&directory, &caches, USER, "whistle").await.unwrap();
    }

    #[tokio::test]
    async fn lists_are_sorted_and_cached() {
        let directory = MemDirectory::new();
        let caches = MasterCaches::default();
        put_monitor(&directory, &caches, &whistle_monitor()).await.unwrap();
        put_probe(&directory, &caches, &whistle_probe("b")).await.unwrap();
        put_probe(&directory, &caches, &whistle_probe("a")).await.unwrap();

        let probes = list_probes(&directory, &caches, USER, "whistle").await.unwrap();
        assert_eq!(
            probes.iter().map(|p| p.name.as_str()).collect::<Vec<_>>(),
            vec!["a", "b"]
        );
        assert_eq!(caches.probe_list.len(), 1);
    }

    #[tokio::test]
    async fn search_probes_is_deterministic() {
        let directory = MemDirectory::new();
        let caches = MasterCaches::default();
        put_probe(&directory, &caches, &whistle_probe("z")).await.unwrap();
        put_probe(&directory, &caches, &whistle_probe("m")).await.unwrap();

        let filter = format!("(&(objectclass=amonprobe)(machine={MACHINE}))");
        let probes = search_probes(&directory, &filter).await.unwrap();
        assert_eq!(
            probes.iter().map(|p| p.name.as_str()).collect::<Vec<_>>(),
            vec!["m", "z"]
        );
    }
}
