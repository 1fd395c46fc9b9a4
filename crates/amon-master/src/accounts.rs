//! Account resolution and operator status.
//!
//! Account records are external (owned by the cloud's identity service);
//! the master only reads them: by login for the `/pub/:login` routes, and
//! group membership for operator checks. Both reads are cache-assisted.

use serde_json::{json, Value};
use tracing::debug;

use amon_common::{dn, Error, Result};

use crate::cache::{CacheValue, MasterCaches};
use crate::directory::{Directory, SearchScope};

#[derive(Debug, Clone, PartialEq)]
pub struct Account {
    pub uuid: String,
    pub login: String,
}

impl Account {
    pub fn serialize(&self) -> Value {
        json!({
            "login": self.login,
            "uuid": self.uuid,
        })
    }
}

/// Resolves a login to its account, `ResourceNotFound` when unknown.
pub async fn get_by_login(
    directory: &dyn Directory,
    caches: &MasterCaches,
    login: &str,
) -> Result<Account> {
    // The login lands in a directory filter; it must match the name rule.
    amon_common::model::validate_name("login", login)?;

    let unknown = || Error::not_found(format!("account \"{login}\" does not exist"));
    match caches.account_by_login.get(login) {
        Some(CacheValue::Hit(account)) => return Ok(account),
        Some(CacheValue::NegativeHit) => return Err(unknown()),
        None => {}
    }

    let found = directory
        .search(dn::USERS_DN, SearchScope::One, &format!("(login={login})"))
        .await?;
    let entry = match found.first() {
        Some(entry) => entry,
        None => {
            caches
                .account_by_login
                .put(login, CacheValue::NegativeHit);
            return Err(unknown());
        }
    };
    if found.len() > 1 {
        return Err(Error::internal(format!(
            "multiple accounts match login \"{login}\""
        )));
    }
    let uuid = match entry.first("uuid") {
        Some(uuid) => uuid.to_string(),
        None => dn::parse_account_dn(&entry.dn)?,
    };

    let account = Account {
        uuid,
        login: login.to_string(),
    };
    caches
        .account_by_login
        .put(login, CacheValue::Hit(account.clone()));
    Ok(account)
}

/// An operator is a member of the fixed operators group.
pub async fn is_operator(
    directory: &dyn Directory,
    caches: &MasterCaches,
    account: &Account,
) -> Result<bool> {
    if let Some(CacheValue::Hit(status)) = caches.operator_status.get(&account.uuid) {
        return Ok(status);
    }

    let account_dn = dn::account_dn(&account.uuid);
    let found = directory
        .search(
            dn::OPERATORS_DN,
            SearchScope::Base,
            &format!("(uniquemember={account_dn})"),
        )
        .await?;
    let status = !found.is_empty();
    debug!(login = %account.login, operator = status, "Operator check.");
    caches
        .operator_status
        .put(&account.uuid, CacheValue::Hit(status));
    Ok(status)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::MemDirectory;
    use amon_common::ErrorKind;

    const ALICE: &str = "11111111-2222-3333-4444-555555555555";

    fn seeded() -> MemDirectory {
        let directory = MemDirectory::new();
        directory.seed(
            &dn::account_dn(ALICE),
            vec![
                ("objectclass".into(), vec!["sdcperson".into()]),
                ("uuid".into(), vec![ALICE.into()]),
                ("login".into(), vec!["alice".into()]),
            ],
        );
        directory.seed(
            dn::OPERATORS_DN,
            vec![
                ("objectclass".into(), vec!["groupofuniquenames".into()]),
                ("uniquemember".into(), vec![dn::account_dn(ALICE)]),
            ],
        );
        directory
    }

    #[tokio::test]
    async fn lookup_caches_hits_and_misses() {
        let directory = seeded();
        let caches = MasterCaches::default();

        let account = get_by_login(&directory, &caches, "alice").await.unwrap();
        assert_eq!(account.uuid, ALICE);
        assert_eq!(caches.account_by_login.len(), 1);

        let err = get_by_login(&directory, &caches, "nobody")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ResourceNotFound);
        // The negative result is cached too.
        assert_eq!(caches.account_by_login.len(), 2);
    }

    #[tokio::test]
    async fn operator_membership() {
        let directory = seeded();
        let caches = MasterCaches::default();
        let alice = get_by_login(&directory, &caches, "alice").await.unwrap();
        assert!(is_operator(&directory, &caches, &alice).await.unwrap());

        let bob = Account {
            uuid: "99999999-9999-9999-9999-999999999999".into(),
            login: "bob".into(),
        };
        assert!(!is_operator(&directory, &caches, &bob).await.unwrap());
    }
}
