use serde_json::{json, Value};

use crate::dn;
use crate::error::{Error, Result};
use crate::model::{body_string, validate_name, validate_uuid, DirEntry};

pub const OBJECTCLASS: &str = "amoncontact";

/// A notification endpoint owned by an account: a medium (key into the
/// notification-plugin registry) plus the medium-specific address.
#[derive(Debug, Clone, PartialEq)]
pub struct Contact {
    pub user: String,
    pub name: String,
    pub medium: String,
    pub data: String,
}

impl Contact {
    /// Constructs from the public REST form. Identity comes from the
    /// route; `medium` and `data` from the body.
    pub fn from_public(user: &str, name: &str, body: &Value) -> Result<Self> {
        validate_uuid("user", user)?;
        validate_name("contact name", name)?;
        let medium = body_string(body, "medium")?;
        validate_name("medium", &medium)?;
        let data = body_string(body, "data")?;
        Ok(Self {
            user: user.to_string(),
            name: name.to_string(),
            medium,
            data,
        })
    }

    /// Constructs from a directory record.
    pub fn from_entry(entry: &DirEntry) -> Result<Self> {
        if !entry.has_objectclass(OBJECTCLASS) {
            return Err(Error::internal(format!(
                "record \"{}\" is not an {OBJECTCLASS}",
                entry.dn
            )));
        }
        let (user, name) = dn::parse_contact_dn(&entry.dn)?;
        Ok(Self {
            user,
            name,
            medium: entry.require("medium")?.to_string(),
            data: entry.require("data")?.to_string(),
        })
    }

    pub fn dn(&self) -> String {
        dn::contact_dn(&self.user, &self.name)
    }

    pub fn parent_dn(&self) -> String {
        dn::account_dn(&self.user)
    }

    /// Public serialization. Contacts have no internal-only fields, so
    /// `internal` does not change the output.
    pub fn serialize(&self, _internal: bool) -> Value {
        json!({
            "user": self.user,
            "name": self.name,
            "medium": self.medium,
            "data": self.data,
        })
    }

    /// Directory attribute form for `add`/`modify`.
    pub fn to_attrs(&self) -> Vec<(String, Vec<String>)> {
        vec![
            ("objectclass".into(), vec![OBJECTCLASS.into()]),
            ("medium".into(), vec![self.medium.clone()]),
            ("data".into(), vec![self.data.clone()]),
        ]
    }
}
