use serde_json::{json, Value};

use crate::dn;
use crate::error::{Error, Result};
use crate::model::{validate_name, validate_uuid, DirEntry};

pub const OBJECTCLASS: &str = "amonmonitor";

/// A named group of contacts to notify when one of the monitor's probes
/// fires. Contact names are resolved lazily at dispatch time; a stale
/// name is skipped with a warning rather than failing the monitor.
#[derive(Debug, Clone, PartialEq)]
pub struct Monitor {
    pub user: String,
    pub name: String,
    pub contacts: Vec<String>,
}

impl Monitor {
    pub fn from_public(user: &str, name: &str, body: &Value) -> Result<Self> {
        validate_uuid("user", user)?;
        validate_name("monitor name", name)?;
        let contacts = match body.get("contacts") {
            None | Some(Value::Null) => {
                return Err(Error::missing_parameter("\"contacts\" is required"));
            }
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| match item {
                    Value::String(s) => {
                        validate_name("contact name", s)?;
                        Ok(s.clone())
                    }
                    _ => Err(Error::invalid_argument(
                        "\"contacts\" must be an array of contact names",
                    )),
                })
                .collect::<Result<Vec<_>>>()?,
            Some(_) => {
                return Err(Error::invalid_argument(
                    "\"contacts\" must be an array of contact names",
                ));
            }
        };
        if contacts.is_empty() {
            return Err(Error::invalid_argument(
                "\"contacts\" must name at least one contact",
            ));
        }
        Ok(Self {
            user: user.to_string(),
            name: name.to_string(),
            contacts,
        })
    }

    pub fn from_entry(entry: &DirEntry) -> Result<Self> {
        if !entry.has_objectclass(OBJECTCLASS) {
            return Err(Error::internal(format!(
                "record \"{}\" is not an {OBJECTCLASS}",
                entry.dn
            )));
        }
        let (user, name) = dn::parse_monitor_dn(&entry.dn)?;
        let contacts: Vec<String> = entry.values("contact").to_vec();
        if contacts.is_empty() {
            return Err(Error::internal(format!(
                "record \"{}\" has no \"contact\" attribute",
                entry.dn
            )));
        }
        Ok(Self {
            user,
            name,
            contacts,
        })
    }

    pub fn dn(&self) -> String {
        dn::monitor_dn(&self.user, &self.name)
    }

    pub fn parent_dn(&self) -> String {
        dn::account_dn(&self.user)
    }

    pub fn serialize(&self, _internal: bool) -> Value {
        json!({
            "user": self.user,
            "name": self.name,
            "contacts": self.contacts,
        })
    }

    pub fn to_attrs(&self) -> Vec<(String, Vec<String>)> {
        vec![
            ("objectclass".into(), vec![OBJECTCLASS.into()]),
            ("contact".into(), self.contacts.clone()),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const USER: &str = "11111111-2222-3333-4444-555555555555";

    #[test]
    fn contacts_are_required_and_ordered() {
        let err = Monitor::from_public(USER, "whistle", &json!({})).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::MissingParameter);

        let monitor =
            Monitor::from_public(USER, "whistle", &json!({"contacts": ["b", "a"]})).unwrap();
        assert_eq!(monitor.contacts, vec!["b", "a"]);
    }

    #[test]
    fn empty_contact_list_is_rejected() {
        let err = Monitor::from_public(USER, "whistle", &json!({"contacts": []})).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidArgument);
    }

    #[test]
    fn directory_form_round_trips() {
        let monitor =
            Monitor::from_public(USER, "whistle", &json!({"contacts": ["oncall"]})).unwrap();
        let entry = DirEntry::new(
            monitor.dn(),
            monitor
                .to_attrs()
                .iter()
                .map(|(k, v)| (k.as_str(), v.clone()))
                .collect(),
        );
        assert_eq!(Monitor::from_entry(&entry).unwrap(), monitor);
    }
}
