//! The authoritative object model: contacts, monitors and probes.
//!
//! Each type constructs from either the public REST form (route identity
//! plus a JSON body) or the directory-native form (a [`DirEntry`] with an
//! `objectclass`), validates at construction, and serializes back to the
//! public view. Directory persistence works through the attribute form
//! returned by `to_attrs`.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use crate::error::{Error, Result};

pub mod contact;
pub mod monitor;
pub mod probe;

pub use contact::Contact;
pub use monitor::Monitor;
pub use probe::Probe;

static NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9_.-]{0,31}$").unwrap());

static UUID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}$").unwrap()
});

/// A directory record: the shape of an LDAP search entry.
#[derive(Debug, Clone, PartialEq)]
pub struct DirEntry {
    pub dn: String,
    pub attrs: HashMap<String, Vec<String>>,
}

impl DirEntry {
    pub fn new(dn: impl Into<String>, attrs: Vec<(&str, Vec<String>)>) -> Self {
        Self {
            dn: dn.into(),
            attrs: attrs
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
        }
    }

    pub fn first(&self, attr: &str) -> Option<&str> {
        self.attrs.get(attr)?.first().map(String::as_str)
    }

    pub fn values(&self, attr: &str) -> &[String] {
        self.attrs.get(attr).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn has_objectclass(&self, objectclass: &str) -> bool {
        self.values("objectclass").iter().any(|v| v == objectclass)
    }

    fn require(&self, attr: &str) -> Result<&str> {
        self.first(attr).ok_or_else(|| {
            Error::internal(format!("record \"{}\" has no \"{attr}\" attribute", self.dn))
        })
    }
}

/// Validates an entity name against the shared naming rule.
pub fn validate_name(field: &str, name: &str) -> Result<()> {
    if NAME_RE.is_match(name) {
        Ok(())
    } else {
        Err(Error::invalid_argument(format!(
            "{field} \"{name}\" is invalid: must start with a letter and contain \
             at most 32 letters, digits or \"_.-\" characters"
        )))
    }
}

/// Validates a UUID-typed field (lowercase hyphenated form only).
pub fn validate_uuid(field: &str, value: &str) -> Result<()> {
    if UUID_RE.is_match(value) {
        Ok(())
    } else {
        Err(Error::invalid_argument(format!(
            "{field} \"{value}\" is not a UUID"
        )))
    }
}

/// Pulls a required string field out of a public-form JSON body.
fn body_string(body: &Value, field: &str) -> Result<String> {
    match body.get(field) {
        None | Some(Value::Null) => {
            Err(Error::missing_parameter(format!("\"{field}\" is required")))
        }
        Some(Value::String(s)) => Ok(s.clone()),
        Some(_) => Err(Error::invalid_argument(format!(
            "\"{field}\" must be a string"
        ))),
    }
}

/// Pulls an optional string field out of a public-form JSON body.
fn body_opt_string(body: &Value, field: &str) -> Result<Option<String>> {
    match body.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(Error::invalid_argument(format!(
            "\"{field}\" must be a string"
        ))),
    }
}
