//! Distinguished-name derivation and parsing.
//!
//! Every Amon entity's DN is fully determined by its identity parts, so
//! these helpers are the single source of truth for both directions.

use crate::error::{Error, Result};

pub const BASE_DN: &str = "o=smartdc";
pub const USERS_DN: &str = "ou=users, o=smartdc";
pub const OPERATORS_DN: &str = "cn=operators, ou=groups, o=smartdc";

pub fn account_dn(user: &str) -> String {
    format!("uuid={user}, {USERS_DN}")
}

pub fn contact_dn(user: &str, name: &str) -> String {
    format!("amoncontact={name}, uuid={user}, {USERS_DN}")
}

pub fn monitor_dn(user: &str, name: &str) -> String {
    format!("amonmonitor={name}, uuid={user}, {USERS_DN}")
}

pub fn probe_dn(user: &str, monitor: &str, name: &str) -> String {
    format!("amonprobe={name}, amonmonitor={monitor}, uuid={user}, {USERS_DN}")
}

/// Splits a DN into `(attribute, value)` RDN pairs, tolerating the
/// presence or absence of whitespace after separators.
fn rdns(dn: &str) -> Result<Vec<(&str, &str)>> {
    dn.split(',')
        .map(|rdn| {
            let rdn = rdn.trim();
            rdn.split_once('=')
                .ok_or_else(|| Error::internal(format!("malformed RDN \"{rdn}\" in dn \"{dn}\"")))
        })
        .collect()
}

fn expect_suffix(dn: &str, pairs: &[(&str, &str)], offset: usize) -> Result<()> {
    match pairs[offset..] {
        [("uuid", _), ("ou", "users"), ("o", "smartdc")] => Ok(()),
        _ => Err(Error::internal(format!("dn \"{dn}\" is not under the users tree"))),
    }
}

pub fn parse_account_dn(dn: &str) -> Result<String> {
    let pairs = rdns(dn)?;
    match pairs.as_slice() {
        [("uuid", user), ("ou", "users"), ("o", "smartdc")] => Ok(user.to_string()),
        _ => Err(Error::internal(format!("\"{dn}\" is not an account dn"))),
    }
}

/// Parses a contact DN into `(user, name)`.
pub fn parse_contact_dn(dn: &str) -> Result<(String, String)> {
    parse_child_dn(dn, "amoncontact")
}

/// Parses a monitor DN into `(user, name)`.
pub fn parse_monitor_dn(dn: &str) -> Result<(String, String)> {
    parse_child_dn(dn, "amonmonitor")
}

fn parse_child_dn(dn: &str, rdn_attr: &str) -> Result<(String, String)> {
    let pairs = rdns(dn)?;
    if pairs.len() != 4 || pairs[0].0 != rdn_attr {
        return Err(Error::internal(format!("\"{dn}\" is not an {rdn_attr} dn")));
    }
    expect_suffix(dn, &pairs, 1)?;
    Ok((pairs[1].1.to_string(), pairs[0].1.to_string()))
}

/// Parses a probe DN into `(user, monitor, name)`.
pub fn parse_probe_dn(dn: &str) -> Result<(String, String, String)> {
    let pairs = rdns(dn)?;
    if pairs.len() != 5 || pairs[0].0 != "amonprobe" || pairs[1].0 != "amonmonitor" {
        return Err(Error::internal(format!("\"{dn}\" is not an amonprobe dn")));
    }
    expect_suffix(dn, &pairs, 2)?;
    Ok((
        pairs[2].1.to_string(),
        pairs[1].1.to_string(),
        pairs[0].1.to_string(),
    ))
}
