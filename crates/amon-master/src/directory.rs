//! The directory adapter: a thin semantic view over the external
//! LDAP-shaped store that persists all Amon objects.
//!
//! Higher layers depend on [`Directory`] only and never see wire
//! details; directory failures are translated into the five adapter
//! error kinds before they leave this module.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::RwLock;

use async_trait::async_trait;
use ldap3::{Ldap, LdapConnAsync, LdapError, Mod, Scope, SearchEntry};
use thiserror::Error;
use tracing::{debug, info, warn};

use amon_common::{DirEntry, Error};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchScope {
    /// The base DN itself.
    Base,
    /// Direct children of the base DN.
    One,
    /// The base DN and everything below it.
    Sub,
}

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("no such entry: {0}")]
    NotFound(String),
    #[error("entry already exists: {0}")]
    AlreadyExists(String),
    #[error("directory unavailable: {0}")]
    Unavailable(String),
    #[error("constraint violation: {0}")]
    Constraint(String),
    #[error("directory error: {0}")]
    Other(String),
}

impl From<DirectoryError> for Error {
    fn from(err: DirectoryError) -> Self {
        match err {
            DirectoryError::NotFound(msg) => Error::not_found(msg),
            DirectoryError::AlreadyExists(msg) => Error::invalid_argument(msg),
            DirectoryError::Unavailable(msg) => Error::unavailable(msg),
            DirectoryError::Constraint(msg) => Error::constraint(msg),
            DirectoryError::Other(msg) => Error::internal(msg),
        }
    }
}

pub type DirResult<T> = std::result::Result<T, DirectoryError>;

/// Attribute list used for `add` and full-replacement `modify`.
pub type Attrs = Vec<(String, Vec<String>)>;

#[async_trait]
pub trait Directory: Send + Sync {
    /// Returns matching records verbatim. A nonexistent base DN yields
    /// an empty result, not an error; callers decide what absence means.
    async fn search(&self, base_dn: &str, scope: SearchScope, filter: &str)
        -> DirResult<Vec<DirEntry>>;

    async fn add(&self, dn: &str, attrs: Attrs) -> DirResult<()>;

    /// Replaces the entry's attributes with exactly the given set;
    /// stored attributes absent from it are removed (entity updates are
    /// full replacements, never in-place edits).
    async fn replace(&self, dn: &str, attrs: Attrs) -> DirResult<()>;

    async fn delete(&self, dn: &str) -> DirResult<()>;

    async fn unbind(&self) -> DirResult<()>;
}

// ---------------------------------------------------------------------
// LDAP-backed implementation

pub struct LdapDirectory {
    ldap: Ldap,
}

impl LdapDirectory {
    /// Connects and binds as the configured root DN.
    pub async fn connect(url: &str, bind_dn: &str, password: &str) -> DirResult<Self> {
        let (conn, mut ldap) = LdapConnAsync::new(url)
            .await
            .map_err(|e| DirectoryError::Unavailable(format!("connect {url}: {e}")))?;
        ldap3::drive!(conn);
        ldap.simple_bind(bind_dn, password)
            .await
            .map_err(map_ldap_error)?
            .success()
            .map_err(map_ldap_error)?;
        info!(url, bind_dn, "Bound to directory.");
        Ok(Self { ldap })
    }
}

fn map_result_code(rc: u32, text: String) -> DirectoryError {
    match rc {
        32 => DirectoryError::NotFound(text),
        68 => DirectoryError::AlreadyExists(text),
        19 | 20 => DirectoryError::Constraint(text),
        51 | 52 => DirectoryError::Unavailable(text),
        _ => DirectoryError::Other(format!("ldap result {rc}: {text}")),
    }
}

fn map_ldap_error(err: LdapError) -> DirectoryError {
    match err {
        LdapError::LdapResult { result } => map_result_code(result.rc, result.text),
        LdapError::Io { source } => DirectoryError::Unavailable(source.to_string()),
        LdapError::EndOfStream => DirectoryError::Unavailable("connection closed".into()),
        LdapError::Timeout { .. } => DirectoryError::Unavailable("operation timed out".into()),
        other => DirectoryError::Other(other.to_string()),
    }
}

fn to_hashset_attrs(attrs: Attrs) -> Vec<(String, HashSet<String>)> {
    attrs
        .into_iter()
        .map(|(name, values)| (name, values.into_iter().collect()))
        .collect()
}

#[async_trait]
impl Directory for LdapDirectory {
    async fn search(
        &self,
        base_dn: &str,
        scope: SearchScope,
        filter: &str,
    ) -> DirResult<Vec<DirEntry>> {
        let scope = match scope {
            SearchScope::Base => Scope::Base,
            SearchScope::One => Scope::OneLevel,
            SearchScope::Sub => Scope::Subtree,
        };
        let mut ldap = self.ldap.clone();
        let outcome = ldap
            .search(base_dn, scope, filter, vec!["*"])
            .await
            .map_err(map_ldap_error)?
            .success();
        let (entries, _) = match outcome {
            Ok(found) => found,
            // A missing base means "nothing there" for searches.
            Err(LdapError::LdapResult { result }) if result.rc == 32 => return Ok(vec![]),
            Err(err) => return Err(map_ldap_error(err)),
        };
        debug!(base_dn, filter, count = entries.len(), "Directory search.");
        Ok(entries
            .into_iter()
            .map(|raw| {
                let entry = SearchEntry::construct(raw);
                DirEntry {
                    dn: entry.dn,
                    attrs: entry.attrs,
                }
            })
            .collect())
    }

    async fn add(&self, dn: &str, attrs: Attrs) -> DirResult<()> {
        let mut ldap = self.ldap.clone();
        ldap.add(dn, to_hashset_attrs(attrs))
            .await
            .map_err(map_ldap_error)?
            .success()
            .map_err(map_ldap_error)?;
        Ok(())
    }

    async fn replace(&self, dn: &str, attrs: Attrs) -> DirResult<()> {
        let mut ldap = self.ldap.clone();
        let (existing, _) = ldap
            .search(dn, Scope::Base, "(objectclass=*)", vec!["*"])
            .await
            .map_err(map_ldap_error)?
            .success()
            .map_err(map_ldap_error)?;
        let current = match existing.into_iter().next() {
            Some(raw) => SearchEntry::construct(raw),
            None => return Err(DirectoryError::NotFound(dn.to_string())),
        };

        // One modify: drop every stored attribute the new set no longer
        // carries, then replace the rest.
        let keep: HashSet<&str> = attrs.iter().map(|(name, _)| name.as_str()).collect();
        let mut mods: Vec<Mod<String>> = current
            .attrs
            .keys()
            .filter(|name| !keep.contains(name.as_str()))
            .map(|name| Mod::Delete(name.clone(), HashSet::new()))
            .collect();
        mods.extend(
            attrs
                .into_iter()
                .map(|(name, values)| Mod::Replace(name, values.into_iter().collect())),
        );
        ldap.modify(dn, mods)
            .await
            .map_err(map_ldap_error)?
            .success()
            .map_err(map_ldap_error)?;
        Ok(())
    }

    async fn delete(&self, dn: &str) -> DirResult<()> {
        let mut ldap = self.ldap.clone();
        ldap.delete(dn)
            .await
            .map_err(map_ldap_error)?
            .success()
            .map_err(map_ldap_error)?;
        Ok(())
    }

    async fn unbind(&self) -> DirResult<()> {
        let mut ldap = self.ldap.clone();
        ldap.unbind().await.map_err(map_ldap_error)
    }
}

// ---------------------------------------------------------------------
// In-memory implementation (tests, local development)

/// Equality-and-conjunction subset of LDAP filters: everything the core
/// actually issues.
enum Filter {
    Eq(String, String),
    And(Vec<Filter>),
}

impl Filter {
    fn parse(input: &str) -> DirResult<Filter> {
        let (filter, rest) = Self::parse_one(input.trim())?;
        if !rest.is_empty() {
            return Err(DirectoryError::Other(format!(
                "trailing filter input: \"{rest}\""
            )));
        }
        Ok(filter)
    }

    fn parse_one(input: &str) -> DirResult<(Filter, &str)> {
        let bad = || DirectoryError::Other(format!("unsupported filter: \"{input}\""));
        let inner = input.strip_prefix('(').ok_or_else(bad)?;
        if let Some(mut rest) = inner.strip_prefix('&') {
            let mut parts = Vec::new();
            while rest.starts_with('(') {
                let (part, tail) = Self::parse_one(rest)?;
                parts.push(part);
                rest = tail;
            }
            let rest = rest.strip_prefix(')').ok_or_else(bad)?;
            Ok((Filter::And(parts), rest))
        } else {
            let close = inner.find(')').ok_or_else(bad)?;
            let (attr, value) = inner[..close].split_once('=').ok_or_else(bad)?;
            Ok((
                Filter::Eq(attr.to_string(), value.to_string()),
                &inner[close + 1..],
            ))
        }
    }

    fn matches(&self, attrs: &HashMap<String, Vec<String>>) -> bool {
        match self {
            Filter::Eq(attr, value) => attrs
                .get(attr)
                .map(|values| values.iter().any(|v| v == value))
                .unwrap_or(false),
            Filter::And(parts) => parts.iter().all(|part| part.matches(attrs)),
        }
    }
}

/// DN-keyed in-memory store with just enough LDAP semantics for the
/// core: scoped search, equality/conjunction filters, add/replace/
/// delete. Backs the test suites.
#[derive(Default)]
pub struct MemDirectory {
    entries: RwLock<BTreeMap<String, HashMap<String, Vec<String>>>>,
}

fn normalize_dn(dn: &str) -> String {
    dn.split(',')
        .map(str::trim)
        .collect::<Vec<_>>()
        .join(", ")
}

impl MemDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a record without the add-time existence check.
    pub fn seed(&self, dn: &str, attrs: Attrs) {
        let mut entries = self.entries.write().unwrap();
        entries.insert(normalize_dn(dn), attrs.into_iter().collect());
    }

    fn in_scope(dn: &str, base: &str, scope: SearchScope) -> bool {
        match scope {
            SearchScope::Base => dn == base,
            SearchScope::One => match dn.strip_suffix(base) {
                Some(prefix) => {
                    let prefix = prefix.trim_end().trim_end_matches(',');
                    !prefix.is_empty() && !prefix.contains(',')
                }
                None => false,
            },
            SearchScope::Sub => dn == base || dn.ends_with(&format!(", {base}")),
        }
    }
}

#[async_trait]
impl Directory for MemDirectory {
    async fn search(
        &self,
        base_dn: &str,
        scope: SearchScope,
        filter: &str,
    ) -> DirResult<Vec<DirEntry>> {
        let filter = Filter::parse(filter)?;
        let base = normalize_dn(base_dn);
        let entries = self.entries.read().unwrap();
        Ok(entries
            .iter()
            .filter(|(dn, attrs)| Self::in_scope(dn, &base, scope) && filter.matches(attrs))
            .map(|(dn, attrs)| DirEntry {
                dn: dn.clone(),
                attrs: attrs.clone(),
            })
            .collect())
    }

    async fn add(&self, dn: &str, attrs: Attrs) -> DirResult<()> {
        let dn = normalize_dn(dn);
        let mut entries = self.entries.write().unwrap();
        if entries.contains_key(&dn) {
            return Err(DirectoryError::AlreadyExists(dn));
        }
        entries.insert(dn, attrs.into_iter().collect());
        Ok(())
    }

    async fn replace(&self, dn: &str, attrs: Attrs) -> DirResult<()> {
        let dn = normalize_dn(dn);
        let mut entries = self.entries.write().unwrap();
        let record = entries
            .get_mut(&dn)
            .ok_or_else(|| DirectoryError::NotFound(dn.clone()))?;
        *record = attrs.into_iter().collect();
        Ok(())
    }

    async fn delete(&self, dn: &str) -> DirResult<()> {
        let dn = normalize_dn(dn);
        let mut entries = self.entries.write().unwrap();
        match entries.remove(&dn) {
            Some(_) => Ok(()),
            None => {
                warn!(dn = %dn, "Delete of a nonexistent entry.");
                Err(DirectoryError::NotFound(dn))
            }
        }
    }

    async fn unbind(&self) -> DirResult<()> {
        Ok(())
    }
}
