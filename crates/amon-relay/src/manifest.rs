//! On-disk probe manifests, one pair of files per target:
//!
//! ```text
//! <data_dir>/<type>-<uuid>.json              current manifest body
//! <data_dir>/<type>-<uuid>.json.content-md5  base64 MD5 of that body
//! ```
//!
//! Writes go through a temp file and rename, so readers (the agent-facing
//! handlers) never observe a partial manifest. A target with no files yet
//! serves the empty manifest.

use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use tempfile::NamedTempFile;
use tracing::info;

pub const EMPTY_MANIFEST: &str = "[]";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    /// A tenant sandbox.
    Machine,
    /// A compute node's global zone.
    Server,
}

impl TargetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetKind::Machine => "machine",
            TargetKind::Server => "server",
        }
    }
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetId {
    pub kind: TargetKind,
    pub uuid: String,
}

impl TargetId {
    pub fn machine(uuid: impl Into<String>) -> Self {
        Self {
            kind: TargetKind::Machine,
            uuid: uuid.into(),
        }
    }

    pub fn server(uuid: impl Into<String>) -> Self {
        Self {
            kind: TargetKind::Server,
            uuid: uuid.into(),
        }
    }

    pub fn file_stem(&self) -> String {
        format!("{}-{}", self.kind, self.uuid)
    }
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.kind, self.uuid)
    }
}

pub fn content_md5(body: &[u8]) -> String {
    BASE64.encode(md5::compute(body).0)
}

pub struct ManifestStore {
    data_dir: PathBuf,
}

impl ManifestStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let data_dir = data_dir.into();
        fs::create_dir_all(&data_dir)?;
        Ok(Self { data_dir })
    }

    pub fn json_path(&self, target: &TargetId) -> PathBuf {
        self.data_dir.join(format!("{}.json", target.file_stem()))
    }

    pub fn md5_path(&self, target: &TargetId) -> PathBuf {
        self.data_dir
            .join(format!("{}.json.content-md5", target.file_stem()))
    }

    pub fn socket_path(&self, target: &TargetId) -> PathBuf {
        self.data_dir.join(format!("{}.sock", target.file_stem()))
    }

    /// The stored hash, or the empty manifest's hash when the target has
    /// never synced.
    pub fn current_md5(&self, target: &TargetId) -> String {
        fs::read_to_string(self.md5_path(target))
            .map(|s| s.trim().to_string())
            .unwrap_or_else(|_| content_md5(EMPTY_MANIFEST.as_bytes()))
    }

    /// The manifest body and its hash as one consistent pair.
    pub fn read(&self, target: &TargetId) -> (String, String) {
        match fs::read_to_string(self.json_path(target)) {
            Ok(body) => {
                let md5 = self.current_md5(target);
                (body, md5)
            }
            Err(_) => (
                EMPTY_MANIFEST.to_string(),
                content_md5(EMPTY_MANIFEST.as_bytes()),
            ),
        }
    }

    /// Atomically replaces both files. The hash is computed from the
    /// exact body bytes before anything lands on disk; the body file is
    /// renamed into place before the hash file, so a hash change always
    /// points at a fully written body.
    pub fn write(&self, target: &TargetId, body: &str) -> std::io::Result<String> {
        let md5 = content_md5(body.as_bytes());

        let mut json_tmp = NamedTempFile::new_in(&self.data_dir)?;
        json_tmp.write_all(body.as_bytes())?;
        json_tmp.flush()?;
        json_tmp.persist(self.json_path(target))?;

        let mut md5_tmp = NamedTempFile::new_in(&self.data_dir)?;
        md5_tmp.write_all(md5.as_bytes())?;
        md5_tmp.flush()?;
        md5_tmp.persist(self.md5_path(target))?;

        info!(target = %target, md5 = %md5, bytes = body.len(), "Wrote manifest.");
        Ok(md5)
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }
}
