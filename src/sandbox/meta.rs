//! Persisted sandbox metadata.
//!
//! Saved to `meta.json` in the sandbox directory. Only the baseline field is
//! ever written back by this crate.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

use super::layout::SandboxLayout;

/// Mode string for an isolated work copy.
pub const MODE_COPY: &str = "copy";

/// Mode string for a live-mounted host directory.
pub const MODE_LIVE: &str = "rw";

/// Metadata for one directory a sandbox works on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirMeta {
    /// Original directory on the host.
    pub host_path: PathBuf,
    /// How the directory is exposed to the agent (`copy`, `rw`, ...).
    pub mode: String,
    /// Commit id the work copy started from (copy mode only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baseline_sha: Option<String>,
}

impl DirMeta {
    /// Metadata for an isolated work copy with a recorded baseline.
    pub fn copy(host_path: impl Into<PathBuf>, baseline_sha: impl Into<String>) -> Self {
        Self {
            host_path: host_path.into(),
            mode: MODE_COPY.to_string(),
            baseline_sha: Some(baseline_sha.into()),
        }
    }

    /// Metadata for a live-mounted directory.
    pub fn live(host_path: impl Into<PathBuf>) -> Self {
        Self {
            host_path: host_path.into(),
            mode: MODE_LIVE.to_string(),
            baseline_sha: None,
        }
    }
}

/// Metadata record of a sandbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxMeta {
    /// Sandbox name.
    pub name: String,
    /// Primary working directory.
    pub workdir: DirMeta,
    /// Additional directories mounted into the sandbox.
    #[serde(default)]
    pub directories: Vec<DirMeta>,
}

impl SandboxMeta {
    /// Creates a record with only a primary working directory.
    pub fn new(name: impl Into<String>, workdir: DirMeta) -> Self {
        Self {
            name: name.into(),
            workdir,
            directories: Vec::new(),
        }
    }

    /// Adds an auxiliary directory.
    pub fn with_directory(mut self, dir: DirMeta) -> Self {
        self.directories.push(dir);
        self
    }

    /// Primary directory first, then auxiliary directories in stored order.
    pub fn all_dirs(&self) -> impl Iterator<Item = &DirMeta> {
        std::iter::once(&self.workdir).chain(self.directories.iter())
    }

    /// Finds the directory entry for `host_path`.
    pub fn dir_mut(&mut self, host_path: &Path) -> Option<&mut DirMeta> {
        if self.workdir.host_path == host_path {
            return Some(&mut self.workdir);
        }
        self.directories
            .iter_mut()
            .find(|d| d.host_path == host_path)
    }
}

/// Loads the metadata record of the named sandbox.
pub fn load_meta(layout: &SandboxLayout, name: &str) -> Result<SandboxMeta> {
    let path = layout.meta_path(name);
    if !layout.sandbox_dir(name).is_dir() || !path.is_file() {
        return Err(Error::SandboxNotFound(name.to_string()));
    }
    let data = std::fs::read(&path)?;
    Ok(serde_json::from_slice(&data)?)
}

/// Writes the metadata record, replacing the file atomically.
pub fn save_meta(layout: &SandboxLayout, meta: &SandboxMeta) -> Result<()> {
    let dir = layout.sandbox_dir(&meta.name);
    if !dir.is_dir() {
        return Err(Error::SandboxNotFound(meta.name.clone()));
    }
    let data = serde_json::to_vec_pretty(meta)?;
    let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
    std::io::Write::write_all(&mut tmp, &data)?;
    tmp.persist(layout.meta_path(&meta.name))
        .map_err(|e| Error::Io(e.error))?;
    Ok(())
}
