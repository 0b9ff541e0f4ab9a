//! Derives the working context of a sandbox from its metadata.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

use super::layout::SandboxLayout;
use super::meta::{DirMeta, SandboxMeta, MODE_COPY, MODE_LIVE};

/// Revision used as the baseline of live-mounted directories.
pub const LIVE_BASELINE: &str = "HEAD";

/// How a sandbox sees one of its directories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WorkMode {
    /// Private copy with its own history and a recorded baseline.
    IsolatedCopy,
    /// The host directory itself, edited in place.
    LiveMounted,
}

impl FromStr for WorkMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            MODE_COPY => Ok(WorkMode::IsolatedCopy),
            MODE_LIVE => Ok(WorkMode::LiveMounted),
            other => Err(Error::UnsupportedMode(format!(
                "directory mode '{}' is not supported (expected '{}' or '{}')",
                other, MODE_COPY, MODE_LIVE
            ))),
        }
    }
}

impl fmt::Display for WorkMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkMode::IsolatedCopy => write!(f, "{}", MODE_COPY),
            WorkMode::LiveMounted => write!(f, "{}", MODE_LIVE),
        }
    }
}

/// Everything needed to reason about one directory's changes.
///
/// Rebuilt from metadata on every call, never cached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxContext {
    /// Sandbox name.
    pub name: String,
    /// Original directory on the host.
    pub host_path: PathBuf,
    /// Directory whose history is inspected.
    pub work_dir: PathBuf,
    /// Revision changes are measured against.
    pub baseline_ref: String,
    /// Workdir model.
    pub mode: WorkMode,
}

impl SandboxContext {
    /// Returns true for isolated work copies.
    pub fn is_copy(&self) -> bool {
        self.mode == WorkMode::IsolatedCopy
    }

    /// Fails with [`Error::UnsupportedMode`] unless this is an isolated copy.
    pub fn require_copy(&self, operation: &str) -> Result<()> {
        if self.is_copy() {
            return Ok(());
        }
        Err(Error::UnsupportedMode(format!(
            "{} is not available for live-mounted directory {} of sandbox {}; its changes are already in place",
            operation,
            self.host_path.display(),
            self.name
        )))
    }
}

/// Builds the context of one directory entry.
pub fn dir_context(layout: &SandboxLayout, name: &str, dir: &DirMeta) -> Result<SandboxContext> {
    let mode: WorkMode = dir.mode.parse()?;
    match mode {
        WorkMode::IsolatedCopy => {
            let baseline_ref = dir
                .baseline_sha
                .as_deref()
                .map(str::trim)
                .filter(|sha| !sha.is_empty())
                .ok_or_else(|| Error::MissingBaseline(name.to_string()))?
                .to_string();
            Ok(SandboxContext {
                name: name.to_string(),
                host_path: dir.host_path.clone(),
                work_dir: layout.work_copy_path(name, &dir.host_path),
                baseline_ref,
                mode,
            })
        }
        WorkMode::LiveMounted => Ok(SandboxContext {
            name: name.to_string(),
            host_path: dir.host_path.clone(),
            work_dir: dir.host_path.clone(),
            baseline_ref: LIVE_BASELINE.to_string(),
            mode,
        }),
    }
}

/// Builds the context of the sandbox's primary working directory.
pub fn workdir_context(layout: &SandboxLayout, meta: &SandboxMeta) -> Result<SandboxContext> {
    dir_context(layout, &meta.name, &meta.workdir)
}

/// Builds contexts for every directory of the sandbox, primary first.
pub fn all_contexts(layout: &SandboxLayout, meta: &SandboxMeta) -> Result<Vec<SandboxContext>> {
    meta.all_dirs()
        .map(|dir| dir_context(layout, &meta.name, dir))
        .collect()
}
