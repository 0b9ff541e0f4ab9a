//! On-disk layout of sandboxes and the host-path encoding for work copies.

use std::path::{Path, PathBuf};

/// Name of the metadata file inside a sandbox directory.
pub const META_FILE: &str = "meta.json";

/// Directory under a sandbox that holds its isolated work copies.
pub const WORK_DIR: &str = "work";

/// Locates sandboxes under a common root directory.
#[derive(Debug, Clone)]
pub struct SandboxLayout {
    root: PathBuf,
}

impl SandboxLayout {
    /// Creates a layout rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the root holding every sandbox.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory for the named sandbox.
    pub fn sandbox_dir(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// Metadata file for the named sandbox.
    pub fn meta_path(&self, name: &str) -> PathBuf {
        self.sandbox_dir(name).join(META_FILE)
    }

    /// Isolated work copy of `host_path` inside the named sandbox.
    pub fn work_copy_path(&self, name: &str, host_path: &Path) -> PathBuf {
        self.sandbox_dir(name)
            .join(WORK_DIR)
            .join(encode_path(host_path))
    }
}

/// Encodes a host path into a single directory name.
///
/// `%` is escaped first so the mapping stays reversible.
pub fn encode_path(host_path: &Path) -> String {
    host_path
        .to_string_lossy()
        .replace('%', "%25")
        .replace('/', "%2F")
}

/// Reverses [`encode_path`].
pub fn decode_path(encoded: &str) -> PathBuf {
    PathBuf::from(encoded.replace("%2F", "/").replace("%25", "%"))
}
