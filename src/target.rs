//! Directories that change sets are applied to.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

use crate::error::{Error, Result};
use crate::git::Git;

/// A directory to apply artifacts to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyTarget {
    /// Symlink-resolved path of the directory.
    pub path: PathBuf,
    /// True when the directory is the top level of its own git repository.
    pub is_tracked: bool,
}

impl ApplyTarget {
    /// Inspects `path` and decides how artifacts are applied to it.
    ///
    /// Only a repository's top level counts as tracked; a subdirectory of a
    /// repository is treated as a plain directory so patch paths stay
    /// relative to the target.
    pub fn detect(git: &Git, path: &Path) -> Result<Self> {
        let path = canonical_dir(path)?;
        let is_tracked = match git.toplevel(&path)? {
            Some(top) => Path::new(&top)
                .canonicalize()
                .map(|top| top == path)
                .unwrap_or(false),
            None => false,
        };
        tracing::debug!(target = ?path, tracked = is_tracked, "detected apply target");
        Ok(Self { path, is_tracked })
    }

    /// A target with an explicit tracked flag. The path is still resolved.
    pub fn new(path: &Path, is_tracked: bool) -> Result<Self> {
        Ok(Self {
            path: canonical_dir(path)?,
            is_tracked,
        })
    }
}

fn canonical_dir(path: &Path) -> Result<PathBuf> {
    let resolved = path.canonicalize().map_err(|e| Error::ApplyFailed {
        target: path.to_path_buf(),
        detail: format!("cannot resolve target directory: {}", e),
    })?;
    if !resolved.is_dir() {
        return Err(Error::ApplyFailed {
            target: path.to_path_buf(),
            detail: "target is not a directory".to_string(),
        });
    }
    Ok(resolved)
}

/// An empty repository used to run apply against an untracked target.
///
/// Removed when dropped.
pub struct ScratchShell {
    dir: TempDir,
}

impl ScratchShell {
    /// Creates and initialises a scratch repository.
    pub fn create(git: &Git) -> Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix("workcopy-sync-apply-")
            .tempdir()?;
        git.run_ok(dir.path(), ["init", "--quiet"])?;
        Ok(Self { dir })
    }

    /// Path of the scratch repository.
    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}

/// A detached checkout of a tracked target's HEAD, used to rehearse a replay.
///
/// Unregistered from the repository and deleted when dropped.
pub struct ScratchWorktree<'a> {
    git: &'a Git,
    repo: PathBuf,
    path: PathBuf,
    _dir: TempDir,
}

impl<'a> ScratchWorktree<'a> {
    /// Checks out HEAD of `repo` into a new temporary worktree.
    pub fn create(git: &'a Git, repo: &Path) -> Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix("workcopy-sync-check-")
            .tempdir()?;
        let path = dir.path().join("tree");
        git.run_ok(
            repo,
            [
                OsStr::new("worktree"),
                OsStr::new("add"),
                OsStr::new("--detach"),
                OsStr::new("--quiet"),
                path.as_os_str(),
                OsStr::new("HEAD"),
            ],
        )?;
        Ok(Self {
            git,
            repo: repo.to_path_buf(),
            path,
            _dir: dir,
        })
    }

    /// Path of the checkout.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ScratchWorktree<'_> {
    fn drop(&mut self) {
        let removed = self.git.run(
            &self.repo,
            [
                OsStr::new("worktree"),
                OsStr::new("remove"),
                OsStr::new("--force"),
                self.path.as_os_str(),
            ],
        );
        if !matches!(removed, Ok(ref out) if out.success()) {
            tracing::warn!(repo = ?self.repo, "failed to remove scratch worktree");
            let _ = self.git.run(&self.repo, ["worktree", "prune"]);
        }
    }
}
