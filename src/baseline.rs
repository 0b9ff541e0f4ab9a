//! Recording and advancing the baseline of work copies.
//!
//! The baseline only ever moves past a change when every earlier change was
//! applied too; see [`contiguous_prefix_end`].

use std::collections::HashSet;
use std::path::Path;

use crate::error::{Error, Result};
use crate::git::Git;
use crate::history::{has_uncommitted_changes, CommitInfo};
use crate::sandbox::{SandboxContext, Sandboxes};

/// Commit message of the initial baseline commit.
pub const BASELINE_MESSAGE: &str = "workcopy-sync baseline";

/// Commit message used when applied uncommitted work is folded into history.
pub const SNAPSHOT_MESSAGE: &str = "workcopy-sync: snapshot of applied uncommitted changes";

/// Records the starting point of a freshly copied work directory.
///
/// Initialises a repository when the copy has none of its own, commits the
/// whole tree and returns the commit id.
pub fn record_baseline(git: &Git, work_dir: &Path) -> Result<String> {
    if !work_dir.join(".git").exists() {
        git.run_ok(work_dir, ["init", "--quiet"])?;
    }
    git.stage_all(work_dir)?;
    let sha = git.commit_as_tool(work_dir, BASELINE_MESSAGE, true)?;
    tracing::info!(path = ?work_dir, baseline = %sha, "recorded baseline");
    Ok(sha)
}

/// Index of the last change in the unbroken applied run starting at the oldest.
///
/// Returns `None` when the oldest change was not applied.
pub fn contiguous_prefix_end<S>(commits: &[CommitInfo], applied: &HashSet<S>) -> Option<usize>
where
    S: std::borrow::Borrow<str> + std::hash::Hash + Eq,
{
    commits
        .iter()
        .take_while(|commit| applied.contains(commit.id.as_str()))
        .count()
        .checked_sub(1)
}

/// Commits uncommitted work in a copy so the baseline can move past it.
///
/// Returns the new commit id, or `None` when the tree was clean.
pub fn snapshot_uncommitted(git: &Git, ctx: &SandboxContext) -> Result<Option<String>> {
    ctx.require_copy("snapshotting uncommitted work")?;
    if !has_uncommitted_changes(git, ctx)? {
        return Ok(None);
    }
    git.stage_all(&ctx.work_dir)?;
    let sha = git.commit_as_tool(&ctx.work_dir, SNAPSHOT_MESSAGE, false)?;
    tracing::info!(path = ?ctx.work_dir, commit = %sha, "snapshotted uncommitted work");
    Ok(Some(sha))
}

impl Sandboxes {
    /// Moves the baseline of the primary working directory to its HEAD.
    ///
    /// Returns the new baseline, or `None` for live-mounted directories.
    pub fn advance_to_head(&self, name: &str) -> Result<Option<String>> {
        let ctx = self.context(name)?;
        self.advance_dir_to_head(&ctx)
    }

    /// Moves the baseline of the primary working directory to `point`.
    pub fn advance_to(&self, name: &str, point: &str) -> Result<String> {
        let ctx = self.context(name)?;
        self.advance_dir_to(&ctx, point)
    }

    /// Moves the baseline of one directory to its HEAD.
    pub fn advance_dir_to_head(&self, ctx: &SandboxContext) -> Result<Option<String>> {
        if !ctx.is_copy() {
            tracing::debug!(path = ?ctx.host_path, "live-mounted directory has no baseline to advance");
            return Ok(None);
        }
        let head = self.git().head(&ctx.work_dir)?;
        self.store_baseline(ctx, &head)?;
        Ok(Some(head))
    }

    /// Moves the baseline of one directory to an arbitrary revision of its copy.
    pub fn advance_dir_to(&self, ctx: &SandboxContext, point: &str) -> Result<String> {
        ctx.require_copy("moving the baseline")?;
        let sha = self.git().rev_parse(&ctx.work_dir, point)?;
        self.store_baseline(ctx, &sha)?;
        Ok(sha)
    }

    fn store_baseline(&self, ctx: &SandboxContext, sha: &str) -> Result<()> {
        let mut meta = self.load_meta(&ctx.name)?;
        let dir = meta.dir_mut(&ctx.host_path).ok_or_else(|| {
            Error::Config(format!(
                "sandbox {} has no directory {}",
                ctx.name,
                ctx.host_path.display()
            ))
        })?;
        let previous = dir.baseline_sha.replace(sha.to_string());
        self.save_meta(&meta)?;
        tracing::info!(
            sandbox = %ctx.name,
            path = ?ctx.host_path,
            from = ?previous,
            to = %sha,
            "advanced baseline"
        );
        Ok(())
    }
}
