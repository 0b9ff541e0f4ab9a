//! Changes recorded in a work copy beyond its baseline.

use std::ffi::OsString;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::diff::{commit_range_diff, push_pathspec, DiffFormat, DiffStat};
use crate::error::Result;
use crate::git::Git;
use crate::refs::resolve_refs;
use crate::sandbox::{SandboxContext, Sandboxes};

/// One recorded change.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CommitInfo {
    /// Full commit id.
    pub id: String,
    /// First line of the commit message.
    pub subject: String,
}

impl CommitInfo {
    /// First seven characters of the id.
    pub fn short_id(&self) -> &str {
        &self.id[..self.id.len().min(7)]
    }
}

/// A change with its own summary, computed against its parent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitWithStat {
    pub commit: CommitInfo,
    pub stat: DiffStat,
    /// Stat text as printed by git.
    pub summary: String,
}

fn parse_log(text: &str) -> Vec<CommitInfo> {
    text.lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            let (id, subject) = line.split_once('\t').unwrap_or((line, ""));
            CommitInfo {
                id: id.trim().to_string(),
                subject: subject.to_string(),
            }
        })
        .collect()
}

/// Changes after the baseline, oldest first, optionally limited to those
/// touching `paths`.
pub fn list_commits_touching(
    git: &Git,
    ctx: &SandboxContext,
    paths: &[PathBuf],
) -> Result<Vec<CommitInfo>> {
    ctx.require_copy("listing changes beyond the baseline")?;
    let mut args: Vec<OsString> = vec![
        "log".into(),
        "--reverse".into(),
        "--no-merges".into(),
        "--format=%H%x09%s".into(),
        format!("{}..HEAD", ctx.baseline_ref).into(),
    ];
    push_pathspec(&mut args, paths);
    Ok(parse_log(&git.text(&ctx.work_dir, &args)?))
}

/// Changes after the baseline, oldest first. Empty when HEAD is the baseline.
pub fn list_commits(git: &Git, ctx: &SandboxContext) -> Result<Vec<CommitInfo>> {
    list_commits_touching(git, ctx, &[])
}

/// Changes after the baseline, each with its own summary.
pub fn list_commits_with_stat(git: &Git, ctx: &SandboxContext) -> Result<Vec<CommitWithStat>> {
    list_commits(git, ctx)?
        .into_iter()
        .map(|commit| {
            let parent = format!("{}^", commit.id);
            let raw =
                commit_range_diff(git, &ctx.work_dir, &parent, &commit.id, DiffFormat::Stat, &[])?;
            let summary = String::from_utf8_lossy(&raw)
                .trim_end_matches(['\n', '\r'])
                .to_string();
            Ok(CommitWithStat {
                stat: DiffStat::parse(&summary),
                summary,
                commit,
            })
        })
        .collect()
}

/// Returns true when the work tree differs from HEAD, untracked files included.
pub fn has_uncommitted_changes(git: &Git, ctx: &SandboxContext) -> Result<bool> {
    let status = git.run_ok(&ctx.work_dir, ["status", "--porcelain", "--untracked-files=all"])?;
    Ok(!status.stdout_text().trim().is_empty())
}

impl Sandboxes {
    /// Changes beyond the baseline of the primary working directory.
    pub fn list_commits(&self, name: &str) -> Result<Vec<CommitInfo>> {
        list_commits(self.git(), &self.context(name)?)
    }

    /// Changes beyond the baseline, each with its own summary.
    pub fn list_commits_with_stat(&self, name: &str) -> Result<Vec<CommitWithStat>> {
        list_commits_with_stat(self.git(), &self.context(name)?)
    }

    /// Resolves one short change id against the changes beyond the baseline.
    pub fn resolve_ref(&self, name: &str, reference: &str) -> Result<CommitInfo> {
        let commits = self.list_commits(name)?;
        crate::refs::resolve_ref(&commits, reference).cloned()
    }

    /// Resolves single ids and ranges into an ordered, deduplicated set of changes.
    pub fn resolve_refs<S: AsRef<str>>(&self, name: &str, refs: &[S]) -> Result<Vec<CommitInfo>> {
        let commits = self.list_commits(name)?;
        resolve_refs(&commits, refs)
    }
}
