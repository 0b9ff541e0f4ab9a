//! Patch transport: generating artifacts from a work copy and applying them.
//!
//! A [`Patch`] is one combined, binary-safe diff. A [`PatchSet`] holds one
//! mail-formatted patch per change, carrying author and message, in
//! chronological order.

use std::collections::HashSet;
use std::ffi::{OsStr, OsString};
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

use crate::conflict::{classify_apply_failure, ApplyConflict};
use crate::diff::{push_pathspec, staged_diff, DiffFormat};
use crate::error::{Error, Result};
use crate::git::{Git, GitOutput};
use crate::history::{list_commits, list_commits_touching, CommitInfo};
use crate::refs::resolve_refs;
use crate::sandbox::{SandboxContext, Sandboxes};
use crate::target::{ApplyTarget, ScratchShell, ScratchWorktree};

/// A combined artifact covering everything in a range.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Patch {
    /// Raw patch bytes, ready for `git apply`.
    pub bytes: Vec<u8>,
    /// Human-readable stat summary.
    pub stat: String,
}

impl Patch {
    /// True when the artifact carries no changes.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// One per-change artifact within a [`PatchSet`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchEntry {
    /// The change this artifact recreates.
    pub commit: CommitInfo,
    /// Location of the mail-formatted patch file.
    pub path: PathBuf,
}

/// Ordered per-change artifacts stored in a private temporary directory.
#[derive(Debug)]
pub struct PatchSet {
    dir: TempDir,
    entries: Vec<PatchEntry>,
}

impl PatchSet {
    fn empty() -> Result<Self> {
        Ok(Self {
            dir: tempfile::Builder::new()
                .prefix("workcopy-sync-patches-")
                .tempdir()?,
            entries: Vec::new(),
        })
    }

    /// Artifacts in application order.
    pub fn entries(&self) -> &[PatchEntry] {
        &self.entries
    }

    /// The changes the artifacts recreate, in order.
    pub fn commits(&self) -> Vec<CommitInfo> {
        self.entries.iter().map(|e| e.commit.clone()).collect()
    }

    /// Number of artifacts.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when there is nothing to apply.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Directory holding the patch files.
    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    /// Copies the patch files into `dest`, keeping their sortable names.
    pub fn export(&self, dest: &Path) -> Result<Vec<PathBuf>> {
        std::fs::create_dir_all(dest)?;
        self.entries
            .iter()
            .map(|entry| {
                let name = entry.path.file_name().ok_or_else(|| {
                    Error::Git(format!("patch without file name: {}", entry.path.display()))
                })?;
                let out = dest.join(name);
                std::fs::copy(&entry.path, &out)?;
                Ok(out)
            })
            .collect()
    }
}

fn combined_patch(git: &Git, ctx: &SandboxContext, from: &str, paths: &[PathBuf]) -> Result<Patch> {
    let bytes = staged_diff(git, &ctx.work_dir, from, DiffFormat::Full, paths)?;
    if bytes.is_empty() {
        return Ok(Patch::default());
    }
    let stat = staged_diff(git, &ctx.work_dir, from, DiffFormat::Stat, paths)?;
    Ok(Patch {
        bytes,
        stat: String::from_utf8_lossy(&stat).trim_end().to_string(),
    })
}

/// Squashes everything from the baseline to the current tree into one artifact.
pub fn generate_patch(git: &Git, ctx: &SandboxContext, paths: &[PathBuf]) -> Result<Patch> {
    ctx.require_copy("generating a patch")?;
    combined_patch(git, ctx, &ctx.baseline_ref, paths)
}

/// Artifact of the uncommitted work only (HEAD to current tree).
pub fn generate_wip_patch(git: &Git, ctx: &SandboxContext, paths: &[PathBuf]) -> Result<Patch> {
    ctx.require_copy("generating a patch")?;
    combined_patch(git, ctx, "HEAD", paths)
}

/// One artifact per change beyond the baseline.
///
/// With `refs`, only the selected changes are included. With `paths`, only
/// changes touching those paths are included and each artifact is limited
/// to them.
pub fn generate_patch_set<S: AsRef<str>>(
    git: &Git,
    ctx: &SandboxContext,
    paths: &[PathBuf],
    refs: Option<&[S]>,
) -> Result<PatchSet> {
    ctx.require_copy("generating patches")?;
    let all = list_commits(git, ctx)?;
    let mut selected = match refs {
        Some(refs) => resolve_refs(&all, refs)?,
        None => all,
    };
    if !paths.is_empty() {
        let touching: HashSet<String> = list_commits_touching(git, ctx, paths)?
            .into_iter()
            .map(|c| c.id)
            .collect();
        selected.retain(|c| touching.contains(&c.id));
    }

    let mut set = PatchSet::empty()?;
    for commit in selected {
        let number = set.entries.len() + 1;
        // An explicit one-commit range: `-1 <id>` with a pathspec walks back
        // to the newest ancestor touching the paths instead.
        let mut args: Vec<OsString> = vec![
            "format-patch".into(),
            "--binary".into(),
            "--no-renames".into(),
            format!("--start-number={}", number).into(),
            "-o".into(),
            set.dir.path().as_os_str().to_owned(),
            format!("{id}^..{id}", id = commit.id).into(),
        ];
        push_pathspec(&mut args, paths);

        let output = git.text(&ctx.work_dir, &args)?;
        let Some(file) = output.lines().map(str::trim).find(|l| !l.is_empty()) else {
            tracing::debug!(commit = %commit.short_id(), "change does not touch the selected paths");
            continue;
        };

        let path = PathBuf::from(file);
        let path = if path.is_absolute() {
            path
        } else {
            ctx.work_dir.join(path)
        };
        set.entries.push(PatchEntry { commit, path });
    }

    tracing::debug!(count = set.len(), "generated per-change patches");
    Ok(set)
}

fn write_temp_patch(bytes: &[u8]) -> Result<tempfile::NamedTempFile> {
    let mut file = tempfile::Builder::new()
        .prefix("workcopy-sync-")
        .suffix(".patch")
        .tempfile()?;
    file.write_all(bytes)?;
    file.flush()?;
    Ok(file)
}

/// Runs `git apply` for a combined patch file, in place or relocated.
fn git_apply(git: &Git, patch_file: &Path, target: &ApplyTarget, check: bool) -> Result<()> {
    git_apply_at(git, patch_file, &target.path, target.is_tracked, &target.path, check)
}

/// `git apply` into `root`, reporting failures against `reported`.
fn git_apply_at(
    git: &Git,
    patch_file: &Path,
    root: &Path,
    is_tracked: bool,
    reported: &Path,
    check: bool,
) -> Result<()> {
    let mut args: Vec<OsString> = vec!["apply".into(), "--whitespace=nowarn".into()];
    if check {
        args.push("--check".into());
    }

    let output = if is_tracked {
        args.push(patch_file.as_os_str().to_owned());
        git.run(root, &args)?
    } else {
        let shell = ScratchShell::create(git)?;
        args.push("--unsafe-paths".into());
        let mut directory = OsString::from("--directory=");
        directory.push(root.as_os_str());
        args.push(directory);
        args.push(patch_file.as_os_str().to_owned());
        git.run(shell.path(), &args)?
    };

    if output.success() {
        return Ok(());
    }
    let mut text = output.combined_text();
    if root != reported {
        text = text.replace(&*root.to_string_lossy(), &reported.to_string_lossy());
    }
    Err(classify_apply_failure(&text, reported))
}

/// Validates that `patch` applies cleanly to `target` without changing it.
///
/// Uses the same apply invocation as [`apply_patch`], so a clean check
/// means a clean apply.
pub fn check_apply(git: &Git, patch: &Patch, target: &ApplyTarget) -> Result<()> {
    if patch.is_empty() {
        return Ok(());
    }
    let file = write_temp_patch(&patch.bytes)?;
    git_apply(git, file.path(), target, true)
}

/// Applies a combined patch to `target`.
pub fn apply_patch(git: &Git, patch: &Patch, target: &ApplyTarget) -> Result<()> {
    if patch.is_empty() {
        return Ok(());
    }
    let file = write_temp_patch(&patch.bytes)?;
    git_apply(git, file.path(), target, false)?;
    tracing::info!(target = ?target.path, "applied patch");
    Ok(())
}

/// Validates that the whole of `set` would replay cleanly onto `target`.
///
/// The sequence is rehearsed with the same commands [`apply_patch_set`]
/// runs: `git am` in a detached checkout of a tracked target's HEAD, or
/// ordered `git apply` into a copy of the files an untracked target has at
/// the touched paths. The target itself is never modified.
pub fn check_apply_set(git: &Git, set: &PatchSet, target: &ApplyTarget) -> Result<()> {
    if set.is_empty() {
        return Ok(());
    }
    if target.is_tracked {
        check_with_am(git, set, target)
    } else {
        check_one_by_one(git, set, target)
    }
}

/// Applies per-change artifacts in order, returning how many were applied.
///
/// Tracked targets replay the changes as commits with a three-way apply,
/// keeping author and message. Untracked targets receive each change's
/// content in order. The first failure stops the sequence.
pub fn apply_patch_set(git: &Git, set: &PatchSet, target: &ApplyTarget) -> Result<usize> {
    if set.is_empty() {
        return Ok(0);
    }

    if target.is_tracked {
        apply_with_am(git, set, target)
    } else {
        apply_one_by_one(git, set, target)
    }
}

fn run_am(git: &Git, set: &PatchSet, dir: &Path) -> Result<GitOutput> {
    let mut args: Vec<OsString> = vec!["am".into(), "--3way".into(), "--keep-cr".into()];
    args.extend(set.entries.iter().map(|e| e.path.as_os_str().to_owned()));
    git.run(dir, &args)
}

/// Location of the `git am` session state for the repository at `dir`.
fn am_session_dir(git: &Git, dir: &Path) -> Result<PathBuf> {
    let path = PathBuf::from(git.text(dir, ["rev-parse", "--git-path", "rebase-apply"])?);
    Ok(if path.is_absolute() { path } else { dir.join(path) })
}

/// Conditions `git am` needs before it starts: no session in progress and
/// no staged or unstaged changes to tracked files.
fn ensure_am_ready(git: &Git, target: &ApplyTarget) -> Result<()> {
    if am_session_dir(git, &target.path)?.exists() {
        return Err(Error::ApplyFailed {
            target: target.path.clone(),
            detail: "a git am session is already in progress; finish it with \
                     git am --continue, --skip or --abort"
                .to_string(),
        });
    }

    let status = git.text(&target.path, ["status", "--porcelain", "--untracked-files=no"])?;
    let dirty: Vec<&str> = status
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| l.get(3..).unwrap_or(l).trim())
        .collect();
    if !dirty.is_empty() {
        return Err(Error::ApplyFailed {
            target: target.path.clone(),
            detail: format!(
                "tracked files have uncommitted changes ({}); commit or stash them before \
                 replaying changes",
                dirty.join(", ")
            ),
        });
    }
    Ok(())
}

/// Files the artifact at `patch_file` creates, relative to the target root.
fn created_paths(git: &Git, patch_file: &Path, scratch: &Path) -> Result<Vec<PathBuf>> {
    let summary = git.text(
        scratch,
        [OsStr::new("apply"), OsStr::new("--summary"), patch_file.as_os_str()],
    )?;
    Ok(summary
        .lines()
        .filter_map(|line| line.trim().strip_prefix("create mode "))
        .filter_map(|rest| rest.split_once(' '))
        .map(|(_, path)| PathBuf::from(path))
        .collect())
}

/// Files the artifact at `patch_file` touches, relative to the target root.
fn touched_paths(git: &Git, patch_file: &Path, scratch: &Path) -> Result<Vec<PathBuf>> {
    let out = git.run_ok(
        scratch,
        [OsStr::new("apply"), OsStr::new("--numstat"), OsStr::new("-z"), patch_file.as_os_str()],
    )?;
    Ok(out
        .stdout
        .split(|b| *b == 0)
        .filter_map(|record| {
            let record = String::from_utf8_lossy(record);
            record.splitn(3, '\t').nth(2).map(|p| PathBuf::from(p.trim()))
        })
        .filter(|p| !p.as_os_str().is_empty())
        .collect())
}

/// Untracked files in `target` that an artifact would create. The rehearsal
/// checkout holds only tracked content, so these are looked up directly.
fn ensure_no_untracked_collisions(git: &Git, set: &PatchSet, target: &ApplyTarget) -> Result<()> {
    let shell = ScratchShell::create(git)?;
    for entry in &set.entries {
        for file in created_paths(git, &entry.path, shell.path())? {
            if !target.path.join(&file).exists() {
                continue;
            }
            let tracked = git.run(
                &target.path,
                [
                    OsStr::new("ls-files"),
                    OsStr::new("--error-unmatch"),
                    OsStr::new("--"),
                    file.as_os_str(),
                ],
            )?;
            if !tracked.success() {
                return Err(ApplyConflict::AlreadyExists {
                    file,
                    target: target.path.clone(),
                    detail: format!(
                        "untracked file would be overwritten by {} ({})",
                        entry.commit.short_id(),
                        entry.commit.subject
                    ),
                }
                .into());
            }
        }
    }
    Ok(())
}

fn check_with_am(git: &Git, set: &PatchSet, target: &ApplyTarget) -> Result<()> {
    ensure_am_ready(git, target)?;
    ensure_no_untracked_collisions(git, set, target)?;

    let rehearsal = ScratchWorktree::create(git, &target.path)?;
    let output = run_am(git, set, rehearsal.path())?;
    if output.success() {
        tracing::debug!(target = ?target.path, count = set.len(), "replay check passed");
        return Ok(());
    }

    let text = output.combined_text();
    tracing::info!(
        target = ?target.path,
        failed_at = failed_patch_number(&text).unwrap_or(1),
        "replay check failed"
    );
    Err(classify_apply_failure(&text, &target.path))
}

fn check_one_by_one(git: &Git, set: &PatchSet, target: &ApplyTarget) -> Result<()> {
    let shell = ScratchShell::create(git)?;
    let copy = tempfile::Builder::new()
        .prefix("workcopy-sync-check-")
        .tempdir()?;
    let copy_root = copy.path().canonicalize()?;

    for entry in &set.entries {
        for file in touched_paths(git, &entry.path, shell.path())? {
            let source = target.path.join(&file);
            let dest = copy_root.join(&file);
            if !source.is_file() || dest.exists() {
                continue;
            }
            if let Some(parent) = dest.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::copy(&source, &dest)?;
        }
    }

    for entry in &set.entries {
        git_apply_at(git, &entry.path, &copy_root, false, &target.path, false)?;
    }
    tracing::debug!(target = ?target.path, count = set.len(), "replay check passed");
    Ok(())
}

fn apply_with_am(git: &Git, set: &PatchSet, target: &ApplyTarget) -> Result<usize> {
    ensure_am_ready(git, target)?;

    let output = run_am(git, set, &target.path)?;
    if output.success() {
        tracing::info!(target = ?target.path, count = set.len(), "replayed changes");
        return Ok(set.len());
    }

    let text = output.combined_text();
    let cause = classify_apply_failure(&text, &target.path);
    if !am_session_dir(git, &target.path)?.exists() {
        tracing::warn!(target = ?target.path, "git am refused to start");
        return Err(cause);
    }

    let failed_at = failed_patch_number(&text).unwrap_or(1);
    let subject = set
        .entries
        .get(failed_at.saturating_sub(1))
        .map(|e| format!(" ({})", e.commit.subject))
        .unwrap_or_default();
    tracing::warn!(target = ?target.path, failed_at, "replay stopped at conflict");

    Err(Error::PartialApply {
        target: target.path.clone(),
        failed_at,
        total: set.len(),
        cause: Box::new(cause),
        guidance: format!(
            "{} earlier change(s) were committed to the target; patch {}{} is in progress.\n\
             To recover, run one of these in {}:\n  \
             git am --continue   after fixing the conflict and staging the result\n  \
             git am --skip       to drop this change and continue with the rest\n  \
             git am --abort      to undo the whole batch",
            failed_at.saturating_sub(1),
            failed_at,
            subject,
            target.path.display()
        ),
    })
}

fn apply_one_by_one(git: &Git, set: &PatchSet, target: &ApplyTarget) -> Result<usize> {
    for (index, entry) in set.entries.iter().enumerate() {
        if let Err(cause) = git_apply(git, &entry.path, target, false) {
            tracing::warn!(target = ?target.path, failed_at = index + 1, "apply stopped at conflict");
            return Err(Error::PartialApply {
                target: target.path.clone(),
                failed_at: index + 1,
                total: set.len(),
                cause: Box::new(cause),
                guidance: format!(
                    "{} earlier change(s) were written to {}; change {} ({}) and later ones were not.\n\
                     Fix the conflict and apply the remaining changes again, skip this change by \
                     selecting only the later ones, or restore the directory to abort.",
                    index,
                    target.path.display(),
                    entry.commit.short_id(),
                    entry.commit.subject
                ),
            });
        }
    }
    tracing::info!(target = ?target.path, count = set.len(), "applied changes");
    Ok(set.len())
}

/// Extracts `NNNN` from git's `Patch failed at NNNN <subject>` line.
fn failed_patch_number(output: &str) -> Option<usize> {
    output.lines().find_map(|line| {
        let rest = line.trim().strip_prefix("Patch failed at ")?;
        rest.split_whitespace().next()?.parse().ok()
    })
}

impl Sandboxes {
    /// Combined artifact of the primary working directory.
    pub fn generate_patch(&self, name: &str, paths: &[PathBuf]) -> Result<Patch> {
        generate_patch(self.git(), &self.context(name)?, paths)
    }

    /// Per-change artifacts of the primary working directory.
    pub fn generate_patch_set<S: AsRef<str>>(
        &self,
        name: &str,
        paths: &[PathBuf],
        refs: Option<&[S]>,
    ) -> Result<PatchSet> {
        generate_patch_set(self.git(), &self.context(name)?, paths, refs)
    }
}
