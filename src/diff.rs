//! Diff engine: baseline, uncommitted and per-change differences.

use std::borrow::Cow;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::git::Git;
use crate::history::list_commits;
use crate::refs::{parse_range, resolve_range, resolve_ref};
use crate::sandbox::{SandboxContext, Sandboxes, WorkMode};

/// Output style of a diff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiffFormat {
    /// Full binary-safe patch text.
    #[default]
    Full,
    /// Per-file summary with a totals line.
    Stat,
}

impl DiffFormat {
    fn flag(self) -> &'static str {
        match self {
            DiffFormat::Full => "--binary",
            DiffFormat::Stat => "--stat",
        }
    }
}

/// Options for [`diff`].
#[derive(Debug, Clone, Default)]
pub struct DiffOptions {
    /// Output style.
    pub format: DiffFormat,
    /// Restrict the diff to these paths (relative to the work directory).
    pub paths: Vec<PathBuf>,
    /// Compare against HEAD instead of the baseline (copy mode only).
    pub uncommitted_only: bool,
}

impl DiffOptions {
    /// Summary-only options.
    pub fn stat() -> Self {
        Self {
            format: DiffFormat::Stat,
            ..Self::default()
        }
    }

    /// Restricts the diff to the given paths.
    pub fn with_paths(mut self, paths: Vec<PathBuf>) -> Self {
        self.paths = paths;
        self
    }

    /// Compares against HEAD rather than the baseline.
    pub fn uncommitted(mut self) -> Self {
        self.uncommitted_only = true;
        self
    }
}

/// Normalized result of a diff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffResult {
    /// Raw diff or stat bytes, trailing newlines removed.
    pub output: Vec<u8>,
    /// Directory that was compared.
    pub work_dir: PathBuf,
    /// Workdir model of that directory.
    pub mode: WorkMode,
    /// Explanation when there was nothing to compare against.
    pub note: Option<String>,
}

impl DiffResult {
    fn from_output(ctx: &SandboxContext, raw: &[u8]) -> Self {
        let end = raw
            .iter()
            .rposition(|b| *b != b'\n' && *b != b'\r')
            .map_or(0, |i| i + 1);
        Self {
            output: raw[..end].to_vec(),
            work_dir: ctx.work_dir.clone(),
            mode: ctx.mode,
            note: None,
        }
    }

    /// The output decoded for display. Bytes that are not UTF-8 are replaced.
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.output)
    }

    /// True when there is no difference. Derived from the output length.
    pub fn is_empty(&self) -> bool {
        self.output.is_empty()
    }
}

/// Totals from a stat summary line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffStat {
    pub files_changed: u32,
    pub insertions: u32,
    pub deletions: u32,
}

impl DiffStat {
    /// Parses the totals line of `git diff --stat` output.
    ///
    /// Accepts the full stat text; only the last line is inspected.
    pub fn parse(stat_text: &str) -> Self {
        let mut stat = DiffStat::default();
        let Some(summary) = stat_text.lines().rev().find(|l| !l.trim().is_empty()) else {
            return stat;
        };

        for part in summary.split(',') {
            let mut words = part.split_whitespace();
            let (Some(count), Some(label)) = (words.next(), words.next()) else {
                continue;
            };
            let Ok(count) = count.parse::<u32>() else {
                continue;
            };
            if label.starts_with("file") {
                stat.files_changed = count;
            } else if label.starts_with("insertion") {
                stat.insertions = count;
            } else if label.starts_with("deletion") {
                stat.deletions = count;
            }
        }
        stat
    }
}

/// Raw `git diff` between `from` and the staged work tree of a copy.
pub(crate) fn staged_diff(
    git: &Git,
    work_dir: &Path,
    from: &str,
    format: DiffFormat,
    paths: &[PathBuf],
) -> Result<Vec<u8>> {
    git.stage_all(work_dir)?;
    let mut args: Vec<OsString> = vec!["diff".into(), "--cached".into(), format.flag().into()];
    args.push(from.into());
    push_pathspec(&mut args, paths);
    Ok(git.run_ok(work_dir, &args)?.stdout)
}

/// Raw `git diff` between two commits.
pub(crate) fn commit_range_diff(
    git: &Git,
    work_dir: &Path,
    from: &str,
    to: &str,
    format: DiffFormat,
    paths: &[PathBuf],
) -> Result<Vec<u8>> {
    let mut args: Vec<OsString> = vec!["diff".into(), format.flag().into(), from.into(), to.into()];
    push_pathspec(&mut args, paths);
    Ok(git.run_ok(work_dir, &args)?.stdout)
}

pub(crate) fn push_pathspec(args: &mut Vec<OsString>, paths: &[PathBuf]) {
    if paths.is_empty() {
        return;
    }
    args.push("--".into());
    args.extend(paths.iter().map(|p| p.as_os_str().to_owned()));
}

/// Computes the difference for one directory context.
///
/// Copy mode stages untracked files first so new files show up, then
/// compares the baseline (or HEAD) with the staged tree. Live mode compares
/// HEAD with the live directory and reports an empty result with a note
/// when the directory has no history at all.
pub fn diff(git: &Git, ctx: &SandboxContext, options: &DiffOptions) -> Result<DiffResult> {
    match ctx.mode {
        WorkMode::IsolatedCopy => {
            let from = if options.uncommitted_only {
                "HEAD"
            } else {
                ctx.baseline_ref.as_str()
            };
            let raw = staged_diff(git, &ctx.work_dir, from, options.format, &options.paths)?;
            Ok(DiffResult::from_output(ctx, &raw))
        }
        WorkMode::LiveMounted => {
            if !git.has_history(&ctx.work_dir)? {
                let mut result = DiffResult::from_output(ctx, b"");
                result.note = Some(format!(
                    "{} has no git history, so there is no recorded point to compare against",
                    ctx.work_dir.display()
                ));
                return Ok(result);
            }
            let mut args: Vec<OsString> = vec!["diff".into(), options.format.flag().into()];
            args.push(ctx.baseline_ref.clone().into());
            push_pathspec(&mut args, &options.paths);
            let raw = git.run_ok(&ctx.work_dir, &args)?.stdout;
            Ok(DiffResult::from_output(ctx, &raw))
        }
    }
}

/// Diff of a single change, or of a `start..end` range of changes.
///
/// A single reference yields what that change introduced. A range yields
/// everything after `start` up to and including `end`.
pub fn commit_diff(
    git: &Git,
    ctx: &SandboxContext,
    reference: &str,
    format: DiffFormat,
) -> Result<DiffResult> {
    ctx.require_copy("showing individual changes")?;
    let commits = list_commits(git, ctx)?;

    let (from, to) = match parse_range(reference)? {
        Some((start, end)) => {
            let (start, end) = resolve_range(&commits, reference, start, end)?;
            (commits[start].id.clone(), commits[end].id.clone())
        }
        None => {
            let commit = resolve_ref(&commits, reference)?;
            (format!("{}^", commit.id), commit.id.clone())
        }
    };

    let raw = commit_range_diff(git, &ctx.work_dir, &from, &to, format, &[])?;
    Ok(DiffResult::from_output(ctx, &raw))
}

impl Sandboxes {
    /// Diff of the sandbox's primary working directory.
    pub fn diff(&self, name: &str, options: &DiffOptions) -> Result<DiffResult> {
        diff(self.git(), &self.context(name)?, options)
    }

    /// Diff of one change or range of changes in the primary working directory.
    pub fn commit_diff(&self, name: &str, reference: &str, format: DiffFormat) -> Result<DiffResult> {
        commit_diff(self.git(), &self.context(name)?, reference, format)
    }

    /// Diffs of every directory of the sandbox, primary first.
    pub fn diff_all(&self, name: &str, options: &DiffOptions) -> Result<Vec<DiffResult>> {
        self.contexts(name)?
            .iter()
            .map(|ctx| diff(self.git(), ctx, options))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::testutil::{commit_all, copy_context, init_repo, live_context, write};
    use tempfile::TempDir;

    #[test]
    fn stat_parser_reads_totals_line() {
        let text = " a.txt | 2 +-\n b.bin | Bin 0 -> 4 bytes\n 2 files changed, 1 insertion(+), 1 deletion(-)";
        assert_eq!(
            DiffStat::parse(text),
            DiffStat {
                files_changed: 2,
                insertions: 1,
                deletions: 1
            }
        );
    }

    #[test]
    fn stat_parser_handles_missing_parts() {
        let stat = DiffStat::parse(" 1 file changed, 3 insertions(+)\n");
        assert_eq!(stat.files_changed, 1);
        assert_eq!(stat.insertions, 3);
        assert_eq!(stat.deletions, 0);
        assert_eq!(DiffStat::parse(""), DiffStat::default());
    }

    #[test]
    fn fresh_baseline_has_empty_diff() {
        let dir = TempDir::new().unwrap();
        let git = Git::default();
        let baseline = init_repo(dir.path(), &[("README.md", "# hi\n")]);
        let ctx = copy_context(dir.path(), &baseline);

        let result = diff(&git, &ctx, &DiffOptions::default()).unwrap();
        assert!(result.is_empty());
        assert!(result.output.is_empty());
        assert!(result.note.is_none());
    }

    #[test]
    fn copy_diff_includes_new_untracked_files() {
        let dir = TempDir::new().unwrap();
        let git = Git::default();
        let baseline = init_repo(dir.path(), &[("README.md", "# hi\n")]);
        write(dir.path(), "src/new.rs", "fn main() {}\n");
        let ctx = copy_context(dir.path(), &baseline);

        let result = diff(&git, &ctx, &DiffOptions::default()).unwrap();
        assert!(result.text().contains("src/new.rs"));
        assert!(!result.output.ends_with(b"\n"));
    }

    #[test]
    fn copy_diff_spans_commits_and_uncommitted_work() {
        let dir = TempDir::new().unwrap();
        let git = Git::default();
        let baseline = init_repo(dir.path(), &[("a.txt", "a\n")]);
        write(dir.path(), "b.txt", "b\n");
        commit_all(dir.path(), "add b");
        write(dir.path(), "c.txt", "c\n");
        let ctx = copy_context(dir.path(), &baseline);

        let full = diff(&git, &ctx, &DiffOptions::default()).unwrap();
        assert!(full.text().contains("b.txt"));
        assert!(full.text().contains("c.txt"));

        let wip = diff(&git, &ctx, &DiffOptions::default().uncommitted()).unwrap();
        assert!(!wip.text().contains("b.txt"));
        assert!(wip.text().contains("c.txt"));
    }

    #[test]
    fn path_filter_restricts_output() {
        let dir = TempDir::new().unwrap();
        let git = Git::default();
        let baseline = init_repo(dir.path(), &[("a.txt", "a\n")]);
        write(dir.path(), "keep/x.txt", "x\n");
        write(dir.path(), "skip/y.txt", "y\n");
        let ctx = copy_context(dir.path(), &baseline);

        let options = DiffOptions::default().with_paths(vec![PathBuf::from("keep")]);
        let result = diff(&git, &ctx, &options).unwrap();
        assert!(result.text().contains("keep/x.txt"));
        assert!(!result.text().contains("skip/y.txt"));
    }

    #[test]
    fn stat_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let git = Git::default();
        let baseline = init_repo(dir.path(), &[("a.txt", "a\n")]);
        write(dir.path(), "a.txt", "a\nb\n");
        let ctx = copy_context(dir.path(), &baseline);

        let first = diff(&git, &ctx, &DiffOptions::stat()).unwrap();
        let second = diff(&git, &ctx, &DiffOptions::stat()).unwrap();
        assert_eq!(first, second);
        assert_eq!(DiffStat::parse(&first.text()).insertions, 1);
    }

    #[test]
    fn non_utf8_content_is_kept_byte_for_byte() {
        let dir = TempDir::new().unwrap();
        let git = Git::default();
        let baseline = init_repo(dir.path(), &[("a.txt", "a\n")]);
        std::fs::write(dir.path().join("latin1.txt"), b"caf\xe9\n").unwrap();
        let ctx = copy_context(dir.path(), &baseline);

        let result = diff(&git, &ctx, &DiffOptions::default()).unwrap();
        assert!(result.output.windows(5).any(|w| w == b"+caf\xe9"));
        assert!(result.text().contains("+caf\u{fffd}"));
    }

    #[test]
    fn live_directory_without_history_is_empty_with_note() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "notes.txt", "hello\n");
        let ctx = live_context(dir.path());

        let result = diff(&Git::default(), &ctx, &DiffOptions::default()).unwrap();
        assert!(result.is_empty());
        assert!(result.note.unwrap().contains("no git history"));
    }

    #[test]
    fn live_directory_diffs_against_head() {
        let dir = TempDir::new().unwrap();
        init_repo(dir.path(), &[("a.txt", "one\n")]);
        write(dir.path(), "a.txt", "two\n");
        let ctx = live_context(dir.path());

        let result = diff(&Git::default(), &ctx, &DiffOptions::default()).unwrap();
        assert!(result.text().contains("-one"));
        assert!(result.text().contains("+two"));
    }

    #[test]
    fn commit_diff_shows_single_change_and_range() {
        let dir = TempDir::new().unwrap();
        let git = Git::default();
        let baseline = init_repo(dir.path(), &[("a.txt", "a\n")]);
        write(dir.path(), "one.txt", "1\n");
        let c1 = commit_all(dir.path(), "one");
        write(dir.path(), "two.txt", "2\n");
        commit_all(dir.path(), "two");
        write(dir.path(), "three.txt", "3\n");
        let c3 = commit_all(dir.path(), "three");
        let ctx = copy_context(dir.path(), &baseline);

        let single = commit_diff(&git, &ctx, &c1[..8], DiffFormat::Full).unwrap();
        assert!(single.text().contains("one.txt"));
        assert!(!single.text().contains("two.txt"));

        let range = format!("{}..{}", &c1[..8], &c3[..8]);
        let ranged = commit_diff(&git, &ctx, &range, DiffFormat::Stat).unwrap();
        assert!(!ranged.text().contains("one.txt"));
        assert!(ranged.text().contains("two.txt"));
        assert!(ranged.text().contains("three.txt"));
    }

    #[test]
    fn commit_diff_rejects_live_directories() {
        let dir = TempDir::new().unwrap();
        init_repo(dir.path(), &[("a.txt", "a\n")]);
        let err = commit_diff(&Git::default(), &live_context(dir.path()), "abc", DiffFormat::Full)
            .unwrap_err();
        assert!(matches!(err, Error::UnsupportedMode(_)));
    }
}
