//! End-to-end flows that replay a sandbox's changes onto a target and move
//! its baseline forward.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::baseline::{contiguous_prefix_end, snapshot_uncommitted};
use crate::error::Result;
use crate::history::{has_uncommitted_changes, list_commits};
use crate::patch::{
    apply_patch, apply_patch_set, check_apply, check_apply_set, generate_patch, generate_patch_set,
};
use crate::sandbox::{SandboxContext, Sandboxes};
use crate::target::ApplyTarget;

/// Options shared by the apply flows.
#[derive(Debug, Clone, Default)]
pub struct ApplyOptions {
    /// Apply somewhere other than the original host directory.
    pub target: Option<PathBuf>,
    /// Only apply changes under these paths. The baseline is left alone.
    pub paths: Vec<PathBuf>,
    /// Validate without touching the target or the baseline.
    pub check_only: bool,
}

/// What happened when changes were applied to one target.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ApplyOutcome {
    /// Host directory the changes came from.
    pub host_path: PathBuf,
    /// Directory the changes were applied to.
    pub target: PathBuf,
    /// Number of changes replayed, or 1 for a combined patch.
    pub applied: usize,
    /// Stat summary of what was applied.
    pub stat: String,
    /// New baseline, when it moved.
    pub baseline: Option<String>,
    /// True when the work copy still holds uncommitted work that was not applied.
    pub uncommitted_left: bool,
    /// True when only a check was performed.
    pub checked_only: bool,
}

fn detect_target(sandboxes: &Sandboxes, ctx: &SandboxContext, explicit: Option<&Path>) -> Result<ApplyTarget> {
    ApplyTarget::detect(sandboxes.git(), explicit.unwrap_or(&ctx.host_path))
}

impl Sandboxes {
    /// Applies everything since the baseline as one combined patch.
    pub fn apply_squash(&self, name: &str, options: &ApplyOptions) -> Result<ApplyOutcome> {
        let ctx = self.context(name)?;
        self.apply_squash_dir(&ctx, options)
    }

    /// Combined-patch apply for one directory of a sandbox.
    ///
    /// After a full apply, uncommitted work in the copy is committed and the
    /// baseline moves to HEAD, so the applied work is not offered again.
    pub fn apply_squash_dir(&self, ctx: &SandboxContext, options: &ApplyOptions) -> Result<ApplyOutcome> {
        ctx.require_copy("apply")?;
        let git = self.git();
        let target = detect_target(self, ctx, options.target.as_deref())?;
        let patch = generate_patch(git, ctx, &options.paths)?;

        let mut outcome = ApplyOutcome {
            host_path: ctx.host_path.clone(),
            target: target.path.clone(),
            stat: patch.stat.clone(),
            checked_only: options.check_only,
            ..ApplyOutcome::default()
        };

        if patch.is_empty() {
            tracing::info!(sandbox = %ctx.name, path = ?ctx.host_path, "nothing to apply");
            return Ok(outcome);
        }

        check_apply(git, &patch, &target)?;
        if options.check_only {
            return Ok(outcome);
        }

        apply_patch(git, &patch, &target)?;
        outcome.applied = 1;

        if options.paths.is_empty() {
            snapshot_uncommitted(git, ctx)?;
            outcome.baseline = self.advance_dir_to_head(ctx)?;
        } else {
            tracing::info!(sandbox = %ctx.name, "path-filtered apply leaves the baseline in place");
        }

        Ok(outcome)
    }

    /// Replays changes one by one, keeping their authorship.
    ///
    /// With `refs`, only the selected changes are replayed and the baseline
    /// advances to the end of the unbroken applied run from the oldest
    /// change. Uncommitted work is never included. The whole sequence is
    /// rehearsed before the target is touched, so a failed check leaves the
    /// target and baseline unchanged.
    pub fn apply_commits<S: AsRef<str>>(
        &self,
        name: &str,
        options: &ApplyOptions,
        refs: Option<&[S]>,
    ) -> Result<ApplyOutcome> {
        let ctx = self.context(name)?;
        ctx.require_copy("apply")?;
        let git = self.git();
        let target = detect_target(self, &ctx, options.target.as_deref())?;

        let all = list_commits(git, &ctx)?;
        let set = generate_patch_set(git, &ctx, &options.paths, refs)?;
        let stat = set
            .commits()
            .iter()
            .map(|c| format!("{} {}", c.short_id(), c.subject))
            .collect::<Vec<_>>()
            .join("\n");

        let mut outcome = ApplyOutcome {
            host_path: ctx.host_path.clone(),
            target: target.path.clone(),
            stat,
            checked_only: options.check_only,
            uncommitted_left: has_uncommitted_changes(git, &ctx)?,
            ..ApplyOutcome::default()
        };

        if set.is_empty() {
            return Ok(outcome);
        }
        check_apply_set(git, &set, &target)?;
        if options.check_only {
            return Ok(outcome);
        }

        outcome.applied = apply_patch_set(git, &set, &target)?;

        if options.paths.is_empty() {
            let applied: HashSet<String> = set.commits().into_iter().map(|c| c.id).collect();
            match contiguous_prefix_end(&all, &applied) {
                Some(end) => {
                    outcome.baseline = Some(self.advance_dir_to(&ctx, &all[end].id)?);
                }
                None => tracing::info!(
                    sandbox = %ctx.name,
                    "oldest change was not applied, baseline stays in place"
                ),
            }
        }

        Ok(outcome)
    }

    /// Applies pending changes of every isolated copy to its host directory.
    ///
    /// Targets are handled strictly one after another and the first failure
    /// stops the run; earlier targets keep their applied state and baseline.
    pub fn apply_all_targets(&self, name: &str, paths: &[PathBuf], check_only: bool) -> Result<Vec<ApplyOutcome>> {
        let options = ApplyOptions {
            target: None,
            paths: paths.to_vec(),
            check_only,
        };
        let mut outcomes = Vec::new();
        for ctx in self.contexts(name)? {
            if !ctx.is_copy() {
                tracing::debug!(path = ?ctx.host_path, "skipping live-mounted directory");
                continue;
            }
            outcomes.push(self.apply_squash_dir(&ctx, &options)?);
        }
        Ok(outcomes)
    }
}
