//! Patch generation across every directory a sandbox owns.

use std::path::PathBuf;

use crate::error::Result;
use crate::patch::{generate_patch, Patch};
use crate::sandbox::{Sandboxes, WorkMode};

/// Pending changes of one isolated work copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetPatch {
    /// Original host directory the changes belong to.
    pub host_path: PathBuf,
    /// Workdir model (always an isolated copy).
    pub mode: WorkMode,
    /// Combined artifact of the copy's changes.
    pub patch: Patch,
}

impl Sandboxes {
    /// Combined artifacts for every isolated copy of a sandbox that has changes.
    ///
    /// Live-mounted directories are skipped since their changes already sit
    /// at the target. Directories are processed one at a time and the first
    /// failure aborts the whole operation.
    pub fn generate_all_targets(&self, name: &str, paths: &[PathBuf]) -> Result<Vec<TargetPatch>> {
        let mut out = Vec::new();
        for ctx in self.contexts(name)? {
            if !ctx.is_copy() {
                tracing::debug!(path = ?ctx.host_path, "skipping live-mounted directory");
                continue;
            }
            let patch = generate_patch(self.git(), &ctx, paths)?;
            if patch.is_empty() {
                tracing::debug!(path = ?ctx.host_path, "no changes");
                continue;
            }
            out.push(TargetPatch {
                host_path: ctx.host_path,
                mode: ctx.mode,
                patch,
            });
        }
        Ok(out)
    }
}
