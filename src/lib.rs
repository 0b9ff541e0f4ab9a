//! Workcopy Sync - change tracking and selective replay for sandbox work copies
//!
//! A sandbox holds an isolated copy (or a live mount) of one or more host
//! directories. This library reports what changed inside a sandbox since its
//! baseline, turns those changes into git patch artifacts, replays them onto
//! a target directory, and moves the baseline forward once they have landed.

pub mod backoff;
pub mod baseline;
pub mod config;
pub mod conflict;
pub mod diff;
pub mod error;
pub mod fanout;
pub mod git;
pub mod history;
pub mod patch;
pub mod reconcile;
pub mod refs;
pub mod sandbox;
pub mod target;

#[cfg(test)]
mod testutil;

pub use baseline::{contiguous_prefix_end, record_baseline, snapshot_uncommitted};
pub use config::{Config, Validate, ValidationResult};
pub use conflict::{classify_apply_failure, ApplyConflict};
pub use diff::{DiffFormat, DiffOptions, DiffResult, DiffStat};
pub use error::{Error, Result};
pub use fanout::TargetPatch;
pub use git::{CancelToken, Git, GitOutput};
pub use history::{CommitInfo, CommitWithStat};
pub use patch::{Patch, PatchEntry, PatchSet};
pub use reconcile::{ApplyOptions, ApplyOutcome};
pub use sandbox::{DirMeta, SandboxContext, SandboxLayout, SandboxMeta, Sandboxes, WorkMode};
pub use target::ApplyTarget;
