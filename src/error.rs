//! Error types for workcopy-sync.
//!
//! Every variant renders as a message that can be shown to a person as-is.

use std::path::PathBuf;
use thiserror::Error;

use crate::conflict::ApplyConflict;

/// Top-level error type for change-tracking and replay operations.
#[derive(Error, Debug)]
pub enum Error {
    /// The named sandbox has no directory or metadata.
    #[error("sandbox not found: {0}")]
    SandboxNotFound(String),

    /// A change reference matched nothing beyond the baseline.
    #[error("no change matching '{0}' found beyond the baseline")]
    RefNotFound(String),

    /// A change reference prefix matched more than one change.
    #[error("ambiguous reference '{reference}': matches {count} changes, use a longer prefix")]
    Ambiguous { reference: String, count: usize },

    /// A range whose start comes after its end.
    #[error("invalid range '{0}': start comes after end")]
    InvalidRange(String),

    /// Unknown workdir mode, or an operation the mode does not support.
    #[error("unsupported mode: {0}")]
    UnsupportedMode(String),

    /// Copy-mode metadata without a recorded baseline.
    #[error(
        "sandbox {0} has no baseline recorded; it was created before baseline tracking and must be recreated"
    )]
    MissingBaseline(String),

    /// A classified apply conflict.
    #[error(transparent)]
    Conflict(#[from] ApplyConflict),

    /// An apply failure that matched no known conflict pattern.
    #[error("failed to apply changes to {}: {detail}", target.display())]
    ApplyFailed { target: PathBuf, detail: String },

    /// A sequence of per-change artifacts stopped part way.
    #[error(
        "applying changes to {} stopped at patch {failed_at} of {total}: {cause}\n{guidance}",
        target.display()
    )]
    PartialApply {
        target: PathBuf,
        failed_at: usize,
        total: usize,
        cause: Box<Error>,
        guidance: String,
    },

    /// The git capability itself failed.
    #[error("git operation failed: {0}")]
    Git(String),

    /// A git invocation was cancelled by the caller.
    #[error("git operation cancelled: {0}")]
    Cancelled(String),

    /// A git invocation ran past its deadline.
    #[error("git operation timed out after {seconds}s: {command}")]
    TimedOut { command: String, seconds: u64 },

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Sandbox metadata could not be read or written.
    #[error("invalid sandbox metadata: {0}")]
    Metadata(#[from] serde_json::Error),
}

/// Result type alias for workcopy-sync operations.
pub type Result<T> = std::result::Result<T, Error>;
