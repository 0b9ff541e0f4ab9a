//! Classification of failed patch applications.
//!
//! Turns the raw output of a failed apply into a structured error naming
//! the file and target. The underlying message is always kept.

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::error::Error;

/// A recognized reason an artifact did not apply.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApplyConflict {
    /// Target content differs from what the artifact expects.
    #[error(
        "conflict in {}{} at {}: the file was changed after the baseline was taken\n{detail}",
        file.display(),
        line.map(|l| format!(" line {}", l)).unwrap_or_default(),
        target.display()
    )]
    ContentMismatch {
        file: PathBuf,
        line: Option<u32>,
        target: PathBuf,
        detail: String,
    },

    /// The artifact changes or removes a file the target does not have.
    #[error(
        "{} does not exist in {}: it was removed or moved after the baseline was taken\n{detail}",
        file.display(),
        target.display()
    )]
    MissingFile {
        file: PathBuf,
        target: PathBuf,
        detail: String,
    },

    /// The artifact creates a file the target already has.
    #[error(
        "{} already exists in {} with different content\n{detail}",
        file.display(),
        target.display()
    )]
    AlreadyExists {
        file: PathBuf,
        target: PathBuf,
        detail: String,
    },
}

impl ApplyConflict {
    /// The file the conflict is about.
    pub fn file(&self) -> &Path {
        match self {
            ApplyConflict::ContentMismatch { file, .. }
            | ApplyConflict::MissingFile { file, .. }
            | ApplyConflict::AlreadyExists { file, .. } => file,
        }
    }
}

/// Classifies the output of a failed apply against `target`.
///
/// Patterns are checked in priority order: content mismatch, missing file,
/// creation collision. Anything else becomes [`Error::ApplyFailed`].
pub fn classify_apply_failure(output: &str, target: &Path) -> Error {
    let detail = output.trim().to_string();

    if let Some((file, line)) = find_content_mismatch(output) {
        return ApplyConflict::ContentMismatch {
            file: relative_to(file, target),
            line,
            target: target.to_path_buf(),
            detail,
        }
        .into();
    }

    if let Some(file) = find_error_file(output, &[": does not exist in index", ": No such file or directory"]) {
        return ApplyConflict::MissingFile {
            file: relative_to(file, target),
            target: target.to_path_buf(),
            detail,
        }
        .into();
    }

    if let Some(file) = find_error_file(
        output,
        &[": already exists in working directory", ": already exists in index"],
    ) {
        return ApplyConflict::AlreadyExists {
            file: relative_to(file, target),
            target: target.to_path_buf(),
            detail,
        }
        .into();
    }

    Error::ApplyFailed {
        target: target.to_path_buf(),
        detail: if detail.is_empty() {
            "no output from git".to_string()
        } else {
            detail
        },
    }
}

/// Finds `patch failed: <file>:<line>` or a three-way merge conflict marker.
fn find_content_mismatch(output: &str) -> Option<(&str, Option<u32>)> {
    for line in output.lines() {
        if let Some(rest) = line.split_once("patch failed: ").map(|(_, r)| r.trim()) {
            return Some(match rest.rsplit_once(':') {
                Some((file, number)) => match number.trim().parse::<u32>() {
                    Ok(n) => (file, Some(n)),
                    Err(_) => (rest, None),
                },
                None => (rest, None),
            });
        }
    }

    output.lines().find_map(|line| {
        line.strip_prefix("CONFLICT (content): Merge conflict in ")
            .map(|file| (file.trim(), None))
    })
}

/// Finds `error: <file><suffix>` for the first matching suffix.
fn find_error_file<'a>(output: &'a str, suffixes: &[&str]) -> Option<&'a str> {
    output.lines().find_map(|line| {
        let body = line.trim().strip_prefix("error: ")?;
        suffixes
            .iter()
            .find_map(|suffix| body.strip_suffix(suffix))
            .map(str::trim)
    })
}

/// Strips the target prefix that relocated applies put in front of paths.
fn relative_to(file: &str, target: &Path) -> PathBuf {
    let path = Path::new(file);
    path.strip_prefix(target)
        .map(Path::to_path_buf)
        .unwrap_or_else(|_| path.to_path_buf())
}
