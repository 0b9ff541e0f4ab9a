//! Resolution of short change ids and `start..end` ranges.
//!
//! Every function here is pure: candidates come from the ordered list of
//! changes passed in, never from shared state.

use std::collections::BTreeSet;

use crate::error::{Error, Result};
use crate::history::CommitInfo;

/// Splits `start..end` into its endpoints.
///
/// Returns `Ok(None)` for a single reference and fails when either
/// endpoint is missing.
pub fn parse_range(reference: &str) -> Result<Option<(&str, &str)>> {
    let Some((start, end)) = reference.split_once("..") else {
        return Ok(None);
    };
    let (start, end) = (start.trim(), end.trim());
    if start.is_empty() || end.is_empty() || end.starts_with('.') {
        return Err(Error::InvalidRange(reference.to_string()));
    }
    Ok(Some((start, end)))
}

/// Position of the single change whose id starts with `reference`.
///
/// Matching is a case-insensitive prefix match. More than one match is an
/// error; the caller must supply a longer prefix.
pub fn resolve_index(commits: &[CommitInfo], reference: &str) -> Result<usize> {
    let needle = reference.trim().to_ascii_lowercase();
    if needle.is_empty() {
        return Err(Error::RefNotFound(reference.to_string()));
    }

    let matches: Vec<usize> = commits
        .iter()
        .enumerate()
        .filter(|(_, c)| c.id.to_ascii_lowercase().starts_with(&needle))
        .map(|(i, _)| i)
        .collect();

    match matches.as_slice() {
        [] => Err(Error::RefNotFound(reference.to_string())),
        [index] => Ok(*index),
        _ => Err(Error::Ambiguous {
            reference: reference.to_string(),
            count: matches.len(),
        }),
    }
}

/// The single change whose id starts with `reference`.
pub fn resolve_ref<'a>(commits: &'a [CommitInfo], reference: &str) -> Result<&'a CommitInfo> {
    resolve_index(commits, reference).map(|i| &commits[i])
}

/// Resolves both endpoints of a range and checks their order.
pub fn resolve_range(
    commits: &[CommitInfo],
    expression: &str,
    start: &str,
    end: &str,
) -> Result<(usize, usize)> {
    let start = resolve_index(commits, start)?;
    let end = resolve_index(commits, end)?;
    if start > end {
        return Err(Error::InvalidRange(expression.to_string()));
    }
    Ok((start, end))
}

/// Resolves a mix of single references and ranges.
///
/// Ranges exclude their start and include their end. Overlaps are merged
/// and the result always follows the chronological order of `commits`,
/// whatever order the references were given in.
pub fn resolve_refs<S: AsRef<str>>(commits: &[CommitInfo], refs: &[S]) -> Result<Vec<CommitInfo>> {
    let mut selected = BTreeSet::new();

    for reference in refs {
        let reference = reference.as_ref();
        match parse_range(reference)? {
            Some((start, end)) => {
                let (start, end) = resolve_range(commits, reference, start, end)?;
                selected.extend(start + 1..=end);
            }
            None => {
                selected.insert(resolve_index(commits, reference)?);
            }
        }
    }

    Ok(selected.into_iter().map(|i| commits[i].clone()).collect())
}
