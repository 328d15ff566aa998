//! Deriving tag names from mailbox paths.

use once_cell::sync::Lazy;
use regex::Regex;

use super::TagStore;
use crate::Result;

/// Path segments that say nothing about the mailbox itself.
#[allow(clippy::unwrap_used)] // Pattern is a literal
static BORING_FOLDER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(home|mail|data|user\S*|[^a-z]+)$").unwrap());

/// Convert a mailbox path into a tag name.
///
/// `/home/bre/Mail/work-stuff.mbox` becomes `work stuff`. When a tag with
/// the bare name already exists, the nearest interesting parent folder is
/// prepended (`bre/work stuff`).
///
/// # Errors
///
/// Returns an error if the tag store lookup fails.
pub async fn path_to_tag_name(path: &str, tags: &dyn TagStore) -> Result<String> {
    let path = path.replace("/.", "/");
    let separator = if path.contains('/') { '/' } else { '\\' };
    let mut parts: Vec<&str> = path
        .split(separator)
        .filter(|p| !p.is_empty() && !BORING_FOLDER_RE.is_match(p))
        .collect();

    let Some(last) = parts.pop() else {
        return Ok(fallback_name(&path).replace(['-', '_'], " "));
    };
    let mut name = match last.split('.').next() {
        Some(stem) if !stem.is_empty() => stem.to_string(),
        _ => last.to_string(),
    };

    if !tags.find(&name).await?.is_empty() {
        if let Some(parent) = parts.last() {
            name = format!("{parent}/{name}");
        }
    }
    Ok(name.replace(['-', '_'], " "))
}

/// Append ` (2)`, ` (3)`, ... until the name is unused.
///
/// # Errors
///
/// Returns an error if the tag store lookup fails.
pub async fn unique_tag_name(name: &str, tags: &dyn TagStore) -> Result<String> {
    let mut candidate = name.to_string();
    let mut count = 2;
    while !tags.find(&candidate).await?.is_empty() {
        candidate = format!("{name} ({count})");
        count += 1;
    }
    Ok(candidate)
}

/// Convert a path to a tag name nobody uses yet.
///
/// # Errors
///
/// Returns an error if the tag store lookup fails.
pub async fn create_tag_name(path: &str, tags: &dyn TagStore) -> Result<String> {
    let name = path_to_tag_name(path, tags).await?;
    unique_tag_name(&name, tags).await
}

fn fallback_name(path: &str) -> String {
    path.trim_matches(['/', '\\'])
        .rsplit(['/', '\\'])
        .next()
        .filter(|s| !s.is_empty())
        .unwrap_or("Mailbox")
        .to_string()
}
