//! Server path (`$/...`) format helpers.
//!
//! Server paths and local paths are disjoint formats; [`is_server_path`]
//! sniffs the kind before any format-specific operation. Server path
//! comparison is always case-insensitive and ordinal, regardless of the
//! local platform.

use crate::core::error::{Result, WorkspaceTrackerError};
use crate::core::wildcard;
use std::cmp::Ordering;

/// The server path root.
pub const ROOT: &str = "$/";

/// The separator used in server paths on every platform.
pub const SEPARATOR: char = '/';

/// Maximum length, in characters, of a canonicalized server path.
pub const MAX_SERVER_PATH_SIZE: usize = 259;

/// True if the given string is in server path format (`$/...`).
pub fn is_server_path(path: &str) -> bool {
    path.starts_with("$/") || path.starts_with("$\\")
}

#[inline]
fn fold(c: char) -> char {
    c.to_ascii_uppercase()
}

/// Canonicalizes a server path: normalizes separators, removes `.`/`..` and
/// empty segments, and enforces the length limit and the `$`-prefix and
/// no-wildcard rules for components below the root.
pub fn canonicalize(path: &str) -> Result<String> {
    if !is_server_path(path) {
        return Err(WorkspaceTrackerError::invalid_path(
            path,
            "not a server path (must start with $/)",
        ));
    }

    let mut parts: Vec<&str> = Vec::new();
    for part in path[1..].split(['/', '\\']) {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => {
                if other.starts_with('$') {
                    return Err(WorkspaceTrackerError::IllegalDollarInPath {
                        path: path.to_string(),
                    });
                }
                if wildcard::is_wildcard(other) {
                    return Err(WorkspaceTrackerError::UnexpectedWildcard {
                        path: path.to_string(),
                    });
                }
                parts.push(other);
            }
        }
    }

    let canonical = if parts.is_empty() {
        ROOT.to_string()
    } else {
        format!("$/{}", parts.join("/"))
    };

    if canonical.chars().count() > MAX_SERVER_PATH_SIZE {
        return Err(WorkspaceTrackerError::path_too_long(
            canonical,
            MAX_SERVER_PATH_SIZE,
        ));
    }

    Ok(canonical)
}

/// Case-insensitive ordinal comparison of two server paths.
pub fn compare(a: &str, b: &str) -> Ordering {
    let mut ia = a.chars().map(fold);
    let mut ib = b.chars().map(fold);
    loop {
        match (ia.next(), ib.next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(ca), Some(cb)) => {
                if ca != cb {
                    return ca.cmp(&cb);
                }
            }
        }
    }
}

/// True if the two server paths are equal (case-insensitive).
pub fn equals(a: &str, b: &str) -> bool {
    compare(a, b) == Ordering::Equal
}

/// True if `possible_child` equals `parent` or resides beneath it.
pub fn is_child(parent: &str, possible_child: &str) -> bool {
    let parent = parent.trim_end_matches(SEPARATOR);
    let pl = parent.chars().count();
    let cl = possible_child.chars().count();

    if cl < pl {
        return false;
    }

    let prefix: String = possible_child.chars().take(pl).collect();
    if !equals(parent, &prefix) {
        return false;
    }

    cl == pl
        || possible_child
            .chars()
            .nth(pl)
            .map(|c| c == SEPARATOR)
            .unwrap_or(false)
}

/// Joins a server directory path and a relative part.
pub fn combine(parent: &str, relative: &str) -> String {
    let trimmed = parent.trim_end_matches(SEPARATOR);
    let rel = relative.trim_start_matches(SEPARATOR);
    if rel.is_empty() {
        return parent.to_string();
    }
    if trimmed == "$" {
        return format!("$/{}", rel);
    }
    format!("{}/{}", trimmed, rel)
}

/// Returns the parent of a server path, or `None` at the root.
pub fn get_parent(path: &str) -> Option<String> {
    if equals(path, ROOT) || path == "$" {
        return None;
    }

    match path.rfind(SEPARATOR) {
        Some(1) => Some(ROOT.to_string()),
        Some(idx) => Some(path[..idx].to_string()),
        None => None,
    }
}

/// Returns the final path component of a server path.
pub fn get_file_name(path: &str) -> &str {
    match path.rfind(SEPARATOR) {
        Some(idx) => &path[idx + 1..],
        None => path,
    }
}

/// True if the server item sits directly in the root (`$/item`). Candidate
/// adds are never allowed there.
pub fn is_direct_child_of_root(path: &str) -> bool {
    match path.rfind(SEPARATOR) {
        Some(idx) => idx <= 1,
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_server_path() {
        assert!(is_server_path("$/proj/file.txt"));
        assert!(!is_server_path("/local/file.txt"));
        assert!(!is_server_path("proj/file.txt"));
    }

    #[test]
    fn test_canonicalize() {
        assert_eq!(canonicalize("$/a/./b/../c").unwrap(), "$/a/c");
        assert_eq!(canonicalize("$/").unwrap(), "$/");
        assert_eq!(canonicalize("$\\a\\b").unwrap(), "$/a/b");
    }

    #[test]
    fn test_canonicalize_rejects_dollar_component() {
        assert!(canonicalize("$/a/$b").is_err());
    }

    #[test]
    fn test_canonicalize_rejects_wildcard_component() {
        assert!(matches!(
            canonicalize("$/a/*.obj"),
            Err(WorkspaceTrackerError::UnexpectedWildcard { .. })
        ));
        assert!(matches!(
            canonicalize("$/a/b?/c"),
            Err(WorkspaceTrackerError::UnexpectedWildcard { .. })
        ));
    }

    #[test]
    fn test_equals_is_case_insensitive() {
        assert!(equals("$/Proj/File.TXT", "$/proj/file.txt"));
    }

    #[test]
    fn test_is_child() {
        assert!(is_child("$/a", "$/a/b/c"));
        assert!(is_child("$/", "$/a"));
        assert!(!is_child("$/a", "$/ab"));
    }

    #[test]
    fn test_combine_and_parent() {
        assert_eq!(combine("$/a", "b/c"), "$/a/b/c");
        assert_eq!(combine("$/", "b"), "$/b");
        assert_eq!(get_parent("$/a/b").unwrap(), "$/a");
        assert_eq!(get_parent("$/a").unwrap(), "$/");
        assert!(get_parent("$/").is_none());
    }

    #[test]
    fn test_is_direct_child_of_root() {
        assert!(is_direct_child_of_root("$/file.txt"));
        assert!(!is_direct_child_of_root("$/proj/file.txt"));
    }
}
