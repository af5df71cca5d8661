//! Local (on-disk) path canonicalization, comparison and hierarchy helpers.
//!
//! Every other component reasons about local paths at the string level, so
//! the contracts here are deliberately strict: comparisons are ordinal (never
//! locale-sensitive) to guarantee identical behavior across machines, case
//! sensitivity follows the platform constant, and canonicalization enforces
//! the maximum path length up front so oversized paths fail fast with a
//! format error instead of failing deep inside a scan.
//!
//! # Public API
//! - [`canonicalize`]: absolute, dot-free, length-checked path form
//! - [`compare`] / [`equals`]: ordinal comparison honoring platform case rules
//! - [`is_child`] / [`is_direct_child`] / [`get_parent`] / [`combine`]
//! - [`get_folder_depth`] / [`get_common_path_prefix`]: stack arithmetic used
//!   by the ignore evaluator

use crate::core::error::{Result, WorkspaceTrackerError};
use std::cmp::Ordering;
use std::path::MAIN_SEPARATOR;

/// Maximum length, in characters, of a canonicalized local path.
pub const MAX_LOCAL_PATH_SIZE: usize = 259;

/// Whether local path comparison is case-sensitive on this platform.
pub const CASE_SENSITIVE: bool = cfg!(not(any(windows, target_os = "macos")));

/// True if `c` is a path separator on this platform.
#[inline]
pub fn is_separator(c: char) -> bool {
    c == MAIN_SEPARATOR || (cfg!(windows) && c == '/')
}

/// Ordinal case fold for path comparison. Invariant (not locale-sensitive):
/// uses the simple single-character uppercase mapping only.
#[inline]
fn fold(c: char) -> char {
    if CASE_SENSITIVE {
        c
    } else {
        c.to_ascii_uppercase()
    }
}

/// Expands a leading `~` to the current user's home directory (Unix only).
/// Paths that do not start with `~`, and `~user` forms, are returned as-is.
pub fn expand_tilde(path: &str) -> String {
    if !cfg!(unix) || !path.starts_with('~') {
        return path.to_string();
    }

    // Only bare "~" and "~/..." are expanded; "~user" needs an account
    // database lookup and is passed through untouched.
    let rest = &path[1..];
    if !rest.is_empty() && !rest.starts_with(MAIN_SEPARATOR) {
        return path.to_string();
    }

    match dirs::home_dir() {
        Some(home) => format!("{}{}", home.display(), rest),
        None => path.to_string(),
    }
}

/// Gets the canonical form of the given local path.
///
/// Expands `~` (Unix), makes the path absolute against the current working
/// directory, removes `.` and `..` segments lexically, strips trailing
/// separators, and enforces [`MAX_LOCAL_PATH_SIZE`] and character rules.
///
/// The result never ends with a separator, except for the filesystem root
/// itself.
pub fn canonicalize(path: &str) -> Result<String> {
    if path.is_empty() {
        return Err(WorkspaceTrackerError::invalid_path(path, "path is empty"));
    }

    if path.contains('\u{0}') {
        return Err(WorkspaceTrackerError::invalid_path(
            path,
            "path contains a NUL character",
        ));
    }

    let expanded = expand_tilde(path);

    let absolute = if expanded.starts_with(MAIN_SEPARATOR) || is_rooted(&expanded) {
        expanded
    } else {
        let cwd = std::env::current_dir()?;
        format!("{}{}{}", cwd.display(), MAIN_SEPARATOR, expanded)
    };

    // Lexical dot-segment removal. ".." never pops past the root.
    let mut parts: Vec<&str> = Vec::new();
    for part in absolute.split(is_separator) {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }

    let mut canonical = String::with_capacity(absolute.len());
    if parts.is_empty() {
        canonical.push(MAIN_SEPARATOR);
    } else {
        for part in &parts {
            canonical.push(MAIN_SEPARATOR);
            canonical.push_str(part);
        }
    }

    if canonical.chars().count() > MAX_LOCAL_PATH_SIZE {
        return Err(WorkspaceTrackerError::path_too_long(
            canonical,
            MAX_LOCAL_PATH_SIZE,
        ));
    }

    check_for_illegal_dollar(&canonical)?;

    Ok(canonical)
}

/// True if the path is rooted (absolute). On Unix this means it starts with
/// the separator.
pub fn is_rooted(path: &str) -> bool {
    path.starts_with(MAIN_SEPARATOR)
        || (cfg!(windows)
            && path.len() >= 2
            && path.as_bytes()[1] == b':'
            && path.as_bytes()[0].is_ascii_alphabetic())
}

/// Returns the root portion of a rooted path (e.g. `/` on Unix, `C:\` on
/// Windows). Used by the baseline folder to derive its disk partition tag.
pub fn get_path_root(path: &str) -> Result<String> {
    if !is_rooted(path) {
        return Err(WorkspaceTrackerError::invalid_path(
            path,
            "path is not rooted",
        ));
    }

    if cfg!(windows) && path.len() >= 2 && path.as_bytes()[1] == b':' {
        return Ok(format!("{}{}", &path[..2], MAIN_SEPARATOR));
    }

    Ok(MAIN_SEPARATOR.to_string())
}

/// Rejects any path component beginning with `$` (reserved prefix).
pub fn check_for_illegal_dollar(path: &str) -> Result<()> {
    let chars: Vec<char> = path.chars().collect();
    for (i, &c) in chars.iter().enumerate() {
        if c == '$' && (i == 0 || is_separator(chars[i - 1])) {
            return Err(WorkspaceTrackerError::IllegalDollarInPath {
                path: path.to_string(),
            });
        }
    }
    Ok(())
}

/// Ordinal comparison of two local paths, honoring platform case rules.
pub fn compare(a: &str, b: &str) -> Ordering {
    let mut ia = a.chars();
    let mut ib = b.chars();
    loop {
        match (ia.next(), ib.next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(ca), Some(cb)) => {
                let (fa, fb) = (fold(ca), fold(cb));
                if fa != fb {
                    return fa.cmp(&fb);
                }
            }
        }
    }
}

/// True if the two local paths are equal under platform case rules.
pub fn equals(a: &str, b: &str) -> bool {
    compare(a, b) == Ordering::Equal
}

/// Top-down ordering: parents sort before their children, and separators
/// sort before any other character so siblings group correctly.
pub fn compare_top_down(a: &str, b: &str) -> Ordering {
    let mut ia = a.chars();
    let mut ib = b.chars();
    loop {
        match (ia.next(), ib.next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(ca), Some(cb)) => {
                let (fa, fb) = (fold(ca), fold(cb));
                if fa != fb {
                    let sa = is_separator(fa);
                    let sb = is_separator(fb);
                    if sa != sb {
                        return if sa { Ordering::Less } else { Ordering::Greater };
                    }
                    return fa.cmp(&fb);
                }
            }
        }
    }
}

/// True if `possible_child` is `parent` itself or resides anywhere beneath
/// it. Both paths must be canonical (no trailing separators except root).
pub fn is_child(parent: &str, possible_child: &str) -> bool {
    let pc = possible_child.chars().count();
    let pl = parent.chars().count();

    if pc < pl {
        return false;
    }

    let prefix: String = possible_child.chars().take(pl).collect();
    if !equals(parent, &prefix) {
        return false;
    }

    if pc == pl {
        return true;
    }

    // Boundary check: either the parent ends with a separator (root) or the
    // next character of the child is one.
    parent.ends_with(MAIN_SEPARATOR)
        || possible_child
            .chars()
            .nth(pl)
            .map(is_separator)
            .unwrap_or(false)
}

/// True if `possible_child` is an immediate child of `parent`.
pub fn is_direct_child(parent: &str, possible_child: &str) -> bool {
    match get_parent(possible_child) {
        Some(p) => equals(&p, parent),
        None => false,
    }
}

/// Returns the parent directory of a canonical path, or `None` at the root.
pub fn get_parent(path: &str) -> Option<String> {
    if path.len() <= 1 {
        return None;
    }

    match path.rfind(is_separator) {
        Some(0) => Some(MAIN_SEPARATOR.to_string()),
        Some(idx) => Some(path[..idx].to_string()),
        None => None,
    }
}

/// Returns the final path component.
pub fn get_file_name(path: &str) -> &str {
    match path.rfind(is_separator) {
        Some(idx) => &path[idx + 1..],
        None => path,
    }
}

/// Joins a directory and a relative name with the platform separator.
pub fn combine(directory: &str, name: &str) -> String {
    if directory.ends_with(MAIN_SEPARATOR) {
        format!("{}{}", directory, name)
    } else {
        format!("{}{}{}", directory, MAIN_SEPARATOR, name)
    }
}

/// Number of directory levels below the root. The root itself is depth 0.
pub fn get_folder_depth(path: &str) -> usize {
    if path.len() <= 1 {
        return 0;
    }
    path.chars().filter(|&c| is_separator(c)).count()
}

/// Longest common ancestor directory of two canonical paths, or `None` if
/// they share only the filesystem root and neither is the root.
pub fn get_common_path_prefix(a: &str, b: &str) -> Option<String> {
    let pa: Vec<&str> = a.split(is_separator).filter(|p| !p.is_empty()).collect();
    let pb: Vec<&str> = b.split(is_separator).filter(|p| !p.is_empty()).collect();

    let mut common = String::new();
    for (x, y) in pa.iter().zip(pb.iter()) {
        if !equals(x, y) {
            break;
        }
        common.push(MAIN_SEPARATOR);
        common.push_str(x);
    }

    if common.is_empty() {
        if a.len() == 1 || b.len() == 1 {
            return Some(MAIN_SEPARATOR.to_string());
        }
        return None;
    }

    Some(common)
}
