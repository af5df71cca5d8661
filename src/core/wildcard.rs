//! Wildcard (`*`, `?`) matching for path components.
//!
//! Matching is always case-insensitive and ordinal, and tolerates the
//! trailing-dot/no-trailing-dot filename equivalence: a filename with no
//! extension matches a pattern ending in `.` the same as without it.

use crate::core::local_path;

/// True if the string contains a wildcard character.
pub fn is_wildcard(s: &str) -> bool {
    s.contains('*') || s.contains('?')
}

/// True if the final component of a local path contains wildcards.
/// Wildcards in intermediate directories are ignored.
pub fn is_wildcard_final_component(local_path: &str) -> bool {
    is_wildcard(local_path::get_file_name(local_path))
}

#[inline]
fn eq_ci(a: char, b: char) -> bool {
    a == b || a.to_ascii_uppercase() == b.to_ascii_uppercase()
}

fn last_dot(chars: &[char]) -> Option<usize> {
    chars.iter().rposition(|&c| c == '.')
}

/// Tests a file name (not a full path) against a wildcard pattern.
///
/// Character case is ignored. The trailing-period equivalence matches the
/// behavior of the platform shell: `foo` matches `foo.` and `*.` just as it
/// matches `foo` and `*`.
pub fn matches_wildcard_file(file_name: &str, wildcard_pattern: &str) -> bool {
    let name: Vec<char> = file_name.chars().collect();
    let pat: Vec<char> = wildcard_pattern.chars().collect();
    matches_from(&name, 0, &pat, 0)
}

fn matches_from(name: &[char], mut fi: usize, pat: &[char], mut wi: usize) -> bool {
    while wi < pat.len() {
        if pat[wi] == '*' {
            // Skip any run of consecutive wildcards.
            while wi < pat.len() && pat[wi] == '*' {
                wi += 1;
            }

            // Consume characters until the rest of the pattern matches.
            loop {
                if matches_from(name, fi, pat, wi) {
                    return true;
                }

                if fi == name.len() {
                    return false;
                }

                // A final bare "." in the pattern never matches past the
                // file name's own final period.
                if name[fi] == '.'
                    && last_dot(name) == Some(fi)
                    && pat.len() == wi + 1
                    && wi < pat.len()
                    && pat[wi] == '.'
                {
                    return false;
                }

                fi += 1;
            }
        }

        if fi == name.len() {
            // Trailing-period equivalence on the pattern side.
            if pat[wi] == '.'
                && last_dot(pat) == Some(wi)
                && matches_from(name, fi, pat, wi + 1)
            {
                return true;
            }

            return false;
        }

        if !eq_ci(name[fi], pat[wi]) && pat[wi] != '?' {
            return false;
        }

        fi += 1;
        wi += 1;
    }

    // Whole pattern consumed: match if the name is consumed too, or only a
    // trailing period remains.
    fi == name.len() || (name[fi] == '.' && fi + 1 == name.len())
}

/// Matches a full local item path against a wildcard pattern scoped at
/// `folder_path`. The pattern applies only to direct children unless
/// `recursive` is set, in which case it applies to the final component of
/// items at any depth beneath the folder.
pub fn matches_wildcard_item(item_path: &str, folder_path: &str, pattern: &str, recursive: bool) -> bool {
    if !local_path::is_child(folder_path, item_path) || local_path::equals(folder_path, item_path) {
        return false;
    }

    if !recursive && !local_path::is_direct_child(folder_path, item_path) {
        return false;
    }

    matches_wildcard_file(local_path::get_file_name(item_path), pattern)
}
