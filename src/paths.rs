//! Path normalization and fuzzy path matching
//!
//! The analyzer reports file paths in whatever spelling it saw: relative,
//! shortened, absolute, Windows-style. Cache keys are always
//! workspace-relative with forward slashes. This module normalizes paths
//! and aligns reported paths with the keys we actually hold content for.

use std::path::Path;

/// Normalize a path to the cache-key convention
///
/// - backslashes become forward slashes
/// - leading `./` segments are removed
/// - repeated slashes collapse
/// - trailing slashes are removed
pub fn normalize_path(path: &str) -> String {
    let unified = path.trim().replace('\\', "/");
    let absolute = unified.starts_with('/');

    let segments: Vec<&str> = unified
        .split('/')
        .filter(|s| !s.is_empty() && *s != ".")
        .collect();

    let joined = segments.join("/");
    if absolute {
        format!("/{}", joined)
    } else {
        joined
    }
}

/// Convert a filesystem path to a workspace-relative cache key
pub fn relative_key(path: &Path, workspace_root: &Path) -> String {
    let relative = path.strip_prefix(workspace_root).unwrap_or(path);
    normalize_path(&relative.to_string_lossy())
}

/// Whether `longer` ends with `shorter` on a path-segment boundary
pub fn ends_with_segment(longer: &str, shorter: &str) -> bool {
    if shorter.is_empty() || longer.len() < shorter.len() {
        return false;
    }
    if longer == shorter {
        return true;
    }
    longer.ends_with(shorter) && longer[..longer.len() - shorter.len()].ends_with('/')
}

/// Whether two paths refer to the same file under suffix matching
pub fn paths_match(a: &str, b: &str) -> bool {
    let a = normalize_path(a);
    let b = normalize_path(b);
    ends_with_segment(&a, &b) || ends_with_segment(&b, &a)
}

/// How a reported path was matched to a content key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathMatch {
    /// Normalized paths are identical
    Exact,
    /// The key ends with the reported path (analyzer shortened it)
    RelativeSuffix,
    /// The reported path ends with the key (analyzer used a full path)
    FullPathSuffix,
}

/// Match a reported path against the available content keys
///
/// Tries exact, then relative-suffix, then full-path-suffix matching.
/// Ambiguous suffix matches resolve to the lexicographically smallest key
/// so the outcome does not depend on key iteration order.
pub fn match_content_key<'a, I>(reported: &str, keys: I) -> Option<(&'a str, PathMatch)>
where
    I: IntoIterator<Item = &'a str>,
{
    let reported = normalize_path(reported);
    if reported.is_empty() {
        return None;
    }

    let mut relative: Option<&'a str> = None;
    let mut full: Option<&'a str> = None;

    for key in keys {
        let normalized = normalize_path(key);
        if normalized == reported {
            return Some((key, PathMatch::Exact));
        }
        if ends_with_segment(&normalized, &reported) {
            relative = Some(match relative {
                Some(current) if current <= key => current,
                _ => key,
            });
        } else if ends_with_segment(&reported, &normalized) {
            full = Some(match full {
                Some(current) if current <= key => current,
                _ => key,
            });
        }
    }

    relative
        .map(|k| (k, PathMatch::RelativeSuffix))
        .or_else(|| full.map(|k| (k, PathMatch::FullPathSuffix)))
}

/// File name component of a key
pub fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// File name without its extension
pub fn file_stem(path: &str) -> &str {
    let name = file_name(path);
    match name.rfind('.') {
        Some(idx) if idx > 0 => &name[..idx],
        _ => name,
    }
}
