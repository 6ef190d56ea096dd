//! Path resolution for mounts.
//!
//! All paths inside kura are absolute, `/`-separated and normalized: a single
//! leading `/`, no trailing slash, no empty, `.` or `..` segments. The tree
//! root is `/`. These helpers are pure and never fail; anything that is not a
//! valid segment is filtered.

/// Split a path into its normalized segments.
pub fn segments(path: &str) -> Vec<&str> {
    let mut parts: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            s => parts.push(s),
        }
    }
    parts
}

fn assemble(parts: &[&str]) -> String {
    if parts.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", parts.join("/"))
    }
}

/// Normalize a path.
///
/// `..` pops one level (no-op at the root). Empty input is `/`.
pub fn normalize(path: &str) -> String {
    assemble(&segments(path))
}

/// Resolve `user` against a mount `base`.
///
/// A leading `/` in `user` is rooted at `base`, not at the tree root. `..`
/// never climbs above `base`.
pub fn resolve(base: &str, user: &str) -> String {
    let base_parts = segments(base);
    let floor = base_parts.len();
    let mut parts = base_parts;

    for segment in user.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if parts.len() > floor {
                    parts.pop();
                }
            }
            s => parts.push(s),
        }
    }
    assemble(&parts)
}

/// Parent directory of `path`. The parent of a root-level path (and of `/`)
/// is `/`.
pub fn parent(path: &str) -> String {
    let mut parts = segments(path);
    parts.pop();
    assemble(&parts)
}

/// Last segment of `path`; empty for `/`.
pub fn basename(path: &str) -> String {
    segments(path).last().map(|s| s.to_string()).unwrap_or_default()
}

/// Join parts and normalize the result.
pub fn join(parts: &[&str]) -> String {
    normalize(&parts.join("/"))
}

/// Split into `(parent, basename)`.
pub fn split(path: &str) -> (String, String) {
    (parent(path), basename(path))
}

/// Returns true if `path` equals `prefix` or lies below it.
///
/// Compares whole segments, so `/foo` is not a prefix of `/foobar`.
pub fn is_within(prefix: &str, path: &str) -> bool {
    let prefix = segments(prefix);
    let path = segments(path);
    path.len() >= prefix.len() && prefix.iter().zip(path.iter()).all(|(a, b)| a == b)
}

/// Returns true for the tree root.
pub fn is_root(path: &str) -> bool {
    segments(path).is_empty()
}
