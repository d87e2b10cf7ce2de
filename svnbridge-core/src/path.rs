//! Repository path helpers.
//!
//! Repository paths are relative to the repository root, `/`-separated, and
//! carry no leading or trailing slash. The root itself is the empty string.

/// Normalizes a client supplied path: drops empty and `.` segments and
/// resolves `..` without ever climbing above the root.
pub fn normalize(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            s => segments.push(s),
        }
    }
    segments.join("/")
}

/// Joins `relative` onto `base`, normalizing the result.
pub fn join(base: &str, relative: &str) -> String {
    normalize(&format!("{base}/{relative}"))
}

/// Returns the parent of a normalized path, or `None` for the root.
pub fn parent(path: &str) -> Option<&str> {
    if path.is_empty() {
        return None;
    }
    Some(path.rsplit_once('/').map_or("", |(parent, _)| parent))
}

/// Returns the last segment of a normalized path.
pub fn basename(path: &str) -> &str {
    path.rsplit_once('/').map_or(path, |(_, name)| name)
}

/// Returns whether `path` equals `ancestor` or lies below it.
pub fn is_within(path: &str, ancestor: &str) -> bool {
    if ancestor.is_empty() {
        return true;
    }
    match path.strip_prefix(ancestor) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

/// Strips `ancestor` from `path`, returning the relative remainder.
pub fn relative_to<'a>(path: &'a str, ancestor: &str) -> Option<&'a str> {
    if !is_within(path, ancestor) {
        return None;
    }
    let rest = &path[ancestor.len()..];
    Some(rest.strip_prefix('/').unwrap_or(rest))
}
