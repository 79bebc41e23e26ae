//! Folder path helpers
//!
//! Paths are `/`-separated. A leading slash is preserved but does not count
//! as a segment, so `/a/b` and `a/b` both have depth 2.

/// Collapse repeated and trailing slashes
pub fn normalize(path: &str) -> String {
    let absolute = path.starts_with('/');
    let joined = segments(path).collect::<Vec<_>>().join("/");
    if absolute {
        format!("/{}", joined)
    } else {
        joined
    }
}

/// Iterate the non-empty segments of a path
pub fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

/// Number of segments in a path
pub fn depth(path: &str) -> usize {
    segments(path).count()
}

/// Parent folder, or `None` for a root-level path
pub fn parent(path: &str) -> Option<String> {
    let normalized = normalize(path);
    let trimmed = normalized.trim_start_matches('/');
    let (head, _) = trimmed.rsplit_once('/')?;
    if normalized.starts_with('/') {
        Some(format!("/{}", head))
    } else {
        Some(head.to_string())
    }
}

/// Whether `ancestor` is a strict prefix of `path`, segment-wise
pub fn is_ancestor(ancestor: &str, path: &str) -> bool {
    let mut outer = segments(ancestor);
    let mut inner = segments(path);
    loop {
        match (outer.next(), inner.next()) {
            (Some(a), Some(b)) if a == b => continue,
            (None, Some(_)) => return true,
            _ => return false,
        }
    }
}

/// Append a child name to a folder path
pub fn join(base: &str, name: &str) -> String {
    let name = name.trim_matches('/');
    let base = base.trim_end_matches('/');
    if base.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", base, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_depth_ignores_leading_and_repeated_slashes() {
        assert_eq!(depth("/a/b"), 2);
        assert_eq!(depth("a//b/"), 2);
        assert_eq!(depth("/"), 0);
    }

    #[test]
    fn test_parent() {
        assert_eq!(parent("/a/b/c").as_deref(), Some("/a/b"));
        assert_eq!(parent("parent/current").as_deref(), Some("parent"));
        assert_eq!(parent("/a"), None);
        assert_eq!(parent("a"), None);
    }

    #[test]
    fn test_is_ancestor() {
        assert!(is_ancestor("parent", "parent/current"));
        assert!(is_ancestor("/a", "/a/b/c"));
        assert!(!is_ancestor("/a/b", "/a/b"));
        assert!(!is_ancestor("/a/bc", "/a/b/c"));
        assert!(!is_ancestor("/a/b/c", "/a/b"));
    }

    #[test]
    fn test_join() {
        assert_eq!(join("photos", "2024/"), "photos/2024");
        assert_eq!(join("", "photos"), "photos");
        assert_eq!(join("/photos/", "raw"), "/photos/raw");
    }
}
