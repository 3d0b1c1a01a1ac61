//! Shell quoting and lexical POSIX path helpers.
//!
//! Every path handled here belongs to some endpoint's filesystem, possibly a remote one,
//! so nothing touches the local disk: `..` and `.` are folded textually.

/// Quote `value` for a POSIX shell as a single-quoted literal.
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", escape_posix_literal(value))
}

fn escape_posix_literal(value: &str) -> String {
    value.replace('\'', "'\\''")
}

/// Fold `.`/`..` components and duplicate separators of an absolute POSIX path.
pub fn normalize_path(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for component in path.split('/') {
        match component {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    format!("/{}", parts.join("/"))
}

/// Resolve `path` against `base` the way a shell would from `cd base`.
pub fn resolve_path(base: &str, path: &str) -> String {
    if path.starts_with('/') {
        normalize_path(path)
    } else {
        normalize_path(&format!("{}/{}", base, path))
    }
}

pub fn is_path_inside(path: &str, parent: &str) -> bool {
    let path = normalize_path(path);
    let parent = normalize_path(parent);
    if parent == "/" {
        return true;
    }
    path == parent || path.starts_with(&format!("{}/", parent))
}

/// Directory part of a POSIX path; `/` for top-level entries.
pub fn parent_dir(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => "/",
        Some(idx) => &path[..idx],
    }
}

pub fn dirname(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) => "/",
        Some(idx) => &path[..idx],
        None => ".",
    }
}

/// Append a scan-relative path (`/a/b`) to a root directory.
pub fn join_root(root: &str, relative: &str) -> String {
    let root = root.trim_end_matches('/');
    if relative.starts_with('/') {
        format!("{}{}", root, relative)
    } else {
        format!("{}/{}", root, relative)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quotes_embedded_single_quotes() {
        assert_eq!(shell_quote("plain"), "'plain'");
        assert_eq!(shell_quote("it's"), "'it'\\''s'");
    }

    #[test]
    fn resolves_relative_paths() {
        assert_eq!(resolve_path("/srv/app/code", "./data"), "/srv/app/code/data");
        assert_eq!(resolve_path("/srv/app/code", "../shared"), "/srv/app/shared");
        assert_eq!(resolve_path("/srv/app/code", "/abs//x/."), "/abs/x");
        assert_eq!(resolve_path("/srv/app/code", "."), "/srv/app/code");
    }

    #[test]
    fn detects_nested_paths() {
        assert!(is_path_inside("/srv/app/code/data", "/srv/app"));
        assert!(is_path_inside("/srv/app", "/srv/app/"));
        assert!(!is_path_inside("/srv/application", "/srv/app"));
    }

    #[test]
    fn splits_parents() {
        assert_eq!(parent_dir("/data/a.txt"), "/data");
        assert_eq!(parent_dir("/a.txt"), "/");
        assert_eq!(dirname("docker-compose.yml"), ".");
        assert_eq!(dirname("deploy/docker-compose.yml"), "deploy");
        assert_eq!(join_root("/srv/x/", "/a/b"), "/srv/x/a/b");
    }
}
