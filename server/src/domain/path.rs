//! Path rules shared by the file tree and the live workspace
//!
//! The database stores project-relative POSIX paths ("/src/main.rs"); the
//! container sees the same file under the workspace root
//! ("/workspace/src/main.rs"). Every conversion in either direction goes
//! through this module.

/// Path of the canonical root node of every project tree
pub const ROOT_PATH: &str = "/";

/// Normalize a raw path into a project-relative path.
///
/// Strips the workspace root prefix when present, collapses repeated and
/// trailing slashes and drops `.` segments. The empty result maps to
/// [`ROOT_PATH`].
pub fn normalize(workspace_root: &str, raw: &str) -> String {
    let root = workspace_root.trim_end_matches('/');
    let relative = if !root.is_empty() && raw.starts_with(root) {
        let rest = &raw[root.len()..];
        if rest.is_empty() || rest.starts_with('/') {
            rest
        } else {
            raw
        }
    } else {
        raw
    };

    let segments: Vec<&str> = relative
        .split('/')
        .filter(|s| !s.is_empty() && *s != ".")
        .collect();

    if segments.is_empty() {
        ROOT_PATH.to_string()
    } else {
        format!("/{}", segments.join("/"))
    }
}

/// Parent of a normalized path. The root's parent is the root.
pub fn parent(path: &str) -> String {
    match path.rfind('/') {
        Some(0) | None => ROOT_PATH.to_string(),
        Some(idx) => path[..idx].to_string(),
    }
}

/// Last segment of a normalized path
pub fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Join a normalized directory path with a single name
pub fn join(dir: &str, name: &str) -> String {
    if dir == ROOT_PATH {
        format!("/{}", name)
    } else {
        format!("{}/{}", dir, name)
    }
}

/// Number of segments below the root
pub fn depth(path: &str) -> usize {
    if path == ROOT_PATH {
        0
    } else {
        path.matches('/').count()
    }
}

/// Absolute location of a normalized path inside the container
pub fn to_container_path(workspace_root: &str, path: &str) -> String {
    let root = workspace_root.trim_end_matches('/');
    if path == ROOT_PATH {
        if root.is_empty() {
            ROOT_PATH.to_string()
        } else {
            root.to_string()
        }
    } else {
        format!("{}{}", root, path)
    }
}

/// Rewrite `path` from under `old_prefix` to under `new_prefix`.
///
/// Returns `None` if `path` is not `old_prefix` itself or one of its descendants.
pub fn rewrite_prefix(path: &str, old_prefix: &str, new_prefix: &str) -> Option<String> {
    if path == old_prefix {
        return Some(new_prefix.to_string());
    }
    let rest = path.strip_prefix(old_prefix)?;
    if old_prefix == ROOT_PATH {
        return Some(join(new_prefix, rest));
    }
    if rest.starts_with('/') {
        Some(format!("{}{}", new_prefix, rest))
    } else {
        None
    }
}

/// Validate a single path segment supplied by a client
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains('/') && !name.contains('\0')
}
