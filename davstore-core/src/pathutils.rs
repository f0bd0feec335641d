//! Logical path handling and translation to filesystem paths.
//!
//! Logical paths use `/` as separator regardless of platform. A sanitized
//! path starts with `/` and contains only safe components; a stripped path
//! is a sanitized path without leading and trailing slashes (`""` is the root).

use std::path::{Path, PathBuf};

use crate::constants::RESERVED_SUFFIX;
use crate::error::{StoreError, StoreResult};

/// Normalize `path`, dropping `.`, `..` and empty components.
/// A trailing slash is preserved.
pub fn sanitize_path(path: &str) -> String {
    let trailing_slash = path.ends_with('/');
    let mut parts: Vec<&str> = Vec::new();

    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            part => parts.push(part),
        }
    }

    let mut sane = format!("/{}", parts.join("/"));
    if trailing_slash && !sane.ends_with('/') {
        sane.push('/');
    }
    sane
}

/// Strip leading and trailing slashes from a sanitized path.
pub fn strip_path(path: &str) -> String {
    path.trim_matches('/').to_string()
}

/// Inverse of [`strip_path`].
pub fn unstrip_path(stripped_path: &str, trailing_slash: bool) -> String {
    let mut path = format!("/{stripped_path}");
    if trailing_slash && !path.ends_with('/') {
        path.push('/');
    }
    path
}

pub fn is_safe_path_component(component: &str) -> bool {
    !component.is_empty() && !component.contains('/') && component != "." && component != ".."
}

/// A component that may name a file or directory inside the storage tree.
pub fn is_safe_filesystem_path_component(component: &str) -> bool {
    is_safe_path_component(component)
        && !component.chars().any(std::path::is_separator)
        && !(cfg!(windows) && component.contains(':'))
        && !component.starts_with('.')
        && !component.ends_with(RESERVED_SUFFIX)
}

/// Translate a stripped logical path below `root` to a filesystem path.
///
/// Fails with [`StoreError::UnsafePath`] for any unsafe component and with
/// [`StoreError::CollidingPath`] if an existing entry is reachable under the
/// component's name but isn't listed with exactly that name (case-insensitive
/// or short-name filesystems).
pub fn path_to_filesystem(root: &Path, stripped_path: &str) -> StoreResult<PathBuf> {
    let mut safe_path = root.to_path_buf();
    if stripped_path.is_empty() {
        return Ok(safe_path);
    }

    for part in stripped_path.split('/') {
        if !is_safe_filesystem_path_component(part) {
            return Err(StoreError::UnsafePath(part.to_string()));
        }
        let parent = safe_path.clone();
        safe_path.push(part);

        if std::fs::symlink_metadata(&safe_path).is_ok() && !is_listed(&parent, part)? {
            return Err(StoreError::CollidingPath(part.to_string()));
        }
    }

    Ok(safe_path)
}

fn is_listed(dir: &Path, name: &str) -> StoreResult<bool> {
    for entry in std::fs::read_dir(dir)? {
        if entry?.file_name() == name {
            return Ok(true);
        }
    }
    Ok(false)
}

/// The part of the sanitized `path` below the collection at `collection_path`.
pub fn name_from_path(path: &str, collection_path: &str) -> StoreResult<String> {
    let start = unstrip_path(collection_path, true);
    let with_slash = format!("{path}/");
    if !with_slash.starts_with(&start) {
        return Err(StoreError::UnsafePath(format!(
            "{path:?} doesn't start with {start:?}"
        )));
    }

    let name = path.get(start.len()..).unwrap_or_default();
    if !name.is_empty() && !is_safe_path_component(name) {
        return Err(StoreError::UnsafePath(format!(
            "{name:?} is not a component in collection {collection_path:?}"
        )));
    }
    Ok(name.to_string())
}
