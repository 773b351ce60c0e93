//! Path normalization utilities

use crate::error::StorageError;
use std::path::{Component, Path, PathBuf};
use unicode_normalization::UnicodeNormalization;

/// Normalize one entry name for hashing: Unicode NFC
pub fn normalize_name(name: &str) -> String {
    name.nfc().collect()
}

/// Lexically normalize a path without touching the filesystem
///
/// Removes `.` components and folds `..` into the preceding component. The
/// target of a removal no longer exists on disk, so canonicalization is not
/// an option here.
pub fn lexical_normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Express `path` relative to `root`
///
/// Relative inputs are taken as relative to `root` already. Paths escaping
/// the root are rejected.
pub fn relative_to(root: &Path, path: &Path) -> Result<PathBuf, StorageError> {
    let joined = if path.is_absolute() {
        lexical_normalize(path)
    } else {
        lexical_normalize(&root.join(path))
    };
    let root = lexical_normalize(root);
    joined
        .strip_prefix(&root)
        .map(|p| p.to_path_buf())
        .map_err(|_| {
            StorageError::InvalidPath(format!(
                "{} is outside of workspace {}",
                path.display(),
                root.display()
            ))
        })
}

/// Split a relative path into normalized components
///
/// Rejects absolute paths and any `..` that would escape.
pub fn split_components(path: &Path) -> Result<Vec<String>, StorageError> {
    let mut parts = Vec::new();
    for component in lexical_normalize(path).components() {
        match component {
            Component::Normal(name) => {
                let name = name.to_str().ok_or_else(|| {
                    StorageError::InvalidPath(format!("Non UTF-8 path: {}", path.display()))
                })?;
                parts.push(normalize_name(name));
            }
            Component::CurDir => {}
            _ => {
                return Err(StorageError::InvalidPath(format!(
                    "Expected a relative path inside the workspace: {}",
                    path.display()
                )))
            }
        }
    }
    Ok(parts)
}
