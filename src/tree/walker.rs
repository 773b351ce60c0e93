//! Directory listing for the tree builder
//!
//! Only immediate children are listed: the builder recurses itself so that
//! each directory level becomes one tree object.

use crate::error::StorageError;
use crate::store::atomic::is_temp_name;
use crate::tree::path::normalize_name;
use crate::unit::UNIT_FILE_SUFFIX;
use std::path::{Component, Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

/// Filesystem entry types
#[derive(Debug, Clone)]
pub enum Entry {
    /// A regular file with its normalized name
    File { path: PathBuf, name: String },
    /// A directory with its normalized name
    Directory { path: PathBuf, name: String },
}

impl Entry {
    pub fn name(&self) -> &str {
        match self {
            Entry::File { name, .. } | Entry::Directory { name, .. } => name,
        }
    }

    pub fn path(&self) -> &Path {
        match self {
            Entry::File { path, .. } | Entry::Directory { path, .. } => path,
        }
    }
}

/// Filesystem walker configuration
#[derive(Debug, Clone)]
pub struct WalkerConfig {
    /// Whether to follow symbolic links (default: false for determinism)
    pub follow_symlinks: bool,
    /// Names to skip. `*.ext` matches by suffix, anything else by exact name.
    pub ignore_patterns: Vec<String>,
}

impl Default for WalkerConfig {
    fn default() -> Self {
        Self {
            follow_symlinks: false,
            ignore_patterns: vec![".git".to_string(), ".lode".to_string()],
        }
    }
}

impl WalkerConfig {
    pub fn with_ignore_patterns(patterns: Vec<String>) -> Self {
        Self {
            ignore_patterns: patterns,
            ..Self::default()
        }
    }

    /// Whether an entry name is excluded from tracking
    pub fn is_ignored(&self, name: &str) -> bool {
        if name.ends_with(UNIT_FILE_SUFFIX) || is_temp_name(name) {
            return true;
        }
        self.ignore_patterns.iter().any(|pattern| {
            match pattern.strip_prefix('*') {
                Some(suffix) => name.ends_with(suffix),
                None => name == pattern,
            }
        })
    }
}

/// List the immediate children of `dir`, sorted by name
pub fn list_children(dir: &Path, config: &WalkerConfig) -> Result<Vec<Entry>, StorageError> {
    let walker = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .follow_links(config.follow_symlinks)
        .sort_by_file_name();

    let mut entries = Vec::new();
    for entry in walker {
        let entry = entry.map_err(|e| list_error(dir, e))?;

        let name = entry_name(&entry)?;
        if config.is_ignored(&name) {
            continue;
        }

        let file_type = entry.file_type();
        let path = entry.path().to_path_buf();
        if file_type.is_file() {
            entries.push(Entry::File { path, name });
        } else if file_type.is_dir() {
            entries.push(Entry::Directory { path, name });
        }
        // Symlinks (when not followed) and special files are skipped
    }

    // NFC normalization can reorder names relative to the on-disk sort
    entries.sort_by(|a, b| a.name().cmp(b.name()));
    Ok(entries)
}

/// Locate the on-disk entry of `dir` whose normalized name is `name`
///
/// Tree entries carry NFC names while the filesystem keeps whatever form the
/// file was created with. Falls back to the plain join when nothing matches,
/// which is also the path a new entry gets.
pub fn entry_path(dir: &Path, name: &str) -> Result<PathBuf, StorageError> {
    let direct = dir.join(name);
    if direct.symlink_metadata().is_ok() || !dir.is_dir() {
        return Ok(direct);
    }
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = entry.map_err(|e| list_error(dir, e))?;
        let matches = entry
            .file_name()
            .to_str()
            .map_or(false, |raw| normalize_name(raw) == name);
        if matches {
            return Ok(entry.into_path());
        }
    }
    Ok(direct)
}

/// Resolve a relative path component by component with [`entry_path`]
pub fn resolve_entry_path(base: &Path, relative: &Path) -> Result<PathBuf, StorageError> {
    let mut resolved = base.to_path_buf();
    for component in relative.components() {
        match component {
            Component::Normal(part) => match part.to_str() {
                Some(name) => resolved = entry_path(&resolved, &normalize_name(name))?,
                None => resolved.push(part),
            },
            other => resolved.push(other.as_os_str()),
        }
    }
    Ok(resolved)
}

fn entry_name(entry: &DirEntry) -> Result<String, StorageError> {
    entry.file_name().to_str().map(normalize_name).ok_or_else(|| {
        StorageError::InvalidPath(format!("Non UTF-8 file name: {}", entry.path().display()))
    })
}

fn list_error(dir: &Path, e: walkdir::Error) -> StorageError {
    StorageError::IoError(std::io::Error::new(
        std::io::ErrorKind::Other,
        format!("Failed to list {}: {}", dir.display(), e),
    ))
}
