//! Tree builder: computes `(HashInfo, Meta)` for a file or directory
//!
//! Directories are hashed bottom-up, one tree object per directory level.
//! Every tree object is written to the object store; blobs only when the
//! output is cached.

use crate::error::StorageError;
use crate::store::{FileStat, ObjectStore, SledStateIndex};
use crate::tree::hasher;
use crate::tree::object::{TreeEntry, TreeObject};
use crate::tree::walker::{self, Entry, WalkerConfig};
use crate::types::{HashAlgorithm, HashInfo, Meta};
use rayon::prelude::*;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::{debug, error, info, instrument, trace};

/// Counters collected during one or more builds
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuildStats {
    /// Files whose bytes were read and digested
    pub files_hashed: u64,
    /// Files whose hash came from the state index
    pub files_reused: u64,
    pub directories: u64,
}

/// Tree builder over an object store
pub struct TreeBuilder<'a> {
    store: &'a ObjectStore,
    state: Option<&'a SledStateIndex>,
    algorithm: HashAlgorithm,
    walker_config: WalkerConfig,
    write_blobs: bool,
    files_hashed: AtomicU64,
    files_reused: AtomicU64,
    directories: AtomicU64,
}

impl<'a> TreeBuilder<'a> {
    pub fn new(store: &'a ObjectStore, algorithm: HashAlgorithm) -> Self {
        Self {
            store,
            state: None,
            algorithm,
            walker_config: WalkerConfig::default(),
            write_blobs: true,
            files_hashed: AtomicU64::new(0),
            files_reused: AtomicU64::new(0),
            directories: AtomicU64::new(0),
        }
    }

    /// Consult and update a state index so unchanged files are not re-read
    pub fn with_state_index(mut self, state: &'a SledStateIndex) -> Self {
        self.state = Some(state);
        self
    }

    /// Set walker config (ignore patterns, etc.)
    pub fn with_walker_config(mut self, config: WalkerConfig) -> Self {
        self.walker_config = config;
        self
    }

    /// Whether file blobs are copied into the store (`cache = false` outputs
    /// only record hashes and tree objects)
    pub fn write_blobs(mut self, enabled: bool) -> Self {
        self.write_blobs = enabled;
        self
    }

    pub fn stats(&self) -> BuildStats {
        BuildStats {
            files_hashed: self.files_hashed.load(Ordering::Relaxed),
            files_reused: self.files_reused.load(Ordering::Relaxed),
            directories: self.directories.load(Ordering::Relaxed),
        }
    }

    /// Build the hash of a file or directory
    #[instrument(skip(self), fields(path = %path.display()))]
    pub fn build(&self, path: &Path) -> Result<(HashInfo, Meta), StorageError> {
        let start = Instant::now();
        let result = self.build_node(path);
        match &result {
            Ok((hash, meta)) => {
                info!(
                    hash = %hash.short(),
                    size = ?meta.size,
                    file_count = ?meta.file_count,
                    duration_ms = start.elapsed().as_millis(),
                    "Tree build completed"
                );
            }
            Err(e) => error!("Tree build failed: {}", e),
        }
        result
    }

    fn build_node(&self, path: &Path) -> Result<(HashInfo, Meta), StorageError> {
        let metadata = fs::metadata(path).map_err(|e| StorageError::io_at(path, e))?;
        if metadata.is_dir() {
            self.build_directory(path)
        } else if metadata.is_file() {
            self.build_file(path, &metadata)
        } else {
            Err(StorageError::InvalidPath(format!(
                "Not a regular file or directory: {}",
                path.display()
            )))
        }
    }

    fn build_file(&self, path: &Path, metadata: &fs::Metadata) -> Result<(HashInfo, Meta), StorageError> {
        let stat = FileStat::from_metadata(metadata);

        if let Some(state) = self.state {
            if let Some(hash) = state.get(path, &stat)? {
                let cached = self.write_blobs && self.store.exists(&hash);
                if hash.algorithm == self.algorithm && (!self.write_blobs || cached) {
                    if cached {
                        self.store.verify(&hash)?;
                    }
                    trace!(path = %path.display(), "Reusing recorded hash");
                    self.files_reused.fetch_add(1, Ordering::Relaxed);
                    return Ok((hash, Meta::file(stat.size)));
                }
            }
        }

        let (hash, size) = hasher::hash_file(self.algorithm, path)?;
        self.files_hashed.fetch_add(1, Ordering::Relaxed);
        trace!(path = %path.display(), hash = %hash.short(), "Hashed file");

        if self.write_blobs {
            self.store.put_file(&hash, path)?;
        }
        if let Some(state) = self.state {
            state.put(path, stat, &hash)?;
        }
        Ok((hash, Meta::file(size)))
    }

    fn build_directory(&self, path: &Path) -> Result<(HashInfo, Meta), StorageError> {
        let children = walker::list_children(path, &self.walker_config)?;

        let entries: Vec<TreeEntry> = children
            .par_iter()
            .map(|child| {
                let (hash_info, meta) = match child {
                    Entry::Directory { path, .. } => self.build_directory(path)?,
                    Entry::File { path, .. } => {
                        let metadata = fs::metadata(path).map_err(|e| StorageError::io_at(path, e))?;
                        self.build_file(path, &metadata)?
                    }
                };
                Ok(TreeEntry::new(child.name(), hash_info, meta))
            })
            .collect::<Result<_, StorageError>>()?;

        let tree = TreeObject::from_entries(self.algorithm, entries);
        let hash = self.store.put_tree(&tree)?;
        self.directories.fetch_add(1, Ordering::Relaxed);
        debug!(path = %path.display(), hash = %hash.short(), entries = tree.len(), "Hashed directory");
        Ok((hash, tree.aggregate_meta()))
    }
}
