//! Content-addressed object store
//!
//! Blobs and tree objects live on the filesystem under a path derived from
//! their hash:
//! `{root}/{algorithm}/{hex[0..2]}/{hex[2..]}` (tree objects keep the `.dir`
//! suffix in the file name).
//!
//! This structure:
//! - Makes `put` idempotent (same hash = same path, existing objects are kept)
//! - Keeps objects write-once: they are created or deleted, never rewritten
//! - Prevents directory bloat by fanning out on the first byte of the digest

use crate::error::StorageError;
use crate::store::atomic;
use crate::tree::hasher;
use crate::tree::object::TreeObject;
use crate::types::{HashAlgorithm, HashInfo};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, trace, warn};
use walkdir::WalkDir;

/// Local object cache
pub struct ObjectStore {
    root: PathBuf,
    /// Decoded tree objects, keyed by hash. Objects are immutable so entries
    /// never go stale; `clear` drops them together with the files.
    tree_cache: RwLock<HashMap<HashInfo, Arc<TreeObject>>>,
}

impl ObjectStore {
    /// Open (creating if needed) an object store rooted at `root`
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self, StorageError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).map_err(|e| StorageError::io_at(&root, e))?;
        Ok(Self {
            root,
            tree_cache: RwLock::new(HashMap::new()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Filesystem location of an object
    pub fn object_path(&self, hash: &HashInfo) -> PathBuf {
        object_path_in(&self.root, hash)
    }

    pub fn exists(&self, hash: &HashInfo) -> bool {
        self.object_path(hash).is_file()
    }

    /// Store raw object bytes under `hash`
    ///
    /// Verifies the content first. Returns `false` when the object was
    /// already present (deduplication).
    pub fn put(&self, hash: &HashInfo, data: &[u8]) -> Result<bool, StorageError> {
        hasher::verify_object(hash, data)?;
        if self.exists(hash) {
            self.verify(hash)?;
            trace!(hash = %hash.short(), "Object already cached");
            return Ok(false);
        }
        atomic::atomic_write(&self.object_path(hash), data)?;
        debug!(hash = %hash.short(), bytes = data.len(), "Stored object");
        Ok(true)
    }

    /// Store the content of a workspace file under its precomputed hash
    ///
    /// An existing copy is re-verified instead of being trusted.
    pub fn put_file(&self, hash: &HashInfo, source: &Path) -> Result<bool, StorageError> {
        if self.exists(hash) {
            self.verify(hash)?;
            return Ok(false);
        }
        let size = atomic::atomic_copy_verified(source, &self.object_path(hash), hash)?;
        debug!(hash = %hash.short(), bytes = size, source = %source.display(), "Cached file");
        Ok(true)
    }

    /// Encode and store a tree object, returning its hash
    pub fn put_tree(&self, tree: &TreeObject) -> Result<HashInfo, StorageError> {
        let encoded = tree.encode();
        let hash = hasher::compute_tree_hash(tree.algorithm(), &encoded);
        if self.exists(&hash) {
            self.verify(&hash)?;
        } else {
            atomic::atomic_write(&self.object_path(&hash), &encoded)?;
            debug!(hash = %hash.short(), entries = tree.len(), "Stored tree object");
        }
        self.tree_cache
            .write()
            .entry(hash.clone())
            .or_insert_with(|| Arc::new(tree.clone()));
        Ok(hash)
    }

    /// Read and verify an object
    pub fn get(&self, hash: &HashInfo) -> Result<Vec<u8>, StorageError> {
        let path = self.object_path(hash);
        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::ObjectNotFound(hash.clone()))
            }
            Err(e) => return Err(StorageError::io_at(&path, e)),
        };
        if let Err(e) = hasher::verify_object(hash, &data) {
            warn!(hash = %hash, "Cached object is corrupt");
            return Err(e);
        }
        Ok(data)
    }

    /// Re-hash a stored object, streaming it from disk
    ///
    /// `HashMismatch` when the bytes no longer match the hash they are
    /// stored under.
    pub fn verify(&self, hash: &HashInfo) -> Result<(), StorageError> {
        let path = self.object_path(hash);
        let (actual, _) = match hasher::hash_file(hash.algorithm, &path) {
            Ok(result) => result,
            Err(StorageError::IoError(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::ObjectNotFound(hash.clone()))
            }
            Err(e) => return Err(e),
        };
        if actual.digest() != hash.digest() {
            warn!(hash = %hash, path = %path.display(), "Cached object is corrupt");
            let actual = if hash.is_dir() {
                HashInfo::dir(hash.algorithm, actual.digest())
            } else {
                actual
            };
            return Err(StorageError::HashMismatch {
                expected: hash.clone(),
                actual,
            });
        }
        Ok(())
    }

    /// Load a tree object if it is present locally
    pub fn load_tree(&self, hash: &HashInfo) -> Result<Option<Arc<TreeObject>>, StorageError> {
        if let Some(tree) = self.tree_cache.read().get(hash) {
            return Ok(Some(Arc::clone(tree)));
        }
        let data = match self.get(hash) {
            Ok(data) => data,
            Err(StorageError::ObjectNotFound(_)) => return Ok(None),
            Err(e) => return Err(e),
        };
        let tree = Arc::new(TreeObject::decode(hash.algorithm, &data).map_err(|e| {
            StorageError::CorruptObject {
                hash: hash.clone(),
                reason: e.to_string(),
            }
        })?);
        self.tree_cache
            .write()
            .insert(hash.clone(), Arc::clone(&tree));
        Ok(Some(tree))
    }

    /// Load a tree object, failing when it is absent
    pub fn require_tree(&self, hash: &HashInfo) -> Result<Arc<TreeObject>, StorageError> {
        self.load_tree(hash)?
            .ok_or_else(|| StorageError::ObjectNotFound(hash.clone()))
    }

    /// Byte length of a cached blob, if present
    pub fn size_of(&self, hash: &HashInfo) -> Result<Option<u64>, StorageError> {
        let path = self.object_path(hash);
        match fs::metadata(&path) {
            Ok(md) => Ok(Some(md.len())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::io_at(&path, e)),
        }
    }

    /// Materialize a cached blob at `dest`, verifying it on the way out
    pub fn copy_to(&self, hash: &HashInfo, dest: &Path) -> Result<u64, StorageError> {
        let source = self.object_path(hash);
        if !source.is_file() {
            return Err(StorageError::ObjectNotFound(hash.clone()));
        }
        atomic::atomic_copy_verified(&source, dest, hash)
    }

    /// Every object currently in the store
    pub fn list(&self) -> Result<Vec<HashInfo>, StorageError> {
        list_objects_in(&self.root, "")
    }

    /// Delete one object
    pub fn remove(&self, hash: &HashInfo) -> Result<bool, StorageError> {
        self.tree_cache.write().remove(hash);
        let path = self.object_path(hash);
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StorageError::io_at(&path, e)),
        }
    }

    /// Delete every object, returning how many were removed
    pub fn clear(&self) -> Result<usize, StorageError> {
        let objects = self.list()?;
        for hash in &objects {
            self.remove(hash)?;
        }
        self.tree_cache.write().clear();
        debug!(removed = objects.len(), "Cleared object store");
        Ok(objects.len())
    }
}

/// Object path for `hash` under an arbitrary store root (shared with remotes)
pub(crate) fn object_path_in(root: &Path, hash: &HashInfo) -> PathBuf {
    let value = &hash.value;
    let split = value.len().min(2);
    root.join(hash.algorithm.as_str())
        .join(&value[..split])
        .join(&value[split..])
}

/// List objects under a store root whose value starts with `prefix`
pub(crate) fn list_objects_in(root: &Path, prefix: &str) -> Result<Vec<HashInfo>, StorageError> {
    let mut objects = Vec::new();
    if !root.is_dir() {
        return Ok(objects);
    }
    for entry in WalkDir::new(root).min_depth(3).max_depth(3).sort_by_file_name() {
        let entry = entry.map_err(|e| {
            StorageError::IoError(std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("Failed to walk object store: {}", e),
            ))
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        if name.starts_with('.') {
            // in-flight temp file
            continue;
        }
        let path = entry.path();
        let fanout = path
            .parent()
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let algorithm: HashAlgorithm = match path
            .parent()
            .and_then(|p| p.parent())
            .and_then(|p| p.file_name())
            .and_then(|n| n.to_str())
            .and_then(|n| n.parse().ok())
        {
            Some(algorithm) => algorithm,
            None => continue,
        };
        let hash = HashInfo {
            algorithm,
            value: format!("{}{}", fanout, name),
        };
        if hash.is_well_formed() && hash.value.starts_with(prefix) {
            objects.push(hash);
        }
    }
    Ok(objects)
}
