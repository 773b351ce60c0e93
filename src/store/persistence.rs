//! Persistence layer for the file state index

use crate::error::StorageError;
use crate::types::HashInfo;
use serde::{Deserialize, Serialize};
use std::fs::Metadata;
use std::path::Path;
use std::time::UNIX_EPOCH;

/// Stat fingerprint of a file at the time it was hashed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileStat {
    pub mtime_ns: u128,
    pub size: u64,
    pub inode: u64,
}

impl FileStat {
    pub fn from_metadata(metadata: &Metadata) -> Self {
        let mtime_ns = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        Self {
            mtime_ns,
            size: metadata.len(),
            inode: inode_of(metadata),
        }
    }
}

#[cfg(unix)]
fn inode_of(metadata: &Metadata) -> u64 {
    use std::os::unix::fs::MetadataExt;
    metadata.ino()
}

#[cfg(not(unix))]
fn inode_of(_metadata: &Metadata) -> u64 {
    0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StateRecord {
    stat: FileStat,
    hash_info: HashInfo,
}

/// Sled-backed memo of `path -> (stat, hash)`
///
/// A lookup only hits when the current stat fingerprint matches the recorded
/// one, so a touched or rewritten file is always re-hashed.
pub struct SledStateIndex {
    db: sled::Db,
}

impl SledStateIndex {
    /// Open the index at the given directory
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let db = sled::open(path).map_err(|e| {
            StorageError::StateIndex(format!("Failed to open sled database: {}", e))
        })?;
        Ok(Self { db })
    }

    /// Open a throwaway in-memory index
    pub fn temporary() -> Result<Self, StorageError> {
        let db = sled::Config::new().temporary(true).open().map_err(|e| {
            StorageError::StateIndex(format!("Failed to open temporary database: {}", e))
        })?;
        Ok(Self { db })
    }

    fn key(path: &Path) -> Vec<u8> {
        path.to_string_lossy().as_bytes().to_vec()
    }

    fn record(&self, path: &Path) -> Result<Option<StateRecord>, StorageError> {
        let value = self
            .db
            .get(Self::key(path))
            .map_err(|e| StorageError::StateIndex(format!("Failed to get state record: {}", e)))?;
        let Some(value) = value else {
            return Ok(None);
        };
        let record = bincode::deserialize(&value).map_err(|e| {
            StorageError::Serialization(format!("Failed to deserialize state record: {}", e))
        })?;
        Ok(Some(record))
    }

    /// Recorded hash for `path`, if the stat fingerprint still matches
    pub fn get(&self, path: &Path, stat: &FileStat) -> Result<Option<HashInfo>, StorageError> {
        Ok(self
            .record(path)?
            .filter(|record| &record.stat == stat)
            .map(|record| record.hash_info))
    }

    /// Last recorded stat and hash for `path`, whatever the file holds now
    pub fn recorded(&self, path: &Path) -> Result<Option<(FileStat, HashInfo)>, StorageError> {
        Ok(self
            .record(path)?
            .map(|record| (record.stat, record.hash_info)))
    }

    pub fn put(&self, path: &Path, stat: FileStat, hash_info: &HashInfo) -> Result<(), StorageError> {
        let record = StateRecord {
            stat,
            hash_info: hash_info.clone(),
        };
        let value = bincode::serialize(&record).map_err(|e| {
            StorageError::Serialization(format!("Failed to serialize state record: {}", e))
        })?;
        self.db
            .insert(Self::key(path), value)
            .map_err(|e| StorageError::StateIndex(format!("Failed to put state record: {}", e)))?;
        Ok(())
    }

    pub fn remove(&self, path: &Path) -> Result<(), StorageError> {
        self.db.remove(Self::key(path)).map_err(|e| {
            StorageError::StateIndex(format!("Failed to remove state record: {}", e))
        })?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.db.len()
    }

    pub fn is_empty(&self) -> bool {
        self.db.is_empty()
    }

    /// Flush all pending writes to disk
    pub fn flush(&self) -> Result<(), StorageError> {
        self.db
            .flush()
            .map_err(|e| StorageError::StateIndex(format!("Failed to flush database: {}", e)))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::hasher::compute_content_hash;
    use crate::types::HashAlgorithm;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_hit_requires_matching_stat() {
        let temp_dir = TempDir::new().unwrap();
        let index = SledStateIndex::new(temp_dir.path().join("state")).unwrap();
        let file = temp_dir.path().join("data");
        fs::write(&file, b"abc").unwrap();

        let stat = FileStat::from_metadata(&fs::metadata(&file).unwrap());
        let hash = compute_content_hash(HashAlgorithm::Blake3, b"abc");
        index.put(&file, stat, &hash).unwrap();

        assert_eq!(index.get(&file, &stat).unwrap(), Some(hash.clone()));

        let changed = FileStat {
            size: stat.size + 1,
            ..stat
        };
        assert_eq!(index.get(&file, &changed).unwrap(), None);
        assert_eq!(index.recorded(&file).unwrap(), Some((stat, hash)));
    }

    #[test]
    fn test_remove_and_persist() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("state");
        let file = temp_dir.path().join("data");
        let stat = FileStat {
            mtime_ns: 1,
            size: 3,
            inode: 7,
        };
        let hash = compute_content_hash(HashAlgorithm::Blake3, b"abc");

        {
            let index = SledStateIndex::new(&db_path).unwrap();
            index.put(&file, stat, &hash).unwrap();
            index.flush().unwrap();
        }

        let index = SledStateIndex::new(&db_path).unwrap();
        assert_eq!(index.len(), 1);
        index.remove(&file).unwrap();
        assert!(index.is_empty());
        assert_eq!(index.get(&file, &stat).unwrap(), None);
    }
}
