//! Tree objects: the persisted, hashed listing of one directory's immediate entries

use crate::error::StorageError;
use crate::tree::hasher;
use crate::types::{HashAlgorithm, HashInfo, Meta};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One immediate child of a directory
///
/// `meta` is local knowledge and is not part of the encoded object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    pub name: String,
    pub hash_info: HashInfo,
    pub meta: Meta,
}

impl TreeEntry {
    pub fn new(name: impl Into<String>, hash_info: HashInfo, meta: Meta) -> Self {
        Self {
            name: name.into(),
            hash_info,
            meta,
        }
    }

    pub fn is_dir(&self) -> bool {
        self.hash_info.is_dir()
    }
}

/// Wire form of an entry: only what the hash covers
#[derive(Debug, Serialize, Deserialize)]
struct EncodedEntry {
    name: String,
    hash: String,
}

/// A directory listing sorted by entry name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeObject {
    algorithm: HashAlgorithm,
    entries: BTreeMap<String, TreeEntry>,
}

impl TreeObject {
    pub fn new(algorithm: HashAlgorithm) -> Self {
        Self {
            algorithm,
            entries: BTreeMap::new(),
        }
    }

    pub fn from_entries(algorithm: HashAlgorithm, entries: impl IntoIterator<Item = TreeEntry>) -> Self {
        let mut tree = Self::new(algorithm);
        for entry in entries {
            tree.insert(entry);
        }
        tree
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    /// Insert or replace an entry, returning the previous one
    pub fn insert(&mut self, entry: TreeEntry) -> Option<TreeEntry> {
        self.entries.insert(entry.name.clone(), entry)
    }

    pub fn remove(&mut self, name: &str) -> Option<TreeEntry> {
        self.entries.remove(name)
    }

    pub fn get(&self, name: &str) -> Option<&TreeEntry> {
        self.entries.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut TreeEntry> {
        self.entries.get_mut(name)
    }

    /// Entries in name order
    pub fn entries(&self) -> impl Iterator<Item = &TreeEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Canonical encoding: compact JSON list of `{name, hash}` in name order
    pub fn encode(&self) -> Vec<u8> {
        let encoded: Vec<EncodedEntry> = self
            .entries
            .values()
            .map(|e| EncodedEntry {
                name: e.name.clone(),
                hash: e.hash_info.value.clone(),
            })
            .collect();
        // Serializing a Vec of plain string structs cannot fail
        serde_json::to_vec(&encoded).unwrap_or_default()
    }

    /// Hash of the encoded object
    pub fn hash(&self) -> HashInfo {
        hasher::compute_tree_hash(self.algorithm, &self.encode())
    }

    /// Decode an object read from a cache or a remote
    ///
    /// Entry metas come back with unknown sizes; callers fill in what they
    /// know locally.
    pub fn decode(algorithm: HashAlgorithm, bytes: &[u8]) -> Result<Self, StorageError> {
        let encoded: Vec<EncodedEntry> = serde_json::from_slice(bytes)
            .map_err(|e| StorageError::Serialization(format!("Invalid tree object: {}", e)))?;

        let mut tree = Self::new(algorithm);
        let mut previous: Option<String> = None;
        for item in encoded {
            if let Some(prev) = &previous {
                if prev >= &item.name {
                    return Err(StorageError::Serialization(format!(
                        "Tree entries out of order: '{}' after '{}'",
                        item.name, prev
                    )));
                }
            }
            let hash_info = HashInfo {
                algorithm,
                value: item.hash,
            };
            if !hash_info.is_well_formed() {
                return Err(StorageError::Serialization(format!(
                    "Malformed hash for entry '{}': {}",
                    item.name, hash_info.value
                )));
            }
            let meta = if hash_info.is_dir() {
                Meta::directory(None, None)
            } else {
                Meta::file_unsized()
            };
            previous = Some(item.name.clone());
            tree.insert(TreeEntry::new(item.name, hash_info, meta));
        }
        Ok(tree)
    }

    /// Sum of the entries' aggregates; `None` as soon as one part is unknown
    pub fn aggregate_meta(&self) -> Meta {
        let mut size = Some(0u64);
        let mut file_count = Some(0u32);
        for entry in self.entries.values() {
            size = size.zip(entry.meta.size).map(|(a, b)| a + b);
            file_count = file_count.zip(entry.meta.file_count).map(|(a, b)| a + b);
        }
        Meta::directory(size, file_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file_entry(name: &str, content: &[u8]) -> TreeEntry {
        TreeEntry::new(
            name,
            hasher::compute_content_hash(HashAlgorithm::Blake3, content),
            Meta::file(content.len() as u64),
        )
    }

    #[test]
    fn test_hash_independent_of_insertion_order() {
        let a = TreeObject::from_entries(
            HashAlgorithm::Blake3,
            vec![file_entry("foo", b"foo"), file_entry("bar", b"bar")],
        );
        let b = TreeObject::from_entries(
            HashAlgorithm::Blake3,
            vec![file_entry("bar", b"bar"), file_entry("foo", b"foo")],
        );
        assert_eq!(a.hash(), b.hash());
        assert!(a.hash().is_dir());
    }

    #[test]
    fn test_hash_ignores_local_meta() {
        let mut known = TreeObject::new(HashAlgorithm::Blake3);
        known.insert(file_entry("foo", b"foo"));
        let mut unknown = known.clone();
        unknown.get_mut("foo").unwrap().meta = Meta::file_unsized();
        assert_eq!(known.hash(), unknown.hash());
    }

    #[test]
    fn test_decode_roundtrip_preserves_hash() {
        let tree = TreeObject::from_entries(
            HashAlgorithm::Blake3,
            vec![file_entry("foo", b"foo"), file_entry("bar", b"bar")],
        );
        let decoded = TreeObject::decode(HashAlgorithm::Blake3, &tree.encode()).unwrap();
        assert_eq!(decoded.hash(), tree.hash());
        assert_eq!(decoded.get("foo").unwrap().meta.size, None);
        assert_eq!(decoded.get("foo").unwrap().meta.file_count, Some(1));
    }

    #[test]
    fn test_decode_rejects_unsorted() {
        let h = hasher::compute_content_hash(HashAlgorithm::Blake3, b"x").value;
        let raw = format!(
            r#"[{{"name":"b","hash":"{h}"}},{{"name":"a","hash":"{h}"}}]"#
        );
        assert!(TreeObject::decode(HashAlgorithm::Blake3, raw.as_bytes()).is_err());
    }

    #[test]
    fn test_aggregate_unknown_propagates() {
        let mut tree = TreeObject::from_entries(
            HashAlgorithm::Blake3,
            vec![file_entry("foo", b"foo"), file_entry("bar", b"bar")],
        );
        assert_eq!(tree.aggregate_meta(), Meta::directory(Some(6), Some(2)));

        tree.get_mut("bar").unwrap().meta = Meta::file_unsized();
        assert_eq!(tree.aggregate_meta(), Meta::directory(None, Some(2)));
    }
}
