//! Aggregate arithmetic over partial knowledge
//!
//! A directory's `size` and `file_count` are only ever reported when they
//! can be derived exactly. After a granular change the new aggregate is
//! `old_parent - old_child + new_child`, and it is known only when all three
//! terms are.

use crate::error::StorageError;
use crate::store::{ObjectStore, SledStateIndex};
use crate::types::{HashInfo, Meta};
use std::collections::HashMap;
use std::path::Path;

/// Replace one child's contribution in a parent aggregate
///
/// `None` for a child means the entry does not exist on that side (an
/// addition or a removal), which contributes exactly zero. Unknown sizes
/// live inside the `Meta`.
pub fn apply_delta(parent: Meta, old_child: Option<&Meta>, new_child: Option<&Meta>) -> Meta {
    let size = delta(
        parent.size,
        old_child.map_or(Some(0), |m| m.size),
        new_child.map_or(Some(0), |m| m.size),
    );
    let file_count = delta(
        parent.file_count.map(u64::from),
        old_child.map_or(Some(0), |m| m.file_count.map(u64::from)),
        new_child.map_or(Some(0), |m| m.file_count.map(u64::from)),
    )
    .and_then(|n| u32::try_from(n).ok());
    Meta::directory(size, file_count)
}

fn delta(parent: Option<u64>, old: Option<u64>, new: Option<u64>) -> Option<u64> {
    // Underflow means the recorded aggregate was inconsistent: report unknown
    parent?.checked_sub(old?)?.checked_add(new?)
}

/// Derives what the local object store knows about a hash
///
/// A blob's size is known when the blob is cached; a file always counts as
/// one file. A tree's aggregates are summed from its locally available tree
/// objects and blobs. Outputs that never write blobs can attach the state
/// index, whose last record for a path still knows the size of a file that
/// was hashed but not cached.
pub struct KnowledgeResolver<'a> {
    store: &'a ObjectStore,
    state: Option<&'a SledStateIndex>,
    memo: HashMap<HashInfo, Meta>,
}

impl<'a> KnowledgeResolver<'a> {
    pub fn new(store: &'a ObjectStore) -> Self {
        Self {
            store,
            state: None,
            memo: HashMap::new(),
        }
    }

    pub fn with_state_index(mut self, state: &'a SledStateIndex) -> Self {
        self.state = Some(state);
        self
    }

    pub fn known_meta(&mut self, hash: &HashInfo) -> Result<Meta, StorageError> {
        self.known_meta_at(hash, None)
    }

    /// Like [`known_meta`](Self::known_meta), with `disk` naming where the
    /// object was last seen in the working copy
    pub fn known_meta_at(&mut self, hash: &HashInfo, disk: Option<&Path>) -> Result<Meta, StorageError> {
        if let Some(meta) = self.memo.get(hash) {
            if meta.size.is_some() || disk.is_none() || self.state.is_none() {
                return Ok(*meta);
            }
        }
        let meta = if hash.is_dir() {
            match self.store.load_tree(hash)? {
                Some(tree) => {
                    let mut size = Some(0u64);
                    let mut file_count = Some(0u32);
                    for entry in tree.entries() {
                        let child_disk = disk.map(|d| d.join(&entry.name));
                        let child = self.known_meta_at(&entry.hash_info, child_disk.as_deref())?;
                        size = size.zip(child.size).map(|(a, b)| a + b);
                        file_count = file_count.zip(child.file_count).map(|(a, b)| a + b);
                    }
                    Meta::directory(size, file_count)
                }
                None => Meta::directory(None, None),
            }
        } else {
            match self.store.size_of(hash)? {
                Some(size) => Meta::file(size),
                None => self
                    .recorded_size(hash, disk)?
                    .map_or_else(Meta::file_unsized, Meta::file),
            }
        };
        self.memo.insert(hash.clone(), meta);
        Ok(meta)
    }

    fn recorded_size(&self, hash: &HashInfo, disk: Option<&Path>) -> Result<Option<u64>, StorageError> {
        let (Some(state), Some(path)) = (self.state, disk) else {
            return Ok(None);
        };
        Ok(state
            .recorded(path)?
            .filter(|(_, recorded)| recorded == hash)
            .map(|(stat, _)| stat.size))
    }
}
