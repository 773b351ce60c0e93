//! Incremental commit engine
//!
//! A whole-output commit rebuilds the output through the tree builder. A
//! granular commit walks the stored tree chain down to the filtered path,
//! rebuilds only that node, and rewrites one entry per ancestor on the way
//! back up. Untouched siblings keep their hashes and are never re-read.

use crate::error::{RepoError, StorageError};
use crate::store::{ObjectStore, SledStateIndex};
use crate::tree::hydration::{collect_scope, plan_commit, CommitAction, Hydration};
use crate::tree::meta::{apply_delta, KnowledgeResolver};
use crate::tree::object::{TreeEntry, TreeObject};
use crate::tree::{walker, TreeBuilder, WalkerConfig};
use crate::types::{HashAlgorithm, HashInfo, Meta};
use crate::unit::{Output, Unit};
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument, warn};

pub struct CommitEngine<'a> {
    root: &'a Path,
    store: &'a ObjectStore,
    state: Option<&'a SledStateIndex>,
    algorithm: HashAlgorithm,
    walker_config: WalkerConfig,
}

impl<'a> CommitEngine<'a> {
    pub fn new(root: &'a Path, store: &'a ObjectStore, algorithm: HashAlgorithm) -> Self {
        Self {
            root,
            store,
            state: None,
            algorithm,
            walker_config: WalkerConfig::default(),
        }
    }

    pub fn with_state_index(mut self, state: &'a SledStateIndex) -> Self {
        self.state = Some(state);
        self
    }

    pub fn with_walker_config(mut self, config: WalkerConfig) -> Self {
        self.walker_config = config;
        self
    }

    fn builder(&self, cache: bool) -> TreeBuilder<'_> {
        let builder = TreeBuilder::new(self.store, self.algorithm)
            .with_walker_config(self.walker_config.clone())
            .write_blobs(cache);
        match self.state {
            Some(state) => builder.with_state_index(state),
            None => builder,
        }
    }

    /// Commit a unit, optionally restricted to a workspace-relative path
    /// inside one of its outputs
    ///
    /// Returns the paths of the outputs that were updated. The unit is only
    /// modified in memory; the caller dumps it.
    #[instrument(skip(self, unit), fields(unit = %unit.path.display()))]
    pub fn commit(
        &self,
        unit: &mut Unit,
        filter: Option<&Path>,
        allow_missing: bool,
    ) -> Result<Vec<PathBuf>, RepoError> {
        let mut updated = Vec::new();
        match filter {
            None => {
                for out in unit.outs.iter_mut() {
                    let changed = self
                        .commit_output(out, allow_missing)
                        .map_err(|e| e.at_output(&out.path))?;
                    if changed {
                        updated.push(out.path.clone());
                    }
                }
            }
            Some(filter) => {
                let out = unit
                    .outs
                    .iter_mut()
                    .find(|out| out.contains(filter))
                    .ok_or_else(|| RepoError::TargetNotTracked(filter.to_path_buf()))?;
                let components = out
                    .relative_filter(filter)
                    .ok_or_else(|| RepoError::TargetNotTracked(filter.to_path_buf()))?;
                let changed = if components.is_empty() {
                    self.commit_output(out, allow_missing)
                } else {
                    self.commit_granular(out, &components, allow_missing)
                }
                .map_err(|e| e.at_output(&out.path))?;
                if changed {
                    updated.push(out.path.clone());
                }
            }
        }
        info!(updated = updated.len(), "Commit finished");
        Ok(updated)
    }

    /// Full rebuild of one output
    fn commit_output(&self, out: &mut Output, allow_missing: bool) -> Result<bool, RepoError> {
        let full = walker::resolve_entry_path(self.root, &out.path)?;
        if !full.exists() {
            let restorable = match &out.hash_info {
                Some(hash) => self.is_restorable(hash)?,
                None => false,
            };
            if restorable {
                debug!(output = %out.path.display(), "Output absent but restorable from cache");
                return Ok(false);
            }
            if allow_missing {
                warn!(output = %out.path.display(), "Output missing, keeping recorded state");
                return Ok(false);
            }
            return Err(RepoError::MissingOutput(out.path.clone()));
        }

        let (hash, meta) = self.builder(out.cache).build(&full)?;
        let changed = out.hash_info.as_ref() != Some(&hash) || out.meta != meta;
        out.hash_info = Some(hash);
        out.meta = meta;
        Ok(changed)
    }

    /// Whether every object of `hash` is in the local cache
    fn is_restorable(&self, hash: &HashInfo) -> Result<bool, StorageError> {
        if !hash.is_dir() {
            return Ok(self.store.exists(hash));
        }
        match collect_scope(self.store, hash, &[]) {
            Ok(scope) => Ok(scope.files.iter().all(|f| self.store.exists(&f.hash_info))),
            Err(StorageError::ObjectNotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn commit_granular(
        &self,
        out: &mut Output,
        components: &[String],
        allow_missing: bool,
    ) -> Result<bool, RepoError> {
        let (root_tree, root_meta) = match &out.hash_info {
            Some(hash) if hash.is_dir() => ((*self.store.require_tree(hash)?).clone(), out.meta),
            Some(_) => {
                return Err(RepoError::Storage(StorageError::InvalidPath(format!(
                    "{} is a file output and has no sub-paths",
                    out.path.display()
                ))))
            }
            None => (TreeObject::new(self.algorithm), Meta::empty_directory()),
        };

        let mut knowledge = KnowledgeResolver::new(self.store);
        if !out.cache {
            if let Some(state) = self.state {
                knowledge = knowledge.with_state_index(state);
            }
        }
        let mut level = Level {
            disk: walker::resolve_entry_path(self.root, &out.path)?,
            relative: out.path.clone(),
            tree: root_tree,
            meta: root_meta,
        };
        self.update_level(&mut level, components, out.cache, allow_missing, &mut knowledge)?;

        let hash = self.store.put_tree(&level.tree)?;
        let changed = out.hash_info.as_ref() != Some(&hash) || out.meta != level.meta;
        debug!(
            output = %out.path.display(),
            hash = %hash.short(),
            size = ?level.meta.size,
            file_count = ?level.meta.file_count,
            "Granular commit"
        );
        out.hash_info = Some(hash);
        out.meta = level.meta;
        Ok(changed)
    }

    /// Apply the change at `components` below `level`, updating its tree and
    /// aggregate in place
    fn update_level(
        &self,
        level: &mut Level,
        components: &[String],
        cache: bool,
        allow_missing: bool,
        knowledge: &mut KnowledgeResolver<'_>,
    ) -> Result<(), RepoError> {
        let Some((name, rest)) = components.split_first() else {
            return Ok(());
        };
        let disk = walker::entry_path(&level.disk, name)?;
        let relative = level.relative.join(name);
        let old_entry = level.tree.get(name).cloned();
        let old_meta = match &old_entry {
            Some(entry) => Some(knowledge.known_meta_at(&entry.hash_info, Some(&disk))?),
            None => None,
        };

        let new_child = if rest.is_empty() {
            let state = Hydration::of_listing(old_entry.is_some());
            self.rebuild_terminal(&disk, &relative, state, cache, allow_missing)?
        } else {
            let (tree, meta) = match &old_entry {
                Some(entry) if entry.is_dir() => (
                    (*self.store.require_tree(&entry.hash_info)?).clone(),
                    old_meta.unwrap_or_else(Meta::empty_directory),
                ),
                // New intermediate directory (or a file replaced by one)
                _ => (TreeObject::new(self.algorithm), Meta::empty_directory()),
            };
            let mut child = Level {
                disk: disk.clone(),
                relative,
                tree,
                meta,
            };
            self.update_level(&mut child, rest, cache, allow_missing, knowledge)?;
            if child.tree.is_empty() && !disk.is_dir() {
                None
            } else {
                let hash = self.store.put_tree(&child.tree)?;
                Some((hash, child.meta))
            }
        };

        match &new_child {
            Some((hash, meta)) => {
                level.tree.insert(TreeEntry::new(name.clone(), hash.clone(), *meta));
            }
            None => {
                level.tree.remove(name);
            }
        }
        level.meta = apply_delta(level.meta, old_meta.as_ref(), new_child.as_ref().map(|(_, m)| m));
        Ok(())
    }

    /// Rebuild the filtered node itself; `None` when it no longer exists
    fn rebuild_terminal(
        &self,
        disk: &Path,
        relative: &Path,
        state: Hydration,
        cache: bool,
        allow_missing: bool,
    ) -> Result<Option<(HashInfo, Meta)>, RepoError> {
        let ignored = disk
            .file_name()
            .map(|n| self.walker_config.is_ignored(&n.to_string_lossy()))
            .unwrap_or(false);
        match plan_commit(state, disk.exists() && !ignored, allow_missing) {
            CommitAction::Rebuild => Ok(Some(self.builder(cache).build(disk)?)),
            CommitAction::Missing => Err(RepoError::MissingOutput(relative.to_path_buf())),
            CommitAction::Remove => {
                debug!(path = %relative.display(), "Removing entry");
                Ok(None)
            }
        }
    }
}

/// One directory level of a granular commit
struct Level {
    disk: PathBuf,
    relative: PathBuf,
    tree: TreeObject,
    meta: Meta,
}
