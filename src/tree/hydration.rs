//! Hydration state of tree entries and pure checkout planning
//!
//! Every entry of a tracked directory is in exactly one state with respect to
//! the working copy:
//!
//! - `Absent`: the tracked tree has no such entry
//! - `Known`: the tree records the entry, but the working copy does not hold
//!   its content (a virtual entry)
//! - `Materialized`: the working copy holds exactly the recorded content
//!
//! Checkout is the transition `Known -> Materialized` for the entries in
//! scope. Entries outside the scope stay wherever they were. A granular
//! commit moves its filtered entry between `Absent` and tracked.

use crate::error::StorageError;
use crate::store::ObjectStore;
use crate::types::HashInfo;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hydration {
    Absent,
    Known,
    Materialized,
}

/// What the working copy holds at an entry's path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiskState {
    Missing,
    Matches,
    Differs,
}

impl Hydration {
    /// State of a tracked entry given the working copy
    pub fn of_tracked(disk: DiskState) -> Self {
        match disk {
            DiskState::Matches => Hydration::Materialized,
            DiskState::Missing | DiskState::Differs => Hydration::Known,
        }
    }

    /// State of an entry before its working-copy content is examined
    pub fn of_listing(tracked: bool) -> Self {
        if tracked {
            Hydration::Known
        } else {
            Hydration::Absent
        }
    }
}

/// Step a granular commit takes for its filtered entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitAction {
    /// Hash what is on disk into the tree
    Rebuild,
    /// Drop the entry from the tree
    Remove,
    /// Nothing on disk and nothing tracked
    Missing,
}

/// Pure commit transition for the filtered entry
pub fn plan_commit(state: Hydration, on_disk: bool, allow_missing: bool) -> CommitAction {
    match (state, on_disk) {
        (_, true) => CommitAction::Rebuild,
        (Hydration::Absent, false) if !allow_missing => CommitAction::Missing,
        (_, false) => CommitAction::Remove,
    }
}

/// Step to take for one file in checkout scope
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckoutAction {
    /// Write a file that does not exist yet
    Add,
    /// Replace a file whose content differs
    Overwrite,
    /// Already materialized
    Skip,
    /// Content differs and overwriting was not forced
    Conflict,
}

/// Pure checkout transition for one entry
pub fn plan_checkout(disk: DiskState, force: bool) -> CheckoutAction {
    match (Hydration::of_tracked(disk), disk) {
        (Hydration::Materialized, _) => CheckoutAction::Skip,
        (_, DiskState::Missing) => CheckoutAction::Add,
        (_, _) if force => CheckoutAction::Overwrite,
        _ => CheckoutAction::Conflict,
    }
}

/// A file in checkout scope, relative to its output root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopedFile {
    pub relative: PathBuf,
    pub hash_info: HashInfo,
}

/// Everything under a requested sub-path of an output
#[derive(Debug, Clone, Default)]
pub struct Scope {
    pub files: Vec<ScopedFile>,
    /// Directories to create even if they hold no files, relative to the
    /// output root
    pub directories: Vec<PathBuf>,
    /// Tree objects visited, ancestors of the sub-path included
    pub trees: Vec<HashInfo>,
}

impl Scope {
    /// Every object needed to materialize this scope
    pub fn objects(&self) -> impl Iterator<Item = &HashInfo> {
        self.trees.iter().chain(self.files.iter().map(|f| &f.hash_info))
    }
}

/// Resolve the scope of `filter` (components relative to the output root)
/// inside the tree rooted at `root`
///
/// Requires the tree objects along the way to be present locally; blobs do
/// not need to be. A filter that names nothing in the tree yields an empty
/// scope.
pub fn collect_scope(
    store: &ObjectStore,
    root: &HashInfo,
    filter: &[String],
) -> Result<Scope, StorageError> {
    let mut scope = Scope::default();

    let mut current = root.clone();
    let mut relative = PathBuf::new();
    for name in filter {
        if !current.is_dir() {
            return Ok(Scope::default());
        }
        let tree = store.require_tree(&current)?;
        scope.trees.push(current.clone());
        match tree.get(name) {
            Some(entry) => {
                current = entry.hash_info.clone();
                relative.push(name);
            }
            None => return Ok(Scope::default()),
        }
    }

    collect_subtree(store, &current, relative, &mut scope)?;
    Ok(scope)
}

fn collect_subtree(
    store: &ObjectStore,
    hash: &HashInfo,
    relative: PathBuf,
    scope: &mut Scope,
) -> Result<(), StorageError> {
    if !hash.is_dir() {
        scope.files.push(ScopedFile {
            relative,
            hash_info: hash.clone(),
        });
        return Ok(());
    }
    let tree = store.require_tree(hash)?;
    scope.trees.push(hash.clone());
    if tree.is_empty() {
        scope.directories.push(relative.clone());
    }
    for entry in tree.entries() {
        collect_subtree(store, &entry.hash_info, relative.join(&entry.name), scope)?;
    }
    Ok(())
}
