//! Materializer: realize tracked content in the working copy
//!
//! Only the entries in scope move from `Known` to `Materialized`; the rest of
//! a partially checked out directory stays virtual. Files on disk that the
//! tree does not list are never touched.

use crate::error::{RepoError, StorageError};
use crate::store::{FileStat, ObjectStore, SledStateIndex};
use crate::tree::{hasher, walker};
use crate::tree::hydration::{collect_scope, plan_checkout, CheckoutAction, DiskState, Scope, ScopedFile};
use crate::types::HashInfo;
use crate::unit::Output;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument};

/// Workspace-relative paths touched by a checkout
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CheckoutReport {
    pub added: Vec<PathBuf>,
    pub modified: Vec<PathBuf>,
    /// Files already materialized
    pub unchanged: usize,
}

impl CheckoutReport {
    /// Nothing was written
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty()
    }

    pub fn merge(&mut self, other: CheckoutReport) {
        self.added.extend(other.added);
        self.modified.extend(other.modified);
        self.unchanged += other.unchanged;
    }
}

pub struct Materializer<'a> {
    root: &'a Path,
    store: &'a ObjectStore,
    state: Option<&'a SledStateIndex>,
}

impl<'a> Materializer<'a> {
    pub fn new(root: &'a Path, store: &'a ObjectStore) -> Self {
        Self {
            root,
            store,
            state: None,
        }
    }

    pub fn with_state_index(mut self, state: &'a SledStateIndex) -> Self {
        self.state = Some(state);
        self
    }

    /// Everything needed to materialize `filter` (workspace-relative) of an
    /// output; requires the tree objects to be local
    pub fn scope(&self, out: &Output, filter: Option<&Path>) -> Result<Scope, StorageError> {
        let Some(hash) = &out.hash_info else {
            return Ok(Scope::default());
        };
        if !hash.is_dir() {
            return Ok(Scope {
                files: vec![ScopedFile {
                    relative: PathBuf::new(),
                    hash_info: hash.clone(),
                }],
                ..Scope::default()
            });
        }
        let components = match filter {
            Some(filter) => out.relative_filter(filter).unwrap_or_default(),
            None => Vec::new(),
        };
        collect_scope(self.store, hash, &components)
    }

    /// Compare the working copy against a recorded hash
    pub fn disk_state(&self, path: &Path, expected: &HashInfo) -> Result<DiskState, StorageError> {
        let metadata = match fs::symlink_metadata(path) {
            Ok(md) => md,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(DiskState::Missing),
            Err(e) => return Err(StorageError::io_at(path, e)),
        };
        if !metadata.is_file() {
            return Ok(DiskState::Differs);
        }
        let stat = FileStat::from_metadata(&metadata);
        if let Some(state) = self.state {
            if let Some(recorded) = state.get(path, &stat)? {
                return Ok(if &recorded == expected {
                    DiskState::Matches
                } else {
                    DiskState::Differs
                });
            }
        }
        let (actual, _) = hasher::hash_file(expected.algorithm, path)?;
        if let Some(state) = self.state {
            state.put(path, stat, &actual)?;
        }
        Ok(if &actual == expected {
            DiskState::Matches
        } else {
            DiskState::Differs
        })
    }

    /// Materialize an output, or only `filter` (workspace-relative) inside it
    #[instrument(skip(self, out), fields(output = %out.path.display()))]
    pub fn checkout(
        &self,
        out: &Output,
        filter: Option<&Path>,
        force: bool,
    ) -> Result<CheckoutReport, RepoError> {
        let scope = self.scope(out, filter)?;
        let workspace_path = |relative: &Path| -> PathBuf {
            if relative.as_os_str().is_empty() {
                out.path.clone()
            } else {
                out.path.join(relative)
            }
        };

        for file in &scope.files {
            if !self.store.exists(&file.hash_info) {
                return Err(StorageError::ObjectNotFound(file.hash_info.clone()).into());
            }
        }

        // Classify everything before writing anything
        let mut plan = Vec::with_capacity(scope.files.len());
        for file in &scope.files {
            let rel = workspace_path(&file.relative);
            let dest = walker::resolve_entry_path(self.root, &rel)?;
            let disk = self.disk_state(&dest, &file.hash_info)?;
            let action = plan_checkout(disk, force);
            let blocked = action == CheckoutAction::Conflict
                || (action == CheckoutAction::Overwrite && dest.is_dir());
            if blocked {
                return Err(RepoError::CheckoutConflict(rel));
            }
            plan.push((rel, dest, file, action));
        }

        let mut report = CheckoutReport::default();
        for (rel, dest, file, action) in plan {
            match action {
                CheckoutAction::Skip => {
                    report.unchanged += 1;
                    continue;
                }
                CheckoutAction::Conflict => return Err(RepoError::CheckoutConflict(rel)),
                CheckoutAction::Add | CheckoutAction::Overwrite => {}
            }
            self.store
                .copy_to(&file.hash_info, &dest)
                .map_err(|e| RepoError::from(e).at_output(&rel))?;
            if let Some(state) = self.state {
                let metadata = fs::metadata(&dest).map_err(|e| StorageError::io_at(&dest, e))?;
                state.put(&dest, FileStat::from_metadata(&metadata), &file.hash_info)?;
            }
            debug!(path = %dest.display(), "Materialized file");
            if action == CheckoutAction::Add {
                report.added.push(rel);
            } else {
                report.modified.push(rel);
            }
        }

        for dir in &scope.directories {
            let dest = walker::resolve_entry_path(self.root, &workspace_path(dir))?;
            fs::create_dir_all(&dest).map_err(|e| StorageError::io_at(&dest, e))?;
        }

        info!(
            added = report.added.len(),
            modified = report.modified.len(),
            unchanged = report.unchanged,
            "Checkout finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commit::CommitEngine;
    use crate::types::HashAlgorithm;
    use crate::unit::Unit;
    use tempfile::TempDir;

    fn committed(root: &Path, store: &ObjectStore) -> Unit {
        fs::create_dir_all(root.join("dir/subdir")).unwrap();
        fs::write(root.join("dir/foo"), "foo").unwrap();
        fs::write(root.join("dir/subdir/lorem"), "lorem").unwrap();
        let mut unit = Unit::for_output(Path::new("dir"));
        CommitEngine::new(root, store, HashAlgorithm::Blake3)
            .commit(&mut unit, None, false)
            .unwrap();
        unit
    }

    #[test]
    fn test_partial_checkout_leaves_rest_virtual() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        let store = ObjectStore::new(root.join(".lode/cache")).unwrap();
        let unit = committed(root, &store);
        fs::remove_dir_all(root.join("dir")).unwrap();

        let materializer = Materializer::new(root, &store);
        let report = materializer
            .checkout(&unit.outs[0], Some(Path::new("dir/subdir")), false)
            .unwrap();
        assert_eq!(report.added, vec![PathBuf::from("dir/subdir/lorem")]);
        assert!(root.join("dir/subdir/lorem").exists());
        assert!(!root.join("dir/foo").exists());

        let rest = materializer.checkout(&unit.outs[0], None, false).unwrap();
        assert_eq!(rest.added, vec![PathBuf::from("dir/foo")]);
        assert_eq!(rest.unchanged, 1);
    }

    #[test]
    fn test_checkout_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        let store = ObjectStore::new(root.join(".lode/cache")).unwrap();
        let state = SledStateIndex::temporary().unwrap();
        let unit = committed(root, &store);

        let materializer = Materializer::new(root, &store).with_state_index(&state);
        let report = materializer.checkout(&unit.outs[0], None, false).unwrap();
        assert!(report.is_empty());
        assert_eq!(report.unchanged, 2);
        assert!(materializer.checkout(&unit.outs[0], None, false).unwrap().is_empty());
    }

    #[test]
    fn test_modified_file_needs_force() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        let store = ObjectStore::new(root.join(".lode/cache")).unwrap();
        let unit = committed(root, &store);
        fs::write(root.join("dir/foo"), "edited").unwrap();
        fs::write(root.join("dir/untracked"), "keep me").unwrap();

        let materializer = Materializer::new(root, &store);
        assert!(matches!(
            materializer.checkout(&unit.outs[0], None, false),
            Err(RepoError::CheckoutConflict(_))
        ));
        assert_eq!(fs::read_to_string(root.join("dir/foo")).unwrap(), "edited");

        let report = materializer.checkout(&unit.outs[0], None, true).unwrap();
        assert_eq!(report.modified, vec![PathBuf::from("dir/foo")]);
        assert_eq!(fs::read_to_string(root.join("dir/foo")).unwrap(), "foo");
        assert!(root.join("dir/untracked").exists());
    }

    #[test]
    fn test_missing_blob_is_reported() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        let store = ObjectStore::new(root.join(".lode/cache")).unwrap();
        let unit = committed(root, &store);
        let foo = hasher::compute_content_hash(HashAlgorithm::Blake3, b"foo");
        store.remove(&foo).unwrap();
        fs::remove_dir_all(root.join("dir")).unwrap();

        assert!(matches!(
            Materializer::new(root, &store).checkout(&unit.outs[0], None, false),
            Err(RepoError::Storage(StorageError::ObjectNotFound(_)))
        ));
    }

    #[test]
    fn test_forced_checkout_reuses_decomposed_name() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        let store = ObjectStore::new(root.join(".lode/cache")).unwrap();
        let decomposed = root.join("dir").join("cafe\u{301}");
        fs::create_dir_all(root.join("dir")).unwrap();
        fs::write(&decomposed, "café").unwrap();
        fs::write(root.join("dir/bar"), "bar").unwrap();
        let mut unit = Unit::for_output(Path::new("dir"));
        CommitEngine::new(root, &store, HashAlgorithm::Blake3)
            .commit(&mut unit, None, false)
            .unwrap();

        fs::write(&decomposed, "edited").unwrap();
        let materializer = Materializer::new(root, &store);
        assert!(matches!(
            materializer.checkout(&unit.outs[0], None, false),
            Err(RepoError::CheckoutConflict(_))
        ));

        let report = materializer.checkout(&unit.outs[0], None, true).unwrap();
        assert_eq!(report.modified.len(), 1);
        assert_eq!(fs::read_to_string(&decomposed).unwrap(), "café");
        assert_eq!(fs::read_dir(root.join("dir")).unwrap().count(), 2);
    }

    #[test]
    fn test_corrupt_blob_fails_checkout() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        let store = ObjectStore::new(root.join(".lode/cache")).unwrap();
        let unit = committed(root, &store);
        let foo = hasher::compute_content_hash(HashAlgorithm::Blake3, b"foo");
        fs::write(store.object_path(&foo), "rot").unwrap();
        fs::remove_dir_all(root.join("dir")).unwrap();

        match Materializer::new(root, &store).checkout(&unit.outs[0], None, false) {
            Err(RepoError::Integrity { path, source }) => {
                assert_eq!(path, PathBuf::from("dir/foo"));
                assert!(matches!(source, StorageError::HashMismatch { .. }));
            }
            other => panic!("expected an integrity error, got {:?}", other),
        }
        assert!(!root.join("dir/foo").exists());
    }
}
