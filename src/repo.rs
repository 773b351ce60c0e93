//! Workspace facade: ties units, the object cache, the state index and
//! remotes together into the user-level operations

pub mod lock;

use crate::checkout::{CheckoutReport, Materializer};
use crate::commit::CommitEngine;
use crate::config::{ConfigLoader, LodeConfig, LODE_DIR};
use crate::error::{ObjectFailure, RepoError, StorageError, TransferError};
use crate::granular::{self, GranularTarget};
use crate::store::{ObjectStore, SledStateIndex};
use crate::transfer::{open_backend, TransferEngine, TransferReport, TransferScope};
use crate::tree::hydration::{collect_scope, Hydration};
use crate::tree::path::{lexical_normalize, relative_to};
use crate::tree::{walker, TreeBuilder};
use crate::types::HashInfo;
use crate::unit::{discover_units, Output, Unit};
use lock::RepoLock;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Flags shared by the workspace operations
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OperationOptions {
    /// A target that is a plain directory selects every unit below it
    pub recursive: bool,
    /// Also select the units producing each selected unit's deps
    pub with_deps: bool,
    /// Commit: keep the recorded state of outputs that are gone
    pub allow_missing: bool,
    /// Checkout: overwrite modified files
    pub force: bool,
    /// Parallel transfers, overriding `core.jobs`
    pub jobs: Option<usize>,
    /// Remote name, overriding `core.default_remote`
    pub remote: Option<String>,
}

/// Per-unit outcome of a batch operation; one unit failing does not stop
/// the others
#[derive(Debug)]
pub struct BatchResult<T> {
    pub processed: Vec<T>,
    pub failures: Vec<(PathBuf, RepoError)>,
}

impl<T> Default for BatchResult<T> {
    fn default() -> Self {
        Self {
            processed: Vec::new(),
            failures: Vec::new(),
        }
    }
}

impl<T> BatchResult<T> {
    pub fn is_ok(&self) -> bool {
        self.failures.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct PullSummary {
    /// Objects downloaded
    pub fetched: usize,
    pub checkout: CheckoutReport,
    /// Objects that could not be downloaded
    pub failed: Vec<ObjectFailure>,
    /// Units that could not be checked out
    pub failures: Vec<(PathBuf, RepoError)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusKind {
    /// Working copy matches the recorded hash
    Unchanged,
    /// Working copy holds content the recorded hash does not describe
    Modified,
    /// Some tracked files are virtual, every materialized one matches
    Partial,
    /// Output path does not exist
    Missing,
    /// Output has never been committed
    NotCommitted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputStatus {
    pub unit: PathBuf,
    pub path: PathBuf,
    pub kind: StatusKind,
    /// Every object of the recorded hash is in the local cache
    pub cached: bool,
}

const GITIGNORE: &str = "/cache\n/state\n/lock\n/config.local.toml\n/lode.log\n";

/// An open workspace
pub struct Repo {
    root: PathBuf,
    config: LodeConfig,
    store: Arc<ObjectStore>,
    state: SledStateIndex,
}

impl Repo {
    /// Create `.lode/` in `root`; an existing workspace is just opened
    pub fn init(root: &Path) -> Result<Self, RepoError> {
        let root = dunce::canonicalize(root)?;
        let lode_dir = root.join(LODE_DIR);
        if lode_dir.is_dir() {
            debug!(root = %root.display(), "Workspace already initialized");
            return Self::open_at(root);
        }

        fs::create_dir_all(lode_dir.join("cache"))?;
        crate::store::atomic::atomic_write(
            &lode_dir.join("config.toml"),
            LodeConfig::default().to_toml()?.as_bytes(),
        )?;
        crate::store::atomic::atomic_write(&lode_dir.join(".gitignore"), GITIGNORE.as_bytes())?;
        info!(root = %root.display(), "Initialized workspace");
        Self::open_at(root)
    }

    /// Open the workspace containing `path`, searching upwards
    pub fn open(path: &Path) -> Result<Self, RepoError> {
        Self::open_at(Self::discover(path)?)
    }

    /// Root of the workspace containing `path`
    pub fn discover(path: &Path) -> Result<PathBuf, RepoError> {
        let start = dunce::canonicalize(path)?;
        start
            .ancestors()
            .find(|dir| dir.join(LODE_DIR).is_dir())
            .map(Path::to_path_buf)
            .ok_or_else(|| RepoError::NotARepository(start.clone()))
    }

    fn open_at(root: PathBuf) -> Result<Self, RepoError> {
        let config = ConfigLoader::load(&root)?;
        Self::with_config(root, config)
    }

    /// Open with an explicit configuration instead of the layered files
    pub fn with_config(root: PathBuf, config: LodeConfig) -> Result<Self, RepoError> {
        config.ensure_valid()?;
        let store = Arc::new(ObjectStore::new(config.cache_dir(&root))?);
        let state = SledStateIndex::new(root.join(LODE_DIR).join("state"))?;
        debug!(root = %root.display(), cache = %store.root().display(), "Opened workspace");
        Ok(Self {
            root,
            config,
            store,
            state,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &LodeConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<ObjectStore> {
        &self.store
    }

    pub fn state_index(&self) -> &SledStateIndex {
        &self.state
    }

    /// Every unit in the workspace
    pub fn units(&self) -> Result<Vec<Unit>, RepoError> {
        discover_units(&self.root, &self.config.walker_config())
    }

    fn lock(&self) -> Result<RepoLock, RepoError> {
        RepoLock::acquire(&self.root.join(LODE_DIR).join("lock"))
    }

    /// Workspace-relative form of an absolute or workspace-relative path
    fn workspace_path(&self, target: &Path) -> Result<PathBuf, RepoError> {
        let relative = match relative_to(&self.root, target) {
            Ok(relative) => relative,
            // The target may reach the workspace through a symlink
            Err(e) => match dunce::canonicalize(target) {
                Ok(resolved) => relative_to(&self.root, &resolved)?,
                Err(_) => return Err(e.into()),
            },
        };
        if relative.starts_with(LODE_DIR) {
            return Err(StorageError::InvalidPath(format!(
                "{} is inside the workspace metadata directory",
                target.display()
            ))
            .into());
        }
        Ok(relative)
    }

    fn commit_engine(&self) -> Result<CommitEngine<'_>, RepoError> {
        Ok(
            CommitEngine::new(&self.root, &self.store, self.config.hash_algorithm()?)
                .with_state_index(&self.state)
                .with_walker_config(self.config.walker_config()),
        )
    }

    fn materializer(&self) -> Materializer<'_> {
        Materializer::new(&self.root, &self.store).with_state_index(&self.state)
    }

    fn transfer_engine(&self, options: &OperationOptions) -> Result<TransferEngine, RepoError> {
        let (name, remote) = self.config.remote(options.remote.as_deref())?;
        let backend = open_backend(&name, remote, &self.root)?;
        Ok(TransferEngine::new(
            Arc::clone(&self.store),
            backend,
            self.config.transfer_settings(options.jobs),
        ))
    }

    fn has_remote(&self, options: &OperationOptions) -> bool {
        options.remote.is_some() || self.config.has_remote()
    }

    /// Resolve targets into per-unit work, keeping unresolvable targets as
    /// failures
    fn resolve_targets(
        &self,
        units: &[Unit],
        targets: &[PathBuf],
        options: &OperationOptions,
        failures: &mut Vec<(PathBuf, RepoError)>,
    ) -> BTreeMap<PathBuf, Vec<Option<PathBuf>>> {
        let mut resolved: Vec<GranularTarget> = Vec::new();
        if targets.is_empty() {
            match granular::resolve_all(units, &[], options) {
                Ok(all) => resolved = all,
                Err(e) => failures.push((self.root.clone(), e)),
            }
        }
        for target in targets {
            let outcome = self
                .workspace_path(target)
                .and_then(|rel| granular::resolve(units, &rel, options));
            match outcome {
                Ok(found) => resolved.extend(found),
                Err(e) => failures.push((target.clone(), e)),
            }
        }

        let mut by_unit: BTreeMap<PathBuf, Vec<Option<PathBuf>>> = BTreeMap::new();
        for target in resolved {
            let filters = by_unit.entry(target.unit).or_default();
            if !filters.contains(&target.filter) {
                filters.push(target.filter);
            }
        }
        // A whole-unit request subsumes its sub-paths
        for filters in by_unit.values_mut() {
            if filters.contains(&None) {
                *filters = vec![None];
            }
        }
        by_unit
    }

    // ---- add / commit ----

    /// Start tracking new paths; paths inside an existing output are
    /// committed granularly instead
    #[instrument(skip(self, options), fields(targets = targets.len()))]
    pub async fn add(
        &self,
        targets: &[PathBuf],
        options: &OperationOptions,
    ) -> Result<BatchResult<PathBuf>, RepoError> {
        let _lock = self.lock()?;
        let units = self.units()?;
        let mut result = BatchResult::default();
        let mut granular_targets = Vec::new();

        for target in targets {
            let rel = match self.workspace_path(target) {
                Ok(rel) if rel.as_os_str().is_empty() => {
                    result.failures.push((
                        target.clone(),
                        StorageError::InvalidPath("cannot track the workspace root".to_string())
                            .into(),
                    ));
                    continue;
                }
                Ok(rel) => rel,
                Err(e) => {
                    result.failures.push((target.clone(), e));
                    continue;
                }
            };
            if units.iter().any(|unit| unit.owning_output(&rel).is_some()) {
                granular_targets.push(rel);
                continue;
            }
            match self.track_new(&units, &rel, options) {
                Ok(unit_path) => result.processed.push(unit_path),
                Err(e) => result.failures.push((target.clone(), e)),
            }
        }

        if !granular_targets.is_empty() {
            let committed = self.commit_units(&units, &granular_targets, options).await?;
            result.processed.extend(committed.processed);
            result.failures.extend(committed.failures);
        }
        self.state.flush()?;
        Ok(result)
    }

    fn track_new(
        &self,
        units: &[Unit],
        rel: &Path,
        options: &OperationOptions,
    ) -> Result<PathBuf, RepoError> {
        for unit in units {
            if let Some(out) = unit.outs.iter().find(|out| out.path.starts_with(rel)) {
                return Err(RepoError::AlreadyTracked {
                    path: out.path.clone(),
                    unit: unit.path.clone(),
                });
            }
        }
        if !self.root.join(rel).exists() {
            return Err(RepoError::MissingOutput(rel.to_path_buf()));
        }

        let mut unit = Unit::for_output(rel);
        self.commit_engine()?
            .commit(&mut unit, None, options.allow_missing)?;
        unit.dump(&self.root)?;
        info!(unit = %unit.path.display(), "Tracking new output");
        Ok(unit.path)
    }

    /// Record the current working copy of the targeted units, or of sub-paths
    /// inside them
    #[instrument(skip(self, options), fields(targets = targets.len()))]
    pub async fn commit(
        &self,
        targets: &[PathBuf],
        options: &OperationOptions,
    ) -> Result<BatchResult<PathBuf>, RepoError> {
        let _lock = self.lock()?;
        let units = self.units()?;
        let result = self.commit_units(&units, targets, options).await?;
        self.state.flush()?;
        Ok(result)
    }

    async fn commit_units(
        &self,
        units: &[Unit],
        targets: &[PathBuf],
        options: &OperationOptions,
    ) -> Result<BatchResult<PathBuf>, RepoError> {
        let mut result = BatchResult::default();
        let work = self.resolve_targets(units, targets, options, &mut result.failures);
        let engine = self.commit_engine()?;

        for (unit_path, filters) in work {
            let Some(mut unit) = units.iter().find(|u| u.path == unit_path).cloned() else {
                continue;
            };
            let granular_roots: Vec<HashInfo> = filters
                .iter()
                .flatten()
                .filter_map(|filter| unit.owning_output(filter))
                .filter_map(|out| out.hash_info.clone())
                .filter(|hash| hash.is_dir())
                .collect();
            if let Err(e) = self.prefetch_structure(&granular_roots, options).await {
                result.failures.push((unit_path, e));
                continue;
            }

            let mut changed = false;
            let mut failed = None;
            for filter in &filters {
                match engine.commit(&mut unit, filter.as_deref(), options.allow_missing) {
                    Ok(updated) => changed |= !updated.is_empty(),
                    Err(e) => {
                        failed = Some(e);
                        break;
                    }
                }
            }
            if let Some(e) = failed {
                result.failures.push((unit_path, e));
                continue;
            }
            if changed {
                // Dump failures abort the batch
                unit.dump(&self.root)?;
            }
            result.processed.push(unit_path);
        }
        Ok(result)
    }

    /// Bring the tree objects below `roots` into the cache before a granular
    /// commit rewrites them
    async fn prefetch_structure(
        &self,
        roots: &[HashInfo],
        options: &OperationOptions,
    ) -> Result<(), RepoError> {
        let mut needed = Vec::new();
        for root in roots {
            match collect_scope(&self.store, root, &[]) {
                Ok(_) => {}
                Err(StorageError::ObjectNotFound(_)) => needed.push(root.clone()),
                Err(e) => return Err(e.into()),
            }
        }
        if needed.is_empty() || !self.has_remote(options) {
            return Ok(());
        }
        let engine = self.transfer_engine(options)?;
        match engine.fetch_trees(&needed).await {
            Ok(report) => {
                debug!(fetched = report.transferred, "Prefetched tree structure");
            }
            Err(e) => warn!(error = %e, "Could not prefetch tree structure"),
        }
        Ok(())
    }

    // ---- checkout ----

    /// Materialize the targeted units, or sub-paths inside them; everything
    /// else in a partially checked out directory stays virtual
    #[instrument(skip(self, options), fields(targets = targets.len()))]
    pub async fn checkout(
        &self,
        targets: &[PathBuf],
        options: &OperationOptions,
    ) -> Result<BatchResult<CheckoutReport>, RepoError> {
        let _lock = self.lock()?;
        let units = self.units()?;
        let mut result = BatchResult::default();
        let work = self.resolve_targets(&units, targets, options, &mut result.failures);

        for (unit_path, filters) in work {
            let Some(unit) = units.iter().find(|u| u.path == unit_path) else {
                continue;
            };
            match self.checkout_unit(unit, &filters, options, true).await {
                Ok(report) => result.processed.push(report),
                Err(e) => result.failures.push((unit_path, e)),
            }
        }
        self.state.flush()?;
        Ok(result)
    }

    async fn checkout_unit(
        &self,
        unit: &Unit,
        filters: &[Option<PathBuf>],
        options: &OperationOptions,
        fetch_missing: bool,
    ) -> Result<CheckoutReport, RepoError> {
        let mut report = CheckoutReport::default();
        for (out, filter) in selected_outputs(unit, filters) {
            if out.hash_info.is_none() {
                warn!(output = %out.path.display(), "Output never committed, nothing to check out");
                continue;
            }
            let materializer = self.materializer();
            let outcome = match materializer.checkout(out, filter, options.force) {
                Err(RepoError::Storage(StorageError::ObjectNotFound(hash)))
                    if fetch_missing && out.cache && self.has_remote(options) =>
                {
                    debug!(hash = %hash.short(), "Object missing locally, fetching");
                    let scope = self.transfer_scope(out, filter)?;
                    self.transfer_engine(options)?.fetch(&[scope]).await?;
                    materializer.checkout(out, filter, options.force)
                }
                other => other,
            };
            report.merge(outcome?);
        }
        Ok(report)
    }

    // ---- push / fetch / pull ----

    fn transfer_scope(&self, out: &Output, filter: Option<&Path>) -> Result<TransferScope, RepoError> {
        let root = out
            .hash_info
            .clone()
            .ok_or_else(|| RepoError::MissingOutput(out.path.clone()))?;
        let filter = match filter {
            Some(filter) => out
                .relative_filter(filter)
                .ok_or_else(|| RepoError::TargetNotTracked(filter.to_path_buf()))?,
            None => Vec::new(),
        };
        Ok(TransferScope { root, filter })
    }

    fn transfer_scopes(
        &self,
        targets: &[PathBuf],
        options: &OperationOptions,
    ) -> Result<Vec<TransferScope>, RepoError> {
        let units = self.units()?;
        let mut failures = Vec::new();
        let work = self.resolve_targets(&units, targets, options, &mut failures);
        if let Some((_, e)) = failures.into_iter().next() {
            return Err(e);
        }

        let mut scopes = Vec::new();
        for (unit_path, filters) in work {
            let Some(unit) = units.iter().find(|u| u.path == unit_path) else {
                continue;
            };
            for (out, filter) in selected_outputs(unit, &filters) {
                if !out.cache || out.hash_info.is_none() {
                    continue;
                }
                let scope = self.transfer_scope(out, filter)?;
                if !scopes.contains(&scope) {
                    scopes.push(scope);
                }
            }
        }
        Ok(scopes)
    }

    /// Upload whatever the remote lacks for the targeted units
    #[instrument(skip(self, options), fields(targets = targets.len()))]
    pub async fn push(
        &self,
        targets: &[PathBuf],
        options: &OperationOptions,
    ) -> Result<TransferReport, RepoError> {
        let _lock = self.lock()?;
        let scopes = self.transfer_scopes(targets, options)?;
        let engine = self.transfer_engine(options)?;
        Ok(engine.push(&scopes).await?)
    }

    /// Download whatever the cache lacks for the targeted units, without
    /// touching the working copy
    #[instrument(skip(self, options), fields(targets = targets.len()))]
    pub async fn fetch(
        &self,
        targets: &[PathBuf],
        options: &OperationOptions,
    ) -> Result<TransferReport, RepoError> {
        let _lock = self.lock()?;
        let scopes = self.transfer_scopes(targets, options)?;
        let engine = self.transfer_engine(options)?;
        Ok(engine.fetch(&scopes).await?)
    }

    /// Fetch, then check out
    #[instrument(skip(self, options), fields(targets = targets.len()))]
    pub async fn pull(
        &self,
        targets: &[PathBuf],
        options: &OperationOptions,
    ) -> Result<PullSummary, RepoError> {
        let _lock = self.lock()?;
        let scopes = self.transfer_scopes(targets, options)?;
        let engine = self.transfer_engine(options)?;

        let mut summary = PullSummary::default();
        match engine.fetch(&scopes).await {
            Ok(report) => {
                summary.fetched = report.transferred;
                summary.failed = report.failed;
            }
            Err(TransferError::AllFailed { failures }) => summary.failed = failures,
            Err(e) => return Err(e.into()),
        }

        let units = self.units()?;
        let work = self.resolve_targets(&units, targets, options, &mut summary.failures);
        for (unit_path, filters) in work {
            let Some(unit) = units.iter().find(|u| u.path == unit_path) else {
                continue;
            };
            match self.checkout_unit(unit, &filters, options, false).await {
                Ok(report) => summary.checkout.merge(report),
                Err(e) => summary.failures.push((unit_path, e)),
            }
        }
        self.state.flush()?;
        info!(
            fetched = summary.fetched,
            added = summary.checkout.added.len(),
            failed = summary.failed.len() + summary.failures.len(),
            "Pull finished"
        );
        Ok(summary)
    }

    // ---- status ----

    /// Compare every targeted output with its recorded state
    pub fn status(
        &self,
        targets: &[PathBuf],
        options: &OperationOptions,
    ) -> Result<Vec<OutputStatus>, RepoError> {
        let units = self.units()?;
        let mut failures = Vec::new();
        let work = self.resolve_targets(&units, targets, options, &mut failures);
        if let Some((_, e)) = failures.into_iter().next() {
            return Err(e);
        }

        let mut statuses = Vec::new();
        for (unit_path, filters) in work {
            let Some(unit) = units.iter().find(|u| u.path == unit_path) else {
                continue;
            };
            for (out, _) in selected_outputs(unit, &filters) {
                if statuses
                    .iter()
                    .any(|s: &OutputStatus| s.unit == unit.path && s.path == out.path)
                {
                    continue;
                }
                statuses.push(OutputStatus {
                    unit: unit.path.clone(),
                    path: out.path.clone(),
                    kind: self.output_status(out)?,
                    cached: self.is_cached(out)?,
                });
            }
        }
        Ok(statuses)
    }

    fn output_status(&self, out: &Output) -> Result<StatusKind, RepoError> {
        let Some(hash) = &out.hash_info else {
            return Ok(StatusKind::NotCommitted);
        };
        let full = walker::resolve_entry_path(&self.root, &out.path)?;
        if !full.exists() {
            return Ok(StatusKind::Missing);
        }

        let (current, _) = TreeBuilder::new(&self.store, hash.algorithm)
            .with_state_index(&self.state)
            .with_walker_config(self.config.walker_config())
            .write_blobs(false)
            .build(&full)?;
        if &current == hash {
            return Ok(StatusKind::Unchanged);
        }
        if !hash.is_dir() {
            return Ok(StatusKind::Modified);
        }

        let materializer = self.materializer();
        let scope = match materializer.scope(out, None) {
            Ok(scope) => scope,
            Err(StorageError::ObjectNotFound(_)) => return Ok(StatusKind::Modified),
            Err(e) => return Err(e.into()),
        };
        let mut virtual_files = 0usize;
        for file in &scope.files {
            let path = walker::resolve_entry_path(&full, &file.relative)?;
            let disk = materializer.disk_state(&path, &file.hash_info)?;
            match Hydration::of_tracked(disk) {
                Hydration::Materialized => {}
                Hydration::Known if !path.exists() => virtual_files += 1,
                _ => return Ok(StatusKind::Modified),
            }
        }
        // Everything tracked matches, so the difference is either virtual
        // files or untracked extras
        Ok(if virtual_files > 0 {
            StatusKind::Partial
        } else {
            StatusKind::Modified
        })
    }

    fn is_cached(&self, out: &Output) -> Result<bool, RepoError> {
        let Some(hash) = &out.hash_info else {
            return Ok(false);
        };
        if !hash.is_dir() {
            return Ok(self.store.exists(hash));
        }
        match collect_scope(&self.store, hash, &[]) {
            Ok(scope) => Ok(scope.files.iter().all(|f| self.store.exists(&f.hash_info))),
            Err(StorageError::ObjectNotFound(_)) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

/// Outputs of `unit` selected by `filters`, each with its sub-path filter
fn selected_outputs<'u>(
    unit: &'u Unit,
    filters: &'u [Option<PathBuf>],
) -> Vec<(&'u Output, Option<&'u Path>)> {
    let mut selected = Vec::new();
    for filter in filters {
        match filter {
            None => selected.extend(unit.outs.iter().map(|out| (out, None))),
            Some(path) => {
                if let Some(out) = unit.owning_output(path) {
                    let filter = if lexical_normalize(path) == out.path {
                        None
                    } else {
                        Some(path.as_path())
                    };
                    selected.push((out, filter));
                }
            }
        }
    }
    selected
}
