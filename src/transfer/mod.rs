//! Transfer engine: deduplicated push and pull of objects against a remote
//!
//! Presence is always queried on the destination first, so objects already
//! there are never moved twice. Individual objects fail on their own after
//! their retries are exhausted; only an unavailable remote aborts a batch.

pub mod backend;
pub mod local;

pub use backend::{open_backend, ObjectBackend};
pub use local::LocalRemote;

use crate::error::{ObjectFailure, TransferError};
use crate::store::ObjectStore;
use crate::types::HashInfo;
use futures::stream::{self, StreamExt};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, instrument, warn};

/// Above this many presence checks, list the remote once instead
const LIST_THRESHOLD: usize = 512;

/// Part of a hash tree to transfer: everything below `filter` inside the
/// tree rooted at `root`, plus the tree objects along the way
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferScope {
    pub root: HashInfo,
    pub filter: Vec<String>,
}

impl TransferScope {
    pub fn whole(root: HashInfo) -> Self {
        Self {
            root,
            filter: Vec::new(),
        }
    }
}

/// Outcome of one push or fetch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferReport {
    /// Distinct objects newly stored on the destination
    pub transferred: usize,
    pub failed: Vec<ObjectFailure>,
}

impl TransferReport {
    pub fn merge(&mut self, other: TransferReport) {
        self.transferred += other.transferred;
        self.failed.extend(other.failed);
    }

    /// Nothing moved and something failed
    pub fn is_total_failure(&self) -> bool {
        self.transferred == 0 && !self.failed.is_empty()
    }

    fn into_result(self) -> Result<Self, TransferError> {
        if self.is_total_failure() {
            Err(TransferError::AllFailed {
                failures: self.failed,
            })
        } else {
            Ok(self)
        }
    }
}

/// Retry and concurrency settings
#[derive(Debug, Clone, Copy)]
pub struct TransferSettings {
    pub jobs: usize,
    pub retries: u32,
    pub retry_delay: Duration,
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self {
            jobs: 4,
            retries: 3,
            retry_delay: Duration::from_millis(200),
        }
    }
}

/// A tree object scheduled for push, with the in-scope children it depends on
struct PlannedTree {
    depth: usize,
    children: Vec<HashInfo>,
}

#[derive(Default)]
struct PushPlan {
    blobs: BTreeSet<HashInfo>,
    trees: BTreeMap<HashInfo, PlannedTree>,
    /// Trees referenced in scope but absent from the local cache
    virtual_trees: BTreeSet<HashInfo>,
}

pub struct TransferEngine {
    local: Arc<ObjectStore>,
    remote: Arc<dyn ObjectBackend>,
    settings: TransferSettings,
}

impl TransferEngine {
    pub fn new(local: Arc<ObjectStore>, remote: Arc<dyn ObjectBackend>, settings: TransferSettings) -> Self {
        Self {
            local,
            remote,
            settings: TransferSettings {
                jobs: settings.jobs.max(1),
                ..settings
            },
        }
    }

    /// Run `op`, retrying non-fatal errors with exponential backoff
    async fn with_retry<T, F, Fut>(&self, hash: &HashInfo, mut op: F) -> Result<T, TransferError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, TransferError>>,
    {
        let mut attempt = 0u32;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_fatal() => return Err(e),
                Err(TransferError::NotFound(h)) => return Err(TransferError::NotFound(h)),
                Err(e) if attempt < self.settings.retries => {
                    let delay = self.settings.retry_delay * 2u32.saturating_pow(attempt);
                    warn!(
                        hash = %hash.short(),
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transfer attempt failed, retrying"
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    // ---- push ----

    /// Push every object in the given scopes that the remote lacks
    #[instrument(skip(self, scopes), fields(remote = %self.remote.name(), scopes = scopes.len()))]
    pub async fn push(&self, scopes: &[TransferScope]) -> Result<TransferReport, TransferError> {
        let plan = self.plan_push(scopes).map_err(|e| TransferError::RemoteUnavailable {
            remote: self.remote.name().to_string(),
            reason: format!("cannot read local cache: {}", e),
        })?;

        let mut candidates: Vec<HashInfo> = plan.blobs.iter().cloned().collect();
        candidates.extend(plan.trees.keys().cloned());
        candidates.extend(plan.virtual_trees.iter().cloned());
        let (present, mut failed) = self.remote_presence(&candidates).await?;

        let mut report = TransferReport::default();
        let mut failed_set: HashSet<HashInfo> = failed.iter().map(|f| f.hash.clone()).collect();

        for hash in &plan.virtual_trees {
            if !present.contains(hash) && !failed_set.contains(hash) {
                failed.push(missing_locally(hash));
                failed_set.insert(hash.clone());
            }
        }

        // Blobs first
        let mut uploads = Vec::new();
        for hash in &plan.blobs {
            if present.contains(hash) || failed_set.contains(hash) {
                continue;
            }
            if self.local.exists(hash) {
                uploads.push(hash.clone());
            } else {
                failed.push(missing_locally(hash));
                failed_set.insert(hash.clone());
            }
        }
        self.upload_batch(uploads, &mut report, &mut failed, &mut failed_set)
            .await?;

        // Then trees, deepest first: a tree never reaches the remote before
        // the children it references
        let mut by_depth: BTreeMap<usize, Vec<&HashInfo>> = BTreeMap::new();
        for (hash, tree) in &plan.trees {
            by_depth.entry(tree.depth).or_default().push(hash);
        }
        for (_, hashes) in by_depth.into_iter().rev() {
            let mut uploads = Vec::new();
            for hash in hashes {
                if present.contains(hash) || failed_set.contains(hash) {
                    continue;
                }
                let blocked = plan.trees[hash]
                    .children
                    .iter()
                    .any(|child| failed_set.contains(child));
                if blocked {
                    failed.push(ObjectFailure {
                        hash: hash.clone(),
                        reason: "not pushed: a descendant failed".to_string(),
                    });
                    failed_set.insert(hash.clone());
                } else {
                    uploads.push(hash.clone());
                }
            }
            self.upload_batch(uploads, &mut report, &mut failed, &mut failed_set)
                .await?;
        }

        report.failed = failed;
        info!(
            transferred = report.transferred,
            failed = report.failed.len(),
            "Push finished"
        );
        report.into_result()
    }

    fn plan_push(&self, scopes: &[TransferScope]) -> Result<PushPlan, crate::error::StorageError> {
        let mut plan = PushPlan::default();
        for scope in scopes {
            self.plan_node(&scope.root, &scope.filter, 0, &mut plan)?;
        }
        debug!(
            blobs = plan.blobs.len(),
            trees = plan.trees.len(),
            virtual_trees = plan.virtual_trees.len(),
            "Planned push"
        );
        Ok(plan)
    }

    fn plan_node(
        &self,
        hash: &HashInfo,
        filter: &[String],
        depth: usize,
        plan: &mut PushPlan,
    ) -> Result<(), crate::error::StorageError> {
        if !hash.is_dir() {
            plan.blobs.insert(hash.clone());
            return Ok(());
        }
        let Some(tree) = self.local.load_tree(hash)? else {
            plan.virtual_trees.insert(hash.clone());
            return Ok(());
        };

        let children: Vec<(HashInfo, &[String])> = match filter.split_first() {
            Some((name, rest)) => tree
                .get(name)
                .map(|entry| vec![(entry.hash_info.clone(), rest)])
                .unwrap_or_default(),
            None => tree.entries().map(|e| (e.hash_info.clone(), filter)).collect(),
        };

        let entry = plan.trees.entry(hash.clone()).or_insert(PlannedTree {
            depth,
            children: Vec::new(),
        });
        entry.depth = entry.depth.max(depth);
        for (child, _) in &children {
            if !entry.children.contains(child) {
                entry.children.push(child.clone());
            }
        }

        for (child, rest) in children {
            self.plan_node(&child, rest, depth + 1, plan)?;
        }
        Ok(())
    }

    /// Which candidates the remote already holds
    async fn remote_presence(
        &self,
        candidates: &[HashInfo],
    ) -> Result<(HashSet<HashInfo>, Vec<ObjectFailure>), TransferError> {
        let unique: BTreeSet<&HashInfo> = candidates.iter().collect();
        if unique.len() > LIST_THRESHOLD {
            debug!(candidates = unique.len(), "Listing remote instead of checking each object");
            match self.remote.list("").await {
                Ok(listed) => {
                    let listed: HashSet<HashInfo> = listed.into_iter().collect();
                    let present = unique
                        .into_iter()
                        .filter(|h| listed.contains(*h))
                        .cloned()
                        .collect();
                    return Ok((present, Vec::new()));
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(error = %e, "Remote listing failed, checking objects one by one");
                }
            }
        }

        let results: Vec<(HashInfo, Result<bool, TransferError>)> = stream::iter(unique)
            .map(|hash| async move {
                let result = self.with_retry(hash, move || self.remote.exists(hash)).await;
                (hash.clone(), result)
            })
            .buffer_unordered(self.settings.jobs)
            .collect()
            .await;

        let mut present = HashSet::new();
        let mut failed = Vec::new();
        for (hash, result) in results {
            match result {
                Ok(true) => {
                    present.insert(hash);
                }
                Ok(false) => {}
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => failed.push(ObjectFailure {
                    hash,
                    reason: e.to_string(),
                }),
            }
        }
        Ok((present, failed))
    }

    async fn upload_batch(
        &self,
        hashes: Vec<HashInfo>,
        report: &mut TransferReport,
        failed: &mut Vec<ObjectFailure>,
        failed_set: &mut HashSet<HashInfo>,
    ) -> Result<(), TransferError> {
        let results: Vec<(HashInfo, Result<(), TransferError>)> = stream::iter(hashes)
            .map(|hash| async move {
                let result = self.upload_one(&hash).await;
                (hash, result)
            })
            .buffer_unordered(self.settings.jobs)
            .collect()
            .await;

        for (hash, result) in results {
            match result {
                Ok(()) => {
                    debug!(hash = %hash.short(), "Pushed object");
                    report.transferred += 1;
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(hash = %hash.short(), error = %e, "Object push failed");
                    failed.push(ObjectFailure {
                        hash: hash.clone(),
                        reason: e.to_string(),
                    });
                    failed_set.insert(hash);
                }
            }
        }
        Ok(())
    }

    async fn upload_one(&self, hash: &HashInfo) -> Result<(), TransferError> {
        let data = self.local.get(hash).map_err(|e| TransferError::Object {
            hash: hash.clone(),
            reason: e.to_string(),
        })?;
        self.with_retry(hash, move || self.remote.put(hash, data.clone()))
            .await
    }

    // ---- fetch ----

    /// Fetch every object in the given scopes that the local cache lacks
    #[instrument(skip(self, scopes), fields(remote = %self.remote.name(), scopes = scopes.len()))]
    pub async fn fetch(&self, scopes: &[TransferScope]) -> Result<TransferReport, TransferError> {
        let report = self.fetch_scopes(scopes, true).await?;
        info!(
            fetched = report.transferred,
            failed = report.failed.len(),
            "Fetch finished"
        );
        report.into_result()
    }

    /// Fetch only the tree objects reachable from `roots` (structure, no
    /// content)
    ///
    /// Failures are reported but never turned into `AllFailed`: a missing
    /// structure object only degrades local knowledge.
    pub async fn fetch_trees(&self, roots: &[HashInfo]) -> Result<TransferReport, TransferError> {
        let scopes: Vec<_> = roots.iter().cloned().map(TransferScope::whole).collect();
        self.fetch_scopes(&scopes, false).await
    }

    async fn fetch_scopes(
        &self,
        scopes: &[TransferScope],
        include_blobs: bool,
    ) -> Result<TransferReport, TransferError> {
        let mut report = TransferReport::default();
        let mut seen: HashSet<(HashInfo, Vec<String>)> = HashSet::new();
        let mut blobs: BTreeSet<HashInfo> = BTreeSet::new();
        let mut level: Vec<(HashInfo, Vec<String>)> = scopes
            .iter()
            .map(|s| (s.root.clone(), s.filter.clone()))
            .collect();

        while !level.is_empty() {
            level.retain(|item| seen.insert(item.clone()));

            let missing_trees: BTreeSet<HashInfo> = level
                .iter()
                .filter(|(hash, _)| hash.is_dir() && !self.local.exists(hash))
                .map(|(hash, _)| hash.clone())
                .collect();
            self.download_batch(missing_trees.into_iter().collect(), &mut report)
                .await?;

            let mut next = Vec::new();
            for (hash, filter) in &level {
                if !hash.is_dir() {
                    if include_blobs {
                        blobs.insert(hash.clone());
                    }
                    continue;
                }
                let tree = match self.local.load_tree(hash) {
                    Ok(Some(tree)) => tree,
                    // Download failed and was already reported
                    Ok(None) => continue,
                    Err(e) => {
                        report.failed.push(ObjectFailure {
                            hash: hash.clone(),
                            reason: e.to_string(),
                        });
                        continue;
                    }
                };
                match filter.split_first() {
                    Some((name, rest)) => {
                        if let Some(entry) = tree.get(name) {
                            next.push((entry.hash_info.clone(), rest.to_vec()));
                        }
                    }
                    None => {
                        for entry in tree.entries() {
                            next.push((entry.hash_info.clone(), Vec::new()));
                        }
                    }
                }
            }
            level = next;
        }

        let missing_blobs: Vec<HashInfo> = blobs
            .into_iter()
            .filter(|hash| !self.local.exists(hash))
            .collect();
        self.download_batch(missing_blobs, &mut report).await?;
        Ok(report)
    }

    async fn download_batch(
        &self,
        hashes: Vec<HashInfo>,
        report: &mut TransferReport,
    ) -> Result<(), TransferError> {
        let results: Vec<(HashInfo, Result<(), TransferError>)> = stream::iter(hashes)
            .map(|hash| async move {
                let result = self.download_one(&hash).await;
                (hash, result)
            })
            .buffer_unordered(self.settings.jobs)
            .collect()
            .await;

        for (hash, result) in results {
            match result {
                Ok(()) => {
                    debug!(hash = %hash.short(), "Fetched object");
                    report.transferred += 1;
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(hash = %hash.short(), error = %e, "Object fetch failed");
                    report.failed.push(ObjectFailure {
                        hash,
                        reason: e.to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    async fn download_one(&self, hash: &HashInfo) -> Result<(), TransferError> {
        self.with_retry(hash, move || async move {
            let data = self.remote.get(hash).await?;
            // Verified before it enters the cache
            self.local
                .put(hash, &data)
                .map(|_| ())
                .map_err(|e| TransferError::Object {
                    hash: hash.clone(),
                    reason: e.to_string(),
                })
        })
        .await
    }
}

fn missing_locally(hash: &HashInfo) -> ObjectFailure {
    ObjectFailure {
        hash: hash.clone(),
        reason: "missing from local cache and from the remote".to_string(),
    }
}
