//! Deduplicated push/pull against a directory remote, including a remote
//! that fails on purpose

use super::test_utils::{targets, TestWorkspace};
use async_trait::async_trait;
use lode::error::{RepoError, TransferError};
use lode::repo::OperationOptions;
use lode::store::ObjectStore;
use lode::transfer::{LocalRemote, ObjectBackend, TransferEngine, TransferScope, TransferSettings};
use lode::tree::TreeBuilder;
use lode::types::{HashAlgorithm, HashInfo};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

#[tokio::test]
async fn test_repush_transfers_nothing() {
    let ws = TestWorkspace::new();
    ws.write("dir/a", "same");
    ws.write("dir/b", "same");
    ws.write("dir/c", "other");
    ws.add("dir").await;

    // One blob for both copies of "same", one for "other", one tree
    assert_eq!(ws.push().await, 3);
    assert_eq!(ws.push().await, 0);
}

#[tokio::test]
async fn test_push_sub_path_then_whole() {
    let ws = TestWorkspace::new();
    ws.write("dir/keep/one", "1");
    ws.write("dir/later/two", "2");
    ws.add("dir").await;

    let report = ws
        .repo
        .push(&targets(&["dir/keep"]), &OperationOptions::default())
        .await
        .unwrap();
    // The root tree, keep's tree and its blob
    assert_eq!(report.transferred, 3);
    assert_eq!(ws.push().await, 2);
}

#[tokio::test]
async fn test_pull_after_push_restores_everything() {
    let ws = TestWorkspace::new();
    ws.write("model.bin", "weights");
    ws.write("dir/x", "x");
    ws.add("model.bin").await;
    ws.add("dir").await;
    ws.push().await;

    ws.clear_cache();
    ws.remove("model.bin");
    ws.remove("dir");

    let summary = ws.repo.pull(&[], &OperationOptions::default()).await.unwrap();
    assert_eq!(summary.fetched, 3);
    assert_eq!(ws.read("model.bin"), "weights");
    assert_eq!(ws.read("dir/x"), "x");
}

#[tokio::test]
async fn test_push_recreates_remote_directory() {
    let ws = TestWorkspace::new();
    ws.write("dir/a", "a");
    ws.add("dir").await;
    fs::remove_dir_all(&ws.remote).ok();

    // Opening the remote creates it again
    assert_eq!(ws.push().await, 2);
}

#[tokio::test]
async fn test_fetch_without_objects_anywhere_fails() {
    let ws = TestWorkspace::new();
    ws.write("dir/a", "a");
    ws.add("dir").await;
    ws.clear_cache();

    match ws.repo.fetch(&[], &OperationOptions::default()).await {
        Err(RepoError::Transfer(TransferError::AllFailed { failures })) => {
            assert_eq!(failures.len(), 1)
        }
        other => panic!("expected AllFailed, got {:?}", other),
    }
}

/// Directory remote that misbehaves for chosen objects
struct FlakyRemote {
    inner: LocalRemote,
    /// Remaining failures per object; `u32::MAX` never recovers
    put_failures: Mutex<HashMap<HashInfo, u32>>,
    offline: bool,
    listing_broken: bool,
}

impl FlakyRemote {
    fn new(dir: &TempDir) -> Self {
        Self {
            inner: LocalRemote::open("flaky", dir.path().join("remote")).unwrap(),
            put_failures: Mutex::new(HashMap::new()),
            offline: false,
            listing_broken: false,
        }
    }

    fn fail_puts(&self, hash: &HashInfo, times: u32) {
        self.put_failures.lock().insert(hash.clone(), times);
    }
}

#[async_trait]
impl ObjectBackend for FlakyRemote {
    fn name(&self) -> &str {
        "flaky"
    }

    async fn exists(&self, hash: &HashInfo) -> Result<bool, TransferError> {
        if self.offline {
            return Err(TransferError::RemoteUnavailable {
                remote: "flaky".to_string(),
                reason: "connection refused".to_string(),
            });
        }
        self.inner.exists(hash).await
    }

    async fn get(&self, hash: &HashInfo) -> Result<Vec<u8>, TransferError> {
        self.inner.get(hash).await
    }

    async fn put(&self, hash: &HashInfo, data: Vec<u8>) -> Result<(), TransferError> {
        {
            let mut failures = self.put_failures.lock();
            if let Some(remaining) = failures.get_mut(hash) {
                if *remaining > 0 {
                    *remaining = remaining.saturating_sub(1);
                    return Err(TransferError::Object {
                        hash: hash.clone(),
                        reason: "simulated timeout".to_string(),
                    });
                }
            }
        }
        self.inner.put(hash, data).await
    }

    async fn list(&self, prefix: &str) -> Result<Vec<HashInfo>, TransferError> {
        if self.listing_broken {
            return Err(TransferError::Listing {
                remote: "flaky".to_string(),
                reason: "listing timed out".to_string(),
            });
        }
        self.inner.list(prefix).await
    }
}

struct Cached {
    _dir: TempDir,
    store: Arc<ObjectStore>,
    root: HashInfo,
    blob_a: HashInfo,
}

/// `data/{a, sub/b}` built into a fresh cache
fn cached_tree() -> Cached {
    let dir = TempDir::new().unwrap();
    fs::create_dir_all(dir.path().join("data/sub")).unwrap();
    fs::write(dir.path().join("data/a"), "a").unwrap();
    fs::write(dir.path().join("data/sub/b"), "b").unwrap();
    let store = Arc::new(ObjectStore::new(dir.path().join("cache")).unwrap());
    let (root, _) = TreeBuilder::new(&store, HashAlgorithm::Blake3)
        .build(&dir.path().join("data"))
        .unwrap();
    let blob_a = lode::tree::hasher::compute_content_hash(HashAlgorithm::Blake3, b"a");
    Cached {
        _dir: dir,
        store,
        root,
        blob_a,
    }
}

fn settings(retries: u32) -> TransferSettings {
    TransferSettings {
        jobs: 2,
        retries,
        retry_delay: Duration::from_millis(1),
    }
}

#[tokio::test]
async fn test_transient_failures_are_retried() {
    let cached = cached_tree();
    let remote_dir = TempDir::new().unwrap();
    let remote = Arc::new(FlakyRemote::new(&remote_dir));
    remote.fail_puts(&cached.blob_a, 2);

    let engine = TransferEngine::new(Arc::clone(&cached.store), remote.clone(), settings(3));
    let report = engine
        .push(&[TransferScope::whole(cached.root.clone())])
        .await
        .unwrap();
    assert!(report.failed.is_empty());
    // a, b, sub tree, root tree
    assert_eq!(report.transferred, 4);
}

#[tokio::test]
async fn test_failed_blob_blocks_its_ancestors_only() {
    let cached = cached_tree();
    let remote_dir = TempDir::new().unwrap();
    let remote = Arc::new(FlakyRemote::new(&remote_dir));
    remote.fail_puts(&cached.blob_a, u32::MAX);

    let engine = TransferEngine::new(Arc::clone(&cached.store), remote.clone(), settings(1));
    let report = engine
        .push(&[TransferScope::whole(cached.root.clone())])
        .await
        .unwrap();
    // b and the sub tree made it; a failed and the root waits for it
    assert_eq!(report.transferred, 2);
    let failed: Vec<_> = report.failed.iter().map(|f| f.hash.clone()).collect();
    assert_eq!(failed.len(), 2);
    assert!(failed.contains(&cached.blob_a));
    assert!(failed.contains(&cached.root));
    assert!(!remote.inner.exists(&cached.root).await.unwrap());
}

#[tokio::test]
async fn test_unavailable_remote_aborts() {
    let cached = cached_tree();
    let remote_dir = TempDir::new().unwrap();
    let mut remote = FlakyRemote::new(&remote_dir);
    remote.offline = true;

    let engine = TransferEngine::new(Arc::clone(&cached.store), Arc::new(remote), settings(3));
    assert!(matches!(
        engine.push(&[TransferScope::whole(cached.root.clone())]).await,
        Err(TransferError::RemoteUnavailable { .. })
    ));
}

#[tokio::test]
async fn test_broken_listing_falls_back_to_exists() {
    let dir = TempDir::new().unwrap();
    let data = dir.path().join("data");
    fs::create_dir_all(&data).unwrap();
    for i in 0..600 {
        fs::write(data.join(format!("f{:03}", i)), format!("content {}", i)).unwrap();
    }
    let store = Arc::new(ObjectStore::new(dir.path().join("cache")).unwrap());
    let (root, _) = TreeBuilder::new(&store, HashAlgorithm::Blake3)
        .build(&data)
        .unwrap();

    let remote_dir = TempDir::new().unwrap();
    let mut remote = FlakyRemote::new(&remote_dir);
    remote.listing_broken = true;
    let remote = Arc::new(remote);
    let engine = TransferEngine::new(Arc::clone(&store), remote.clone(), settings(1));

    let first = engine.push(&[TransferScope::whole(root.clone())]).await.unwrap();
    assert!(first.failed.is_empty());
    assert_eq!(first.transferred, 601);

    let again = engine.push(&[TransferScope::whole(root)]).await.unwrap();
    assert_eq!(again.transferred, 0);
}
