//! Granular commits on directories whose content is only partly known locally

use super::test_utils::TestWorkspace;
use lode::error::{RepoError, StorageError};
use lode::repo::OperationOptions;
use lode::tree::hasher::compute_content_hash;
use lode::types::{HashAlgorithm, Meta};
use std::fs;
use std::path::PathBuf;

#[tokio::test]
async fn test_add_into_cleared_cache() {
    let ws = TestWorkspace::new();
    ws.write("dir/foo", "foo");
    ws.write("dir/bar", "bar");
    ws.add("dir").await;
    assert_eq!(ws.unit("dir.lode").outs[0].meta, Meta::directory(Some(6), Some(2)));
    // foo, bar and the root tree
    assert_eq!(ws.push().await, 3);

    ws.clear_cache();
    ws.write("dir/foobar", "foobar");
    ws.write("dir/lorem", "ipsum");
    ws.write("dir/subdir/file", "file");

    ws.add("dir/foobar").await;
    let out = &ws.unit("dir.lode").outs[0];
    assert_eq!(out.meta, Meta::directory(Some(12), Some(3)));
    // The new root tree and foobar; foo and bar are already remote
    assert_eq!(ws.push().await, 2);

    ws.add("dir/subdir").await;
    let out = &ws.unit("dir.lode").outs[0];
    assert_eq!(out.meta, Meta::directory(Some(16), Some(4)));
    // file, the subdir tree and the new root tree
    assert_eq!(ws.push().await, 3);
}

#[tokio::test]
async fn test_remove_from_cleared_cache() {
    let ws = TestWorkspace::new();
    ws.write("dir/foo", "foo");
    ws.write("dir/bar", "bar");
    ws.write("dir/subdir/lorem", "lorem");
    ws.write("dir/subdir/ipsum", "ipsum");
    ws.add("dir").await;
    assert_eq!(ws.unit("dir.lode").outs[0].meta, Meta::directory(Some(16), Some(4)));
    ws.push().await;

    ws.clear_cache();
    ws.remove("dir/foo");
    ws.add("dir/foo").await;

    // foo's size was never known locally after the cache was cleared
    let out = &ws.unit("dir.lode").outs[0];
    assert_eq!(out.meta, Meta::directory(None, Some(3)));
    assert!(out.hash_info.as_ref().unwrap().is_dir());
    // Only the rewritten root tree is new
    assert_eq!(ws.push().await, 1);

    ws.clear_cache();
    ws.remove("dir/subdir");
    ws.add("dir/subdir").await;

    let out = &ws.unit("dir.lode").outs[0];
    assert_eq!(out.meta, Meta::directory(None, Some(1)));
    assert_eq!(ws.push().await, 1);
}

#[tokio::test]
async fn test_corrupt_cache_object_fails_commit() {
    let ws = TestWorkspace::new();
    ws.write("dir/foo", "foo");
    ws.write("dir/bar", "bar");
    ws.add("dir").await;
    let recorded = ws.unit("dir.lode").outs[0].hash_info.clone();

    let foo = compute_content_hash(HashAlgorithm::Blake3, b"foo");
    fs::write(ws.repo.store().object_path(&foo), "rot").unwrap();
    ws.write("dir/bar", "barbar");

    let result = ws
        .repo
        .commit(&[], &OperationOptions::default())
        .await
        .unwrap();
    assert!(result.processed.is_empty());
    assert_eq!(result.failures.len(), 1);
    match &result.failures[0] {
        (unit, RepoError::Integrity { path, source }) => {
            assert_eq!(unit, &PathBuf::from("dir.lode"));
            assert_eq!(path, &PathBuf::from("dir"));
            assert!(matches!(source, StorageError::HashMismatch { .. }));
        }
        other => panic!("expected an integrity failure, got {:?}", other),
    }
    assert_eq!(ws.unit("dir.lode").outs[0].hash_info, recorded);
}

#[tokio::test]
async fn test_remove_with_warm_cache_stays_exact() {
    let ws = TestWorkspace::new();
    ws.write("dir/foo", "foo");
    ws.write("dir/bar", "bar");
    ws.write("dir/subdir/lorem", "lorem");
    ws.add("dir").await;

    ws.remove("dir/subdir");
    ws.add("dir/subdir").await;
    assert_eq!(ws.unit("dir.lode").outs[0].meta, Meta::directory(Some(6), Some(2)));
}

#[tokio::test]
async fn test_granular_add_only_touches_ancestor_chain() {
    let ws = TestWorkspace::new();
    ws.write("dir/a/one", "1");
    ws.write("dir/b/two", "22");
    ws.add("dir").await;

    let before = ws.repo.store().list().unwrap();
    ws.write("dir/a/three", "333");
    ws.add("dir/a/three").await;
    let after = ws.repo.store().list().unwrap();

    // New blob, new `a` tree, new root tree; `b` is untouched
    let added: Vec<_> = after.iter().filter(|h| !before.contains(h)).collect();
    assert_eq!(added.len(), 3);
    assert_eq!(ws.unit("dir.lode").outs[0].meta, Meta::directory(Some(6), Some(3)));
}
