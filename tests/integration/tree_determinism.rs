//! Integration tests for tree building determinism

use lode::store::ObjectStore;
use lode::tree::TreeBuilder;
use lode::types::{HashAlgorithm, HashInfo, Meta};
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn build(store: &ObjectStore, path: &Path) -> (HashInfo, Meta) {
    TreeBuilder::new(store, HashAlgorithm::Blake3)
        .build(path)
        .unwrap()
}

/// Test that the same filesystem produces the same root hash
#[test]
fn test_same_filesystem_same_root() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path().join("data");
    fs::create_dir_all(root.join("dir1")).unwrap();
    fs::write(root.join("file1.txt"), "content1").unwrap();
    fs::write(root.join("file2.txt"), "content2").unwrap();
    fs::write(root.join("dir1").join("file3.txt"), "content3").unwrap();
    let store = ObjectStore::new(temp_dir.path().join("cache")).unwrap();

    let (root1, meta) = build(&store, &root);
    let (root2, _) = build(&store, &root);
    assert_eq!(root1, root2);
    assert!(root1.is_dir());
    assert_eq!(meta, Meta::directory(Some(24), Some(3)));
}

/// Creation order and location do not matter, only names and content
#[test]
fn test_creation_order_does_not_matter() {
    let temp_dir = TempDir::new().unwrap();
    let store = ObjectStore::new(temp_dir.path().join("cache")).unwrap();

    let first = temp_dir.path().join("first");
    fs::create_dir_all(first.join("sub")).unwrap();
    fs::write(first.join("a"), "a").unwrap();
    fs::write(first.join("sub/b"), "b").unwrap();
    fs::write(first.join("c"), "c").unwrap();

    let second = temp_dir.path().join("elsewhere/second");
    fs::create_dir_all(&second).unwrap();
    fs::write(second.join("c"), "c").unwrap();
    fs::create_dir_all(second.join("sub")).unwrap();
    fs::write(second.join("sub/b"), "b").unwrap();
    fs::write(second.join("a"), "a").unwrap();

    assert_eq!(build(&store, &first), build(&store, &second));
}

/// Test that file content changes produce different root hashes
#[test]
fn test_file_content_change_different_root() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path().join("data");
    fs::create_dir_all(&root).unwrap();
    fs::write(root.join("test.txt"), "content1").unwrap();
    let store = ObjectStore::new(temp_dir.path().join("cache")).unwrap();

    let (root1, _) = build(&store, &root);
    fs::write(root.join("test.txt"), "content2").unwrap();
    let (root2, _) = build(&store, &root);
    assert_ne!(root1, root2);
}

/// A renamed file changes the tree even with identical content
#[test]
fn test_rename_different_root() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path().join("data");
    fs::create_dir_all(&root).unwrap();
    fs::write(root.join("old.txt"), "content").unwrap();
    let store = ObjectStore::new(temp_dir.path().join("cache")).unwrap();

    let (root1, _) = build(&store, &root);
    fs::rename(root.join("old.txt"), root.join("new.txt")).unwrap();
    let (root2, _) = build(&store, &root);
    assert_ne!(root1, root2);
}

/// Empty directories are part of the structure
#[test]
fn test_empty_directory_addition_different_root() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path().join("data");
    fs::create_dir_all(&root).unwrap();
    fs::write(root.join("file1.txt"), "content").unwrap();
    let store = ObjectStore::new(temp_dir.path().join("cache")).unwrap();

    let (root1, _) = build(&store, &root);
    fs::create_dir(root.join("empty")).unwrap();
    let (root2, meta) = build(&store, &root);
    assert_ne!(root1, root2);
    assert_eq!(meta.file_count, Some(1));
}

/// Each algorithm has its own digest space
#[test]
fn test_algorithms_do_not_collide() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path().join("data");
    fs::create_dir_all(&root).unwrap();
    fs::write(root.join("file"), "content").unwrap();
    let store = ObjectStore::new(temp_dir.path().join("cache")).unwrap();

    let (blake, _) = build(&store, &root);
    let (sha, _) = TreeBuilder::new(&store, HashAlgorithm::Sha256)
        .build(&root)
        .unwrap();
    assert_ne!(blake, sha);
    assert_eq!(sha.algorithm, HashAlgorithm::Sha256);
    assert!(store.exists(&blake) && store.exists(&sha));
}
