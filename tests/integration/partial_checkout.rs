//! Pulling and checking out sub-paths of tracked directories

use super::test_utils::{targets, TestWorkspace};
use lode::error::RepoError;
use lode::repo::{OperationOptions, StatusKind};
use lode::types::Meta;
use std::path::PathBuf;

async fn pushed_workspace() -> TestWorkspace {
    let ws = TestWorkspace::new();
    ws.write("dir/foo", "foo");
    ws.write("dir/subdir/lorem", "lorem");
    ws.write("dir/subdir/deeper/ipsum", "ipsum");
    ws.add("dir").await;
    ws.push().await;
    ws.clear_cache();
    ws.remove("dir");
    ws
}

#[tokio::test]
async fn test_pull_sub_path_materializes_only_it() {
    let ws = pushed_workspace().await;
    let options = OperationOptions::default();

    let summary = ws
        .repo
        .pull(&targets(&["dir/subdir"]), &options)
        .await
        .unwrap();
    assert!(summary.failed.is_empty());
    assert!(summary.failures.is_empty());
    // root tree, subdir tree, deeper tree, lorem, ipsum
    assert_eq!(summary.fetched, 5);
    assert_eq!(ws.read("dir/subdir/lorem"), "lorem");
    assert_eq!(ws.read("dir/subdir/deeper/ipsum"), "ipsum");
    assert!(!ws.exists("dir/foo"));

    let status = ws.repo.status(&[], &options).unwrap();
    assert_eq!(status[0].kind, StatusKind::Partial);
    assert!(!status[0].cached);

    // The rest arrives later without fetching anything twice
    let summary = ws.repo.pull(&[], &options).await.unwrap();
    assert_eq!(summary.fetched, 1);
    assert_eq!(summary.checkout.added, vec![PathBuf::from("dir/foo")]);
    assert_eq!(summary.checkout.unchanged, 2);
    assert_eq!(ws.repo.status(&[], &options).unwrap()[0].kind, StatusKind::Unchanged);
}

#[tokio::test]
async fn test_update_inside_partial_checkout() {
    let ws = pushed_workspace().await;
    let options = OperationOptions::default();
    ws.repo
        .pull(&targets(&["dir/subdir"]), &options)
        .await
        .unwrap();

    ws.write("dir/subdir/new", "new!!");
    ws.add("dir/subdir/new").await;
    // foo stays virtual but its size is still part of the aggregate
    assert_eq!(ws.unit("dir.lode").outs[0].meta, Meta::directory(Some(18), Some(4)));
    assert!(!ws.exists("dir/foo"));

    // new, the subdir tree and the root tree
    assert_eq!(ws.push().await, 3);
}

#[tokio::test]
async fn test_checkout_sub_path_from_cache() {
    let ws = TestWorkspace::new();
    ws.write("dir/foo", "foo");
    ws.write("dir/subdir/lorem", "lorem");
    ws.add("dir").await;
    ws.remove("dir");

    let result = ws
        .repo
        .checkout(&targets(&["dir/subdir"]), &OperationOptions::default())
        .await
        .unwrap();
    assert!(result.is_ok());
    assert_eq!(
        result.processed[0].added,
        vec![PathBuf::from("dir/subdir/lorem")]
    );
    assert!(!ws.exists("dir/foo"));
}

#[tokio::test]
async fn test_checkout_refuses_to_clobber_without_force() {
    let ws = TestWorkspace::new();
    ws.write("dir/foo", "foo");
    ws.write("dir/bar", "bar");
    ws.add("dir").await;
    ws.write("dir/foo", "local edit");
    ws.remove("dir/bar");

    let result = ws
        .repo
        .checkout(&[], &OperationOptions::default())
        .await
        .unwrap();
    assert!(matches!(result.failures[0].1, RepoError::CheckoutConflict(_)));
    // Nothing was written, not even the missing file
    assert!(!ws.exists("dir/bar"));
    assert_eq!(ws.read("dir/foo"), "local edit");

    let forced = OperationOptions {
        force: true,
        ..OperationOptions::default()
    };
    let result = ws.repo.checkout(&[], &forced).await.unwrap();
    assert!(result.is_ok());
    assert_eq!(ws.read("dir/foo"), "foo");
    assert_eq!(ws.read("dir/bar"), "bar");
}

#[tokio::test]
async fn test_pull_of_untracked_target_fails() {
    let ws = pushed_workspace().await;
    assert!(matches!(
        ws.repo
            .pull(&targets(&["elsewhere"]), &OperationOptions::default())
            .await,
        Err(RepoError::TargetNotTracked(_))
    ));
}
