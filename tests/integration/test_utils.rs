//! Shared test utilities for integration tests
//!
//! A workspace in a temp dir, wired to a directory remote in a second temp
//! dir, with the configuration built in code so no user or environment
//! config leaks in.

use lode::config::{LodeConfig, RemoteConfig};
use lode::repo::{OperationOptions, Repo};
use lode::unit::Unit;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub struct TestWorkspace {
    _dir: TempDir,
    _remote_dir: TempDir,
    pub repo: Repo,
    pub remote: PathBuf,
}

impl TestWorkspace {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let remote_dir = TempDir::new().unwrap();
        let root = dunce::canonicalize(dir.path()).unwrap();
        let remote = dunce::canonicalize(remote_dir.path()).unwrap().join("store");
        fs::create_dir_all(root.join(".lode")).unwrap();

        let mut config = LodeConfig::default();
        config.remotes.insert(
            "storage".to_string(),
            RemoteConfig {
                url: format!("file://{}", remote.display()),
            },
        );
        config.core.default_remote = Some("storage".to_string());
        config.transfer.retry_delay_ms = 1;

        let repo = Repo::with_config(root, config).unwrap();
        Self {
            _dir: dir,
            _remote_dir: remote_dir,
            repo,
            remote,
        }
    }

    pub fn root(&self) -> &Path {
        self.repo.root()
    }

    pub fn write(&self, rel: &str, content: &str) {
        let path = self.root().join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    pub fn exists(&self, rel: &str) -> bool {
        self.root().join(rel).exists()
    }

    pub fn read(&self, rel: &str) -> String {
        fs::read_to_string(self.root().join(rel)).unwrap()
    }

    pub fn remove(&self, rel: &str) {
        let path = self.root().join(rel);
        if path.is_dir() {
            fs::remove_dir_all(path).unwrap();
        } else {
            fs::remove_file(path).unwrap();
        }
    }

    /// Drop every object from the local cache
    pub fn clear_cache(&self) {
        self.repo.store().clear().unwrap();
    }

    pub fn unit(&self, rel: &str) -> Unit {
        Unit::load(self.root(), Path::new(rel)).unwrap()
    }

    pub async fn add(&self, rel: &str) {
        let result = self
            .repo
            .add(&[PathBuf::from(rel)], &OperationOptions::default())
            .await
            .unwrap();
        assert!(result.is_ok(), "add {} failed: {:?}", rel, result.failures);
    }

    pub async fn push(&self) -> usize {
        self.repo
            .push(&[], &OperationOptions::default())
            .await
            .unwrap()
            .transferred
    }
}

pub fn targets(paths: &[&str]) -> Vec<PathBuf> {
    paths.iter().map(PathBuf::from).collect()
}
