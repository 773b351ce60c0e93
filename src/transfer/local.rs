//! Directory remote using the object store layout

use crate::error::{StorageError, TransferError};
use crate::store::objects::list_objects_in;
use crate::store::ObjectStore;
use crate::transfer::backend::ObjectBackend;
use crate::types::HashInfo;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task;

/// A remote that is a plain directory (local disk, NFS mount, ...)
pub struct LocalRemote {
    name: String,
    root: PathBuf,
    store: Arc<ObjectStore>,
}

impl LocalRemote {
    pub fn open(name: &str, root: PathBuf) -> Result<Self, TransferError> {
        let store = ObjectStore::new(&root).map_err(|e| TransferError::RemoteUnavailable {
            remote: name.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            name: name.to_string(),
            root,
            store: Arc::new(store),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn check_available(&self) -> Result<(), TransferError> {
        if self.root.is_dir() {
            Ok(())
        } else {
            Err(TransferError::RemoteUnavailable {
                remote: self.name.clone(),
                reason: format!("{} is not a directory", self.root.display()),
            })
        }
    }

    /// Run a blocking store operation off the async runtime
    async fn blocking<T, F>(&self, hash: Option<&HashInfo>, op: F) -> Result<T, TransferError>
    where
        T: Send + 'static,
        F: FnOnce(&ObjectStore) -> Result<T, TransferError> + Send + 'static,
    {
        self.check_available()?;
        let store = Arc::clone(&self.store);
        task::spawn_blocking(move || op(&store))
            .await
            .map_err(|e| match hash {
                Some(hash) => TransferError::Object {
                    hash: hash.clone(),
                    reason: format!("worker failed: {}", e),
                },
                None => TransferError::RemoteUnavailable {
                    remote: self.name.clone(),
                    reason: format!("worker failed: {}", e),
                },
            })?
    }
}

fn object_error(hash: &HashInfo, err: StorageError) -> TransferError {
    match err {
        StorageError::ObjectNotFound(_) => TransferError::NotFound(hash.clone()),
        other => TransferError::Object {
            hash: hash.clone(),
            reason: other.to_string(),
        },
    }
}

#[async_trait]
impl ObjectBackend for LocalRemote {
    fn name(&self) -> &str {
        &self.name
    }

    async fn exists(&self, hash: &HashInfo) -> Result<bool, TransferError> {
        let owned = hash.clone();
        self.blocking(Some(hash), move |store| Ok(store.exists(&owned)))
            .await
    }

    async fn get(&self, hash: &HashInfo) -> Result<Vec<u8>, TransferError> {
        let owned = hash.clone();
        self.blocking(Some(hash), move |store| {
            store.get(&owned).map_err(|e| object_error(&owned, e))
        })
        .await
    }

    async fn put(&self, hash: &HashInfo, data: Vec<u8>) -> Result<(), TransferError> {
        let owned = hash.clone();
        self.blocking(Some(hash), move |store| {
            store
                .put(&owned, &data)
                .map(|_| ())
                .map_err(|e| object_error(&owned, e))
        })
        .await
    }

    async fn list(&self, prefix: &str) -> Result<Vec<HashInfo>, TransferError> {
        let prefix = prefix.to_string();
        let remote = self.name.clone();
        let root = self.root.clone();
        self.blocking(None, move |_| {
            list_objects_in(&root, &prefix).map_err(|e| TransferError::RemoteUnavailable {
                remote,
                reason: e.to_string(),
            })
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::hasher::compute_content_hash;
    use crate::types::HashAlgorithm;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_put_get_list() {
        let temp_dir = TempDir::new().unwrap();
        let remote = LocalRemote::open("origin", temp_dir.path().join("remote")).unwrap();
        let hash = compute_content_hash(HashAlgorithm::Blake3, b"foo");

        assert!(!remote.exists(&hash).await.unwrap());
        remote.put(&hash, b"foo".to_vec()).await.unwrap();
        assert!(remote.exists(&hash).await.unwrap());
        assert_eq!(remote.get(&hash).await.unwrap(), b"foo");

        let prefix = &hash.value[..4];
        assert_eq!(remote.list(prefix).await.unwrap(), vec![hash.clone()]);
        assert!(remote.list("zz").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_object_and_vanished_remote() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("remote");
        let remote = LocalRemote::open("origin", root.clone()).unwrap();
        let hash = compute_content_hash(HashAlgorithm::Blake3, b"absent");

        assert!(matches!(
            remote.get(&hash).await,
            Err(TransferError::NotFound(_))
        ));

        std::fs::remove_dir_all(&root).unwrap();
        let err = remote.exists(&hash).await.unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_put_rejects_corrupt_bytes() {
        let temp_dir = TempDir::new().unwrap();
        let remote = LocalRemote::open("origin", temp_dir.path().join("remote")).unwrap();
        let hash = compute_content_hash(HashAlgorithm::Blake3, b"foo");
        assert!(matches!(
            remote.put(&hash, b"bar".to_vec()).await,
            Err(TransferError::Object { .. })
        ));
    }
}
