//! Remote object backend capability

use crate::config::RemoteConfig;
use crate::error::{RepoError, TransferError};
use crate::transfer::local::LocalRemote;
use crate::types::HashInfo;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;

/// Object storage on the far side of a push or pull
///
/// Implementations only move opaque bytes keyed by hash. Verification and
/// ordering are the transfer engine's job.
#[async_trait]
pub trait ObjectBackend: Send + Sync {
    /// Remote name, for logs and errors
    fn name(&self) -> &str;

    async fn exists(&self, hash: &HashInfo) -> Result<bool, TransferError>;

    /// Fetch an object; `TransferError::NotFound` when it is absent
    async fn get(&self, hash: &HashInfo) -> Result<Vec<u8>, TransferError>;

    /// Store an object. Storing an existing hash is a no-op.
    async fn put(&self, hash: &HashInfo, data: Vec<u8>) -> Result<(), TransferError>;

    /// Every object whose value starts with `prefix`
    async fn list(&self, prefix: &str) -> Result<Vec<HashInfo>, TransferError>;
}

/// Open the backend for a configured remote
///
/// Only directory remotes are supported: `file:///abs/path` or a plain path.
/// Relative paths are resolved against `base` (the workspace root).
pub fn open_backend(
    name: &str,
    config: &RemoteConfig,
    base: &std::path::Path,
) -> Result<Arc<dyn ObjectBackend>, RepoError> {
    let url = config.url.trim();
    let path = match url.split_once("://") {
        Some(("file", rest)) => PathBuf::from(rest),
        Some((scheme, _)) => {
            return Err(RepoError::ConfigError(format!(
                "Remote '{}' uses unsupported scheme '{}' (only file:// and plain paths)",
                name, scheme
            )))
        }
        None => PathBuf::from(url),
    };
    if path.as_os_str().is_empty() {
        return Err(RepoError::ConfigError(format!("Remote '{}' has an empty url", name)));
    }
    let path = if path.is_absolute() { path } else { base.join(path) };
    let remote = LocalRemote::open(name, path)?;
    Ok(Arc::new(remote))
}
