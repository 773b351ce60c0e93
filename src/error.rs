//! Error types for the lode data tracking system.

use crate::types::HashInfo;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Storage-related errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Object not found in cache: {0}")]
    ObjectNotFound(HashInfo),

    #[error("Hash mismatch: expected {expected}, got {actual}")]
    HashMismatch { expected: HashInfo, actual: HashInfo },

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Corrupt object {hash}: {reason}")]
    CorruptObject { hash: HashInfo, reason: String },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("State index error: {0}")]
    StateIndex(String),

    #[error("Storage I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl StorageError {
    /// I/O error annotated with the path that caused it
    pub(crate) fn io_at(path: &std::path::Path, err: std::io::Error) -> Self {
        StorageError::IoError(std::io::Error::new(
            err.kind(),
            format!("{}: {}", path.display(), err),
        ))
    }
}

/// Errors raised while moving objects between the cache and a remote
#[derive(Debug, Clone, Error)]
pub enum TransferError {
    #[error("Remote '{remote}' unavailable: {reason}")]
    RemoteUnavailable { remote: String, reason: String },

    #[error("Transfer of {hash} failed: {reason}")]
    Object { hash: HashInfo, reason: String },

    #[error("Object {0} not found on remote")]
    NotFound(HashInfo),

    #[error("Listing remote '{remote}' failed: {reason}")]
    Listing { remote: String, reason: String },

    #[error("No objects could be transferred ({} failed)", failures.len())]
    AllFailed { failures: Vec<ObjectFailure> },
}

impl TransferError {
    /// Hard connectivity errors abort the whole batch; everything else is
    /// reported against a single object.
    pub fn is_fatal(&self) -> bool {
        matches!(self, TransferError::RemoteUnavailable { .. })
    }
}

/// One object that could not be transferred
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectFailure {
    pub hash: HashInfo,
    pub reason: String,
}

impl std::fmt::Display for ObjectFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.hash, self.reason)
    }
}

/// Operation-level errors surfaced by `Repo`
#[derive(Debug, Error)]
pub enum RepoError {
    #[error("Not a lode repository (no .lode directory found from {0})")]
    NotARepository(PathBuf),

    #[error("Target is not tracked by any unit: {0}")]
    TargetNotTracked(PathBuf),

    #[error("Output does not exist and is not in cache: {0}")]
    MissingOutput(PathBuf),

    #[error("Integrity check failed for {path}: {source}")]
    Integrity {
        path: PathBuf,
        #[source]
        source: StorageError,
    },

    #[error("Repository is locked by another process ({0})")]
    LockHeld(String),

    #[error("Checkout would overwrite modified file {0} (use --force)")]
    CheckoutConflict(PathBuf),

    #[error("Output {path} is already tracked by {unit}")]
    AlreadyTracked { path: PathBuf, unit: PathBuf },

    #[error("Invalid unit file {path}: {reason}")]
    UnitFile { path: PathBuf, reason: String },

    #[error("No remote configured (set core.default_remote or pass --remote)")]
    NoRemote,

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Transfer error: {0}")]
    Transfer(#[from] TransferError),
}

impl RepoError {
    /// Attribute a corrupt cache object to the output being processed
    pub(crate) fn at_output(self, path: &Path) -> Self {
        match self {
            RepoError::Storage(source @ StorageError::HashMismatch { .. }) => RepoError::Integrity {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        }
    }
}

impl From<config::ConfigError> for RepoError {
    fn from(err: config::ConfigError) -> Self {
        RepoError::ConfigError(err.to_string())
    }
}

impl From<std::io::Error> for RepoError {
    fn from(err: std::io::Error) -> Self {
        RepoError::Storage(StorageError::IoError(err))
    }
}
