//! Configuration System
//!
//! Layered configuration: built-in defaults, the user's global file, the
//! workspace files under `.lode/`, then `LODE__SECTION__KEY` environment
//! variables.

use crate::error::RepoError;
use crate::logging::LoggingConfig;
use crate::transfer::TransferSettings;
use crate::tree::walker::WalkerConfig;
use crate::types::HashAlgorithm;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

mod facade;
mod merge;
mod sources;

pub use facade::ConfigLoader;
pub use sources::global_file::global_config_path;

/// Workspace metadata directory
pub const LODE_DIR: &str = ".lode";

/// Root configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LodeConfig {
    #[serde(default)]
    pub core: CoreConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub transfer: TransferConfig,

    /// Named remotes
    #[serde(default)]
    pub remotes: BTreeMap<String, RemoteConfig>,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoreConfig {
    /// `blake3` or `sha256`
    #[serde(default = "default_hash_algorithm")]
    pub hash_algorithm: String,

    /// Parallel transfers
    #[serde(default = "default_jobs")]
    pub jobs: usize,

    /// Extra names skipped when walking outputs, on top of `.git` and `.lode`
    #[serde(default)]
    pub ignore: Vec<String>,

    /// Remote used when an operation does not name one
    #[serde(default)]
    pub default_remote: Option<String>,
}

fn default_hash_algorithm() -> String {
    HashAlgorithm::default().as_str().to_string()
}

fn default_jobs() -> usize {
    4
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            hash_algorithm: default_hash_algorithm(),
            jobs: default_jobs(),
            ignore: Vec::new(),
            default_remote: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Object cache location; relative paths are resolved against the
    /// workspace root. Defaults to `.lode/cache`.
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferConfig {
    #[serde(default = "default_retries")]
    pub retries: u32,

    /// Base delay, doubled on every attempt
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

fn default_retries() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    200
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            retries: default_retries(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

/// A remote object store: `file:///abs/path` or a plain directory path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteConfig {
    pub url: String,
}

/// Configuration validation errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    Core(String),
    Remote(String, String),
    Logging(String),
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::Core(msg) => write!(f, "Core: {}", msg),
            ValidationError::Remote(name, msg) => write!(f, "Remote '{}': {}", name, msg),
            ValidationError::Logging(msg) => write!(f, "Logging: {}", msg),
        }
    }
}

impl std::error::Error for ValidationError {}

impl LodeConfig {
    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if let Err(e) = self.core.hash_algorithm.parse::<HashAlgorithm>() {
            errors.push(ValidationError::Core(e));
        }
        if self.core.jobs == 0 {
            errors.push(ValidationError::Core("jobs must be at least 1".to_string()));
        }
        if let Some(name) = &self.core.default_remote {
            if !self.remotes.contains_key(name) {
                errors.push(ValidationError::Core(format!(
                    "default_remote '{}' is not defined under [remotes]",
                    name
                )));
            }
        }

        for (name, remote) in &self.remotes {
            if remote.url.trim().is_empty() {
                errors.push(ValidationError::Remote(name.clone(), "url is empty".to_string()));
            }
        }

        if !matches!(self.logging.format.as_str(), "json" | "text") {
            errors.push(ValidationError::Logging(format!(
                "unknown format '{}'",
                self.logging.format
            )));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// `validate`, folded into a single `RepoError`
    pub fn ensure_valid(&self) -> Result<(), RepoError> {
        self.validate().map_err(|errors| {
            let error_msgs: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
            RepoError::ConfigError(format!(
                "Configuration validation failed:\n{}",
                error_msgs.join("\n")
            ))
        })
    }

    pub fn hash_algorithm(&self) -> Result<HashAlgorithm, RepoError> {
        self.core
            .hash_algorithm
            .parse()
            .map_err(RepoError::ConfigError)
    }

    /// Object cache directory for a workspace
    pub fn cache_dir(&self, workspace_root: &Path) -> PathBuf {
        match &self.cache.dir {
            Some(dir) if dir.is_absolute() => dir.clone(),
            Some(dir) => workspace_root.join(dir),
            None => workspace_root.join(LODE_DIR).join("cache"),
        }
    }

    pub fn walker_config(&self) -> WalkerConfig {
        let mut walker = WalkerConfig::default();
        for pattern in &self.core.ignore {
            if !walker.ignore_patterns.contains(pattern) {
                walker.ignore_patterns.push(pattern.clone());
            }
        }
        walker
    }

    /// Transfer tuning; `jobs` overrides `core.jobs` when given
    pub fn transfer_settings(&self, jobs: Option<usize>) -> TransferSettings {
        TransferSettings {
            jobs: jobs.unwrap_or(self.core.jobs).max(1),
            retries: self.transfer.retries,
            retry_delay: Duration::from_millis(self.transfer.retry_delay_ms),
        }
    }

    /// Resolve a remote by name, falling back to `core.default_remote`
    pub fn remote(&self, name: Option<&str>) -> Result<(String, &RemoteConfig), RepoError> {
        let name = name
            .or(self.core.default_remote.as_deref())
            .ok_or(RepoError::NoRemote)?;
        let remote = self.remotes.get(name).ok_or_else(|| {
            RepoError::ConfigError(format!("Remote '{}' is not defined", name))
        })?;
        Ok((name.to_string(), remote))
    }

    pub fn has_remote(&self) -> bool {
        self.core.default_remote.is_some()
    }

    pub fn to_toml(&self) -> Result<String, RepoError> {
        toml::to_string_pretty(self).map_err(|e| RepoError::ConfigError(e.to_string()))
    }
}
