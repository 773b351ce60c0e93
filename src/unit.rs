//! Units: the persisted metadata files (`*.lode`) that own tracked outputs
//!
//! A unit file is TOML:
//!
//! ```toml
//! deps = ["raw/input.csv"]
//!
//! [[outs]]
//! path = "dir"
//! is_directory = true
//! size = 6
//! file_count = 2
//! cache = true
//!
//! [outs.hash]
//! algorithm = "blake3"
//! value = "<hex digest>.dir"
//! ```
//!
//! Paths inside the file are relative to the unit file's directory. In
//! memory every path is relative to the workspace root.

use crate::error::RepoError;
use crate::store::atomic::atomic_write;
use crate::tree::path::{lexical_normalize, split_components};
use crate::tree::walker::WalkerConfig;
use crate::types::{HashInfo, Meta};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

pub const UNIT_FILE_SUFFIX: &str = ".lode";

/// A tracked file or directory, owned by exactly one unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Output {
    /// Workspace-relative path
    pub path: PathBuf,
    /// `None` until the output has been committed once
    pub hash_info: Option<HashInfo>,
    pub meta: Meta,
    /// Whether content blobs go into the object store
    pub cache: bool,
}

impl Output {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            hash_info: None,
            meta: Meta::default(),
            cache: true,
        }
    }

    /// Whether `path` is this output or lies inside it
    pub fn contains(&self, path: &Path) -> bool {
        path.starts_with(&self.path)
    }

    /// Components of `path` below this output, if it lies inside it
    pub fn relative_filter(&self, path: &Path) -> Option<Vec<String>> {
        let rest = path.strip_prefix(&self.path).ok()?;
        split_components(rest).ok()
    }
}

/// A unit file and the outputs it owns
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unit {
    /// Workspace-relative path of the unit file
    pub path: PathBuf,
    pub outs: Vec<Output>,
    /// Workspace-relative paths this unit depends on
    pub deps: Vec<PathBuf>,
}

#[derive(Debug, Serialize, Deserialize)]
struct UnitFile {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    deps: Vec<String>,
    #[serde(default)]
    outs: Vec<OutputRecord>,
}

#[derive(Debug, Serialize, Deserialize)]
struct OutputRecord {
    path: String,
    #[serde(default)]
    is_directory: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    file_count: Option<u32>,
    #[serde(default = "default_cache")]
    cache: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    hash: Option<HashInfo>,
}

fn default_cache() -> bool {
    true
}

fn to_slash(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy().to_string())
        .collect::<Vec<_>>()
        .join("/")
}

impl Unit {
    /// New unit tracking a single output, stored next to it as `<output>.lode`
    pub fn for_output(output_path: &Path) -> Self {
        let mut name = output_path.as_os_str().to_os_string();
        name.push(UNIT_FILE_SUFFIX);
        Self {
            path: PathBuf::from(name),
            outs: vec![Output::new(output_path)],
            deps: Vec::new(),
        }
    }

    /// Directory the unit file lives in, relative to the workspace
    fn base_dir(&self) -> PathBuf {
        self.path.parent().map(Path::to_path_buf).unwrap_or_default()
    }

    /// Load a unit file (path relative to `root`)
    pub fn load(root: &Path, path: &Path) -> Result<Self, RepoError> {
        let full = root.join(path);
        let raw = fs::read_to_string(&full).map_err(|e| RepoError::UnitFile {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let file: UnitFile = toml::from_str(&raw).map_err(|e| RepoError::UnitFile {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let mut unit = Unit {
            path: path.to_path_buf(),
            outs: Vec::new(),
            deps: Vec::new(),
        };
        let base = unit.base_dir();
        for record in file.outs {
            let out_path = lexical_normalize(&base.join(&record.path));
            if out_path.as_os_str().is_empty() || out_path.starts_with("..") {
                return Err(RepoError::UnitFile {
                    path: path.to_path_buf(),
                    reason: format!("output path escapes the workspace: {}", record.path),
                });
            }
            if let Some(hash) = &record.hash {
                if !hash.is_well_formed() {
                    return Err(RepoError::UnitFile {
                        path: path.to_path_buf(),
                        reason: format!("malformed hash for {}: {}", record.path, hash.value),
                    });
                }
            }
            unit.outs.push(Output {
                path: out_path,
                hash_info: record.hash,
                meta: Meta {
                    is_directory: record.is_directory,
                    size: record.size,
                    file_count: record.file_count,
                },
                cache: record.cache,
            });
        }
        unit.deps = file
            .deps
            .iter()
            .map(|d| lexical_normalize(&base.join(d)))
            .collect();
        Ok(unit)
    }

    /// Rewrite the unit file wholesale
    ///
    /// The new content is written to a temp file and renamed into place, so a
    /// crash leaves either the old file or the new one.
    pub fn dump(&self, root: &Path) -> Result<(), RepoError> {
        let base = self.base_dir();
        let relative = |p: &Path| -> String {
            match p.strip_prefix(&base) {
                Ok(rest) => to_slash(rest),
                // Outside the unit's directory: keep it workspace-relative via `..`
                Err(_) => {
                    let ups = base.components().count();
                    let mut up = PathBuf::new();
                    for _ in 0..ups {
                        up.push("..");
                    }
                    to_slash(&up.join(p))
                }
            }
        };

        let file = UnitFile {
            deps: self.deps.iter().map(|d| relative(d)).collect(),
            outs: self
                .outs
                .iter()
                .map(|out| OutputRecord {
                    path: relative(&out.path),
                    is_directory: out.meta.is_directory,
                    size: out.meta.size,
                    file_count: out.meta.file_count,
                    cache: out.cache,
                    hash: out.hash_info.clone(),
                })
                .collect(),
        };
        let text = toml::to_string_pretty(&file).map_err(|e| RepoError::UnitFile {
            path: self.path.clone(),
            reason: e.to_string(),
        })?;
        atomic_write(&root.join(&self.path), text.as_bytes())?;
        debug!(unit = %self.path.display(), outs = self.outs.len(), "Dumped unit");
        Ok(())
    }

    /// The output owning `path` (equal to it or containing it)
    pub fn owning_output(&self, path: &Path) -> Option<&Output> {
        self.outs.iter().find(|out| out.contains(path))
    }
}

/// Find and load every unit file in the workspace, sorted by path
pub fn discover_units(root: &Path, walker_config: &WalkerConfig) -> Result<Vec<Unit>, RepoError> {
    let mut units = Vec::new();
    let walker = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            if entry.depth() == 0 || !entry.file_type().is_dir() {
                return true;
            }
            let name = entry.file_name().to_string_lossy();
            !walker_config.is_ignored(&name)
        });

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Skipping unreadable entry during unit discovery: {}", e);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        if !entry.file_name().to_string_lossy().ends_with(UNIT_FILE_SUFFIX) {
            continue;
        }
        let relative = match entry.path().strip_prefix(root) {
            Ok(rel) => rel.to_path_buf(),
            Err(_) => continue,
        };
        units.push(Unit::load(root, &relative)?);
    }
    debug!(count = units.len(), "Discovered units");
    Ok(units)
}
