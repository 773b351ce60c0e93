//! Granular target resolution: map user targets onto `(unit, sub-path)` pairs

use crate::error::RepoError;
use crate::repo::OperationOptions;
use crate::unit::Unit;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::debug;

/// One unit in scope of an operation
///
/// `filter = None` means the whole unit. Otherwise it is a workspace-relative
/// path strictly inside one of the unit's directory outputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GranularTarget {
    pub unit: PathBuf,
    pub filter: Option<PathBuf>,
}

/// Resolve one workspace-relative target against the known units
pub fn resolve(
    units: &[Unit],
    target: &Path,
    options: &OperationOptions,
) -> Result<Vec<GranularTarget>, RepoError> {
    let mut resolved = Vec::new();

    for unit in units {
        if unit.path == target {
            resolved.push(whole(unit));
            continue;
        }
        for out in &unit.outs {
            if out.path == target {
                resolved.push(whole(unit));
            } else if target.starts_with(&out.path) {
                resolved.push(GranularTarget {
                    unit: unit.path.clone(),
                    filter: Some(target.to_path_buf()),
                });
            }
        }
    }

    if resolved.is_empty() && options.recursive {
        for unit in units {
            if unit.outs.iter().any(|out| out.path.starts_with(target)) {
                resolved.push(whole(unit));
            }
        }
    }

    if resolved.is_empty() {
        return Err(RepoError::TargetNotTracked(target.to_path_buf()));
    }

    if options.with_deps {
        resolved = expand_deps(units, resolved);
    }
    debug!(target = %target.display(), resolved = resolved.len(), "Resolved target");
    Ok(merge(resolved))
}

/// Resolve several targets; an empty list means every unit
pub fn resolve_all(
    units: &[Unit],
    targets: &[PathBuf],
    options: &OperationOptions,
) -> Result<Vec<GranularTarget>, RepoError> {
    if targets.is_empty() {
        let all: Vec<_> = units.iter().map(whole).collect();
        return Ok(if options.with_deps {
            merge(expand_deps(units, all))
        } else {
            all
        });
    }
    let mut resolved = Vec::new();
    for target in targets {
        resolved.extend(resolve(units, target, options)?);
    }
    Ok(merge(resolved))
}

fn whole(unit: &Unit) -> GranularTarget {
    GranularTarget {
        unit: unit.path.clone(),
        filter: None,
    }
}

/// Follow `deps` edges to the units owning those paths, transitively
fn expand_deps(units: &[Unit], mut targets: Vec<GranularTarget>) -> Vec<GranularTarget> {
    let mut queue: Vec<PathBuf> = targets.iter().map(|t| t.unit.clone()).collect();
    let mut seen: Vec<PathBuf> = queue.clone();

    while let Some(unit_path) = queue.pop() {
        let Some(unit) = units.iter().find(|u| u.path == unit_path) else {
            continue;
        };
        for dep in &unit.deps {
            for owner in units.iter().filter(|u| u.owning_output(dep).is_some()) {
                if !seen.contains(&owner.path) {
                    seen.push(owner.path.clone());
                    queue.push(owner.path.clone());
                    targets.push(whole(owner));
                }
            }
        }
    }
    targets
}

/// Deduplicate, keeping first-seen order; a whole-unit entry subsumes that
/// unit's sub-path entries
fn merge(targets: Vec<GranularTarget>) -> Vec<GranularTarget> {
    let mut whole_units: BTreeSet<PathBuf> = BTreeSet::new();
    for target in &targets {
        if target.filter.is_none() {
            whole_units.insert(target.unit.clone());
        }
    }

    let mut merged: Vec<GranularTarget> = Vec::new();
    for target in targets {
        if target.filter.is_some() && whole_units.contains(&target.unit) {
            continue;
        }
        if !merged.contains(&target) {
            merged.push(target);
        }
    }
    merged
}
