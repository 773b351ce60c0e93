//! Crash-safe file replacement: write a sibling temp file, fsync, rename.

use crate::error::StorageError;
use crate::tree::hasher::ContentHasher;
use crate::types::HashInfo;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Unique temp path next to `target`, so the final rename stays on one filesystem
fn temp_path_for(target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let unique = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    target.with_file_name(format!(".{}.{}.{}.tmp", name, std::process::id(), unique))
}

/// Whether `name` has the shape of an in-flight temp file (`.name.pid.n.tmp`)
pub fn is_temp_name(name: &str) -> bool {
    let Some(inner) = name.strip_prefix('.').and_then(|n| n.strip_suffix(".tmp")) else {
        return false;
    };
    let mut parts = inner.rsplitn(3, '.');
    let counter = parts.next().unwrap_or_default();
    let pid = parts.next().unwrap_or_default();
    let original = parts.next().unwrap_or_default();
    let numeric = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    !original.is_empty() && numeric(pid) && numeric(counter)
}

fn ensure_parent(target: &Path) -> Result<(), StorageError> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).map_err(|e| StorageError::io_at(parent, e))?;
    }
    Ok(())
}

#[cfg(unix)]
fn sync_parent(target: &Path) {
    if let Some(parent) = target.parent() {
        if let Ok(dir) = File::open(parent) {
            let _ = dir.sync_all();
        }
    }
}

#[cfg(not(unix))]
fn sync_parent(_target: &Path) {}

/// Finish a temp file: rename into place, cleaning up on failure
fn commit_temp(temp: &Path, target: &Path) -> Result<(), StorageError> {
    fs::rename(temp, target).map_err(|e| {
        let _ = fs::remove_file(temp);
        StorageError::io_at(target, e)
    })?;
    sync_parent(target);
    Ok(())
}

/// Atomically replace `target` with `data`
///
/// Readers observe either the old content or the new content, never a
/// partial write.
pub fn atomic_write(target: &Path, data: &[u8]) -> Result<(), StorageError> {
    ensure_parent(target)?;
    let temp = temp_path_for(target);

    let write = || -> std::io::Result<()> {
        let mut file = File::create(&temp)?;
        file.write_all(data)?;
        file.sync_all()
    };
    if let Err(e) = write() {
        let _ = fs::remove_file(&temp);
        return Err(StorageError::io_at(&temp, e));
    }

    commit_temp(&temp, target)
}

/// Atomically copy `source` to `target`, verifying the bytes hash to `expected`
///
/// The digest is computed over the bytes actually written, so a source that
/// changes mid-copy is caught instead of landing under the wrong hash.
pub fn atomic_copy_verified(
    source: &Path,
    target: &Path,
    expected: &HashInfo,
) -> Result<u64, StorageError> {
    ensure_parent(target)?;
    let temp = temp_path_for(target);

    let copy = || -> std::io::Result<(String, u64)> {
        let mut input = File::open(source)?;
        let mut output = File::create(&temp)?;
        let mut hasher = ContentHasher::new(expected.algorithm);
        let mut buffer = vec![0u8; 64 * 1024];
        let mut total = 0u64;
        loop {
            let read = input.read(&mut buffer)?;
            if read == 0 {
                break;
            }
            hasher.update(&buffer[..read]);
            output.write_all(&buffer[..read])?;
            total += read as u64;
        }
        output.sync_all()?;
        Ok((hasher.finalize_hex(), total))
    };

    let (digest, size) = match copy() {
        Ok(result) => result,
        Err(e) => {
            let _ = fs::remove_file(&temp);
            return Err(StorageError::io_at(source, e));
        }
    };

    if digest != expected.digest() {
        let _ = fs::remove_file(&temp);
        return Err(StorageError::HashMismatch {
            expected: expected.clone(),
            actual: HashInfo::file(expected.algorithm, digest),
        });
    }

    commit_temp(&temp, target)?;
    Ok(size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::hasher::compute_content_hash;
    use crate::types::HashAlgorithm;
    use tempfile::TempDir;

    #[test]
    fn test_temp_names_are_recognized() {
        let temp = temp_path_for(Path::new("/work/dir/foo"));
        let name = temp.file_name().unwrap().to_str().unwrap();
        assert!(is_temp_name(name));
        assert!(is_temp_name(".data.csv.4242.17.tmp"));
        assert!(!is_temp_name("scratch.tmp"));
        assert!(!is_temp_name(".hidden.tmp"));
        assert!(!is_temp_name(".foo.pid.1.tmp"));
    }

    #[test]
    fn test_atomic_write_replaces() {
        let temp_dir = TempDir::new().unwrap();
        let target = temp_dir.path().join("nested").join("file");

        atomic_write(&target, b"one").unwrap();
        atomic_write(&target, b"two").unwrap();
        assert_eq!(fs::read(&target).unwrap(), b"two");

        // No temp files left behind
        let leftovers: Vec<_> = fs::read_dir(target.parent().unwrap())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_copy_verified_rejects_wrong_hash() {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("src");
        let target = temp_dir.path().join("dst");
        fs::write(&source, b"actual").unwrap();

        let wrong = compute_content_hash(HashAlgorithm::Blake3, b"expected");
        assert!(matches!(
            atomic_copy_verified(&source, &target, &wrong),
            Err(StorageError::HashMismatch { .. })
        ));
        assert!(!target.exists());

        let right = compute_content_hash(HashAlgorithm::Blake3, b"actual");
        assert_eq!(atomic_copy_verified(&source, &target, &right).unwrap(), 6);
        assert_eq!(fs::read(&target).unwrap(), b"actual");
    }
}
