//! Digest computation for blobs and tree objects

use crate::error::StorageError;
use crate::types::{HashAlgorithm, HashInfo};
use sha2::Digest;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Streaming hasher over the configured algorithm
pub enum ContentHasher {
    Blake3(Box<blake3::Hasher>),
    Sha256(sha2::Sha256),
}

impl ContentHasher {
    pub fn new(algorithm: HashAlgorithm) -> Self {
        match algorithm {
            HashAlgorithm::Blake3 => ContentHasher::Blake3(Box::new(blake3::Hasher::new())),
            HashAlgorithm::Sha256 => ContentHasher::Sha256(sha2::Sha256::new()),
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        match self {
            ContentHasher::Blake3(h) => {
                h.update(data);
            }
            ContentHasher::Sha256(h) => h.update(data),
        }
    }

    /// Finish and return the lowercase hex digest
    pub fn finalize_hex(self) -> String {
        match self {
            ContentHasher::Blake3(h) => hex::encode(h.finalize().as_bytes()),
            ContentHasher::Sha256(h) => hex::encode(h.finalize()),
        }
    }
}

/// Compute the blob hash of in-memory content
pub fn compute_content_hash(algorithm: HashAlgorithm, content: &[u8]) -> HashInfo {
    let mut hasher = ContentHasher::new(algorithm);
    hasher.update(content);
    HashInfo::file(algorithm, hasher.finalize_hex())
}

/// Compute the tree hash of an encoded tree object
///
/// The caller is responsible for the encoding being canonical.
pub fn compute_tree_hash(algorithm: HashAlgorithm, encoded: &[u8]) -> HashInfo {
    let mut hasher = ContentHasher::new(algorithm);
    hasher.update(encoded);
    HashInfo::dir(algorithm, hasher.finalize_hex())
}

/// Hash a file on disk, streaming its content
///
/// Returns the blob hash and the number of bytes read.
pub fn hash_file(algorithm: HashAlgorithm, path: &Path) -> Result<(HashInfo, u64), StorageError> {
    let file = File::open(path).map_err(|e| StorageError::io_at(path, e))?;
    let mut reader = BufReader::new(file);
    let mut hasher = ContentHasher::new(algorithm);
    let mut buffer = vec![0u8; READ_BUFFER_SIZE];
    let mut total = 0u64;

    loop {
        let read = reader
            .read(&mut buffer)
            .map_err(|e| StorageError::io_at(path, e))?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
        total += read as u64;
    }

    Ok((HashInfo::file(algorithm, hasher.finalize_hex()), total))
}

/// Verify that `content` is the object addressed by `expected`
pub fn verify_object(expected: &HashInfo, content: &[u8]) -> Result<(), StorageError> {
    let actual = if expected.is_dir() {
        compute_tree_hash(expected.algorithm, content)
    } else {
        compute_content_hash(expected.algorithm, content)
    };
    if &actual != expected {
        return Err(StorageError::HashMismatch {
            expected: expected.clone(),
            actual,
        });
    }
    Ok(())
}
