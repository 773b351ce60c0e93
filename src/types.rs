//! Core value types shared by every layer: digest algorithm, `HashInfo`, `Meta`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Suffix that marks a hash value as a tree object rather than a leaf blob.
pub const DIR_SUFFIX: &str = ".dir";

/// Digest algorithm used to address objects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    Blake3,
    Sha256,
}

impl HashAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            HashAlgorithm::Blake3 => "blake3",
            HashAlgorithm::Sha256 => "sha256",
        }
    }

    /// Length of a hex digest produced by this algorithm
    pub fn hex_len(&self) -> usize {
        match self {
            HashAlgorithm::Blake3 | HashAlgorithm::Sha256 => 64,
        }
    }
}

impl Default for HashAlgorithm {
    fn default() -> Self {
        HashAlgorithm::Blake3
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HashAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "blake3" => Ok(HashAlgorithm::Blake3),
            "sha256" => Ok(HashAlgorithm::Sha256),
            other => Err(format!(
                "Unknown hash algorithm '{}' (expected 'blake3' or 'sha256')",
                other
            )),
        }
    }
}

/// Algorithm-tagged content hash of a file blob or a directory tree object.
///
/// Directory hashes carry [`DIR_SUFFIX`] so the two object kinds can never be
/// confused, even when looked up by value alone.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HashInfo {
    pub algorithm: HashAlgorithm,
    pub value: String,
}

impl HashInfo {
    /// Hash of a leaf blob
    pub fn file(algorithm: HashAlgorithm, hex_digest: impl Into<String>) -> Self {
        Self {
            algorithm,
            value: hex_digest.into(),
        }
    }

    /// Hash of a tree object; appends the directory marker
    pub fn dir(algorithm: HashAlgorithm, hex_digest: impl AsRef<str>) -> Self {
        Self {
            algorithm,
            value: format!("{}{}", hex_digest.as_ref(), DIR_SUFFIX),
        }
    }

    pub fn is_dir(&self) -> bool {
        self.value.ends_with(DIR_SUFFIX)
    }

    /// The bare hex digest, without the directory marker
    pub fn digest(&self) -> &str {
        self.value.strip_suffix(DIR_SUFFIX).unwrap_or(&self.value)
    }

    /// Check that the value is a well-formed digest for its algorithm
    pub fn is_well_formed(&self) -> bool {
        let digest = self.digest();
        digest.len() == self.algorithm.hex_len()
            && digest
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
    }

    /// Abbreviated form for log lines and summaries
    pub fn short(&self) -> String {
        let digest = self.digest();
        let cut = digest.len().min(8);
        if self.is_dir() {
            format!("{}{}", &digest[..cut], DIR_SUFFIX)
        } else {
            digest[..cut].to_string()
        }
    }
}

impl fmt::Display for HashInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.value)
    }
}

/// Size and shape metadata accompanying a `HashInfo`.
///
/// `size` and `file_count` are `None` when they cannot be derived from what is
/// known locally. That is a distinct state from zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Meta {
    pub is_directory: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_count: Option<u32>,
}

impl Meta {
    /// Meta of a regular file of known length
    pub fn file(size: u64) -> Self {
        Self {
            is_directory: false,
            size: Some(size),
            file_count: Some(1),
        }
    }

    /// Meta of a regular file whose length is not known locally
    pub fn file_unsized() -> Self {
        Self {
            is_directory: false,
            size: None,
            file_count: Some(1),
        }
    }

    pub fn directory(size: Option<u64>, file_count: Option<u32>) -> Self {
        Self {
            is_directory: true,
            size,
            file_count,
        }
    }

    /// An empty directory: known to contain nothing
    pub fn empty_directory() -> Self {
        Self::directory(Some(0), Some(0))
    }

    /// Whether both aggregates are known
    pub fn is_complete(&self) -> bool {
        self.size.is_some() && self.file_count.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dir_suffix_roundtrip() {
        let digest = "ab".repeat(32);
        let h = HashInfo::dir(HashAlgorithm::Blake3, &digest);
        assert!(h.is_dir());
        assert_eq!(h.digest(), digest);
        assert!(h.is_well_formed());

        let f = HashInfo::file(HashAlgorithm::Blake3, digest.clone());
        assert!(!f.is_dir());
        assert_ne!(f, h);
    }

    #[test]
    fn test_malformed_digest() {
        let h = HashInfo::file(HashAlgorithm::Sha256, "not-hex");
        assert!(!h.is_well_formed());
    }

    #[test]
    fn test_algorithm_parse() {
        assert_eq!("BLAKE3".parse::<HashAlgorithm>().unwrap(), HashAlgorithm::Blake3);
        assert_eq!("sha256".parse::<HashAlgorithm>().unwrap(), HashAlgorithm::Sha256);
        assert!("md5".parse::<HashAlgorithm>().is_err());
    }

    #[test]
    fn test_meta_unknown_is_not_zero() {
        let unknown = Meta::directory(None, Some(3));
        assert!(!unknown.is_complete());
        assert_ne!(unknown, Meta::directory(Some(0), Some(3)));
    }
}
