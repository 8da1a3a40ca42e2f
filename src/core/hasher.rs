//! Artifact hashing for download verification.
//!
//! BLAKE3 is recorded as the primary digest. SHA-256 is computed alongside it
//! because that is what scanner distribution servers publish.

use crate::core::error::ScanJobError;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::Path;

/// Digests of a downloaded artifact.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArtifactDigest {
    /// BLAKE3 hash (hex encoded).
    pub blake3: String,
    /// SHA-256 hash (hex encoded).
    pub sha256: String,
    /// Number of bytes hashed.
    pub size: u64,
}

impl ArtifactDigest {
    /// Compares the SHA-256 digest against an expected value, ignoring case.
    pub fn matches_sha256(&self, expected: &str) -> bool {
        self.sha256.eq_ignore_ascii_case(expected.trim())
    }
}

/// Computes [`ArtifactDigest`]s in a single pass.
///
/// # Examples
///
/// ```rust
/// use scanjob::core::ArtifactHasher;
///
/// let digest = ArtifactHasher::new().hash_bytes(b"scanner");
/// assert_eq!(digest.size, 7);
/// ```
#[derive(Debug, Clone, Default)]
pub struct ArtifactHasher;

impl ArtifactHasher {
    /// Creates a new hasher.
    pub fn new() -> Self {
        Self
    }

    /// Hashes bytes already in memory.
    pub fn hash_bytes(&self, data: &[u8]) -> ArtifactDigest {
        ArtifactDigest {
            blake3: blake3::hash(data).to_hex().to_string(),
            sha256: format!("{:x}", Sha256::digest(data)),
            size: data.len() as u64,
        }
    }

    /// Hashes a file, streaming it to avoid loading it into memory.
    pub fn hash_file(&self, path: &Path) -> Result<ArtifactDigest, ScanJobError> {
        let file = std::fs::File::open(path).map_err(|e| {
            ScanJobError::install(format!("failed to open '{}': {}", path.display(), e))
        })?;
        let mut reader = std::io::BufReader::new(file);
        self.hash_reader(&mut reader).map_err(|e| {
            ScanJobError::install(format!("failed to read '{}': {}", path.display(), e))
        })
    }

    /// Hashes everything a reader yields.
    pub fn hash_reader<R: Read>(&self, reader: &mut R) -> std::io::Result<ArtifactDigest> {
        let mut blake3_hasher = blake3::Hasher::new();
        let mut sha256_hasher = Sha256::new();
        let mut size = 0u64;

        let mut buffer = [0u8; 64 * 1024];
        loop {
            let bytes_read = reader.read(&mut buffer)?;
            if bytes_read == 0 {
                break;
            }
            let chunk = &buffer[..bytes_read];
            blake3_hasher.update(chunk);
            sha256_hasher.update(chunk);
            size += bytes_read as u64;
        }

        Ok(ArtifactDigest {
            blake3: blake3_hasher.finalize().to_hex().to_string(),
            sha256: format!("{:x}", sha256_hasher.finalize()),
            size,
        })
    }
}
