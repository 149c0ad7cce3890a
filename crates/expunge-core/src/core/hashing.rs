// crates/expunge-core/src/core/hashing.rs
// ============================================================================
// Module: Expunge Canonical Hashing
// Description: RFC 8785 canonical JSON serialization and SHA-256 digests.
// Purpose: Freeze plan definitions and payloads into deterministic hashes.
// Dependencies: serde, serde_jcs, sha2, thiserror
// ============================================================================

//! ## Overview
//! Plan definitions are hashed at enqueue and re-hashed at every execution;
//! the two digests must match or the run fails. Canonicalization uses
//! RFC 8785 (JSON Canonicalization Scheme) so key order and whitespace never
//! influence the digest. Non-finite floats are rejected.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use sha2::Digest;
use sha2::Sha256;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default hash algorithm for canonical digests.
pub const DEFAULT_HASH_ALGORITHM: HashAlgorithm = HashAlgorithm::Sha256;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Supported canonical hash algorithms.
///
/// # Invariants
/// - Variants are stable for serialization and store round-trips.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HashAlgorithm {
    /// SHA-256 over canonical JSON bytes.
    Sha256,
}

impl HashAlgorithm {
    /// Returns the stable label for the algorithm.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sha256 => "sha256",
        }
    }

    /// Parses a stored algorithm label.
    #[must_use]
    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "sha256" => Some(Self::Sha256),
            _ => None,
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical hash digest with its algorithm label.
///
/// # Invariants
/// - `value` is lowercase hex of the digest bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashDigest {
    /// Algorithm used to produce the digest.
    pub algorithm: HashAlgorithm,
    /// Lowercase hex digest value.
    pub value: String,
}

/// Canonical hashing errors.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
#[derive(Debug, Error)]
pub enum HashError {
    /// Canonical JSON serialization failed (for example, non-finite floats).
    #[error("canonicalization failed: {0}")]
    Canonicalization(String),
    /// Canonical payload exceeded the caller-provided size limit.
    #[error("canonical payload too large: {actual_bytes} bytes (max {max_bytes})")]
    SizeLimitExceeded {
        /// Maximum allowed bytes.
        max_bytes: usize,
        /// Actual canonical payload size in bytes.
        actual_bytes: usize,
    },
}

// ============================================================================
// SECTION: Functions
// ============================================================================

/// Serializes a value into RFC 8785 canonical JSON bytes.
///
/// # Errors
///
/// Returns [`HashError::Canonicalization`] when the value cannot be
/// canonicalized.
pub fn canonical_json_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>, HashError> {
    serde_jcs::to_vec(value).map_err(|err| HashError::Canonicalization(err.to_string()))
}

/// Hashes raw bytes with the provided algorithm.
#[must_use]
pub fn hash_bytes(algorithm: HashAlgorithm, bytes: &[u8]) -> HashDigest {
    match algorithm {
        HashAlgorithm::Sha256 => {
            let digest = Sha256::digest(bytes);
            let mut value = String::with_capacity(digest.len() * 2);
            for byte in digest {
                value.push_str(&format!("{byte:02x}"));
            }
            HashDigest {
                algorithm,
                value,
            }
        }
    }
}

/// Hashes a value's canonical JSON form.
///
/// # Errors
///
/// Returns [`HashError`] when canonicalization fails.
pub fn hash_canonical_json<T: Serialize>(
    algorithm: HashAlgorithm,
    value: &T,
) -> Result<HashDigest, HashError> {
    let bytes = canonical_json_bytes(value)?;
    Ok(hash_bytes(algorithm, &bytes))
}

/// Hashes a value's canonical JSON form, enforcing a size limit first.
///
/// # Errors
///
/// Returns [`HashError`] when canonicalization fails or the canonical bytes
/// exceed `max_bytes`.
pub fn hash_canonical_json_with_limit<T: Serialize>(
    algorithm: HashAlgorithm,
    value: &T,
    max_bytes: usize,
) -> Result<HashDigest, HashError> {
    let bytes = canonical_json_bytes(value)?;
    if bytes.len() > max_bytes {
        return Err(HashError::SizeLimitExceeded {
            max_bytes,
            actual_bytes: bytes.len(),
        });
    }
    Ok(hash_bytes(algorithm, &bytes))
}
