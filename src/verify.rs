//! SHA-256 integrity verification of fetched artifacts.
//!
//! [`verify`] is the only way to obtain a [`VerifiedArtifact`], and the
//! installer only accepts a `VerifiedArtifact`. Bytes whose digest does not
//! match the formula's checksum can therefore never reach the install step.

use crate::error::{KegError, Result};
use crate::formula::Checksum;
use sha2::{Digest, Sha256};

/// Hex-encoded (lower-case) SHA-256 of `bytes`
pub fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Artifact bytes whose digest matched the declared checksum
#[derive(Debug, Clone)]
pub struct VerifiedArtifact {
    formula: String,
    checksum: Checksum,
    bytes: Vec<u8>,
}

impl VerifiedArtifact {
    pub fn formula(&self) -> &str {
        &self.formula
    }

    pub fn checksum(&self) -> &Checksum {
        &self.checksum
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Check `bytes` against `expected`
///
/// A mismatch is always an [`KegError::Integrity`] error; there is no way to
/// downgrade it.
pub fn verify(formula: &str, bytes: Vec<u8>, expected: &Checksum) -> Result<VerifiedArtifact> {
    let actual = sha256_hex(&bytes);
    if !expected.matches(&actual) {
        return Err(KegError::Integrity {
            formula: formula.to_string(),
            expected: expected.to_string(),
            actual,
        });
    }

    tracing::debug!(formula, checksum = %expected, size = bytes.len(), "checksum verified");

    Ok(VerifiedArtifact {
        formula: formula.to_string(),
        checksum: expected.clone(),
        bytes,
    })
}
