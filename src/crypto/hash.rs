//! Cryptographic hashing utilities for the ledger
//!
//! Provides the SHA-256 digest used for header hashes, transaction hashes
//! and the merkle commitment.

use crate::types::Hash;
use sha2::{Digest, Sha256};

/// Computes SHA-256 hash of the input data
pub fn sha256(data: &[u8]) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update(data);
    Hash(hasher.finalize().into())
}

/// Computes SHA-256 hash and returns it as a hex string
pub fn sha256_hex(data: &[u8]) -> String {
    sha256(data).to_hex()
}
