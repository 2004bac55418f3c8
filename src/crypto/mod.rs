//! Cryptographic utilities for the ledger
//!
//! This module provides:
//! - SHA-256 hashing
//! - ECDSA key management and signing (secp256k1)
//! - The merkle commitment over a block's transactions

pub mod hash;
pub mod keys;
pub mod merkle;

pub use hash::{sha256, sha256_hex};
pub use keys::{public_key_to_address, KeyError, KeyPair, PublicKey, Signature, Signer};
pub use merkle::calculate_merkle_root;
