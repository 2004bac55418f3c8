//! ECDSA key management for the ledger
//!
//! Provides key pair generation, signing, and verification using
//! the secp256k1 elliptic curve. The rest of the crate only sees the
//! [`Signer`] trait and [`PublicKey::verify`], so the curve stays opaque.

use rand::rngs::OsRng;
use ripemd::{Digest, Ripemd160};
use secp256k1::{ecdsa, Message, Secp256k1, SecretKey};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use super::hash::sha256;
use crate::types::{Address, Hash};

/// Errors that can occur during key operations
#[derive(Error, Debug)]
pub enum KeyError {
    #[error("Invalid private key")]
    InvalidPrivateKey,
    #[error("Invalid public key")]
    InvalidPublicKey,
    #[error("Invalid signature encoding")]
    InvalidSignature,
    #[error("Secp256k1 error: {0}")]
    Secp256k1Error(#[from] secp256k1::Error),
}

/// Anything able to produce signatures over a 32-byte digest
pub trait Signer {
    /// The public key matching the signatures produced
    fn public_key(&self) -> PublicKey;

    /// Sign a 32-byte digest
    fn sign_digest(&self, digest: &Hash) -> Result<Signature, KeyError>;
}

/// A compressed secp256k1 public key
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PublicKey(secp256k1::PublicKey);

impl PublicKey {
    /// Parse a public key from its serialized form
    pub fn from_slice(bytes: &[u8]) -> Result<Self, KeyError> {
        secp256k1::PublicKey::from_slice(bytes)
            .map(Self)
            .map_err(|_| KeyError::InvalidPublicKey)
    }

    /// Parse a public key from hex string
    pub fn from_hex(hex_key: &str) -> Result<Self, KeyError> {
        let bytes = hex::decode(hex_key).map_err(|_| KeyError::InvalidPublicKey)?;
        Self::from_slice(&bytes)
    }

    /// Compressed 33-byte encoding
    pub fn to_bytes(&self) -> [u8; 33] {
        self.0.serialize()
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }

    /// The ledger address owned by this key
    pub fn address(&self) -> Address {
        public_key_to_address(self)
    }

    /// Verify a signature over a 32-byte digest
    ///
    /// Returns `false` for any malformed input rather than an error; callers
    /// only care whether the signature holds.
    pub fn verify(&self, digest: &Hash, signature: &Signature) -> bool {
        let secp = Secp256k1::verification_only();
        match Message::from_digest_slice(digest.as_bytes()) {
            Ok(message) => secp.verify_ecdsa(&message, &signature.0, &self.0).is_ok(),
            Err(_) => false,
        }
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", self.to_hex())
    }
}

/// A compact ECDSA signature
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature(ecdsa::Signature);

impl Signature {
    /// Parse a 64-byte compact signature
    pub fn from_compact(bytes: &[u8]) -> Result<Self, KeyError> {
        ecdsa::Signature::from_compact(bytes)
            .map(Self)
            .map_err(|_| KeyError::InvalidSignature)
    }

    pub fn to_compact(&self) -> [u8; 64] {
        self.0.serialize_compact()
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({}..)", &hex::encode(self.to_compact())[..16])
    }
}

/// A key pair consisting of a private key and its corresponding public key
#[derive(Clone)]
pub struct KeyPair {
    secret_key: SecretKey,
    public_key: PublicKey,
}

impl KeyPair {
    /// Generate a new random key pair
    pub fn generate() -> Self {
        let secp = Secp256k1::new();
        let (secret_key, public_key) = secp.generate_keypair(&mut OsRng);
        Self {
            secret_key,
            public_key: PublicKey(public_key),
        }
    }

    /// Create a key pair from an existing secret key
    pub fn from_secret_key(secret_key: SecretKey) -> Self {
        let secp = Secp256k1::new();
        let public_key = secp256k1::PublicKey::from_secret_key(&secp, &secret_key);
        Self {
            secret_key,
            public_key: PublicKey(public_key),
        }
    }

    /// Create a key pair from a hex-encoded private key
    pub fn from_private_key_hex(hex_key: &str) -> Result<Self, KeyError> {
        let bytes = hex::decode(hex_key).map_err(|_| KeyError::InvalidPrivateKey)?;
        let secret_key =
            SecretKey::from_slice(&bytes).map_err(|_| KeyError::InvalidPrivateKey)?;
        Ok(Self::from_secret_key(secret_key))
    }

    /// Get the private key as a hex string
    pub fn private_key_hex(&self) -> String {
        hex::encode(self.secret_key.secret_bytes())
    }

    pub fn public_key(&self) -> PublicKey {
        self.public_key
    }

    /// Ledger address of this key pair
    pub fn address(&self) -> Address {
        self.public_key.address()
    }
}

impl Signer for KeyPair {
    fn public_key(&self) -> PublicKey {
        self.public_key
    }

    fn sign_digest(&self, digest: &Hash) -> Result<Signature, KeyError> {
        let secp = Secp256k1::new();
        let message = Message::from_digest_slice(digest.as_bytes())?;
        Ok(Signature(secp.sign_ecdsa(&message, &self.secret_key)))
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_key", &self.public_key)
            .finish_non_exhaustive()
    }
}

/// Convert a public key to a ledger address: RIPEMD160(SHA256(pubkey))
pub fn public_key_to_address(public_key: &PublicKey) -> Address {
    let sha256_hash = sha256(&public_key.to_bytes());

    let mut ripemd = Ripemd160::new();
    ripemd.update(sha256_hash.as_bytes());
    let digest: [u8; 20] = ripemd.finalize().into();

    Address(digest)
}
