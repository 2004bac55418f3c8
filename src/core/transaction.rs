//! Transaction handling for the ledger
//!
//! A transaction is signed by its sender (`from`) and carries exactly one
//! tagged payload: a native transfer, a collection mint, an NFT mint or an
//! opaque contract call. The transaction hash covers every semantic field
//! except the signature and the cached hash itself.

use crate::crypto::{sha256, KeyError, PublicKey, Signature, Signer};
use crate::types::{Address, Hash};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// =============================================================================
// Error Types
// =============================================================================

/// Transaction-related errors
#[derive(Error, Debug)]
pub enum TransactionError {
    #[error("Transaction is not signed")]
    Unsigned,
    #[error("Invalid signature")]
    InvalidSignature,
    #[error("Crypto error: {0}")]
    CryptoError(#[from] KeyError),
}

// =============================================================================
// Payloads
// =============================================================================

/// Creates a named NFT collection owned by the sender
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionTx {
    pub name: String,
    pub metadata: Vec<u8>,
}

/// Mints one NFT into a collection owned by the sender
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MintTx {
    /// Hash of the transaction that created the collection
    pub collection: Hash,
    pub metadata: Vec<u8>,
}

/// What a transaction does once applied
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxPayload {
    /// Move `value` native tokens from the sender to `to`
    NativeTransfer { to: Address, value: u64 },
    /// Register a new NFT collection
    CollectionMint(CollectionTx),
    /// Mint an NFT into an existing collection
    NftMint(MintTx),
    /// Opaque payload handed to the contract executor
    ContractCall { data: Vec<u8> },
}

impl TxPayload {
    fn tag(&self) -> u8 {
        match self {
            TxPayload::NativeTransfer { .. } => 0,
            TxPayload::CollectionMint(_) => 1,
            TxPayload::NftMint(_) => 2,
            TxPayload::ContractCall { .. } => 3,
        }
    }

    fn encode(&self, buf: &mut Vec<u8>) {
        buf.push(self.tag());
        match self {
            TxPayload::NativeTransfer { to, value } => {
                buf.extend_from_slice(to.as_bytes());
                buf.extend_from_slice(&value.to_le_bytes());
            }
            TxPayload::CollectionMint(collection) => {
                put_bytes(buf, collection.name.as_bytes());
                put_bytes(buf, &collection.metadata);
            }
            TxPayload::NftMint(mint) => {
                buf.extend_from_slice(mint.collection.as_bytes());
                put_bytes(buf, &mint.metadata);
            }
            TxPayload::ContractCall { data } => put_bytes(buf, data),
        }
    }
}

/// Length-prefixed byte field
fn put_bytes(buf: &mut Vec<u8>, bytes: &[u8]) {
    buf.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
    buf.extend_from_slice(bytes);
}

// =============================================================================
// Transaction
// =============================================================================

/// A signed ledger transaction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    /// Sender public key, set by [`Transaction::sign`]
    pub from: Option<PublicKey>,
    /// Sender-chosen nonce; distinguishes otherwise identical transactions
    pub nonce: u64,
    pub payload: TxPayload,
    pub signature: Option<Signature>,
    /// Cached hash; zero until the transaction is signed
    #[serde(skip)]
    pub hash: Hash,
}

impl PartialEq for Transaction {
    fn eq(&self, other: &Self) -> bool {
        self.from == other.from
            && self.nonce == other.nonce
            && self.payload == other.payload
            && self.signature == other.signature
    }
}

impl Eq for Transaction {}

impl Transaction {
    /// Create an unsigned transaction
    pub fn new(payload: TxPayload, nonce: u64) -> Self {
        Self {
            from: None,
            nonce,
            payload,
            signature: None,
            hash: Hash::ZERO,
        }
    }

    /// Create a native token transfer
    pub fn transfer(to: Address, value: u64, nonce: u64) -> Self {
        Self::new(TxPayload::NativeTransfer { to, value }, nonce)
    }

    /// Create a contract call carrying an opaque payload
    pub fn contract_call(data: Vec<u8>, nonce: u64) -> Self {
        Self::new(TxPayload::ContractCall { data }, nonce)
    }

    /// Create an NFT collection
    pub fn collection(name: &str, metadata: Vec<u8>, nonce: u64) -> Self {
        Self::new(
            TxPayload::CollectionMint(CollectionTx {
                name: name.to_string(),
                metadata,
            }),
            nonce,
        )
    }

    /// Mint an NFT into `collection`
    pub fn nft_mint(collection: Hash, metadata: Vec<u8>, nonce: u64) -> Self {
        Self::new(
            TxPayload::NftMint(MintTx {
                collection,
                metadata,
            }),
            nonce,
        )
    }

    /// Sender address, if the transaction has been signed
    pub fn sender(&self) -> Option<Address> {
        self.from.map(|pk| pk.address())
    }

    /// Canonical encoding of the hashed fields
    pub fn signing_data(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(96);
        match &self.from {
            Some(pk) => buf.extend_from_slice(&pk.to_bytes()),
            None => buf.extend_from_slice(&[0u8; 33]),
        }
        buf.extend_from_slice(&self.nonce.to_le_bytes());
        self.payload.encode(&mut buf);
        buf
    }

    /// Recompute the hash from the current fields, ignoring the cache
    pub fn compute_hash(&self) -> Hash {
        sha256(&self.signing_data())
    }

    /// Cached hash, falling back to a fresh computation when not cached
    pub fn hash(&self) -> Hash {
        if self.hash.is_zero() {
            self.compute_hash()
        } else {
            self.hash
        }
    }

    /// Set the sender to the signer's key, then sign the transaction hash
    pub fn sign<S: Signer>(&mut self, signer: &S) -> Result<(), TransactionError> {
        self.from = Some(signer.public_key());
        let hash = self.compute_hash();
        self.signature = Some(signer.sign_digest(&hash)?);
        self.hash = hash;
        Ok(())
    }

    /// Verify the signature against a freshly computed hash
    ///
    /// The cached hash is never trusted here: a field tampered with after
    /// signing yields a different hash and the signature no longer matches.
    pub fn verify(&self) -> Result<(), TransactionError> {
        let (from, signature) = match (&self.from, &self.signature) {
            (Some(from), Some(signature)) => (from, signature),
            _ => return Err(TransactionError::Unsigned),
        };

        if !from.verify(&self.compute_hash(), signature) {
            return Err(TransactionError::InvalidSignature);
        }

        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
