//! Block implementation for the ledger
//!
//! A block is a header plus an ordered transaction list, signed by the
//! validator that produced it. Block identity is the hash of the header
//! alone; the header's `data_hash` commits to the transactions, so tampering
//! with any transaction changes the block hash as well.

use crate::core::difficulty::{compact_to_target, meets_target};
use crate::core::transaction::{Transaction, TransactionError};
use crate::crypto::{calculate_merkle_root, sha256, KeyError, PublicKey, Signature, Signer};
use crate::types::Hash;
use chrono::Utc;
use num_bigint::BigUint;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Current header version
pub const BLOCK_VERSION: u32 = 1;

// =============================================================================
// Block Errors
// =============================================================================

/// Block validation errors
#[derive(Error, Debug)]
pub enum BlockError {
    #[error("Block is not signed")]
    Unsigned,
    #[error("Invalid block signature")]
    InvalidSignature,
    #[error("Data hash does not match the transactions")]
    DataHashMismatch,
    #[error("Invalid transaction {0}: {1}")]
    InvalidTransaction(Hash, TransactionError),
    #[error("Signing failed: {0}")]
    Signing(#[from] KeyError),
}

/// Block header containing metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub version: u32,
    /// Commitment to the transaction set
    pub data_hash: Hash,
    pub prev_block_hash: Hash,
    pub height: u32,
    /// Unix timestamp in seconds
    pub timestamp: u64,
    pub nonce: u64,
    /// Compact difficulty target
    pub bits: u32,
}

impl Header {
    /// Canonical little-endian encoding, the input of the header hash and signature
    pub fn bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(92);
        buf.extend_from_slice(&self.version.to_le_bytes());
        buf.extend_from_slice(self.data_hash.as_bytes());
        buf.extend_from_slice(self.prev_block_hash.as_bytes());
        buf.extend_from_slice(&self.height.to_le_bytes());
        buf.extend_from_slice(&self.timestamp.to_le_bytes());
        buf.extend_from_slice(&self.nonce.to_le_bytes());
        buf.extend_from_slice(&self.bits.to_le_bytes());
        buf
    }

    /// Calculate the hash of the block header
    pub fn hash(&self) -> Hash {
        sha256(&self.bytes())
    }

    /// Full 256-bit target decoded from `bits`
    pub fn target(&self) -> BigUint {
        compact_to_target(self.bits)
    }

    /// Check if the header hash meets its own difficulty target
    pub fn meets_target(&self) -> bool {
        meets_target(&self.hash(), &self.target())
    }
}

/// Commitment over an ordered transaction set
///
/// Hashes are recomputed from the transaction fields, never taken from the
/// per-transaction cache.
pub fn calculate_data_hash(transactions: &[Transaction]) -> Hash {
    let hashes: Vec<Hash> = transactions.iter().map(|tx| tx.compute_hash()).collect();
    calculate_merkle_root(&hashes)
}

/// A block in the ledger
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Block {
    pub header: Header,
    pub transactions: Vec<Transaction>,
    /// Public key of the producing validator
    pub validator: Option<PublicKey>,
    pub signature: Option<Signature>,
    /// Block hash (cached for efficiency); zero until signed or mined
    #[serde(skip)]
    pub hash: Hash,
}

impl PartialEq for Block {
    fn eq(&self, other: &Self) -> bool {
        self.header == other.header
            && self.transactions == other.transactions
            && self.validator == other.validator
            && self.signature == other.signature
    }
}

impl Eq for Block {}

impl Block {
    /// Create an unsigned block from a header and transactions
    pub fn new(header: Header, transactions: Vec<Transaction>) -> Self {
        Self {
            header,
            transactions,
            validator: None,
            signature: None,
            hash: Hash::ZERO,
        }
    }

    /// Create the genesis block from a configured header
    pub fn genesis(header: Header) -> Self {
        let mut block = Self::new(header, Vec::new());
        block.hash = block.header.hash();
        block
    }

    /// Create the successor of `prev`, verifying and committing `transactions`
    pub fn from_prev_header(
        prev: &Header,
        transactions: Vec<Transaction>,
    ) -> Result<Self, BlockError> {
        for tx in &transactions {
            tx.verify()
                .map_err(|e| BlockError::InvalidTransaction(tx.compute_hash(), e))?;
        }

        let header = Header {
            version: BLOCK_VERSION,
            data_hash: calculate_data_hash(&transactions),
            prev_block_hash: prev.hash(),
            height: prev.height + 1,
            timestamp: Utc::now().timestamp().max(0) as u64,
            nonce: 0,
            bits: prev.bits,
        };

        Ok(Self::new(header, transactions))
    }

    /// Cached hash, or a fresh header hash when nothing is cached
    pub fn hash(&self) -> Hash {
        if self.hash.is_zero() {
            self.header.hash()
        } else {
            self.hash
        }
    }

    /// Verify the block hash cache against the header
    pub fn verify_hash(&self) -> bool {
        self.hash == self.header.hash()
    }

    /// Append a transaction after verifying it, then recommit the data hash
    ///
    /// Any signature already on the block is invalidated by the new data hash;
    /// sign after the last transaction is added.
    pub fn add_tx(&mut self, tx: Transaction) -> Result<(), BlockError> {
        tx.verify()
            .map_err(|e| BlockError::InvalidTransaction(tx.compute_hash(), e))?;

        self.transactions.push(tx);
        self.header.data_hash = calculate_data_hash(&self.transactions);
        self.hash = Hash::ZERO;
        Ok(())
    }

    /// Sign the header hash with the validator key
    pub fn sign<S: Signer>(&mut self, signer: &S) -> Result<(), BlockError> {
        let hash = self.header.hash();
        let signature = signer.sign_digest(&hash)?;

        self.validator = Some(signer.public_key());
        self.signature = Some(signature);
        self.hash = hash;
        Ok(())
    }

    /// Verify the header signature, every transaction and the data hash
    pub fn verify(&self) -> Result<(), BlockError> {
        let (validator, signature) = match (&self.validator, &self.signature) {
            (Some(validator), Some(signature)) => (validator, signature),
            _ => return Err(BlockError::Unsigned),
        };

        if !validator.verify(&self.header.hash(), signature) {
            return Err(BlockError::InvalidSignature);
        }

        for tx in &self.transactions {
            tx.verify()
                .map_err(|e| BlockError::InvalidTransaction(tx.compute_hash(), e))?;
        }

        if calculate_data_hash(&self.transactions) != self.header.data_hash {
            return Err(BlockError::DataHashMismatch);
        }

        Ok(())
    }

    /// Get number of transactions in this block
    pub fn tx_count(&self) -> usize {
        self.transactions.len()
    }
}
