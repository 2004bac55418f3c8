//! Transaction pool (mempool) for pending transactions
//!
//! Holds verified transactions in arrival order until a block producer takes
//! them. Transactions orphaned by a reorg come back through the engine's
//! orphan channel and are re-admitted like any other submission.

use crate::core::{Block, Transaction, TransactionError};
use crate::types::Hash;
use log::{debug, warn};
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::mpsc;

/// Default maximum pool transaction count
pub const DEFAULT_MEMPOOL_SIZE: usize = 10000;

/// Mempool errors
#[derive(Error, Debug)]
pub enum MempoolError {
    #[error("Transaction already exists")]
    DuplicateTransaction,
    #[error("Transaction validation error: {0}")]
    ValidationError(#[from] TransactionError),
    #[error("Mempool full")]
    MempoolFull,
}

/// Entry in the pool with metadata
#[derive(Debug, Clone)]
pub struct MempoolEntry {
    pub tx: Transaction,
    /// When the transaction was added (Unix timestamp)
    pub added_time: u64,
}

/// Pool of pending transactions
#[derive(Debug)]
pub struct TxPool {
    entries: HashMap<Hash, MempoolEntry>,
    /// Transaction hashes in order of arrival
    by_time: Vec<Hash>,
    max_size: usize,
}

impl Default for TxPool {
    fn default() -> Self {
        Self::new()
    }
}

impl TxPool {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MEMPOOL_SIZE)
    }

    pub fn with_capacity(max_size: usize) -> Self {
        Self {
            entries: HashMap::new(),
            by_time: Vec::new(),
            max_size,
        }
    }

    /// Verify and add a transaction
    pub fn add_transaction(&mut self, tx: Transaction) -> Result<(), MempoolError> {
        tx.verify()?;

        let hash = tx.compute_hash();
        if self.entries.contains_key(&hash) {
            return Err(MempoolError::DuplicateTransaction);
        }
        if self.entries.len() >= self.max_size {
            return Err(MempoolError::MempoolFull);
        }

        let added_time = chrono::Utc::now().timestamp().max(0) as u64;
        self.by_time.push(hash);
        self.entries.insert(hash, MempoolEntry { tx, added_time });
        Ok(())
    }

    /// Drain the orphan channel into the pool; returns how many were admitted
    pub fn readmit_orphans(&mut self, orphans: &mut mpsc::Receiver<Transaction>) -> usize {
        let mut admitted = 0;
        while let Ok(tx) = orphans.try_recv() {
            let hash = tx.compute_hash();
            match self.add_transaction(tx) {
                Ok(()) => admitted += 1,
                Err(MempoolError::DuplicateTransaction) => {}
                Err(e) => warn!("Orphaned transaction {} not re-admitted: {}", hash, e),
            }
        }
        if admitted > 0 {
            debug!("Re-admitted {} orphaned transactions", admitted);
        }
        admitted
    }

    pub fn remove_transaction(&mut self, hash: &Hash) -> Option<Transaction> {
        let entry = self.entries.remove(hash)?;
        self.by_time.retain(|h| h != hash);
        Some(entry.tx)
    }

    /// Oldest `limit` transactions, left in the pool
    pub fn get_transactions(&self, limit: usize) -> Vec<Transaction> {
        self.by_time
            .iter()
            .take(limit)
            .filter_map(|hash| self.entries.get(hash))
            .map(|entry| entry.tx.clone())
            .collect()
    }

    /// Remove and return the oldest `limit` transactions
    pub fn take_transactions(&mut self, limit: usize) -> Vec<Transaction> {
        let count = limit.min(self.by_time.len());
        self.by_time
            .drain(..count)
            .collect::<Vec<_>>()
            .into_iter()
            .filter_map(|hash| self.entries.remove(&hash))
            .map(|entry| entry.tx)
            .collect()
    }

    /// Drop every pooled transaction that `block` includes
    pub fn remove_included(&mut self, block: &Block) {
        for tx in &block.transactions {
            self.remove_transaction(&tx.compute_hash());
        }
    }

    pub fn get_transaction(&self, hash: &Hash) -> Option<&Transaction> {
        self.entries.get(hash).map(|entry| &entry.tx)
    }

    pub fn contains(&self, hash: &Hash) -> bool {
        self.entries.contains_key(hash)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.by_time.clear();
    }
}
