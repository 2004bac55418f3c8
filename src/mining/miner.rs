//! Mining engine for the ledger
//!
//! A block is sealed in three steps: stamp the timestamp and compact bits,
//! search nonces until the header hash falls below the target, then sign.
//! The header is final before the search starts; changing any field after
//! it would invalidate the proof.

use crate::core::{
    meets_target, Block, BlockError, BlockStatus, Blockchain, ChainError, Transaction,
};
use crate::crypto::{KeyPair, PublicKey};
use crate::mining::txpool::TxPool;
use chrono::Utc;
use log::{error, info, warn};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Mining errors
#[derive(Error, Debug)]
pub enum MiningError {
    #[error("Block error: {0}")]
    Block(#[from] BlockError),
    #[error("Chain error: {0}")]
    Chain(#[from] ChainError),
    #[error("Nonce space exhausted at height {0}")]
    NonceExhausted(u32),
}

/// Mining statistics
#[derive(Debug, Clone)]
pub struct MiningStats {
    /// Number of hash attempts
    pub hash_attempts: u64,
    /// Time taken in milliseconds
    pub time_ms: u128,
    /// Hash rate (hashes per second)
    pub hash_rate: f64,
}

/// Miner for creating new blocks
pub struct Miner {
    keypair: KeyPair,
    max_nonce: u64,
}

impl Miner {
    /// Create a new miner signing with `keypair`
    pub fn new(keypair: KeyPair) -> Self {
        Self {
            keypair,
            max_nonce: u64::MAX,
        }
    }

    /// Give up after trying nonces `0..=max_nonce`
    pub fn with_max_nonce(mut self, max_nonce: u64) -> Self {
        self.max_nonce = max_nonce;
        self
    }

    pub fn public_key(&self) -> PublicKey {
        self.keypair.public_key()
    }

    /// Stamp, solve and sign `block`
    pub fn seal(&self, block: &mut Block, bits: u32) -> Result<MiningStats, MiningError> {
        let start = Instant::now();

        block.header.timestamp = Utc::now().timestamp().max(0) as u64;
        block.header.bits = bits;
        block.header.nonce = 0;
        let target = block.header.target();

        let mut attempts = 0u64;
        loop {
            attempts += 1;
            if meets_target(&block.header.hash(), &target) {
                break;
            }
            if block.header.nonce >= self.max_nonce {
                return Err(MiningError::NonceExhausted(block.header.height));
            }
            block.header.nonce += 1;
        }

        block.sign(&self.keypair)?;

        let elapsed = start.elapsed().as_millis();
        let hash_rate = if elapsed > 0 {
            (attempts as f64) / (elapsed as f64 / 1000.0)
        } else {
            attempts as f64
        };

        Ok(MiningStats {
            hash_attempts: attempts,
            time_ms: elapsed,
            hash_rate,
        })
    }

    /// Mine a block on top of the canonical tip without submitting it
    pub fn mine_block(
        &self,
        blockchain: &Blockchain,
        transactions: Vec<Transaction>,
    ) -> Result<(Block, MiningStats), MiningError> {
        let tip = blockchain.tip_header();
        let bits = blockchain.bits_for_height(tip.height + 1)?;

        let mut block = Block::from_prev_header(&tip, transactions)?;
        info!(
            target: blockchain.log_target(),
            "Mining block {} with bits {:#010x}...",
            block.header.height, bits
        );
        let stats = self.seal(&mut block, bits)?;

        info!(
            target: blockchain.log_target(),
            "Block {} mined in {}ms ({} attempts, {:.2} H/s)",
            block.header.height, stats.time_ms, stats.hash_attempts, stats.hash_rate
        );
        Ok((block, stats))
    }

    /// Mine a block and add it to the chain
    pub fn mine_and_submit(
        &self,
        blockchain: &Blockchain,
        transactions: Vec<Transaction>,
    ) -> Result<(Block, BlockStatus, MiningStats), MiningError> {
        let (block, stats) = self.mine_block(blockchain, transactions)?;
        let status = blockchain.add_block(block.clone())?;
        Ok((block, status, stats))
    }
}

/// Periodic block production settings
#[derive(Debug, Clone)]
pub struct ProducerConfig {
    pub interval: Duration,
    pub max_block_txs: usize,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            max_block_txs: 1000,
        }
    }
}

/// Produce a block from the pool on every tick until the task is aborted
///
/// Orphaned transactions are drained into the pool before each block.
/// Transactions of a block that fails to mine or is rejected go back to the
/// pool.
pub fn spawn_block_producer(
    blockchain: Arc<Blockchain>,
    miner: Arc<Miner>,
    pool: Arc<Mutex<TxPool>>,
    mut orphans: mpsc::Receiver<Transaction>,
    config: ProducerConfig,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(config.interval);

        loop {
            ticker.tick().await;

            let transactions = {
                let mut pool = pool.lock();
                pool.readmit_orphans(&mut orphans);
                pool.take_transactions(config.max_block_txs)
            };
            let pending = transactions.clone();

            let chain = Arc::clone(&blockchain);
            let worker = Arc::clone(&miner);
            let result =
                tokio::task::spawn_blocking(move || worker.mine_and_submit(&chain, transactions))
                    .await;

            match result {
                Ok(Ok((block, status, _))) => {
                    info!(
                        target: blockchain.log_target(),
                        "Produced block {} at height {}: {:?}",
                        block.hash, block.header.height, status
                    );
                }
                Ok(Err(e)) => {
                    warn!(target: blockchain.log_target(), "Block production failed: {}", e);
                    return_to_pool(&mut pool.lock(), pending, blockchain.log_target());
                }
                Err(e) => {
                    error!(
                        target: blockchain.log_target(),
                        "Block producer worker panicked: {}", e
                    );
                    break;
                }
            }
        }
    })
}

/// Put the transactions of an unproduced block back into the pool,
/// returning how many were re-admitted
fn return_to_pool(pool: &mut TxPool, transactions: Vec<Transaction>, log_target: &str) -> usize {
    let mut returned = 0;
    for tx in transactions {
        let hash = tx.hash();
        match pool.add_transaction(tx) {
            Ok(()) => returned += 1,
            Err(e) => warn!(
                target: log_target,
                "Transaction {} not returned to the pool: {}", hash, e
            ),
        }
    }
    returned
}
