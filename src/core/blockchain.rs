//! Blockchain implementation
//!
//! [`Blockchain`] composes the validator, the fork tracker, the canonical
//! indices and the state ledgers behind `add_block` and a set of read
//! accessors. It is shared across threads by reference (`Arc<Blockchain>`);
//! every method takes `&self`.
//!
//! # Locking
//!
//! Mutation is serialised by the `ingest` mutex. Locks are always taken in
//! this order and never in reverse:
//!
//! `ingest` -> `chain` -> `forks` -> leaves (`accounts`, `assets`,
//! `contracts`, block store)
//!
//! Readers follow the same order; most take a single lock.
//!
//! # Effects on arrival
//!
//! A block's transactions are applied to the ledgers as soon as the block
//! passes validation, before it is known whether its branch will win. When a
//! branch loses, its applied effects are compensated in reverse order and its
//! transactions are offered back to the mempool through the orphan channel.
//! Readers can observe balances from a branch that later loses.

use crate::config::{ChainConfig, ConfigError};
use crate::contract::{ContractError, ContractExecutor, ContractState, NoopExecutor};
use crate::core::account::{AccountError, AccountState};
use crate::core::assets::{AssetError, AssetRegistry};
use crate::core::block::{Block, Header};
use crate::core::chain_state::{AppliedTx, ChainStore, Effect};
use crate::core::difficulty::{compact_to_target, retarget, target_to_compact};
use crate::core::fork::{Branch, ForkError, ForkPair, ForkPairId, ForkTracker, Placement};
use crate::core::transaction::{Transaction, TransactionError, TxPayload};
use crate::core::validator::{BlockValidator, ValidationContext, Validator};
use crate::storage::{MemoryStore, Storage, StorageError};
use crate::types::{Address, Hash};
use log::{debug, error, info, warn};
use num_bigint::BigUint;
use parking_lot::{Mutex, RwLock};
use thiserror::Error;
use tokio::sync::mpsc;

// =============================================================================
// Errors and status
// =============================================================================

/// Blockchain-related errors
#[derive(Error, Debug)]
pub enum ChainError {
    #[error("Block already known: {0}")]
    BlockKnown(Hash),
    #[error("Height mismatch: expected {expected}, got {got}")]
    HeightMismatch { expected: u32, got: u32 },
    #[error("Block at height {height} does not extend {prev}")]
    LineageMismatch { height: u32, prev: Hash },
    #[error("Data hash does not match the transactions")]
    DataHashMismatch,
    #[error("Block is not signed")]
    Unsigned,
    #[error("Invalid block signature")]
    InvalidSignature,
    #[error("Invalid transaction {0}: {1}")]
    InvalidTransaction(Hash, TransactionError),
    #[error("Block {0} does not meet its difficulty target")]
    InsufficientWork(Hash),
    #[error("Divergence at {0} conflicts with an unresolved fork")]
    ForkConflict(Hash),
    #[error("Forking point not found: {0}")]
    ForkPointNotFound(Hash),
    #[error("Fork pair not found: {0}")]
    ForkPairNotFound(ForkPairId),
    #[error("Block not found: {0}")]
    BlockNotFound(Hash),
    #[error("Transaction not found: {0}")]
    TransactionNotFound(Hash),
    #[error("Height {0} is beyond the chain")]
    HeightOutOfRange(u32),
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
    #[error("Account error: {0}")]
    Account(#[from] AccountError),
}

impl ChainError {
    /// The block was already received; nothing changed
    pub fn is_known(&self) -> bool {
        matches!(self, ChainError::BlockKnown(_))
    }
}

/// Why a single transaction's effect was skipped
#[derive(Error, Debug)]
pub enum EffectError {
    #[error(transparent)]
    Account(#[from] AccountError),
    #[error(transparent)]
    Asset(#[from] AssetError),
    #[error(transparent)]
    Contract(#[from] ContractError),
}

/// Outcome of an accepted block
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockStatus {
    /// Appended to the canonical chain
    Appended,
    /// Opened a fork; the existing canonical branch stays canonical
    ForkNotInLongestChain,
    /// Extended a tracked fork branch
    ForkExtended { branch: Branch, confirmations: u32 },
    /// The challenger won: canonical blocks were swapped
    Reorganized { disconnected: usize, connected: usize },
    /// The incumbent won: the challenger branch was dropped
    ForkDiscarded { discarded: usize },
}

// =============================================================================
// Blockchain
// =============================================================================

/// The ledger engine
pub struct Blockchain {
    pub(crate) config: ChainConfig,
    ingest: Mutex<()>,
    pub(crate) chain: RwLock<ChainStore>,
    pub(crate) forks: RwLock<ForkTracker>,
    pub(crate) accounts: AccountState,
    pub(crate) assets: AssetRegistry,
    contracts: RwLock<ContractState>,
    pub(crate) store: Box<dyn Storage>,
    executor: Box<dyn ContractExecutor>,
    validator: Box<dyn Validator>,
    pub(crate) orphans: mpsc::Sender<Transaction>,
}

impl Blockchain {
    /// Create an engine with an in-memory store and no contract execution
    ///
    /// Returns the receiving end of the orphan channel: transactions of
    /// blocks that lose a reorg arrive there for re-admission.
    pub fn new(config: ChainConfig) -> Result<(Self, mpsc::Receiver<Transaction>), ChainError> {
        config.validate()?;
        let (orphans, orphan_rx) = mpsc::channel(config.orphan_channel_capacity);
        let chain = Self::with_parts(
            config,
            Box::new(MemoryStore::new()),
            Box::new(NoopExecutor),
            orphans,
        )?;
        Ok((chain, orphan_rx))
    }

    /// Create an engine from its collaborators
    pub fn with_parts(
        config: ChainConfig,
        store: Box<dyn Storage>,
        executor: Box<dyn ContractExecutor>,
        orphans: mpsc::Sender<Transaction>,
    ) -> Result<Self, ChainError> {
        config.validate()?;

        let genesis = Block::genesis(config.genesis.clone());
        let genesis_hash = genesis.hash;
        store.put(genesis)?;

        let accounts = AccountState::new();
        for allocation in &config.genesis_allocations {
            accounts.mint(&allocation.address, allocation.balance)?;
        }

        let validator = BlockValidator::new(config.require_proof_of_work);
        info!(
            target: config.log_target.as_str(),
            "Chain initialised at genesis {} with {} allocation(s)",
            genesis_hash,
            config.genesis_allocations.len()
        );

        Ok(Self {
            chain: RwLock::new(ChainStore::new(config.genesis.clone())),
            config,
            ingest: Mutex::new(()),
            forks: RwLock::new(ForkTracker::new()),
            accounts,
            assets: AssetRegistry::new(),
            contracts: RwLock::new(ContractState::new()),
            store,
            executor,
            validator: Box::new(validator),
            orphans,
        })
    }

    /// Replace the block validator
    pub fn set_validator(&mut self, validator: Box<dyn Validator>) {
        self.validator = validator;
    }

    pub fn config(&self) -> &ChainConfig {
        &self.config
    }

    pub(crate) fn log_target(&self) -> &str {
        &self.config.log_target
    }

    /// Validate, store and classify a block, applying its effects
    pub fn add_block(&self, mut block: Block) -> Result<BlockStatus, ChainError> {
        let _ingest = self.ingest.lock();
        let hash = block.header.hash();

        let placement = {
            let chain = self.chain.read();
            let forks = self.forks.read();
            let ctx = ValidationContext {
                chain: &chain,
                forks: &forks,
                store: &*self.store,
            };
            self.validator.validate_block(&block, &hash, &ctx)?;

            forks
                .plan(&block.header, &chain)
                .map_err(|e| match e {
                    ForkError::Conflict(parent) => ChainError::ForkConflict(parent),
                    ForkError::DetachedParent(prev) => ChainError::LineageMismatch {
                        height: block.header.height,
                        prev,
                    },
                })?
        };

        block.hash = hash;
        for tx in &mut block.transactions {
            tx.hash = tx.compute_hash();
        }
        self.store.put(block.clone())?;

        let applied = self.apply_effects(&block);
        {
            let mut chain = self.chain.write();
            chain.link(block.header.prev_block_hash, hash);
            for tx in &block.transactions {
                if applied.iter().any(|a| a.tx == tx.hash) {
                    chain.index_tx(tx.clone(), hash);
                }
            }
            chain.record_applied(hash, applied);

            if matches!(
                placement,
                Placement::Append
                    | Placement::Extend {
                        branch: Branch::Incumbent,
                        ..
                    }
            ) {
                chain.push_canonical(block.header.clone(), hash);
            }
        }

        self.commit(placement, &block)
    }

    fn commit(&self, placement: Placement, block: &Block) -> Result<BlockStatus, ChainError> {
        let hash = block.hash;
        let threshold = self.config.reorg_confirmation_threshold;

        match placement {
            Placement::Append => {
                info!(
                    target: self.log_target(),
                    "Block {} appended at height {} ({} txs)",
                    hash,
                    block.header.height,
                    block.tx_count()
                );
                Ok(BlockStatus::Appended)
            }
            Placement::NewFork {
                forking_point,
                fork_height,
                incumbent,
            } => {
                let (pair, confirmations) = {
                    let mut forks = self.forks.write();
                    let pair = forks.open(forking_point, fork_height, incumbent, hash);
                    let confirmations = forks.pair(pair).map_or(0, |p| p.incumbent.confirmations);
                    (pair, confirmations)
                };
                info!(
                    target: self.log_target(),
                    "Fork {} opened at {} (height {}) by block {}",
                    pair,
                    forking_point,
                    fork_height,
                    hash
                );

                if confirmations >= threshold {
                    return Ok(self.settle(pair, Branch::Incumbent, BlockStatus::ForkNotInLongestChain));
                }
                Ok(BlockStatus::ForkNotInLongestChain)
            }
            Placement::Extend { pair, branch } => {
                let confirmations = self
                    .forks
                    .write()
                    .extend(pair, branch, hash)
                    .ok_or(ChainError::ForkPairNotFound(pair))?;
                debug!(
                    target: self.log_target(),
                    "Fork {} {:?} branch extended by {} ({} confirmations)",
                    pair,
                    branch,
                    hash,
                    confirmations
                );

                let status = BlockStatus::ForkExtended {
                    branch,
                    confirmations,
                };
                if confirmations >= threshold {
                    return Ok(self.settle(pair, branch, status));
                }
                Ok(status)
            }
        }
    }

    /// Resolve a pair in favour of `winner`; a failed reorg leaves the pair
    /// open and reports `fallback`
    fn settle(&self, pair: ForkPairId, winner: Branch, fallback: BlockStatus) -> BlockStatus {
        match self.reorganize(pair, winner) {
            Ok(status) => status,
            Err(e) => {
                error!(
                    target: self.log_target(),
                    "Resolving fork {} failed, leaving it open: {}", pair, e
                );
                fallback
            }
        }
    }

    fn apply_effects(&self, block: &Block) -> Vec<AppliedTx> {
        let mut applied = Vec::with_capacity(block.transactions.len());

        for tx in &block.transactions {
            let Some(sender) = tx.sender() else {
                continue;
            };
            match self.apply_tx(tx, sender) {
                Ok(effect) => applied.push(AppliedTx { tx: tx.hash, effect }),
                Err(e) => warn!(
                    target: self.log_target(),
                    "Transaction {} in block {} not applied: {}", tx.hash, block.hash, e
                ),
            }
        }

        applied
    }

    pub(super) fn apply_tx(
        &self,
        tx: &Transaction,
        sender: Address,
    ) -> Result<Effect, EffectError> {
        match &tx.payload {
            TxPayload::NativeTransfer { to, value } => {
                self.accounts.transfer(&sender, to, *value)?;
                Ok(Effect::Transfer {
                    from: sender,
                    to: *to,
                    value: *value,
                })
            }
            TxPayload::CollectionMint(collection) => {
                self.assets
                    .register_collection(tx.hash, sender, collection)?;
                Ok(Effect::Collection(tx.hash))
            }
            TxPayload::NftMint(mint) => {
                self.assets.mint_nft(tx.hash, sender, mint)?;
                Ok(Effect::Nft(tx.hash))
            }
            TxPayload::ContractCall { data } => {
                if !data.is_empty() {
                    let mut state = self.contracts.write();
                    let mut scratch = state.clone();
                    self.executor.execute(data, &mut scratch)?;
                    *state = scratch;
                }
                Ok(Effect::Contract)
            }
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Height of the canonical tip
    pub fn height(&self) -> u32 {
        self.chain.read().height()
    }

    pub fn tip(&self) -> Hash {
        self.chain.read().tip()
    }

    pub fn tip_header(&self) -> Header {
        self.chain.read().tip_header().clone()
    }

    /// Canonical block at `height`
    pub fn get_block(&self, height: u32) -> Result<Block, ChainError> {
        let hash = self
            .chain
            .read()
            .hash_at(height)
            .ok_or(ChainError::HeightOutOfRange(height))?;
        self.store
            .get(&hash)
            .map_err(|_| ChainError::BlockNotFound(hash))
    }

    /// Canonical or fork-tracked block by hash
    pub fn get_block_by_hash(&self, hash: &Hash) -> Result<Block, ChainError> {
        let tracked = {
            let chain = self.chain.read();
            let forks = self.forks.read();
            chain.is_canonical(hash) || forks.contains(hash)
        };
        if !tracked {
            return Err(ChainError::BlockNotFound(*hash));
        }
        self.store
            .get(hash)
            .map_err(|_| ChainError::BlockNotFound(*hash))
    }

    /// Canonical header at `height`
    pub fn get_headers(&self, height: u32) -> Result<Header, ChainError> {
        self.chain
            .read()
            .header(height)
            .cloned()
            .ok_or(ChainError::HeightOutOfRange(height))
    }

    /// Indexed transaction by hash
    pub fn get_tx_by_hash(&self, hash: &Hash) -> Result<Transaction, ChainError> {
        self.chain
            .read()
            .tx(hash)
            .map(|entry| entry.tx.clone())
            .ok_or(ChainError::TransactionNotFound(*hash))
    }

    pub fn has_block(&self, height: u32) -> bool {
        height <= self.height()
    }

    /// Children received for `hash`
    pub fn children(&self, hash: &Hash) -> Vec<Hash> {
        self.chain.read().children(hash).to_vec()
    }

    pub fn balance(&self, address: &Address) -> Result<u64, ChainError> {
        Ok(self.accounts.balance(address)?)
    }

    pub fn accounts(&self) -> &AccountState {
        &self.accounts
    }

    pub fn assets(&self) -> &AssetRegistry {
        &self.assets
    }

    pub fn contract_state(&self) -> ContractState {
        self.contracts.read().clone()
    }

    /// Unresolved fork pairs
    pub fn fork_pairs(&self) -> Vec<ForkPair> {
        self.forks.read().pairs()
    }

    // =========================================================================
    // Difficulty
    // =========================================================================

    /// Compact bits a block at `height` should carry
    ///
    /// Every `height_divisor` blocks the target is scaled by the time the
    /// previous interval actually took versus `height_divisor *
    /// avg_target_time_secs`; other heights inherit their parent's bits.
    pub fn bits_for_height(&self, height: u32) -> Result<u32, ChainError> {
        let chain = self.chain.read();
        if height == 0 {
            return Ok(self.config.genesis.bits);
        }

        let prev = chain
            .header(height - 1)
            .ok_or(ChainError::HeightOutOfRange(height))?;
        let divisor = self.config.height_divisor;
        if height % divisor != 0 || prev.height < divisor {
            return Ok(prev.bits);
        }

        let first = chain
            .header(prev.height - divisor)
            .ok_or(ChainError::HeightOutOfRange(prev.height - divisor))?;
        // Equal timestamps would collapse the target to zero
        let actual = prev.timestamp.saturating_sub(first.timestamp).max(1);
        let expected = u64::from(divisor) * self.config.avg_target_time_secs;

        let target = retarget(&prev.target(), actual, expected);
        let bits = target_to_compact(&target);
        if bits != prev.bits {
            info!(
                target: self.log_target(),
                "Retarget at height {}: {:#010x} -> {:#010x} ({}s actual, {}s expected)",
                height,
                prev.bits,
                bits,
                actual,
                expected
            );
        }
        Ok(bits)
    }

    /// Bits for the block after the canonical tip
    pub fn next_bits(&self) -> Result<u32, ChainError> {
        self.bits_for_height(self.height() + 1)
    }

    /// Full target a block at `height` must meet
    pub fn target_for_height(&self, height: u32) -> Result<BigUint, ChainError> {
        self.bits_for_height(height)
            .map(compact_to_target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::difficulty::GENESIS_BITS;
    use crate::crypto::KeyPair;
    use std::sync::Arc;
    use std::thread;

    fn init() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    struct Harness {
        chain: Blockchain,
        orphans: mpsc::Receiver<Transaction>,
        producer: KeyPair,
    }

    impl Harness {
        fn new(config: ChainConfig) -> Self {
            init();
            let (chain, orphans) = Blockchain::new(config).unwrap();
            Self {
                chain,
                orphans,
                producer: KeyPair::generate(),
            }
        }

        /// Signed child of `prev`; `salt` tells siblings apart
        fn block_on(&self, prev: &Header, txs: Vec<Transaction>, salt: u64) -> Block {
            let mut block = Block::from_prev_header(prev, txs).unwrap();
            block.header.nonce = salt;
            block.sign(&self.producer).unwrap();
            block
        }

        fn block_at(&self, prev: &Header, timestamp: u64) -> Block {
            let mut block = Block::from_prev_header(prev, vec![]).unwrap();
            block.header.timestamp = timestamp;
            block.sign(&self.producer).unwrap();
            block
        }

        fn genesis(&self) -> Header {
            self.chain.get_headers(0).unwrap()
        }
    }

    fn transfer(from: &KeyPair, to: Address, value: u64, nonce: u64) -> Transaction {
        let mut tx = Transaction::transfer(to, value, nonce);
        tx.sign(from).unwrap();
        tx
    }

    #[test]
    fn test_genesis_allocations_are_minted() {
        let alice = KeyPair::generate();
        let h = Harness::new(ChainConfig::default().with_allocation(alice.address(), 150));

        assert_eq!(h.chain.height(), 0);
        assert_eq!(h.chain.balance(&alice.address()).unwrap(), 150);
        assert_eq!(h.chain.get_block(0).unwrap().header, h.genesis());
    }

    #[test]
    fn test_transfer_block_and_competing_sibling() {
        let a = KeyPair::generate();
        let b = KeyPair::generate();
        let h = Harness::new(ChainConfig::default().with_allocation(a.address(), 150));

        let tx = transfer(&a, b.address(), 100, 0);
        let block1 = h.block_on(&h.genesis(), vec![tx.clone()], 0);
        assert_eq!(h.chain.add_block(block1.clone()).ok(), Some(BlockStatus::Appended));

        assert_eq!(h.chain.balance(&a.address()).unwrap(), 50);
        assert_eq!(h.chain.balance(&b.address()).unwrap(), 100);
        assert_eq!(h.chain.get_block(1).unwrap().header, block1.header);
        assert_eq!(h.chain.get_tx_by_hash(&tx.hash()).unwrap(), tx);

        let rival = h.block_on(&h.genesis(), vec![], 1);
        assert_eq!(
            h.chain.add_block(rival.clone()).ok(),
            Some(BlockStatus::ForkNotInLongestChain)
        );
        assert_eq!(h.chain.height(), 1);
        assert_eq!(h.chain.get_block(1).unwrap().hash, block1.header.hash());
        assert_eq!(h.chain.fork_pairs().len(), 1);
        assert_eq!(h.chain.children(&h.genesis().hash()).len(), 2);
        assert!(h.chain.get_block_by_hash(&rival.header.hash()).is_ok());
    }

    #[test]
    fn test_add_block_twice_is_known() {
        let a = KeyPair::generate();
        let h = Harness::new(ChainConfig::default().with_allocation(a.address(), 150));

        let block = h.block_on(&h.genesis(), vec![transfer(&a, Address([2; 20]), 10, 0)], 0);
        h.chain.add_block(block.clone()).unwrap();

        let headers_before = h.chain.get_headers(1).unwrap();
        let accounts_before = h.chain.accounts().snapshot();

        let err = h.chain.add_block(block).unwrap_err();
        assert!(err.is_known());
        assert_eq!(h.chain.height(), 1);
        assert_eq!(h.chain.get_headers(1).unwrap(), headers_before);
        assert_eq!(h.chain.accounts().snapshot(), accounts_before);
    }

    #[test]
    fn test_challenger_reorg_after_three_confirmations() {
        let a = KeyPair::generate();
        let b = KeyPair::generate();
        let mut h = Harness::new(ChainConfig::default().with_allocation(a.address(), 150));

        let tx = transfer(&a, b.address(), 100, 0);
        let c1 = h.block_on(&h.genesis(), vec![tx.clone()], 0);
        let c2 = h.block_on(&h.genesis(), vec![], 1);
        h.chain.add_block(c1.clone()).unwrap();
        h.chain.add_block(c2.clone()).unwrap();

        let d1 = h.block_on(&c2.header, vec![], 0);
        let d2 = h.block_on(&d1.header, vec![], 0);
        let d3 = h.block_on(&d2.header, vec![], 0);

        assert_eq!(
            h.chain.add_block(d1).ok(),
            Some(BlockStatus::ForkExtended {
                branch: Branch::Challenger,
                confirmations: 1
            })
        );
        assert_eq!(
            h.chain.add_block(d2).ok(),
            Some(BlockStatus::ForkExtended {
                branch: Branch::Challenger,
                confirmations: 2
            })
        );
        // Still the incumbent until the threshold
        assert_eq!(h.chain.height(), 1);

        assert_eq!(
            h.chain.add_block(d3.clone()).ok(),
            Some(BlockStatus::Reorganized {
                disconnected: 1,
                connected: 4
            })
        );

        assert_eq!(h.chain.height(), 4);
        assert_eq!(h.chain.tip(), d3.header.hash());
        assert_eq!(h.chain.get_block(1).unwrap().hash, c2.header.hash());
        assert!(h.chain.fork_pairs().is_empty());
        assert_eq!(h.chain.children(&h.genesis().hash()), vec![c2.header.hash()]);

        // C1's transfer was reverted, unindexed and requeued
        assert_eq!(h.chain.balance(&a.address()).unwrap(), 150);
        assert_eq!(h.chain.balance(&b.address()).unwrap(), 0);
        assert!(matches!(
            h.chain.get_tx_by_hash(&tx.hash()),
            Err(ChainError::TransactionNotFound(_))
        ));
        assert_eq!(h.orphans.try_recv().unwrap(), tx);

        assert!(matches!(
            h.chain.get_block_by_hash(&c1.header.hash()),
            Err(ChainError::BlockNotFound(_))
        ));
        assert!(h.chain.add_block(c1).unwrap_err().is_known());
    }

    #[test]
    fn test_incumbent_win_discards_challenger() {
        let a = KeyPair::generate();
        let b = KeyPair::generate();
        let mut h = Harness::new(ChainConfig::default().with_allocation(a.address(), 150));

        let c1 = h.block_on(&h.genesis(), vec![], 0);
        h.chain.add_block(c1.clone()).unwrap();

        let tx = transfer(&a, b.address(), 100, 0);
        let mut collection = Transaction::collection("relics", vec![], 1);
        collection.sign(&a).unwrap();
        let c2 = h.block_on(&h.genesis(), vec![tx.clone(), collection.clone()], 1);
        assert_eq!(
            h.chain.add_block(c2).ok(),
            Some(BlockStatus::ForkNotInLongestChain)
        );

        // Effects of the non-canonical block are visible until it loses
        assert_eq!(h.chain.balance(&a.address()).unwrap(), 50);
        assert!(h.chain.assets().collection(&collection.hash()).is_some());

        let e2 = h.block_on(&c1.header, vec![], 0);
        let e3 = h.block_on(&e2.header, vec![], 0);
        let e4 = h.block_on(&e3.header, vec![], 0);
        assert_eq!(
            h.chain.add_block(e2).ok(),
            Some(BlockStatus::ForkExtended {
                branch: Branch::Incumbent,
                confirmations: 1
            })
        );
        h.chain.add_block(e3).unwrap();
        assert_eq!(
            h.chain.add_block(e4.clone()).ok(),
            Some(BlockStatus::ForkDiscarded { discarded: 1 })
        );

        assert_eq!(h.chain.height(), 4);
        assert_eq!(h.chain.tip(), e4.header.hash());
        assert_eq!(h.chain.get_block(1).unwrap().hash, c1.header.hash());
        assert!(h.chain.fork_pairs().is_empty());

        assert_eq!(h.chain.balance(&a.address()).unwrap(), 150);
        assert_eq!(h.chain.balance(&b.address()).unwrap(), 0);
        assert!(h.chain.assets().collection(&collection.hash()).is_none());

        assert_eq!(h.orphans.try_recv().unwrap(), tx);
        assert_eq!(h.orphans.try_recv().unwrap(), collection);
    }

    #[test]
    fn test_forged_block_signature_rejected() {
        let a = KeyPair::generate();
        let h = Harness::new(ChainConfig::default().with_allocation(a.address(), 150));

        let mut block = h.block_on(&h.genesis(), vec![transfer(&a, Address([2; 20]), 10, 0)], 0);
        block.sign(&KeyPair::generate()).unwrap();
        block.validator = Some(h.producer.public_key());

        assert!(matches!(
            h.chain.add_block(block),
            Err(ChainError::InvalidSignature)
        ));
        assert_eq!(h.chain.height(), 0);
        assert_eq!(h.chain.balance(&a.address()).unwrap(), 150);
    }

    #[test]
    fn test_tampered_transaction_rejected() {
        let a = KeyPair::generate();
        let h = Harness::new(ChainConfig::default().with_allocation(a.address(), 150));

        let mut block = h.block_on(&h.genesis(), vec![transfer(&a, Address([2; 20]), 10, 0)], 0);
        block.transactions[0].payload = TxPayload::NativeTransfer {
            to: Address([3; 20]),
            value: 140,
        };

        assert!(matches!(
            h.chain.add_block(block.clone()),
            Err(ChainError::InvalidTransaction(_, TransactionError::InvalidSignature))
        ));
        assert!(!h.chain.store.has(&block.header.hash()));
    }

    #[test]
    fn test_height_and_lineage_rejected() {
        let h = Harness::new(ChainConfig::default());

        let b1 = h.block_on(&h.genesis(), vec![], 0);
        let b2 = h.block_on(&b1.header, vec![], 0);
        assert!(matches!(
            h.chain.add_block(b2),
            Err(ChainError::HeightMismatch {
                expected: 1,
                got: 2
            })
        ));

        let mut stray = h.block_on(&h.genesis(), vec![], 0);
        stray.header.prev_block_hash = Hash([8; 32]);
        stray.sign(&h.producer).unwrap();
        assert!(matches!(
            h.chain.add_block(stray),
            Err(ChainError::LineageMismatch { height: 1, .. })
        ));
    }

    #[test]
    fn test_failed_transfer_is_not_indexed() {
        let a = KeyPair::generate();
        let b = KeyPair::generate();
        let h = Harness::new(ChainConfig::default());

        let tx = transfer(&a, b.address(), 10, 0);
        let block = h.block_on(&h.genesis(), vec![tx.clone()], 0);
        assert_eq!(h.chain.add_block(block).ok(), Some(BlockStatus::Appended));

        assert_eq!(h.chain.height(), 1);
        assert!(h.chain.get_tx_by_hash(&tx.hash()).is_err());
        assert!(h.chain.balance(&a.address()).is_err());
        assert!(!h.chain.accounts().contains(&b.address()));
    }

    #[test]
    fn test_second_divergence_is_a_conflict() {
        let h = Harness::new(ChainConfig::default());

        let b1 = h.block_on(&h.genesis(), vec![], 0);
        let b2 = h.block_on(&b1.header, vec![], 0);
        h.chain.add_block(b1.clone()).unwrap();
        h.chain.add_block(b2).unwrap();

        let rival2 = h.block_on(&b1.header, vec![], 9);
        assert_eq!(
            h.chain.add_block(rival2).ok(),
            Some(BlockStatus::ForkNotInLongestChain)
        );

        let rival1 = h.block_on(&h.genesis(), vec![], 9);
        assert!(matches!(
            h.chain.add_block(rival1),
            Err(ChainError::ForkConflict(_))
        ));
    }

    #[test]
    fn test_stale_fork_discarded_immediately() {
        let h = Harness::new(ChainConfig::default());

        let mut prev = h.genesis();
        for _ in 0..4 {
            let block = h.block_on(&prev, vec![], 0);
            prev = block.header.clone();
            h.chain.add_block(block).unwrap();
        }

        let stale = h.block_on(&h.genesis(), vec![], 7);
        assert_eq!(
            h.chain.add_block(stale.clone()).ok(),
            Some(BlockStatus::ForkDiscarded { discarded: 1 })
        );
        assert_eq!(h.chain.height(), 4);
        assert!(h.chain.fork_pairs().is_empty());
        assert!(h.chain.add_block(stale).unwrap_err().is_known());
    }

    #[test]
    fn test_full_orphan_channel_drops_transactions() {
        let a = KeyPair::generate();
        let config = ChainConfig {
            orphan_channel_capacity: 1,
            ..ChainConfig::default()
        }
        .with_allocation(a.address(), 150);
        let mut h = Harness::new(config);

        let c1 = h.block_on(&h.genesis(), vec![], 0);
        h.chain.add_block(c1.clone()).unwrap();
        let txs = vec![
            transfer(&a, Address([2; 20]), 1, 0),
            transfer(&a, Address([2; 20]), 1, 1),
        ];
        let c2 = h.block_on(&h.genesis(), txs.clone(), 1);
        h.chain.add_block(c2).unwrap();

        let mut prev = c1.header;
        for _ in 0..3 {
            let block = h.block_on(&prev, vec![], 0);
            prev = block.header.clone();
            h.chain.add_block(block).unwrap();
        }

        assert!(h.chain.fork_pairs().is_empty());
        assert_eq!(h.orphans.try_recv().unwrap(), txs[0]);
        assert!(h.orphans.try_recv().is_err());
        assert_eq!(h.chain.balance(&a.address()).unwrap(), 150);
    }

    #[test]
    fn test_reorg_applies_winning_copy_of_shared_transaction() {
        let a = KeyPair::generate();
        let b = KeyPair::generate();
        let mut h = Harness::new(ChainConfig::default().with_allocation(a.address(), 150));

        let tx = transfer(&a, b.address(), 100, 0);
        let c1 = h.block_on(&h.genesis(), vec![tx.clone()], 0);
        let c1b = h.block_on(&c1.header, vec![], 0);
        h.chain.add_block(c1.clone()).unwrap();
        h.chain.add_block(c1b).unwrap();

        // The challenger's copy cannot apply while c1 holds the funds
        let c2 = h.block_on(&h.genesis(), vec![tx.clone()], 1);
        let c2_hash = c2.header.hash();
        assert_eq!(
            h.chain.add_block(c2.clone()).ok(),
            Some(BlockStatus::ForkNotInLongestChain)
        );
        assert_eq!(h.chain.balance(&a.address()).unwrap(), 50);

        let d1 = h.block_on(&c2.header, vec![], 0);
        let d2 = h.block_on(&d1.header, vec![], 0);
        let d3 = h.block_on(&d2.header, vec![], 0);
        h.chain.add_block(d1).unwrap();
        h.chain.add_block(d2).unwrap();
        assert_eq!(
            h.chain.add_block(d3).ok(),
            Some(BlockStatus::Reorganized {
                disconnected: 2,
                connected: 4
            })
        );

        assert_eq!(h.chain.get_block(1).unwrap().hash, c2_hash);
        assert_eq!(h.chain.balance(&a.address()).unwrap(), 50);
        assert_eq!(h.chain.balance(&b.address()).unwrap(), 100);
        assert!(h.chain.get_tx_by_hash(&tx.hash()).is_ok());
        assert!(h.orphans.try_recv().is_err());
        assert!(h.chain.children(&c1.header.hash()).is_empty());
    }

    #[test]
    fn test_reorg_drops_nft_of_losing_collection() {
        let owner = KeyPair::generate();
        let mut h = Harness::new(ChainConfig::default());

        let mut collection = Transaction::collection("relics", vec![], 0);
        collection.sign(&owner).unwrap();
        let mut mint = Transaction::nft_mint(collection.hash(), b"#1".to_vec(), 1);
        mint.sign(&owner).unwrap();

        let c1 = h.block_on(&h.genesis(), vec![collection.clone()], 0);
        h.chain.add_block(c1).unwrap();
        let c2 = h.block_on(&h.genesis(), vec![mint.clone()], 1);
        h.chain.add_block(c2.clone()).unwrap();
        assert!(h.chain.assets().nft(&mint.hash()).is_some());

        let mut prev = c2.header.clone();
        let mut status = None;
        for _ in 0..3 {
            let block = h.block_on(&prev, vec![], 0);
            prev = block.header.clone();
            status = h.chain.add_block(block).ok();
        }
        assert_eq!(
            status,
            Some(BlockStatus::Reorganized {
                disconnected: 1,
                connected: 4
            })
        );

        assert_eq!(h.chain.get_block(1).unwrap().hash, c2.header.hash());
        assert!(h.chain.assets().collection(&collection.hash()).is_none());
        assert!(h.chain.assets().nft(&mint.hash()).is_none());
        assert!(h.chain.get_tx_by_hash(&mint.hash()).is_err());

        assert_eq!(h.orphans.try_recv().unwrap(), collection);
        assert!(h.orphans.try_recv().is_err());
    }

    /// Block store that can pretend a block went missing
    struct LossyStore {
        inner: MemoryStore,
        lost: Arc<Mutex<Option<Hash>>>,
    }

    impl Storage for LossyStore {
        fn put(&self, block: Block) -> Result<(), StorageError> {
            self.inner.put(block)
        }

        fn get(&self, hash: &Hash) -> Result<Block, StorageError> {
            if *self.lost.lock() == Some(*hash) {
                return Err(StorageError::NotFound(*hash));
            }
            self.inner.get(hash)
        }

        fn has(&self, hash: &Hash) -> bool {
            self.inner.has(hash)
        }

        fn len(&self) -> usize {
            self.inner.len()
        }
    }

    #[test]
    fn test_failed_reorg_leaves_fork_open() {
        init();
        let lost = Arc::new(Mutex::new(None));
        let store = LossyStore {
            inner: MemoryStore::new(),
            lost: Arc::clone(&lost),
        };
        let (orphans, _rx) = mpsc::channel(8);
        let chain = Blockchain::with_parts(
            ChainConfig::default(),
            Box::new(store),
            Box::new(NoopExecutor),
            orphans,
        )
        .unwrap();

        let producer = KeyPair::generate();
        let child = |prev: &Header, salt: u64| {
            let mut block = Block::from_prev_header(prev, vec![]).unwrap();
            block.header.nonce = salt;
            block.sign(&producer).unwrap();
            block
        };

        let genesis = chain.get_headers(0).unwrap();
        let c1 = child(&genesis, 0);
        let c2 = child(&genesis, 1);
        chain.add_block(c1.clone()).unwrap();
        chain.add_block(c2.clone()).unwrap();
        *lost.lock() = Some(c1.header.hash());

        let d1 = child(&c2.header, 0);
        let d2 = child(&d1.header, 0);
        let d3 = child(&d2.header, 0);
        chain.add_block(d1).unwrap();
        chain.add_block(d2).unwrap();
        assert_eq!(
            chain.add_block(d3.clone()).ok(),
            Some(BlockStatus::ForkExtended {
                branch: Branch::Challenger,
                confirmations: 3
            })
        );

        assert_eq!(chain.height(), 1);
        assert_eq!(chain.tip(), c1.header.hash());
        let pairs = chain.fork_pairs();
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].challenger.chain_tip, d3.header.hash());
        assert_eq!(pairs[0].challenger.confirmations, 3);
        assert_eq!(chain.children(&genesis.hash()).len(), 2);

        // With the block back, the next extension resolves the pair
        *lost.lock() = None;
        let d4 = child(&d3.header, 0);
        assert_eq!(
            chain.add_block(d4.clone()).ok(),
            Some(BlockStatus::Reorganized {
                disconnected: 1,
                connected: 5
            })
        );
        assert_eq!(chain.tip(), d4.header.hash());
        assert!(chain.fork_pairs().is_empty());
    }

    #[test]
    fn test_contract_effects_commit_only_on_success() {
        struct FlagExecutor;

        impl ContractExecutor for FlagExecutor {
            fn execute(
                &self,
                payload: &[u8],
                state: &mut ContractState,
            ) -> Result<(), ContractError> {
                state.put(payload, vec![1]);
                if payload == b"fail" {
                    return Err(ContractError::ExecutionFailed("refused".into()));
                }
                Ok(())
            }
        }

        init();
        let (tx_sender, _rx) = mpsc::channel(8);
        let chain = Blockchain::with_parts(
            ChainConfig::default(),
            Box::new(MemoryStore::new()),
            Box::new(FlagExecutor),
            tx_sender,
        )
        .unwrap();
        let caller = KeyPair::generate();
        let producer = KeyPair::generate();

        let mut ok = Transaction::contract_call(b"ok".to_vec(), 0);
        ok.sign(&caller).unwrap();
        let mut fail = Transaction::contract_call(b"fail".to_vec(), 1);
        fail.sign(&caller).unwrap();

        let genesis = chain.get_headers(0).unwrap();
        let mut block = Block::from_prev_header(&genesis, vec![ok.clone(), fail.clone()]).unwrap();
        block.sign(&producer).unwrap();
        assert_eq!(chain.add_block(block).ok(), Some(BlockStatus::Appended));

        let state = chain.contract_state();
        assert_eq!(state.get(b"ok"), Some(&[1u8][..]));
        assert!(state.get(b"fail").is_none());
        assert!(chain.get_tx_by_hash(&ok.hash()).is_ok());
        assert!(chain.get_tx_by_hash(&fail.hash()).is_err());
    }

    #[test]
    fn test_nft_mint_requires_collection_owner() {
        let owner = KeyPair::generate();
        let stranger = KeyPair::generate();
        let h = Harness::new(ChainConfig::default());

        let mut collection = Transaction::collection("relics", vec![], 0);
        collection.sign(&owner).unwrap();
        let mut mint = Transaction::nft_mint(collection.hash(), b"#1".to_vec(), 1);
        mint.sign(&owner).unwrap();
        let mut forged = Transaction::nft_mint(collection.hash(), b"#2".to_vec(), 0);
        forged.sign(&stranger).unwrap();

        let block = h.block_on(
            &h.genesis(),
            vec![collection.clone(), mint.clone(), forged.clone()],
            0,
        );
        h.chain.add_block(block).unwrap();

        assert_eq!(h.chain.assets().nfts_in(&collection.hash()).len(), 1);
        assert!(h.chain.assets().nft(&mint.hash()).is_some());
        assert!(h.chain.get_tx_by_hash(&forged.hash()).is_err());
    }

    #[test]
    fn test_retarget_every_divisor_blocks() {
        let config = ChainConfig {
            height_divisor: 2,
            avg_target_time_secs: 10,
            ..ChainConfig::default()
        };
        let h = Harness::new(config);
        let start = h.genesis().timestamp;

        let b1 = h.block_at(&h.genesis(), start + 10);
        let b2 = h.block_at(&b1.header, start + 20);
        h.chain.add_block(b1).unwrap();
        h.chain.add_block(b2.clone()).unwrap();

        // Not enough history before the first full interval
        assert_eq!(h.chain.bits_for_height(2).unwrap(), GENESIS_BITS);
        assert_eq!(h.chain.bits_for_height(3).unwrap(), GENESIS_BITS);

        // Interval b1..b3 took 60s against 20s expected: target triples
        let b3 = h.block_at(&b2.header, start + 70);
        h.chain.add_block(b3).unwrap();
        let bits = h.chain.bits_for_height(4).unwrap();
        let expected = target_to_compact(&(compact_to_target(GENESIS_BITS) * 3u32));
        assert_eq!(bits, expected);
        assert!(h.chain.target_for_height(4).unwrap() > compact_to_target(GENESIS_BITS));
        assert_eq!(h.chain.next_bits().unwrap(), bits);

        assert!(matches!(
            h.chain.bits_for_height(9),
            Err(ChainError::HeightOutOfRange(9))
        ));
    }

    #[test]
    fn test_on_time_interval_keeps_target() {
        let config = ChainConfig {
            height_divisor: 2,
            avg_target_time_secs: 10,
            ..ChainConfig::default()
        };
        let h = Harness::new(config);
        let start = h.genesis().timestamp;

        let mut prev = h.genesis();
        for i in 1..=3 {
            let block = h.block_at(&prev, start + 10 * i);
            prev = block.header.clone();
            h.chain.add_block(block).unwrap();
        }
        assert_eq!(h.chain.bits_for_height(4).unwrap(), GENESIS_BITS);
    }

    #[test]
    fn test_concurrent_readers_see_consistent_blocks() {
        let h = Harness::new(ChainConfig::default());
        let chain = Arc::new(h.chain);

        let mut blocks = Vec::new();
        let mut prev = chain.get_headers(0).unwrap();
        for _ in 0..20 {
            let mut block = Block::from_prev_header(&prev, vec![]).unwrap();
            block.sign(&h.producer).unwrap();
            prev = block.header.clone();
            blocks.push(block);
        }

        let writer = {
            let chain = Arc::clone(&chain);
            thread::spawn(move || {
                for block in blocks {
                    chain.add_block(block).unwrap();
                }
            })
        };

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let chain = Arc::clone(&chain);
                thread::spawn(move || {
                    for _ in 0..200 {
                        let height = chain.height();
                        let block = chain.get_block(height).unwrap();
                        assert_eq!(block.header.height, height);
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for reader in readers {
            reader.join().unwrap();
        }
        assert_eq!(chain.height(), 20);
    }

    #[test]
    fn test_rejects_invalid_config() {
        let config = ChainConfig {
            height_divisor: 0,
            ..ChainConfig::default()
        };
        assert!(matches!(
            Blockchain::new(config),
            Err(ChainError::Config(_))
        ));
    }
}
