//! powledger: a single-node proof-of-work ledger engine
//!
//! This crate provides the consensus core of a small blockchain:
//! - Signed transactions with tagged payloads (native transfers, NFT
//!   collections and mints, opaque contract calls)
//! - Blocks committing to their transactions through a merkle data hash
//! - An account ledger with atomic transfers
//! - Block validation, fork tracking and reorganization with compensating
//!   reversal of the losing branch
//! - Compact difficulty targets with periodic retargeting
//! - A proof-of-work miner, a transaction pool and a periodic block producer
//!
//! # Example
//!
//! ```rust
//! use powledger::{Blockchain, BlockStatus, ChainConfig, KeyPair, Miner, Transaction};
//!
//! let alice = KeyPair::generate();
//! let bob = KeyPair::generate();
//!
//! // Create a chain that mints 150 coins to alice at genesis
//! let config = ChainConfig::default().with_allocation(alice.address(), 150);
//! let (blockchain, _orphans) = Blockchain::new(config).unwrap();
//!
//! // Sign a transfer and mine it into a block
//! let mut tx = Transaction::transfer(bob.address(), 100, 0);
//! tx.sign(&alice).unwrap();
//!
//! let miner = Miner::new(KeyPair::generate());
//! let (block, status, _stats) = miner.mine_and_submit(&blockchain, vec![tx]).unwrap();
//! assert_eq!(status, BlockStatus::Appended);
//! assert_eq!(block.header.height, 1);
//!
//! assert_eq!(blockchain.balance(&alice.address()).unwrap(), 50);
//! assert_eq!(blockchain.balance(&bob.address()).unwrap(), 100);
//! ```

pub mod config;
pub mod contract;
pub mod core;
pub mod crypto;
pub mod mining;
pub mod storage;
pub mod types;

// Re-export commonly used types
pub use config::{ChainConfig, ConfigError, GenesisAllocation};
pub use contract::{ContractError, ContractExecutor, ContractState, NoopExecutor};
pub use core::{
    Block, BlockStatus, BlockValidator, Blockchain, Branch, ChainError, Header, Transaction,
    TxPayload, Validator,
};
pub use crypto::{KeyPair, PublicKey, Signature, Signer};
pub use mining::{spawn_block_producer, Miner, ProducerConfig, TxPool};
pub use storage::{MemoryStore, Storage, StorageError};
pub use types::{Address, Hash};
