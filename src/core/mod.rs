//! Core ledger components
//!
//! This module contains the fundamental building blocks:
//! - Transactions with tagged payloads (transfers, NFT collections and mints, contract calls)
//! - Blocks with a data-hash commitment and validator signature
//! - Account balances and the native asset registry
//! - Compact difficulty targets and retargeting
//! - Block validation, fork tracking and reorganization
//! - The blockchain orchestrator

pub mod account;
pub mod assets;
pub mod block;
pub mod blockchain;
pub mod chain_state;
pub mod difficulty;
pub mod fork;
mod reorg;
pub mod transaction;
pub mod validator;

pub use account::{Account, AccountError, AccountState};
pub use assets::{AssetError, AssetRegistry, Collection, Nft};
pub use block::{calculate_data_hash, Block, BlockError, Header, BLOCK_VERSION};
pub use blockchain::{BlockStatus, Blockchain, ChainError, EffectError};
pub use chain_state::{AppliedTx, ChainStore, Effect, TxEntry};
pub use difficulty::{
    compact_to_target, meets_target, retarget, target_to_compact, GENESIS_BITS,
};
pub use fork::{Branch, Fork, ForkError, ForkPair, ForkPairId, ForkTracker, Placement};
pub use transaction::{CollectionTx, MintTx, Transaction, TransactionError, TxPayload};
pub use validator::{BlockValidator, ValidationContext, Validator};
