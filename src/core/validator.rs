//! Block validation
//!
//! The validator is the gate in front of every index. Checks run in a fixed
//! order and the first failure is returned:
//!
//! 1. known block
//! 2. height
//! 3. lineage
//! 4. transaction signatures
//! 5. block signature and data commitment
//! 6. proof of work (optional)

use crate::core::block::{Block, BlockError};
use crate::core::blockchain::ChainError;
use crate::core::chain_state::ChainStore;
use crate::core::fork::ForkTracker;
use crate::storage::Storage;
use crate::types::Hash;

/// Read-only view of the engine a validator checks a block against
pub struct ValidationContext<'a> {
    pub chain: &'a ChainStore,
    pub forks: &'a ForkTracker,
    pub store: &'a dyn Storage,
}

/// Pluggable block validation
pub trait Validator: Send + Sync {
    /// `hash` is the freshly computed header hash of `block`
    fn validate_block(
        &self,
        block: &Block,
        hash: &Hash,
        ctx: &ValidationContext<'_>,
    ) -> Result<(), ChainError>;
}

/// Default validator
#[derive(Debug, Clone, Default)]
pub struct BlockValidator {
    require_proof_of_work: bool,
}

impl BlockValidator {
    pub fn new(require_proof_of_work: bool) -> Self {
        Self {
            require_proof_of_work,
        }
    }

    fn check_known(&self, hash: &Hash, ctx: &ValidationContext<'_>) -> Result<(), ChainError> {
        if ctx.chain.is_canonical(hash) || ctx.forks.contains(hash) || ctx.store.has(hash) {
            return Err(ChainError::BlockKnown(*hash));
        }
        Ok(())
    }

    /// Next canonical height, the height after a tracked fork tip, or a
    /// height at or below the canonical tip (a new divergence)
    fn check_height(&self, block: &Block, ctx: &ValidationContext<'_>) -> Result<(), ChainError> {
        let height = block.header.height;
        let current = ctx.chain.height();
        let expected = current + 1;

        if height == 0 {
            return Err(ChainError::HeightMismatch {
                expected,
                got: height,
            });
        }

        let after_fork_tip =
            ctx.forks.tip_height(&block.header.prev_block_hash) == Some(height - 1);
        if height == expected || after_fork_tip || height <= current {
            return Ok(());
        }

        Err(ChainError::HeightMismatch {
            expected,
            got: height,
        })
    }

    fn check_lineage(&self, block: &Block, ctx: &ValidationContext<'_>) -> Result<(), ChainError> {
        let height = block.header.height;
        let prev = block.header.prev_block_hash;

        let canonical_parent = ctx.chain.hash_at(height - 1) == Some(prev);
        let fork_parent = ctx.forks.tip_height(&prev) == Some(height - 1);
        if canonical_parent || fork_parent {
            return Ok(());
        }

        Err(ChainError::LineageMismatch { height, prev })
    }

    fn check_transactions(&self, block: &Block) -> Result<(), ChainError> {
        for tx in &block.transactions {
            tx.verify()
                .map_err(|e| ChainError::InvalidTransaction(tx.compute_hash(), e))?;
        }
        Ok(())
    }

    fn check_proof_of_work(&self, block: &Block, hash: &Hash) -> Result<(), ChainError> {
        if self.require_proof_of_work && !block.header.meets_target() {
            return Err(ChainError::InsufficientWork(*hash));
        }
        Ok(())
    }
}

impl Validator for BlockValidator {
    fn validate_block(
        &self,
        block: &Block,
        hash: &Hash,
        ctx: &ValidationContext<'_>,
    ) -> Result<(), ChainError> {
        self.check_known(hash, ctx)?;
        self.check_height(block, ctx)?;
        self.check_lineage(block, ctx)?;
        self.check_transactions(block)?;
        block.verify().map_err(ChainError::from)?;
        self.check_proof_of_work(block, hash)
    }
}

impl From<BlockError> for ChainError {
    fn from(err: BlockError) -> Self {
        match err {
            BlockError::Unsigned => ChainError::Unsigned,
            BlockError::InvalidSignature | BlockError::Signing(_) => ChainError::InvalidSignature,
            BlockError::DataHashMismatch => ChainError::DataHashMismatch,
            BlockError::InvalidTransaction(hash, e) => ChainError::InvalidTransaction(hash, e),
        }
    }
}
