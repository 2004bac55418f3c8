//! Fork resolution
//!
//! Resolving a pair compensates every applied effect of the losing branch,
//! newest first, and swaps canonical indices when the loser was canonical.
//! The winning branch is then replayed against the compensated ledgers:
//! transactions that could not apply on arrival are applied and indexed,
//! and NFTs whose collection went with the loser are dropped.
//! All bookkeeping is checked before the first mutation, so a failed
//! resolution leaves the pair and the indices untouched.

use crate::core::block::Block;
use crate::core::blockchain::{BlockStatus, Blockchain, ChainError};
use crate::core::chain_state::{AppliedTx, ChainStore, Effect};
use crate::core::fork::{Branch, ForkPairId};
use crate::core::transaction::Transaction;
use crate::types::Hash;
use log::{debug, info, warn};
use tokio::sync::mpsc::error::TrySendError;

impl Blockchain {
    pub(crate) fn reorganize(
        &self,
        pair_id: ForkPairId,
        winner: Branch,
    ) -> Result<BlockStatus, ChainError> {
        let mut chain = self.chain.write();
        let mut forks = self.forks.write();

        let pair = forks
            .pair(pair_id)
            .cloned()
            .ok_or(ChainError::ForkPairNotFound(pair_id))?;
        let fork_height = chain
            .height_of(&pair.forking_point)
            .ok_or(ChainError::ForkPointNotFound(pair.forking_point))?;

        let winning = pair.branch(winner);
        let losing = pair.branch(winner.other());
        if losing.is_canonical && chain.canonical_after(fork_height) != losing.members {
            return Err(ChainError::ForkPointNotFound(pair.forking_point));
        }

        let losing_blocks = self.load_blocks(&losing.members)?;
        let winning_blocks = self.load_blocks(&winning.members)?;

        for block in losing_blocks.iter().rev() {
            self.revert_block(&mut chain, block);
        }

        if losing.is_canonical {
            chain.truncate_to(fork_height);
            for block in &winning_blocks {
                chain.push_canonical(block.header.clone(), block.hash());
            }
        }

        let mut replayed = 0;
        for block in &winning_blocks {
            replayed += self.replay_block(&mut chain, block);
        }

        chain.reanchor(pair.forking_point, winning.members.first().copied());
        chain.drop_children(&losing.members);
        forks.remove(pair_id);

        let mut requeued = 0;
        for tx in losing_blocks.iter().flat_map(|block| &block.transactions) {
            // Still applied by a surviving block
            if chain.tx(&tx.hash()).is_some() {
                continue;
            }
            if self.requeue(tx.clone()) {
                requeued += 1;
            }
        }

        if losing.is_canonical {
            info!(
                target: self.log_target(),
                "Reorganized at {} (height {}): disconnected {}, connected {}, new tip {} at height {}, replayed {} txs, requeued {} txs",
                pair.forking_point,
                fork_height,
                losing.members.len(),
                winning.members.len(),
                chain.tip(),
                chain.height(),
                replayed,
                requeued
            );
            Ok(BlockStatus::Reorganized {
                disconnected: losing.members.len(),
                connected: winning.members.len(),
            })
        } else {
            info!(
                target: self.log_target(),
                "Fork {} at {} discarded: {} blocks dropped, replayed {} txs, requeued {} txs",
                pair_id,
                pair.forking_point,
                losing.members.len(),
                replayed,
                requeued
            );
            Ok(BlockStatus::ForkDiscarded {
                discarded: losing.members.len(),
            })
        }
    }

    fn load_blocks(&self, hashes: &[Hash]) -> Result<Vec<Block>, ChainError> {
        hashes
            .iter()
            .map(|hash| {
                self.store
                    .get(hash)
                    .map_err(|_| ChainError::BlockNotFound(*hash))
            })
            .collect()
    }

    /// Compensate the effects `block` applied on arrival, newest first
    fn revert_block(&self, chain: &mut ChainStore, block: &Block) {
        let hash = block.hash();

        for applied in chain.take_applied(&hash).into_iter().rev() {
            match applied.effect {
                Effect::Transfer { from, to, value } => {
                    if let Err(e) = self.accounts.transfer(&to, &from, value) {
                        warn!(
                            target: self.log_target(),
                            "Could not reverse transfer {} of block {}: {}", applied.tx, hash, e
                        );
                    }
                }
                Effect::Collection(id) => {
                    self.assets.remove_collection(&id);
                }
                Effect::Nft(id) => {
                    self.assets.remove_nft(&id);
                }
                Effect::Contract => {
                    warn!(
                        target: self.log_target(),
                        "Contract effects of {} in block {} cannot be reverted", applied.tx, hash
                    );
                }
            }
            chain.unindex_tx(&applied.tx, &hash);
        }
    }

    /// Re-check a winning block once the losing branch is compensated
    ///
    /// Walks the block's transactions in order. A transaction without an
    /// applied record gets another attempt; an NFT whose collection no
    /// longer exists is removed. Returns how many transactions were applied.
    fn replay_block(&self, chain: &mut ChainStore, block: &Block) -> usize {
        let hash = block.hash();
        let mut applied = chain.take_applied(&hash);
        let mut replayed = 0;

        for tx in &block.transactions {
            let tx_hash = tx.hash();

            if let Some(pos) = applied.iter().position(|a| a.tx == tx_hash) {
                if let Effect::Nft(id) = applied[pos].effect {
                    let orphaned = self
                        .assets
                        .nft(&id)
                        .map_or(false, |nft| self.assets.collection(&nft.collection).is_none());
                    if orphaned {
                        warn!(
                            target: self.log_target(),
                            "NFT {} in block {} lost its collection, dropping it", id, hash
                        );
                        self.assets.remove_nft(&id);
                        applied.remove(pos);
                        chain.unindex_tx(&tx_hash, &hash);
                    }
                }
                continue;
            }

            let Some(sender) = tx.sender() else {
                continue;
            };
            match self.apply_tx(tx, sender) {
                Ok(effect) => {
                    applied.push(AppliedTx {
                        tx: tx_hash,
                        effect,
                    });
                    chain.index_tx(tx.clone(), hash);
                    replayed += 1;
                }
                Err(e) => debug!(
                    target: self.log_target(),
                    "Transaction {} in block {} still not applicable: {}", tx_hash, hash, e
                ),
            }
        }

        chain.record_applied(hash, applied);
        replayed
    }

    /// Offer a transaction back to the mempool without blocking
    fn requeue(&self, tx: Transaction) -> bool {
        match self.orphans.try_send(tx) {
            Ok(()) => true,
            Err(TrySendError::Full(tx)) => {
                warn!(
                    target: self.log_target(),
                    "Orphan channel full, dropping transaction {}",
                    tx.hash()
                );
                false
            }
            Err(TrySendError::Closed(tx)) => {
                warn!(
                    target: self.log_target(),
                    "Orphan channel closed, dropping transaction {}",
                    tx.hash()
                );
                false
            }
        }
    }
}
