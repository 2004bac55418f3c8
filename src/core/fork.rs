//! Fork tracking
//!
//! A fork opens the moment a block arrives whose parent already has a
//! canonical child. The two competing branches form a [`ForkPair`]: the
//! branch that was canonical first is the incumbent, the newcomer the
//! challenger. Each branch counts confirmations (blocks beyond its first);
//! whichever reaches the threshold first wins the pair.
//!
//! Every tracked block is indexed by hash, and so is every branch tip, so
//! classifying an incoming block is a pair of map lookups.

use crate::core::block::Header;
use crate::core::chain_state::ChainStore;
use crate::types::Hash;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

pub type ForkPairId = u64;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ForkError {
    #[error("Parent {0} already has an unresolved divergence")]
    Conflict(Hash),
    #[error("Parent {0} is neither canonical nor a tracked fork tip")]
    DetachedParent(Hash),
}

/// Side of a fork pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Branch {
    /// The branch that was canonical when the pair opened
    Incumbent,
    Challenger,
}

impl Branch {
    pub fn other(self) -> Self {
        match self {
            Branch::Incumbent => Branch::Challenger,
            Branch::Challenger => Branch::Incumbent,
        }
    }
}

/// One branch of a fork pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fork {
    pub chain_tip: Hash,
    pub tip_height: u32,
    pub forking_point: Hash,
    pub confirmations: u32,
    pub is_canonical: bool,
    /// Blocks after the forking point, oldest first
    pub members: Vec<Hash>,
}

impl Fork {
    fn new(forking_point: Hash, fork_height: u32, members: Vec<Hash>, is_canonical: bool) -> Self {
        let len = members.len() as u32;
        Self {
            chain_tip: members.last().copied().unwrap_or(forking_point),
            tip_height: fork_height + len,
            forking_point,
            confirmations: len.saturating_sub(1),
            is_canonical,
            members,
        }
    }
}

/// Two branches diverging from one forking point
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForkPair {
    pub id: ForkPairId,
    pub forking_point: Hash,
    pub fork_height: u32,
    pub incumbent: Fork,
    pub challenger: Fork,
}

impl ForkPair {
    pub fn branch(&self, branch: Branch) -> &Fork {
        match branch {
            Branch::Incumbent => &self.incumbent,
            Branch::Challenger => &self.challenger,
        }
    }

    fn branch_mut(&mut self, branch: Branch) -> &mut Fork {
        match branch {
            Branch::Incumbent => &mut self.incumbent,
            Branch::Challenger => &mut self.challenger,
        }
    }
}

/// Where an incoming block goes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placement {
    /// Extends the canonical tip with no fork open
    Append,
    /// Opens a pair against the canonical blocks after `forking_point`
    NewFork {
        forking_point: Hash,
        fork_height: u32,
        incumbent: Vec<Hash>,
    },
    /// Extends the tip of a tracked branch
    Extend { pair: ForkPairId, branch: Branch },
}

/// Tracks unresolved fork pairs
///
/// At most one pair is open at a time: a divergence anywhere else while a
/// pair is unresolved is refused with [`ForkError::Conflict`].
#[derive(Debug, Default)]
pub struct ForkTracker {
    pairs: HashMap<ForkPairId, ForkPair>,
    /// Member block -> owning branch
    index: HashMap<Hash, (ForkPairId, Branch)>,
    /// Branch tip -> branch
    tips: HashMap<Hash, (ForkPairId, Branch)>,
    next_id: ForkPairId,
}

impl ForkTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Classify a block by its parent without changing anything
    pub fn plan(&self, header: &Header, chain: &ChainStore) -> Result<Placement, ForkError> {
        let parent = header.prev_block_hash;

        if let Some(&(pair, branch)) = self.tips.get(&parent) {
            return Ok(Placement::Extend { pair, branch });
        }

        if parent == chain.tip() {
            return Ok(Placement::Append);
        }

        if let Some(fork_height) = chain.height_of(&parent) {
            if !self.pairs.is_empty() {
                return Err(ForkError::Conflict(parent));
            }
            return Ok(Placement::NewFork {
                forking_point: parent,
                fork_height,
                incumbent: chain.canonical_after(fork_height),
            });
        }

        if self.index.contains_key(&parent) {
            return Err(ForkError::Conflict(parent));
        }
        Err(ForkError::DetachedParent(parent))
    }

    /// Open a pair; returns its id
    pub fn open(
        &mut self,
        forking_point: Hash,
        fork_height: u32,
        incumbent: Vec<Hash>,
        challenger: Hash,
    ) -> ForkPairId {
        let id = self.next_id;
        self.next_id += 1;

        let pair = ForkPair {
            id,
            forking_point,
            fork_height,
            incumbent: Fork::new(forking_point, fork_height, incumbent, true),
            challenger: Fork::new(forking_point, fork_height, vec![challenger], false),
        };

        for branch in [Branch::Incumbent, Branch::Challenger] {
            let fork = pair.branch(branch);
            for member in &fork.members {
                self.index.insert(*member, (id, branch));
            }
            self.tips.insert(fork.chain_tip, (id, branch));
        }
        self.pairs.insert(id, pair);
        id
    }

    /// Advance a branch tip; returns the branch's new confirmation count
    pub fn extend(&mut self, pair: ForkPairId, branch: Branch, hash: Hash) -> Option<u32> {
        let fork = self.pairs.get_mut(&pair)?.branch_mut(branch);

        self.tips.remove(&fork.chain_tip);
        fork.members.push(hash);
        fork.chain_tip = hash;
        fork.tip_height += 1;
        fork.confirmations += 1;

        self.index.insert(hash, (pair, branch));
        self.tips.insert(hash, (pair, branch));
        Some(fork.confirmations)
    }

    /// Stop tracking a pair and all of its blocks
    pub fn remove(&mut self, pair: ForkPairId) -> Option<ForkPair> {
        let removed = self.pairs.remove(&pair)?;
        for fork in [&removed.incumbent, &removed.challenger] {
            for member in &fork.members {
                self.index.remove(member);
            }
            self.tips.remove(&fork.chain_tip);
        }
        Some(removed)
    }

    pub fn pair(&self, id: ForkPairId) -> Option<&ForkPair> {
        self.pairs.get(&id)
    }

    pub fn pairs(&self) -> Vec<ForkPair> {
        let mut pairs: Vec<ForkPair> = self.pairs.values().cloned().collect();
        pairs.sort_by_key(|pair| pair.id);
        pairs
    }

    pub fn locate(&self, hash: &Hash) -> Option<(ForkPairId, Branch)> {
        self.index.get(hash).copied()
    }

    pub fn contains(&self, hash: &Hash) -> bool {
        self.index.contains_key(hash)
    }

    /// Height of `hash` if it is the tip of a tracked branch
    pub fn tip_height(&self, hash: &Hash) -> Option<u32> {
        let &(pair, branch) = self.tips.get(hash)?;
        self.pairs.get(&pair).map(|p| p.branch(branch).tip_height)
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}
