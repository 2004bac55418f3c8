//! Chain State Management
//!
//! Canonical indices over the block arena: the height-ordered header list,
//! the hash and height indices, the transaction index, child edges of the
//! block tree and the per-block record of applied effects that a reorg needs
//! to compensate. Block bodies live in [`Storage`](crate::storage::Storage);
//! this structure only holds hashes and headers.

use crate::core::block::Header;
use crate::core::transaction::Transaction;
use crate::types::{Address, Hash};
use std::collections::HashMap;

/// A state change made by one transaction when its block arrived
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Native tokens moved between accounts
    Transfer {
        from: Address,
        to: Address,
        value: u64,
    },
    /// Collection registered under this id
    Collection(Hash),
    /// NFT minted under this id
    Nft(Hash),
    /// Contract state mutated by the executor
    Contract,
}

/// Effect applied by a transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedTx {
    pub tx: Hash,
    pub effect: Effect,
}

/// Transaction index entry
#[derive(Debug, Clone)]
pub struct TxEntry {
    pub tx: Transaction,
    /// Blocks whose arrival applied this transaction
    pub blocks: Vec<Hash>,
}

/// Canonical chain indices
#[derive(Debug, Clone)]
pub struct ChainStore {
    /// Canonical headers, position == height
    headers: Vec<Header>,
    /// Canonical hashes, position == height
    hashes: Vec<Hash>,
    /// Canonical hash -> height
    heights: HashMap<Hash, u32>,
    /// Parent -> children, over every received block
    children: HashMap<Hash, Vec<Hash>>,
    txs: HashMap<Hash, TxEntry>,
    applied: HashMap<Hash, Vec<AppliedTx>>,
}

impl ChainStore {
    pub fn new(genesis: Header) -> Self {
        let hash = genesis.hash();
        let mut heights = HashMap::new();
        heights.insert(hash, 0);

        Self {
            headers: vec![genesis],
            hashes: vec![hash],
            heights,
            children: HashMap::new(),
            txs: HashMap::new(),
            applied: HashMap::new(),
        }
    }

    /// Height of the canonical tip
    pub fn height(&self) -> u32 {
        (self.headers.len() - 1) as u32
    }

    pub fn tip(&self) -> Hash {
        self.hashes[self.hashes.len() - 1]
    }

    pub fn tip_header(&self) -> &Header {
        &self.headers[self.headers.len() - 1]
    }

    pub fn header(&self, height: u32) -> Option<&Header> {
        self.headers.get(height as usize)
    }

    pub fn hash_at(&self, height: u32) -> Option<Hash> {
        self.hashes.get(height as usize).copied()
    }

    /// Canonical height of a block, if it is on the canonical chain
    pub fn height_of(&self, hash: &Hash) -> Option<u32> {
        self.heights.get(hash).copied()
    }

    pub fn is_canonical(&self, hash: &Hash) -> bool {
        self.heights.contains_key(hash)
    }

    /// Record a parent -> child edge
    pub fn link(&mut self, parent: Hash, child: Hash) {
        let children = self.children.entry(parent).or_default();
        if !children.contains(&child) {
            children.push(child);
        }
    }

    pub fn children(&self, parent: &Hash) -> &[Hash] {
        self.children.get(parent).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Make `child` the only continuation of `parent`
    pub fn reanchor(&mut self, parent: Hash, child: Option<Hash>) {
        match child {
            Some(child) => {
                self.children.insert(parent, vec![child]);
            }
            None => {
                self.children.remove(&parent);
            }
        }
    }

    /// Forget the child edges of blocks that left the tree
    pub fn drop_children(&mut self, parents: &[Hash]) {
        for parent in parents {
            self.children.remove(parent);
        }
    }

    /// Append a block to the canonical chain
    ///
    /// The caller guarantees `header.height == height() + 1`.
    pub fn push_canonical(&mut self, header: Header, hash: Hash) {
        debug_assert_eq!(header.height, self.height() + 1);
        self.heights.insert(hash, header.height);
        self.headers.push(header);
        self.hashes.push(hash);
    }

    /// Drop every canonical block above `height`, returning their hashes
    /// newest first
    pub fn truncate_to(&mut self, height: u32) -> Vec<Hash> {
        let keep = height as usize + 1;
        if keep >= self.hashes.len() {
            return Vec::new();
        }

        let removed: Vec<Hash> = self.hashes.drain(keep..).rev().collect();
        self.headers.truncate(keep);
        for hash in &removed {
            self.heights.remove(hash);
        }
        removed
    }

    /// Canonical hashes strictly above `height`, oldest first
    pub fn canonical_after(&self, height: u32) -> Vec<Hash> {
        self.hashes
            .iter()
            .skip(height as usize + 1)
            .copied()
            .collect()
    }

    pub fn index_tx(&mut self, tx: Transaction, block: Hash) {
        let entry = self.txs.entry(tx.hash()).or_insert_with(|| TxEntry {
            tx,
            blocks: Vec::new(),
        });
        if !entry.blocks.contains(&block) {
            entry.blocks.push(block);
        }
    }

    /// Forget that `block` applied `tx`; the entry goes once no block is left
    pub fn unindex_tx(&mut self, tx: &Hash, block: &Hash) {
        if let Some(entry) = self.txs.get_mut(tx) {
            entry.blocks.retain(|b| b != block);
            if entry.blocks.is_empty() {
                self.txs.remove(tx);
            }
        }
    }

    pub fn tx(&self, hash: &Hash) -> Option<&TxEntry> {
        self.txs.get(hash)
    }

    pub fn record_applied(&mut self, block: Hash, applied: Vec<AppliedTx>) {
        self.applied.insert(block, applied);
    }

    pub fn applied(&self, block: &Hash) -> &[AppliedTx] {
        self.applied.get(block).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn take_applied(&mut self, block: &Hash) -> Vec<AppliedTx> {
        self.applied.remove(block).unwrap_or_default()
    }
}
