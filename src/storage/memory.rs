//! In-memory block store

use crate::core::block::Block;
use crate::storage::{Storage, StorageError};
use crate::types::Hash;
use parking_lot::RwLock;
use std::collections::HashMap;

/// Hash-keyed block map behind a reader/writer lock
#[derive(Debug, Default)]
pub struct MemoryStore {
    blocks: RwLock<HashMap<Hash, Block>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Export every stored block as JSON, ordered by height then hash
    pub fn to_json(&self) -> Result<String, StorageError> {
        let mut blocks: Vec<Block> = self.blocks.read().values().cloned().collect();
        blocks.sort_by_key(|block| (block.header.height, block.hash()));
        Ok(serde_json::to_string_pretty(&blocks)?)
    }

    /// Load blocks exported by [`MemoryStore::to_json`]
    pub fn from_json(json: &str) -> Result<Self, StorageError> {
        let blocks: Vec<Block> = serde_json::from_str(json)?;
        let store = Self::new();
        for block in blocks {
            store.put(block)?;
        }
        Ok(store)
    }
}

impl Storage for MemoryStore {
    fn put(&self, mut block: Block) -> Result<(), StorageError> {
        let hash = block.header.hash();
        if !block.hash.is_zero() && block.hash != hash {
            return Err(StorageError::InvalidData(format!(
                "cached hash {} does not match header hash {}",
                block.hash, hash
            )));
        }
        block.hash = hash;
        self.blocks.write().insert(hash, block);
        Ok(())
    }

    fn get(&self, hash: &Hash) -> Result<Block, StorageError> {
        self.blocks
            .read()
            .get(hash)
            .cloned()
            .ok_or(StorageError::NotFound(*hash))
    }

    fn has(&self, hash: &Hash) -> bool {
        self.blocks.read().contains_key(hash)
    }

    fn len(&self) -> usize {
        self.blocks.read().len()
    }
}
