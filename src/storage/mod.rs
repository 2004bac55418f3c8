//! Block storage
//!
//! Every block the engine ever receives is kept here, keyed by hash,
//! whether it ends up canonical, tracked in a fork or discarded by a reorg.

pub mod memory;

pub use memory::MemoryStore;

use crate::core::block::Block;
use crate::types::Hash;
use thiserror::Error;

/// Storage errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Block not found: {0}")]
    NotFound(Hash),
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
    #[error("Invalid data: {0}")]
    InvalidData(String),
}

/// Put/get contract for block bodies
pub trait Storage: Send + Sync {
    fn put(&self, block: Block) -> Result<(), StorageError>;

    fn get(&self, hash: &Hash) -> Result<Block, StorageError>;

    fn has(&self, hash: &Hash) -> bool {
        self.get(hash).is_ok()
    }

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
