//! Mining module for block creation and transaction pooling

pub mod miner;
pub mod txpool;

pub use miner::{spawn_block_producer, Miner, MiningError, MiningStats, ProducerConfig};
pub use txpool::{MempoolEntry, MempoolError, TxPool, DEFAULT_MEMPOOL_SIZE};
