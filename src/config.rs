//! Engine configuration

use crate::core::block::{calculate_data_hash, Header, BLOCK_VERSION};
use crate::core::difficulty::GENESIS_BITS;
use crate::types::{Address, Hash};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default blocks between difficulty retargets
pub const DEFAULT_HEIGHT_DIVISOR: u32 = 10;

/// Default target seconds between blocks
pub const DEFAULT_AVG_TARGET_TIME_SECS: u64 = 10;

/// Default confirmations a fork branch needs to win
pub const DEFAULT_REORG_CONFIRMATION_THRESHOLD: u32 = 3;

/// Default capacity of the orphaned transaction channel
pub const DEFAULT_ORPHAN_CHANNEL_CAPACITY: usize = 1000;

/// Default log target for engine records
pub const DEFAULT_LOG_TARGET: &str = "powledger::chain";

/// Timestamp of the default genesis header (2023-01-01T00:00:00Z)
pub const DEFAULT_GENESIS_TIMESTAMP: u64 = 1_672_531_200;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),
    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Balance minted to an account at genesis
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenesisAllocation {
    pub address: Address,
    pub balance: u64,
}

/// Ledger engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainConfig {
    /// Header of the block at height 0
    pub genesis: Header,
    /// Blocks between difficulty retargets
    pub height_divisor: u32,
    /// Target seconds between blocks
    pub avg_target_time_secs: u64,
    /// Confirmations a fork branch needs before the pair resolves
    pub reorg_confirmation_threshold: u32,
    /// Bound of the orphaned transaction channel
    pub orphan_channel_capacity: usize,
    pub genesis_allocations: Vec<GenesisAllocation>,
    /// Reject blocks whose header hash misses its own target
    pub require_proof_of_work: bool,
    /// Log target every engine record is emitted under
    pub log_target: String,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            genesis: Header {
                version: BLOCK_VERSION,
                data_hash: calculate_data_hash(&[]),
                prev_block_hash: Hash::ZERO,
                height: 0,
                timestamp: DEFAULT_GENESIS_TIMESTAMP,
                nonce: 0,
                bits: GENESIS_BITS,
            },
            height_divisor: DEFAULT_HEIGHT_DIVISOR,
            avg_target_time_secs: DEFAULT_AVG_TARGET_TIME_SECS,
            reorg_confirmation_threshold: DEFAULT_REORG_CONFIRMATION_THRESHOLD,
            orphan_channel_capacity: DEFAULT_ORPHAN_CHANNEL_CAPACITY,
            genesis_allocations: Vec::new(),
            require_proof_of_work: false,
            log_target: DEFAULT_LOG_TARGET.to_string(),
        }
    }
}

impl ChainConfig {
    /// Parse and validate a JSON configuration; missing fields take defaults
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_allocation(mut self, address: Address, balance: u64) -> Self {
        self.genesis_allocations
            .push(GenesisAllocation { address, balance });
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.genesis.height != 0 {
            return Err(ConfigError::Invalid(format!(
                "genesis height must be 0, got {}",
                self.genesis.height
            )));
        }
        if self.height_divisor == 0 {
            return Err(ConfigError::Invalid("height_divisor must be > 0".into()));
        }
        if self.avg_target_time_secs == 0 {
            return Err(ConfigError::Invalid(
                "avg_target_time_secs must be > 0".into(),
            ));
        }
        if self.reorg_confirmation_threshold == 0 {
            return Err(ConfigError::Invalid(
                "reorg_confirmation_threshold must be > 0".into(),
            ));
        }
        if self.orphan_channel_capacity == 0 {
            return Err(ConfigError::Invalid(
                "orphan_channel_capacity must be > 0".into(),
            ));
        }
        Ok(())
    }
}
