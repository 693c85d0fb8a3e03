use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use super::byte_size::ByteSize;
use crate::error::ConfigError;

/// The main configuration structure consumed by the block producer
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct ChainConfig {
    #[serde(default)]
    pub genesis: GenesisConfig,
    #[serde(default)]
    pub production: ProductionConfig,
}

/// Identity of the genesis block
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct GenesisConfig {
    #[serde(default = "defaults::genesis_hash")]
    pub hash: String,
    #[serde(default)]
    pub height: u64,
    /// Genesis time, defaults to the time the configuration was loaded
    #[serde(default = "Utc::now")]
    pub time: DateTime<Utc>,
    /// Blocks produced synchronously right after genesis
    #[serde(default)]
    pub block_burst: u64,
}

/// Parameters that control the cadence and shape of produced blocks
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct ProductionConfig {
    /// Blocks produced per minute
    #[serde(default = "defaults::block_rate")]
    pub block_rate: u32,
    /// Approximate target size of each block
    #[serde(default = "defaults::block_size")]
    pub block_size: ByteSize,
    /// Production stops once a block above this height would be emitted, 0 disables
    #[serde(default)]
    pub stop_height: u64,
    #[serde(default = "defaults::enabled")]
    pub with_skipped_blocks: bool,
    #[serde(default = "defaults::enabled")]
    pub with_reorgs: bool,
    #[serde(default)]
    pub with_signals: bool,
    #[serde(default)]
    pub with_flash_blocks: bool,
}

/// Default values for configuration parameters
pub mod defaults {
    use super::ByteSize;
    use crate::config::byte_size::KIB;

    pub const GENESIS_HASH: &str =
        "0x0000000000000000000000000000000000000000000000000000000000000000";
    pub const GENESIS_HEIGHT: u64 = 0;
    pub const BLOCK_RATE: u32 = 60;
    pub const BLOCK_SIZE: u64 = 64 * KIB;

    pub fn genesis_hash() -> String {
        GENESIS_HASH.to_string()
    }

    pub fn block_rate() -> u32 {
        BLOCK_RATE
    }

    pub fn block_size() -> ByteSize {
        ByteSize(BLOCK_SIZE)
    }

    pub fn enabled() -> bool {
        true
    }
}

impl Default for GenesisConfig {
    fn default() -> Self {
        Self {
            hash: defaults::genesis_hash(),
            height: defaults::GENESIS_HEIGHT,
            time: Utc::now(),
            block_burst: 0,
        }
    }
}

impl Default for ProductionConfig {
    fn default() -> Self {
        Self {
            block_rate: defaults::BLOCK_RATE,
            block_size: defaults::block_size(),
            stop_height: 0,
            with_skipped_blocks: true,
            with_reorgs: true,
            with_signals: false,
            with_flash_blocks: false,
        }
    }
}

impl ChainConfig {
    /// Creates a development configuration with default values
    pub fn development() -> Self {
        Self {
            genesis: GenesisConfig::default(),
            production: ProductionConfig::default(),
        }
    }

    /// Loads the configuration from a specific path
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        let config: ChainConfig = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Time between two canonical blocks
    pub fn block_period(&self) -> Duration {
        Duration::from_secs(60) / self.production.block_rate.max(1)
    }

    /// Target block size in bytes
    pub fn block_size(&self) -> usize {
        self.production.block_size.as_u64() as usize
    }

    /// Validates the configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.genesis.hash.is_empty() {
            return Err(ConfigError::Validation(
                "Genesis hash cannot be empty".to_string(),
            ));
        }

        if self.production.block_rate < 1 {
            return Err(ConfigError::Validation(
                "Block rate must be at least 1 block per minute".to_string(),
            ));
        }

        if self.production.block_size.as_u64() > usize::MAX as u64 {
            return Err(ConfigError::Validation(
                "Block size does not fit in memory".to_string(),
            ));
        }

        if self.production.stop_height != 0 && self.production.stop_height < self.genesis.height {
            return Err(ConfigError::Validation(
                "Stop height cannot be below the genesis height".to_string(),
            ));
        }

        Ok(())
    }
}
