// Shared data model for the Dummy Chain crates
pub mod config;
pub mod error;
pub mod size;
pub mod storage;
pub mod types;

// Re-export commonly used types
pub use config::ChainConfig;
pub use error::{ChainError, ChainResult, ConfigError, ProtocolError, StoreError};
pub use storage::BlockStore;
pub use types::{Block, BlockHeader, BlockRef, FlashBlock, Signal, Transaction};
