pub mod byte_size;
pub mod chain;

pub use byte_size::{ByteSize, KIB, MIB};
pub use chain::{defaults, ChainConfig, GenesisConfig, ProductionConfig};
