pub mod store;

pub use store::{BlockStore, StoreMeta, BLOCKS_PER_SHARD};
