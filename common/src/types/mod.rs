pub mod block;
pub mod hash;
pub mod transaction;

pub use block::{short_hash, Block, BlockHeader, BlockRef, FlashBlock, Signal};
pub use hash::{make_block_hash, make_fake_hash};
pub use transaction::{u256_to_be_bytes, Attribute, Event, Transaction, TransactionType};
