use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::hash::make_block_hash;
use super::transaction::Transaction;

/// A `(number, hash)` pointer at another block
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockRef {
    /// Height of the referenced block
    pub num: u64,
    /// Hash of the referenced block
    pub hash: String,
}

impl BlockRef {
    pub fn new(num: u64, hash: impl Into<String>) -> Self {
        Self {
            num,
            hash: hash.into(),
        }
    }
}

impl fmt::Display for BlockRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.hash.is_empty() {
            return write!(f, "<nil>");
        }

        write!(f, "#{} ({})", self.num, short_hash(&self.hash))
    }
}

/// Shortens long hashes to `abcdef...uvwxyz` for log output
pub fn short_hash(hash: &str) -> String {
    if hash.len() <= 12 {
        return hash.to_string();
    }

    format!("{}...{}", &hash[..6], &hash[hash.len() - 6..])
}

/// Contains metadata about the block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    /// Height of this block
    pub height: u64,
    /// Synthetic identifier of this block
    pub hash: String,
    /// Parent pointer, absent only on the genesis block
    pub parent: Option<BlockRef>,
    /// Latest block elected final when this block was produced
    pub finality: BlockRef,
    /// Genesis time plus one block period per height
    pub timestamp: DateTime<Utc>,
}

impl BlockHeader {
    /// Returns a pointer at this block
    pub fn block_ref(&self) -> BlockRef {
        BlockRef::new(self.height, self.hash.clone())
    }

    /// Whether this header has no parent, which only holds for genesis
    pub fn is_genesis(&self) -> bool {
        self.parent.is_none()
    }

    /// Timestamp as unix nanoseconds, as carried on the wire
    pub fn timestamp_nanos(&self) -> i64 {
        self.timestamp.timestamp_nanos_opt().unwrap_or(i64::MAX)
    }
}

/// Represents a complete block as produced by the chain generator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// Block header containing metadata
    pub header: BlockHeader,
    /// Transactions in execution order
    pub transactions: Vec<Transaction>,
}

impl Block {
    /// Creates the self-referential genesis block
    pub fn genesis(hash: impl Into<String>, height: u64, time: DateTime<Utc>) -> Self {
        let hash = hash.into();

        Self {
            header: BlockHeader {
                height,
                hash: hash.clone(),
                parent: None,
                finality: BlockRef::new(height, hash),
                timestamp: time,
            },
            transactions: Vec::new(),
        }
    }

    pub fn height(&self) -> u64 {
        self.header.height
    }

    pub fn hash(&self) -> &str {
        &self.header.hash
    }

    pub fn block_ref(&self) -> BlockRef {
        self.header.block_ref()
    }

    /// Whether this block belongs to the canonical chain.
    ///
    /// Genesis and canonical blocks carry the nonce-free hash of their
    /// height, fork siblings never do.
    pub fn is_canonical(&self) -> bool {
        self.header.is_genesis() || self.header.hash == make_block_hash(self.header.height, None)
    }
}

/// A preliminary view of the block that will eventually be produced at that height
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlashBlock {
    /// The partial block content
    pub block: Block,
    /// Position of this preview within the block period, starting at 1
    pub index: i32,
}

/// Notification that a block reached a given commitment level
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signal {
    /// Hash of the committed block
    pub block_id: String,
    /// Height of the committed block
    pub block_number: u64,
    /// Commitment depth reached by the block
    pub commitment_level: i32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_genesis_is_self_referential() {
        let time = Utc::now();
        let genesis = Block::genesis("0xabc", 7, time);

        assert!(genesis.header.is_genesis());
        assert_eq!(genesis.header.finality, BlockRef::new(7, "0xabc"));
        assert_eq!(genesis.header.timestamp, time);
        assert!(genesis.transactions.is_empty());
    }

    #[test]
    fn test_block_ref_display() {
        let block_ref = BlockRef::new(
            42,
            "9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08",
        );
        assert_eq!(block_ref.to_string(), "#42 (9f86d0...f00a08)");

        assert_eq!(BlockRef::new(1, "").to_string(), "<nil>");
        assert_eq!(BlockRef::new(1, "0xDEAD").to_string(), "#1 (0xDEAD)");
    }

    #[test]
    fn test_canonical_detection() {
        let genesis = Block::genesis("0xabc", 0, Utc::now());
        assert!(genesis.is_canonical());

        let mut block = Block::genesis(make_block_hash(17, None), 17, Utc::now());
        block.header.parent = Some(BlockRef::new(16, make_block_hash(16, None)));
        assert!(block.is_canonical());

        block.header.hash = make_block_hash(17, Some(1));
        assert!(!block.is_canonical());
    }

    #[test]
    fn test_header_json_roundtrip() {
        let genesis = Block::genesis("0x00", 0, Utc::now());
        let raw = serde_json::to_string(&genesis).unwrap();
        let decoded: Block = serde_json::from_str(&raw).unwrap();

        assert_eq!(decoded, genesis);
        assert!(raw.contains("\"parent\":null"));
    }
}
