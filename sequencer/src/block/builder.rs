use chrono::{DateTime, Utc};
use dummy_chain_common::config::{ChainConfig, GenesisConfig};
use dummy_chain_common::types::{make_block_hash, Block, BlockHeader, FlashBlock};
use std::time::Duration;
use tracing::{debug, info};

use super::transactions;

/// Blocks at multiples of this height are never produced when skipping is enabled
pub const SKIP_MODULUS: u64 = 13;
/// Blocks at multiples of this height are preceded by forked siblings
pub const REORG_MODULUS: u64 = 17;
/// Canonical blocks at multiples of this height become final
pub const FINALITY_MODULUS: u64 = 10;

/// Deterministic rules that extend the chain one production round at a time
pub struct ChainGenerator {
    /// Time of the genesis block, anchor for every timestamp
    genesis_time: DateTime<Utc>,
    /// Time between two consecutive heights
    block_period: Duration,
    /// Payload budget of canonical blocks
    block_size: usize,
    with_skipped_blocks: bool,
    with_reorgs: bool,
    /// Last canonical block produced
    tip: BlockHeader,
    /// Block referenced as final by new blocks
    finality: BlockHeader,
}

impl ChainGenerator {
    /// Resumes the chain after `tip`.
    ///
    /// A tip at a finality height is the final block for everything built on
    /// top of it, whatever `finality` the caller persisted.
    pub fn new(config: &ChainConfig, tip: BlockHeader, finality: BlockHeader) -> Self {
        let finality = if tip.height % FINALITY_MODULUS == 0 && tip.height > finality.height {
            debug!(tip = %tip.block_ref(), "Chain tip is the final block");
            tip.clone()
        } else {
            finality
        };

        Self {
            genesis_time: config.genesis.time,
            block_period: config.block_period(),
            block_size: config.block_size(),
            with_skipped_blocks: config.production.with_skipped_blocks,
            with_reorgs: config.production.with_reorgs,
            tip,
            finality,
        }
    }

    /// Creates a generator whose tip and finality are the genesis block
    pub fn from_genesis(config: &ChainConfig) -> (Self, Block) {
        let genesis = Self::genesis_block(&config.genesis);
        let generator = Self::new(config, genesis.header.clone(), genesis.header.clone());

        (generator, genesis)
    }

    /// Builds the self-referential genesis block
    pub fn genesis_block(genesis: &GenesisConfig) -> Block {
        Block::genesis(genesis.hash.clone(), genesis.height, genesis.time)
    }

    /// Runs one production round.
    ///
    /// Returns forked siblings first, if any, then the canonical block which
    /// becomes the new tip.
    pub fn produce_next(&mut self) -> Vec<Block> {
        let mut height = self.tip.height + 1;
        let mut out = Vec::with_capacity(3);

        if self.with_skipped_blocks && height % SKIP_MODULUS == 0 {
            height += 1;
            info!(
                "Skipping block #{} that is a multiple of {}, created #{} instead",
                height - 1,
                SKIP_MODULUS,
                height
            );
        }

        if self.with_reorgs && height % REORG_MODULUS == 0 {
            let first = self.new_block(height, Some(1), &self.tip);

            if height % 2 == 0 {
                info!(height, "Created 2 block fork sequence");
                let second = self.new_block(height + 1, Some(2), &first.header);
                out.push(first);
                out.push(second);
            } else {
                info!(height, "Created 1 block fork sequence");
                out.push(first);
            }
        }

        let mut block = self.new_block(height, None, &self.tip);
        transactions::populate(&mut block, self.block_size);
        debug!(
            block = %block.block_ref(),
            transactions = block.transactions.len(),
            "Produced canonical block"
        );

        self.tip = block.header.clone();
        if height % FINALITY_MODULUS == 0 {
            info!(block = %block.block_ref(), "Created block is now the final block");
            self.finality = block.header.clone();
        }

        out.push(block);
        out
    }

    /// Builds the `index`-th preview of the block at `num`, parented to the tip
    pub fn flash_block(&self, num: u64, index: u64) -> FlashBlock {
        let mut block = self.new_block(num, Some(index), &self.tip);

        let budget = (index as usize).saturating_mul(self.block_size) / 4;
        transactions::populate(&mut block, budget);

        FlashBlock {
            block,
            index: index as i32,
        }
    }

    fn new_block(&self, height: u64, nonce: Option<u64>, parent: &BlockHeader) -> Block {
        Block {
            header: BlockHeader {
                height,
                hash: make_block_hash(height, nonce),
                parent: Some(parent.block_ref()),
                finality: self.finality.block_ref(),
                timestamp: self.timestamp(height),
            },
            transactions: Vec::new(),
        }
    }

    /// Genesis time plus one block period per height
    fn timestamp(&self, height: u64) -> DateTime<Utc> {
        let offset = self.block_period.as_nanos().saturating_mul(height as u128);
        let offset = i64::try_from(offset).unwrap_or(i64::MAX);

        self.genesis_time
            .checked_add_signed(chrono::Duration::nanoseconds(offset))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    pub fn tip(&self) -> &BlockHeader {
        &self.tip
    }

    pub fn finality(&self) -> &BlockHeader {
        &self.finality
    }
}
