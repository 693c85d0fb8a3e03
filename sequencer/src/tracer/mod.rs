pub mod codec;
pub mod firehose;

use dummy_chain_common::error::ProtocolError;
use dummy_chain_common::types::{Block, BlockHeader, Event, FlashBlock, Signal, Transaction};

pub use codec::{decode_block, encode_block, WireError};
pub use firehose::FirehoseTracer;

/// Receives the chain activity as a sequence of nested block and
/// transaction scopes.
///
/// Calls must follow `on_block_start`, then for each transaction
/// `on_trx_start`, `on_trx_event`*, `on_trx_end`, and finally `on_block_end`
/// or `on_flash_block_end`. Implementations reject any other order.
pub trait Tracer {
    fn initialize(&mut self) -> Result<(), ProtocolError>;

    fn on_block_start(&mut self, header: &BlockHeader) -> Result<(), ProtocolError>;

    fn on_trx_start(&mut self, trx: &Transaction) -> Result<(), ProtocolError>;

    fn on_trx_event(&mut self, trx_hash: &str, event: &Event) -> Result<(), ProtocolError>;

    fn on_trx_end(&mut self, trx: &Transaction) -> Result<(), ProtocolError>;

    fn on_block_end(&mut self) -> Result<(), ProtocolError>;

    fn on_flash_block_end(&mut self, index: i32) -> Result<(), ProtocolError>;

    fn on_commitment_signal(&mut self, signal: &Signal) -> Result<(), ProtocolError>;

    /// Walks a complete block through the call sequence
    fn trace_block(&mut self, block: &Block) -> Result<(), ProtocolError> {
        self.trace_transactions(block)?;
        self.on_block_end()
    }

    /// Walks a flash block through the call sequence
    fn trace_flash_block(&mut self, flash: &FlashBlock) -> Result<(), ProtocolError> {
        self.trace_transactions(&flash.block)?;
        self.on_flash_block_end(flash.index)
    }

    /// Opens the block scope and replays every transaction into it
    fn trace_transactions(&mut self, block: &Block) -> Result<(), ProtocolError> {
        self.on_block_start(&block.header)?;

        for trx in &block.transactions {
            self.on_trx_start(trx)?;
            for event in &trx.events {
                self.on_trx_event(&trx.hash, event)?;
            }
            self.on_trx_end(trx)?;
        }

        Ok(())
    }
}
