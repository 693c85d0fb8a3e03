use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use dummy_chain_common::error::ProtocolError;
use dummy_chain_common::types::{Block, BlockHeader, Event, Signal, Transaction};
use std::io::Write;
use tracing::debug;

use super::codec::encode_block;
use super::Tracer;

/// Protocol version announced without flash blocks
pub const PROTOCOL_VERSION: &str = "3.0";
/// Protocol version announced when flash blocks are emitted
pub const FLASH_PROTOCOL_VERSION: &str = "3.1";
/// Fully qualified name of the block payload type
pub const BLOCK_TYPE: &str = "sf.acme.type.v1.Block";

/// Signal kind for block commitment levels
const SIGNAL_KIND_COMMITMENT: u8 = 1;

/// Emits `FIRE` lines for the chain activity into a writer.
///
/// Each block is accumulated across the tracer calls and written out as a
/// single line once its scope closes, carrying the base64 encoded payload.
pub struct FirehoseTracer<W: Write> {
    out: W,
    /// Adds the flash index to every block line
    with_flash_blocks: bool,
    initialized: bool,
    active_block: Option<Block>,
    active_trx: Option<Transaction>,
}

impl<W: Write> FirehoseTracer<W> {
    pub fn new(out: W, with_flash_blocks: bool) -> Self {
        Self {
            out,
            with_flash_blocks,
            initialized: false,
            active_block: None,
            active_trx: None,
        }
    }

    pub fn version(&self) -> &'static str {
        if self.with_flash_blocks {
            FLASH_PROTOCOL_VERSION
        } else {
            PROTOCOL_VERSION
        }
    }

    pub fn get_ref(&self) -> &W {
        &self.out
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    /// Closes the active block scope and writes its line
    fn finish_block(&mut self, flash_index: i32) -> Result<(), ProtocolError> {
        let block = self.active_block.take().ok_or(ProtocolError::NoActiveBlock)?;
        self.active_trx = None;

        let payload = encode_block(&block);
        debug!(proto_size = payload.len(), "Marshalled block to proto");

        let header = &block.header;
        let (previous_num, previous_hash) = header
            .parent
            .as_ref()
            .map(|parent| (parent.num, parent.hash.as_str()))
            .unwrap_or((0, ""));

        let index = if self.with_flash_blocks {
            format!(" {}", flash_index)
        } else {
            String::new()
        };

        self.write_line(format_args!(
            "FIRE BLOCK {}{} {} {} {} {} {} {} {}",
            header.height,
            index,
            header.hash,
            previous_num,
            previous_hash,
            header.finality.num,
            header.finality.hash,
            header.timestamp_nanos(),
            STANDARD.encode(&payload),
        ))
    }

    fn write_line(&mut self, line: std::fmt::Arguments<'_>) -> Result<(), ProtocolError> {
        writeln!(self.out, "{}", line)
            .and_then(|_| self.out.flush())
            .map_err(|e| ProtocolError::Output(e.to_string()))
    }

    fn ensure_initialized(&self) -> Result<(), ProtocolError> {
        if self.initialized {
            Ok(())
        } else {
            Err(ProtocolError::NotInitialized)
        }
    }
}

impl<W: Write> Tracer for FirehoseTracer<W> {
    fn initialize(&mut self) -> Result<(), ProtocolError> {
        let version = self.version();
        self.write_line(format_args!("FIRE INIT {} {}", version, BLOCK_TYPE))?;
        self.initialized = true;
        Ok(())
    }

    fn on_block_start(&mut self, header: &BlockHeader) -> Result<(), ProtocolError> {
        self.ensure_initialized()?;
        if self.active_block.is_some() {
            return Err(ProtocolError::BlockAlreadyStarted);
        }

        self.active_block = Some(Block {
            header: header.clone(),
            transactions: Vec::new(),
        });
        Ok(())
    }

    fn on_trx_start(&mut self, trx: &Transaction) -> Result<(), ProtocolError> {
        if self.active_block.is_none() {
            return Err(ProtocolError::NoActiveBlock);
        }
        if self.active_trx.is_some() {
            return Err(ProtocolError::TransactionAlreadyStarted);
        }

        self.active_trx = Some(Transaction {
            kind: trx.kind,
            hash: trx.hash.clone(),
            sender: trx.sender.clone(),
            receiver: trx.receiver.clone(),
            data: trx.data.clone(),
            amount: trx.amount,
            fee: trx.fee,
            success: false,
            events: Vec::with_capacity(trx.events.len()),
        });
        Ok(())
    }

    fn on_trx_event(&mut self, _trx_hash: &str, event: &Event) -> Result<(), ProtocolError> {
        let trx = self
            .active_trx
            .as_mut()
            .ok_or(ProtocolError::NoActiveTransaction)?;

        trx.events.push(event.clone());
        Ok(())
    }

    fn on_trx_end(&mut self, trx: &Transaction) -> Result<(), ProtocolError> {
        let mut active = self
            .active_trx
            .take()
            .ok_or(ProtocolError::NoActiveTransaction)?;
        active.success = trx.success;

        let block = self
            .active_block
            .as_mut()
            .ok_or(ProtocolError::NoActiveBlock)?;
        block.transactions.push(active);
        Ok(())
    }

    fn on_block_end(&mut self) -> Result<(), ProtocolError> {
        self.finish_block(0)
    }

    fn on_flash_block_end(&mut self, index: i32) -> Result<(), ProtocolError> {
        self.finish_block(index)
    }

    fn on_commitment_signal(&mut self, signal: &Signal) -> Result<(), ProtocolError> {
        self.ensure_initialized()?;

        self.write_line(format_args!(
            "FIRE SIGNAL {} {} {} {}",
            SIGNAL_KIND_COMMITMENT, signal.block_number, signal.block_id, signal.commitment_level
        ))
    }
}
