use dummy_chain_common::config::ChainConfig;
use dummy_chain_common::error::{ChainError, ChainResult, ConfigError, StoreError};
use dummy_chain_common::storage::BlockStore;
use dummy_chain_common::types::{Block, FlashBlock, Signal};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::block::timer::{BlockProducer, Subscriptions};
use crate::server;
use crate::tracer::Tracer;

/// A tracer the node can hand across tasks
pub type BoxedTracer = Box<dyn Tracer + Send>;

/// Wires the block producer to the store, the tracer and the debug server
pub struct Node {
    config: ChainConfig,
    store: Arc<BlockStore>,
    tracer: Option<BoxedTracer>,
    server_addr: Option<SocketAddr>,
    /// Ready to run once `initialize` succeeded
    producer: Option<(BlockProducer, Subscriptions)>,
}

impl Node {
    pub fn new(
        config: ChainConfig,
        store_dir: impl AsRef<Path>,
        tracer: Option<BoxedTracer>,
        server_addr: Option<SocketAddr>,
    ) -> Self {
        let store = Arc::new(BlockStore::new(store_dir, &config.genesis));

        Self {
            config,
            store,
            tracer,
            server_addr,
            producer: None,
        }
    }

    pub fn store(&self) -> Arc<BlockStore> {
        self.store.clone()
    }

    /// Loads the chain state from the store and prepares the producer
    pub fn initialize(&mut self) -> ChainResult<()> {
        info!(genesis_height = self.config.genesis.height, "Initializing node");

        info!(dir = %self.store.root_dir().display(), "Initializing store");
        self.store.initialize()?;

        // The store is authoritative on the genesis identity once created
        let meta = self.store.meta();
        self.config.genesis.hash = meta.genesis_hash.clone();
        self.config.genesis.height = meta.genesis_height;
        self.config.genesis.time = meta.genesis_time;

        let tip = match meta.head_height {
            Some(height) => {
                info!(tip = height, "Loading last block");
                Some(self.load_block(height)?)
            }
            None => None,
        };

        let final_height = meta.final_height.unwrap_or(meta.genesis_height);
        info!(final_height, "Loading final block");
        let finality = self.load_block(final_height)?;

        let (mut producer, subscriptions) = BlockProducer::new(self.config.clone());
        producer.initialize(tip, Some(finality))?;

        if let Some(tracer) = self.tracer.as_mut() {
            info!("Initializing tracer");
            tracer.initialize()?;
        }

        self.producer = Some((producer, subscriptions));
        Ok(())
    }

    /// Consumes produced items until the producer stops or `cancel` fires
    pub async fn run(mut self, cancel: CancellationToken) -> ChainResult<()> {
        let (producer, subscriptions) = self
            .producer
            .take()
            .ok_or(ChainError::Config(ConfigError::NotInitialized))?;

        if let Some(addr) = self.server_addr {
            tokio::spawn(server::serve(self.store.clone(), addr, cancel.clone()));
        }

        let producer_state = subscriptions.state.clone();
        let producer_cancel = cancel.child_token();
        let handle = tokio::spawn(producer.run(producer_cancel.clone()));

        let result = self.consume(subscriptions, &cancel).await;
        if let Err(e) = &result {
            error!(error = %e, "Failed to process chain activity");
        }

        // Subscriptions are gone at this point, the producer cannot block on a send
        producer_cancel.cancel();
        let produced = match handle.await {
            Ok(outcome) => outcome.map_err(ChainError::from),
            Err(e) => Err(ChainError::Other(format!("block producer task failed: {e}"))),
        };

        info!(producer_state = ?*producer_state.borrow(), "Node stopped");
        result.and(produced)
    }

    async fn consume(
        &mut self,
        mut subscriptions: Subscriptions,
        cancel: &CancellationToken,
    ) -> ChainResult<()> {
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("Cancellation requested, stopping node");
                    return Ok(());
                }
                block = subscriptions.blocks.recv() => match block {
                    Some(block) => self.process_block(&block)?,
                    None => {
                        info!("Block subscription closed");
                        return Ok(());
                    }
                },
                signal = recv_optional(&mut subscriptions.signals) => match signal {
                    Some(signal) => self.process_signal(&signal)?,
                    None => subscriptions.signals = None,
                },
                flash = recv_optional(&mut subscriptions.flash_blocks) => match flash {
                    Some(flash) => self.process_flash_block(&flash)?,
                    None => subscriptions.flash_blocks = None,
                },
            }
        }
    }

    fn process_block(&mut self, block: &Block) -> ChainResult<()> {
        let header = &block.header;
        info!(
            block = %header.block_ref(),
            parent_block = %header
                .parent
                .as_ref()
                .map_or_else(|| "<nil>".to_string(), ToString::to_string),
            final_block = %header.finality,
            "Processing block"
        );

        self.store.write_block(block)?;

        if let Some(tracer) = self.tracer.as_mut() {
            tracer.trace_block(block)?;
        }
        Ok(())
    }

    fn process_signal(&mut self, signal: &Signal) -> ChainResult<()> {
        debug!(
            block_number = signal.block_number,
            commitment_level = signal.commitment_level,
            "Processing commitment signal"
        );

        if let Some(tracer) = self.tracer.as_mut() {
            tracer.on_commitment_signal(signal)?;
        }
        Ok(())
    }

    fn process_flash_block(&mut self, flash: &FlashBlock) -> ChainResult<()> {
        debug!(
            block = %flash.block.block_ref(),
            index = flash.index,
            "Processing flash block"
        );

        if let Some(tracer) = self.tracer.as_mut() {
            tracer.trace_flash_block(flash)?;
        }
        Ok(())
    }

    fn load_block(&self, height: u64) -> Result<Block, StoreError> {
        self.store
            .read_block(height)?
            .ok_or(StoreError::BlockNotFound(height))
    }
}

/// Receives from a subscription that may not exist, waiting forever if it does not
async fn recv_optional<T>(rx: &mut Option<mpsc::Receiver<T>>) -> Option<T> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
