use dummy_chain_common::config::ChainConfig;
use dummy_chain_common::error::ConfigError;
use dummy_chain_common::types::{Block, BlockHeader, BlockRef, FlashBlock, Signal};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{mpsc, watch};
use tokio::time::{self, Duration, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::builder::ChainGenerator;

/// Commitment level carried by every finality signal
pub const COMMITMENT_LEVEL: i32 = 10;

/// Each block period is split in this many flash slots, the last one reserved
pub const FLASH_SLOTS: u32 = 5;

/// Highest flash index emitted for a single height
pub const MAX_FLASH_INDEX: u64 = FLASH_SLOTS as u64 - 1;

/// Represents the current state of the block producer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProducerState {
    /// Created, waiting for `run`
    Idle,
    /// Timers are armed and blocks flow to subscribers
    Running,
    /// Torn down, channels are closed and will not reopen
    Stopped,
}

/// Receiving ends of the producer output.
///
/// Signal and flash block channels only exist when the feature is enabled.
pub struct Subscriptions {
    pub blocks: mpsc::Receiver<Block>,
    /// Lifecycle of the producer, observable after `run` took it
    pub state: watch::Receiver<ProducerState>,
    pub signals: Option<mpsc::Receiver<Signal>>,
    pub flash_blocks: Option<mpsc::Receiver<FlashBlock>>,
}

/// Where production resumes from
enum StartPoint {
    Genesis,
    Resume { tip: BlockHeader, finality: BlockHeader },
}

/// Outcome of handing an item to a subscriber
enum Delivery {
    Sent,
    Closed,
    Cancelled,
}

/// Drives the chain generator on wall-clock cadences
pub struct BlockProducer {
    config: ChainConfig,
    /// Current state of the producer
    state: watch::Sender<ProducerState>,
    /// Set by `initialize`, consumed by `run`
    start: Option<StartPoint>,
    block_tx: Option<mpsc::Sender<Block>>,
    signal_tx: Option<mpsc::Sender<Signal>>,
    flash_tx: Option<mpsc::Sender<FlashBlock>>,
    /// Flipped exactly once by the first teardown
    torn_down: AtomicBool,
    block_timer: Option<Interval>,
    signal_timer: Option<Interval>,
    flash_timer: Option<Interval>,
    /// Last block handed to subscribers
    last_block: Option<BlockRef>,
    /// Block id of the last signal sent
    last_signal: Option<String>,
    last_flash_num: u64,
    last_flash_index: u64,
}

impl BlockProducer {
    /// Creates a producer and the channels its output flows through
    pub fn new(config: ChainConfig) -> (Self, Subscriptions) {
        let (block_tx, blocks) = mpsc::channel(1);
        let (state_tx, state) = watch::channel(ProducerState::Idle);

        let (signal_tx, signals) = if config.production.with_signals {
            let (tx, rx) = mpsc::channel(1);
            (Some(tx), Some(rx))
        } else {
            (None, None)
        };

        let (flash_tx, flash_blocks) = if config.production.with_flash_blocks {
            let (tx, rx) = mpsc::channel(1);
            (Some(tx), Some(rx))
        } else {
            (None, None)
        };

        let producer = Self {
            config,
            state: state_tx,
            start: None,
            block_tx: Some(block_tx),
            signal_tx,
            flash_tx,
            torn_down: AtomicBool::new(false),
            block_timer: None,
            signal_timer: None,
            flash_timer: None,
            last_block: None,
            last_signal: None,
            last_flash_num: 0,
            last_flash_index: 0,
        };

        (
            producer,
            Subscriptions {
                blocks,
                state,
                signals,
                flash_blocks,
            },
        )
    }

    /// Sets the point production resumes from.
    ///
    /// Without a tip the producer starts by emitting the genesis block. The
    /// final block is always required.
    pub fn initialize(
        &mut self,
        tip: Option<Block>,
        finality: Option<Block>,
    ) -> Result<(), ConfigError> {
        let finality = finality.ok_or(ConfigError::MissingFinalBlock)?;

        self.start = Some(match tip {
            Some(tip) => {
                info!(tip = %tip.block_ref(), finality = %finality.block_ref(), "Resuming block production");
                StartPoint::Resume {
                    tip: tip.header,
                    finality: finality.header,
                }
            }
            None => StartPoint::Genesis,
        });

        Ok(())
    }

    /// Produces blocks until the stop height, cancellation, or until every
    /// block subscriber went away
    pub async fn run(mut self, cancel: CancellationToken) -> Result<(), ConfigError> {
        let start = self.start.take().ok_or(ConfigError::NotInitialized)?;
        let period = self.config.block_period();

        info!(
            genesis_burst = self.config.genesis.block_burst,
            rate = self.config.production.block_rate,
            size = %self.config.production.block_size,
            stop_height = self.config.production.stop_height,
            "Starting block producer"
        );
        self.state.send_replace(ProducerState::Running);

        let mut generator = match start {
            StartPoint::Resume { tip, finality } => ChainGenerator::new(&self.config, tip, finality),
            StartPoint::Genesis => {
                let (mut generator, genesis) = ChainGenerator::from_genesis(&self.config);
                info!(
                    block = %genesis.block_ref(),
                    burst = self.config.genesis.block_burst,
                    "Starting from genesis block height"
                );

                if !self.send_block(genesis, &cancel).await {
                    return Ok(());
                }

                if !self.genesis_burst(&mut generator, &cancel).await {
                    return Ok(());
                }
                generator
            }
        };

        self.arm_timers(period);

        loop {
            if self.torn_down.load(Ordering::SeqCst) {
                info!("Block producer has been stopped");
                return Ok(());
            }

            // A block tick sharing its instant with the reserved flash slot
            // always goes first
            tokio::select! {
                biased;
                _ = cancel.cancelled() => self.teardown("Cancellation requested"),
                _ = tick(&mut self.block_timer) => self.on_block_tick(&mut generator, &cancel).await,
                _ = tick(&mut self.signal_timer) => self.on_signal_tick(&cancel).await,
                _ = tick(&mut self.flash_timer) => self.on_flash_tick(&generator, &cancel).await,
            }
        }
    }

    /// Produces the configured number of rounds back to back
    async fn genesis_burst(
        &mut self,
        generator: &mut ChainGenerator,
        cancel: &CancellationToken,
    ) -> bool {
        let rounds = self.config.genesis.block_burst;
        if rounds == 0 {
            return true;
        }

        let started = std::time::Instant::now();
        for _ in 0..rounds {
            let round = generator.produce_next();
            if !self
                .send_round(round, cancel, "Reached stop block height during genesis burst")
                .await
            {
                return false;
            }
        }

        info!(duration = ?started.elapsed(), rounds, "Genesis block burst produced");
        true
    }

    fn arm_timers(&mut self, period: Duration) {
        let start = Instant::now();

        let mut block_timer = time::interval_at(start + period, period);
        block_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.block_timer = Some(block_timer);

        if self.config.production.with_signals {
            // Offset by half a period so signals land between blocks
            let mut signal_timer = time::interval_at(start + period + period / 2, period);
            signal_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
            self.signal_timer = Some(signal_timer);
        }

        if self.config.production.with_flash_blocks {
            let slot = period / FLASH_SLOTS;
            let mut flash_timer = time::interval_at(start + slot, slot);
            flash_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
            self.flash_timer = Some(flash_timer);
        }
    }

    async fn on_block_tick(&mut self, generator: &mut ChainGenerator, cancel: &CancellationToken) {
        self.send_round(generator.produce_next(), cancel, "Reached stop block height")
            .await;
    }

    /// Sends the blocks of one round, forks first, unless its canonical block
    /// lies past the stop height
    async fn send_round(
        &mut self,
        round: Vec<Block>,
        cancel: &CancellationToken,
        stop_reason: &str,
    ) -> bool {
        let Some(canonical) = round.last() else {
            return true;
        };

        if self.reached_stop_height(canonical.height()) {
            self.teardown(stop_reason);
            return false;
        }

        for block in round {
            if !self.send_block(block, cancel).await {
                return false;
            }
        }
        true
    }

    async fn on_signal_tick(&mut self, cancel: &CancellationToken) {
        let Some(last) = &self.last_block else {
            return;
        };

        if self.last_signal.as_deref() == Some(last.hash.as_str()) {
            return;
        }

        let signal = Signal {
            block_id: last.hash.clone(),
            block_number: last.num,
            commitment_level: COMMITMENT_LEVEL,
        };
        let block_id = signal.block_id.clone();

        let delivery = deliver(&self.signal_tx, signal, cancel).await;
        if self.settle(delivery, "signal") {
            self.last_signal = Some(block_id);
        }
    }

    async fn on_flash_tick(&mut self, generator: &ChainGenerator, cancel: &CancellationToken) {
        let Some(last) = &self.last_block else {
            return;
        };

        let num = last.num + 1;
        if num != self.last_flash_num {
            self.last_flash_num = num;
            self.last_flash_index = 0;
            return;
        }

        let index = self.last_flash_index + 1;
        if index > MAX_FLASH_INDEX {
            return;
        }

        let flash = generator.flash_block(num, index);
        debug!(block = %flash.block.block_ref(), index, "Produced flash block");

        let delivery = deliver(&self.flash_tx, flash, cancel).await;
        if self.settle(delivery, "flash block") {
            self.last_flash_index = index;
        }
    }

    async fn send_block(&mut self, block: Block, cancel: &CancellationToken) -> bool {
        let block_ref = block.block_ref();

        let delivery = deliver(&self.block_tx, block, cancel).await;
        if !self.settle(delivery, "block") {
            return false;
        }

        self.last_block = Some(block_ref);
        true
    }

    /// Tears the producer down unless the item reached its subscriber
    fn settle(&mut self, delivery: Delivery, kind: &str) -> bool {
        match delivery {
            Delivery::Sent => true,
            Delivery::Cancelled => {
                self.teardown("Cancellation requested");
                false
            }
            Delivery::Closed => {
                info!(kind, "Subscriber went away");
                self.teardown("Subscriber channel closed");
                false
            }
        }
    }

    fn reached_stop_height(&self, height: u64) -> bool {
        let stop_height = self.config.production.stop_height;
        stop_height != 0 && height > stop_height
    }

    /// Closes every channel and disarms every timer, at most once
    fn teardown(&mut self, reason: &str) {
        if self.torn_down.swap(true, Ordering::SeqCst) {
            return;
        }

        info!(reason, "Stopping block producer");

        self.block_tx = None;
        self.signal_tx = None;
        self.flash_tx = None;

        self.block_timer = None;
        self.signal_timer = None;
        self.flash_timer = None;

        self.state.send_replace(ProducerState::Stopped);
    }
}

/// Waits for the next tick, forever when the timer is disarmed
async fn tick(timer: &mut Option<Interval>) -> Instant {
    match timer {
        Some(timer) => timer.tick().await,
        None => std::future::pending().await,
    }
}

async fn deliver<T>(
    tx: &Option<mpsc::Sender<T>>,
    item: T,
    cancel: &CancellationToken,
) -> Delivery {
    let Some(tx) = tx else {
        return Delivery::Closed;
    };

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Delivery::Cancelled,
        result = tx.send(item) => match result {
            Ok(()) => Delivery::Sent,
            Err(_) => Delivery::Closed,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dummy_chain_common::config::{ByteSize, KIB};
    use dummy_chain_common::types::make_block_hash;

    fn test_config(stop_height: u64) -> ChainConfig {
        let mut config = ChainConfig::development();
        config.production.block_size = ByteSize(64 * KIB);
        config.production.with_skipped_blocks = false;
        config.production.with_reorgs = false;
        config.production.stop_height = stop_height;
        config
    }

    fn genesis_final(config: &ChainConfig) -> Option<Block> {
        Some(ChainGenerator::genesis_block(&config.genesis))
    }

    async fn collect_blocks(blocks: &mut mpsc::Receiver<Block>) -> Vec<Block> {
        let mut out = Vec::new();
        while let Some(block) = blocks.recv().await {
            out.push(block);
        }
        out
    }

    /// Runs a producer from genesis to completion, draining blocks and flash blocks
    async fn run_with_flash_blocks(config: ChainConfig) -> (Vec<Block>, Vec<FlashBlock>) {
        let (mut producer, mut subs) = BlockProducer::new(config.clone());
        producer.initialize(None, genesis_final(&config)).unwrap();

        let handle = tokio::spawn(producer.run(CancellationToken::new()));

        let mut flash_rx = subs.flash_blocks.take().unwrap();
        let mut blocks: Vec<Block> = Vec::new();
        let mut flashes = Vec::new();
        let mut blocks_open = true;
        let mut flashes_open = true;

        while blocks_open || flashes_open {
            tokio::select! {
                block = subs.blocks.recv(), if blocks_open => match block {
                    Some(block) => blocks.push(block),
                    None => blocks_open = false,
                },
                flash = flash_rx.recv(), if flashes_open => match flash {
                    Some(flash) => {
                        let last = blocks.last().unwrap();
                        assert_eq!(flash.block.height(), last.height() + 1);
                        assert_eq!(flash.block.header.parent, Some(last.block_ref()));
                        flashes.push(flash);
                    }
                    None => flashes_open = false,
                },
            }
        }
        handle.await.unwrap().unwrap();

        (blocks, flashes)
    }

    fn heights(blocks: &[Block]) -> Vec<u64> {
        blocks.iter().map(Block::height).collect()
    }

    #[tokio::test]
    async fn test_run_requires_initialization() {
        let (producer, _subs) = BlockProducer::new(test_config(0));

        let result = producer.run(CancellationToken::new()).await;
        assert!(matches!(result, Err(ConfigError::NotInitialized)));
    }

    #[test]
    fn test_missing_final_block() {
        let (mut producer, _subs) = BlockProducer::new(test_config(0));
        assert!(matches!(
            producer.initialize(None, None),
            Err(ConfigError::MissingFinalBlock)
        ));
    }

    #[test]
    fn test_disabled_features_have_no_channel() {
        let (_, subs) = BlockProducer::new(test_config(0));
        assert!(subs.signals.is_none());
        assert!(subs.flash_blocks.is_none());

        let mut config = test_config(0);
        config.production.with_signals = true;
        config.production.with_flash_blocks = true;
        let (_, subs) = BlockProducer::new(config);
        assert!(subs.signals.is_some());
        assert!(subs.flash_blocks.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_at_stop_height() {
        let config = test_config(5);
        let (mut producer, mut subs) = BlockProducer::new(config.clone());
        producer.initialize(None, genesis_final(&config)).unwrap();

        let handle = tokio::spawn(producer.run(CancellationToken::new()));
        let blocks = collect_blocks(&mut subs.blocks).await;
        handle.await.unwrap().unwrap();

        let heights: Vec<u64> = blocks.iter().map(Block::height).collect();
        assert_eq!(heights, vec![0, 1, 2, 3, 4, 5]);

        let genesis = &blocks[0];
        assert!(genesis.header.is_genesis());
        assert_eq!(genesis.header.finality, genesis.block_ref());

        for pair in blocks.windows(2) {
            assert_eq!(pair[1].header.parent, Some(pair[0].block_ref()));
        }
        assert!(blocks.iter().all(|block| block.header.finality.num == 0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_genesis_burst_runs_without_waiting() {
        let mut config = test_config(3);
        config.genesis.block_burst = 10;
        let (mut producer, mut subs) = BlockProducer::new(config.clone());
        producer.initialize(None, genesis_final(&config)).unwrap();

        let started = Instant::now();
        let handle = tokio::spawn(producer.run(CancellationToken::new()));
        let blocks = collect_blocks(&mut subs.blocks).await;
        handle.await.unwrap().unwrap();

        assert_eq!(blocks.len(), 4);
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resume_from_tip() {
        let config = test_config(12);
        let (mut generator, genesis) = ChainGenerator::from_genesis(&config);
        let mut tip = genesis.clone();
        while tip.height() < 10 {
            tip = generator.produce_next().pop().unwrap();
        }

        let (mut producer, mut subs) = BlockProducer::new(config);
        producer.initialize(Some(tip.clone()), Some(tip.clone())).unwrap();

        let handle = tokio::spawn(producer.run(CancellationToken::new()));
        let blocks = collect_blocks(&mut subs.blocks).await;
        handle.await.unwrap().unwrap();

        let heights: Vec<u64> = blocks.iter().map(Block::height).collect();
        assert_eq!(heights, vec![11, 12]);
        assert_eq!(blocks[0].header.parent, Some(tip.block_ref()));
        assert_eq!(blocks[0].header.finality, tip.block_ref());
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_cancellation_stops_once() {
        let config = test_config(0);
        let (mut producer, mut subs) = BlockProducer::new(config.clone());
        producer.initialize(None, genesis_final(&config)).unwrap();

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(producer.run(cancel.clone()));

        let genesis = subs.blocks.recv().await.unwrap();
        assert_eq!(genesis.height(), 0);

        cancel.cancel();
        cancel.cancel();

        handle.await.unwrap().unwrap();
        assert!(subs.blocks.recv().await.is_none());
    }

    #[test]
    fn test_teardown_is_idempotent() {
        let mut config = test_config(0);
        config.production.with_signals = true;
        let (mut producer, subs) = BlockProducer::new(config);
        assert_eq!(*subs.state.borrow(), ProducerState::Idle);

        producer.teardown("first");
        assert_eq!(*subs.state.borrow(), ProducerState::Stopped);
        assert!(producer.block_tx.is_none());
        assert!(producer.signal_tx.is_none());

        producer.teardown("second");
        assert_eq!(*subs.state.borrow(), ProducerState::Stopped);
        assert!(producer.torn_down.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_racing_stop_height() {
        let config = test_config(3);
        let period = config.block_period();
        let (mut producer, mut subs) = BlockProducer::new(config.clone());
        producer.initialize(None, genesis_final(&config)).unwrap();

        // Block 4 would be produced on the fourth tick, cancel on that same instant
        let cancel = CancellationToken::new();
        let deadline = Instant::now() + period * 4;
        let canceller = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                time::sleep_until(deadline).await;
                cancel.cancel();
                cancel.cancel();
            })
        };

        let handle = tokio::spawn(producer.run(cancel.clone()));
        let blocks = collect_blocks(&mut subs.blocks).await;

        assert!(handle.await.unwrap().is_ok());
        canceller.await.unwrap();

        assert_eq!(heights(&blocks), vec![0, 1, 2, 3]);
        assert_eq!(*subs.state.borrow(), ProducerState::Stopped);
        assert!(subs.blocks.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reorg_emission_order() {
        let mut config = test_config(18);
        config.production.with_reorgs = true;
        let (mut producer, mut subs) = BlockProducer::new(config.clone());
        producer.initialize(None, genesis_final(&config)).unwrap();

        let handle = tokio::spawn(producer.run(CancellationToken::new()));
        let blocks = collect_blocks(&mut subs.blocks).await;
        handle.await.unwrap().unwrap();

        let mut expected: Vec<u64> = (0..=18).collect();
        expected.insert(17, 17);
        assert_eq!(heights(&blocks), expected);

        let (sibling, canonical, next) = (&blocks[17], &blocks[18], &blocks[19]);
        assert_eq!(sibling.hash(), make_block_hash(17, Some(1)));
        assert!(!sibling.is_canonical());
        assert_eq!(canonical.hash(), make_block_hash(17, None));
        assert_eq!(sibling.header.parent, canonical.header.parent);
        assert_eq!(next.header.parent, Some(canonical.block_ref()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_height_on_fork_keeps_canonical_block() {
        let mut config = test_config(34);
        config.production.with_reorgs = true;
        let (mut producer, mut subs) = BlockProducer::new(config.clone());
        producer.initialize(None, genesis_final(&config)).unwrap();

        let handle = tokio::spawn(producer.run(CancellationToken::new()));
        let blocks = collect_blocks(&mut subs.blocks).await;
        handle.await.unwrap().unwrap();

        // Two block fork 34 -> 35, then canonical 34 closes the run
        let tail = &blocks[blocks.len() - 3..];
        assert_eq!(heights(tail), vec![34, 35, 34]);
        assert!(!tail[0].is_canonical());
        assert!(!tail[1].is_canonical());
        assert!(tail[2].is_canonical());
        assert_eq!(tail[2].hash(), make_block_hash(34, None));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_subscriber_stops_producer() {
        let config = test_config(0);
        let (mut producer, subs) = BlockProducer::new(config.clone());
        producer.initialize(None, genesis_final(&config)).unwrap();
        drop(subs);

        let result = producer.run(CancellationToken::new()).await;
        assert!(result.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_signals_follow_blocks() {
        let mut config = test_config(3);
        config.production.with_signals = true;
        let (mut producer, mut subs) = BlockProducer::new(config.clone());
        producer.initialize(None, genesis_final(&config)).unwrap();

        let handle = tokio::spawn(producer.run(CancellationToken::new()));

        let mut signal_rx = subs.signals.take().unwrap();
        let mut blocks = Vec::new();
        let mut signals = Vec::new();
        let mut blocks_open = true;
        let mut signals_open = true;

        while blocks_open || signals_open {
            tokio::select! {
                block = subs.blocks.recv(), if blocks_open => match block {
                    Some(block) => blocks.push(block),
                    None => blocks_open = false,
                },
                signal = signal_rx.recv(), if signals_open => match signal {
                    Some(signal) => {
                        // Never signals a block that was not sent yet
                        assert!(blocks.iter().any(|b: &Block| b.hash() == signal.block_id));
                        signals.push(signal);
                    }
                    None => signals_open = false,
                },
            }
        }
        handle.await.unwrap().unwrap();

        assert_eq!(blocks.len(), 4);
        assert!(!signals.is_empty());
        assert!(signals.iter().all(|s| s.commitment_level == COMMITMENT_LEVEL));
        assert!(signals
            .windows(2)
            .all(|pair| pair[0].block_id != pair[1].block_id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_flash_blocks_preview_next_height() {
        let mut config = test_config(3);
        config.production.block_size = ByteSize(4 * KIB);
        config.production.with_flash_blocks = true;

        let (blocks, flashes) = run_with_flash_blocks(config).await;

        assert_eq!(blocks.len(), 4);
        assert!(!flashes.is_empty());
        assert_eq!(flashes[0].index, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flash_index_never_uses_reserved_slot() {
        let mut config = test_config(30);
        config.production.block_size = ByteSize(2 * KIB);
        config.production.with_flash_blocks = true;

        let (blocks, flashes) = run_with_flash_blocks(config).await;
        assert_eq!(heights(&blocks), (0..=30).collect::<Vec<_>>());

        assert!(flashes
            .iter()
            .all(|flash| (1..=MAX_FLASH_INDEX as i32).contains(&flash.index)));

        // Indexes restart at 1 on every new height and only grow within it
        for pair in flashes.windows(2) {
            let (prev, next) = (&pair[0], &pair[1]);
            if prev.block.height() == next.block.height() {
                assert_eq!(next.index, prev.index + 1);
            } else {
                assert_eq!(next.index, 1);
            }
        }
    }
}
