use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use dummy_chain_common::config::{ByteSize, ChainConfig};
use dummy_chain_common::error::ConfigError;
use std::net::SocketAddr;
use std::path::PathBuf;

/// Tracers the node can feed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum TracerKind {
    /// No protocol output
    #[default]
    None,
    /// `FIRE` lines on standard output
    Firehose,
}

#[derive(Parser, Debug)]
#[command(
    name = "dummy-chain",
    version,
    about = "Synthetic chain activity generator for exercising ingestion pipelines"
)]
pub struct CliArgs {
    /// Log level, logs always go to standard error
    #[arg(
        long,
        global = true,
        default_value = "info",
        value_parser = ["error", "warn", "info", "debug", "trace"]
    )]
    pub log_level: String,

    /// Directory holding the chain store
    #[arg(long, global = true, default_value = "./data")]
    pub store_dir: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Initialize local chain state
    Init,
    /// Remove local chain state
    Reset,
    /// Start producing blocks
    Start(StartArgs),
}

#[derive(Args, Debug, Default)]
pub struct StartArgs {
    /// TOML configuration file, flags below override its values
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Blocks produced per minute
    #[arg(long)]
    pub block_rate: Option<u32>,

    /// Approximate block size, integer (with `_`) or human readable (`64 KiB`, `2 MiB`)
    #[arg(long)]
    pub block_size: Option<ByteSize>,

    /// Blocks produced at once when starting from genesis
    #[arg(long)]
    pub genesis_block_burst: Option<u64>,

    /// Stop block production at this height, 0 never stops
    #[arg(long)]
    pub stop_height: Option<u64>,

    /// Address of the debug HTTP server, disabled when absent
    #[arg(long)]
    pub server_addr: Option<SocketAddr>,

    #[arg(long, value_enum, default_value_t = TracerKind::None)]
    pub tracer: TracerKind,

    /// Emit commitment level signals on top of blocks
    #[arg(long)]
    pub with_signal: bool,

    /// Emit flash blocks between blocks
    #[arg(long)]
    pub with_flash_blocks: bool,

    /// Skip a block number every 13 slots
    #[arg(long, action = ArgAction::Set)]
    pub with_skipped_blocks: Option<bool>,

    /// Produce reorgs every 17 slots
    #[arg(long, action = ArgAction::Set)]
    pub with_reorgs: Option<bool>,
}

impl CliArgs {
    pub fn get_log_level(&self) -> tracing::Level {
        match self.log_level.as_str() {
            "error" => tracing::Level::ERROR,
            "warn" => tracing::Level::WARN,
            "info" => tracing::Level::INFO,
            "debug" => tracing::Level::DEBUG,
            "trace" => tracing::Level::TRACE,
            _ => tracing::Level::INFO,
        }
    }
}

impl StartArgs {
    /// Builds the chain configuration from the file, if any, then the flags
    pub fn chain_config(&self) -> Result<ChainConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => ChainConfig::load(path)?,
            None => ChainConfig::development(),
        };

        let production = &mut config.production;
        if let Some(rate) = self.block_rate {
            production.block_rate = rate;
        }
        if let Some(size) = self.block_size {
            production.block_size = size;
        }
        if let Some(stop_height) = self.stop_height {
            production.stop_height = stop_height;
        }
        if let Some(enabled) = self.with_skipped_blocks {
            production.with_skipped_blocks = enabled;
        }
        if let Some(enabled) = self.with_reorgs {
            production.with_reorgs = enabled;
        }
        production.with_signals |= self.with_signal;
        production.with_flash_blocks |= self.with_flash_blocks;

        if let Some(burst) = self.genesis_block_burst {
            config.genesis.block_burst = burst;
        }

        config.validate()?;
        Ok(config)
    }
}
