use anyhow::Context;
use clap::Parser;
use dummy_chain_common::config::ChainConfig;
use dummy_chain_common::storage::BlockStore;
use std::io;
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use dummy_chain_sequencer::cmd::{CliArgs, Command, StartArgs, TracerKind};
use dummy_chain_sequencer::node::{BoxedTracer, Node};
use dummy_chain_sequencer::tracer::FirehoseTracer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();

    // Standard output carries the wire records, logs stay on stderr
    tracing_subscriber::fmt()
        .with_max_level(args.get_log_level())
        .with_target(true)
        .with_writer(io::stderr)
        .init();

    match args.command {
        Command::Init => init(&args.store_dir),
        Command::Reset => reset(&args.store_dir),
        Command::Start(start) => run(&args.store_dir, start).await,
    }
}

fn init(store_dir: &Path) -> anyhow::Result<()> {
    let config = ChainConfig::development();
    BlockStore::new(store_dir, &config.genesis)
        .initialize()
        .with_context(|| format!("initializing store in {}", store_dir.display()))?;

    info!(dir = %store_dir.display(), "Store initialized");
    Ok(())
}

fn reset(store_dir: &Path) -> anyhow::Result<()> {
    match std::fs::remove_dir_all(store_dir) {
        Ok(()) => info!(dir = %store_dir.display(), "Store removed"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            info!(dir = %store_dir.display(), "No store to remove")
        }
        Err(e) => {
            return Err(e).with_context(|| format!("removing {}", store_dir.display()));
        }
    }
    Ok(())
}

async fn run(store_dir: &Path, start: StartArgs) -> anyhow::Result<()> {
    let config = start.chain_config().context("invalid chain configuration")?;
    info!(
        block_rate = config.production.block_rate,
        block_size = config.production.block_size.0,
        stop_height = config.production.stop_height,
        "Starting Dummy Chain"
    );

    let tracer: Option<BoxedTracer> = match start.tracer {
        TracerKind::Firehose => Some(Box::new(FirehoseTracer::new(
            io::stdout(),
            config.production.with_flash_blocks,
        ))),
        TracerKind::None => None,
    };

    let mut node = Node::new(config, store_dir, tracer, start.server_addr);
    node.initialize().context("failed to initialize node")?;

    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_shutdown(cancel.clone()));

    node.run(cancel).await?;
    Ok(())
}

async fn cancel_on_shutdown(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Cannot listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }
    cancel.cancel();
}
