//! The host-scanning daemon binary: wires a store, syncer, transport, and
//! address resolver into a [`hostscan::Dispatcher`] and runs it until
//! Ctrl+C, mirroring the teacher's `daemon.rs` shutdown choreography.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use log::info;

use hostscan::config::load_configuration;
use hostscan::dispatcher::Dispatcher;
use hostscan::lifecycle::TaskGroup;
use hostscan::net::StaticResolver;
use hostscan::store::SqliteHostStore;
use hostscan::syncer::AlwaysSyncedSyncer;
use hostscan::transport::ScriptedTransport;

#[derive(Parser)]
#[command(name = "hostscan", about = "Host-scanning daemon", version, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug)]
struct DaemonArgs {
    /// Path to the configuration file.
    #[arg(long, default_value = "config/hostscan.toml")]
    config: PathBuf,

    /// Path to the SQLite database file.
    #[arg(short = 'd', long, default_value = "data/hostscan.db")]
    db_path: PathBuf,

    /// Override the configured concurrent-scan ceiling.
    #[arg(long)]
    max_concurrent_scans: Option<usize>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scanning daemon until Ctrl+C.
    Run(DaemonArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    hostscan::log::init_logging();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run(args) => run(args).await,
    }
}

async fn run(args: DaemonArgs) -> anyhow::Result<()> {
    let mut config = load_configuration(&args.config)?;
    if let Some(max) = args.max_concurrent_scans {
        config.max_concurrent_scans = max;
    }

    let store = Arc::new(SqliteHostStore::open(&args.db_path)?);
    let syncer = Arc::new(AlwaysSyncedSyncer);
    let resolver = Arc::new(StaticResolver::new());
    let transport = Arc::new(ScriptedTransport::new());
    let group = Arc::new(TaskGroup::new());

    let dispatcher = Dispatcher::new(store, syncer, resolver, transport, group.clone(), config);

    info!("hostscan daemon started, press Ctrl+C to stop");

    tokio::select! {
        _ = dispatcher.run() => {},
        _ = tokio::signal::ctrl_c() => {
            info!("received shutdown signal, draining in-flight workers...");
        },
    }

    group.close().await;
    info!("hostscan daemon stopped gracefully");
    Ok(())
}
