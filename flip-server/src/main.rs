//! # Coinflip
//!
//! Flip coins on many machines, count streaks, and aggregate the results.
//!
//! ## Subcommands
//!
//! - `server`: run the aggregator (ingest + status listeners, snapshots).
//! - `flipper <server>`: run a worker pushing batches to `server`.
//! - `status <server>`: print a human-readable report.
//! - `export <server>`: print the raw `CoinStatus` bytes (or JSON).
//!
//! `server` and `flipper` run until interrupted; `status` and `export` exit
//! after one round trip.

use std::io::Write;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use prost::Message;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use flip_client::{fetch_status, render_report, StatusConfig, Worker, WorkerConfig};
use flip_common::{shutdown, ShutdownTrigger};
use flip_engine::StatusSnapshot;
use flip_server::{FilesystemBackend, MemoryBackend, Server, ServerConfig, SnapshotBackend};

#[derive(Parser)]
#[command(name = "coinflip", version, about = "Distributed coin flipping and streak counting")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the aggregation server
    Server {
        /// Directory for status.cf and history/ (default: current directory)
        #[arg(long)]
        storage_path: Option<PathBuf>,

        /// Keep snapshots in memory only
        #[arg(long, conflicts_with = "storage_path")]
        no_persist: bool,

        /// Ingest listener address
        #[arg(long)]
        ingest_addr: Option<SocketAddr>,

        /// Status listener address
        #[arg(long)]
        status_addr: Option<SocketAddr>,

        /// Seconds between persisted snapshots
        #[arg(long)]
        snapshot_secs: Option<u64>,
    },

    /// Run a coin flipping worker
    Flipper {
        /// Server address (host or host:port)
        server: String,

        /// Number of sampler threads (0 = one per core)
        #[arg(short = 'j', long = "threads", default_value_t = 0)]
        threads: usize,
    },

    /// Query server status
    Status {
        /// Server address (host or host:port)
        server: String,

        /// Seconds to wait for the reply
        #[arg(long, default_value_t = 10)]
        timeout: u64,
    },

    /// Export server data
    Export {
        /// Server address (host or host:port)
        server: String,

        /// Print JSON instead of the raw protobuf bytes
        #[arg(long)]
        json: bool,

        /// Seconds to wait for the reply
        #[arg(long, default_value_t = 10)]
        timeout: u64,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let _ = err.print();
            return if err.use_stderr() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    match run(cli.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Server {
            storage_path,
            no_persist,
            ingest_addr,
            status_addr,
            snapshot_secs,
        } => {
            let mut config = ServerConfig::from_env()?;
            if let Some(path) = storage_path {
                config.storage_dir = path;
            }
            if let Some(addr) = ingest_addr {
                config.ingest_addr = addr;
            }
            if let Some(addr) = status_addr {
                config.status_addr = addr;
            }
            if let Some(secs) = snapshot_secs {
                config.snapshot_interval = Duration::from_secs(secs);
            }

            let backend: Arc<dyn SnapshotBackend> = if no_persist {
                info!("snapshots kept in memory only");
                Arc::new(MemoryBackend::new())
            } else {
                info!(path = %config.storage_dir.display(), "using filesystem snapshots");
                Arc::new(FilesystemBackend::new(config.storage_dir.clone()))
            };

            let server = Server::bind(config, backend)
                .await
                .context("failed to start server")?;
            let trigger = stop_on_ctrl_c();
            server.run(trigger.subscribe()).await?;
        }
        Commands::Flipper { server, threads } => {
            let mut config = WorkerConfig::new(&server);
            config.threads = threads;
            let worker = Worker::new(config)?;
            let trigger = stop_on_ctrl_c();
            worker.run(trigger.subscribe()).await?;
        }
        Commands::Status { server, timeout } => {
            let status = query(&server, timeout).await?;
            print!("{}", render_report(&StatusSnapshot::from_wire(&status)));
        }
        Commands::Export { server, json, timeout } => {
            let status = query(&server, timeout).await?;
            let mut stdout = std::io::stdout().lock();
            if json {
                serde_json::to_writer_pretty(&mut stdout, &StatusSnapshot::from_wire(&status))?;
                writeln!(stdout)?;
            } else {
                stdout.write_all(&status.encode_to_vec())?;
            }
            stdout.flush()?;
        }
    }
    Ok(())
}

async fn query(server: &str, timeout: u64) -> anyhow::Result<flip_common::CoinStatus> {
    let mut config = StatusConfig::new(server);
    config.timeout = Duration::from_secs(timeout);
    fetch_status(&config)
        .await
        .with_context(|| format!("status query to {} failed", config.server))
}

/// Returns a trigger fired by the first Ctrl-C.
fn stop_on_ctrl_c() -> Arc<ShutdownTrigger> {
    let (trigger, _) = shutdown::channel();
    let trigger = Arc::new(trigger);
    let signal = Arc::clone(&trigger);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("interrupt received; shutting down");
                signal.trigger();
            }
            Err(err) => warn!(error = %err, "cannot listen for interrupts"),
        }
    });
    trigger
}
