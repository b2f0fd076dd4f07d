//! # Aggregation Server
//!
//! Two listeners and a snapshot loop over one shared [`ServerState`]:
//!
//! - **ingest**: workers stream `CoinBatch` frames one-way; each batch is
//!   added to the running total and recorded in the activity window;
//! - **status**: every inbound frame gets exactly one `CoinStatus` reply;
//! - **snapshot**: the running total is persisted every interval and once
//!   more on shutdown.
//!
//! ## Design Principles
//!
//! 1. **Connection-Local Failure**: A malformed frame closes its own
//!    connection only; other workers keep streaming.
//! 2. **Supervised Loops**: Accept loops that fail are logged and restarted
//!    with backoff instead of silently disappearing.
//! 3. **No Nested Locks**: The aggregate and the window are read under their
//!    own locks, never together.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use prost::Message;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use flip_common::{CoinBatch, FlipResult, FramedStream, Shutdown};
use flip_engine::{ActivityWindow, AggregateStore, StatusSnapshot};

use crate::config::ServerConfig;
use crate::listener::bind_listener;
use crate::metrics::Metrics;
use crate::persistence::{self, SnapshotBackend};
use crate::supervisor::{supervise, RestartPolicy};

/// Shared state behind both listeners.
pub struct ServerState {
    results: AggregateStore,
    activity: ActivityWindow,
    metrics: Metrics,
}

impl ServerState {
    pub fn new(window: Duration) -> Self {
        ServerState {
            results: AggregateStore::new(),
            activity: ActivityWindow::new(window),
            metrics: Metrics::new(),
        }
    }

    pub fn results(&self) -> &AggregateStore {
        &self.results
    }

    pub fn activity(&self) -> &ActivityWindow {
        &self.activity
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Applies one worker batch.
    ///
    /// The histogram is not cross-checked against `total_flips`.
    pub fn ingest(&self, batch: &CoinBatch) {
        self.results.push(&batch.histogram(), batch.total_flips);
        self.activity.push(batch.hash, batch.total_flips);
        self.metrics.record_batch();
    }

    /// Builds the reply for a status request.
    pub fn status(&self) -> StatusSnapshot {
        let state = self.results.snapshot();
        let tally = self.activity.tally();
        StatusSnapshot::from_parts(state, &tally)
    }
}

/// Reads `CoinBatch` frames from one worker until EOF, error or shutdown.
pub async fn handle_ingest_connection<S>(
    stream: S,
    state: Arc<ServerState>,
    mut shutdown: Shutdown,
) -> FlipResult<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut framed = FramedStream::new(stream);
    loop {
        let frame = tokio::select! {
            biased;
            _ = shutdown.wait() => return Ok(()),
            frame = framed.read_frame() => frame?,
        };
        let Some(body) = frame else {
            return Ok(());
        };
        let batch = CoinBatch::decode(&body[..])?;
        debug!(
            worker_id = format_args!("{:016x}", batch.hash),
            flips = batch.total_flips,
            "batch received"
        );
        state.ingest(&batch);
    }
}

/// Answers status requests on one connection until EOF, error or shutdown.
pub async fn handle_status_connection<S>(
    stream: S,
    state: Arc<ServerState>,
    mut shutdown: Shutdown,
) -> FlipResult<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut framed = FramedStream::new(stream);
    loop {
        let frame = tokio::select! {
            biased;
            _ = shutdown.wait() => return Ok(()),
            frame = framed.read_frame() => frame?,
        };
        if frame.is_none() {
            return Ok(());
        }

        let started = Instant::now();
        let reply = state.status().to_wire();
        framed.send_message(&reply).await?;
        state.metrics.record_status(started.elapsed());
    }
}

/// Accepts connections and runs `handler` on each until shutdown.
///
/// Returns an error only when `accept` itself fails.
async fn accept_loop<H, Fut>(
    role: &'static str,
    listener: &TcpListener,
    state: &Arc<ServerState>,
    shutdown: &Shutdown,
    handler: H,
) -> FlipResult<()>
where
    H: Fn(TcpStream, Arc<ServerState>, Shutdown) -> Fut,
    Fut: Future<Output = FlipResult<()>> + Send + 'static,
{
    let mut stop = shutdown.clone();
    loop {
        let (stream, peer) = tokio::select! {
            biased;
            _ = stop.wait() => return Ok(()),
            accepted = listener.accept() => accepted?,
        };
        if let Err(err) = stream.set_nodelay(true) {
            debug!(%peer, error = %err, "could not disable nagle");
        }
        debug!(role, %peer, "connection opened");

        let conn = handler(stream, Arc::clone(state), shutdown.clone());
        let state = Arc::clone(state);
        state.metrics.connection_opened();
        tokio::spawn(async move {
            if let Err(err) = conn.await {
                state.metrics.record_connection_error();
                warn!(role, %peer, error = %err, "closing connection");
            }
            state.metrics.connection_closed();
        });
    }
}

/// Periodically persists the running total until shutdown, then once more.
async fn snapshot_loop(
    state: Arc<ServerState>,
    backend: Arc<dyn SnapshotBackend>,
    interval: Duration,
    mut shutdown: Shutdown,
) {
    let mut ticker = time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let stopping = tokio::select! {
            biased;
            _ = shutdown.wait() => true,
            _ = ticker.tick() => false,
        };

        let task_state = Arc::clone(&state);
        let task_backend = Arc::clone(&backend);
        let written = tokio::task::spawn_blocking(move || {
            persistence::persist(&*task_backend, task_state.results(), Utc::now())
        })
        .await;
        match written {
            Ok(Ok(())) => debug!("snapshot written"),
            Ok(Err(err)) => warn!(error = %err, "failed to write snapshot"),
            Err(err) => error!(error = %err, "snapshot task panicked"),
        }

        let metrics = state.metrics.snapshot();
        info!(
            total_flips = state.results.snapshot().total_flips,
            batches = metrics.batches_total,
            status_requests = metrics.status_requests_total,
            connection_errors = metrics.connection_errors_total,
            restarts = metrics.restarts_total,
            open_connections = metrics.open_connections,
            status_latency_us = metrics.latency.mean_us(),
            "server stats"
        );

        if stopping {
            break;
        }
    }
}

/// A bound, restored, ready-to-run aggregation server.
pub struct Server {
    config: ServerConfig,
    state: Arc<ServerState>,
    backend: Arc<dyn SnapshotBackend>,
    ingest: TcpListener,
    status: TcpListener,
}

impl Server {
    /// Validates `config`, seeds the state from `backend` and binds both
    /// listeners.
    pub async fn bind(config: ServerConfig, backend: Arc<dyn SnapshotBackend>) -> FlipResult<Self> {
        config.validate()?;

        let state = Arc::new(ServerState::new(config.window));
        persistence::restore(&*backend, state.results());

        let ingest = bind_listener(config.ingest_addr)?;
        let status = bind_listener(config.status_addr)?;
        info!(
            ingest = %ingest.local_addr()?,
            status = %status.local_addr()?,
            "server listening"
        );

        Ok(Server {
            config,
            state,
            backend,
            ingest,
            status,
        })
    }

    pub fn ingest_addr(&self) -> FlipResult<SocketAddr> {
        Ok(self.ingest.local_addr()?)
    }

    pub fn status_addr(&self) -> FlipResult<SocketAddr> {
        Ok(self.status.local_addr()?)
    }

    pub fn state(&self) -> &Arc<ServerState> {
        &self.state
    }

    /// Runs every loop until `shutdown` fires and the final snapshot is written.
    pub async fn run(self, shutdown: Shutdown) -> FlipResult<()> {
        let ingest_addr = self.ingest.local_addr()?;
        let status_addr = self.status.local_addr()?;
        let policy = self.config.restart;

        let ingest = tokio::spawn(supervise_listener(
            "ingest",
            Some(self.ingest),
            ingest_addr,
            Arc::clone(&self.state),
            shutdown.clone(),
            policy,
            |stream, state, shutdown| handle_ingest_connection(stream, state, shutdown),
        ));
        let status = tokio::spawn(supervise_listener(
            "status",
            Some(self.status),
            status_addr,
            Arc::clone(&self.state),
            shutdown.clone(),
            policy,
            |stream, state, shutdown| handle_status_connection(stream, state, shutdown),
        ));
        let snapshots = tokio::spawn(snapshot_loop(
            Arc::clone(&self.state),
            self.backend,
            self.config.snapshot_interval,
            shutdown,
        ));

        for (name, handle) in [("ingest", ingest), ("status", status), ("snapshot", snapshots)] {
            if let Err(err) = handle.await {
                error!(task = name, error = %err, "task aborted");
            }
        }
        info!("server stopped");
        Ok(())
    }
}

/// Runs an accept loop under the supervisor.
///
/// The first attempt uses `listener` when given; every later attempt rebinds
/// `addr`.
async fn supervise_listener<H, Fut>(
    role: &'static str,
    listener: Option<TcpListener>,
    addr: SocketAddr,
    state: Arc<ServerState>,
    shutdown: Shutdown,
    policy: RestartPolicy,
    handler: H,
) where
    H: Fn(TcpStream, Arc<ServerState>, Shutdown) -> Fut + Clone,
    Fut: Future<Output = FlipResult<()>> + Send + 'static,
{
    let mut initial = listener;
    let restart_state = Arc::clone(&state);
    supervise(
        role,
        policy,
        shutdown.clone(),
        || {
            let listener = initial.take();
            let state = Arc::clone(&state);
            let shutdown = shutdown.clone();
            let handler = handler.clone();
            async move {
                let listener = match listener {
                    Some(listener) => listener,
                    None => bind_listener(addr)?,
                };
                accept_loop(role, &listener, &state, &shutdown, handler).await
            }
        },
        || restart_state.metrics.record_restart(),
    )
    .await;
}
