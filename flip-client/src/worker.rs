//! # Flipping Worker
//!
//! Runs N sampler threads that feed a local [`AggregateStore`], and a sender
//! task that drains the store every interval and pushes the result to the
//! server's ingest listener.
//!
//! ## Design Principles
//!
//! 1. **Fire and Forget**: Batches are written one-way; no reply is awaited.
//! 2. **Lossy by Design**: A batch that fails to send is logged and dropped;
//!    the connection is reopened on the next tick.
//! 3. **Sequential Sends**: One worker never has two batches in flight.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use rand::SeedableRng;
use rand_isaac::Isaac64Rng;
use tokio::net::TcpStream;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};

use flip_common::{CoinBatch, FlipError, FlipResult, FramedStream, Shutdown};
use flip_engine::{AggregateState, AggregateStore, StreakSampler};

use crate::config::WorkerConfig;

/// Default deadline for writing one batch.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// One-way batch writer toward the ingest listener.
#[derive(Debug)]
pub struct BatchSender {
    endpoint: String,
    worker_id: u64,
    connect_timeout: Duration,
    send_timeout: Duration,
    conn: Option<FramedStream<TcpStream>>,
}

impl BatchSender {
    pub fn new(endpoint: impl Into<String>, worker_id: u64, connect_timeout: Duration) -> Self {
        BatchSender {
            endpoint: endpoint.into(),
            worker_id,
            connect_timeout,
            send_timeout: DEFAULT_SEND_TIMEOUT,
            conn: None,
        }
    }

    /// Sets the deadline for writing one batch.
    pub fn with_send_timeout(mut self, send_timeout: Duration) -> Self {
        self.send_timeout = send_timeout;
        self
    }

    pub fn worker_id(&self) -> u64 {
        self.worker_id
    }

    pub fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    async fn connect(&self) -> FlipResult<FramedStream<TcpStream>> {
        let stream = time::timeout(self.connect_timeout, TcpStream::connect(&self.endpoint))
            .await
            .map_err(|_| FlipError::Timeout(self.connect_timeout))??;
        stream.set_nodelay(true)?;
        debug!(endpoint = %self.endpoint, "connected to ingest listener");
        Ok(FramedStream::new(stream))
    }

    /// Sends `state` as one batch, opening the connection if needed.
    ///
    /// On failure, timeout or cancellation the connection is discarded and
    /// the batch is not retried.
    pub async fn send(&mut self, state: &AggregateState) -> FlipResult<()> {
        let mut framed = match self.conn.take() {
            Some(framed) => framed,
            None => self.connect().await?,
        };
        let batch = CoinBatch::new(self.worker_id, state.total_flips, &state.histogram);
        time::timeout(self.send_timeout, framed.send_message(&batch))
            .await
            .map_err(|_| FlipError::Timeout(self.send_timeout))??;
        self.conn = Some(framed);
        Ok(())
    }

    async fn send_logged(&mut self, state: &AggregateState) {
        match self.send(state).await {
            Ok(()) => debug!(flips = state.total_flips, "batch sent"),
            Err(err) => warn!(
                error = %err,
                flips = state.total_flips,
                "dropping batch"
            ),
        }
    }
}

/// Drains `store` every `interval` and sends non-empty batches until shutdown.
///
/// A send still in flight when shutdown fires is abandoned. Returns the
/// sender so the caller can [`flush_remaining`] once producers are stopped.
pub async fn run_sender(
    store: Arc<AggregateStore>,
    mut sender: BatchSender,
    interval: Duration,
    mut shutdown: Shutdown,
) -> BatchSender {
    let mut ticker = time::interval_at(time::Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = shutdown.wait() => break,
            _ = ticker.tick() => {}
        }

        let state = store.drain();
        if state.total_flips == 0 {
            continue;
        }
        tokio::select! {
            biased;
            _ = shutdown.wait() => {
                warn!(flips = state.total_flips, "shutdown during send; dropping batch");
                break;
            }
            _ = sender.send_logged(&state) => {}
        }
    }
    sender
}

/// Sends whatever is left in `store` as one last batch.
pub async fn flush_remaining(store: &AggregateStore, sender: &mut BatchSender) {
    let state = store.drain();
    if state.total_flips > 0 {
        sender.send_logged(&state).await;
    }
}

/// A worker process: samplers plus sender.
#[derive(Debug)]
pub struct Worker {
    config: WorkerConfig,
    worker_id: u64,
    store: Arc<AggregateStore>,
}

impl Worker {
    /// Creates a worker with a fresh random id.
    pub fn new(config: WorkerConfig) -> FlipResult<Self> {
        config.validate()?;
        Ok(Worker {
            config,
            worker_id: rand::random::<u64>(),
            store: Arc::new(AggregateStore::new()),
        })
    }

    pub fn worker_id(&self) -> u64 {
        self.worker_id
    }

    /// Returns the local store samplers push into.
    pub fn store(&self) -> &Arc<AggregateStore> {
        &self.store
    }

    /// Runs until `shutdown` fires, then joins every sampler thread.
    pub async fn run(self, shutdown: Shutdown) -> FlipResult<()> {
        let threads = self.config.thread_count();
        info!(
            worker_id = format_args!("{:016x}", self.worker_id),
            threads,
            server = %self.config.server,
            "started flipping coins"
        );

        let samplers = self.spawn_samplers(threads, &shutdown)?;

        let sender = BatchSender::new(
            self.config.server.clone(),
            self.worker_id,
            self.config.connect_timeout,
        )
        .with_send_timeout(self.config.send_timeout);
        let mut sender = run_sender(
            Arc::clone(&self.store),
            sender,
            self.config.send_interval,
            shutdown,
        )
        .await;

        // samplers push their last flush after seeing the signal
        let joined = tokio::task::spawn_blocking(move || {
            for handle in samplers {
                if handle.join().is_err() {
                    warn!("sampler thread panicked");
                }
            }
        })
        .await;
        if joined.is_err() {
            warn!("failed to join sampler threads");
        }
        flush_remaining(&self.store, &mut sender).await;
        info!("worker stopped");
        Ok(())
    }

    fn spawn_samplers(&self, threads: usize, shutdown: &Shutdown) -> FlipResult<Vec<JoinHandle<()>>> {
        let mut handles = Vec::with_capacity(threads);
        for index in 0..threads {
            let store = Arc::clone(&self.store);
            let shutdown = shutdown.clone();
            let flush_words = self.config.flush_words;
            let handle = std::thread::Builder::new()
                .name(format!("sampler-{index}"))
                .spawn(move || {
                    let rng = Isaac64Rng::from_entropy();
                    StreakSampler::new(rng)
                        .with_flush_words(flush_words)
                        .run(&store, &shutdown);
                })
                .map_err(FlipError::Spawn)?;
            handles.push(handle);
        }
        Ok(handles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flip_common::{shutdown, Histogram, HISTOGRAM_BUCKETS};
    use prost::Message;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::net::{TcpListener, TcpSocket};

    #[tokio::test]
    async fn sender_writes_batches_on_one_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let mut sender = BatchSender::new(addr.to_string(), 42, Duration::from_secs(1));
        let state = AggregateState {
            histogram: Histogram::from_sparse([(0, 100)]),
            total_flips: 6_400,
        };
        sender.send(&state).await.unwrap();
        sender.send(&state).await.unwrap();

        let (stream, _) = listener.accept().await.unwrap();
        let mut framed = FramedStream::new(stream);
        for _ in 0..2 {
            let body = framed.read_frame().await.unwrap().unwrap();
            let batch = CoinBatch::decode(&body[..]).unwrap();
            assert_eq!(batch.hash, 42);
            assert_eq!(batch.total_flips, 6_400);
            assert_eq!(batch.histogram(), state.histogram);
        }
    }

    #[tokio::test]
    async fn sender_reports_unreachable_server() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let mut sender = BatchSender::new(addr.to_string(), 1, Duration::from_secs(1));
        let err = sender.send(&AggregateState::default()).await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn final_flush_follows_shutdown() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let store = Arc::new(AggregateStore::new());
        store.push(&Histogram::from_sparse([(2, 5)]), 640);

        let (trigger, shutdown) = shutdown::channel();
        trigger.trigger();
        let sender = BatchSender::new(addr.to_string(), 7, Duration::from_secs(1));
        let mut sender =
            run_sender(Arc::clone(&store), sender, Duration::from_secs(3600), shutdown).await;
        // left for the final flush once samplers are joined
        assert_eq!(store.snapshot().total_flips, 640);

        flush_remaining(&store, &mut sender).await;
        assert_eq!(store.snapshot(), AggregateState::default());
        let (stream, _) = listener.accept().await.unwrap();
        let mut framed = FramedStream::new(stream);
        let batch: CoinBatch = framed.recv_message().await.unwrap().unwrap();
        assert_eq!(batch.total_flips, 640);
        assert_eq!(batch.hash, 7);
    }

    /// A listener whose accepted sockets are never read.
    fn stalled_listener() -> TcpListener {
        let socket = TcpSocket::new_v4().unwrap();
        socket.set_recv_buffer_size(4096).unwrap();
        socket.bind("127.0.0.1:0".parse().unwrap()).unwrap();
        socket.listen(16).unwrap()
    }

    fn full_state() -> AggregateState {
        AggregateState {
            histogram: Histogram::from_sparse((0..HISTOGRAM_BUCKETS).map(|i| (i, u64::MAX / 2))),
            total_flips: u64::MAX / 2,
        }
    }

    #[tokio::test]
    async fn stalled_send_times_out_and_reconnects() {
        let listener = stalled_listener();
        let addr = listener.local_addr().unwrap();
        let held = tokio::spawn(async move {
            let (first, _) = listener.accept().await.unwrap();
            let (second, _) = listener.accept().await.unwrap();
            (first, second)
        });

        let mut sender = BatchSender::new(addr.to_string(), 9, Duration::from_secs(1))
            .with_send_timeout(Duration::from_millis(100));
        let state = full_state();
        let mut result = Ok(());
        for _ in 0..100_000 {
            result = sender.send(&state).await;
            if result.is_err() {
                break;
            }
        }
        assert!(matches!(result, Err(FlipError::Timeout(_))));
        assert!(!sender.is_connected());

        sender.send(&state).await.unwrap();
        assert!(sender.is_connected());
        time::timeout(Duration::from_secs(5), held)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn run_sender_stops_while_send_is_stalled() {
        let listener = stalled_listener();
        let addr = listener.local_addr().unwrap();
        let held = tokio::spawn(async move { listener.accept().await.map(|(stream, _)| stream) });

        let store = Arc::new(AggregateStore::new());
        let stop = Arc::new(AtomicBool::new(false));
        let feeder = {
            let store = Arc::clone(&store);
            let stop = Arc::clone(&stop);
            std::thread::spawn(move || {
                let state = full_state();
                while !stop.load(Ordering::Relaxed) {
                    store.push(&state.histogram, state.total_flips);
                    std::thread::sleep(Duration::from_micros(200));
                }
            })
        };

        let (trigger, shutdown) = shutdown::channel();
        let sender = BatchSender::new(addr.to_string(), 3, Duration::from_secs(1))
            .with_send_timeout(Duration::from_secs(60));
        let running = tokio::spawn(run_sender(
            Arc::clone(&store),
            sender,
            Duration::from_millis(1),
            shutdown,
        ));

        time::sleep(Duration::from_secs(2)).await;
        trigger.trigger();
        let stopped = time::timeout(Duration::from_secs(3), running).await;

        stop.store(true, Ordering::Relaxed);
        feeder.join().unwrap();
        held.abort();
        assert!(stopped.is_ok(), "sender ignored shutdown during a stalled send");
    }
}
