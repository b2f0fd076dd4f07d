//! # End-to-End Tests
//!
//! Purpose: Drive a real server over loopback TCP with the worker sender and
//! the status client.
//!
//! ## Design Principles
//!
//! 1. **End-to-End**: Exercise ingest, status and persistence together.
//! 2. **Isolated Server**: Bind to ephemeral ports per test.
//! 3. **Explicit Shutdown**: Every test stops the server through its trigger.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use prost::Message;
use tokio::task::JoinHandle;

use flip_client::status::fetch_status;
use flip_client::{BatchSender, StatusConfig, Worker, WorkerConfig};
use flip_common::{shutdown, CoinStatus, FlipResult, Histogram, ShutdownTrigger};
use flip_engine::{AggregateState, AggregateStore, StatusSnapshot};
use flip_server::persistence::{self, CURRENT_FILE};
use flip_server::{FilesystemBackend, MemoryBackend, Server, ServerConfig, SnapshotBackend};

struct TestServer {
    ingest: SocketAddr,
    status: SocketAddr,
    trigger: ShutdownTrigger,
    handle: JoinHandle<FlipResult<()>>,
}

impl TestServer {
    async fn stop(self) {
        self.trigger.trigger();
        self.handle.await.unwrap().unwrap();
    }
}

fn test_config() -> ServerConfig {
    ServerConfig {
        ingest_addr: "127.0.0.1:0".parse().unwrap(),
        status_addr: "127.0.0.1:0".parse().unwrap(),
        snapshot_interval: Duration::from_secs(3600),
        ..ServerConfig::default()
    }
}

async fn spawn_server(backend: Arc<dyn SnapshotBackend>) -> TestServer {
    let server = Server::bind(test_config(), backend).await.unwrap();
    let ingest = server.ingest_addr().unwrap();
    let status = server.status_addr().unwrap();
    let (trigger, shutdown) = shutdown::channel();
    let handle = tokio::spawn(server.run(shutdown));
    TestServer {
        ingest,
        status,
        trigger,
        handle,
    }
}

fn status_config(addr: SocketAddr) -> StatusConfig {
    StatusConfig {
        server: addr.to_string(),
        timeout: Duration::from_secs(5),
    }
}

/// Polls the status listener until `done` holds or the deadline passes.
async fn wait_for_status<F>(addr: SocketAddr, done: F) -> CoinStatus
where
    F: Fn(&CoinStatus) -> bool,
{
    let config = status_config(addr);
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let status = fetch_status(&config).await.unwrap();
        if done(&status) || tokio::time::Instant::now() > deadline {
            return status;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

fn persisted(total_flips: u64, histogram: Histogram) -> Vec<u8> {
    StatusSnapshot::from_state(AggregateState {
        histogram,
        total_flips,
    })
    .to_wire()
    .encode_to_vec()
}

#[tokio::test]
async fn single_batch_is_reported() {
    let server = spawn_server(Arc::new(MemoryBackend::new())).await;

    let mut sender = BatchSender::new(server.ingest.to_string(), 0xfeed, Duration::from_secs(1));
    let state = AggregateState {
        histogram: Histogram::from_sparse([(0, 100)]),
        total_flips: 6_400,
    };
    sender.send(&state).await.unwrap();

    let status = wait_for_status(server.status, |s| s.total_flips == 6_400).await;
    assert_eq!(status.total_flips, 6_400);
    assert_eq!(status.histogram(), state.histogram);
    assert_eq!(status.stats.len(), 1);
    assert_eq!(status.stats[0].hash, 0xfeed);
    assert_eq!(status.stats[0].flips_per_second, 0.0);

    server.stop().await;
}

#[tokio::test]
async fn restart_resumes_from_snapshot() {
    let backend = Arc::new(MemoryBackend::with_current(persisted(
        1_000,
        Histogram::from_sparse([(1, 10)]),
    )));
    let server = spawn_server(backend.clone()).await;

    let mut sender = BatchSender::new(server.ingest.to_string(), 1, Duration::from_secs(1));
    let state = AggregateState {
        histogram: Histogram::from_sparse([(1, 5)]),
        total_flips: 500,
    };
    sender.send(&state).await.unwrap();

    let status = wait_for_status(server.status, |s| s.total_flips == 1_500).await;
    assert_eq!(status.total_flips, 1_500);
    assert_eq!(status.histogram().get(1), 15);

    server.stop().await;

    // the final snapshot on shutdown carries the combined total
    let saved = CoinStatus::decode(&backend.current().unwrap()[..]).unwrap();
    assert_eq!(saved.total_flips, 1_500);
    assert!(saved.stats.is_empty());
}

#[tokio::test]
async fn malformed_worker_does_not_affect_others() {
    let server = spawn_server(Arc::new(MemoryBackend::new())).await;

    let mut bad = tokio::net::TcpStream::connect(server.ingest).await.unwrap();
    tokio::io::AsyncWriteExt::write_all(&mut bad, &[0, 0, 0, 3, 0xff, 0xff, 0xff])
        .await
        .unwrap();

    let mut sender = BatchSender::new(server.ingest.to_string(), 2, Duration::from_secs(1));
    sender
        .send(&AggregateState {
            histogram: Histogram::from_sparse([(0, 1)]),
            total_flips: 64,
        })
        .await
        .unwrap();

    let status = wait_for_status(server.status, |s| s.total_flips == 64).await;
    assert_eq!(status.total_flips, 64);

    server.stop().await;
}

#[tokio::test]
async fn worker_streams_batches_until_shutdown() {
    let server = spawn_server(Arc::new(MemoryBackend::new())).await;

    let mut config = WorkerConfig::new(&server.ingest.to_string());
    config.threads = 1;
    config.flush_words = 64;
    config.send_interval = Duration::from_millis(50);
    let worker = Worker::new(config).unwrap();
    let worker_id = worker.worker_id();

    let (trigger, stop) = shutdown::channel();
    let running = tokio::spawn(worker.run(stop));

    let status = wait_for_status(server.status, |s| s.stats.len() == 1 && s.total_flips > 0).await;
    assert!(status.total_flips > 0);
    assert_eq!(status.total_flips % 64, 0);
    assert_eq!(status.stats[0].hash, worker_id);

    trigger.trigger();
    running.await.unwrap().unwrap();
    server.stop().await;
}

#[tokio::test]
async fn filesystem_snapshot_survives_restart() {
    let dir = tempfile::tempdir().unwrap();

    let backend = Arc::new(FilesystemBackend::new(dir.path()));
    let server = spawn_server(backend.clone()).await;
    let mut sender = BatchSender::new(server.ingest.to_string(), 3, Duration::from_secs(1));
    sender
        .send(&AggregateState {
            histogram: Histogram::from_sparse([(2, 2)]),
            total_flips: 1_000,
        })
        .await
        .unwrap();
    wait_for_status(server.status, |s| s.total_flips == 1_000).await;
    server.stop().await;
    assert!(dir.path().join(CURRENT_FILE).exists());

    let restored = AggregateStore::new();
    assert_eq!(persistence::restore(&*backend, &restored), Some(1_000));

    let server = spawn_server(backend).await;
    let status = fetch_status(&status_config(server.status)).await.unwrap();
    assert_eq!(status.total_flips, 1_000);
    assert_eq!(status.histogram().get(2), 2);
    server.stop().await;
}
