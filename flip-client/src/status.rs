//! # Status Client
//!
//! One request/reply round trip against the status listener, plus the
//! human-readable report printed by `coinflip status`.

use std::fmt::Write as _;

use num_format::{Locale, ToFormattedString};
use tokio::net::TcpStream;
use tokio::time;
use tracing::debug;

use flip_common::{CoinStatus, FlipError, FlipResult, FramedStream, HISTOGRAM_BUCKETS};
use flip_engine::StatusSnapshot;

use crate::config::StatusConfig;

const REPORT_COLUMNS: usize = 4;
const REPORT_ROWS: usize = HISTOGRAM_BUCKETS / REPORT_COLUMNS;

/// Sends an empty ping and waits for one `CoinStatus` reply.
///
/// The whole exchange is bounded by `config.timeout`; a dead server yields
/// [`FlipError::Timeout`] instead of hanging.
pub async fn fetch_status(config: &StatusConfig) -> FlipResult<CoinStatus> {
    time::timeout(config.timeout, round_trip(&config.server))
        .await
        .map_err(|_| FlipError::Timeout(config.timeout))?
}

async fn round_trip(server: &str) -> FlipResult<CoinStatus> {
    let stream = TcpStream::connect(server).await?;
    stream.set_nodelay(true)?;
    let mut framed = FramedStream::new(stream);
    framed.write_frame(&[]).await?;
    debug!(%server, "status requested");

    match framed.recv_message::<CoinStatus>().await? {
        Some(status) => Ok(status),
        None => Err(FlipError::Transport(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "server closed the connection without replying",
        ))),
    }
}

/// Formats an integer with thousands separators.
pub fn commify(value: u64) -> String {
    value.to_formatted_string(&Locale::en)
}

/// Formats a duration in seconds as `N days N hours N minutes N seconds`,
/// skipping zero parts.
pub fn timeify(mut seconds: u64) -> String {
    let days = seconds / 86_400;
    seconds %= 86_400;
    let hours = seconds / 3_600;
    seconds %= 3_600;
    let minutes = seconds / 60;
    seconds %= 60;

    [(days, "days"), (hours, "hours"), (minutes, "minutes"), (seconds, "seconds")]
        .iter()
        .filter(|(n, _)| *n != 0)
        .map(|(n, unit)| format!("{n} {unit}"))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Seconds until the total reaches the next power of ten at the current rate.
pub fn next_milestone_eta(total_flips: u64, flips_per_second: f64) -> Option<u64> {
    if total_flips == 0 || flips_per_second <= 0.0 {
        return None;
    }
    let total = total_flips as f64;
    let mut target = 10f64.powf(total.log10().ceil());
    if target <= total {
        target *= 10.0;
    }
    Some(((target - total) / flips_per_second) as u64)
}

/// Renders the status report.
pub fn render_report(status: &StatusSnapshot) -> String {
    let mut out = String::new();

    let total = commify(status.total_flips);
    let speed = commify(status.flips_per_second as u64);
    let width = total.len().max(speed.len());
    let _ = writeln!(out, "Total coins flipped: {total:>width$}");
    let _ = writeln!(out, "Coins per second:    {speed:>width$}");
    let _ = writeln!(out);

    if !status.per_worker.is_empty() {
        let mut workers = status.per_worker.clone();
        workers.sort_by(|a, b| b.flips_per_second.total_cmp(&a.flips_per_second));
        let speeds: Vec<_> = workers
            .iter()
            .map(|w| commify(w.flips_per_second as u64))
            .collect();
        let width = speeds.iter().map(String::len).max().unwrap_or(0);

        let _ = writeln!(out, "Connected clients:");
        for (worker, speed) in workers.iter().zip(&speeds) {
            let _ = writeln!(out, "{:016x}: {speed:>width$} cps", worker.worker_id);
        }
        let _ = writeln!(out);
    }

    if let Some(eta) = next_milestone_eta(status.total_flips, status.flips_per_second) {
        let _ = writeln!(out, "Time remaining to next milestone: {}", timeify(eta));
        let _ = writeln!(out);
    }

    let cells: Vec<String> = status.histogram.as_slice().iter().map(|&v| commify(v)).collect();
    let widths: Vec<usize> = cells
        .chunks(REPORT_ROWS)
        .map(|column| column.iter().map(String::len).max().unwrap_or(1))
        .collect();

    for row in 0..REPORT_ROWS {
        let line: Vec<String> = (0..REPORT_COLUMNS)
            .map(|column| {
                let index = column * REPORT_ROWS + row;
                format!("{:>3}: {:>width$}", index + 1, cells[index], width = widths[column])
            })
            .collect();
        let _ = writeln!(out, "{}", line.join("        "));
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use flip_common::Histogram;
    use flip_engine::WorkerRate;
    use std::time::Duration;

    #[test]
    fn commify_groups_thousands() {
        assert_eq!(commify(0), "0");
        assert_eq!(commify(1_234_567), "1,234,567");
    }

    #[test]
    fn timeify_skips_zero_parts() {
        assert_eq!(timeify(59), "59 seconds");
        assert_eq!(timeify(3_600), "1 hours");
        assert_eq!(timeify(90_061), "1 days 1 hours 1 minutes 1 seconds");
        assert_eq!(timeify(0), "");
    }

    #[test]
    fn milestone_targets_next_power_of_ten() {
        assert_eq!(next_milestone_eta(500, 100.0), Some(5));
        assert_eq!(next_milestone_eta(1_000, 1_000.0), Some(9));
        assert_eq!(next_milestone_eta(0, 10.0), None);
        assert_eq!(next_milestone_eta(10, 0.0), None);
    }

    #[test]
    fn report_lists_workers_by_speed() {
        let status = StatusSnapshot {
            total_flips: 1_500,
            flips_per_second: 1_500.0,
            histogram: Histogram::from_sparse([(0, 100), (127, 1)]),
            per_worker: vec![
                WorkerRate { worker_id: 0xa, flips_per_second: 500.0 },
                WorkerRate { worker_id: 0xb, flips_per_second: 1_000.0 },
            ],
        };
        let report = render_report(&status);
        assert!(report.starts_with("Total coins flipped: 1,500\n"));
        let fast = report.find("000000000000000b: 1,000 cps").unwrap();
        let slow = report.find("000000000000000a:   500 cps").unwrap();
        assert!(fast < slow);
        assert!(report.contains("  1: 100"));
        assert!(report.contains("128: 1"));
        assert!(report.contains("Time remaining to next milestone: 5 seconds"));
    }

    #[tokio::test]
    async fn fetch_times_out_on_silent_server() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let config = StatusConfig {
            server: listener.local_addr().unwrap().to_string(),
            timeout: Duration::from_millis(100),
        };
        let err = fetch_status(&config).await.unwrap_err();
        assert!(matches!(err, FlipError::Timeout(_)));
        drop(listener);
    }
}
