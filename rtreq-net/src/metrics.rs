//! Metrics artifacts written at server shutdown and at the end of a
//! benchmark run.

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::endpoint::Stats;
use crate::Result;

/// Number of requests a single worker handled before exiting.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct WorkerStats {
    pub name: String,
    pub handled: u64,
}

/// Server-side metrics.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Metrics {
    /// Name of the server
    pub server: String,
    /// Serving mode, `rep` or `router`
    pub mode: String,
    pub started: DateTime<Utc>,
    pub elapsed_secs: f64,
    pub stats: Stats,
    /// Messages received per second over the whole uptime
    pub throughput: f64,
    pub workers: Vec<WorkerStats>,
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl Metrics {
    pub fn new(server: &str, mode: &str) -> Self {
        Self {
            server: server.to_string(),
            mode: mode.to_string(),
            started: Utc::now(),
            elapsed_secs: 0.,
            stats: Stats::default(),
            throughput: 0.,
            workers: Vec::new(),
            extra: BTreeMap::new(),
        }
    }

    /// Updates elapsed time and throughput using the given counters.
    pub fn update(&mut self, stats: Stats, elapsed: Duration) {
        self.stats = stats;
        self.elapsed_secs = elapsed.as_secs_f64();
        self.throughput = rate(stats.received, elapsed);
    }

    /// Writes the metrics out as pretty json.
    pub fn write(&self, path: impl AsRef<Path>) -> Result<()> {
        write_json(self, path.as_ref())
    }
}

impl Display for Metrics {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} ({}): received {} messages, sent {} ({} bytes) in {:.3}s, {:.2} msg/sec",
            self.server,
            self.mode,
            self.stats.received,
            self.stats.sent,
            self.stats.bytes_sent,
            self.elapsed_secs,
            self.throughput
        )
    }
}

/// Results of a benchmark run.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct BenchResults {
    /// Number of concurrent clients
    pub clients: usize,
    /// Messages sent, not counting resends
    pub messages: u64,
    pub replies: u64,
    pub dropped: u64,
    /// Wall clock time of the whole run
    pub duration_secs: f64,
    /// Time spent inside sends, summed across clients
    pub latency_secs: f64,
    /// Replies received per second of wall clock time
    pub throughput: f64,
    pub seed: Option<u64>,
}

impl BenchResults {
    pub fn write(&self, path: impl AsRef<Path>) -> Result<()> {
        write_json(self, path.as_ref())
    }

    /// Mean time a single message took to complete.
    pub fn mean_latency(&self) -> Duration {
        if self.messages == 0 {
            return Duration::from_secs(0);
        }
        Duration::from_secs_f64(self.latency_secs / self.messages as f64)
    }
}

impl Display for BenchResults {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} clients sent {} messages ({} replies, {} dropped) in {:.3}s, {:.2} msg/sec",
            self.clients,
            self.messages,
            self.replies,
            self.dropped,
            self.duration_secs,
            self.throughput
        )
    }
}

pub(crate) fn rate(count: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0. {
        count as f64 / secs
    } else {
        0.
    }
}

fn write_json<S: Serialize>(obj: &S, path: &Path) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut writer, obj)?;
    writer.write_all(b"\n")?;
    writer.flush()?;
    debug!("wrote metrics to {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_handles_zero_elapsed() {
        assert_eq!(rate(10, Duration::from_secs(0)), 0.);
        assert_eq!(rate(10, Duration::from_secs(2)), 5.);
    }

    #[test]
    fn metrics_write_json() {
        let mut metrics = Metrics::new("alpha", "rep");
        metrics.update(
            Stats {
                sent: 4,
                received: 4,
                bytes_sent: 120,
            },
            Duration::from_secs(2),
        );
        metrics
            .extra
            .insert("server".to_string(), serde_json::json!("rep"));

        let path = std::env::temp_dir().join(format!("rtreq-metrics-{}.json", std::process::id()));
        metrics.write(&path).unwrap();
        let read: Metrics =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(read.stats.received, 4);
        assert_eq!(read.throughput, 2.);
        assert_eq!(read.extra["server"], "rep");
    }

    #[test]
    fn bench_mean_latency() {
        let results = BenchResults {
            messages: 4,
            latency_secs: 2.,
            ..Default::default()
        };
        assert_eq!(results.mean_latency(), Duration::from_millis(500));
        assert_eq!(BenchResults::default().mean_latency(), Duration::from_secs(0));
    }
}
