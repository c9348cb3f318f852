//! Load generator measuring request-reply throughput against a running
//! server.

use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::client::{seed_identities, Client, ClientConfig};
use crate::metrics::{rate, BenchResults};
use crate::socket::Context;
use crate::{Error, Result};

/// Configuration settings for benchmark runs.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BenchConfig {
    /// Settings shared by all the simulated clients
    pub client: ClientConfig,
    /// How long the clients keep sending
    #[serde(with = "crate::util::duration_millis")]
    pub duration: Duration,
    /// Number of simulated clients, each running on its own thread
    pub clients: usize,
    /// Seed for client identities, makes runs reproducible
    pub seed: Option<u64>,
    /// Where to write the results
    pub results_path: Option<PathBuf>,
}

impl Default for BenchConfig {
    fn default() -> Self {
        BenchConfig {
            client: ClientConfig::default(),
            duration: Duration::from_secs(30),
            clients: 1,
            seed: None,
            results_path: Some(PathBuf::from("results.json")),
        }
    }
}

/// Tally of a single simulated client.
#[derive(Debug, Default)]
struct Tally {
    messages: u64,
    replies: u64,
    dropped: u64,
    latency: Duration,
}

pub struct Benchmark;

impl Benchmark {
    /// Runs the benchmark, blocking until the configured duration elapses
    /// and every client has finished its last request.
    ///
    /// All clients share a single context. If none is provided one is
    /// created for the run and terminated once it's over.
    pub fn run(config: &BenchConfig, ctx: Option<Context>) -> Result<BenchResults> {
        if let Some(seed) = config.seed {
            seed_identities(seed);
        }
        let owns_context = ctx.is_none();
        let ctx = ctx.unwrap_or_default();
        let clients = config.clients.max(1);

        info!(
            "benchmarking {} with {} clients for {:?}",
            config.client.addr, clients, config.duration
        );

        let start = Instant::now();
        let deadline = start + config.duration;
        let mut tasks = Vec::with_capacity(clients);
        for n in 0..clients {
            let mut client_config = config.client.clone();
            if clients > 1 && !client_config.name.is_empty() {
                client_config.name = format!("{}-{}", client_config.name, n + 1);
            }
            let ctx = ctx.clone();
            let task = thread::Builder::new()
                .name(format!("bench-client-{}", n + 1))
                .spawn(move || simulate_client(&client_config, ctx, deadline))?;
            tasks.push(task);
        }

        let mut results = BenchResults {
            clients,
            seed: config.seed,
            ..Default::default()
        };
        let mut failure = None;
        for task in tasks {
            match task.join() {
                Ok(Ok(tally)) => {
                    results.messages += tally.messages;
                    results.replies += tally.replies;
                    results.dropped += tally.dropped;
                    results.latency_secs += tally.latency.as_secs_f64();
                }
                Ok(Err(e)) => {
                    error!("client failed: {}", e);
                    failure.get_or_insert(e);
                }
                Err(_) => {
                    failure.get_or_insert(Error::Other("client thread panicked".to_string()));
                }
            }
        }
        let elapsed = start.elapsed();

        if owns_context {
            ctx.terminate();
        }
        if let Some(e) = failure {
            return Err(e);
        }

        results.duration_secs = elapsed.as_secs_f64();
        results.throughput = rate(results.replies, elapsed);
        info!("{}", results);
        if let Some(path) = &config.results_path {
            results.write(path)?;
        }
        Ok(results)
    }
}

fn simulate_client(config: &ClientConfig, ctx: Context, deadline: Instant) -> Result<Tally> {
    let mut client = Client::new_with_config(config, Some(ctx))?;
    client.connect()?;

    let mut tally = Tally::default();
    while Instant::now() < deadline {
        tally.messages += 1;
        let text = format!("msg #{}", tally.messages);
        let sent = Instant::now();
        match client.send(&text, config.retries, config.timeout)? {
            Some(_) => tally.replies += 1,
            None => tally.dropped += 1,
        }
        tally.latency += sent.elapsed();
    }

    client.close()?;
    debug!(
        "client {} done: {} messages, {} dropped",
        client.identity(),
        tally.messages,
        tally.dropped
    );
    Ok(tally)
}

#[test]
fn config_defaults() {
    let config = BenchConfig::default();
    assert_eq!(config.clients, 1);
    assert_eq!(config.duration, Duration::from_secs(30));
    assert_eq!(config.results_path, Some(PathBuf::from("results.json")));
}

#[test]
fn config_from_json_keeps_defaults() {
    let config: BenchConfig =
        serde_json::from_str(r#"{"duration": 1500, "clients": 4, "seed": 7}"#).unwrap();
    assert_eq!(config.duration, Duration::from_millis(1500));
    assert_eq!(config.clients, 4);
    assert_eq!(config.seed, Some(7));
    assert_eq!(config.client.retries, 3);
}
