//! Optional configuration file.
//!
//! Values found in the file take the place of the built-in defaults.
//! Command line flags take precedence over both.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use rtreq_net::{BenchConfig, ClientConfig, ServerConfig};

/// Contents of a `rtreq.toml` file.
///
/// ```toml
/// [server]
/// addr = "*:4157"
/// workers = 8
///
/// [client]
/// addr = "localhost:4157"
/// timeout = 2000
///
/// [bench]
/// duration = 10000
/// clients = 4
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub server: ServerConfig,
    pub client: ClientConfig,
    pub bench: BenchConfig,
}

impl FileConfig {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed reading config file {}", path.display()))?;
        Self::from_str(&contents)
            .with_context(|| format!("failed parsing config file {}", path.display()))
    }

    pub fn from_str(s: &str) -> Result<Self> {
        let value: toml::Value = toml::from_str(s)?;
        let has_bench_client = value
            .get("bench")
            .and_then(|bench| bench.get("client"))
            .is_some();
        let mut config: FileConfig = value.try_into()?;
        // the client table also serves as the base for benchmark clients
        if !has_bench_client {
            config.bench.client = config.client.clone();
        }
        Ok(config)
    }
}

#[test]
fn empty_file_gives_defaults() {
    let config = FileConfig::from_str("").unwrap();
    assert_eq!(config.server.addr, "*:4157");
    assert_eq!(config.server.workers, rtreq_net::DEFAULT_WORKERS);
    assert_eq!(config.client.addr, "localhost:4157");
    assert_eq!(config.bench.clients, 1);
}

#[test]
fn tables_override_defaults() {
    let config = FileConfig::from_str(
        r#"
        [server]
        addr = "127.0.0.1:9090"
        mode = "sync"
        workers = 4
        uptime = 60000

        [client]
        name = "pinger"
        retries = 5
        timeout = 250

        [bench]
        clients = 8
        seed = 42
        "#,
    )
    .unwrap();
    assert_eq!(config.server.addr, "127.0.0.1:9090");
    assert_eq!(config.server.mode, rtreq_net::ServerMode::Sync);
    assert_eq!(config.server.workers, 4);
    assert_eq!(
        config.server.uptime,
        Some(std::time::Duration::from_secs(60))
    );
    assert_eq!(config.client.retries, 5);
    assert_eq!(config.client.timeout, std::time::Duration::from_millis(250));
    assert_eq!(config.bench.clients, 8);
    assert_eq!(config.bench.seed, Some(42));
    assert_eq!(config.bench.client.name, "pinger");
}

#[test]
fn bench_client_table_is_kept() {
    let config = FileConfig::from_str(
        r#"
        [client]
        retries = 5

        [bench]
        client = { name = "bencher", retries = 9 }
        "#,
    )
    .unwrap();
    assert_eq!(config.bench.client.retries, 9);
    assert_eq!(config.bench.client.name, "bencher");

    let config = FileConfig::from_str(
        r#"
        [client]
        retries = 5

        [bench.client]
        retries = 7
        "#,
    )
    .unwrap();
    assert_eq!(config.bench.client.retries, 7);
}

#[test]
fn commented_bench_client_still_inherits() {
    let config = FileConfig::from_str(
        r#"
        # [bench.client] falls back to the [client] table
        [client]
        retries = 5
        "#,
    )
    .unwrap();
    assert_eq!(config.bench.client.retries, 5);
}
