//! Servers answering client requests.
//!
//! Two flavors are available. `RepServer` handles requests one at a time on
//! a single socket. `RouterServer` puts a broker in front of a pool of
//! workers, so that many clients can have requests in flight at once.
//!
//! Both implement the `Server` contract, and both can be stopped from
//! another thread through a `ServerHandle`.

use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::metrics::Metrics;
use crate::socket::{Context, Encoding};
use crate::{Error, Result};

mod rep;
mod router;

pub use router::{RouteStats, RouterServer, DEFAULT_WORKERS, WORKERS_ADDR};
pub use rep::RepServer;

/// Default address servers bind to.
pub const DEFAULT_SERVER_ADDR: &str = "*:4157";

/// Common interface of all server variants.
pub trait Server: Send {
    /// Binds the server's sockets. Called by `run` if it wasn't called
    /// explicitly before.
    fn bind(&mut self) -> Result<()>;

    /// Serves requests until stopped through the handle, or until the
    /// transport fails.
    fn run(&mut self) -> Result<()>;

    /// Closes the transport, terminates the channel context and writes the
    /// metrics out if a path is given. Only the first call does anything.
    fn shutdown(&mut self, path: Option<&Path>) -> Result<()>;

    /// Handle that can be used to stop the server from another thread.
    fn handle(&self) -> ServerHandle;

    /// Address the client-facing socket is bound to.
    fn bound_addr(&self) -> Result<String>;

    fn state(&self) -> ServerState;

    /// Snapshot of the metrics collected so far.
    fn metrics(&self) -> Metrics;
}

/// Lifecycle of a server.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ServerState {
    Created,
    Bound,
    /// Broker only, worker pool is up but requests aren't routed yet
    WorkersStarted,
    Serving,
    Draining,
    Closed,
}

/// Cloneable stop signal shared by a server and its workers.
#[derive(Clone, Debug)]
pub struct ServerHandle {
    running: Arc<AtomicBool>,
}

impl ServerHandle {
    pub fn new() -> Self {
        Self {
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Asks the server to stop. Serving loops notice it within one poll
    /// interval.
    pub fn stop(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            debug!("stop requested");
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl Default for ServerHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Selects how the server processes requests.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerMode {
    /// Single REP socket, one request at a time
    Sync,
    /// ROUTER-DEALER broker in front of a worker pool
    Async,
}

impl Display for ServerMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sync => write!(f, "sync"),
            Self::Async => write!(f, "async"),
        }
    }
}

impl FromStr for ServerMode {
    type Err = Error;
    fn from_str(s: &str) -> core::result::Result<Self, Error> {
        match s.to_lowercase().as_str() {
            "sync" | "rep" => Ok(Self::Sync),
            "async" | "router" => Ok(Self::Async),
            _ => Err(Error::Other(format!("unknown server mode: {}", s))),
        }
    }
}

/// Configuration settings for server.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Name of the server, hostname is used if empty
    pub name: String,
    /// Address to bind the client-facing socket to
    pub addr: String,
    pub mode: ServerMode,
    /// Number of workers started in async mode, zero means the default
    pub workers: usize,
    /// Start replacement workers for the ones that fail
    pub restart_workers: bool,
    /// Fixed duration after which the server shuts down
    #[serde(with = "crate::util::opt_duration_millis")]
    pub uptime: Option<Duration>,
    /// How often serving loops check for the stop signal
    #[serde(with = "crate::util::duration_millis")]
    pub poll_interval: Duration,
    pub encoding: Encoding,
    /// Where to write metrics on shutdown
    pub metrics_path: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            name: "".to_string(),
            addr: DEFAULT_SERVER_ADDR.to_string(),
            mode: ServerMode::Async,
            workers: DEFAULT_WORKERS,
            restart_workers: false,
            uptime: None,
            poll_interval: Duration::from_millis(100),
            encoding: Encoding::Bincode,
            metrics_path: Some(PathBuf::from("metrics.json")),
        }
    }
}

/// Creates a server of the configured mode. If no context is provided the
/// server creates its own. Either way the server terminates the context
/// on shutdown.
pub fn new_server(config: ServerConfig, ctx: Option<Context>) -> Result<Box<dyn Server>> {
    let ctx = ctx.unwrap_or_default();
    let server: Box<dyn Server> = match config.mode {
        ServerMode::Sync => Box::new(RepServer::new(config, ctx)?),
        ServerMode::Async => Box::new(RouterServer::new(config, ctx)?),
    };
    Ok(server)
}

#[test]
fn handle_stops_all_clones() {
    let handle = ServerHandle::new();
    let clone = handle.clone();
    assert!(clone.is_running());
    handle.stop();
    assert!(!clone.is_running());
    clone.stop();
    assert!(!handle.is_running());
}

#[test]
fn mode_from_str() {
    assert_eq!(ServerMode::from_str("sync").unwrap(), ServerMode::Sync);
    assert_eq!(ServerMode::from_str("ROUTER").unwrap(), ServerMode::Async);
    assert!(ServerMode::from_str("pubsub").is_err());
}
