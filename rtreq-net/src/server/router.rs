use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::endpoint::Endpoint;
use crate::metrics::{Metrics, WorkerStats};
use crate::server::{Server, ServerConfig, ServerHandle, ServerState};
use crate::socket::{Context, SocketType};
use crate::worker::Worker;
use crate::{Error, Result};

/// Number of workers started when the configuration doesn't say otherwise.
pub const DEFAULT_WORKERS: usize = 16;

/// Internal address workers connect to. Every server appends its own
/// sequence number so that multiple servers can share a process.
pub const WORKERS_ADDR: &str = "inproc://workers";

static NEXT_BACKEND: AtomicUsize = AtomicUsize::new(0);

/// Counters kept by the broker's proxy loop.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct RouteStats {
    /// Requests handed over to the worker pool
    pub requests_routed: u64,
    /// Replies routed back to clients
    pub replies_routed: u64,
    /// Requests that arrived while no worker was connected
    pub dropped: u64,
}

type WorkerTask = JoinHandle<Result<WorkerStats>>;

/// Broker fanning requests out to a pool of workers.
///
/// The client-facing ROUTER socket tags every request with the envelope of
/// the client it came from. Requests are forwarded as is through a DEALER
/// socket bound to an internal address, which spreads them across the
/// connected workers. Replies travel the same way back, and the envelope
/// they carry takes them to the right client.
///
/// Workers are plain threads sharing the server's context. A worker that
/// fails is logged and, if configured, replaced; the remaining workers keep
/// serving either way.
pub struct RouterServer {
    frontend: Endpoint,
    backend: Endpoint,
    config: ServerConfig,
    handle: ServerHandle,
    state: ServerState,
    started: Instant,

    workers: Vec<(String, WorkerTask)>,
    /// Number of workers ever spawned, used for naming replacements
    spawned: usize,
    worker_stats: Vec<WorkerStats>,
    route_stats: RouteStats,
    metrics: Metrics,
}

impl RouterServer {
    pub fn new(config: ServerConfig, ctx: Context) -> Result<Self> {
        let frontend =
            Endpoint::new(&config.addr, &config.name, ctx.clone())?.with_encoding(config.encoding);
        let backend_addr = format!(
            "{}-{}",
            WORKERS_ADDR,
            NEXT_BACKEND.fetch_add(1, Ordering::SeqCst)
        );
        let backend =
            Endpoint::new(&backend_addr, frontend.name(), ctx)?.with_encoding(config.encoding);
        let metrics = Metrics::new(frontend.name(), "router");
        Ok(Self {
            frontend,
            backend,
            config,
            handle: ServerHandle::new(),
            state: ServerState::Created,
            started: Instant::now(),
            workers: Vec::new(),
            spawned: 0,
            worker_stats: Vec::new(),
            route_stats: RouteStats::default(),
            metrics,
        })
    }

    pub fn name(&self) -> &str {
        self.frontend.name()
    }

    /// Internal address the workers connect to.
    pub fn workers_addr(&self) -> &str {
        self.backend.addr()
    }

    pub fn route_stats(&self) -> RouteStats {
        self.route_stats
    }

    /// Stats of the workers that have exited so far. After `run` returns
    /// this covers the whole pool.
    pub fn worker_stats(&self) -> &[WorkerStats] {
        &self.worker_stats
    }

    fn pool_size(&self) -> usize {
        match self.config.workers {
            0 => DEFAULT_WORKERS,
            n => n,
        }
    }

    fn spawn_worker(&mut self) -> Result<()> {
        self.spawned += 1;
        let name = format!("{}-{}", self.frontend.name(), self.spawned);
        let worker = Worker::new(
            &name,
            self.backend.addr(),
            self.backend.context().clone(),
            self.handle.clone(),
            self.config.poll_interval,
            self.config.encoding,
        )?;
        let task = thread::Builder::new()
            .name(name.clone())
            .spawn(move || worker.run())?;
        self.workers.push((name, task));
        Ok(())
    }

    fn start_workers(&mut self) -> Result<()> {
        for _ in 0..self.pool_size() {
            self.spawn_worker()?;
        }
        self.state = ServerState::WorkersStarted;
        info!(
            "started {} workers on {}",
            self.workers.len(),
            self.backend.addr()
        );
        Ok(())
    }

    /// Collects workers that exited while the proxy was still running.
    fn reap_workers(&mut self) {
        let mut i = 0;
        while i < self.workers.len() {
            if !self.workers[i].1.is_finished() {
                i += 1;
                continue;
            }
            let (name, task) = self.workers.swap_remove(i);
            let outcome = task.join();
            if let Ok(Ok(_)) = outcome {
                warn!("worker {} exited early", name);
            }
            self.record_exit(&name, outcome);
            if self.config.restart_workers && self.handle.is_running() {
                match self.spawn_worker() {
                    Ok(()) => info!("replaced worker {}", name),
                    Err(e) => error!("failed replacing worker {}: {}", name, e),
                }
            } else {
                warn!("{} workers left in the pool", self.workers.len());
            }
        }
    }

    /// Shuttles frames between the two sockets until stopped.
    fn proxy(&mut self) -> Result<()> {
        while self.handle.is_running() {
            let (requests, replies) =
                Endpoint::poll_either(&self.frontend, &self.backend, self.config.poll_interval)?;
            if requests {
                if self.frontend.forward_to(&mut self.backend)? {
                    self.route_stats.requests_routed += 1;
                } else {
                    self.route_stats.dropped += 1;
                    warn!("no worker available, request dropped");
                }
            }
            if replies {
                // unroutable replies are discarded by the router socket
                self.backend.forward_to(&mut self.frontend)?;
                self.route_stats.replies_routed += 1;
            }
            self.reap_workers();
        }
        Ok(())
    }

    /// Stops the workers, closes both sockets and waits for the pool to
    /// finish.
    fn drain(&mut self) {
        self.handle.stop();
        if let Err(e) = self.frontend.close() {
            warn!("failed closing client-facing socket: {}", e);
        }
        if let Err(e) = self.backend.close() {
            warn!("failed closing worker socket: {}", e);
        }
        for (name, task) in std::mem::take(&mut self.workers) {
            let outcome = task.join();
            self.record_exit(&name, outcome);
        }
        debug!("worker pool drained");
    }

    /// Keeps the stats of a joined worker, including one that failed
    /// part way through.
    fn record_exit(&mut self, name: &str, outcome: thread::Result<Result<WorkerStats>>) {
        match outcome {
            Ok(Ok(stats)) => self.worker_stats.push(stats),
            Ok(Err(Error::WorkerFailed {
                name,
                handled,
                reason,
            })) => {
                error!(
                    "worker {} failed after {} requests: {}",
                    name, handled, reason
                );
                self.worker_stats.push(WorkerStats { name, handled });
            }
            Ok(Err(e)) => error!("worker {} failed: {}", name, e),
            Err(_) => error!("worker {} panicked", name),
        }
    }
}

impl Server for RouterServer {
    fn bind(&mut self) -> Result<()> {
        if self.state != ServerState::Created {
            return Ok(());
        }
        self.frontend.bind(SocketType::Router)?;
        self.backend.bind(SocketType::Dealer)?;
        self.state = ServerState::Bound;
        self.started = Instant::now();
        info!(
            "bound async server to {} with ROUTER socket",
            self.frontend.addr()
        );
        Ok(())
    }

    fn run(&mut self) -> Result<()> {
        self.bind()?;
        if self.state != ServerState::Bound {
            return Err(Error::Other(format!(
                "server can't run while {:?}",
                self.state
            )));
        }
        if let Err(e) = self.start_workers() {
            self.drain();
            self.state = ServerState::Draining;
            return Err(e);
        }

        self.state = ServerState::Serving;
        let result = self.proxy();
        let stopped = !self.handle.is_running();

        self.state = ServerState::Draining;
        self.drain();

        match result {
            Ok(()) => Ok(()),
            Err(e) if stopped || e.is_term() => {
                debug!("proxy interrupted during shutdown: {}", e);
                Ok(())
            }
            Err(e) => {
                error!("proxy failed: {}", e);
                Err(match e {
                    Error::Recv(z) | Error::Send(z) | Error::Zmq(z) => Error::ProxyInterrupted(z),
                    e => e,
                })
            }
        }
    }

    fn shutdown(&mut self, path: Option<&Path>) -> Result<()> {
        if self.state == ServerState::Closed {
            return Ok(());
        }
        info!("shutting down");
        if !self.workers.is_empty() {
            self.drain();
        } else {
            self.handle.stop();
        }
        self.state = ServerState::Closed;

        if let Err(e) = self.backend.close() {
            warn!("failed closing worker socket: {}", e);
        }
        if let Err(e) = self.frontend.shutdown() {
            warn!("could not shut down transport: {}", e);
        }

        let metrics = self.metrics();
        info!("{}", metrics);
        for worker in &metrics.workers {
            debug!("worker {} handled {} requests", worker.name, worker.handled);
        }
        if let Some(path) = path {
            if let Err(e) = metrics.write(path) {
                error!("failed writing metrics to {}: {}", path.display(), e);
            }
        }
        Ok(())
    }

    fn handle(&self) -> ServerHandle {
        self.handle.clone()
    }

    fn bound_addr(&self) -> Result<String> {
        self.frontend.bound_addr()
    }

    fn state(&self) -> ServerState {
        self.state
    }

    fn metrics(&self) -> Metrics {
        let mut metrics = self.metrics.clone();
        metrics.update(self.frontend.stats(), self.started.elapsed());
        metrics.workers = self.worker_stats.clone();
        metrics.workers.sort_by(|a, b| a.name.cmp(&b.name));
        let extra = &mut metrics.extra;
        extra.insert("server".to_string(), serde_json::json!("router"));
        extra.insert(
            "requests_routed".to_string(),
            serde_json::json!(self.route_stats.requests_routed),
        );
        extra.insert(
            "replies_routed".to_string(),
            serde_json::json!(self.route_stats.replies_routed),
        );
        extra.insert(
            "dropped".to_string(),
            serde_json::json!(self.route_stats.dropped),
        );
        metrics
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::client::Client;
    use crate::server::ServerMode;

    fn pool_config(restart_workers: bool) -> ServerConfig {
        ServerConfig {
            name: "pool".to_string(),
            addr: "127.0.0.1:*".to_string(),
            mode: ServerMode::Async,
            workers: 2,
            restart_workers,
            poll_interval: Duration::from_millis(20),
            metrics_path: None,
            ..Default::default()
        }
    }

    /// Starts the pool and adds a worker that fails right away after
    /// handling `handled` requests.
    fn pool_with_failed_worker(restart_workers: bool, handled: u64) -> RouterServer {
        let mut server = RouterServer::new(pool_config(restart_workers), Context::new()).unwrap();
        server.bind().unwrap();
        server.start_workers().unwrap();
        let task: WorkerTask = thread::spawn(move || {
            Err(Error::WorkerFailed {
                name: "pool-broken".to_string(),
                handled,
                reason: "socket gone".to_string(),
            })
        });
        server.workers.push(("pool-broken".to_string(), task));
        while !server
            .workers
            .iter()
            .any(|(name, task)| name == "pool-broken" && task.is_finished())
        {
            thread::sleep(Duration::from_millis(5));
        }
        server.reap_workers();
        server
    }

    /// Proxies on a separate thread while a client sends `count` requests.
    /// Returns the server after draining, along with the reply payloads.
    fn serve_requests(mut server: RouterServer, count: usize) -> (RouterServer, Vec<String>) {
        let addr = server.bound_addr().unwrap();
        let handle = server.handle();
        let task = thread::spawn(move || {
            server.state = ServerState::Serving;
            let result = server.proxy();
            server.drain();
            (server, result)
        });

        let mut client = Client::new(&addr, "tester", None).unwrap();
        client.connect().unwrap();
        let mut replies = Vec::new();
        for n in 0..count {
            let reply = client
                .send(&format!("msg {}", n), 3, Duration::from_secs(5))
                .unwrap()
                .expect("remaining workers should reply");
            replies.push(reply.payload().to_string());
        }
        client.shutdown().unwrap();

        handle.stop();
        let (server, result) = task.join().unwrap();
        result.unwrap();
        (server, replies)
    }

    #[test]
    fn failed_worker_keeps_its_stats() {
        let mut server = pool_with_failed_worker(false, 3);
        assert_eq!(server.workers.len(), 2);
        assert_eq!(
            server.worker_stats(),
            &[WorkerStats {
                name: "pool-broken".to_string(),
                handled: 3,
            }]
        );

        let (mut server, replies) = serve_requests(server, 10);
        assert!(replies
            .iter()
            .all(|r| r.ends_with("from worker pool-1") || r.ends_with("from worker pool-2")));

        let metrics = server.metrics();
        assert_eq!(metrics.workers.len(), 3);
        assert_eq!(metrics.workers.iter().map(|w| w.handled).sum::<u64>(), 13);
        server.shutdown(None).unwrap();
    }

    #[test]
    fn failed_worker_is_replaced_when_configured() {
        let server = pool_with_failed_worker(true, 0);
        assert_eq!(server.workers.len(), 3);
        assert_eq!(server.spawned, 3);
        assert!(server.workers.iter().any(|(name, _)| name == "pool-3"));

        let (mut server, replies) = serve_requests(server, 30);
        assert!(replies.iter().any(|r| r.ends_with("from worker pool-3")));

        let metrics = server.metrics();
        let names: Vec<_> = metrics.workers.iter().map(|w| w.name.as_str()).collect();
        assert_eq!(names, ["pool-1", "pool-2", "pool-3", "pool-broken"]);
        assert_eq!(metrics.workers.iter().map(|w| w.handled).sum::<u64>(), 30);
        server.shutdown(None).unwrap();
    }
}
