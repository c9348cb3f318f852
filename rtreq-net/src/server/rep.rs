use std::path::Path;
use std::time::Instant;

use crate::endpoint::Endpoint;
use crate::metrics::Metrics;
use crate::msg::Message;
use crate::server::{Server, ServerConfig, ServerHandle, ServerState};
use crate::socket::{Context, SocketType};
use crate::{Error, Result};

/// Responds to requests from clients using a single REP socket.
///
/// Requests are handled strictly one at a time. There is no concurrency
/// and no load distribution here, which makes it a useful baseline to
/// measure the brokered server against.
pub struct RepServer {
    endpoint: Endpoint,
    config: ServerConfig,
    handle: ServerHandle,
    state: ServerState,
    started: Instant,
    metrics: Metrics,
}

impl RepServer {
    pub fn new(config: ServerConfig, ctx: Context) -> Result<Self> {
        let endpoint = Endpoint::new(&config.addr, &config.name, ctx)?.with_encoding(config.encoding);
        let mut metrics = Metrics::new(endpoint.name(), "rep");
        metrics
            .extra
            .insert("server".to_string(), serde_json::json!("rep"));
        Ok(Self {
            endpoint,
            config,
            handle: ServerHandle::new(),
            state: ServerState::Created,
            started: Instant::now(),
            metrics,
        })
    }

    pub fn name(&self) -> &str {
        self.endpoint.name()
    }

    /// Produces the reply for a single request.
    fn handle_message(&mut self, message: Message) -> Result<()> {
        debug!("received: {}", message);
        let reply = format!("reply msg #{}", self.endpoint.stats().received);
        self.endpoint.send(&reply)
    }

    fn serve(&mut self) -> Result<()> {
        while self.handle.is_running() {
            if !self.endpoint.poll(self.config.poll_interval)? {
                continue;
            }
            match self.endpoint.receive() {
                Ok(message) => self.handle_message(message)?,
                Err(Error::MalformedMessage(e)) => {
                    // the socket still owes a reply for the bad request
                    warn!("malformed request: {}", e);
                    self.endpoint.send("error: malformed message")?;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

impl Server for RepServer {
    fn bind(&mut self) -> Result<()> {
        if self.state != ServerState::Created {
            return Ok(());
        }
        self.endpoint.bind(SocketType::Rep)?;
        self.state = ServerState::Bound;
        self.started = Instant::now();
        info!(
            "bound sync server to {} with REP socket",
            self.endpoint.addr()
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
        self.state = ServerState::Serving;

        let result = self.serve();
        self.state = ServerState::Draining;

        match result {
            Err(e) if !self.handle.is_running() || e.is_term() => {
                debug!("serving loop ended during shutdown: {}", e);
                Ok(())
            }
            Err(e) => {
                warn!("{}", e);
                self.handle.stop();
                Err(e)
            }
            Ok(()) => Ok(()),
        }
    }

    fn shutdown(&mut self, path: Option<&Path>) -> Result<()> {
        if self.state == ServerState::Closed {
            return Ok(());
        }
        info!("shutting down");
        self.handle.stop();
        self.state = ServerState::Closed;

        if let Err(e) = self.endpoint.shutdown() {
            warn!("could not shut down transport: {}", e);
        }

        let metrics = self.metrics();
        info!("{}", metrics);
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
        self.endpoint.bound_addr()
    }

    fn state(&self) -> ServerState {
        self.state
    }

    fn metrics(&self) -> Metrics {
        let mut metrics = self.metrics.clone();
        metrics.update(self.endpoint.stats(), self.started.elapsed());
        metrics
    }
}
