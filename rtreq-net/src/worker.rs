use std::time::Duration;

use crate::endpoint::Endpoint;
use crate::metrics::WorkerStats;
use crate::msg::Message;
use crate::server::ServerHandle;
use crate::socket::{Context, Encoding, SocketType};
use crate::{Error, Result};

/// Minimal responder attached to a broker's internal address.
///
/// Workers process exactly one request at a time and share no state with
/// their siblings. Which worker gets a given request is decided entirely by
/// the broker. Replies are tagged with the worker's name, which makes the
/// load distribution visible to clients.
///
/// # Shutdown
///
/// Workers don't own the context they were given. They only close their
/// own endpoint, either after noticing the stop signal on the shared
/// handle or after the context was terminated underneath them.
pub struct Worker {
    endpoint: Endpoint,
    handle: ServerHandle,
    poll_interval: Duration,
}

impl Worker {
    /// Creates a new worker and connects it to the internal address.
    pub fn new(
        name: &str,
        addr: &str,
        ctx: Context,
        handle: ServerHandle,
        poll_interval: Duration,
        encoding: Encoding,
    ) -> Result<Self> {
        let mut endpoint = Endpoint::new(addr, name, ctx)?.with_encoding(encoding);
        endpoint.connect(SocketType::Rep)?;
        debug!("worker {} connected to {}", endpoint.name(), endpoint.addr());
        Ok(Self {
            endpoint,
            handle,
            poll_interval,
        })
    }

    pub fn name(&self) -> &str {
        self.endpoint.name()
    }

    /// Serves requests until stopped, returning the number of requests
    /// handled. A failed worker reports that number in its error.
    pub fn run(mut self) -> Result<WorkerStats> {
        let result = self.serve();
        let stats = WorkerStats {
            name: self.endpoint.name().to_string(),
            handled: self.endpoint.stats().sent,
        };
        if let Err(e) = self.endpoint.close() {
            debug!("worker {}: failed closing endpoint: {}", stats.name, e);
        }

        match result {
            Ok(()) => {
                debug!("worker {} done, handled {}", stats.name, stats.handled);
                Ok(stats)
            }
            Err(e) if e.is_term() || !self.handle.is_running() => {
                debug!("worker {} interrupted: {}", stats.name, e);
                Ok(stats)
            }
            Err(e) => Err(Error::WorkerFailed {
                name: stats.name,
                handled: stats.handled,
                reason: e.to_string(),
            }),
        }
    }

    fn serve(&mut self) -> Result<()> {
        while self.handle.is_running() {
            if !self.endpoint.poll(self.poll_interval)? {
                continue;
            }
            match self.endpoint.receive() {
                Ok(message) => self.handle_message(message)?,
                Err(Error::MalformedMessage(e)) => {
                    warn!("worker {}: malformed request: {}", self.name(), e);
                    self.endpoint.send("error: malformed message")?;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn handle_message(&mut self, message: Message) -> Result<()> {
        trace!("worker {} received: {}", self.name(), message);
        let reply = format!(
            "reply msg #{} from worker {}",
            self.endpoint.stats().received,
            self.endpoint.name()
        );
        self.endpoint.send(&reply)
    }
}
