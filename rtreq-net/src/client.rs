use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::endpoint::{Endpoint, Stats};
use crate::msg::Message;
use crate::socket::{Context, Encoding, SocketType};
use crate::Result;

/// Default address clients connect to.
pub const DEFAULT_CLIENT_ADDR: &str = "localhost:4157";

/// Configuration settings for client.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Self-assigned name, hostname is used if empty
    pub name: String,
    /// Address of the server
    pub addr: String,
    /// Time to wait for a reply before retrying
    #[serde(with = "crate::util::duration_millis")]
    pub timeout: Duration,
    /// Number of attempts made before a message is dropped
    pub retries: u32,
    pub encoding: Encoding,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            name: "".to_string(),
            addr: DEFAULT_CLIENT_ADDR.to_string(),
            timeout: Duration::from_secs(5),
            retries: 3,
            encoding: Encoding::Bincode,
        }
    }
}

/// Delivery counters kept by the client.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct ClientStats {
    /// Every transmission of a request, resends included
    pub attempts: u64,
    /// Replies received and decoded
    pub replies: u64,
    /// Number of times the connection was torn down and re-established
    pub reconnects: u64,
    /// Messages abandoned after the retry budget ran out
    pub dropped: u64,
}

/// Sends requests to a server, one at a time, tolerating lost replies.
///
/// # Lazy retry
///
/// The underlying request socket requires a strict send-receive
/// alternation. Once a request times out the socket still waits for its
/// reply and refuses to send anything else, so the only way to retry is to
/// throw the socket away and connect a fresh one.
pub struct Client {
    endpoint: Endpoint,
    /// Routing identity announced to the server
    identity: String,
    /// Whether the client created the context itself and is responsible for
    /// terminating it
    owns_context: bool,
    stats: ClientStats,
}

impl Client {
    /// Creates a new client. If no context is provided the client creates
    /// and manages its own.
    pub fn new(addr: &str, name: &str, ctx: Option<Context>) -> Result<Client> {
        let config = ClientConfig {
            addr: addr.to_string(),
            name: name.to_string(),
            ..Default::default()
        };
        Self::new_with_config(&config, ctx)
    }

    pub fn new_with_config(config: &ClientConfig, ctx: Option<Context>) -> Result<Client> {
        let owns_context = ctx.is_none();
        let ctx = ctx.unwrap_or_default();
        let endpoint =
            Endpoint::new(&config.addr, &config.name, ctx)?.with_encoding(config.encoding);
        Ok(Client {
            endpoint,
            identity: String::new(),
            owns_context,
            stats: ClientStats::default(),
        })
    }

    pub fn name(&self) -> &str {
        self.endpoint.name()
    }

    pub fn addr(&self) -> &str {
        self.endpoint.addr()
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn stats(&self) -> ClientStats {
        self.stats
    }

    pub fn endpoint_stats(&self) -> Stats {
        self.endpoint.stats()
    }

    /// Id of the socket handle currently in use.
    pub fn handle_id(&self) -> Option<u64> {
        self.endpoint.handle_id()
    }

    /// Connects to the remote peer using a fresh identity.
    pub fn connect(&mut self) -> Result<()> {
        self.identity = next_identity(self.endpoint.name());
        self.endpoint
            .connect_as(SocketType::Req, Some(&self.identity))?;
        info!("connected to {} as {}", self.endpoint.addr(), self.identity);
        Ok(())
    }

    /// Closes the socket and connects again.
    pub fn reset(&mut self) -> Result<()> {
        self.endpoint.close()?;
        self.stats.reconnects += 1;
        self.connect()
    }

    /// Sends a message to the remote peer and waits for the reply, retrying
    /// up to `retries` times with `timeout` applied to every attempt.
    ///
    /// Returns the reply if one arrived. If the peer stays silent for all
    /// the attempts the message is dropped, the connection is reset and
    /// `None` is returned; that's not considered an error.
    ///
    /// A retry budget of zero is treated as a single attempt.
    pub fn send(&mut self, text: &str, retries: u32, timeout: Duration) -> Result<Option<Message>> {
        let mut retries = retries.max(1);
        self.transmit(text)?;

        loop {
            if self.endpoint.poll(timeout)? {
                let reply = self.endpoint.receive()?;
                self.stats.replies += 1;
                info!("received: {}", reply);
                return Ok(Some(reply));
            }

            retries -= 1;
            if retries == 0 {
                warn!(
                    "connection to {} is offline, message dropped",
                    self.endpoint.addr()
                );
                self.stats.dropped += 1;
                self.reset()?;
                return Ok(None);
            }

            warn!("no response from server, retrying send");
            // the old socket still owes a reply, it can't send again
            self.reset()?;
            self.transmit(text)?;
        }
    }

    fn transmit(&mut self, text: &str) -> Result<()> {
        self.endpoint.send(text)?;
        self.stats.attempts += 1;
        Ok(())
    }

    /// Closes the connection, discarding anything still in flight.
    pub fn close(&mut self) -> Result<()> {
        self.endpoint.close()
    }

    /// Closes the connection and, if the client owns its context,
    /// terminates it.
    pub fn shutdown(&mut self) -> Result<()> {
        if self.owns_context {
            self.endpoint.shutdown()
        } else {
            self.endpoint.close()
        }
    }
}

static IDENTITY_SEQ: AtomicU64 = AtomicU64::new(0);
static IDENTITY_RNG: OnceLock<Mutex<StdRng>> = OnceLock::new();

fn identity_rng() -> &'static Mutex<StdRng> {
    IDENTITY_RNG.get_or_init(|| Mutex::new(StdRng::seed_from_u64(entropy_seed())))
}

/// Seed taken from the clock and the process id, so that two processes
/// started at the same moment still diverge.
fn entropy_seed() -> u64 {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);
    nanos ^ ((std::process::id() as u64) << 32)
}

/// Reseeds the generator used for client identities.
pub fn seed_identities(seed: u64) {
    let mut rng = identity_rng().lock().unwrap_or_else(|p| p.into_inner());
    *rng = StdRng::seed_from_u64(seed ^ ((std::process::id() as u64) << 32));
}

/// Generates a client identity.
///
/// The random part alone could repeat between clients created in parallel,
/// the sequence number makes identities unique within the process.
pub(crate) fn next_identity(name: &str) -> String {
    let suffix: u32 = {
        let mut rng = identity_rng().lock().unwrap_or_else(|p| p.into_inner());
        rng.gen_range(0, 0x10000)
    };
    let seq = IDENTITY_SEQ.fetch_add(1, Ordering::SeqCst);
    format!("{}-{:04X}-{}", name, suffix, seq)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::thread;

    #[test]
    fn identities_are_unique_across_threads() {
        let handles: Vec<_> = (0..8)
            .map(|_| thread::spawn(|| (0..100).map(|_| next_identity("c")).collect::<Vec<_>>()))
            .collect();
        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(seen.insert(id));
            }
        }
        assert_eq!(seen.len(), 800);
    }

    #[test]
    fn identity_carries_name() {
        let id = next_identity("bench");
        assert!(id.starts_with("bench-"));
        assert_eq!(id.split('-').count(), 3);
    }

    #[test]
    fn client_defaults_to_hostname() {
        let client = Client::new("localhost:4157", "", None).unwrap();
        assert!(!client.name().is_empty());
        assert_eq!(client.addr(), "tcp://localhost:4157");
    }

    #[test]
    fn config_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.retries, 3);
        assert_eq!(config.timeout, Duration::from_secs(5));
    }
}
