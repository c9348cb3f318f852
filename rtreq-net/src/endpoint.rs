use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::msg::Message;
use crate::socket::{normalize_addr, zmq::poll_pair, Context, Encoding, SocketType, ZmqSocket};
use crate::{util, Error, Result};

/// Message counters collected by an endpoint.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Stats {
    /// Number of messages sent
    pub sent: u64,
    /// Number of messages received
    pub received: u64,
    /// Number of bytes sent
    pub bytes_sent: u64,
}

/// One side of a communication channel.
///
/// Owns a single socket handle exclusively. Clients, servers and workers
/// all talk to their peers through an endpoint; which role the socket plays
/// is decided when it's connected or bound.
///
/// # Counters
///
/// Counters live on the endpoint rather than on the socket handle, so they
/// keep growing across reconnects. `close` never resets them.
pub struct Endpoint {
    /// Name stamped on every outgoing message
    name: String,
    /// Normalized address of the peer or of the bind point
    addr: String,
    /// Shared channel context
    ctx: Context,
    /// Socket handle, none until connected or bound
    socket: Option<ZmqSocket>,
    /// Encoding used for all messages going through this endpoint
    encoding: Encoding,
    stats: Stats,
    stopped: bool,
}

impl Endpoint {
    /// Creates a new endpoint. An empty name is replaced with the name of
    /// the host.
    pub fn new(addr: &str, name: &str, ctx: Context) -> Result<Self> {
        let name = match name {
            "" => util::hostname(),
            n => n.to_string(),
        };
        Ok(Self {
            name,
            addr: normalize_addr(addr)?,
            ctx,
            socket: None,
            encoding: Encoding::default(),
            stats: Stats::default(),
            stopped: false,
        })
    }

    pub fn with_encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = encoding;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    pub fn encoding(&self) -> &Encoding {
        &self.encoding
    }

    pub fn stats(&self) -> Stats {
        self.stats
    }

    pub fn is_connected(&self) -> bool {
        self.socket.is_some()
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Id of the current socket handle, if there is one.
    pub fn handle_id(&self) -> Option<u64> {
        self.socket.as_ref().map(|s| s.id())
    }

    /// Address the socket ended up bound to.
    pub fn bound_addr(&self) -> Result<String> {
        self.socket()?.last_endpoint()
    }

    /// Establishes the channel in a connecting role.
    pub fn connect(&mut self, type_: SocketType) -> Result<()> {
        self.connect_as(type_, None)
    }

    /// Establishes the channel in a connecting role, announcing the given
    /// routing identity to the peer.
    pub fn connect_as(&mut self, type_: SocketType, identity: Option<&str>) -> Result<()> {
        if self.socket.is_some() {
            return Err(Error::Other(format!("{} is already connected", self.name)));
        }
        let socket = ZmqSocket::connect_with_identity(&self.ctx, type_, &self.addr, identity)?;
        self.socket = Some(socket);
        Ok(())
    }

    /// Establishes the channel in a listening role.
    pub fn bind(&mut self, type_: SocketType) -> Result<()> {
        if self.socket.is_some() {
            return Err(Error::Other(format!("{} is already bound", self.name)));
        }
        let socket = ZmqSocket::bind(&self.ctx, type_, &self.addr)?;
        self.socket = Some(socket);
        Ok(())
    }

    fn socket(&self) -> Result<&ZmqSocket> {
        self.socket.as_ref().ok_or(Error::NotInitialized)
    }

    /// Encodes the payload into a message signed with this endpoint's name
    /// and puts it on the wire. Does not wait for the receiver.
    pub fn send(&mut self, payload: &str) -> Result<()> {
        let socket = self.socket.as_ref().ok_or(Error::NotInitialized)?;
        let bytes = Message::new(&self.name, payload).to_bytes(&self.encoding)?;
        socket.send_frame(&bytes)?;
        self.stats.sent += 1;
        self.stats.bytes_sent += bytes.len() as u64;
        Ok(())
    }

    /// Reads the next message, blocking until a whole frame is available.
    pub fn receive(&mut self) -> Result<Message> {
        let bytes = self.socket()?.recv_frame()?;
        self.stats.received += 1;
        Message::from_bytes(&bytes, &self.encoding)
    }

    /// Waits up to `timeout` for a message to become available.
    pub fn poll(&self, timeout: Duration) -> Result<bool> {
        self.socket()?.poll_in(timeout)
    }

    /// Waits up to `timeout` for either endpoint to have a frame waiting.
    pub(crate) fn poll_either(a: &Endpoint, b: &Endpoint, timeout: Duration) -> Result<(bool, bool)> {
        poll_pair(a.socket()?, b.socket()?, timeout)
    }

    /// Moves one raw multipart message from this endpoint to the other one
    /// without decoding it. Returns `false` if the other side had no peer
    /// to take it.
    pub(crate) fn forward_to(&mut self, other: &mut Endpoint) -> Result<bool> {
        let moved = self.socket()?.forward_to(other.socket()?)?;
        self.stats.received += 1;
        match moved {
            Some(bytes) => {
                other.stats.sent += 1;
                other.stats.bytes_sent += bytes as u64;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Closes the socket, discarding unsent data. Calling it on an endpoint
    /// without a socket does nothing.
    pub fn close(&mut self) -> Result<()> {
        match self.socket.take() {
            Some(socket) => socket.close(),
            None => Ok(()),
        }
    }

    /// Terminates the shared channel context.
    ///
    /// Meant as the final call of the process-level owner of the context;
    /// any later attempt to connect or bind using the same context fails.
    pub fn shutdown(&mut self) -> Result<()> {
        self.stopped = true;
        self.close()?;
        if !self.ctx.terminate() {
            debug!("context already terminated by another holder");
        }
        Ok(())
    }
}
