//! Thin wrapper over a `rust-zmq` socket.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::socket::{Context, SocketType};

static NEXT_HANDLE_ID: AtomicU64 = AtomicU64::new(1);

/// Wrapper over a ZeroMQ socket.
///
/// Every wrapper gets a process-unique handle id, which makes it possible to
/// tell a freshly created socket apart from the one it replaced.
pub struct ZmqSocket {
    id: u64,
    type_: SocketType,
    endpoint: String,
    inner: zmq::Socket,
}

impl ZmqSocket {
    /// Creates a socket and connects it to the given endpoint.
    pub fn connect(ctx: &Context, type_: SocketType, endpoint: &str) -> Result<Self> {
        Self::connect_with_identity(ctx, type_, endpoint, None)
    }

    /// Creates a socket, sets its routing identity if provided and connects
    /// it to the given endpoint.
    pub fn connect_with_identity(
        ctx: &Context,
        type_: SocketType,
        endpoint: &str,
        identity: Option<&str>,
    ) -> Result<Self> {
        let inner = ctx.socket(type_)?;
        if let Some(id) = identity {
            inner.set_identity(id.as_bytes())?;
        }
        inner.connect(endpoint).map_err(|e| Error::Connection {
            addr: endpoint.to_string(),
            source: e,
        })?;
        trace!("{} socket connected to {}", type_, endpoint);
        Ok(Self::wrap(inner, type_, endpoint))
    }

    /// Creates a socket and binds it to the given endpoint.
    pub fn bind(ctx: &Context, type_: SocketType, endpoint: &str) -> Result<Self> {
        let inner = ctx.socket(type_)?;
        inner.bind(endpoint).map_err(|e| Error::Connection {
            addr: endpoint.to_string(),
            source: e,
        })?;
        trace!("{} socket bound to {}", type_, endpoint);
        Ok(Self::wrap(inner, type_, endpoint))
    }

    fn wrap(inner: zmq::Socket, type_: SocketType, endpoint: &str) -> Self {
        Self {
            id: NEXT_HANDLE_ID.fetch_add(1, Ordering::SeqCst),
            type_,
            endpoint: endpoint.to_string(),
            inner,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn type_(&self) -> SocketType {
        self.type_
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Endpoint the socket was actually bound to, with any wildcard port
    /// resolved.
    pub fn last_endpoint(&self) -> Result<String> {
        match self.inner.get_last_endpoint()? {
            Ok(s) => Ok(s),
            Err(_) => Err(Error::Other("last endpoint is not valid utf8".to_string())),
        }
    }

    /// Puts a single frame on the socket without waiting for the peer.
    pub fn send_frame(&self, bytes: &[u8]) -> Result<()> {
        self.inner
            .send(bytes, zmq::DONTWAIT)
            .map_err(Error::Send)
    }

    /// Waits for the next frame, blocking until one is available.
    pub fn recv_frame(&self) -> Result<Vec<u8>> {
        self.inner.recv_bytes(0).map_err(Error::Recv)
    }

    /// Moves a whole multipart message, envelope included, to another
    /// socket. Returns the number of bytes moved, or `None` if the other
    /// side had no peer ready to take it and the message was dropped.
    pub fn forward_to(&self, other: &ZmqSocket) -> Result<Option<usize>> {
        let parts = self.inner.recv_multipart(0).map_err(Error::Recv)?;
        let size = parts.iter().map(|p| p.len()).sum();
        match other.inner.send_multipart(parts, zmq::DONTWAIT) {
            Ok(()) => Ok(Some(size)),
            Err(zmq::Error::EAGAIN) => Ok(None),
            Err(e) => Err(Error::Send(e)),
        }
    }

    /// Waits up to `timeout` for the socket to become readable.
    ///
    /// A poll cut short by a signal reports nothing ready, so that callers
    /// get back to checking their stop condition.
    pub fn poll_in(&self, timeout: Duration) -> Result<bool> {
        let ready = interruptible(self.inner.poll(zmq::POLLIN, timeout.as_millis() as i64))?;
        Ok(ready > 0)
    }

    /// Closes the socket, discarding anything that has not been delivered
    /// yet.
    pub fn close(self) -> Result<()> {
        self.inner.set_linger(0)?;
        trace!("closing {} socket {} ({})", self.type_, self.id, self.endpoint);
        drop(self.inner);
        Ok(())
    }
}

/// Waits up to `timeout` for either of the two sockets to become readable.
pub fn poll_pair(a: &ZmqSocket, b: &ZmqSocket, timeout: Duration) -> Result<(bool, bool)> {
    let mut items = [
        a.inner.as_poll_item(zmq::POLLIN),
        b.inner.as_poll_item(zmq::POLLIN),
    ];
    if interruptible(zmq::poll(&mut items, timeout.as_millis() as i64))? == 0 {
        return Ok((false, false));
    }
    Ok((items[0].is_readable(), items[1].is_readable()))
}

/// Treats an interrupted poll as one that timed out.
fn interruptible(result: zmq::Result<i32>) -> Result<i32> {
    match result {
        Ok(ready) => Ok(ready),
        Err(zmq::Error::EINTR) => {
            trace!("poll interrupted by a signal");
            Ok(0)
        }
        Err(e) => Err(Error::Recv(e)),
    }
}

#[test]
fn interrupted_poll_reports_nothing_ready() {
    assert_eq!(interruptible(Err(zmq::Error::EINTR)).unwrap(), 0);
    assert_eq!(interruptible(Ok(2)).unwrap(), 2);
    assert!(matches!(
        interruptible(Err(zmq::Error::ETERM)),
        Err(Error::Recv(zmq::Error::ETERM))
    ));
}
