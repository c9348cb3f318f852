//! Socket layer: shared channel context, socket roles, address handling and
//! the encodings available for putting messages on the wire.

use std::fmt::{Display, Formatter};
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use serde_repr::*;

use crate::{Error, Result};

pub mod zmq;

pub use self::zmq::ZmqSocket;

/// Role of a socket in the messaging pattern.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum SocketType {
    /// Client side of a strict send-receive alternation
    Req,
    /// Server side of a strict receive-send alternation
    Rep,
    /// Client-facing broker socket, keeps routing envelopes on every frame
    Router,
    /// Worker-facing broker socket, fans frames out to connected peers
    Dealer,
}

impl Display for SocketType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Req => write!(f, "REQ"),
            Self::Rep => write!(f, "REP"),
            Self::Router => write!(f, "ROUTER"),
            Self::Dealer => write!(f, "DEALER"),
        }
    }
}

/// Process-wide channel context shared by every socket of one client or
/// server, including the sockets of its workers.
///
/// Cloning is cheap. Teardown happens through a single explicit
/// `terminate` call, after which no new sockets can be created. The
/// underlying ZeroMQ context is released once the last socket created from
/// it has been closed.
#[derive(Clone)]
pub struct Context {
    inner: Arc<Mutex<Option<::zmq::Context>>>,
}

impl Context {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Some(::zmq::Context::new()))),
        }
    }

    /// Creates a new raw socket of the given type.
    pub(crate) fn socket(&self, type_: SocketType) -> Result<::zmq::Socket> {
        let guard = self
            .inner
            .lock()
            .map_err(|e| Error::Other(format!("context lock poisoned: {}", e)))?;
        let ctx = guard.as_ref().ok_or(Error::ContextTerminated)?;
        let raw_type = match type_ {
            SocketType::Req => ::zmq::REQ,
            SocketType::Rep => ::zmq::REP,
            SocketType::Router => ::zmq::ROUTER,
            SocketType::Dealer => ::zmq::DEALER,
        };
        Ok(ctx.socket(raw_type)?)
    }

    /// Terminates the context. Only the first call has any effect.
    ///
    /// Returns `true` if this call was the one that terminated it.
    pub fn terminate(&self) -> bool {
        match self.inner.lock() {
            Ok(mut guard) => guard.take().is_some(),
            Err(poisoned) => poisoned.into_inner().take().is_some(),
        }
    }

    pub fn is_terminated(&self) -> bool {
        match self.inner.lock() {
            Ok(guard) => guard.is_none(),
            Err(_) => true,
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

/// Create a valid zmq endpoint, treating scheme-less addresses as tcp
/// targets.
pub fn normalize_addr(s: &str) -> Result<String> {
    let s = s.trim();
    if s.contains("://") {
        return Ok(s.to_string());
    }
    match s.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() && (port == "*" || port.parse::<u16>().is_ok()) => {
            Ok(format!("tcp://{}", s))
        }
        _ => Err(Error::InvalidAddress(s.to_string())),
    }
}

/// Format of the `Message` carried in every frame.
///
/// There is no negotiation, both ends of a connection have to be set up
/// with the same encoding. A frame in any other format is reported as
/// malformed.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Deserialize_repr, Serialize_repr)]
#[repr(u8)]
pub enum Encoding {
    /// Compact frames, the default
    Bincode,
    /// Requires the `msgpack_encoding` feature
    MsgPack,
    /// Human readable frames, requires the `json_encoding` feature
    Json,
}

impl Encoding {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Bincode => "bincode",
            Self::MsgPack => "msgpack",
            Self::Json => "json",
        }
    }
}

impl Default for Encoding {
    fn default() -> Self {
        Encoding::Bincode
    }
}

impl FromStr for Encoding {
    type Err = Error;
    fn from_str(s: &str) -> core::result::Result<Self, Error> {
        match s.to_lowercase().as_str() {
            "bincode" | "bin" => Ok(Self::Bincode),
            #[cfg(feature = "msgpack_encoding")]
            "msgpack" | "rmp" => Ok(Self::MsgPack),
            #[cfg(feature = "json_encoding")]
            "json" => Ok(Self::Json),
            _ => Err(Error::Other(format!(
                "unknown or disabled message encoding: {}",
                s
            ))),
        }
    }
}

impl Display for Encoding {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Packs serializable object to bytes based on selected encoding.
pub(crate) fn pack<S: Serialize>(obj: S, encoding: &Encoding) -> Result<Vec<u8>> {
    let packed: Vec<u8> = match encoding {
        Encoding::Bincode => bincode::serialize(&obj).map_err(|e| Error::Encode(e.to_string()))?,
        Encoding::MsgPack => {
            #[cfg(not(feature = "msgpack_encoding"))]
            return Err(Error::Encode(
                "msgpack_encoding crate feature is not enabled".to_string(),
            ));
            #[cfg(feature = "msgpack_encoding")]
            {
                let mut buf = Vec::new();
                obj.serialize(&mut rmp_serde::Serializer::new(&mut buf))
                    .map_err(|e| Error::Encode(e.to_string()))?;
                buf
            }
        }
        Encoding::Json => {
            #[cfg(not(feature = "json_encoding"))]
            return Err(Error::Encode(
                "json_encoding crate feature is not enabled".to_string(),
            ));
            #[cfg(feature = "json_encoding")]
            {
                serde_json::to_vec(&obj).map_err(|e| Error::Encode(e.to_string()))?
            }
        }
    };
    Ok(packed)
}

/// Unpacks object from bytes based on selected encoding.
pub fn unpack<'de, P: Deserialize<'de>>(bytes: &'de [u8], encoding: &Encoding) -> Result<P> {
    let unpacked = match encoding {
        Encoding::Bincode => {
            bincode::deserialize(bytes).map_err(|e| Error::MalformedMessage(e.to_string()))?
        }
        Encoding::MsgPack => {
            #[cfg(not(feature = "msgpack_encoding"))]
            return Err(Error::MalformedMessage(
                "msgpack_encoding crate feature is not enabled".to_string(),
            ));
            #[cfg(feature = "msgpack_encoding")]
            {
                let mut de = rmp_serde::Deserializer::new(bytes);
                Deserialize::deserialize(&mut de)
                    .map_err(|e: rmp_serde::decode::Error| Error::MalformedMessage(e.to_string()))?
            }
        }
        Encoding::Json => {
            #[cfg(not(feature = "json_encoding"))]
            return Err(Error::MalformedMessage(
                "json_encoding crate feature is not enabled".to_string(),
            ));
            #[cfg(feature = "json_encoding")]
            {
                serde_json::from_slice(bytes).map_err(|e| Error::MalformedMessage(e.to_string()))?
            }
        }
    };
    Ok(unpacked)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_adds_tcp_scheme() {
        assert_eq!(normalize_addr("localhost:4157").unwrap(), "tcp://localhost:4157");
        assert_eq!(normalize_addr("*:4157").unwrap(), "tcp://*:4157");
        assert_eq!(normalize_addr("127.0.0.1:*").unwrap(), "tcp://127.0.0.1:*");
    }

    #[test]
    fn normalize_keeps_existing_scheme() {
        assert_eq!(normalize_addr("inproc://workers").unwrap(), "inproc://workers");
        assert_eq!(
            normalize_addr("ipc:///tmp/workers.ipc").unwrap(),
            "ipc:///tmp/workers.ipc"
        );
    }

    #[test]
    fn normalize_rejects_missing_port() {
        assert!(normalize_addr("localhost").is_err());
        assert!(normalize_addr(":4157").is_err());
        assert!(normalize_addr("localhost:http").is_err());
    }

    #[test]
    fn context_terminates_once() {
        let ctx = Context::new();
        let clone = ctx.clone();
        assert!(!clone.is_terminated());
        assert!(ctx.terminate());
        assert!(!clone.terminate());
        assert!(clone.is_terminated());
        assert!(matches!(
            clone.socket(SocketType::Req),
            Err(Error::ContextTerminated)
        ));
    }

    #[test]
    fn encoding_from_str() {
        assert_eq!(Encoding::from_str("bin").unwrap(), Encoding::Bincode);
        assert_eq!(Encoding::from_str("BINCODE").unwrap(), Encoding::Bincode);
        let err = Encoding::from_str("yaml").unwrap_err();
        assert!(err.to_string().ends_with("unknown or disabled message encoding: yaml"));
    }

    #[cfg(not(feature = "json_encoding"))]
    #[test]
    fn disabled_encoding_is_rejected() {
        assert!(Encoding::from_str("json").is_err());
        assert!(pack("hello", &Encoding::Json).is_err());
    }
}
