use thiserror::Error;

pub type Result<T> = core::result::Result<T, Error>;

/// Enumeration of errors that may occur during network operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("could not connect to {addr}: {source}")]
    Connection { addr: String, source: zmq::Error },
    #[error("invalid address: {0}")]
    InvalidAddress(String),
    #[error("socket is not initialized")]
    NotInitialized,
    #[error("channel context already terminated")]
    ContextTerminated,

    #[error("malformed message: {0}")]
    MalformedMessage(String),
    #[error("failed encoding message: {0}")]
    Encode(String),

    #[error("send failed: {0}")]
    Send(zmq::Error),
    #[error("receive failed: {0}")]
    Recv(zmq::Error),

    #[error("proxy interrupted: {0}")]
    ProxyInterrupted(zmq::Error),
    #[error("worker {name} failed after {handled} requests: {reason}")]
    WorkerFailed {
        name: String,
        handled: u64,
        reason: String,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serde_json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("zmq error: {0}")]
    Zmq(#[from] zmq::Error),

    #[error("other: {0}")]
    Other(String),
}

impl Error {
    /// Checks whether the error was caused by the channel context going away,
    /// which is expected while shutting down.
    pub fn is_term(&self) -> bool {
        match self {
            Error::ContextTerminated => true,
            Error::Recv(e) | Error::Send(e) | Error::Zmq(e) | Error::ProxyInterrupted(e) => {
                *e == zmq::Error::ETERM
            }
            _ => false,
        }
    }
}
