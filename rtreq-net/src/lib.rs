//! This library provides a reliable request-reply messaging layer built on
//! top of ZeroMQ.
//!
//! Clients send text requests to servers and wait for replies, one at a
//! time. Lost replies and dead peers are tolerated: a client that doesn't
//! hear back within the configured timeout tears its connection down,
//! reconnects and sends the request again, giving up after a fixed number
//! of attempts.
//!
//!
//! # Servers
//!
//! Two server variants are available, both implementing the common
//! `Server` interface.
//!
//! `RepServer` binds a single REP socket and answers requests strictly one
//! at a time. It's the simplest possible responder and a good baseline.
//!
//! `RouterServer` binds a ROUTER socket facing the clients and a DEALER
//! socket on an internal address, and runs a proxy between the two. A
//! fixed pool of `Worker`s connects to the internal address, so that
//! requests from many clients can be handled concurrently while each reply
//! still finds its way back to the client that asked.
//!
//!
//! # Channel context
//!
//! All sockets are created from a `Context`. It's cheap to clone and meant
//! to be shared, for example between a server and its workers. It must be
//! terminated exactly once by whoever created it; any attempt to create a
//! socket afterwards fails.
//!
//!
//! # Messages
//!
//! Every frame carries a single `Message` made up of the sender's name and
//! a text payload. Messages are encoded with `bincode` by default, other
//! encodings can be enabled with crate features:
//!
//! ```toml
//! rtreq-net = { version = "*", features = ["msgpack_encoding"] }
//! ```

#![allow(unused)]

#[macro_use]
extern crate serde;
#[macro_use]
extern crate log;

pub mod msg;

mod bench;
mod client;
mod endpoint;
mod error;
mod metrics;
mod server;
mod socket;
mod util;
mod worker;

pub use bench::{BenchConfig, Benchmark};
pub use client::{seed_identities, Client, ClientConfig, ClientStats, DEFAULT_CLIENT_ADDR};
pub use endpoint::{Endpoint, Stats};
pub use metrics::{BenchResults, Metrics, WorkerStats};
pub use msg::{decode, encode, Message};
pub use server::{
    new_server, RepServer, RouteStats, RouterServer, Server, ServerConfig, ServerHandle,
    ServerMode, ServerState, DEFAULT_SERVER_ADDR, DEFAULT_WORKERS, WORKERS_ADDR,
};
pub use socket::{normalize_addr, Context, Encoding, SocketType};
pub use worker::Worker;

pub use error::{Error, Result};
