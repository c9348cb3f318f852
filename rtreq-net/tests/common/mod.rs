#![allow(dead_code)]

use std::net::TcpListener;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use rtreq_net::{new_server, Result, Server, ServerConfig, ServerHandle, ServerMode};
use simplelog::{Config, LevelFilter, TestLogger};

pub type ServerTask = JoinHandle<(Box<dyn Server>, Result<()>)>;

pub fn init_log() {
    let _ = TestLogger::init(LevelFilter::Debug, Config::default());
}

pub fn server_config(name: &str, mode: ServerMode, workers: usize) -> ServerConfig {
    ServerConfig {
        name: name.to_string(),
        addr: "127.0.0.1:*".to_string(),
        mode,
        workers,
        poll_interval: Duration::from_millis(20),
        metrics_path: None,
        ..Default::default()
    }
}

/// Binds the server on an ephemeral port and runs it on its own thread.
/// Returns the address clients should connect to.
pub fn start_server(config: ServerConfig) -> (String, ServerHandle, ServerTask) {
    init_log();
    let mut server = new_server(config, None).unwrap();
    server.bind().unwrap();
    let addr = server.bound_addr().unwrap();
    let handle = server.handle();
    let task = thread::spawn(move || {
        let result = server.run();
        (server, result)
    });
    (addr, handle, task)
}

/// Stops the server and waits for its serving loop to exit.
pub fn stop_server(handle: ServerHandle, task: ServerTask) -> Box<dyn Server> {
    handle.stop();
    let (server, result) = task.join().unwrap();
    result.unwrap();
    server
}

/// Address of a local port nobody listens on.
pub fn unused_addr() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    format!("127.0.0.1:{}", port)
}
