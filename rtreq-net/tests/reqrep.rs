mod common;

use std::thread;
use std::time::{Duration, Instant};

use common::*;
use rtreq_net::{
    decode, encode, Client, Context, Encoding, Endpoint, Error, Metrics, ServerMode,
    ServerState, SocketType,
};

#[test]
fn ping_gets_first_reply() {
    let (addr, handle, task) = start_server(server_config("alpha", ServerMode::Sync, 0));

    let mut client = Client::new(&addr, "tester", None).unwrap();
    client.connect().unwrap();
    let reply = client
        .send("ping", 3, Duration::from_secs(2))
        .unwrap()
        .expect("server should reply");
    assert_eq!(reply.payload(), "reply msg #1");
    assert_eq!(reply.sender(), "alpha");
    client.shutdown().unwrap();

    let mut server = stop_server(handle, task);
    server.shutdown(None).unwrap();
}

#[test]
fn replies_are_numbered_in_order() {
    let (addr, handle, task) = start_server(server_config("alpha", ServerMode::Sync, 0));

    let mut client = Client::new(&addr, "tester", None).unwrap();
    client.connect().unwrap();
    for n in 1..=5 {
        let reply = client
            .send(&format!("msg {}", n), 3, Duration::from_secs(2))
            .unwrap()
            .unwrap();
        assert_eq!(reply.payload(), format!("reply msg #{}", n));
    }
    assert_eq!(client.stats().replies, 5);
    assert_eq!(client.stats().reconnects, 0);
    assert_eq!(client.endpoint_stats().sent, 5);
    assert_eq!(client.endpoint_stats().received, 5);
    client.shutdown().unwrap();

    let mut server = stop_server(handle, task);
    assert_eq!(server.metrics().stats.received, 5);
    assert_eq!(server.metrics().stats.sent, 5);
    server.shutdown(None).unwrap();
}

#[test]
fn dead_server_drops_message_after_retries() {
    init_log();
    let addr = unused_addr();
    let mut client = Client::new(&addr, "tester", None).unwrap();
    client.connect().unwrap();
    let first_handle = client.handle_id().unwrap();

    let start = Instant::now();
    let reply = client.send("ping", 3, Duration::from_millis(200)).unwrap();
    let elapsed = start.elapsed();

    assert!(reply.is_none());
    assert!(elapsed >= Duration::from_millis(600), "{:?}", elapsed);
    let stats = client.stats();
    assert_eq!(stats.attempts, 3);
    assert_eq!(stats.reconnects, 3);
    assert_eq!(stats.dropped, 1);
    assert_eq!(stats.replies, 0);

    // every reconnect creates a brand new socket
    assert_ne!(client.handle_id().unwrap(), first_handle);
    // counters survive reconnects
    assert_eq!(client.endpoint_stats().sent, 3);

    // the client stays usable after dropping a message
    let reply = client.send("again", 1, Duration::from_millis(50)).unwrap();
    assert!(reply.is_none());
    assert_eq!(client.stats().attempts, 4);
    assert_eq!(client.endpoint_stats().sent, 4);
    client.shutdown().unwrap();
}

#[test]
fn lost_reply_is_retried_on_fresh_socket() {
    init_log();
    let ctx = zmq::Context::new();
    let router = ctx.socket(zmq::ROUTER).unwrap();
    router.set_rcvtimeo(5000).unwrap();
    router.set_linger(0).unwrap();
    router.bind("tcp://127.0.0.1:*").unwrap();
    let addr = router.get_last_endpoint().unwrap().unwrap();

    // swallows the first request and answers the second one
    let peer = thread::spawn(move || {
        let mut seen = Vec::new();
        for n in 0..2 {
            let mut parts = router.recv_multipart(0).unwrap();
            let (_, payload) = decode(&parts[2], &Encoding::Bincode).unwrap();
            seen.push((String::from_utf8(parts[0].clone()).unwrap(), payload));
            if n == 1 {
                parts[2] = encode("peer", "late reply", &Encoding::Bincode).unwrap();
                router.send_multipart(parts, 0).unwrap();
            }
        }
        seen
    });

    let mut client = Client::new(&addr, "tester", None).unwrap();
    client.connect().unwrap();
    let first_handle = client.handle_id().unwrap();
    let first_identity = client.identity().to_string();

    let reply = client
        .send("hello", 3, Duration::from_millis(300))
        .unwrap()
        .expect("second attempt should get a reply");
    assert_eq!(reply.payload(), "late reply");

    let stats = client.stats();
    assert_eq!(stats.attempts, 2);
    assert_eq!(stats.reconnects, 1);
    assert_eq!(stats.replies, 1);
    assert_eq!(stats.dropped, 0);
    assert_ne!(client.handle_id().unwrap(), first_handle);

    let seen = peer.join().unwrap();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0].0, first_identity);
    assert_eq!(seen[1].0, client.identity());
    assert_ne!(seen[0].0, seen[1].0);
    assert_eq!(seen[0].1, "hello");
    assert_eq!(seen[1].1, "hello");
    client.shutdown().unwrap();
}

#[test]
fn zero_retries_makes_one_attempt() {
    init_log();
    let mut client = Client::new(&unused_addr(), "tester", None).unwrap();
    client.connect().unwrap();
    let reply = client.send("ping", 0, Duration::from_millis(50)).unwrap();
    assert!(reply.is_none());
    assert_eq!(client.stats().attempts, 1);
    assert_eq!(client.stats().dropped, 1);
    client.shutdown().unwrap();
}

#[test]
fn send_before_connect_fails() {
    let mut client = Client::new("127.0.0.1:9", "tester", None).unwrap();
    match client.send("ping", 1, Duration::from_millis(10)) {
        Err(Error::NotInitialized) => (),
        other => panic!("unexpected result: {:?}", other.map(|r| r.is_some())),
    }
    client.shutdown().unwrap();
}

#[test]
fn malformed_request_gets_error_reply() {
    let (addr, handle, task) = start_server(server_config("alpha", ServerMode::Sync, 0));

    let ctx = zmq::Context::new();
    let sock = ctx.socket(zmq::REQ).unwrap();
    sock.set_rcvtimeo(2000).unwrap();
    sock.set_linger(0).unwrap();
    sock.connect(&addr).unwrap();
    sock.send(&b"\xff\xff\xff"[..], 0).unwrap();
    let bytes = sock.recv_bytes(0).unwrap();
    let (sender, payload) = decode(&bytes, &Encoding::Bincode).unwrap();
    assert_eq!(sender, "alpha");
    assert!(payload.starts_with("error"));
    drop(sock);

    // the server keeps serving afterwards
    let mut client = Client::new(&addr, "tester", None).unwrap();
    client.connect().unwrap();
    let reply = client
        .send("ping", 3, Duration::from_secs(2))
        .unwrap()
        .unwrap();
    assert_eq!(reply.payload(), "reply msg #2");
    client.shutdown().unwrap();

    let mut server = stop_server(handle, task);
    server.shutdown(None).unwrap();
}

#[test]
fn shutdown_is_idempotent_and_writes_metrics() {
    let (addr, handle, task) = start_server(server_config("alpha", ServerMode::Sync, 0));

    let mut client = Client::new(&addr, "tester", None).unwrap();
    client.connect().unwrap();
    for _ in 0..3 {
        client
            .send("ping", 3, Duration::from_secs(2))
            .unwrap()
            .unwrap();
    }
    client.shutdown().unwrap();

    let mut server = stop_server(handle, task);
    assert_eq!(server.state(), ServerState::Draining);

    let path = std::env::temp_dir().join(format!("rtreq-rep-metrics-{}.json", std::process::id()));
    server.shutdown(Some(&path)).unwrap();
    assert_eq!(server.state(), ServerState::Closed);
    server.shutdown(Some(&path)).unwrap();
    server.shutdown(None).unwrap();
    assert_eq!(server.state(), ServerState::Closed);

    let metrics: Metrics =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    std::fs::remove_file(&path).unwrap();
    assert_eq!(metrics.server, "alpha");
    assert_eq!(metrics.mode, "rep");
    assert_eq!(metrics.stats.received, 3);
    assert_eq!(metrics.stats.sent, 3);
}

#[test]
fn unwritable_metrics_path_still_closes_server() {
    let (addr, handle, task) = start_server(server_config("alpha", ServerMode::Sync, 0));

    let mut client = Client::new(&addr, "tester", None).unwrap();
    client.connect().unwrap();
    assert!(client.send("ping", 3, Duration::from_secs(2)).unwrap().is_some());
    client.shutdown().unwrap();

    // a directory can't be opened as the metrics file
    let dir = std::env::temp_dir();
    let mut server = stop_server(handle, task);
    server.shutdown(Some(&dir)).unwrap();
    assert_eq!(server.state(), ServerState::Closed);
    assert!(dir.is_dir());
    assert_eq!(server.metrics().stats.received, 1);
}

#[test]
fn shutdown_without_run() {
    init_log();
    let mut server = rtreq_net::new_server(server_config("idle", ServerMode::Sync, 0), None).unwrap();
    server.bind().unwrap();
    server.shutdown(None).unwrap();
    server.shutdown(None).unwrap();
    assert_eq!(server.state(), ServerState::Closed);
}

#[test]
fn terminated_context_rejects_new_sockets() {
    let ctx = Context::new();
    let mut endpoint = Endpoint::new("127.0.0.1:*", "alpha", ctx.clone()).unwrap();
    endpoint.bind(SocketType::Rep).unwrap();
    endpoint.shutdown().unwrap();
    assert!(endpoint.is_stopped());
    assert!(!endpoint.is_connected());
    assert!(ctx.is_terminated());
    // second shutdown is harmless
    endpoint.shutdown().unwrap();

    let mut other = Endpoint::new("127.0.0.1:*", "beta", ctx).unwrap();
    match other.bind(SocketType::Rep) {
        Err(Error::ContextTerminated) => (),
        Err(e) => panic!("unexpected error: {}", e),
        Ok(()) => panic!("bind should fail on a terminated context"),
    }
}

#[test]
fn endpoint_requires_socket() {
    let mut endpoint = Endpoint::new("localhost:4157", "alpha", Context::new()).unwrap();
    assert_eq!(endpoint.addr(), "tcp://localhost:4157");
    assert!(matches!(endpoint.send("ping"), Err(Error::NotInitialized)));
    assert!(matches!(endpoint.receive(), Err(Error::NotInitialized)));
    // closing without a socket does nothing
    endpoint.close().unwrap();
    assert_eq!(endpoint.stats().sent, 0);
}
