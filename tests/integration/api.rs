#[path = "common/mod.rs"]
mod common;

use std::{
    io::{Read, Write},
    net::TcpStream,
};

use common::TestServer;
use procwatch::{config::WatchedCommand, router::ResponseEnvelope};

fn sleeper() -> WatchedCommand {
    WatchedCommand::new("sleep", ["30"])
}

fn run_literal_flow(server: &TestServer) {
    let ok = ResponseEnvelope::success("");

    assert_eq!(server.envelope("/run"), ok);
    let first_pid = server.supervisor.pid().expect("process should be tracked");

    assert_eq!(server.envelope("/run"), ok);
    assert_eq!(server.supervisor.pid(), Some(first_pid), "second run must not respawn");

    assert_eq!(server.envelope("/status"), ResponseEnvelope::success("0"));
    assert_eq!(server.envelope("/stop"), ok);
    assert!(common::wait_for_process_exit(
        first_pid,
        std::time::Duration::from_secs(5)
    ));

    assert_eq!(
        server.envelope("/stop"),
        ResponseEnvelope::failure("Process does not exist")
    );
    assert_eq!(server.envelope("/status"), ResponseEnvelope::success("-3"));

    assert_eq!(server.envelope("/run"), ok);
    assert_ne!(server.supervisor.pid(), Some(first_pid));
    assert_eq!(server.envelope("/status"), ResponseEnvelope::success("0"));
}

#[test]
fn control_flow_over_http() {
    let server = TestServer::start(sleeper(), false);
    run_literal_flow(&server);
    server.shutdown().expect("server failed");
}

#[test]
fn control_flow_over_https() {
    let server = TestServer::start(sleeper(), true);
    run_literal_flow(&server);
    server.shutdown().expect("server failed");
}

#[test]
fn unknown_path_is_not_found_in_both_modes() {
    for tls in [false, true] {
        let server = TestServer::start(sleeper(), tls);

        let response = server.get("/petofijo");
        assert_eq!(response.status().as_u16(), 404, "tls={tls}");
        assert_eq!(response.text().unwrap(), "");

        let response = server.get("/status?verbose=1");
        assert_eq!(response.status().as_u16(), 404, "tls={tls}");

        server.shutdown().expect("server failed");
    }
}

#[test]
fn recognized_paths_carry_cors_and_json_headers() {
    let server = TestServer::start(sleeper(), false);
    let response = server.get("/status");

    let headers = response.headers();
    assert_eq!(headers["access-control-allow-origin"], "*");
    assert_eq!(headers["content-type"], "application/json; charset=utf-8");

    let body: serde_json::Value = response.json().unwrap();
    assert_eq!(body, serde_json::json!({ "ok": true, "result": "-3", "error": "" }));
}

#[test]
fn any_method_is_accepted() {
    let server = TestServer::start(sleeper(), false);

    let response = server.post("/run", "ignored body");
    assert_eq!(response.status().as_u16(), 200);
    let envelope: ResponseEnvelope = response.json().unwrap();
    assert!(envelope.ok);

    assert_eq!(server.envelope("/status").result, "0");
}

#[test]
fn spawn_failure_is_reported_and_server_keeps_serving() {
    let server = TestServer::start(
        WatchedCommand::new("/nonexistent/procwatch-test-binary", Vec::<String>::new()),
        false,
    );

    let envelope = server.envelope("/run");
    assert!(!envelope.ok);
    assert_eq!(envelope.result, "");
    assert!(
        envelope
            .error
            .starts_with("Unable to launch process '/nonexistent/procwatch-test-binary'"),
        "{}",
        envelope.error
    );

    assert_eq!(server.envelope("/status"), ResponseEnvelope::success("-3"));
}

#[test]
fn early_exit_is_reported() {
    let server = TestServer::start(WatchedCommand::new("sh", ["-c", "exit 4"]), false);

    assert_eq!(
        server.envelope("/run"),
        ResponseEnvelope::failure("Process died after spawn, check logs")
    );
    assert_eq!(server.envelope("/status").result, "-3");
}

/// Writes `head` and `body` on a raw socket and returns the full reply.
fn exchange(server: &TestServer, head: &str, body: &[u8]) -> String {
    let mut stream = TcpStream::connect(server.addr).expect("failed to connect");
    stream.write_all(head.as_bytes()).unwrap();
    stream.write_all(body).unwrap();

    let mut reply = String::new();
    stream
        .read_to_string(&mut reply)
        .expect("connection reset before the reply was read");
    reply
}

#[test]
fn large_request_body_still_gets_envelope() {
    let server = TestServer::start(sleeper(), false);
    let body = vec![b'x'; 200_000];

    let reply = exchange(
        &server,
        &format!("POST /status HTTP/1.1\r\nContent-Length: {}\r\n\r\n", body.len()),
        &body,
    );
    assert!(reply.starts_with("HTTP/1.1 200 OK\r\n"), "{reply}");
    assert!(reply.ends_with("{\"ok\":true,\"result\":\"-3\",\"error\":\"\"}\n"));
}

#[test]
fn chunked_request_body_still_gets_envelope() {
    let server = TestServer::start(sleeper(), false);

    let mut body = Vec::new();
    for _ in 0..50 {
        body.extend_from_slice(b"1000\r\n");
        body.extend(std::iter::repeat_n(b'c', 4096));
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(b"0\r\n\r\n");

    let reply = exchange(
        &server,
        "POST /status HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n",
        &body,
    );
    assert!(reply.starts_with("HTTP/1.1 200 OK\r\n"), "{reply}");
    assert!(reply.contains("\"result\":\"-3\""));
}

#[test]
fn oversized_request_body_is_refused() {
    let server = TestServer::start(sleeper(), false);

    let reply = exchange(
        &server,
        "POST /run HTTP/1.1\r\nContent-Length: 104857600\r\nExpect: 100-continue\r\n\r\n",
        b"",
    );
    assert!(reply.starts_with("HTTP/1.1 413 Payload Too Large\r\n"), "{reply}");
    assert_eq!(server.envelope("/status").result, "-3");
}
