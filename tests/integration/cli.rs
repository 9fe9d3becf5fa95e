#[path = "common/mod.rs"]
mod common;

use std::{
    net::{TcpListener, TcpStream},
    process::{Command as StdCommand, Stdio},
    thread,
    time::{Duration, Instant},
};

use assert_cmd::Command;
use nix::{
    sys::signal::{self, Signal},
    unistd::Pid,
};
use predicates::str::contains;
use tempfile::tempdir;

fn procwatch() -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("procwatch"));
    cmd.env_remove("BASEDIR")
        .env_remove("PROCWATCH_CERT")
        .env_remove("PROCWATCH_KEY")
        .timeout(Duration::from_secs(10));
    cmd
}

fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .and_then(|listener| listener.local_addr())
        .map(|addr| addr.port())
        .expect("failed to reserve a port")
}

#[test]
fn help_lists_server_options() {
    procwatch()
        .arg("--help")
        .assert()
        .success()
        .stdout(contains("--port"))
        .stdout(contains("--cert"))
        .stdout(contains("--base-dir"));
}

#[test]
fn unreadable_certificate_exits_with_status_two() {
    procwatch()
        .args(["--host", "127.0.0.1", "--port", "0"])
        .args(["--cert", "/nonexistent/server.crt", "--key", "/nonexistent/server.key"])
        .assert()
        .code(2)
        .stdout(contains("Error loading certificates"));
}

#[test]
fn occupied_port_exits_with_status_two() {
    let taken = TcpListener::bind("127.0.0.1:0").expect("failed to bind");
    let port = taken.local_addr().unwrap().port().to_string();

    procwatch()
        .args(["--host", "127.0.0.1", "--port", port.as_str()])
        .assert()
        .code(2)
        .stdout(contains("Failed to bind"));
}

#[test]
fn cert_without_key_is_a_usage_error() {
    procwatch()
        .args(["--cert", "server.crt"])
        .assert()
        .failure()
        .stderr(contains("--key"));
}

#[test]
fn interrupt_shuts_binary_down() {
    let temp = tempdir().expect("failed to create tempdir");
    let port = free_port();
    let mut child = StdCommand::new(assert_cmd::cargo::cargo_bin!("procwatch"))
        .args(["--host", "127.0.0.1", "--port", &port.to_string()])
        .args(["--cert", common::fixture("test.crt").to_str().unwrap()])
        .args(["--key", common::fixture("test.key").to_str().unwrap()])
        .args(["--base-dir", temp.path().to_str().unwrap()])
        .args(["--", "sh", "-c", "echo $$ > watched.pid; exec sleep 30"])
        .env_remove("BASEDIR")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("failed to launch procwatch");

    let addr = format!("127.0.0.1:{port}").parse().unwrap();
    let deadline = Instant::now() + Duration::from_secs(10);
    while TcpStream::connect_timeout(&addr, Duration::from_millis(100)).is_err() {
        assert!(Instant::now() < deadline, "procwatch never started listening");
        thread::sleep(Duration::from_millis(50));
    }

    let client = reqwest::blocking::Client::builder()
        .danger_accept_invalid_certs(true)
        .build()
        .unwrap();
    let body: serde_json::Value = client
        .get(format!("https://127.0.0.1:{port}/run"))
        .send()
        .unwrap()
        .json()
        .unwrap();
    assert_eq!(body["ok"], true);
    let watched = common::wait_for_pid_file(&temp.path().join("watched.pid"));
    assert!(common::is_process_alive(watched));

    signal::kill(Pid::from_raw(child.id() as i32), Signal::SIGINT).unwrap();

    let deadline = Instant::now() + Duration::from_secs(10);
    let status = loop {
        if let Some(status) = child.try_wait().unwrap() {
            break status;
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            panic!("procwatch did not exit after SIGINT");
        }
        thread::sleep(Duration::from_millis(50));
    };
    assert!(status.success(), "{status:?}");
    assert!(TcpStream::connect_timeout(&addr, Duration::from_millis(200)).is_err());
    assert!(
        common::wait_for_process_exit(watched, Duration::from_secs(5)),
        "watched process {watched} survived shutdown"
    );
}
