#![allow(dead_code)]

use std::{
    fs,
    net::SocketAddr,
    path::{Path, PathBuf},
    sync::Arc,
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use procwatch::{
    config::{ServerConfig, SupervisorOptions, WatchedCommand},
    error::ServerError,
    router::ResponseEnvelope,
    server::Server,
    shutdown::{ShutdownTrigger, shutdown_channel},
    supervisor::ProcessSupervisor,
};
use sysinfo::{Pid, ProcessStatus, ProcessesToUpdate, System};

pub fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name)
}

pub fn supervisor_options(working_dir: Option<&Path>) -> SupervisorOptions {
    SupervisorOptions {
        working_dir: working_dir.map(Path::to_path_buf),
        spawn_window: Duration::from_millis(300),
        shutdown_grace: Duration::from_secs(1),
    }
}

/// A server running on an ephemeral loopback port inside the test process.
pub struct TestServer {
    pub addr: SocketAddr,
    pub supervisor: Arc<ProcessSupervisor>,
    tls: bool,
    trigger: ShutdownTrigger,
    serving: Option<JoinHandle<Result<(), ServerError>>>,
    client: reqwest::blocking::Client,
}

impl TestServer {
    pub fn start(command: WatchedCommand, tls: bool) -> Self {
        Self::start_with(command, supervisor_options(None), tls)
    }

    pub fn start_with(command: WatchedCommand, options: SupervisorOptions, tls: bool) -> Self {
        let supervisor = Arc::new(ProcessSupervisor::new(command, options));

        let mut config = ServerConfig::new("127.0.0.1", 0);
        config.name = "Test".into();
        config.drain_timeout = Duration::from_secs(2);
        if tls {
            config = config.with_tls(fixture("test.crt"), fixture("test.key"));
        }

        let server = Server::bind(config, Arc::clone(&supervisor)).expect("failed to bind server");
        let addr = server.local_addr().expect("server has no local address");
        let (trigger, signal) = shutdown_channel();
        let serving = thread::spawn(move || server.serve(signal));

        let client = reqwest::blocking::Client::builder()
            .danger_accept_invalid_certs(true)
            .timeout(Duration::from_secs(10))
            .build()
            .expect("failed to build HTTP client");

        Self {
            addr,
            supervisor,
            tls,
            trigger,
            serving: Some(serving),
            client,
        }
    }

    pub fn url(&self, path: &str) -> String {
        let scheme = if self.tls { "https" } else { "http" };
        format!("{scheme}://{}{path}", self.addr)
    }

    pub fn get(&self, path: &str) -> reqwest::blocking::Response {
        self.client
            .get(self.url(path))
            .send()
            .unwrap_or_else(|err| panic!("GET {path} failed: {err}"))
    }

    pub fn post(&self, path: &str, body: &'static str) -> reqwest::blocking::Response {
        self.client
            .post(self.url(path))
            .body(body)
            .send()
            .unwrap_or_else(|err| panic!("POST {path} failed: {err}"))
    }

    pub fn envelope(&self, path: &str) -> ResponseEnvelope {
        let response = self.get(path);
        assert_eq!(response.status().as_u16(), 200, "GET {path}");
        response.json().expect("response body is not an envelope")
    }

    /// Fires the shutdown trigger and waits for `serve` to return.
    pub fn shutdown(mut self) -> Result<(), ServerError> {
        self.trigger.fire();
        self.serving
            .take()
            .expect("server already joined")
            .join()
            .expect("serve thread panicked")
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(serving) = self.serving.take() {
            self.trigger.fire();
            let _ = serving.join();
        }
    }
}

/// True while `pid` is in the process table and not a zombie.
pub fn is_process_alive(pid: u32) -> bool {
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::All, true);
    system.process(Pid::from_u32(pid)).is_some_and(|process| {
        !matches!(process.status(), ProcessStatus::Zombie | ProcessStatus::Dead)
    })
}

pub fn wait_for_process_exit(pid: u32, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if !is_process_alive(pid) {
            return true;
        }
        thread::sleep(Duration::from_millis(100));
    }
    !is_process_alive(pid)
}

pub fn wait_for_pid_file(path: &Path) -> u32 {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        if let Ok(content) = fs::read_to_string(path)
            && let Ok(pid) = content.trim().parse()
        {
            return pid;
        }

        if Instant::now() >= deadline {
            panic!("Timed out waiting for PID in {:?}", path);
        }

        thread::sleep(Duration::from_millis(50));
    }
}
