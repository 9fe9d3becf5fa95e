//! Configuration management for procwatch.
use std::{fmt, path::PathBuf, time::Duration};

use crate::{
    cli::Cli,
    constants::{
        DEFAULT_COMMAND, DEFAULT_COMMAND_ARGS, DEFAULT_HOST, DEFAULT_INSTANCE_NAME,
        DEFAULT_PORT, DRAIN_TIMEOUT, SHUTDOWN_GRACE, SPAWN_CONFIRM_WINDOW,
    },
};

/// Executable and arguments of the watched process. Fixed once constructed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchedCommand {
    program: String,
    args: Vec<String>,
}

impl WatchedCommand {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Builds a command from a `[program, args...]` vector, falling back to the
    /// default watched command when the vector is empty.
    pub fn from_argv(argv: Vec<String>) -> Self {
        let mut parts = argv.into_iter();
        match parts.next() {
            Some(program) => Self::new(program, parts),
            None => Self::default(),
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }
}

impl Default for WatchedCommand {
    fn default() -> Self {
        Self::new(DEFAULT_COMMAND, DEFAULT_COMMAND_ARGS.iter().copied())
    }
}

impl fmt::Display for WatchedCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Tunables for the process supervisor.
#[derive(Debug, Clone)]
pub struct SupervisorOptions {
    /// Working directory of the watched process. Inherited when `None`.
    pub working_dir: Option<PathBuf>,
    /// Window in which an exiting process counts as dying right after spawn.
    pub spawn_window: Duration,
    /// Time the process group gets between SIGTERM and SIGKILL on shutdown.
    pub shutdown_grace: Duration,
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        Self {
            working_dir: None,
            spawn_window: SPAWN_CONFIRM_WINDOW,
            shutdown_grace: SHUTDOWN_GRACE,
        }
    }
}

/// Certificate chain and private key used in TLS mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsPaths {
    pub cert: PathBuf,
    pub key: PathBuf,
}

/// Settings for the HTTP(S) server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Name attached to lifecycle log events.
    pub name: String,
    /// Host to bind to.
    pub host: String,
    /// Port to listen on. `0` picks an ephemeral port.
    pub port: u16,
    /// Enables TLS termination when set.
    pub tls: Option<TlsPaths>,
    /// Upper bound on waiting for in-flight connections during shutdown.
    pub drain_timeout: Duration,
}

impl ServerConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    pub fn with_tls(mut self, cert: impl Into<PathBuf>, key: impl Into<PathBuf>) -> Self {
        self.tls = Some(TlsPaths {
            cert: cert.into(),
            key: key.into(),
        });
        self
    }

    /// Address string handed to the listener.
    pub fn bind_addr(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_INSTANCE_NAME.to_string(),
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            tls: None,
            drain_timeout: DRAIN_TIMEOUT,
        }
    }
}

/// Everything the binary needs, resolved from the command line and environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub command: WatchedCommand,
    pub supervisor: SupervisorOptions,
    pub server: ServerConfig,
}

impl Config {
    pub fn from_cli(cli: Cli) -> Self {
        let tls = match (cli.cert, cli.key) {
            (Some(cert), Some(key)) => Some(TlsPaths { cert, key }),
            _ => None,
        };

        Self {
            command: WatchedCommand::from_argv(cli.command),
            supervisor: SupervisorOptions {
                working_dir: Some(cli.base_dir),
                spawn_window: Duration::from_millis(cli.spawn_window_ms),
                shutdown_grace: Duration::from_millis(cli.shutdown_grace_ms),
            },
            server: ServerConfig {
                name: cli.name,
                host: cli.host,
                port: cli.port,
                tls,
                drain_timeout: Duration::from_millis(cli.drain_timeout_ms),
            },
        }
    }
}
