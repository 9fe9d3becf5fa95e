//! Command-line interface for procwatch.
use std::{path::PathBuf, str::FromStr};

use clap::Parser;
use tracing::level_filters::LevelFilter;

use crate::constants::{DEFAULT_HOST, DEFAULT_INSTANCE_NAME, DEFAULT_PORT};

/// Wrapper around `LevelFilter` so clap can parse log levels from either
/// string names ("info", "debug", etc.) or numeric shorthands (0-5).
#[derive(Clone, Copy, Debug)]
pub struct LogLevelArg(LevelFilter);

impl LogLevelArg {
    /// String representation suitable for `RUST_LOG`.
    pub fn as_str(&self) -> &'static str {
        match self.0 {
            LevelFilter::OFF => "off",
            LevelFilter::ERROR => "error",
            LevelFilter::WARN => "warn",
            LevelFilter::INFO => "info",
            LevelFilter::DEBUG => "debug",
            LevelFilter::TRACE => "trace",
        }
    }
}

impl FromStr for LogLevelArg {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err("log level cannot be empty".into());
        }

        if let Ok(number) = trimmed.parse::<u8>() {
            let level = match number {
                0 => LevelFilter::OFF,
                1 => LevelFilter::ERROR,
                2 => LevelFilter::WARN,
                3 => LevelFilter::INFO,
                4 => LevelFilter::DEBUG,
                5 => LevelFilter::TRACE,
                _ => {
                    return Err(format!(
                        "unsupported log level number '{number}' (expected 0-5)"
                    ));
                }
            };

            return Ok(LogLevelArg(level));
        }

        let lowercase = trimmed.to_ascii_lowercase();
        let level = match lowercase.as_str() {
            "off" => Some(LevelFilter::OFF),
            "error" | "err" => Some(LevelFilter::ERROR),
            "warn" | "warning" => Some(LevelFilter::WARN),
            "info" | "information" => Some(LevelFilter::INFO),
            "debug" => Some(LevelFilter::DEBUG),
            "trace" => Some(LevelFilter::TRACE),
            _ => None,
        }
        .ok_or_else(|| format!("invalid log level '{trimmed}'"))?;

        Ok(LogLevelArg(level))
    }
}

/// Command-line interface for procwatch.
#[derive(Parser, Debug)]
#[command(name = "procwatch", version, author)]
#[command(
    about = "Start, stop and query a single process through a small HTTP(S) API",
    long_about = None
)]
pub struct Cli {
    /// Override the logging verbosity for this invocation only.
    #[arg(long, value_name = "LEVEL")]
    pub log_level: Option<LogLevelArg>,

    /// Name attached to the server's log events.
    #[arg(long, env = "PROCWATCH_NAME", default_value = DEFAULT_INSTANCE_NAME)]
    pub name: String,

    /// Host to bind the API to.
    #[arg(long, env = "PROCWATCH_HOST", default_value = DEFAULT_HOST)]
    pub host: String,

    /// Port to bind the API to.
    #[arg(short, long, env = "PROCWATCH_PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// PEM certificate chain; enables HTTPS together with `--key`.
    #[arg(long, env = "PROCWATCH_CERT", requires = "key", value_name = "FILE")]
    pub cert: Option<PathBuf>,

    /// PEM private key matching `--cert`.
    #[arg(long, env = "PROCWATCH_KEY", requires = "cert", value_name = "FILE")]
    pub key: Option<PathBuf>,

    /// Working directory of the watched command.
    #[arg(long, env = "BASEDIR", default_value = ".", value_name = "DIR")]
    pub base_dir: PathBuf,

    /// A process exiting within this many milliseconds of spawning is reported as failed.
    #[arg(long, default_value_t = 1000, value_name = "MS")]
    pub spawn_window_ms: u64,

    /// Milliseconds between SIGTERM and SIGKILL for the watched group on shutdown.
    #[arg(long, default_value_t = 2000, value_name = "MS")]
    pub shutdown_grace_ms: u64,

    /// Milliseconds to wait for in-flight requests on shutdown.
    #[arg(long, default_value_t = 5000, value_name = "MS")]
    pub drain_timeout_ms: u64,

    /// Command to watch, followed by its arguments. Defaults to `watch ls -lah`.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, value_name = "COMMAND")]
    pub command: Vec<String>,
}

/// Parses command-line arguments and returns a `Cli` struct.
pub fn parse_args() -> Cli {
    Cli::parse()
}
