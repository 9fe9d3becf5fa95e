//! Error handling for procwatch.
use std::{io, path::PathBuf};

use thiserror::Error;

/// Outcomes of supervisor operations that are reported back to API callers.
///
/// The `Display` text of each variant is exactly what ends up in the `error`
/// field of the response envelope.
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// The watched executable could not be launched.
    #[error("Unable to launch process '{command}': {source}")]
    SpawnFailure {
        /// Rendered command line of the watched process.
        command: String,
        /// The underlying error that occurred.
        #[source]
        source: io::Error,
    },

    /// The process was spawned but exited inside the confirmation window.
    #[error("Process died after spawn, check logs")]
    EarlyExit {
        /// Exit code, when the process terminated normally.
        code: Option<i32>,
        /// Signal number, when the process was killed by a signal.
        signal: Option<i32>,
    },

    /// There is no tracked process to act on.
    #[error("Process does not exist")]
    NotRunning,

    /// The OS still reports the process alive after the kill sequence.
    #[error("Failed to kill process")]
    TerminationFailure {
        /// PID that survived the kill attempt.
        pid: u32,
    },

    /// Error for poisoned mutex.
    #[error("Mutex is poisoned: {0}")]
    MutexPoisonError(String),
}

/// Implement the `From` trait to convert a `std::sync::PoisonError` into a `SupervisorError`.
impl<T> From<std::sync::PoisonError<T>> for SupervisorError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        SupervisorError::MutexPoisonError(err.to_string())
    }
}

/// Startup and serving failures. All of these end the server process.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The TLS certificate or key could not be loaded.
    #[error("Error loading certificates from {path:?}: {reason}")]
    CertificateLoad {
        /// File that failed to load.
        path: PathBuf,
        /// Human-readable description of the failure.
        reason: String,
    },

    /// The listener could not acquire the requested address.
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        /// Address that was requested.
        addr: String,
        /// The underlying error that occurred.
        #[source]
        source: io::Error,
    },

    /// A process is already being watched, so serving is refused.
    #[error("There is a process being watched, you must stop it first")]
    DoubleSupervision,

    /// The accept loop hit a non-recoverable listener error.
    #[error("Listener failed: {0}")]
    Accept(#[source] io::Error),

    /// The accept loop thread panicked.
    #[error("Accept loop terminated abnormally")]
    AcceptLoopPanicked,

    /// Generic I/O failure while setting up the server.
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl ServerError {
    /// Process exit status used by the binary when this error ends the server.
    pub fn exit_code(&self) -> i32 {
        match self {
            ServerError::DoubleSupervision => 1,
            ServerError::CertificateLoad { .. } | ServerError::Bind { .. } => 2,
            ServerError::Accept(_) | ServerError::AcceptLoopPanicked | ServerError::Io(_) => {
                3
            }
        }
    }
}

/// Error type for HTTP request parsing.
#[derive(Debug, Error)]
pub enum HttpError {
    /// Reading from the connection failed.
    #[error("connection I/O failed: {0}")]
    Io(#[from] io::Error),

    /// The request head could not be parsed.
    #[error("invalid request head: {0}")]
    Parse(#[from] httparse::Error),

    /// The request is syntactically valid but its framing is unusable.
    #[error("malformed request: {0}")]
    Malformed(String),

    /// The request head exceeded the size limit.
    #[error("request head exceeds {0} bytes")]
    HeadTooLarge(usize),

    /// The request body exceeded the size limit.
    #[error("request body exceeds {0} bytes")]
    BodyTooLarge(u64),
}
