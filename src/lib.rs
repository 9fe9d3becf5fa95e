//! Procwatch supervises a single external command behind a small HTTP(S) control
//! API. Callers start the command with `/run`, terminate its whole process group
//! with `/stop` and probe it with `/status`; an interrupt tears down the watched
//! process group before the server exits.

/// CLI interface.
pub mod cli;

/// Configuration management.
pub mod config;

/// Shared constants.
pub mod constants;

/// Error handling.
pub mod error;

/// HTTP/1.1 request and response framing.
pub mod http;

/// Listener that can be stopped from another thread.
pub mod listener;

/// Control API routing.
pub mod router;

/// Server lifecycle: bind, serve, shutdown.
pub mod server;

/// Shutdown token shared by the signal handler and the server.
pub mod shutdown;

/// Watched process supervisor.
pub mod supervisor;

/// TLS certificate loading.
pub mod tls;

#[cfg(test)]
mod test_utils;
