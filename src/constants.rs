//! Constants and configuration defaults for procwatch.
//!
//! This module centralizes the magic numbers and strings used by the listener,
//! the supervisor and the HTTP layer.

use std::time::Duration;

// ============================================================================
// Liveness Codes
// ============================================================================

/// Status code reported by `/status` while the watched process is running.
pub const STATUS_RUNNING: i32 = 0;

/// Status code reported by `/status` when no process is tracked.
pub const STATUS_ABSENT: i32 = -3;

// ============================================================================
// Process Management Timing
// ============================================================================

/// How long `start` waits before it considers a spawn confirmed.
/// A process exiting inside this window is reported as dying after spawn.
pub const SPAWN_CONFIRM_WINDOW: Duration = Duration::from_secs(1);

/// Upper bound on waiting for the reaper to observe a killed process during `stop`.
pub const KILL_VERIFY_TIMEOUT: Duration = Duration::from_secs(1);

/// Time the watched process group gets to exit after SIGTERM on server shutdown
/// before it is sent SIGKILL.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Interval between process group liveness checks.
pub const PROCESS_CHECK_INTERVAL: Duration = Duration::from_millis(50);

// ============================================================================
// Network Constants
// ============================================================================

/// Default host the API listens on.
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Default port the API listens on.
pub const DEFAULT_PORT: u16 = 8080;

/// Read/write timeout applied to every accepted connection.
pub const CONNECTION_IO_TIMEOUT: Duration = Duration::from_secs(30);

/// How long shutdown waits for in-flight connections after the accept loop returns.
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Timeout for the loopback connection used to wake a blocked `accept`.
pub const WAKE_CONNECT_TIMEOUT: Duration = Duration::from_millis(250);

/// Pause before retrying `accept` after descriptor or buffer exhaustion.
pub const ACCEPT_BACKOFF: Duration = Duration::from_millis(5);

// ============================================================================
// HTTP Constants
// ============================================================================

/// Maximum size of a request line plus headers.
pub const MAX_REQUEST_HEAD_BYTES: usize = 8 * 1024;

/// Maximum number of request headers accepted.
pub const MAX_REQUEST_HEADERS: usize = 64;

/// Largest request body that is read and discarded. Larger bodies get `413`.
pub const MAX_REQUEST_BODY_BYTES: u64 = 1024 * 1024;

/// Maximum length of a chunk-size or trailer line in a chunked body.
pub const MAX_CHUNK_LINE_BYTES: usize = 1024;

/// Content type of every envelope response.
pub const JSON_CONTENT_TYPE: &str = "application/json; charset=utf-8";

/// ALPN protocol advertised in TLS mode.
pub const ALPN_HTTP11: &[u8] = b"http/1.1";

// ============================================================================
// Defaults
// ============================================================================

/// Name attached to lifecycle log events when none is configured.
pub const DEFAULT_INSTANCE_NAME: &str = "Main";

/// Program watched when no command is given on the command line.
pub const DEFAULT_COMMAND: &str = "watch";

/// Arguments of the default watched program.
pub const DEFAULT_COMMAND_ARGS: &[&str] = &["ls", "-lah"];
