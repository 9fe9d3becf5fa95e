//! Lifecycle owner for the single watched process.
//!
//! [`ProcessSupervisor`] spawns the configured command in its own process
//! group, tracks its PID and group id, and tears the whole group down on
//! `stop` or server shutdown. A dedicated reaper thread owns the `Child`
//! handle, so the process is waited on exactly once no matter which path ends
//! it, and an exit the supervisor did not ask for is noticed right away.

use std::{
    io::{self, BufRead, BufReader, Read},
    os::unix::process::{CommandExt, ExitStatusExt},
    process::{Child, Command, ExitStatus, Stdio},
    sync::{
        Arc, Condvar, Mutex, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use nix::{
    errno::Errno,
    sys::signal::{self, Signal},
    unistd::{self, Pid},
};
use tracing::{debug, error, info, warn};

use crate::{
    config::{SupervisorOptions, WatchedCommand},
    constants::{KILL_VERIFY_TIMEOUT, PROCESS_CHECK_INTERVAL, STATUS_ABSENT, STATUS_RUNNING},
    error::SupervisorError,
};

/// Liveness classification reported by `/status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Running,
    Absent,
}

impl Liveness {
    /// Numeric code used on the wire.
    pub const fn code(self) -> i32 {
        match self {
            Liveness::Running => STATUS_RUNNING,
            Liveness::Absent => STATUS_ABSENT,
        }
    }
}

/// Operations the HTTP layer needs from a process supervisor.
pub trait ProcessControl: Send + Sync {
    /// Starts the watched process unless it is already running.
    fn start(&self) -> Result<(), SupervisorError>;

    /// Terminates the watched process group.
    fn stop(&self) -> Result<(), SupervisorError>;

    /// Reports liveness without side effects.
    fn status(&self) -> Liveness;

    /// Shutdown path: terminates the group, escalating to SIGKILL after a grace period.
    fn terminate_all(&self);
}

/// How a watched process ended.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct ExitRecord {
    code: Option<i32>,
    signal: Option<i32>,
}

impl From<ExitStatus> for ExitRecord {
    fn from(status: ExitStatus) -> Self {
        Self {
            code: status.code(),
            signal: status.signal(),
        }
    }
}

/// One-shot exit notification shared by the reaper and whoever waits on it.
#[derive(Default)]
struct ExitWatch {
    record: Mutex<Option<ExitRecord>>,
    cond: Condvar,
}

impl ExitWatch {
    fn notify(&self, record: ExitRecord) {
        *self.record.lock().unwrap_or_else(PoisonError::into_inner) = Some(record);
        self.cond.notify_all();
    }

    /// Returns the exit record if the process ends within `timeout`.
    fn wait_timeout(&self, timeout: Duration) -> Option<ExitRecord> {
        let guard = self.record.lock().unwrap_or_else(PoisonError::into_inner);
        let (guard, _) = self
            .cond
            .wait_timeout_while(guard, timeout, |record| record.is_none())
            .unwrap_or_else(PoisonError::into_inner);
        *guard
    }
}

/// Identity of the running watched process.
struct TrackedProcess {
    pid: Pid,
    pgid: Pid,
    /// Distinguishes this spawn from earlier ones whose reapers may still be running.
    generation: u64,
    exit: Arc<ExitWatch>,
}

#[derive(Clone, Copy, Debug)]
enum OutputStream {
    Stdout,
    Stderr,
}

impl OutputStream {
    fn as_str(self) -> &'static str {
        match self {
            OutputStream::Stdout => "stdout",
            OutputStream::Stderr => "stderr",
        }
    }
}

/// Owns the lifecycle of exactly one external process.
pub struct ProcessSupervisor {
    command: WatchedCommand,
    options: SupervisorOptions,
    /// Serializes start/stop/terminate so only one of them mutates the record at a time.
    ops: Mutex<()>,
    /// Short-held lock around the record; `status` only ever takes this one.
    tracked: Arc<Mutex<Option<TrackedProcess>>>,
    generation: AtomicU64,
}

impl ProcessSupervisor {
    pub fn new(command: WatchedCommand, options: SupervisorOptions) -> Self {
        debug!("Initializing supervisor for `{command}`");
        Self {
            command,
            options,
            ops: Mutex::new(()),
            tracked: Arc::new(Mutex::new(None)),
            generation: AtomicU64::new(0),
        }
    }

    pub fn command(&self) -> &WatchedCommand {
        &self.command
    }

    /// PID of the watched process while it is tracked.
    pub fn pid(&self) -> Option<u32> {
        self.tracked
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|tracked| tracked.pid.as_raw() as u32)
    }

    /// Starts the watched process.
    ///
    /// Idempotent while a process is running. After a successful spawn the call
    /// blocks for the configured confirmation window and fails with
    /// [`SupervisorError::EarlyExit`] if the process ends inside it.
    pub fn start(&self) -> Result<(), SupervisorError> {
        let _op = self.ops.lock()?;

        if self.status() == Liveness::Running {
            debug!("Process `{}` already running; start is a no-op", self.command);
            return Ok(());
        }

        let mut child = self.spawn_child()?;
        let raw_pid = child.id();
        let pid = Pid::from_raw(raw_pid as i32);
        let pgid = unistd::getpgid(Some(pid)).unwrap_or(pid);

        if let Some(out) = child.stdout.take() {
            forward_output(out, raw_pid, OutputStream::Stdout);
        }
        if let Some(err) = child.stderr.take() {
            forward_output(err, raw_pid, OutputStream::Stderr);
        }

        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let exit = Arc::new(ExitWatch::default());
        *self.tracked.lock()? = Some(TrackedProcess {
            pid,
            pgid,
            generation,
            exit: Arc::clone(&exit),
        });

        if let Err(source) = self.spawn_reaper(child, generation, Arc::clone(&exit)) {
            error!("Failed to spawn reaper for pid {raw_pid}: {source}");
            self.tracked.lock()?.take();
            let _ = signal_group(pgid, Signal::SIGKILL);
            return Err(SupervisorError::SpawnFailure {
                command: self.command.to_string(),
                source,
            });
        }

        info!(pid = raw_pid, pgid = pgid.as_raw(), "Launched process `{}`", self.command);

        match exit.wait_timeout(self.options.spawn_window) {
            Some(record) => {
                error!(
                    pid = raw_pid,
                    code = ?record.code,
                    signal = ?record.signal,
                    "Process died after spawn, check logs"
                );
                Err(SupervisorError::EarlyExit {
                    code: record.code,
                    signal: record.signal,
                })
            }
            None => Ok(()),
        }
    }

    /// Terminates the watched process group and forgets the process.
    ///
    /// Termination is confirmed against the OS: either the reaper reports the
    /// exit within [`KILL_VERIFY_TIMEOUT`] or `kill(pid, 0)` no longer finds it.
    pub fn stop(&self) -> Result<(), SupervisorError> {
        self.stop_confirmed_by(|exit, pid| {
            exit.wait_timeout(KILL_VERIFY_TIMEOUT).is_some() || !is_alive(pid)
        })
    }

    fn stop_confirmed_by<F>(&self, confirm_gone: F) -> Result<(), SupervisorError>
    where
        F: FnOnce(&ExitWatch, Pid) -> bool,
    {
        let _op = self.ops.lock()?;

        let Some(tracked) = self.tracked.lock()?.take() else {
            debug!("Stop requested but no process is tracked");
            return Err(SupervisorError::NotRunning);
        };

        let pid = tracked.pid;
        info!(pid = pid.as_raw(), pgid = tracked.pgid.as_raw(), "Stopping watched process");

        if let Err(err) = signal_group(tracked.pgid, Signal::SIGTERM) {
            warn!("Failed to signal process group {}: {err}", tracked.pgid);
        }

        match signal::kill(pid, Signal::SIGKILL) {
            Ok(()) | Err(Errno::ESRCH) => {}
            Err(err) => warn!("Failed to kill pid {pid}: {err}"),
        }

        if confirm_gone(&tracked.exit, pid) {
            debug!("Process {pid} stopped");
            Ok(())
        } else {
            error!("Process {pid} still present after kill");
            Err(SupervisorError::TerminationFailure {
                pid: pid.as_raw() as u32,
            })
        }
    }

    /// Returns the current liveness without touching the process.
    pub fn status(&self) -> Liveness {
        let guard = self.tracked.lock().unwrap_or_else(PoisonError::into_inner);
        if guard.is_some() {
            Liveness::Running
        } else {
            Liveness::Absent
        }
    }

    /// Sends SIGTERM to the watched group, waits up to the shutdown grace period
    /// for every member to exit, then SIGKILLs whatever is left.
    pub fn terminate_all(&self) {
        let _op = self.ops.lock().unwrap_or_else(PoisonError::into_inner);

        let tracked = self
            .tracked
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(tracked) = tracked else {
            return;
        };

        let pgid = tracked.pgid;
        info!(pgid = pgid.as_raw(), "Terminating watched process group");
        if let Err(err) = signal_group(pgid, Signal::SIGTERM) {
            warn!("Failed to send SIGTERM to process group {pgid}: {err}");
        }

        let deadline = Instant::now() + self.options.shutdown_grace;
        while group_alive(pgid) && Instant::now() < deadline {
            thread::sleep(PROCESS_CHECK_INTERVAL);
        }

        if group_alive(pgid) {
            warn!("Process group {pgid} did not exit after SIGTERM; sending SIGKILL");
            if let Err(err) = signal_group(pgid, Signal::SIGKILL) {
                error!("Failed to kill process group {pgid}: {err}");
            }
        }

        tracked.exit.wait_timeout(KILL_VERIFY_TIMEOUT);
    }

    fn spawn_child(&self) -> Result<Child, SupervisorError> {
        let mut cmd = Command::new(self.command.program());
        cmd.args(self.command.args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        if let Some(dir) = &self.options.working_dir {
            cmd.current_dir(dir);
        }

        unsafe {
            cmd.pre_exec(|| {
                // Own process group, so the whole tree can be signalled without
                // touching the supervisor's group.
                if libc::setpgid(0, 0) < 0 {
                    return Err(io::Error::last_os_error());
                }
                Ok(())
            });
        }

        cmd.spawn().map_err(|source| {
            error!("Unable to launch process `{}`: {source}", self.command);
            SupervisorError::SpawnFailure {
                command: self.command.to_string(),
                source,
            }
        })
    }

    fn spawn_reaper(
        &self,
        mut child: Child,
        generation: u64,
        exit: Arc<ExitWatch>,
    ) -> io::Result<()> {
        let tracked = Arc::clone(&self.tracked);
        let pid = child.id();

        thread::Builder::new()
            .name(format!("reaper-{pid}"))
            .spawn(move || {
                let record = match child.wait() {
                    Ok(status) => ExitRecord::from(status),
                    Err(err) => {
                        warn!("Failed to wait on pid {pid}: {err}");
                        ExitRecord::default()
                    }
                };

                {
                    let mut guard = tracked.lock().unwrap_or_else(PoisonError::into_inner);
                    if guard
                        .as_ref()
                        .is_some_and(|current| current.generation == generation)
                    {
                        *guard = None;
                        info!(
                            pid,
                            code = ?record.code,
                            signal = ?record.signal,
                            "Watched process exited"
                        );
                    }
                }

                exit.notify(record);
            })
            .map(drop)
    }
}

impl ProcessControl for ProcessSupervisor {
    fn start(&self) -> Result<(), SupervisorError> {
        ProcessSupervisor::start(self)
    }

    fn stop(&self) -> Result<(), SupervisorError> {
        ProcessSupervisor::stop(self)
    }

    fn status(&self) -> Liveness {
        ProcessSupervisor::status(self)
    }

    fn terminate_all(&self) {
        ProcessSupervisor::terminate_all(self)
    }
}

impl Drop for ProcessSupervisor {
    fn drop(&mut self) {
        let tracked = self
            .tracked
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(tracked) = tracked {
            debug!("Supervisor dropped; killing process group {}", tracked.pgid);
            let _ = signal_group(tracked.pgid, Signal::SIGKILL);
        }
    }
}

/// Signals every member of `pgid`. A group that no longer exists is not an error.
fn signal_group(pgid: Pid, sig: Signal) -> Result<(), Errno> {
    if pgid == unistd::getpgrp() {
        warn!("Refusing to signal the supervisor's own process group {pgid}");
        return Ok(());
    }

    match signal::killpg(pgid, sig) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(err) => Err(err),
    }
}

fn group_alive(pgid: Pid) -> bool {
    !matches!(signal::killpg(pgid, None), Err(Errno::ESRCH))
}

fn is_alive(pid: Pid) -> bool {
    !matches!(signal::kill(pid, None), Err(Errno::ESRCH))
}

/// Copies a child's output stream into the log, one event per line.
fn forward_output<R: Read + Send + 'static>(reader: R, pid: u32, stream: OutputStream) {
    let spawned = thread::Builder::new()
        .name(format!("{}-{pid}", stream.as_str()))
        .spawn(move || {
            for line in BufReader::new(reader).lines().map_while(Result::ok) {
                match stream {
                    OutputStream::Stdout => {
                        info!(target: "procwatch::watched", pid, stream = "stdout", "{line}")
                    }
                    OutputStream::Stderr => {
                        warn!(target: "procwatch::watched", pid, stream = "stderr", "{line}")
                    }
                }
            }
        });

    if let Err(err) = spawned {
        warn!("Failed to forward {} of pid {pid}: {err}", stream.as_str());
    }
}
