//! Shutdown token passed into the serving routine.
//!
//! The OS signal handler (or a test) holds a [`ShutdownTrigger`]; the server
//! blocks on the matching [`ShutdownSignal`]. Nothing in the serving code knows
//! which signal, if any, caused the shutdown.

use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};

use tracing::debug;

/// Creates a connected trigger/signal pair.
pub fn shutdown_channel() -> (ShutdownTrigger, ShutdownSignal) {
    let (tx, rx) = mpsc::sync_channel(1);
    (
        ShutdownTrigger { tx: tx.clone() },
        ShutdownSignal { rx, tx },
    )
}

/// Requests shutdown. Cheap to clone and safe to fire any number of times.
#[derive(Clone, Debug)]
pub struct ShutdownTrigger {
    tx: SyncSender<()>,
}

impl ShutdownTrigger {
    pub fn fire(&self) {
        match self.tx.try_send(()) {
            Ok(()) => debug!("Shutdown requested"),
            // A request is already pending, or the server has finished.
            Err(TrySendError::Full(())) | Err(TrySendError::Disconnected(())) => {}
        }
    }
}

/// Receiving end observed by the single coordinating thread.
#[derive(Debug)]
pub struct ShutdownSignal {
    rx: Receiver<()>,
    tx: SyncSender<()>,
}

impl ShutdownSignal {
    /// Another trigger for the same signal, used by internal failure paths.
    pub fn trigger(&self) -> ShutdownTrigger {
        ShutdownTrigger {
            tx: self.tx.clone(),
        }
    }

    /// Blocks until a trigger fires.
    pub fn wait(self) {
        // The signal keeps its own sender alive, so `recv` only returns on a request.
        let _ = self.rx.recv();
    }
}
