//! Network listener that can be stopped from outside a blocking accept loop.
//!
//! [`StoppableListener`] wraps any [`Accept`] implementation together with a
//! one-shot stop flag. Once [`StopHandle::stop`] has been called, every pending
//! and every future `accept` returns [`AcceptError::Stopped`] instead of a raw
//! OS error, which lets the serving thread tell a requested shutdown apart
//! from a real listener failure.

use std::{
    io,
    net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, TcpListener, TcpStream},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
};

use thiserror::Error;
use tracing::{debug, warn};

use crate::constants::{ACCEPT_BACKOFF, WAKE_CONNECT_TIMEOUT};

/// Outcome of a failed `accept`.
#[derive(Debug, Error)]
pub enum AcceptError {
    /// The listener was stopped; this is the expected way for an accept loop to end.
    #[error("Listener stopped")]
    Stopped,
    /// Any other listener failure.
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Capability shared by plain and stoppable listeners.
pub trait Accept: Send + Sync {
    /// Connection type yielded by `accept`.
    type Stream: Send;

    /// Blocks until a connection arrives.
    fn accept(&self) -> Result<(Self::Stream, SocketAddr), AcceptError>;

    /// Address the listener is bound to.
    fn local_addr(&self) -> io::Result<SocketAddr>;

    /// Wakes threads blocked in `accept`. Pending and later accepts may fail afterwards.
    fn interrupt(&self) -> io::Result<()>;
}

impl Accept for TcpListener {
    type Stream = TcpStream;

    fn accept(&self) -> Result<(TcpStream, SocketAddr), AcceptError> {
        TcpListener::accept(self).map_err(AcceptError::Io)
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        TcpListener::local_addr(self)
    }

    fn interrupt(&self) -> io::Result<()> {
        #[cfg(target_os = "linux")]
        {
            use std::os::unix::io::AsRawFd;

            // shutdown(2) on a listening socket fails every blocked accept(2) with EINVAL
            // and refuses new connections from then on.
            if unsafe { libc::shutdown(self.as_raw_fd(), libc::SHUT_RDWR) } == 0 {
                return Ok(());
            }
            let err = io::Error::last_os_error();
            debug!("shutdown on listening socket failed ({err}); using wake connection");
        }

        let target = wake_addr(TcpListener::local_addr(self)?);
        TcpStream::connect_timeout(&target, WAKE_CONNECT_TIMEOUT).map(drop)
    }
}

/// Maps a wildcard bind address to the loopback address of the same family.
fn wake_addr(bound: SocketAddr) -> SocketAddr {
    let ip = match bound.ip() {
        IpAddr::V4(ip) if ip.is_unspecified() => IpAddr::V4(Ipv4Addr::LOCALHOST),
        IpAddr::V6(ip) if ip.is_unspecified() => IpAddr::V6(Ipv6Addr::LOCALHOST),
        ip => ip,
    };
    SocketAddr::new(ip, bound.port())
}

/// Errors worth retrying without surfacing them to the accept loop.
fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::Interrupted
            | io::ErrorKind::TimedOut
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
    ) || needs_backoff(err)
}

fn needs_backoff(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock
        || matches!(
            err.raw_os_error(),
            Some(libc::EMFILE | libc::ENFILE | libc::ENOBUFS | libc::ENOMEM)
        )
}

/// Listener wrapper whose accept loop can be ended by [`StopHandle::stop`].
pub struct StoppableListener<L: Accept = TcpListener> {
    inner: Arc<L>,
    stopped: Arc<AtomicBool>,
}

impl StoppableListener<TcpListener> {
    /// Binds a TCP listener on `addr`.
    pub fn bind(addr: &str) -> io::Result<Self> {
        Ok(Self::new(TcpListener::bind(addr)?))
    }
}

impl<L: Accept> StoppableListener<L> {
    pub fn new(inner: L) -> Self {
        Self {
            inner: Arc::new(inner),
            stopped: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Returns a handle that can stop this listener from any thread.
    pub fn handle(&self) -> StopHandle<L> {
        StopHandle {
            inner: Arc::clone(&self.inner),
            stopped: Arc::clone(&self.stopped),
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }
}

impl<L: Accept> Accept for StoppableListener<L> {
    type Stream = L::Stream;

    fn accept(&self) -> Result<(L::Stream, SocketAddr), AcceptError> {
        loop {
            if self.is_stopped() {
                return Err(AcceptError::Stopped);
            }

            let outcome = self.inner.accept();

            // Whatever the inner listener produced, a fired stop signal wins.
            if self.is_stopped() {
                return Err(AcceptError::Stopped);
            }

            match outcome {
                Ok(conn) => return Ok(conn),
                Err(AcceptError::Io(err)) if is_transient(&err) => {
                    debug!("Transient accept error, retrying: {err}");
                    if needs_backoff(&err) {
                        thread::sleep(ACCEPT_BACKOFF);
                    }
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }

    fn interrupt(&self) -> io::Result<()> {
        self.handle().stop();
        Ok(())
    }
}

/// Cloneable handle used to stop a [`StoppableListener`].
pub struct StopHandle<L: Accept = TcpListener> {
    inner: Arc<L>,
    stopped: Arc<AtomicBool>,
}

impl<L: Accept> Clone for StopHandle<L> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            stopped: Arc::clone(&self.stopped),
        }
    }
}

impl<L: Accept> StopHandle<L> {
    /// Fires the stop signal and wakes blocked accepts.
    ///
    /// Returns `true` for the call that actually stopped the listener; any
    /// repeated or concurrent call is a no-op returning `false`.
    pub fn stop(&self) -> bool {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return false;
        }

        if let Err(err) = self.inner.interrupt() {
            warn!("Failed to interrupt listener: {err}");
        }
        true
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }
}
