//! HTTP(S) lifecycle around the control router.
//!
//! [`Server::bind`] performs every fallible startup step (double-supervision
//! check, certificate loading, binding) before anything is served. [`Server::serve`]
//! then runs the accept loop on its own thread, one thread per connection, and
//! blocks the caller on the [`ShutdownSignal`]. Once the signal fires the watched
//! process group is terminated, the listener is stopped, the accept loop is
//! joined and in-flight connections get a bounded drain period.

use std::{
    io::{self, BufReader, Read, Write},
    net::{SocketAddr, TcpListener, TcpStream},
    sync::{Arc, Condvar, Mutex, PoisonError},
    thread,
    time::Duration,
};

use tracing::{debug, error, info, warn};

use crate::{
    config::ServerConfig,
    constants::CONNECTION_IO_TIMEOUT,
    error::{HttpError, ServerError},
    http::{CONTINUE, Request, Response},
    listener::{Accept, AcceptError, StoppableListener},
    router::Router,
    shutdown::{ShutdownSignal, ShutdownTrigger},
    supervisor::{Liveness, ProcessControl},
    tls,
};

/// Control API server bound to its address and ready to serve.
pub struct Server<C: ProcessControl + 'static> {
    config: ServerConfig,
    control: Arc<C>,
    listener: StoppableListener<TcpListener>,
    tls: Option<Arc<rustls::ServerConfig>>,
}

impl<C: ProcessControl + 'static> Server<C> {
    /// Runs the startup checks and binds the listener.
    pub fn bind(config: ServerConfig, control: Arc<C>) -> Result<Self, ServerError> {
        if control.status() == Liveness::Running {
            return Err(ServerError::DoubleSupervision);
        }

        let tls = match &config.tls {
            Some(paths) => {
                let loaded = tls::load_server_config(paths)?;
                debug!("Loaded TLS certificate from {:?}", paths.cert);
                Some(loaded)
            }
            None => None,
        };

        let addr = config.bind_addr();
        let listener =
            StoppableListener::bind(&addr).map_err(|source| ServerError::Bind { addr, source })?;

        Ok(Self {
            config,
            control,
            listener,
            tls,
        })
    }

    /// Address the listener ended up on. Useful when binding port `0`.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    pub fn is_tls(&self) -> bool {
        self.tls.is_some()
    }

    /// Serves until `shutdown` fires, then tears everything down in order.
    pub fn serve(self, shutdown: ShutdownSignal) -> Result<(), ServerError> {
        let Server {
            config,
            control,
            listener,
            tls,
        } = self;
        let name = config.name;
        let addr = listener.local_addr()?;
        let handle = listener.handle();
        let tracker = Arc::new(ConnectionTracker::default());

        info!(
            name = %name,
            %addr,
            tls = tls.is_some(),
            "Serving control API"
        );

        let accept_loop = {
            let router = Router::new(Arc::clone(&control));
            let tracker = Arc::clone(&tracker);
            let failed = shutdown.trigger();
            thread::Builder::new()
                .name("procwatch-accept".into())
                .spawn(move || run_accept_loop(listener, router, tls, tracker, failed))?
        };

        shutdown.wait();
        info!(name = %name, "Shutdown requested; terminating watched process group");
        control.terminate_all();

        handle.stop();
        let outcome = accept_loop
            .join()
            .unwrap_or(Err(ServerError::AcceptLoopPanicked));

        if !tracker.wait_idle(config.drain_timeout) {
            warn!(
                name = %name,
                in_flight = tracker.active(),
                "Drain timeout elapsed with connections still open"
            );
        }

        match &outcome {
            Ok(()) => info!(name = %name, "Server stopped gracefully"),
            Err(err) => error!(name = %name, "Server stopped after failure: {err}"),
        }
        outcome
    }
}

/// Accept loop body. Fires `failed` when it ends for any reason other than a stop.
fn run_accept_loop<C: ProcessControl + 'static>(
    listener: StoppableListener<TcpListener>,
    router: Router<C>,
    tls: Option<Arc<rustls::ServerConfig>>,
    tracker: Arc<ConnectionTracker>,
    failed: ShutdownTrigger,
) -> Result<(), ServerError> {
    loop {
        match listener.accept() {
            Ok((stream, peer)) => {
                let guard = tracker.enter();
                let router = router.clone();
                let tls = tls.clone();

                let spawned = thread::Builder::new()
                    .name("procwatch-conn".into())
                    .spawn(move || {
                        let _guard = guard;
                        if let Err(err) = handle_connection(stream, peer, &router, tls) {
                            debug!(%peer, "Connection closed with error: {err}");
                        }
                    });
                if let Err(err) = spawned {
                    warn!(%peer, "Failed to spawn connection thread: {err}");
                }
            }
            Err(AcceptError::Stopped) => {
                debug!("Accept loop stopped");
                return Ok(());
            }
            Err(AcceptError::Io(err)) => {
                error!("Listener failed: {err}");
                failed.fire();
                return Err(ServerError::Accept(err));
            }
        }
    }
}

fn handle_connection<C: ProcessControl>(
    stream: TcpStream,
    peer: SocketAddr,
    router: &Router<C>,
    tls: Option<Arc<rustls::ServerConfig>>,
) -> Result<(), HttpError> {
    stream.set_read_timeout(Some(CONNECTION_IO_TIMEOUT))?;
    stream.set_write_timeout(Some(CONNECTION_IO_TIMEOUT))?;
    debug!(%peer, "Accepted connection");

    match tls {
        Some(config) => {
            let mut stream = tls::accept(config, stream)
                .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
            serve_one(&mut stream, router)?;
            stream.conn.send_close_notify();
            stream.flush()?;
            Ok(())
        }
        None => {
            let mut stream = stream;
            serve_one(&mut stream, router)
        }
    }
}

/// Reads one request from `stream` and writes its response.
fn serve_one<S: Read + Write, C: ProcessControl>(
    stream: &mut S,
    router: &Router<C>,
) -> Result<(), HttpError> {
    let parsed = {
        let mut reader = BufReader::new(&mut *stream);
        Request::read_from(&mut reader).and_then(|request| {
            if request.expects_continue() {
                let writer = reader.get_mut();
                writer.write_all(CONTINUE)?;
                writer.flush()?;
            }
            request.discard_body(&mut reader)?;
            Ok(request)
        })
    };

    let response = match parsed {
        Ok(request) => router.handle(&request),
        Err(HttpError::Io(err)) => return Err(HttpError::Io(err)),
        Err(err @ HttpError::BodyTooLarge(_)) => {
            debug!("Rejecting request: {err}");
            Response::payload_too_large()
        }
        Err(err) => {
            debug!("Rejecting request: {err}");
            Response::bad_request()
        }
    };

    response.write_to(stream)?;
    Ok(())
}

/// Counts connection threads that are still running.
#[derive(Default)]
struct ConnectionTracker {
    active: Mutex<usize>,
    idle: Condvar,
}

impl ConnectionTracker {
    fn enter(self: &Arc<Self>) -> ConnectionGuard {
        *self.active.lock().unwrap_or_else(PoisonError::into_inner) += 1;
        ConnectionGuard {
            tracker: Arc::clone(self),
        }
    }

    fn active(&self) -> usize {
        *self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Waits until no connection is in flight. Returns `false` on timeout.
    fn wait_idle(&self, timeout: Duration) -> bool {
        let guard = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        let (guard, _) = self
            .idle
            .wait_timeout_while(guard, timeout, |active| *active > 0)
            .unwrap_or_else(PoisonError::into_inner);
        *guard == 0
    }
}

struct ConnectionGuard {
    tracker: Arc<ConnectionTracker>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        let mut active = self
            .tracker
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *active = active.saturating_sub(1);
        if *active == 0 {
            self.tracker.idle.notify_all();
        }
    }
}
