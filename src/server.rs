//! HTTP server and graceful shutdown.
//!
//! # Shutdown
//!
//! The server stops on the first of **SIGTERM**, **Ctrl-C**, or
//! [`ShutdownHandle::stop`]. It then:
//!
//! 1. stops accepting connections;
//! 2. asks every live connection to finish its in-flight requests and close
//!    (HTTP/1.1 stops keep-alive, HTTP/2 sends GOAWAY);
//! 3. waits up to [`Server::shutdown_timeout`] (30 s by default) for them;
//! 4. aborts whatever is still open and returns from [`Server::serve`].
//!
//! Long-lived streams (SSE) are what step 4 is for: they do not end on their
//! own, so size the timeout to what you are willing to wait.
//!
//! # Handlers run on their own task
//!
//! Each request's handler is spawned, and the response head goes back to
//! hyper as soon as the handler commits a status. The body follows through a
//! channel for as long as the handler keeps writing, which is what lets an
//! SSE handler stream without returning.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::context::Context;
use crate::error::Error;
use crate::handler::BoxedHandler;
use crate::request::Request;
use crate::router::Router;
use crate::transport::{ChannelBody, HyperSink};

const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

enum Bind {
    Addr(String),
    Listener(TcpListener),
}

/// The HTTP server.
pub struct Server {
    bind: Bind,
    shutdown_timeout: Duration,
    handle: ShutdownHandle,
}

impl Server {
    /// Configures the server to bind to `addr` (`host:port`) when
    /// [`serve`](Server::serve) is called. An invalid address is reported by
    /// `serve` as [`Error::Addr`].
    ///
    /// ```rust,no_run
    /// use si::Server;
    /// let server = Server::bind("0.0.0.0:3000");
    /// ```
    pub fn bind(addr: &str) -> Self {
        Self::with_bind(Bind::Addr(addr.to_owned()))
    }

    /// Serves on a listener that is already bound, e.g. to port `0` in tests.
    pub fn from_listener(listener: TcpListener) -> Self {
        Self::with_bind(Bind::Listener(listener))
    }

    fn with_bind(bind: Bind) -> Self {
        Self {
            bind,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            handle: ShutdownHandle::new(),
        }
    }

    /// How long shutdown waits for open connections before aborting them.
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// A handle that stops this server from elsewhere.
    pub fn handle(&self) -> ShutdownHandle {
        self.handle.clone()
    }

    /// Accepts connections and dispatches their requests through `router`.
    ///
    /// Returns once shutdown has finished, or with an error if the listener
    /// cannot be set up.
    pub async fn serve(self, router: Router) -> Result<(), Error> {
        let Self { bind, shutdown_timeout, handle } = self;
        // Whatever happens below, `stop()` callers get released.
        let _stopped = StoppedGuard(handle.clone());

        let listener = match bind {
            Bind::Listener(listener) => listener,
            Bind::Addr(addr) => {
                let sock: SocketAddr = addr
                    .parse()
                    .map_err(|source| Error::Addr { addr: addr.clone(), source })?;
                TcpListener::bind(sock).await?
            }
        };
        let local = listener.local_addr()?;
        let root = router.into_handler();

        info!(addr = %local, "si listening");

        let mut tasks = JoinSet::new();
        let mut stop_rx = handle.shared.signal.subscribe();
        let shutdown = async {
            tokio::select! {
                () = shutdown_signal() => {}
                () = signalled(&mut stop_rx) => {}
            }
        };
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                biased;

                () = &mut shutdown => {
                    info!(in_flight = tasks.len(), "shutdown requested, draining connections");
                    break;
                }

                res = listener.accept() => {
                    let (stream, remote_addr) = match res {
                        Ok(v) => v,
                        Err(e) => {
                            error!("accept error: {e}");
                            continue;
                        }
                    };
                    let root = Arc::clone(&root);
                    let stop = handle.shared.signal.subscribe();
                    tasks.spawn(serve_connection(TokioIo::new(stream), remote_addr, root, stop));
                }

                Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
            }
        }

        drop(listener);
        // Signal-driven shutdowns reach the connections through the same channel.
        handle.shared.signal.send_replace(true);

        let drained = tokio::time::timeout(shutdown_timeout, async {
            while tasks.join_next().await.is_some() {}
        })
        .await
        .is_ok();
        if !drained {
            warn!(remaining = tasks.len(), "shutdown timeout elapsed, aborting connections");
            tasks.shutdown().await;
        }

        info!("si stopped");
        Ok(())
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let bind = match &self.bind {
            Bind::Addr(addr) => addr.clone(),
            Bind::Listener(l) => l.local_addr().map(|a| a.to_string()).unwrap_or_default(),
        };
        f.debug_struct("Server")
            .field("bind", &bind)
            .field("shutdown_timeout", &self.shutdown_timeout)
            .finish()
    }
}

// ── Shutdown handle ───────────────────────────────────────────────────────────

/// Stops a running [`Server`].
#[derive(Clone, Debug)]
pub struct ShutdownHandle {
    shared: Arc<Shared>,
}

#[derive(Debug)]
struct Shared {
    signal: watch::Sender<bool>,
    stopped: watch::Sender<bool>,
}

impl ShutdownHandle {
    fn new() -> Self {
        let (signal, _) = watch::channel(false);
        let (stopped, _) = watch::channel(false);
        Self { shared: Arc::new(Shared { signal, stopped }) }
    }

    /// Starts a graceful shutdown and waits until [`Server::serve`] has
    /// returned. Calling it again, or from several places, is fine.
    pub async fn stop(&self) {
        self.shared.signal.send_replace(true);
        let mut stopped = self.shared.stopped.subscribe();
        signalled(&mut stopped).await;
    }

    /// `true` once [`Server::serve`] has returned.
    pub fn is_stopped(&self) -> bool {
        *self.shared.stopped.borrow()
    }
}

struct StoppedGuard(ShutdownHandle);

impl Drop for StoppedGuard {
    fn drop(&mut self) {
        self.0.shared.stopped.send_replace(true);
    }
}

/// Resolves once the flag behind `rx` is set. Never resolves if every sender
/// is gone without setting it.
async fn signalled(rx: &mut watch::Receiver<bool>) {
    let closed = rx.wait_for(|set| *set).await.is_err();
    if closed {
        std::future::pending::<()>().await;
    }
}

// ── Connections & requests ────────────────────────────────────────────────────

async fn serve_connection(
    io: TokioIo<tokio::net::TcpStream>,
    remote_addr: SocketAddr,
    root: BoxedHandler,
    mut stop: watch::Receiver<bool>,
) {
    // The closure runs once per request on the connection.
    let svc = service_fn(move |req| dispatch(Arc::clone(&root), req, remote_addr));

    // HTTP/1.1 or HTTP/2, whatever the client speaks.
    let builder = ConnBuilder::new(TokioExecutor::new());
    let conn = builder.serve_connection(io, svc);
    tokio::pin!(conn);

    let res = tokio::select! {
        res = conn.as_mut() => res,
        () = signalled(&mut stop) => {
            conn.as_mut().graceful_shutdown();
            conn.await
        }
    };
    if let Err(e) = res {
        debug!(peer = %remote_addr, "connection error: {e}");
    }
}

/// Starts the handler for one request and resolves with the response head
/// as soon as the handler commits it.
async fn dispatch(
    root: BoxedHandler,
    req: hyper::Request<Incoming>,
    remote_addr: SocketAddr,
) -> Result<http::Response<ChannelBody>, Infallible> {
    let (sink, head) = HyperSink::new();
    let ctx = Context::new(Request::new(req).with_remote_addr(remote_addr), Box::new(sink));
    tokio::spawn(root.call(ctx));

    Ok(head.await.unwrap_or_else(|_| {
        // The sink always commits when dropped, so this only happens if the
        // handler task never ran.
        let mut res = http::Response::new(ChannelBody::empty());
        *res.status_mut() = http::StatusCode::INTERNAL_SERVER_ERROR;
        res
    }))
}

// ── Shutdown signal ───────────────────────────────────────────────────────────

/// Resolves on the first SIGTERM or Ctrl-C. A signal that cannot be
/// listened for is logged and never fires.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("cannot listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let sigterm = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("cannot listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c  => {}
        () = sigterm => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bad_address_is_an_error() {
        let err = Server::bind("not-an-address").serve(Router::new()).await.unwrap_err();
        assert!(matches!(err, Error::Addr { ref addr, .. } if addr == "not-an-address"));
    }

    #[tokio::test]
    async fn stop_releases_after_failed_serve() {
        let server = Server::bind("nope");
        let handle = server.handle();
        let _ = server.serve(Router::new()).await;

        assert!(handle.is_stopped());
        tokio::time::timeout(Duration::from_secs(1), handle.stop()).await.unwrap();
    }

    #[tokio::test]
    async fn stop_ends_serve() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let server = Server::from_listener(listener).shutdown_timeout(Duration::from_secs(1));
        let handle = server.handle();
        let serving = tokio::spawn(server.serve(Router::new()));

        tokio::time::timeout(Duration::from_secs(5), handle.stop()).await.unwrap();
        serving.await.unwrap().unwrap();
    }
}
