//! Listener lifecycle: bind, serve on a background task, bounded drain.
//!
//! ```text
//! bind()          -> Starting
//! serve()         -> Serving            (accept loop spawned)
//!   loop exits    -> Closed             (loop error returned)
//!   shutdown      -> Draining -> Closed (drain outcome returned)
//! ```
//!
//! Draining stops the accept loop, asks every live connection to close once
//! its in-flight requests are answered, and waits up to the drain timeout.
//! When the timeout fires the loop task is aborted, which drops every
//! remaining connection.
use std::{io, net::SocketAddr, time::Duration};

use axum::{Router, body::Body, extract::ConnectInfo};
use hyper::body::Incoming;
use hyper_util::{
    rt::{TokioExecutor, TokioIo},
    server::{conn::auto, graceful::GracefulShutdown as ConnectionDrain},
};
use multiaddr::Multiaddr;
use thiserror::Error;
use tokio::{
    net::TcpListener,
    sync::watch,
    task::JoinSet,
};
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use crate::{
    config::models::ShutdownConfig,
    ports::http_server::{HttpServer, LifecycleState},
    utils::{
        graceful_shutdown::ShutdownToken,
        listen_addr::{ListenAddr, socket_to_multiaddr},
    },
};

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ServeError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("serve loop failed: {0}")]
    Serve(#[source] io::Error),

    #[error("server did not drain within {0:?}, remaining connections were closed")]
    ShutdownTimeout(Duration),

    #[error("failed to start server, process closing")]
    ProcessClosing,

    #[error("serve task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// How long a drain may take and how often it reports progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrainPolicy {
    pub timeout: Duration,
    pub progress_interval: Duration,
}

impl From<&ShutdownConfig> for DrainPolicy {
    fn from(config: &ShutdownConfig) -> Self {
        Self {
            timeout: config.timeout(),
            progress_interval: config.progress_interval(),
        }
    }
}

impl Default for DrainPolicy {
    fn default() -> Self {
        Self::from(&ShutdownConfig::default())
    }
}

/// A bound listener waiting to be served.
pub struct GatewayServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    drain: DrainPolicy,
    state: watch::Sender<LifecycleState>,
}

impl GatewayServer {
    /// Bind `listen_addr`. Port 0 picks an ephemeral port; see [`multiaddr`](Self::multiaddr).
    pub async fn bind(listen_addr: &ListenAddr, drain: DrainPolicy) -> Result<Self, ServeError> {
        let host = listen_addr.bind_host();
        let listener = TcpListener::bind((host.as_str(), listen_addr.port()))
            .await
            .map_err(|source| ServeError::Bind {
                addr: listen_addr.to_string(),
                source,
            })?;
        let local_addr = listener.local_addr().map_err(|source| ServeError::Bind {
            addr: listen_addr.to_string(),
            source,
        })?;

        let (state, _) = watch::channel(LifecycleState::Starting);
        Ok(Self {
            listener,
            local_addr,
            drain,
            state,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The actually bound address in multiaddr form.
    pub fn multiaddr(&self) -> Multiaddr {
        socket_to_multiaddr(self.local_addr)
    }

    /// Observe lifecycle transitions.
    pub fn state(&self) -> watch::Receiver<LifecycleState> {
        self.state.subscribe()
    }
}

impl HttpServer for GatewayServer {
    type Error = ServeError;

    async fn serve(self, router: Router, mut shutdown: ShutdownToken) -> Result<(), ServeError> {
        let GatewayServer {
            listener,
            local_addr,
            drain,
            state,
        } = self;
        let addr = socket_to_multiaddr(local_addr);

        if shutdown.is_shutdown_initiated() {
            state.send_replace(LifecycleState::Closed);
            return Err(ServeError::ProcessClosing);
        }

        let cancel = CancellationToken::new();
        let mut serve_task = tokio::spawn(accept_loop(listener, router, cancel.clone()));
        state.send_replace(LifecycleState::Serving);

        tokio::select! {
            result = &mut serve_task => {
                state.send_replace(LifecycleState::Closed);
                tracing::info!("server at {addr} terminated");
                return result?.map_err(ServeError::Serve);
            }
            reason = shutdown.wait_for_shutdown() => {
                tracing::info!(?reason, "server at {addr} terminating...");
            }
        }

        state.send_replace(LifecycleState::Draining);
        cancel.cancel();

        let deadline = tokio::time::sleep(drain.timeout);
        tokio::pin!(deadline);
        let mut progress = tokio::time::interval_at(
            tokio::time::Instant::now() + drain.progress_interval,
            drain.progress_interval,
        );

        let outcome = loop {
            tokio::select! {
                result = &mut serve_task => {
                    break result.map_err(ServeError::from).and_then(|r| r.map_err(ServeError::Serve));
                }
                _ = progress.tick() => {
                    tracing::info!("waiting for server at {addr} to terminate...");
                }
                _ = &mut deadline => {
                    tracing::warn!(timeout = ?drain.timeout, "Drain timed out, closing remaining connections");
                    serve_task.abort();
                    // wait for the abort so every connection is gone on return
                    let _ = serve_task.await;
                    break Err(ServeError::ShutdownTimeout(drain.timeout));
                }
            }
        };

        state.send_replace(LifecycleState::Closed);
        tracing::info!("server at {addr} terminated");
        outcome
    }
}

/// Pause after an accept error that is neither per-connection nor fatal.
const ACCEPT_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AcceptErrorClass {
    /// The failed connection is gone; accept the next one right away.
    Connection,
    /// Resource exhaustion (EMFILE, ENFILE, ENOBUFS, ENOMEM) or anything else
    /// that may clear up; retry after [`ACCEPT_BACKOFF`].
    Backoff,
    /// The listener itself is unusable.
    Fatal,
}

fn classify_accept_error(e: &io::Error) -> AcceptErrorClass {
    match e.kind() {
        io::ErrorKind::ConnectionAborted
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionRefused
        | io::ErrorKind::Interrupted => AcceptErrorClass::Connection,
        io::ErrorKind::InvalidInput | io::ErrorKind::NotConnected => AcceptErrorClass::Fatal,
        _ => AcceptErrorClass::Backoff,
    }
}

/// Accept connections until cancelled, then drain them.
///
/// Connections run in a `JoinSet` owned by this task, so aborting the task
/// tears every connection down.
async fn accept_loop(
    listener: TcpListener,
    router: Router,
    cancel: CancellationToken,
) -> io::Result<()> {
    let builder = auto::Builder::new(TokioExecutor::new());
    let drain = ConnectionDrain::new();
    let mut connections = JoinSet::new();

    loop {
        let (stream, peer) = tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(e) => match classify_accept_error(&e) {
                    AcceptErrorClass::Connection => {
                        tracing::debug!(error = %e, "Transient accept error");
                        continue;
                    }
                    AcceptErrorClass::Backoff => {
                        tracing::error!(error = %e, backoff = ?ACCEPT_BACKOFF, "Accept failed, retrying");
                        tokio::select! {
                            _ = cancel.cancelled() => break,
                            _ = tokio::time::sleep(ACCEPT_BACKOFF) => continue,
                        }
                    }
                    AcceptErrorClass::Fatal => {
                        tracing::error!(error = %e, "Accept failed");
                        return Err(e);
                    }
                },
            },
            Some(_) = connections.join_next(), if !connections.is_empty() => continue,
        };

        let router = router.clone();
        let service = hyper::service::service_fn(move |req: hyper::Request<Incoming>| {
            let mut req = req.map(Body::new);
            req.extensions_mut().insert(ConnectInfo(peer));
            router.clone().oneshot(req)
        });
        let conn = builder.serve_connection_with_upgrades(TokioIo::new(stream), service);
        let conn = drain.watch(conn.into_owned());
        connections.spawn(async move {
            if let Err(e) = conn.await {
                tracing::debug!(%peer, error = %e, "Connection closed with error");
            }
        });
    }

    // refuse new connections while the old ones finish
    drop(listener);
    tracing::debug!(connections = connections.len(), "Draining connections");
    drain.shutdown().await;
    Ok(())
}
