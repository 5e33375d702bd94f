//! HTTP server and graceful shutdown.
//!
//! Each accepted connection gets its own tokio task; hyper serves the
//! requests of one connection in turn and calls [`Router::handle`] for each.
//! HTTP/1.1 and HTTP/2 are negotiated transparently.
//!
//! On shutdown (SIGTERM / Ctrl-C for [`Server::serve`], or any future for
//! [`Server::serve_with_shutdown`]) the server:
//! 1. stops accepting connections,
//! 2. waits for every in-flight connection task to finish,
//! 3. returns.
//!
//! Work left running by [`timeout`](crate::middleware::timeout) after its
//! response went out is not tracked and does not delay shutdown.

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::Full;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tracing::{debug, error, info};

use crate::error::Error;
use crate::router::Router;

/// The HTTP server.
pub struct Server {
    addr: SocketAddr,
}

impl Server {
    /// Configures the server to bind to `addr` when it starts serving.
    ///
    /// # Panics
    ///
    /// Panics if `addr` is not a valid `host:port` string.
    ///
    /// ```rust,no_run
    /// use strata::Server;
    /// let server = Server::bind("0.0.0.0:3000");
    /// ```
    pub fn bind(addr: &str) -> Self {
        let addr: SocketAddr = addr
            .parse()
            .unwrap_or_else(|e| panic!("invalid socket address `{addr}`: {e}"));
        Self { addr }
    }

    /// Serves `router` until SIGTERM or Ctrl-C, then drains.
    pub async fn serve(self, router: Router) -> Result<(), Error> {
        self.serve_with_shutdown(router, shutdown_signal()).await
    }

    /// Serves `router` until `signal` resolves, then drains.
    pub async fn serve_with_shutdown(
        self,
        router: Router,
        signal: impl Future<Output = ()>,
    ) -> Result<(), Error> {
        let listener = TcpListener::bind(self.addr).await?;
        serve_listener(listener, router, signal).await
    }
}

/// Serves `router` on an already-bound listener until `signal` resolves.
///
/// Useful with port `0`: bind first, read `local_addr`, then serve.
pub async fn serve_listener(
    listener: TcpListener,
    router: Router,
    signal: impl Future<Output = ()>,
) -> Result<(), Error> {
    let router = Arc::new(router);
    info!(addr = %listener.local_addr()?, "strata listening");

    let mut connections = JoinSet::new();
    tokio::pin!(signal);

    loop {
        tokio::select! {
            // Shutdown is checked first so a signal stops accepting at once,
            // even with connections queued.
            biased;

            () = &mut signal => {
                info!(in_flight = connections.len(), "shutting down, draining connections");
                break;
            }

            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        error!("accept error: {e}");
                        continue;
                    }
                };
                debug!(%peer, "connection accepted");
                connections.spawn(serve_connection(Arc::clone(&router), stream, peer));
            }

            // Reap finished connections so the set stays small.
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    }

    while connections.join_next().await.is_some() {}

    info!("strata stopped");
    Ok(())
}

async fn serve_connection(router: Arc<Router>, stream: tokio::net::TcpStream, peer: SocketAddr) {
    let svc = service_fn(move |req| dispatch(Arc::clone(&router), req));
    if let Err(e) = ConnBuilder::new(TokioExecutor::new())
        .serve_connection(TokioIo::new(stream), svc)
        .await
    {
        error!(%peer, "connection error: {e}");
    }
}

/// Every failure inside a chain becomes a response (404, 500, 504, ...), so
/// hyper never sees an error.
async fn dispatch(
    router: Arc<Router>,
    req: hyper::Request<hyper::body::Incoming>,
) -> Result<http::Response<Full<Bytes>>, Infallible> {
    Ok(router.handle(req).await)
}

/// Resolves on SIGTERM (what Kubernetes sends) or Ctrl-C. Only Ctrl-C on
/// non-Unix platforms.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let sigterm = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = sigterm => {}
    }
}
