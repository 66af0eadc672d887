//! Plaintext proxy front end.
//!
//! # Responsibilities
//! - Accept client connections through the bounded [`Listener`]
//! - Serve HTTP/1.x and HTTP/2 on each connection
//! - Turn every request into a [`RequestContext`] for the orchestrator
//! - Drain connections on shutdown, then cancel what is left
//!
//! # Design Decisions
//! - A transaction error aborts the connection; that is how "no response"
//!   reaches the client
//! - Request cancellation tokens descend from one server-wide token that
//!   only fires once the drain deadline passes
//! - Client disconnects drop the in-flight service future, which unwinds
//!   the transaction and its streams

use std::sync::Arc;
use std::time::Duration;

use http::{Method, Request, Response, StatusCode};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use tokio_util::sync::CancellationToken;

use crate::config::ProxyConfig;
use crate::diagnostics::DiagnosticsCollector;
use crate::error::TransactionError;
use crate::http::body::ClientBody;
use crate::http::callbacks::FilterCallbacks;
use crate::http::handler::{FilterHttpResponseHandler, HandlerOptions};
use crate::http::request::RequestContext;
use crate::lifecycle::Shutdown;
use crate::net::{AcceptedConnection, ConnectionGuard, ConnectionTracker, Listener, ListenerError};
use crate::upstream::HyperUpstreamClient;

/// Forward proxy server for plaintext HTTP clients.
pub struct HttpServer {
    handler: Arc<FilterHttpResponseHandler>,
    tracker: ConnectionTracker,
    drain_timeout: Duration,
}

impl HttpServer {
    /// Create a server with diagnostics disabled.
    pub fn new(config: &ProxyConfig, callbacks: Arc<dyn FilterCallbacks>) -> Self {
        Self::with_diagnostics(config, callbacks, DiagnosticsCollector::disabled())
    }

    /// Create a server that reports every transaction to `diagnostics`.
    pub fn with_diagnostics(
        config: &ProxyConfig,
        callbacks: Arc<dyn FilterCallbacks>,
        diagnostics: DiagnosticsCollector,
    ) -> Self {
        let upstream = Arc::new(HyperUpstreamClient::new(&config.upstream));
        let handler = FilterHttpResponseHandler::new(
            callbacks,
            upstream,
            diagnostics,
            HandlerOptions::from(&config.inspection),
        );
        Self::from_handler(Arc::new(handler), config)
    }

    /// Serve an already-assembled orchestrator.
    pub fn from_handler(handler: Arc<FilterHttpResponseHandler>, config: &ProxyConfig) -> Self {
        Self {
            handler,
            tracker: ConnectionTracker::new(),
            drain_timeout: Duration::from_secs(config.shutdown.drain_timeout_secs),
        }
    }

    pub fn handler(&self) -> &Arc<FilterHttpResponseHandler> {
        &self.handler
    }

    pub fn connections(&self) -> &ConnectionTracker {
        &self.tracker
    }

    /// Accept connections until `shutdown` fires, then drain.
    ///
    /// Connections still open after the drain timeout have their
    /// transactions cancelled.
    pub async fn run(self, listener: Listener, shutdown: Shutdown) -> Result<(), ListenerError> {
        let addr = listener.local_addr().map_err(ListenerError::Accept)?;
        tracing::info!(address = %addr, "Proxy server starting");

        let graceful = shutdown.child_token();
        let hard_stop = CancellationToken::new();

        loop {
            let accepted = tokio::select! {
                _ = shutdown.wait() => break,
                accepted = listener.accept() => accepted,
            };

            let accepted = match accepted {
                Ok(accepted) => accepted,
                Err(ListenerError::Accept(e)) => {
                    tracing::warn!(error = %e, "Failed to accept connection");
                    continue;
                }
                Err(e) => return Err(e),
            };

            tokio::spawn(serve_connection(
                accepted,
                Arc::clone(&self.handler),
                ConnectionScope {
                    graceful: graceful.clone(),
                    hard_stop: hard_stop.clone(),
                    guard: self.tracker.track(),
                },
            ));
        }

        tracing::info!(
            active_connections = self.tracker.active_count(),
            drain_timeout_secs = self.drain_timeout.as_secs(),
            "No longer accepting connections, draining"
        );
        drop(listener);

        if tokio::time::timeout(self.drain_timeout, self.tracker.wait_for_drain())
            .await
            .is_err()
        {
            tracing::warn!(
                remaining = self.tracker.active_count(),
                "Drain timeout elapsed, cancelling in-flight transactions"
            );
            hard_stop.cancel();
            self.tracker.wait_for_drain().await;
        }

        tracing::info!("Proxy server stopped");
        Ok(())
    }
}

/// Per-connection resources released when the connection task ends.
struct ConnectionScope {
    graceful: CancellationToken,
    hard_stop: CancellationToken,
    guard: ConnectionGuard,
}

async fn serve_connection(
    accepted: AcceptedConnection,
    handler: Arc<FilterHttpResponseHandler>,
    scope: ConnectionScope,
) {
    let AcceptedConnection {
        stream,
        peer_addr,
        local_addr,
        slot: _slot,
    } = accepted;
    let connection_id = scope.guard.id();

    let hard_stop = scope.hard_stop.clone();
    let service = service_fn(move |request: Request<Incoming>| {
        let handler = Arc::clone(&handler);
        let cancel = hard_stop.child_token();
        async move {
            if *request.method() == Method::CONNECT {
                tracing::debug!(uri = %request.uri(), "Rejecting CONNECT tunnel request");
                return reject_tunnel();
            }
            let ctx = RequestContext::from_request(request)
                .with_endpoints(local_addr, Some(peer_addr))
                .with_cancellation(cancel);
            handler.handle(ctx).await
        }
    });

    let builder = auto::Builder::new(TokioExecutor::new());
    let connection = builder.serve_connection(TokioIo::new(stream), service);
    tokio::pin!(connection);

    let mut draining = false;
    loop {
        tokio::select! {
            result = connection.as_mut() => {
                if let Err(e) = result {
                    tracing::debug!(%connection_id, peer_addr = %peer_addr, error = %e, "Connection ended with error");
                }
                break;
            }
            _ = scope.graceful.cancelled(), if !draining => {
                draining = true;
                connection.as_mut().graceful_shutdown();
            }
            _ = scope.hard_stop.cancelled() => {
                tracing::debug!(%connection_id, peer_addr = %peer_addr, "Connection closed at drain deadline");
                break;
            }
        }
    }

    tracing::trace!(%connection_id, peer_addr = %peer_addr, "Connection finished");
}

fn reject_tunnel() -> Result<Response<ClientBody>, TransactionError> {
    Ok(Response::builder()
        .status(StatusCode::METHOD_NOT_ALLOWED)
        .header(http::header::CONTENT_LENGTH, 0)
        .body(ClientBody::empty())?)
}
