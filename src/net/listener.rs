//! Bounded client listener.
//!
//! # Responsibilities
//! - Bind the proxy's client-facing socket
//! - Hold one slot per live client connection; accepting waits for a free slot
//! - Hand out connections with both endpoints resolved and Nagle disabled

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::config::ListenerConfig;

#[derive(Debug)]
pub enum ListenerError {
    /// The configured address is invalid or already taken.
    Bind { address: String, source: io::Error },
    /// A single accept failed; the listener itself is still usable.
    Accept(io::Error),
    /// The slot pool was closed.
    Closed,
}

impl std::fmt::Display for ListenerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ListenerError::Bind { address, source } => {
                write!(f, "cannot listen on {}: {}", address, source)
            }
            ListenerError::Accept(e) => write!(f, "accept failed: {}", e),
            ListenerError::Closed => f.write_str("listener closed"),
        }
    }
}

impl std::error::Error for ListenerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ListenerError::Bind { source, .. } | ListenerError::Accept(source) => Some(source),
            ListenerError::Closed => None,
        }
    }
}

/// A freshly accepted client connection and the slot it occupies.
///
/// Dropping it (or the task that owns it) frees the slot.
#[derive(Debug)]
pub struct AcceptedConnection {
    pub stream: TcpStream,
    pub peer_addr: SocketAddr,
    pub local_addr: Option<SocketAddr>,
    pub slot: ConnectionSlot,
}

/// Occupied connection slot.
#[derive(Debug)]
pub struct ConnectionSlot {
    _permit: OwnedSemaphorePermit,
}

/// Client-facing TCP listener with a fixed number of connection slots.
#[derive(Debug)]
pub struct Listener {
    socket: TcpListener,
    slots: Arc<Semaphore>,
    capacity: usize,
}

impl Listener {
    pub async fn bind(config: &ListenerConfig) -> Result<Self, ListenerError> {
        let bind_error = |source| ListenerError::Bind {
            address: config.bind_address.clone(),
            source,
        };
        let addr: SocketAddr = config
            .bind_address
            .parse()
            .map_err(|e| bind_error(io::Error::new(io::ErrorKind::InvalidInput, e)))?;
        let socket = TcpListener::bind(addr).await.map_err(bind_error)?;
        Ok(Self::from_tcp(socket, config.max_connections))
    }

    /// Wrap a socket that is already bound.
    pub fn from_tcp(socket: TcpListener, capacity: usize) -> Self {
        match socket.local_addr() {
            Ok(addr) => tracing::info!(address = %addr, max_connections = capacity, "Proxy listening"),
            Err(e) => tracing::warn!(error = %e, "Listening on an unknown address"),
        }
        Self {
            socket,
            slots: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Wait for a free slot, then for the next client.
    pub async fn accept(&self) -> Result<AcceptedConnection, ListenerError> {
        let permit = Arc::clone(&self.slots)
            .acquire_owned()
            .await
            .map_err(|_| ListenerError::Closed)?;

        let (stream, peer_addr) = self.socket.accept().await.map_err(ListenerError::Accept)?;
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(peer_addr = %peer_addr, error = %e, "Could not disable Nagle");
        }
        let local_addr = stream.local_addr().ok();

        tracing::debug!(
            peer_addr = %peer_addr,
            free_slots = self.slots.available_permits(),
            "Client connected"
        );

        Ok(AcceptedConnection {
            stream,
            peer_addr,
            local_addr,
            slot: ConnectionSlot { _permit: permit },
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn free_slots(&self) -> usize {
        self.slots.available_permits()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
