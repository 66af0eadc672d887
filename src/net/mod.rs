//! Client-facing network layer.
//!
//! ```text
//! TCP client
//!     → listener.rs (slot-bounded accept, endpoints, TCP_NODELAY)
//!     → connection.rs (live-connection tracking for shutdown)
//!     → http::server
//! ```
//!
//! TLS termination belongs to whichever front end sits in front of this one.

pub mod connection;
pub mod listener;

pub use connection::{ConnectionGuard, ConnectionId, ConnectionTracker};
pub use listener::{AcceptedConnection, ConnectionSlot, Listener, ListenerError};
