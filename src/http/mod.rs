//! HTTP interception subsystem.
//!
//! # Data Flow
//! ```text
//! Client connection
//!     → server.rs (accept, hyper-util auto serving)
//!     → request.rs (RequestContext, URL rebuild)
//!     → handler.rs (checkpoints: message → whole body / stream taps)
//!         → callbacks.rs (user FilterCallbacks)
//!         → body.rs + inspection.rs (buffering, byte taps)
//!     → upstream (origin server)
//!     → response.rs (header reconciliation, framing)
//!     → Send to client
//! ```

pub mod action;
pub mod body;
pub mod callbacks;
pub mod handler;
pub mod headers;
pub mod inspection;
pub mod message;
pub mod request;
pub mod response;
pub mod server;

pub use action::{ProxyNextAction, StreamOperation, StreamVerdict};
pub use body::{BoxBody, ClientBody, OutboundBody, UpstreamBody};
pub use callbacks::{FilterCallbacks, PassthroughCallbacks};
pub use handler::{FilterHttpResponseHandler, HandlerOptions};
pub use headers::HeaderCollection;
pub use inspection::{InspectionStream, StreamTap};
pub use message::{HttpMessageInfo, MessageProtocol, MessageType};
pub use request::RequestContext;
pub use server::HttpServer;
