//! Filtering HTTP proxy core library.

pub mod config;
pub mod diagnostics;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod upstream;

pub use config::schema::ProxyConfig;
pub use diagnostics::{DiagnosticsCollector, DiagnosticsWebSession};
pub use error::{TransactionError, UpstreamError};
pub use self::http::{FilterCallbacks, FilterHttpResponseHandler, HttpMessageInfo, HttpServer, ProxyNextAction};
pub use lifecycle::Shutdown;
pub use upstream::{HyperUpstreamClient, UpstreamClient};
