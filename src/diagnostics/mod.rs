//! Per-transaction diagnostics capture.
//!
//! # Data Flow
//! ```text
//! FilterHttpResponseHandler
//!     → DiagnosticsCollector::begin() (SessionRecorder, no-op when disabled)
//!     → recorder.record(..) at each checkpoint
//!     → recorder travels with the client response body
//!     → finalized once: body end, explicit finish, or drop
//!     → DiagnosticsCollector::report() → subscriber channel
//! ```
//!
//! # Design Decisions
//! - The collector is explicit configuration, not process-global state
//! - A disabled collector allocates nothing per transaction
//! - Delivery is fire-and-forget; a dropped subscriber never fails traffic

pub mod collector;
pub mod session;

pub use collector::{DiagnosticsCollector, SessionRecorder};
pub use session::DiagnosticsWebSession;
