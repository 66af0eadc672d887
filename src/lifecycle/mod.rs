//! Process lifecycle: signals and shutdown.
//!
//! # Data Flow
//! ```text
//! shutdown.rs:
//!     Trigger → Stop accepting → Drain connections → Cancel stragglers → Exit
//!
//! signals.rs:
//!     First SIGTERM/SIGINT → Shutdown::trigger
//!     Second signal → Forced exit
//! ```
//!
//! # Design Decisions
//! - Stop accepting first, then let open connections finish
//! - Shutdown has timeout: in-flight transactions are cancelled after the deadline

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
pub use signals::{shutdown_on_signal, wait_for_signal};
