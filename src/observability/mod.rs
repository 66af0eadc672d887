//! Logging and metrics.
//!
//! # Data Flow
//! ```text
//! Transactions and connections emit:
//!     → logging.rs (structured tracing events, one span per transaction)
//!     → metrics.rs (outcome counters, duration and body-size histograms)
//!
//! Consumers:
//!     → stdout (pretty or JSON lines)
//!     → Prometheus scrape endpoint (opt-in)
//! ```
//!
//! # Design Decisions
//! - Key/value events everywhere; JSON output for log shippers
//! - Transaction ID flows through every event via the span
//! - Metrics are cheap (atomic increments) and no-ops until a recorder is installed

pub mod logging;
pub mod metrics;

pub use logging::{init_logging, LoggingError};
pub use metrics::init_metrics;
