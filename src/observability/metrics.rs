//! Metrics collection and exposition.
//!
//! # Metrics
//! - `proxy_transactions_total` (counter): finished transactions by outcome
//! - `proxy_transaction_duration_seconds` (histogram): time to response head
//! - `proxy_upstream_failures_total` (counter): upstream failures by kind
//! - `proxy_buffered_body_bytes` (histogram): whole-body buffer sizes by direction
//! - `proxy_active_connections` (gauge): current client connections
//!
//! # Design Decisions
//! - Low-overhead metric updates (atomic operations)
//! - Recording is a no-op until `init_metrics` installs the exporter

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::error::UpstreamFailureKind;

pub const TRANSACTIONS_TOTAL: &str = "proxy_transactions_total";
pub const TRANSACTION_DURATION_SECONDS: &str = "proxy_transaction_duration_seconds";
pub const UPSTREAM_FAILURES_TOTAL: &str = "proxy_upstream_failures_total";
pub const BUFFERED_BODY_BYTES: &str = "proxy_buffered_body_bytes";
pub const ACTIVE_CONNECTIONS: &str = "proxy_active_connections";

/// Install the Prometheus recorder and its scrape endpoint.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

/// Record a finished transaction.
///
/// `outcome` is the relay branch taken (`passthrough`, `buffered`,
/// `streamed`, `dropped`, ...) or the error kind.
pub fn record_transaction(outcome: &'static str, started: Instant) {
    ::metrics::counter!(TRANSACTIONS_TOTAL, "outcome" => outcome).increment(1);
    ::metrics::histogram!(TRANSACTION_DURATION_SECONDS, "outcome" => outcome)
        .record(started.elapsed().as_secs_f64());
}

pub fn record_upstream_failure(kind: UpstreamFailureKind) {
    ::metrics::counter!(UPSTREAM_FAILURES_TOTAL, "kind" => kind.as_str()).increment(1);
}

/// `direction` is `request` or `response`.
pub fn record_buffered_body(direction: &'static str, len: usize) {
    ::metrics::histogram!(BUFFERED_BODY_BYTES, "direction" => direction).record(len as f64);
}

pub fn set_active_connections(count: u64) {
    ::metrics::gauge!(ACTIVE_CONNECTIONS).set(count as f64);
}
