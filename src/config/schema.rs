//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the proxy.
//! All types derive Serde traits for deserialization from config files, and
//! every field has a default so an empty file is a valid configuration.

use serde::{Deserialize, Serialize};

/// Largest body, in bytes, buffered for whole-body inspection.
pub const DEFAULT_MAX_IN_MEMORY_BODY: usize = 128_000_000;

/// Root configuration for the filtering proxy.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Front-end listener (bind address, connection limit).
    pub listener: ListenerConfig,

    /// Upstream client pool and timeouts.
    pub upstream: UpstreamConfig,

    /// Body inspection limits and relay policy.
    pub inspection: InspectionConfig,

    /// Diagnostics session capture.
    pub diagnostics: DiagnosticsConfig,

    /// Logging and metrics.
    pub observability: ObservabilityConfig,

    /// Graceful shutdown.
    pub shutdown: ShutdownConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "127.0.0.1:8080").
    pub bind_address: String,

    /// Maximum concurrent client connections (backpressure).
    pub max_connections: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:8080".to_string(),
            max_connections: 10_000,
        }
    }
}

/// Upstream client configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// TCP connect timeout in seconds.
    pub connect_timeout_secs: u64,

    /// How long an idle pooled connection is kept, in seconds.
    pub pool_idle_timeout_secs: u64,

    /// Idle connections kept per origin.
    pub pool_max_idle_per_host: usize,

    /// Offer HTTP/2 via ALPN to TLS origins.
    pub http2: bool,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 10,
            pool_idle_timeout_secs: 90,
            pool_max_idle_per_host: 32,
            http2: true,
        }
    }
}

/// Body inspection configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct InspectionConfig {
    /// Cap for whole-body buffering, in bytes. Larger bodies fail the
    /// transaction rather than being truncated.
    pub max_in_memory_body: usize,

    /// Buffer uninspected responses that declare a length, so the client
    /// always gets an exact `Content-Length`. When off, HTTP/1.1 clients get
    /// the upstream's declared length and a streamed body.
    pub buffer_fixed_length_responses: bool,
}

impl Default for InspectionConfig {
    fn default() -> Self {
        Self {
            max_in_memory_body: DEFAULT_MAX_IN_MEMORY_BODY,
            buffer_fixed_length_responses: true,
        }
    }
}

/// Diagnostics configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct DiagnosticsConfig {
    /// Record a diagnostics session for every transaction.
    pub enabled: bool,
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error) or a full filter directive.
    pub log_level: String,

    /// Human-readable or JSON log lines.
    pub log_format: LogFormat,

    /// Enable the Prometheus endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}

/// Graceful shutdown configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ShutdownConfig {
    /// How long in-flight connections may drain before the process exits.
    pub drain_timeout_secs: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            drain_timeout_secs: 30,
        }
    }
}
