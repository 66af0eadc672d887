//! Proxy configuration.
//!
//! # Data Flow
//! ```text
//! TOML file
//!     → loader.rs (read, deserialize)
//!     → validation.rs (every semantic error at once)
//!     → ProxyConfig
//!     → CLI overrides applied in main
//!     → handed by value to the server, upstream client and observability
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require a restart
//! - Every field is defaulted; an empty file is a working proxy
//! - serde catches shape errors, validation catches impossible values

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    DiagnosticsConfig, InspectionConfig, ListenerConfig, LogFormat, ObservabilityConfig,
    ProxyConfig, ShutdownConfig, UpstreamConfig,
};
pub use validation::{validate_config, ValidationError};
