//! Filtering forward proxy.
//!
//! Runs the interception pipeline with pass-through callbacks: every
//! transaction is relayed unchanged, logged, and optionally captured as a
//! diagnostics session.
//!
//! ```text
//!     Client ──▶ net::Listener ──▶ http::server ──▶ FilterHttpResponseHandler ──▶ Origin
//!                                                     │        ▲
//!                                                     ▼        │
//!                                               FilterCallbacks (checkpoints)
//!                                                     │
//!                                                     ▼
//!                                            DiagnosticsCollector ──▶ log sink
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use filter_proxy::config::{load_config, validate_config, ProxyConfig};
use filter_proxy::diagnostics::DiagnosticsCollector;
use filter_proxy::http::{HttpServer, PassthroughCallbacks};
use filter_proxy::lifecycle::{shutdown_on_signal, Shutdown};
use filter_proxy::net::Listener;
use filter_proxy::observability::{init_logging, init_metrics};

#[derive(Parser, Debug)]
#[command(name = "filter-proxy", version, about = "Filtering HTTP forward proxy")]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Capture a diagnostics session for every transaction.
    #[arg(long)]
    diagnostics: bool,

    /// Override the listener bind address.
    #[arg(long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ProxyConfig::default(),
    };
    if let Some(bind) = cli.bind {
        config.listener.bind_address = bind;
    }
    if cli.diagnostics {
        config.diagnostics.enabled = true;
    }
    if let Err(errors) = validate_config(&config) {
        for error in &errors {
            eprintln!("invalid configuration: {error}");
        }
        return Err(format!("{} configuration error(s)", errors.len()).into());
    }

    init_logging(&config.observability)?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "filter-proxy starting");

    tracing::info!(
        bind_address = %config.listener.bind_address,
        max_connections = config.listener.max_connections,
        max_in_memory_body = config.inspection.max_in_memory_body,
        diagnostics = config.diagnostics.enabled,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => init_metrics(addr)?,
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    let diagnostics = if config.diagnostics.enabled {
        let (collector, mut sessions) = DiagnosticsCollector::channel();
        tokio::spawn(async move {
            while let Some(session) = sessions.recv().await {
                match serde_json::to_string(&session) {
                    Ok(json) => tracing::info!(target: "filter_proxy::diagnostics", session = %json, "Diagnostics session"),
                    Err(e) => tracing::warn!(error = %e, "Failed to serialize diagnostics session"),
                }
            }
        });
        collector
    } else {
        DiagnosticsCollector::disabled()
    };

    let server = HttpServer::with_diagnostics(&config, Arc::new(PassthroughCallbacks), diagnostics);
    let listener = Listener::bind(&config.listener).await?;

    let shutdown = Shutdown::new();
    shutdown_on_signal(shutdown.clone());

    server.run(listener, shutdown).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
