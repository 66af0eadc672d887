//! Upstream HTTP client.
//!
//! # Responsibilities
//! - Dispatch the rebuilt request to the origin server
//! - Return as soon as response headers arrive; the body streams afterwards
//! - Classify failures so the orchestrator can route certificate errors
//!
//! # Design Decisions
//! - Behind a trait so the orchestrator can be driven without a network
//! - One pooled client per process, shared by every transaction
//! - Redirects are never followed; the client sees them as-is
//! - gzip/deflate responses are decoded here so callbacks see plain bytes

use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use http::{Request, Response};
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use tower::ServiceExt;
use tower_http::decompression::Decompression;

use crate::config::UpstreamConfig;
use crate::error::UpstreamError;
use crate::http::body::{self, OutboundBody, UpstreamBody};

/// Sends requests to origin servers.
#[async_trait]
pub trait UpstreamClient: Send + Sync {
    /// Send `request`, resolving once the response head is available.
    async fn send(&self, request: Request<OutboundBody>) -> Result<Response<UpstreamBody>, UpstreamError>;
}

type PooledClient = Client<HttpsConnector<HttpConnector>, OutboundBody>;

/// Pooled hyper client over rustls with response decompression.
#[derive(Clone)]
pub struct HyperUpstreamClient {
    service: Decompression<PooledClient>,
}

impl HyperUpstreamClient {
    /// Build the client.
    ///
    /// Falls back to an empty trust store when the platform has no native
    /// roots; plain HTTP keeps working and HTTPS origins then fail
    /// certificate validation.
    pub fn new(config: &UpstreamConfig) -> Self {
        install_crypto_provider();

        let mut http = HttpConnector::new();
        http.enforce_http(false);
        http.set_nodelay(true);
        http.set_connect_timeout(Some(Duration::from_secs(config.connect_timeout_secs)));

        let tls = match HttpsConnectorBuilder::new().with_native_roots() {
            Ok(builder) => builder,
            Err(e) => {
                tracing::warn!(error = %e, "No native root certificates, HTTPS upstreams will fail validation");
                let tls_config = rustls::ClientConfig::builder()
                    .with_root_certificates(rustls::RootCertStore::empty())
                    .with_no_client_auth();
                HttpsConnectorBuilder::new().with_tls_config(tls_config)
            }
        };

        let tls = tls.https_or_http().enable_http1();
        let https = if config.http2 {
            tls.enable_http2().wrap_connector(http)
        } else {
            tls.wrap_connector(http)
        };

        let client: PooledClient = Client::builder(TokioExecutor::new())
            .http1_preserve_header_case(true)
            .http1_allow_obsolete_multiline_headers_in_responses(true)
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .pool_idle_timeout(Duration::from_secs(config.pool_idle_timeout_secs))
            .build(https);

        tracing::debug!(
            connect_timeout_secs = config.connect_timeout_secs,
            pool_idle_timeout_secs = config.pool_idle_timeout_secs,
            pool_max_idle_per_host = config.pool_max_idle_per_host,
            http2 = config.http2,
            "Upstream client ready"
        );

        Self {
            service: Decompression::new(client),
        }
    }
}

#[async_trait]
impl UpstreamClient for HyperUpstreamClient {
    async fn send(&self, request: Request<OutboundBody>) -> Result<Response<UpstreamBody>, UpstreamError> {
        let response = self
            .service
            .clone()
            .oneshot(request)
            .await
            .map_err(UpstreamError::classify)?;
        Ok(response.map(body::boxed))
    }
}

impl std::fmt::Debug for HyperUpstreamClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HyperUpstreamClient").finish_non_exhaustive()
    }
}

fn install_crypto_provider() {
    static RUSTLS_INIT: OnceLock<()> = OnceLock::new();
    RUSTLS_INIT.get_or_init(|| {
        // Err means a provider is already installed, which is all we need.
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}
