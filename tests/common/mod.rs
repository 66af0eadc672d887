//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, Method, Request, Response, StatusCode, Version};
use http_body_util::BodyExt;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use filter_proxy::config::ProxyConfig;
use filter_proxy::diagnostics::DiagnosticsCollector;
use filter_proxy::error::UpstreamError;
use filter_proxy::http::body::{self, OutboundBody, UpstreamBody};
use filter_proxy::http::{FilterCallbacks, FilterHttpResponseHandler, HandlerOptions, HttpServer};
use filter_proxy::lifecycle::Shutdown;
use filter_proxy::net::Listener;
use filter_proxy::upstream::UpstreamClient;

/// Start a mock origin that answers every connection with `200 OK` and `response`.
pub async fn start_mock_backend(response: &'static str) -> SocketAddr {
    start_programmable_backend(move || async move { (200, response.to_string()) }).await
}

/// Start a mock origin whose status and body come from `f`.
pub async fn start_programmable_backend<F, Fut>(f: F) -> SocketAddr
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = (u16, String)> + Send + 'static,
{
    let f = Arc::new(f);
    start_raw_backend_with(move |_request| {
        let f = Arc::clone(&f);
        async move {
            let (status, body) = f().await;
            let reason = StatusCode::from_u16(status)
                .ok()
                .and_then(|s| s.canonical_reason())
                .unwrap_or("Unknown");
            format!(
                "HTTP/1.1 {} {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status,
                reason,
                body.len(),
                body
            )
            .into_bytes()
        }
    })
    .await
}

/// Start a mock origin that replies with the exact bytes in `raw` and
/// counts the connections it served.
pub async fn start_raw_backend(raw: &'static [u8]) -> (SocketAddr, Arc<AtomicUsize>) {
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&hits);
    let addr = start_raw_backend_with(move |_request| {
        counter.fetch_add(1, Ordering::SeqCst);
        async move { raw.to_vec() }
    })
    .await;
    (addr, hits)
}

/// Start a mock origin that reads the request head, hands it to `f` and
/// writes back whatever `f` produces before closing.
pub async fn start_raw_backend_with<F, Fut>(f: F) -> SocketAddr
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Vec<u8>> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let f = Arc::new(f);

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let f = Arc::clone(&f);
            tokio::spawn(async move {
                let head = read_head(&mut socket).await;
                let response = f(head).await;
                let _ = socket.write_all(&response).await;
                let _ = socket.shutdown().await;
                tokio::time::sleep(Duration::from_millis(10)).await;
            });
        }
    });

    addr
}

async fn read_head(socket: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        match socket.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                buf.extend_from_slice(&chunk[..n]);
                if buf.windows(4).any(|w| w == b"\r\n\r\n") {
                    break;
                }
            }
        }
    }
    String::from_utf8_lossy(&buf).into_owned()
}

/// Bind the proxy on an ephemeral port and serve until the returned
/// [`Shutdown`] fires.
pub async fn start_proxy(
    callbacks: Arc<dyn FilterCallbacks>,
    diagnostics: DiagnosticsCollector,
) -> (SocketAddr, Shutdown) {
    let mut config = ProxyConfig::default();
    config.listener.bind_address = "127.0.0.1:0".to_string();
    config.shutdown.drain_timeout_secs = 1;

    let listener = Listener::bind(&config.listener).await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = HttpServer::with_diagnostics(&config, callbacks, diagnostics);

    let shutdown = Shutdown::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        let _ = server.run(listener, signal).await;
    });

    (addr, shutdown)
}

/// Send `request` verbatim over a fresh connection and read until the
/// proxy closes it.
pub async fn raw_exchange(proxy: SocketAddr, request: &str) -> Vec<u8> {
    let mut stream = TcpStream::connect(proxy).await.unwrap();
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut response = Vec::new();
    let _ = tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut response)).await;
    response
}

/// A reqwest client that sends everything through `proxy`.
pub fn proxied_client(proxy: SocketAddr) -> reqwest::Client {
    reqwest::Client::builder()
        .proxy(reqwest::Proxy::http(format!("http://{proxy}")).unwrap())
        .timeout(Duration::from_secs(5))
        .build()
        .unwrap()
}

/// Request as seen by [`ScriptedUpstream`].
#[derive(Debug, Clone)]
pub struct CapturedRequest {
    pub method: Method,
    pub uri: String,
    pub version: Version,
    pub headers: HeaderMap,
    pub body: Bytes,
}

type Responder = Box<dyn Fn(&CapturedRequest) -> Result<Response<UpstreamBody>, UpstreamError> + Send + Sync>;

/// In-process upstream that records requests and answers from a script.
pub struct ScriptedUpstream {
    calls: AtomicUsize,
    requests: Mutex<Vec<CapturedRequest>>,
    respond: Responder,
}

impl ScriptedUpstream {
    pub fn new<F>(respond: F) -> Arc<Self>
    where
        F: Fn(&CapturedRequest) -> Result<Response<UpstreamBody>, UpstreamError> + Send + Sync + 'static,
    {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
            respond: Box::new(respond),
        })
    }

    /// Always answer with `status`, `headers` and `body`.
    pub fn fixed(status: u16, headers: &'static [(&'static str, &'static str)], body: &'static [u8]) -> Arc<Self> {
        Self::new(move |_| Ok(response(status, headers, body::full(Bytes::from_static(body)))))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<CapturedRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl UpstreamClient for ScriptedUpstream {
    async fn send(&self, request: Request<OutboundBody>) -> Result<Response<UpstreamBody>, UpstreamError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let (parts, body) = request.into_parts();
        let body = body.collect().await.map_err(UpstreamError::classify)?.to_bytes();

        let captured = CapturedRequest {
            method: parts.method,
            uri: parts.uri.to_string(),
            version: parts.version,
            headers: parts.headers,
            body,
        };
        let result = (self.respond)(&captured);
        self.requests.lock().unwrap().push(captured);
        result
    }
}

/// Build an upstream response.
pub fn response(status: u16, headers: &[(&str, &str)], body: UpstreamBody) -> Response<UpstreamBody> {
    let mut builder = Response::builder().status(status);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    builder.body(body).unwrap()
}

/// Orchestrator wired to `upstream` with default options.
pub fn handler(
    callbacks: Arc<dyn FilterCallbacks>,
    upstream: Arc<dyn UpstreamClient>,
) -> FilterHttpResponseHandler {
    handler_with(callbacks, upstream, DiagnosticsCollector::disabled(), HandlerOptions::default())
}

pub fn handler_with(
    callbacks: Arc<dyn FilterCallbacks>,
    upstream: Arc<dyn UpstreamClient>,
    diagnostics: DiagnosticsCollector,
    options: HandlerOptions,
) -> FilterHttpResponseHandler {
    FilterHttpResponseHandler::new(callbacks, upstream, diagnostics, options)
}
