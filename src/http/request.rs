//! Client request context.
//!
//! # Responsibilities
//! - Carry everything the orchestrator needs about one client request
//! - Rebuild the absolute request URL
//! - Derive client framing facts (HTTP version, declared body length)
//!
//! # Design Decisions
//! - Front-end agnostic: a plaintext listener, a TLS terminator or a test
//!   all build the same context
//! - Each context owns a cancellation token so a transaction can be unwound
//!   from outside

use std::net::SocketAddr;

use http::header::{CONTENT_LENGTH, HOST};
use http::{HeaderMap, Method, Request, Uri, Version};
use http_body::Body;
use once_cell::sync::Lazy;
use regex::Regex;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::{BoxError, TransactionError};
use crate::http::body::{self, BoxBody};

/// `major.minor` inside a protocol string such as `HTTP/1.1`.
static HTTP_VERSION_RE: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"([0-9]+)\.([0-9]+)").ok());

/// Parse the numeric version out of a protocol string.
pub fn parse_http_version(protocol: &str) -> Option<(u32, u32)> {
    let caps = HTTP_VERSION_RE.as_ref()?.captures(protocol)?;
    let major = caps.get(1)?.as_str().parse().ok()?;
    let minor = caps.get(2)?.as_str().parse().ok()?;
    Some((major, minor))
}

/// A client request waiting to be handled.
pub struct RequestContext {
    pub method: Method,
    pub uri: Uri,
    pub version: Version,
    pub headers: HeaderMap,
    pub body: BoxBody,
    pub local_addr: Option<SocketAddr>,
    pub remote_addr: Option<SocketAddr>,
    /// Whether the client side of the connection was TLS.
    pub is_encrypted: bool,
    /// Fires when the client disconnects or the front end shuts down.
    pub cancel: CancellationToken,
}

impl RequestContext {
    pub fn from_request<B>(request: Request<B>) -> Self
    where
        B: Body<Data = bytes::Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        let (parts, body) = request.into_parts();
        Self {
            method: parts.method,
            uri: parts.uri,
            version: parts.version,
            headers: parts.headers,
            body: body::boxed(body),
            local_addr: None,
            remote_addr: None,
            is_encrypted: false,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_endpoints(mut self, local: Option<SocketAddr>, remote: Option<SocketAddr>) -> Self {
        self.local_addr = local;
        self.remote_addr = remote;
        self
    }

    pub fn with_encryption(mut self, is_encrypted: bool) -> Self {
        self.is_encrypted = is_encrypted;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Absolute URL of the request.
    ///
    /// Absolute-form targets are used as-is. Otherwise the scheme follows the
    /// connection's encryption and the authority comes from `Host`.
    pub fn full_url(&self) -> Result<Url, TransactionError> {
        if self.uri.scheme().is_some() && self.uri.authority().is_some() {
            let raw = self.uri.to_string();
            return Url::parse(&raw).map_err(|source| TransactionError::InvalidUrl { url: raw, source });
        }

        let scheme = if self.is_encrypted { "https" } else { "http" };
        let host = self
            .headers
            .get(HOST)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .or_else(|| self.uri.authority().map(|a| a.to_string()))
            .unwrap_or_default();
        let path = self
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");

        let raw = format!("{scheme}://{host}{path}");
        if host.trim().is_empty() {
            return Err(TransactionError::InvalidUrl {
                url: raw,
                source: url::ParseError::EmptyHost,
            });
        }
        Url::parse(&raw).map_err(|source| TransactionError::InvalidUrl { url: raw, source })
    }

    /// Protocol string as a client would send it, e.g. `HTTP/1.1`.
    pub fn protocol(&self) -> String {
        format!("{:?}", self.version)
    }

    pub fn client_version(&self) -> Option<(u32, u32)> {
        parse_http_version(&self.protocol())
    }

    /// HTTP/1.0 clients cannot receive chunked framing.
    pub fn is_http10(&self) -> bool {
        matches!(self.client_version(), Some((1, 0)) | Some((0, _)))
    }

    pub fn declared_content_length(&self) -> Option<u64> {
        declared_content_length(&self.headers)
    }

    /// The client sent no body bytes, or said so up front.
    pub fn body_is_known_empty(&self) -> bool {
        self.body.is_end_stream()
            || self.declared_content_length() == Some(0)
            || self.body.size_hint().exact() == Some(0)
    }
}

impl std::fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestContext")
            .field("method", &self.method)
            .field("uri", &self.uri)
            .field("version", &self.version)
            .field("local_addr", &self.local_addr)
            .field("remote_addr", &self.remote_addr)
            .field("is_encrypted", &self.is_encrypted)
            .finish_non_exhaustive()
    }
}

/// Value of a single well-formed `Content-Length` header.
pub fn declared_content_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(CONTENT_LENGTH)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::Full;

    fn context(uri: &str, host: Option<&str>) -> RequestContext {
        let mut builder = Request::builder().uri(uri);
        if let Some(host) = host {
            builder = builder.header(HOST, host);
        }
        RequestContext::from_request(builder.body(Full::new(bytes::Bytes::new())).unwrap())
    }

    #[test]
    fn test_absolute_form_url() {
        let ctx = context("http://example.com:8080/a/b?q=1", Some("ignored.example"));
        assert_eq!(ctx.full_url().unwrap().as_str(), "http://example.com:8080/a/b?q=1");
    }

    #[test]
    fn test_origin_form_url_uses_host() {
        let ctx = context("/path?x=y", Some("example.com"));
        assert_eq!(ctx.full_url().unwrap().as_str(), "http://example.com/path?x=y");

        let ctx = context("/secure", Some("example.com")).with_encryption(true);
        assert_eq!(ctx.full_url().unwrap().as_str(), "https://example.com/secure");
    }

    #[test]
    fn test_missing_host_is_invalid() {
        let ctx = context("/nowhere", None);
        assert!(matches!(ctx.full_url(), Err(TransactionError::InvalidUrl { .. })));
    }

    #[test]
    fn test_parse_http_version() {
        assert_eq!(parse_http_version("HTTP/1.0"), Some((1, 0)));
        assert_eq!(parse_http_version("HTTP/1.1"), Some((1, 1)));
        assert_eq!(parse_http_version("HTTP/2.0"), Some((2, 0)));
        assert_eq!(parse_http_version("HTTP/2"), None);
        assert_eq!(parse_http_version("garbage"), None);
    }

    #[test]
    fn test_is_http10() {
        let mut ctx = context("http://example.com/", None);
        assert!(!ctx.is_http10());
        ctx.version = Version::HTTP_10;
        assert!(ctx.is_http10());
        assert_eq!(ctx.protocol(), "HTTP/1.0");
    }

    #[test]
    fn test_known_empty_body() {
        let ctx = context("http://example.com/", None);
        assert!(ctx.body_is_known_empty());

        let request = Request::builder()
            .uri("http://example.com/")
            .body(Full::new(bytes::Bytes::from_static(b"abc")))
            .unwrap();
        let ctx = RequestContext::from_request(request);
        assert!(!ctx.body_is_known_empty());
    }

    #[test]
    fn test_declared_content_length() {
        let mut headers = HeaderMap::new();
        assert_eq!(declared_content_length(&headers), None);
        headers.insert(CONTENT_LENGTH, "0".parse().unwrap());
        assert_eq!(declared_content_length(&headers), Some(0));
        headers.insert(CONTENT_LENGTH, "nope".parse().unwrap());
        assert_eq!(declared_content_length(&headers), None);
    }
}
