//! Error types for the interception pipeline.

use std::error::Error as StdError;
use std::fmt;

use thiserror::Error;

/// Boxed error for arbitrary failure sources.
pub type BoxError = Box<dyn StdError + Send + Sync>;

/// Error carried by every body in the pipeline.
///
/// A named type rather than [`BoxError`], so hyper and tower bounds on body
/// errors resolve without a trait object in the body type.
#[derive(Debug)]
pub struct BodyError(BoxError);

impl BodyError {
    /// Wrap `error`. An error that already is a `BodyError` is not nested.
    pub fn new(error: impl Into<BoxError>) -> Self {
        match error.into().downcast::<BodyError>() {
            Ok(body_error) => *body_error,
            Err(other) => Self(other),
        }
    }

    pub fn into_inner(self) -> BoxError {
        self.0
    }
}

impl fmt::Display for BodyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl StdError for BodyError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(self.0.as_ref())
    }
}

impl From<std::io::Error> for BodyError {
    fn from(error: std::io::Error) -> Self {
        Self(Box::new(error))
    }
}

/// Why a transaction ended without a normal response.
///
/// Any of these returned from the orchestrator means "no response": the front
/// end aborts the client connection.
#[derive(Debug, Error)]
pub enum TransactionError {
    /// The request target could not be turned into an absolute URL.
    #[error("invalid request URL {url:?}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    /// A body requested for whole-body inspection exceeded the in-memory cap.
    #[error("body exceeds in-memory limit of {limit} bytes")]
    BodyTooLarge { limit: usize },

    /// Reading a request or response body failed.
    #[error("body stream error: {0}")]
    Body(#[source] BoxError),

    /// The upstream exchange failed.
    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    /// A stream tap asked for the connection to be dropped.
    #[error("stream inspection dropped the connection")]
    StreamDropped,

    /// The client went away or the front end is shutting down.
    #[error("transaction cancelled")]
    Cancelled,

    /// Building an HTTP message failed.
    #[error("failed to build HTTP message: {0}")]
    Http(#[from] http::Error),
}

impl TransactionError {
    /// Cancellations are benign and never logged as errors.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, TransactionError::Cancelled | TransactionError::StreamDropped)
    }

    /// Short label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            TransactionError::InvalidUrl { .. } => "invalid_url",
            TransactionError::BodyTooLarge { .. } => "body_too_large",
            TransactionError::Body(_) => "body",
            TransactionError::Upstream(e) => e.kind().as_str(),
            TransactionError::StreamDropped => "stream_dropped",
            TransactionError::Cancelled => "cancelled",
            TransactionError::Http(_) => "http",
        }
    }

    /// Map a body error, recognising dropped streams and the length cap.
    pub(crate) fn from_body_error(error: BoxError, limit: usize) -> Self {
        if error.is::<http_body_util::LengthLimitError>() {
            return TransactionError::BodyTooLarge { limit };
        }
        if source_chain_contains::<StreamDropped>(error.as_ref()) {
            return TransactionError::StreamDropped;
        }
        TransactionError::Body(error)
    }
}

/// Marker carried inside I/O errors produced when a stream tap drops the
/// connection.
#[derive(Debug, Clone, Copy, Default)]
pub struct StreamDropped;

impl fmt::Display for StreamDropped {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("connection dropped by stream inspection")
    }
}

impl StdError for StreamDropped {}

/// Classification of upstream failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpstreamFailureKind {
    /// TLS certificate validation failed.
    Certificate,
    Timeout,
    Connect,
    /// A request body tap dropped the connection mid-upload.
    StreamDropped,
    Other,
}

impl UpstreamFailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            UpstreamFailureKind::Certificate => "upstream_certificate",
            UpstreamFailureKind::Timeout => "upstream_timeout",
            UpstreamFailureKind::Connect => "upstream_connect",
            UpstreamFailureKind::StreamDropped => "stream_dropped",
            UpstreamFailureKind::Other => "upstream_other",
        }
    }
}

/// A failed upstream exchange.
#[derive(Debug, Error)]
#[error("{} failure: {source}", .kind.as_str())]
pub struct UpstreamError {
    kind: UpstreamFailureKind,
    #[source]
    source: BoxError,
}

impl UpstreamError {
    pub fn new(kind: UpstreamFailureKind, source: impl Into<BoxError>) -> Self {
        Self {
            kind,
            source: source.into(),
        }
    }

    /// Classify an error by walking its source chain.
    pub fn classify(source: impl Into<BoxError>) -> Self {
        let source = source.into();
        let kind = classify_failure(source.as_ref());
        Self { kind, source }
    }

    pub fn kind(&self) -> UpstreamFailureKind {
        self.kind
    }

    pub fn is_certificate_error(&self) -> bool {
        self.kind == UpstreamFailureKind::Certificate
    }
}

fn classify_failure(error: &(dyn StdError + 'static)) -> UpstreamFailureKind {
    if source_chain_contains::<StreamDropped>(error) {
        return UpstreamFailureKind::StreamDropped;
    }
    if find_in_chain(error, |e| {
        e.downcast_ref::<rustls::Error>()
            .map(is_certificate_failure)
            .unwrap_or(false)
    }) {
        return UpstreamFailureKind::Certificate;
    }
    if find_in_chain(error, |e| {
        e.downcast_ref::<std::io::Error>()
            .map(|io| io.kind() == std::io::ErrorKind::TimedOut)
            .unwrap_or(false)
    }) {
        return UpstreamFailureKind::Timeout;
    }
    if let Some(client_error) = error.downcast_ref::<hyper_util::client::legacy::Error>() {
        if client_error.is_connect() {
            return UpstreamFailureKind::Connect;
        }
    }
    UpstreamFailureKind::Other
}

fn is_certificate_failure(error: &rustls::Error) -> bool {
    matches!(
        error,
        rustls::Error::InvalidCertificate(_)
            | rustls::Error::NoCertificatesPresented
    )
}

/// Whether an error of type `E` appears anywhere in the chain.
pub(crate) fn source_chain_contains<E: StdError + 'static>(error: &(dyn StdError + 'static)) -> bool {
    find_in_chain(error, |e| e.is::<E>())
}

/// Walk `source()` links, also looking inside `io::Error` payloads, which
/// `io::Error::source` skips over.
fn find_in_chain(
    error: &(dyn StdError + 'static),
    predicate: impl Fn(&(dyn StdError + 'static)) -> bool + Copy,
) -> bool {
    let mut current = Some(error);
    while let Some(e) = current {
        if predicate(e) {
            return true;
        }
        if let Some(inner) = e.downcast_ref::<std::io::Error>().and_then(|io| io.get_ref()) {
            let inner: &(dyn StdError + 'static) = inner;
            if find_in_chain(inner, predicate) {
                return true;
            }
        }
        current = e.source();
    }
    false
}
