//! Body types and adapters shared by the orchestrator and the front end.
//!
//! # Responsibilities
//! - One boxed body type for every leg (client in, upstream out, upstream in)
//! - Capped whole-body reads
//! - Conversions between HTTP bodies and byte streams so an
//!   [`InspectionStream`] can sit between two bodies
//! - The client response body, which carries the diagnostics recorder until
//!   the last frame is sent
//!
//! # Design Decisions
//! - Frames pass through [`ClientBody`] untouched; it only watches for the end
//! - Capped reads fail instead of truncating

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};

use bytes::Bytes;
use futures_util::TryStreamExt;
use http_body::{Body, Frame, SizeHint};
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Empty, Full, Limited, StreamBody};
use tokio::io::AsyncRead;
use tokio_util::io::{ReaderStream, StreamReader};

use crate::diagnostics::SessionRecorder;
use crate::error::{BodyError, BoxError, TransactionError};
use crate::http::callbacks::FilterCallbacks;
use crate::http::inspection::InspectionStream;
use crate::http::message::HttpMessageInfo;

/// Type-erased body used on every leg.
pub type BoxBody = UnsyncBoxBody<Bytes, BodyError>;

/// Body sent to the upstream server.
pub type OutboundBody = BoxBody;

/// Body received from the upstream server.
pub type UpstreamBody = BoxBody;

pub fn full(bytes: impl Into<Bytes>) -> BoxBody {
    Full::new(bytes.into())
        .map_err(|never| match never {})
        .boxed_unsync()
}

pub fn empty() -> BoxBody {
    Empty::<Bytes>::new()
        .map_err(|never| match never {})
        .boxed_unsync()
}

/// Erase any compatible body.
pub fn boxed<B>(body: B) -> BoxBody
where
    B: Body<Data = Bytes> + Send + 'static,
    B::Error: Into<BoxError>,
{
    body.map_err(BodyError::new).boxed_unsync()
}

/// Collect a body into memory, failing with
/// [`TransactionError::BodyTooLarge`] once more than `limit` bytes arrive.
pub async fn read_body_capped<B>(body: B, limit: usize) -> Result<Bytes, TransactionError>
where
    B: Body<Data = Bytes>,
    B::Error: Into<BoxError>,
{
    let collected = Limited::new(body, limit)
        .collect()
        .await
        .map_err(|e| TransactionError::from_body_error(e, limit))?;
    Ok(collected.to_bytes())
}

/// Expose a body's data frames as a byte reader. Trailers are discarded.
pub fn body_reader(body: BoxBody) -> impl AsyncRead + Send + Unpin + 'static {
    StreamReader::new(body.into_data_stream().map_err(io::Error::other))
}

/// Turn a byte reader back into a body.
pub fn reader_body<R>(reader: R) -> BoxBody
where
    R: AsyncRead + Send + 'static,
{
    let frames = ReaderStream::new(reader).map_ok(Frame::data);
    BodyExt::map_err(StreamBody::new(frames), BodyError::from).boxed_unsync()
}

/// Route `body` through an [`InspectionStream`] bound to the streamed
/// inspection callback for `message`.
pub fn inspect_body(
    body: BoxBody,
    message: Arc<HttpMessageInfo>,
    callbacks: Arc<dyn FilterCallbacks>,
) -> BoxBody {
    reader_body(InspectionStream::with_callbacks(
        body_reader(body),
        message,
        callbacks,
    ))
}

/// Body handed to the client.
///
/// Holds the transaction's diagnostics recorder and finishes it as soon as
/// the last frame has been produced. If the client goes away first, dropping
/// the body finishes it instead.
pub struct ClientBody {
    inner: BoxBody,
    recorder: Option<SessionRecorder>,
}

impl ClientBody {
    pub fn new(inner: BoxBody) -> Self {
        Self {
            inner,
            recorder: None,
        }
    }

    pub fn empty() -> Self {
        Self::new(empty())
    }

    pub fn full(bytes: impl Into<Bytes>) -> Self {
        Self::new(full(bytes))
    }

    pub(crate) fn with_recorder(mut self, recorder: SessionRecorder) -> Self {
        self.recorder = Some(recorder);
        self
    }

    fn finish_recording(&mut self) {
        if let Some(recorder) = self.recorder.take() {
            recorder.finish();
        }
    }
}

impl Body for ClientBody {
    type Data = Bytes;
    type Error = BodyError;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        let frame = ready!(Pin::new(&mut this.inner).poll_frame(cx));
        if frame.is_none() {
            this.finish_recording();
        }
        Poll::Ready(frame)
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

impl std::fmt::Debug for ClientBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientBody")
            .field("size_hint", &self.inner.size_hint())
            .field("recording", &self.recorder.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::DiagnosticsCollector;
    use crate::http::action::{StreamOperation, StreamVerdict};
    use http::Method;
    use url::Url;

    #[tokio::test]
    async fn test_capped_read_boundaries() {
        let cap = 16;
        let below = read_body_capped(full(vec![b'a'; cap - 1]), cap).await.unwrap();
        assert_eq!(below.len(), cap - 1);

        let exact = read_body_capped(full(vec![b'a'; cap]), cap).await.unwrap();
        assert_eq!(exact.len(), cap);

        let over = read_body_capped(full(vec![b'a'; cap + 1]), cap).await.unwrap_err();
        assert!(matches!(over, TransactionError::BodyTooLarge { limit: 16 }));
    }

    #[tokio::test]
    async fn test_reader_round_trip_preserves_bytes() {
        let data: Vec<u8> = (0..50_000u32).map(|i| (i % 251) as u8).collect();
        let body = reader_body(body_reader(full(data.clone())));
        let out = body.collect().await.unwrap().to_bytes();
        assert_eq!(out.as_ref(), data.as_slice());
    }

    struct Upper;

    impl FilterCallbacks for Upper {
        fn on_stream_chunk(
            &self,
            _message: &HttpMessageInfo,
            operation: StreamOperation,
            chunk: &mut [u8],
        ) -> StreamVerdict {
            assert_eq!(operation, StreamOperation::Read);
            chunk.make_ascii_uppercase();
            StreamVerdict::Forward
        }
    }

    #[tokio::test]
    async fn test_inspect_body_rewrites_chunks() {
        let message = Arc::new(HttpMessageInfo::request(
            Url::parse("http://example.com/").unwrap(),
            Method::POST,
        ));
        let body = inspect_body(full("hello world"), message, Arc::new(Upper));
        let out = body.collect().await.unwrap().to_bytes();
        assert_eq!(out.as_ref(), b"HELLO WORLD");
    }

    #[tokio::test]
    async fn test_client_body_finishes_recorder_at_end() {
        let (collector, mut rx) = DiagnosticsCollector::channel();
        let body = ClientBody::full("done").with_recorder(collector.begin());

        let out = body.collect().await.unwrap().to_bytes();
        assert_eq!(out.as_ref(), b"done");
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_client_body_finishes_recorder_on_drop() {
        let (collector, mut rx) = DiagnosticsCollector::channel();
        let body = ClientBody::full("never read").with_recorder(collector.begin());
        drop(body);
        assert!(rx.try_recv().is_ok());
    }
}
