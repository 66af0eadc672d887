//! Byte-level inspection of streamed bodies.
//!
//! # Responsibilities
//! - Tap every completed read and every write of an inner stream
//! - Let the tap rewrite bytes in place before they move on
//! - Abort the surrounding copy when the tap asks for the connection to drop
//!
//! # Design Decisions
//! - The wrapper never splits, merges or copies read chunks
//! - Zero-length reads are end-of-stream and never reach the tap
//! - Writes are tapped on a private copy of the caller's bytes, which is fully
//!   drained into the inner writer before success is reported
//! - A drop poisons the stream: every later operation fails the same way

use std::fmt;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use crate::error::StreamDropped;
use crate::http::action::{StreamOperation, StreamVerdict};
use crate::http::callbacks::FilterCallbacks;
use crate::http::message::HttpMessageInfo;

/// Per-chunk tap. Receives the owning message, the direction and the chunk.
pub type StreamTap =
    Arc<dyn Fn(&HttpMessageInfo, StreamOperation, &mut [u8]) -> StreamVerdict + Send + Sync>;

/// Duplex stream decorator that hands every chunk to a tap.
pub struct InspectionStream<S> {
    inner: S,
    message: Arc<HttpMessageInfo>,
    on_read: Option<StreamTap>,
    on_write: Option<StreamTap>,
    pending_write: Option<PendingWrite>,
    dropped: bool,
    bytes_read: u64,
    bytes_written: u64,
}

struct PendingWrite {
    data: Vec<u8>,
    written: usize,
}

impl<S> InspectionStream<S> {
    /// Wrap `inner` with no taps registered.
    pub fn new(inner: S, message: Arc<HttpMessageInfo>) -> Self {
        Self {
            inner,
            message,
            on_read: None,
            on_write: None,
            pending_write: None,
            dropped: false,
            bytes_read: 0,
            bytes_written: 0,
        }
    }

    /// Wrap `inner` with both taps bound to the streamed-inspection callback.
    pub fn with_callbacks(
        inner: S,
        message: Arc<HttpMessageInfo>,
        callbacks: Arc<dyn FilterCallbacks>,
    ) -> Self {
        let tap: StreamTap = Arc::new(move |message, operation, chunk| {
            callbacks.on_stream_chunk(message, operation, chunk)
        });
        Self::new(inner, message)
            .on_read(tap.clone())
            .on_write(tap)
    }

    pub fn on_read(mut self, tap: StreamTap) -> Self {
        self.on_read = Some(tap);
        self
    }

    pub fn on_write(mut self, tap: StreamTap) -> Self {
        self.on_write = Some(tap);
        self
    }

    /// The message this stream belongs to.
    pub fn message(&self) -> &HttpMessageInfo {
        &self.message
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Whether a tap has dropped the connection.
    pub fn is_dropped(&self) -> bool {
        self.dropped
    }

    pub fn into_inner(self) -> S {
        self.inner
    }

    fn tap(&mut self, operation: StreamOperation, chunk: &mut [u8]) -> io::Result<()> {
        let tap = match operation {
            StreamOperation::Read => self.on_read.as_ref(),
            StreamOperation::Write => self.on_write.as_ref(),
        };
        let Some(tap) = tap else {
            return Ok(());
        };

        match tap(&self.message, operation, chunk) {
            StreamVerdict::Forward => Ok(()),
            StreamVerdict::DropConnection => {
                tracing::debug!(
                    url = %self.message.url(),
                    operation = ?operation,
                    chunk_len = chunk.len(),
                    "Stream inspection requested connection drop"
                );
                self.dropped = true;
                Err(dropped_error())
            }
        }
    }
}

fn dropped_error() -> io::Error {
    io::Error::new(io::ErrorKind::ConnectionAborted, StreamDropped)
}

impl<S: AsyncRead + Unpin> AsyncRead for InspectionStream<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.dropped {
            return Poll::Ready(Err(dropped_error()));
        }

        let before = buf.filled().len();
        ready!(Pin::new(&mut this.inner).poll_read(cx, buf))?;

        let chunk = &mut buf.filled_mut()[before..];
        if chunk.is_empty() {
            return Poll::Ready(Ok(()));
        }

        this.bytes_read += chunk.len() as u64;
        Poll::Ready(this.tap(StreamOperation::Read, chunk))
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for InspectionStream<S> {
    /// Taps `buf` once, then writes the tapped copy in full before reporting
    /// `buf.len()` bytes as written.
    ///
    /// After `Pending`, the caller must retry with the same buffer, as
    /// `write_all` does. A retry with a buffer of a different length fails
    /// with `InvalidInput` once the pending chunk has been flushed.
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        if this.dropped {
            return Poll::Ready(Err(dropped_error()));
        }
        if buf.is_empty() && this.pending_write.is_none() {
            return Pin::new(&mut this.inner).poll_write(cx, buf);
        }

        if this.pending_write.is_none() {
            let mut data = buf.to_vec();
            this.tap(StreamOperation::Write, &mut data)?;
            this.pending_write = Some(PendingWrite { data, written: 0 });
        }

        while let Some(pending) = this.pending_write.as_mut() {
            if pending.written >= pending.data.len() {
                break;
            }
            let n = ready!(Pin::new(&mut this.inner).poll_write(cx, &pending.data[pending.written..]))?;
            if n == 0 {
                return Poll::Ready(Err(io::ErrorKind::WriteZero.into()));
            }
            pending.written += n;
        }

        let len = this.pending_write.take().map_or(0, |pending| pending.data.len());
        this.bytes_written += len as u64;
        if len != buf.len() {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "write retried with a different buffer while a tapped chunk was pending",
            )));
        }
        Poll::Ready(Ok(len))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

impl<S> fmt::Debug for InspectionStream<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InspectionStream")
            .field("url", &self.message.url().as_str())
            .field("on_read", &self.on_read.is_some())
            .field("on_write", &self.on_write.is_some())
            .field("dropped", &self.dropped)
            .field("bytes_read", &self.bytes_read)
            .field("bytes_written", &self.bytes_written)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use futures_util::FutureExt;
    use http::Method;
    use std::future::poll_fn;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio_util::io::StreamReader;
    use url::Url;

    fn message() -> Arc<HttpMessageInfo> {
        Arc::new(HttpMessageInfo::request(
            Url::parse("http://example.com/").unwrap(),
            Method::POST,
        ))
    }

    fn chunked(chunks: &[&'static [u8]]) -> impl AsyncRead + Unpin {
        let items: Vec<io::Result<Bytes>> =
            chunks.iter().map(|c| Ok(Bytes::from_static(c))).collect();
        StreamReader::new(futures_util::stream::iter(items))
    }

    fn flip() -> StreamTap {
        Arc::new(|_, _, chunk: &mut [u8]| {
            for b in chunk.iter_mut() {
                *b = !*b;
            }
            StreamVerdict::Forward
        })
    }

    #[tokio::test]
    async fn test_read_tap_flips_every_byte() {
        let input: Vec<u8> = (0..=255u8).cycle().take(10_000).collect();
        let mut stream = InspectionStream::new(&input[..], message()).on_read(flip());

        let mut output = Vec::new();
        let copied = tokio::io::copy(&mut stream, &mut output).await.unwrap();

        assert_eq!(copied, input.len() as u64);
        assert_eq!(stream.bytes_read(), input.len() as u64);
        let expected: Vec<u8> = input.iter().map(|b| !b).collect();
        assert_eq!(output, expected);
    }

    #[tokio::test]
    async fn test_chunk_boundaries_preserved_and_no_eof_callback() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let recorder = seen.clone();
        let tap: StreamTap = Arc::new(move |_, op, chunk: &mut [u8]| {
            assert_eq!(op, StreamOperation::Read);
            recorder.lock().unwrap().push(chunk.to_vec());
            StreamVerdict::Forward
        });

        let mut stream =
            InspectionStream::new(chunked(&[b"abc", b"de", b"f"]), message()).on_read(tap);
        let mut out = String::new();
        stream.read_to_string(&mut out).await.unwrap();

        assert_eq!(out, "abcdef");
        let seen = seen.lock().unwrap();
        assert_eq!(*seen, vec![b"abc".to_vec(), b"de".to_vec(), b"f".to_vec()]);
    }

    #[tokio::test]
    async fn test_drop_aborts_copy() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let tap: StreamTap = Arc::new(move |_, _, _: &mut [u8]| {
            if counter.fetch_add(1, Ordering::SeqCst) == 1 {
                StreamVerdict::DropConnection
            } else {
                StreamVerdict::Forward
            }
        });

        let mut stream =
            InspectionStream::new(chunked(&[b"one", b"two", b"three"]), message()).on_read(tap);
        let mut sink = Vec::new();
        let err = tokio::io::copy(&mut stream, &mut sink).await.unwrap_err();

        assert_eq!(err.kind(), io::ErrorKind::ConnectionAborted);
        assert!(err.get_ref().unwrap().is::<StreamDropped>());
        assert!(stream.is_dropped());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(sink, b"one");

        // Poisoned from here on.
        let mut buf = [0u8; 8];
        assert!(stream.read(&mut buf).await.is_err());
    }

    #[tokio::test]
    async fn test_write_tap_rewrites_outgoing_bytes() {
        let mut stream = InspectionStream::new(Vec::new(), message()).on_write(flip());

        stream.write_all(&[0x00, 0x0f, 0xff]).await.unwrap();
        stream.flush().await.unwrap();

        assert_eq!(stream.bytes_written(), 3);
        assert_eq!(stream.into_inner(), vec![0xff, 0xf0, 0x00]);
    }

    #[tokio::test]
    async fn test_write_drop_fails_write() {
        let tap: StreamTap = Arc::new(|_, op, _: &mut [u8]| {
            assert_eq!(op, StreamOperation::Write);
            StreamVerdict::DropConnection
        });
        let mut stream = InspectionStream::new(Vec::new(), message()).on_write(tap);

        let err = stream.write_all(b"blocked").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionAborted);
        assert!(stream.into_inner().is_empty());
    }

    #[tokio::test]
    async fn test_partial_write_completes_on_retry() {
        let (client, mut server) = tokio::io::duplex(4);
        let mut stream = InspectionStream::new(client, message()).on_write(flip());

        let first = poll_fn(|cx| Pin::new(&mut stream).poll_write(cx, b"abcdefgh")).now_or_never();
        assert!(first.is_none());

        let reader = tokio::spawn(async move {
            let mut out = [0u8; 8];
            server.read_exact(&mut out).await.unwrap();
            out
        });
        let written = poll_fn(|cx| Pin::new(&mut stream).poll_write(cx, b"abcdefgh"))
            .await
            .unwrap();

        assert_eq!(written, 8);
        assert_eq!(stream.bytes_written(), 8);
        let expected: Vec<u8> = b"abcdefgh".iter().map(|b| !b).collect();
        assert_eq!(reader.await.unwrap().to_vec(), expected);
    }

    #[tokio::test]
    async fn test_retry_with_other_buffer_is_rejected() {
        let (client, mut server) = tokio::io::duplex(4);
        let mut stream = InspectionStream::new(client, message()).on_write(flip());

        let first = poll_fn(|cx| Pin::new(&mut stream).poll_write(cx, b"abcdefgh")).now_or_never();
        assert!(first.is_none());

        let mut head = [0u8; 4];
        server.read_exact(&mut head).await.unwrap();
        let err = poll_fn(|cx| Pin::new(&mut stream).poll_write(cx, b"ab"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn test_no_taps_is_transparent() {
        let mut stream = InspectionStream::new(&b"plain"[..], message());
        let mut out = Vec::new();
        stream.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"plain");
    }
}
