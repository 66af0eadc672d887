//! Callback contract consumed by the transaction orchestrator.
//!
//! Four extension points, all optional: an implementation overrides only the
//! hooks it cares about and inherits pass-through defaults for the rest. The
//! same contract is meant to be honored by a WebSocket sibling handler.

use async_trait::async_trait;

use crate::http::action::{ProxyNextAction, StreamOperation, StreamVerdict};
use crate::http::message::HttpMessageInfo;

/// Hooks invoked at each checkpoint of a transaction.
#[async_trait]
pub trait FilterCallbacks: Send + Sync {
    /// Fired once per phase (request, then response) before any body is
    /// touched. May edit headers, status, method or URL.
    async fn on_new_message(&self, _message: &mut HttpMessageInfo) -> ProxyNextAction {
        ProxyNextAction::default()
    }

    /// Fired with the complete captured body attached. Only
    /// [`ProxyNextAction::DropConnection`] versus "proceed" is meaningful.
    async fn on_whole_body(&self, _message: &mut HttpMessageInfo) -> ProxyNextAction {
        ProxyNextAction::default()
    }

    /// Fired for every chunk of a streamed body, in both directions.
    ///
    /// Runs inside the body poll, so it must not block. Bytes may be
    /// rewritten in place.
    fn on_stream_chunk(
        &self,
        _message: &HttpMessageInfo,
        _operation: StreamOperation,
        _chunk: &mut [u8],
    ) -> StreamVerdict {
        StreamVerdict::Forward
    }

    /// Fired when the upstream certificate fails validation. Returning
    /// [`ProxyNextAction::DropConnection`] sends the message as the client's
    /// response; anything else fails the transaction like a transport error.
    async fn on_bad_certificate(&self, _message: &mut HttpMessageInfo) -> ProxyNextAction {
        ProxyNextAction::default()
    }
}

/// Callbacks that never intervene.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughCallbacks;

impl FilterCallbacks for PassthroughCallbacks {}
