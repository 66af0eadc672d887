//! Decision protocol between callbacks and the transaction orchestrator.

use std::fmt;

/// What the proxy should do next with a message.
///
/// Returned by every message-level callback. The orchestrator branches on
/// it at each checkpoint; nothing else carries the decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ProxyNextAction {
    /// Stream through verbatim. No body callback fires, and when returned for
    /// a request the response-begin checkpoint is skipped too.
    #[default]
    AllowAndIgnoreContentAndResponse,
    /// Buffer the whole body (capped) and hand it to the whole-body callback.
    AllowButRequestContentInspection,
    /// Tap every body chunk as it flows.
    AllowButRequestStreamedContentInspection,
    /// Stop here. The callback's message info becomes the client's response.
    DropConnection,
}

impl ProxyNextAction {
    pub fn is_drop(self) -> bool {
        self == ProxyNextAction::DropConnection
    }

    /// Short label for logs and metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            ProxyNextAction::AllowAndIgnoreContentAndResponse => "ignore",
            ProxyNextAction::AllowButRequestContentInspection => "whole_body",
            ProxyNextAction::AllowButRequestStreamedContentInspection => "streamed",
            ProxyNextAction::DropConnection => "drop",
        }
    }
}

impl fmt::Display for ProxyNextAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Direction of a tapped stream operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamOperation {
    Read,
    Write,
}

/// Answer from a stream tap for one chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StreamVerdict {
    /// Forward the (possibly mutated) chunk.
    #[default]
    Forward,
    /// Terminate the connection immediately.
    DropConnection,
}
