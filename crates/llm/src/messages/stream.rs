//! Canonical streaming events.
//!
//! Provider adapters translate their wire events into this surface. For a
//! given tool call id the order is `ToolCallStart` → `ToolCallArgsDelta`* →
//! `ToolCallEnd`; when a turn reports usage, `Usage` precedes `Finish`.

use std::pin::Pin;

use futures::Stream;

use super::{FinishReason, Usage};

/// One normalized event from a provider stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Incremental assistant text.
    ContentDelta { text: String },

    /// Incremental reasoning text, on a separate channel from content.
    ReasoningDelta { text: String },

    /// Signature authenticating the reasoning trace. `redacted` marks
    /// server-redacted reasoning whose signature is all that survives.
    ThinkingSignature { signature: String, redacted: bool },

    /// A tool call opened; arguments follow incrementally.
    ToolCallStart { id: String, name: String },

    /// JSON fragment to append to the call's argument buffer.
    ToolCallArgsDelta { id: String, fragment: String },

    /// No more argument fragments for this call.
    ToolCallEnd { id: String },

    /// Token accounting for the turn.
    Usage(Usage),

    /// Terminal event of the turn.
    Finish(FinishReason),
}

/// Sequential stream of normalized events, one turn per stream.
pub type ChatCompletionStream = Pin<Box<dyn Stream<Item = crate::Result<StreamEvent>> + Send>>;
