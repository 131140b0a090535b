//! Events emitted by the runtime to observers.
//!
//! For a given tool call id the order is `ToolCallStart` →
//! `ToolCallArgsDelta`* → `ToolCallEnd` → `ToolCallDispatch`* →
//! `ToolCallResponse`. For a given turn, `UsageReport` (if any) precedes
//! `TurnEnd`.

use llm::messages::{FinishReason, ToolCall, ToolCallResult, Usage};

/// Lifecycle status of one dispatched tool call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolCallStatus {
    Pending,
    /// Waiting for the host's approve/deny decision.
    Confirmation,
    Running,
    Completed,
    Error,
}

/// Why the active agent changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchReason {
    /// In-run replacement of the active agent.
    Handoff,
    /// Synchronous delegation to a sub-agent and back.
    Transfer,
}

/// One observable step of a run.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    StreamStart {
        agent: String,
    },
    TextDelta {
        agent: String,
        text: String,
    },
    ReasoningDelta {
        agent: String,
        text: String,
    },
    ToolCallStart {
        agent: String,
        tool_call: ToolCall,
    },
    ToolCallArgsDelta {
        agent: String,
        id: String,
        fragment: String,
    },
    ToolCallEnd {
        agent: String,
        id: String,
    },
    ToolCallDispatch {
        agent: String,
        id: String,
        status: ToolCallStatus,
    },
    ToolCallResponse {
        agent: String,
        id: String,
        result: ToolCallResult,
        status: ToolCallStatus,
    },
    AgentSwitch {
        from: String,
        to: String,
        reason: SwitchReason,
    },
    UsageReport {
        agent: String,
        usage: Usage,
    },
    SessionTitle {
        title: String,
    },
    TurnEnd {
        agent: String,
        finish_reason: FinishReason,
    },
    Error {
        kind: &'static str,
        detail: String,
    },
}

/// Synchronous observer of run events.
///
/// Delivery happens on the run task; implementations must not block.
pub trait EventSink: Send + Sync {
    fn on_event(&self, event: &Event);
}
