//! Canonical chat types shared by all provider adapters.

mod chat;
mod stream;

pub use chat::{
    ContentPart, FinishReason, FunctionCall, Message, Role, ToolCall, ToolCallKind, ToolCallResult,
    ToolDefinition, Usage,
};
pub use stream::{ChatCompletionStream, StreamEvent};
