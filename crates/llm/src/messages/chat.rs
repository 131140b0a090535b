//! Canonical message shape every provider adapter converts to and from.
//!
//! Multi-part content, tool calls, and reasoning traces are first-class
//! optional fields so adapters need no side channels. All types round-trip
//! through serde: `decode(encode(msg)) == msg` for any message without an
//! image payload (images decode to provider-side bytes and are lossy by
//! design).

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Message sender role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// One entry of a multi-part message body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text {
        text: String,
    },
    /// Image reference. Only `data:<mime>;base64,<payload>` URLs survive
    /// provider conversion; anything else is dropped there.
    ImageUrl {
        url: String,
    },
}

/// Discriminator for [`ToolCall`]; only function calls exist today.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolCallKind {
    Function,
}

/// The function half of a tool call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    /// Accumulated incrementally during streaming; valid JSON only once the
    /// finish reason has arrived.
    pub arguments: String,
}

/// A model-requested function invocation carried on an assistant message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ToolCallKind,
    pub function: FunctionCall,
}

impl ToolCall {
    pub fn function(id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: ToolCallKind::Function,
            function: FunctionCall {
                name: name.into(),
                arguments: arguments.into(),
            },
        }
    }
}

/// Declarative tool schema, provider-agnostic.
///
/// `input_schema` is a JSON-Schema-like document restricted to `object` at
/// the top level; adapters normalize it before sending (see [`crate::schema`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

impl ToolDefinition {
    pub fn new(name: impl Into<String>, description: impl Into<String>, input_schema: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
            category: None,
            annotations: None,
            display_name: None,
        }
    }
}

/// Outcome of one tool invocation.
///
/// `metadata` is an opaque attachment for consumers (todo lists, directory
/// trees); it never reaches the provider wire.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolCallResult {
    pub output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolCallResult {
    pub fn text(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            metadata: None,
            error: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            output: message.clone(),
            metadata: None,
            error: Some(message),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Token accounting for one turn or one session aggregate.
///
/// Counts are monotonic non-decreasing within a single assistant turn's
/// reported totals.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub cached_input_tokens: u64,
    #[serde(default)]
    pub cache_write_tokens: u64,
    #[serde(default)]
    pub reasoning_tokens: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_length: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_limit: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<f64>,
}

impl Usage {
    /// Fold another report into this one. Token counts accumulate; context
    /// fields describe the latest turn and are replaced.
    pub fn accumulate(&mut self, other: &Usage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.cached_input_tokens += other.cached_input_tokens;
        self.cache_write_tokens += other.cache_write_tokens;
        self.reasoning_tokens += other.reasoning_tokens;
        if other.context_length.is_some() {
            self.context_length = other.context_length;
        }
        if other.context_limit.is_some() {
            self.context_limit = other.context_limit;
        }
        if let Some(cost) = other.cost {
            self.cost = Some(self.cost.unwrap_or_default() + cost);
        }
    }
}

/// Why a turn concluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ToolCalls,
    ContentFilter,
    Other,
}

/// Canonical chat message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,

    #[serde(default)]
    pub content: String,

    /// Ordered multi-part body; takes precedence over `content` when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parts: Option<Vec<ContentPart>>,

    /// Tool calls requested by the model (assistant only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,

    /// Correlates a tool-role message with an earlier assistant tool call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,

    /// Reasoning trace of reasoning-capable models (assistant only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_content: Option<String>,

    /// Server-issued token authenticating the reasoning trace for multi-turn
    /// continuation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking_signature: Option<String>,

    /// Per-message usage snapshot, when usage tracking is enabled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

impl Message {
    fn text(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            parts: None,
            tool_calls: None,
            tool_call_id: None,
            reasoning_content: None,
            thinking_signature: None,
            usage: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::text(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::text(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::text(Role::Assistant, content)
    }

    /// Tool-result message answering the call with the given id.
    pub fn tool(tool_call_id: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(tool_call_id.into()),
            ..Self::text(Role::Tool, output)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(message: &Message) -> Message {
        let encoded = serde_json::to_string(message).unwrap();
        serde_json::from_str(&encoded).unwrap()
    }

    #[test]
    fn plain_message_roundtrip() {
        let message = Message::user("ping");
        assert_eq!(roundtrip(&message), message);
    }

    #[test]
    fn assistant_with_tool_calls_roundtrip() {
        let message = Message {
            tool_calls: Some(vec![ToolCall::function("call_1", "add", r#"{"a":1,"b":2}"#)]),
            ..Message::assistant("")
        };
        assert_eq!(roundtrip(&message), message);
    }

    #[test]
    fn reasoning_fields_roundtrip() {
        let message = Message {
            reasoning_content: Some("think".into()),
            thinking_signature: Some("sig".into()),
            usage: Some(Usage {
                input_tokens: 12,
                output_tokens: 3,
                ..Usage::default()
            }),
            ..Message::assistant("answer")
        };
        assert_eq!(roundtrip(&message), message);
    }

    #[test]
    fn absent_fields_are_not_serialized() {
        let encoded = serde_json::to_value(Message::user("hi")).unwrap();
        let object = encoded.as_object().unwrap();

        assert_eq!(object.keys().collect::<Vec<_>>(), ["content", "role"]);
    }

    #[test]
    fn usage_accumulation_is_monotonic() {
        let mut total = Usage {
            input_tokens: 10,
            output_tokens: 5,
            ..Usage::default()
        };

        total.accumulate(&Usage {
            input_tokens: 7,
            output_tokens: 2,
            cached_input_tokens: 4,
            context_length: Some(19),
            ..Usage::default()
        });

        assert_eq!(total.input_tokens, 17);
        assert_eq!(total.output_tokens, 7);
        assert_eq!(total.cached_input_tokens, 4);
        assert_eq!(total.context_length, Some(19));
    }
}
