//! Stream translation for the OpenAI Responses-style wire.
//!
//! The server interleaves item lifecycle events, text deltas on several
//! event kinds, and a terminal `response.completed` carrying usage. This
//! module folds them into canonical [`StreamEvent`]s. Tool-call ids live on
//! the output item, while argument deltas only reference the item id, so
//! the state machine keeps an `item_id → call_id` map for the duration of
//! the stream.

use std::collections::HashMap;

use eventsource_stream::Eventsource;
use futures::StreamExt;
use serde::Deserialize;

use crate::{
    error::LlmError,
    messages::{ChatCompletionStream, FinishReason, StreamEvent, Usage},
};

const FUNCTION_CALL_ITEM: &str = "function_call";

#[derive(Debug, Deserialize)]
struct SseEvent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    item_id: Option<String>,
    #[serde(default)]
    item: Option<OutputItem>,
    #[serde(default)]
    delta: Option<String>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    part: Option<Part>,
    #[serde(default)]
    response: Option<ResponsePayload>,
    #[serde(default)]
    error: Option<ErrorPayload>,
}

#[derive(Debug, Deserialize)]
struct OutputItem {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    call_id: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Part {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponsePayload {
    #[serde(default)]
    usage: Option<ResponseUsage>,
    #[serde(default)]
    output: Vec<OutputItem>,
}

#[derive(Debug, Deserialize)]
struct ResponseUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
    #[serde(default)]
    input_tokens_details: Option<InputTokenDetails>,
    #[serde(default)]
    output_tokens_details: Option<OutputTokenDetails>,
}

#[derive(Debug, Deserialize)]
struct InputTokenDetails {
    #[serde(default)]
    cached_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct OutputTokenDetails {
    #[serde(default)]
    reasoning_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct ErrorPayload {
    #[serde(default)]
    message: Option<String>,
}

/// Wrap a streaming HTTP response into a canonical event stream.
pub(super) fn event_stream(response: reqwest::Response) -> ChatCompletionStream {
    let mut state = ResponsesStreamState::default();

    let stream = response
        .bytes_stream()
        .eventsource()
        .map(move |event| {
            let events = match event {
                Ok(event) if event.data == "[DONE]" => Vec::new(),
                Ok(event) => state.translate(&event.data),
                Err(error) => {
                    log::warn!("SSE parsing error in OpenAI stream: {error}");
                    Vec::new()
                }
            };

            futures::stream::iter(events)
        })
        .flatten();

    Box::pin(stream)
}

#[derive(Debug, Default)]
pub(super) struct ResponsesStreamState {
    /// item_id → call_id, populated by `output_item.added`.
    call_ids: HashMap<String, String>,
    /// item_id → whether a text delta was already emitted for the item;
    /// guards against double-emitting when `content_part.added` repeats
    /// text that also arrives as deltas.
    has_content: HashMap<String, bool>,
}

impl ResponsesStreamState {
    pub(super) fn translate(&mut self, data: &str) -> Vec<crate::Result<StreamEvent>> {
        let event: SseEvent = match sonic_rs::from_str(data) {
            Ok(event) => event,
            Err(error) => {
                log::warn!("Failed to parse OpenAI streaming chunk: {error}");
                return Vec::new();
            }
        };

        match event.kind.as_str() {
            "response.output_item.added" => self.on_item_added(event),
            "response.output_item.done" => self.on_item_done(event),
            "response.function_call_arguments.delta" => self.on_arguments_delta(event),
            "response.output_text.delta"
            | "response.content_part.added"
            | "response.content_part.delta" => self.on_text(event),
            "response.reasoning_text.delta" | "response.reasoning_summary_text.delta" => event
                .delta
                .filter(|text| !text.is_empty())
                .map(|text| vec![Ok(StreamEvent::ReasoningDelta { text })])
                .unwrap_or_default(),
            "response.completed" => on_completed(event),
            "response.failed" | "error" => {
                let message = event
                    .error
                    .and_then(|error| error.message)
                    .unwrap_or_else(|| "provider reported a failed response".to_string());
                vec![Err(LlmError::Protocol(message))]
            }
            other => {
                log::debug!("ignoring OpenAI stream event: {other}");
                Vec::new()
            }
        }
    }

    fn on_item_added(&mut self, event: SseEvent) -> Vec<crate::Result<StreamEvent>> {
        let Some(item) = event.item else {
            return Vec::new();
        };

        if item.kind != FUNCTION_CALL_ITEM {
            return Vec::new();
        }

        // Servers disagree on where the id lives; take the first present.
        let Some(call_id) = item
            .call_id
            .clone()
            .or_else(|| item.id.clone())
            .or_else(|| event.item_id.clone())
        else {
            log::warn!("function_call item without any id; skipping");
            return Vec::new();
        };

        let item_key = item
            .id
            .or(event.item_id)
            .unwrap_or_else(|| call_id.clone());
        self.call_ids.insert(item_key, call_id.clone());

        vec![Ok(StreamEvent::ToolCallStart {
            id: call_id,
            name: item.name.unwrap_or_default(),
        })]
    }

    fn on_item_done(&mut self, event: SseEvent) -> Vec<crate::Result<StreamEvent>> {
        let Some(item) = event.item else {
            return Vec::new();
        };

        if item.kind != FUNCTION_CALL_ITEM {
            return Vec::new();
        }

        let id = item
            .id
            .as_ref()
            .or(event.item_id.as_ref())
            .and_then(|key| self.call_ids.get(key))
            .cloned()
            .or(item.call_id);

        match id {
            Some(id) => vec![Ok(StreamEvent::ToolCallEnd { id })],
            None => Vec::new(),
        }
    }

    fn on_arguments_delta(&mut self, event: SseEvent) -> Vec<crate::Result<StreamEvent>> {
        let Some(fragment) = event.delta else {
            return Vec::new();
        };

        let id = event
            .item_id
            .as_ref()
            .and_then(|key| self.call_ids.get(key))
            .cloned()
            .or(event.item_id);

        let Some(id) = id else {
            log::warn!("argument delta without a resolvable call id; skipping");
            return Vec::new();
        };

        vec![Ok(StreamEvent::ToolCallArgsDelta { id, fragment })]
    }

    fn on_text(&mut self, event: SseEvent) -> Vec<crate::Result<StreamEvent>> {
        let item_key = event.item_id.clone().unwrap_or_default();
        let part_added = event.kind == "response.content_part.added";

        // Text may arrive on any of these fields depending on the event kind.
        let text = event
            .delta
            .or(event.text)
            .or(event.code)
            .or_else(|| event.part.and_then(|part| part.text));

        let Some(text) = text.filter(|text| !text.is_empty()) else {
            return Vec::new();
        };

        if part_added && self.has_content.get(&item_key).copied().unwrap_or(false) {
            return Vec::new();
        }

        self.has_content.insert(item_key, true);
        vec![Ok(StreamEvent::ContentDelta { text })]
    }
}

fn on_completed(event: SseEvent) -> Vec<crate::Result<StreamEvent>> {
    let Some(response) = event.response else {
        return vec![Ok(StreamEvent::Finish(FinishReason::Stop))];
    };

    let mut events = Vec::new();

    if let Some(usage) = response.usage {
        let cached = usage
            .input_tokens_details
            .map(|details| details.cached_tokens)
            .unwrap_or_default();
        let reasoning = usage
            .output_tokens_details
            .map(|details| details.reasoning_tokens)
            .unwrap_or_default();

        // The raw input count includes cache hits; report fresh input only.
        events.push(Ok(StreamEvent::Usage(Usage {
            input_tokens: usage.input_tokens.saturating_sub(cached),
            output_tokens: usage.output_tokens,
            cached_input_tokens: cached,
            reasoning_tokens: reasoning,
            ..Usage::default()
        })));
    }

    let finish = if response
        .output
        .iter()
        .any(|item| item.kind == FUNCTION_CALL_ITEM)
    {
        FinishReason::ToolCalls
    } else {
        FinishReason::Stop
    };

    events.push(Ok(StreamEvent::Finish(finish)));
    events
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(state: &mut ResponsesStreamState, payloads: &[&str]) -> Vec<StreamEvent> {
        payloads
            .iter()
            .flat_map(|payload| state.translate(payload))
            .map(|event| event.expect("stream event"))
            .collect()
    }

    #[test]
    fn tool_call_lifecycle_uses_the_call_id() {
        let mut state = ResponsesStreamState::default();

        let events = drain(
            &mut state,
            &[
                r#"{"type":"response.output_item.added","item_id":"item_1","item":{"type":"function_call","id":"item_1","call_id":"call_9","name":"add"}}"#,
                r#"{"type":"response.function_call_arguments.delta","item_id":"item_1","delta":"{\"a\":1"}"#,
                r#"{"type":"response.function_call_arguments.delta","item_id":"item_1","delta":",\"b\":2}"}"#,
                r#"{"type":"response.output_item.done","item_id":"item_1","item":{"type":"function_call","id":"item_1","call_id":"call_9"}}"#,
            ],
        );

        assert_eq!(
            events,
            vec![
                StreamEvent::ToolCallStart {
                    id: "call_9".into(),
                    name: "add".into(),
                },
                StreamEvent::ToolCallArgsDelta {
                    id: "call_9".into(),
                    fragment: "{\"a\":1".into(),
                },
                StreamEvent::ToolCallArgsDelta {
                    id: "call_9".into(),
                    fragment: ",\"b\":2}".into(),
                },
                StreamEvent::ToolCallEnd {
                    id: "call_9".into(),
                },
            ]
        );
    }

    #[test]
    fn call_id_falls_back_to_item_then_event_id() {
        let mut state = ResponsesStreamState::default();

        let events = drain(
            &mut state,
            &[r#"{"type":"response.output_item.added","item_id":"item_7","item":{"type":"function_call","name":"grep"}}"#],
        );

        assert_eq!(
            events,
            vec![StreamEvent::ToolCallStart {
                id: "item_7".into(),
                name: "grep".into(),
            }]
        );
    }

    #[test]
    fn completed_reports_usage_before_finish_and_subtracts_cache() {
        let mut state = ResponsesStreamState::default();

        let events = drain(
            &mut state,
            &[
                r#"{"type":"response.output_text.delta","item_id":"msg_1","delta":"pong"}"#,
                r#"{"type":"response.completed","response":{"usage":{"input_tokens":100,"output_tokens":3,"input_tokens_details":{"cached_tokens":60}},"output":[{"type":"message","id":"msg_1"}]}}"#,
            ],
        );

        assert_eq!(
            events,
            vec![
                StreamEvent::ContentDelta { text: "pong".into() },
                StreamEvent::Usage(Usage {
                    input_tokens: 40,
                    output_tokens: 3,
                    cached_input_tokens: 60,
                    ..Usage::default()
                }),
                StreamEvent::Finish(FinishReason::Stop),
            ]
        );
    }

    #[test]
    fn completed_scans_output_for_tool_calls() {
        let mut state = ResponsesStreamState::default();

        let events = drain(
            &mut state,
            &[r#"{"type":"response.completed","response":{"output":[{"type":"function_call","call_id":"call_1"}]}}"#],
        );

        assert_eq!(events, vec![StreamEvent::Finish(FinishReason::ToolCalls)]);
    }

    #[test]
    fn content_part_added_does_not_duplicate_streamed_text() {
        let mut state = ResponsesStreamState::default();

        let events = drain(
            &mut state,
            &[
                r#"{"type":"response.output_text.delta","item_id":"msg_1","delta":"hel"}"#,
                r#"{"type":"response.content_part.added","item_id":"msg_1","part":{"text":"hel"}}"#,
                r#"{"type":"response.output_text.delta","item_id":"msg_1","delta":"lo"}"#,
            ],
        );

        assert_eq!(
            events,
            vec![
                StreamEvent::ContentDelta { text: "hel".into() },
                StreamEvent::ContentDelta { text: "lo".into() },
            ]
        );
    }

    #[test]
    fn reasoning_deltas_stay_on_their_own_channel() {
        let mut state = ResponsesStreamState::default();

        let events = drain(
            &mut state,
            &[
                r#"{"type":"response.reasoning_text.delta","item_id":"rs_1","delta":"thinking"}"#,
                r#"{"type":"response.output_text.delta","item_id":"msg_1","delta":"answer"}"#,
            ],
        );

        assert_eq!(
            events,
            vec![
                StreamEvent::ReasoningDelta {
                    text: "thinking".into(),
                },
                StreamEvent::ContentDelta {
                    text: "answer".into(),
                },
            ]
        );
    }

    #[test]
    fn failed_response_surfaces_a_protocol_error() {
        let mut state = ResponsesStreamState::default();

        let events =
            state.translate(r#"{"type":"response.failed","error":{"message":"server overloaded"}}"#);

        assert!(matches!(
            events.as_slice(),
            [Err(LlmError::Protocol(message))] if message == "server overloaded"
        ));
    }
}
