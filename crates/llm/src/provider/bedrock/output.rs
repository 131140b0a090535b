//! Stream translation for the Bedrock Converse API.
//!
//! Bedrock emits `MessageStop` (carrying the stop reason) *before* the
//! `Metadata` event that carries usage, while downstream consumers assume
//! usage precedes the finish reason. The translator therefore never emits
//! the finish reason on `MessageStop`; it buffers it, waits for metadata,
//! and synthesizes the final usage/finish pair afterwards. If the stream
//! closes with a buffered stop reason and metadata never arrived, the
//! finish reason is flushed anyway.

use std::collections::VecDeque;

use aws_sdk_bedrockruntime::{
    primitives::event_stream::EventReceiver,
    types::{
        ContentBlockDelta, ContentBlockStart, ConverseStreamOutput, ReasoningContentBlockDelta,
        StopReason, TokenUsage, error::ConverseStreamOutputError,
    },
};
use base64::Engine as _;

use crate::{
    error::LlmError,
    messages::{FinishReason, StreamEvent, Usage},
};

type ConverseEventReceiver = EventReceiver<ConverseStreamOutput, ConverseStreamOutputError>;

pub(super) struct ConverseStreamState {
    receiver: ConverseEventReceiver,
    translator: ConverseTranslator,
    done: bool,
}

impl ConverseStreamState {
    pub(super) fn new(receiver: ConverseEventReceiver) -> Self {
        Self {
            receiver,
            translator: ConverseTranslator::default(),
            done: false,
        }
    }

    pub(super) async fn recv(&mut self) -> Option<crate::Result<StreamEvent>> {
        loop {
            if let Some(event) = self.translator.next_ready() {
                return Some(event);
            }

            if self.done {
                return None;
            }

            match self.receiver.recv().await {
                Ok(Some(event)) => self.translator.translate(event),
                Ok(None) => {
                    self.done = true;
                    self.translator.flush_on_close();
                }
                Err(error) => {
                    self.done = true;
                    log::error!("Bedrock stream error: {error:?}");
                    return Some(Err(LlmError::ConnectionError(format!(
                        "Stream error: {error:?}"
                    ))));
                }
            }
        }
    }
}

/// Explicit translation state; the reorder buffer lives here rather than in
/// locals spanning awaits.
#[derive(Debug, Default)]
struct ConverseTranslator {
    pending_finish_reason: Option<FinishReason>,
    pending_usage: Option<Usage>,
    metadata_received: bool,
    current_tool_id: Option<String>,
    current_tool_name: Option<String>,
    queued: VecDeque<crate::Result<StreamEvent>>,
}

impl ConverseTranslator {
    /// Pop a queued event, or synthesize the buffered final pair once both
    /// the stop reason and metadata have been seen.
    fn next_ready(&mut self) -> Option<crate::Result<StreamEvent>> {
        if let Some(event) = self.queued.pop_front() {
            return Some(event);
        }

        if self.metadata_received
            && let Some(reason) = self.pending_finish_reason.take()
        {
            self.metadata_received = false;

            if let Some(usage) = self.pending_usage.take() {
                self.queued.push_back(Ok(StreamEvent::Finish(reason)));
                return Some(Ok(StreamEvent::Usage(usage)));
            }

            return Some(Ok(StreamEvent::Finish(reason)));
        }

        None
    }

    /// The stream closed; flush the buffered stop reason with whatever
    /// usage (possibly none) was seen.
    fn flush_on_close(&mut self) {
        if let Some(reason) = self.pending_finish_reason.take() {
            if let Some(usage) = self.pending_usage.take() {
                self.queued.push_back(Ok(StreamEvent::Usage(usage)));
            }
            self.queued.push_back(Ok(StreamEvent::Finish(reason)));
        }
    }

    fn translate(&mut self, event: ConverseStreamOutput) {
        match event {
            ConverseStreamOutput::MessageStart(_) => {}
            ConverseStreamOutput::ContentBlockStart(start) => {
                if let Some(ContentBlockStart::ToolUse(tool_use)) = start.start() {
                    let id = tool_use.tool_use_id().to_string();
                    let name = tool_use.name().to_string();

                    self.current_tool_id = Some(id.clone());
                    self.current_tool_name = Some(name.clone());
                    self.queued
                        .push_back(Ok(StreamEvent::ToolCallStart { id, name }));
                }
            }
            ConverseStreamOutput::ContentBlockDelta(block_delta) => {
                let Some(delta) = block_delta.delta() else {
                    return;
                };

                match delta {
                    ContentBlockDelta::Text(text) => {
                        self.queued
                            .push_back(Ok(StreamEvent::ContentDelta { text: text.clone() }));
                    }
                    ContentBlockDelta::ToolUse(tool_delta) => {
                        let Some(id) = self.current_tool_id.clone() else {
                            log::warn!("tool argument delta outside a tool_use block; skipping");
                            return;
                        };

                        self.queued.push_back(Ok(StreamEvent::ToolCallArgsDelta {
                            id,
                            fragment: tool_delta.input().to_string(),
                        }));
                    }
                    ContentBlockDelta::ReasoningContent(reasoning) => {
                        self.translate_reasoning(reasoning);
                    }
                    other => {
                        log::warn!("Unknown Bedrock content delta: {other:?}");
                    }
                }
            }
            ConverseStreamOutput::ContentBlockStop(_) => {
                if let Some(id) = self.current_tool_id.take() {
                    if let Some(name) = self.current_tool_name.take() {
                        log::debug!("tool call {name} ({id}) arguments complete");
                    }
                    self.queued.push_back(Ok(StreamEvent::ToolCallEnd { id }));
                }
            }
            ConverseStreamOutput::MessageStop(stop) => {
                // Buffered, never emitted here; see the module docs.
                self.pending_finish_reason = Some(map_stop_reason(stop.stop_reason()));
            }
            ConverseStreamOutput::Metadata(metadata) => {
                self.pending_usage = metadata.usage.as_ref().map(convert_usage);
                self.metadata_received = true;
            }
            other => {
                log::warn!("Unknown Bedrock stream event type: {other:?}");
            }
        }
    }

    fn translate_reasoning(&mut self, reasoning: &ReasoningContentBlockDelta) {
        match reasoning {
            ReasoningContentBlockDelta::Text(text) => {
                self.queued
                    .push_back(Ok(StreamEvent::ReasoningDelta { text: text.clone() }));
            }
            ReasoningContentBlockDelta::Signature(signature) => {
                self.queued.push_back(Ok(StreamEvent::ThinkingSignature {
                    signature: signature.clone(),
                    redacted: false,
                }));
            }
            ReasoningContentBlockDelta::RedactedContent(blob) => {
                self.queued.push_back(Ok(StreamEvent::ThinkingSignature {
                    signature: base64::engine::general_purpose::STANDARD.encode(blob.as_ref()),
                    redacted: true,
                }));
            }
            other => {
                // New reasoning delta kinds would silently corrupt the
                // trace; fail the stream instead.
                self.queued.push_back(Err(LlmError::Protocol(format!(
                    "unknown reasoning delta kind: {other:?}"
                ))));
            }
        }
    }
}

fn map_stop_reason(reason: &StopReason) -> FinishReason {
    match reason {
        StopReason::ToolUse => FinishReason::ToolCalls,
        StopReason::EndTurn | StopReason::StopSequence => FinishReason::Stop,
        StopReason::MaxTokens => FinishReason::Length,
        other => {
            log::warn!("Unmapped Bedrock stop reason: {other:?}");
            FinishReason::Stop
        }
    }
}

fn convert_usage(usage: &TokenUsage) -> Usage {
    Usage {
        input_tokens: usage.input_tokens.max(0) as u64,
        output_tokens: usage.output_tokens.max(0) as u64,
        cached_input_tokens: usage.cache_read_input_tokens.unwrap_or_default().max(0) as u64,
        cache_write_tokens: usage.cache_write_input_tokens.unwrap_or_default().max(0) as u64,
        ..Usage::default()
    }
}
