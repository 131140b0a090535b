//! Request construction for the Bedrock Converse API.
//!
//! Converts canonical messages into Converse types with no intermediate
//! representation. System messages move into the dedicated system slot,
//! consecutive tool-role messages collapse into a single user message of
//! tool-result blocks, and reasoning blocks precede text so multi-turn
//! extended thinking stays verifiable.

use std::collections::HashMap;

use aws_sdk_bedrockruntime::types::{
    CachePointBlock, CachePointType, ContentBlock, ConversationRole, ImageBlock, ImageFormat,
    ImageSource, InferenceConfiguration, Message as BedrockMessage, ReasoningContentBlock,
    ReasoningTextBlock, SystemContentBlock, Tool, ToolConfiguration, ToolInputSchema,
    ToolResultBlock, ToolResultContentBlock, ToolSpecification, ToolUseBlock,
};
use aws_smithy_types::{Blob, Document};
use base64::Engine as _;
use serde_json::Value as SerdeValue;
use sonic_rs::JsonValueTrait;

use config::ModelConfig;

use crate::{
    error::LlmError,
    messages::{ContentPart, FunctionCall, Message, Role, ToolCall, ToolDefinition},
    provider::{RequestOptions, parse_data_url},
    schema,
};

/// Claude rejects thinking budgets under this floor.
const MIN_THINKING_TOKENS: u32 = 1024;

const INTERLEAVED_THINKING_BETA: &str = "interleaved-thinking-2025-05-14";

pub(super) struct ConverseRequest {
    pub system: Option<Vec<SystemContentBlock>>,
    pub messages: Vec<BedrockMessage>,
    pub inference_config: Option<InferenceConfiguration>,
    pub tool_config: Option<ToolConfiguration>,
    pub additional_fields: Option<Document>,
}

impl ConverseRequest {
    pub(super) fn build(
        config: &ModelConfig,
        caching_supported: bool,
        messages: Vec<Message>,
        tools: Vec<ToolDefinition>,
        options: RequestOptions,
    ) -> crate::Result<Self> {
        let caching = caching_supported && !config.disable_prompt_caching();
        let max_tokens = options.max_tokens.or(config.max_tokens);
        let thinking = thinking_tokens(config, max_tokens);

        let (system, bedrock_messages) = convert_messages(messages, caching);
        let inference_config =
            build_inference_config(config, options, max_tokens, thinking.is_some());
        let tool_config = convert_tools(tools, caching)?;
        let additional_fields =
            thinking.map(|budget| thinking_fields(budget, config.interleaved_thinking()));

        Ok(Self {
            system,
            messages: bedrock_messages,
            inference_config,
            tool_config,
            additional_fields,
        })
    }
}

/// Thinking is enabled at ≥ 1024 budget tokens, and only when the budget
/// stays strictly under `max_tokens` (when one is set).
fn thinking_tokens(config: &ModelConfig, max_tokens: Option<u32>) -> Option<u32> {
    let tokens = config.thinking_budget.as_ref()?.tokens?;

    if tokens < MIN_THINKING_TOKENS {
        return None;
    }

    if let Some(max) = max_tokens
        && tokens >= max
    {
        return None;
    }

    Some(tokens)
}

fn thinking_fields(budget: u32, interleaved: bool) -> Document {
    let mut thinking = HashMap::new();
    thinking.insert("type".to_string(), Document::String("enabled".to_string()));
    thinking.insert(
        "budget_tokens".to_string(),
        Document::Number(aws_smithy_types::Number::PosInt(u64::from(budget))),
    );

    let mut fields = HashMap::new();
    fields.insert("thinking".to_string(), Document::Object(thinking));

    if interleaved {
        fields.insert(
            "anthropic_beta".to_string(),
            Document::Array(vec![Document::String(INTERLEAVED_THINKING_BETA.to_string())]),
        );
    }

    Document::Object(fields)
}

/// Build inference configuration from individual parameters.
///
/// Claude requires default sampling with thinking enabled, so temperature
/// and top_p are suppressed in that case.
fn build_inference_config(
    config: &ModelConfig,
    options: RequestOptions,
    max_tokens: Option<u32>,
    thinking: bool,
) -> Option<InferenceConfiguration> {
    let mut builder = InferenceConfiguration::builder();
    let mut has_config = false;

    if let Some(max_tokens) = max_tokens {
        builder = builder.max_tokens(max_tokens as i32);
        has_config = true;
    }

    if !thinking {
        if let Some(temperature) = options.temperature.or(config.temperature) {
            builder = builder.temperature(temperature);
            has_config = true;
        }

        if let Some(top_p) = config.top_p {
            builder = builder.top_p(top_p);
            has_config = true;
        }
    }

    if has_config { Some(builder.build()) } else { None }
}

/// Convert canonical messages to Converse format.
///
/// System messages are extracted into the system slot. Consecutive tool-role
/// messages become one user-role message whose content is the list of
/// tool-result blocks; other messages keep their position.
fn convert_messages(
    messages: Vec<Message>,
    caching: bool,
) -> (Option<Vec<SystemContentBlock>>, Vec<BedrockMessage>) {
    let mut system = Vec::new();
    let mut conversation: Vec<(ConversationRole, Vec<ContentBlock>)> = Vec::new();
    let mut pending_results: Vec<ContentBlock> = Vec::new();

    for message in messages {
        match message.role {
            Role::System => {
                system.push(SystemContentBlock::Text(message.content));
            }
            Role::Tool => {
                if let Some(block) = tool_result_block(message) {
                    pending_results.push(block);
                }
            }
            Role::User | Role::Assistant => {
                if !pending_results.is_empty() {
                    conversation
                        .push((ConversationRole::User, std::mem::take(&mut pending_results)));
                }

                let role = if message.role == Role::User {
                    ConversationRole::User
                } else {
                    ConversationRole::Assistant
                };

                let blocks = message_blocks(message);
                if !blocks.is_empty() {
                    conversation.push((role, blocks));
                }
            }
        }
    }

    if !pending_results.is_empty() {
        conversation.push((ConversationRole::User, pending_results));
    }

    if caching {
        if !system.is_empty()
            && let Some(point) = cache_point()
        {
            system.push(SystemContentBlock::CachePoint(point));
        }

        // Checkpoint the last two conversation messages.
        let len = conversation.len();
        for (index, (_, blocks)) in conversation.iter_mut().enumerate() {
            if index + 2 >= len
                && let Some(point) = cache_point()
            {
                blocks.push(ContentBlock::CachePoint(point));
            }
        }
    }

    let messages = conversation
        .into_iter()
        .filter_map(|(role, blocks)| {
            BedrockMessage::builder()
                .role(role)
                .set_content(Some(blocks))
                .build()
                .ok()
        })
        .collect();

    let system = if system.is_empty() { None } else { Some(system) };

    (system, messages)
}

fn cache_point() -> Option<CachePointBlock> {
    CachePointBlock::builder()
        .r#type(CachePointType::Default)
        .build()
        .ok()
}

fn tool_result_block(message: Message) -> Option<ContentBlock> {
    let Some(tool_call_id) = message.tool_call_id else {
        log::warn!("tool-role message without a tool_call_id; dropping");
        return None;
    };

    ToolResultBlock::builder()
        .tool_use_id(tool_call_id)
        .content(ToolResultContentBlock::Text(message.content))
        .build()
        .ok()
        .map(ContentBlock::ToolResult)
}

fn message_blocks(message: Message) -> Vec<ContentBlock> {
    let Message {
        content,
        parts,
        tool_calls,
        reasoning_content,
        thinking_signature,
        ..
    } = message;

    let mut blocks = Vec::new();

    // Reasoning precedes text; the signature is required for replay.
    match (reasoning_content, thinking_signature) {
        (Some(text), Some(signature)) => {
            if let Ok(reasoning) = ReasoningTextBlock::builder()
                .text(text)
                .signature(signature)
                .build()
            {
                blocks.push(ContentBlock::ReasoningContent(
                    ReasoningContentBlock::ReasoningText(reasoning),
                ));
            }
        }
        (None, Some(signature)) => {
            // Content was redacted server-side; replay the opaque payload.
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(&signature)
                .unwrap_or_else(|_| signature.into_bytes());
            blocks.push(ContentBlock::ReasoningContent(
                ReasoningContentBlock::RedactedContent(Blob::new(bytes)),
            ));
        }
        (Some(_), None) => {
            log::debug!("dropping unsigned reasoning content from assistant message");
        }
        (None, None) => {}
    }

    match parts {
        Some(parts) => {
            for part in parts {
                match part {
                    ContentPart::Text { text } => {
                        if !text.is_empty() {
                            blocks.push(ContentBlock::Text(text));
                        }
                    }
                    ContentPart::ImageUrl { url } => {
                        if let Some(block) = image_block(&url) {
                            blocks.push(block);
                        }
                    }
                }
            }
        }
        None => {
            if !content.is_empty() {
                blocks.push(ContentBlock::Text(content));
            }
        }
    }

    for call in tool_calls.into_iter().flatten() {
        if let Some(block) = tool_call_to_content_block(call) {
            blocks.push(block);
        }
    }

    blocks
}

fn image_block(url: &str) -> Option<ContentBlock> {
    let image = parse_data_url(url)?;

    let format = match image.mime.as_str() {
        "image/png" => ImageFormat::Png,
        "image/gif" => ImageFormat::Gif,
        "image/webp" => ImageFormat::Webp,
        "image/jpeg" | "image/jpg" => ImageFormat::Jpeg,
        other => {
            log::debug!("unknown image mime type {other}; defaulting to jpeg");
            ImageFormat::Jpeg
        }
    };

    ImageBlock::builder()
        .format(format)
        .source(ImageSource::Bytes(Blob::new(image.bytes)))
        .build()
        .ok()
        .map(ContentBlock::Image)
}

fn tool_call_to_content_block(call: ToolCall) -> Option<ContentBlock> {
    let ToolCall {
        id,
        kind: _,
        function,
    } = call;

    let FunctionCall { name, arguments } = function;

    let input = match sonic_rs::from_str::<sonic_rs::Value>(&arguments) {
        Ok(value) if value.is_object() => json_value_to_document(value),
        Ok(_) | Err(_) => {
            log::debug!("Bedrock tool_use arguments fall back to string: id={id} name={name}");
            Document::String(arguments)
        }
    };

    ToolUseBlock::builder()
        .tool_use_id(id)
        .name(name)
        .input(input)
        .build()
        .map(ContentBlock::ToolUse)
        .ok()
}

/// Convert canonical tools to Bedrock format.
fn convert_tools(tools: Vec<ToolDefinition>, caching: bool) -> crate::Result<Option<ToolConfiguration>> {
    if tools.is_empty() {
        return Ok(None);
    }

    let mut bedrock_tools = Vec::with_capacity(tools.len() + 1);

    for tool in tools {
        let normalized = schema::normalize(&tool.input_schema);
        let input_schema = ToolInputSchema::Json(serde_value_to_document(normalized));

        let tool_spec = ToolSpecification::builder()
            .name(tool.name)
            .description(tool.description)
            .input_schema(input_schema)
            .build()
            .map_err(|e| LlmError::InvalidRequest(format!("Failed to build tool specification: {e}")))?;

        bedrock_tools.push(Tool::ToolSpec(tool_spec));
    }

    if caching && let Some(point) = cache_point() {
        bedrock_tools.push(Tool::CachePoint(point));
    }

    ToolConfiguration::builder()
        .set_tools(Some(bedrock_tools))
        .build()
        .map(Some)
        .map_err(|e| LlmError::InvalidRequest(format!("Failed to build tool configuration: {e}")))
}

/// Convert sonic_rs::Value to aws_smithy_types::Document.
fn json_value_to_document(value: sonic_rs::Value) -> Document {
    use sonic_rs::{JsonContainerTrait, JsonNumberTrait};

    if value.is_null() {
        Document::Null
    } else if let Some(b) = value.as_bool() {
        Document::Bool(b)
    } else if let Some(n) = value.as_number() {
        if let Some(u) = n.as_u64() {
            Document::Number(aws_smithy_types::Number::PosInt(u))
        } else if let Some(i) = n.as_i64() {
            Document::Number(aws_smithy_types::Number::NegInt(i))
        } else if let Some(f) = n.as_f64() {
            Document::Number(aws_smithy_types::Number::Float(f))
        } else {
            Document::Null
        }
    } else if let Some(s) = value.as_str() {
        Document::String(s.to_string())
    } else if let Some(arr) = value.as_array() {
        Document::Array(arr.iter().map(|v| json_value_to_document(v.clone())).collect())
    } else if let Some(obj) = value.as_object() {
        Document::Object(
            obj.iter()
                .map(|(k, v)| (k.to_string(), json_value_to_document(v.clone())))
                .collect(),
        )
    } else {
        Document::Null
    }
}

fn serde_value_to_document(value: SerdeValue) -> Document {
    match value {
        SerdeValue::Null => Document::Null,
        SerdeValue::Bool(b) => Document::Bool(b),
        SerdeValue::Number(num) => {
            if let Some(u) = num.as_u64() {
                Document::Number(aws_smithy_types::Number::PosInt(u))
            } else if let Some(i) = num.as_i64() {
                Document::Number(aws_smithy_types::Number::NegInt(i))
            } else if let Some(f) = num.as_f64() {
                Document::Number(aws_smithy_types::Number::Float(f))
            } else {
                Document::Null
            }
        }
        SerdeValue::String(s) => Document::String(s),
        SerdeValue::Array(items) => {
            Document::Array(items.into_iter().map(serde_value_to_document).collect())
        }
        SerdeValue::Object(map) => Document::Object(
            map.into_iter()
                .map(|(k, v)| (k, serde_value_to_document(v)))
                .collect(),
        ),
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::panic)]

    use super::*;
    use base64::Engine as _;
    use config::{ProviderKind, ThinkingBudget};

    fn base_config() -> ModelConfig {
        ModelConfig::new(ProviderKind::Bedrock, "us.anthropic.claude-sonnet-4-20250514-v1:0")
    }

    fn build(messages: Vec<Message>) -> ConverseRequest {
        ConverseRequest::build(
            &base_config(),
            false,
            messages,
            Vec::new(),
            RequestOptions::default(),
        )
        .expect("request")
    }

    fn thinking_config(tokens: u32, max_tokens: Option<u32>) -> ModelConfig {
        let mut config = base_config();
        config.max_tokens = max_tokens;
        config.temperature = Some(0.7);
        config.thinking_budget = Some(ThinkingBudget {
            tokens: Some(tokens),
            effort: None,
        });
        config
    }

    #[test]
    fn consecutive_tool_results_group_into_one_user_message() {
        let request = build(vec![
            Message::user("what next?"),
            Message {
                tool_calls: Some(vec![
                    ToolCall::function("t1", "read", "{}"),
                    ToolCall::function("t2", "grep", "{}"),
                ]),
                ..Message::assistant("")
            },
            Message::tool("t1", "a"),
            Message::tool("t2", "b"),
            Message::user("next"),
        ]);

        let roles: Vec<_> = request.messages.iter().map(|m| m.role().clone()).collect();
        assert_eq!(
            roles,
            vec![
                ConversationRole::User,
                ConversationRole::Assistant,
                ConversationRole::User,
                ConversationRole::User,
            ]
        );

        let results = request.messages[2].content();
        assert_eq!(results.len(), 2);
        assert!(results
            .iter()
            .all(|block| matches!(block, ContentBlock::ToolResult(_))));

        let assistant = request.messages[1].content();
        assert_eq!(assistant.len(), 2);
        assert!(assistant
            .iter()
            .all(|block| matches!(block, ContentBlock::ToolUse(_))));
    }

    #[test]
    fn system_messages_move_into_the_system_slot() {
        let request = build(vec![Message::system("be brief"), Message::user("hi")]);

        let system = request.system.expect("system blocks");
        assert!(matches!(&system[0], SystemContentBlock::Text(text) if text == "be brief"));
        assert_eq!(request.messages.len(), 1);
    }

    #[test]
    fn signed_reasoning_precedes_text() {
        let request = build(vec![Message {
            reasoning_content: Some("think".into()),
            thinking_signature: Some("sig".into()),
            ..Message::assistant("answer")
        }]);

        let blocks = request.messages[0].content();
        assert_eq!(blocks.len(), 2);

        let ContentBlock::ReasoningContent(ReasoningContentBlock::ReasoningText(reasoning)) =
            &blocks[0]
        else {
            panic!("expected reasoning block first");
        };
        assert_eq!(reasoning.text(), "think");
        assert_eq!(reasoning.signature(), Some("sig"));

        assert!(matches!(&blocks[1], ContentBlock::Text(text) if text == "answer"));
    }

    #[test]
    fn signature_only_becomes_redacted_reasoning() {
        let request = build(vec![Message {
            thinking_signature: Some(base64::engine::general_purpose::STANDARD.encode(b"opaque")),
            ..Message::assistant("answer")
        }]);

        let blocks = request.messages[0].content();
        let ContentBlock::ReasoningContent(ReasoningContentBlock::RedactedContent(blob)) =
            &blocks[0]
        else {
            panic!("expected redacted reasoning block");
        };
        assert_eq!(blob.as_ref(), b"opaque");
    }

    #[test]
    fn unsigned_reasoning_is_omitted() {
        let request = build(vec![Message {
            reasoning_content: Some("think".into()),
            ..Message::assistant("answer")
        }]);

        let blocks = request.messages[0].content();
        assert_eq!(blocks.len(), 1);
        assert!(matches!(&blocks[0], ContentBlock::Text(_)));
    }

    #[test]
    fn invalid_images_are_dropped_and_text_preserved() {
        let request = build(vec![Message {
            parts: Some(vec![
                ContentPart::Text {
                    text: "look:".into(),
                },
                ContentPart::ImageUrl {
                    url: "https://example.com/cat.png".into(),
                },
                ContentPart::ImageUrl {
                    url: "data:image/png;base64,aGVsbG8=".into(),
                },
            ]),
            ..Message::user("")
        }]);

        let blocks = request.messages[0].content();
        assert_eq!(blocks.len(), 2);
        assert!(matches!(&blocks[0], ContentBlock::Text(text) if text == "look:"));

        let ContentBlock::Image(image) = &blocks[1] else {
            panic!("expected image block");
        };
        assert_eq!(image.format(), &ImageFormat::Png);
    }

    #[test]
    fn unknown_mime_defaults_to_jpeg() {
        let request = build(vec![Message {
            parts: Some(vec![ContentPart::ImageUrl {
                url: "data:image/tiff;base64,aGVsbG8=".into(),
            }]),
            ..Message::user("")
        }]);

        let ContentBlock::Image(image) = &request.messages[0].content()[0] else {
            panic!("expected image block");
        };
        assert_eq!(image.format(), &ImageFormat::Jpeg);
    }

    #[test]
    fn cache_points_annotate_system_tail_messages_and_tools() {
        let tools = vec![ToolDefinition::new(
            "read",
            "Read a file",
            serde_json::json!({ "type": "object", "properties": {} }),
        )];

        let request = ConverseRequest::build(
            &base_config(),
            true,
            vec![
                Message::system("be brief"),
                Message::user("one"),
                Message::assistant("two"),
                Message::user("three"),
            ],
            tools,
            RequestOptions::default(),
        )
        .expect("request");

        let system = request.system.expect("system");
        assert!(matches!(system.last(), Some(SystemContentBlock::CachePoint(_))));

        // Only the last two conversation messages carry a marker.
        let marked: Vec<bool> = request
            .messages
            .iter()
            .map(|message| {
                message
                    .content()
                    .iter()
                    .any(|block| matches!(block, ContentBlock::CachePoint(_)))
            })
            .collect();
        assert_eq!(marked, vec![false, true, true]);

        let tool_config = request.tool_config.expect("tool config");
        assert!(matches!(tool_config.tools().last(), Some(Tool::CachePoint(_))));
    }

    #[test]
    fn caching_disabled_by_provider_opts() {
        let mut config = base_config();
        config
            .provider_opts
            .insert("disable_prompt_caching".into(), serde_json::json!(true));

        let request = ConverseRequest::build(
            &config,
            true,
            vec![Message::system("s"), Message::user("u")],
            Vec::new(),
            RequestOptions::default(),
        )
        .expect("request");

        let system = request.system.expect("system");
        assert!(system
            .iter()
            .all(|block| !matches!(block, SystemContentBlock::CachePoint(_))));
    }

    #[test]
    fn thinking_enables_at_the_floor() {
        assert_eq!(thinking_tokens(&thinking_config(1023, None), None), None);
        assert_eq!(
            thinking_tokens(&thinking_config(1024, None), None),
            Some(1024)
        );
    }

    #[test]
    fn thinking_disabled_when_budget_reaches_max_tokens() {
        let config = thinking_config(4096, Some(4096));
        assert_eq!(thinking_tokens(&config, config.max_tokens), None);

        let config = thinking_config(2048, Some(4096));
        assert_eq!(thinking_tokens(&config, config.max_tokens), Some(2048));
    }

    #[test]
    fn thinking_suppresses_sampling_parameters() {
        let config = thinking_config(2048, Some(4096));
        let request = ConverseRequest::build(
            &config,
            false,
            vec![Message::user("hi")],
            Vec::new(),
            RequestOptions::default(),
        )
        .expect("request");

        let inference = request.inference_config.expect("inference config");
        assert_eq!(inference.max_tokens(), Some(4096));
        assert_eq!(inference.temperature(), None);
        assert_eq!(inference.top_p(), None);

        let Some(Document::Object(fields)) = request.additional_fields else {
            panic!("expected additional model request fields");
        };
        let Some(Document::Object(thinking)) = fields.get("thinking") else {
            panic!("expected thinking document");
        };
        assert_eq!(
            thinking.get("type"),
            Some(&Document::String("enabled".to_string()))
        );
    }

    #[test]
    fn interleaved_thinking_adds_the_beta_flag() {
        let mut config = thinking_config(2048, None);
        config
            .provider_opts
            .insert("interleaved_thinking".into(), serde_json::json!(true));

        let request = ConverseRequest::build(
            &config,
            false,
            vec![Message::user("hi")],
            Vec::new(),
            RequestOptions::default(),
        )
        .expect("request");

        let Some(Document::Object(fields)) = request.additional_fields else {
            panic!("expected additional model request fields");
        };
        assert!(fields.contains_key("anthropic_beta"));
    }

    #[test]
    fn tool_use_arguments_parse_as_object() {
        let block =
            tool_call_to_content_block(ToolCall::function("tool-1", "bash", r#"{"command":"ls"}"#))
                .expect("content block");

        let ContentBlock::ToolUse(tool_use) = block else {
            panic!("expected tool use block");
        };
        assert!(matches!(tool_use.input(), Document::Object(_)));
    }

    #[test]
    fn tool_use_arguments_fall_back_to_string() {
        let raw = r#"{"command": "echo "hello""}"#;
        let block = tool_call_to_content_block(ToolCall::function("tool-1", "bash", raw))
            .expect("content block");

        let ContentBlock::ToolUse(tool_use) = block else {
            panic!("expected tool use block");
        };
        assert!(matches!(tool_use.input(), Document::String(s) if s == raw));
    }

    #[test]
    fn conversion_is_stable_across_repeated_runs() {
        let messages = || {
            vec![
                Message::user("q"),
                Message {
                    tool_calls: Some(vec![ToolCall::function("t1", "read", "{}")]),
                    ..Message::assistant("")
                },
                Message::tool("t1", "a"),
                Message::user("next"),
            ]
        };

        let first = convert_messages(messages(), false);
        let second = convert_messages(messages(), false);
        assert_eq!(first.1, second.1);
    }
}
