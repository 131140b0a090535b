//! Request construction for the OpenAI Responses-style wire.

use itertools::Itertools;
use serde::Serialize;
use serde_json::Value;

use config::ModelConfig;

use crate::{
    messages::{ContentPart, Message, Role, ToolDefinition},
    provider::{RequestOptions, parse_data_url},
    schema,
};

use super::is_responses_style;

#[derive(Debug, Serialize)]
pub(super) struct OpenAIRequest {
    model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    instructions: Option<String>,
    input: Vec<InputItem>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_completion_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    frequency_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    presence_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    parallel_tool_calls: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<OpenAITool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reasoning: Option<Reasoning>,
    stream: bool,
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
enum InputItem {
    Message {
        role: &'static str,
        content: Vec<ContentItem>,
    },
    FunctionCall {
        call_id: String,
        name: String,
        arguments: String,
    },
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentItem {
    InputText { text: String },
    OutputText { text: String },
    InputImage { image_url: String },
    FunctionCallOutput { call_id: String, output: String },
}

#[derive(Debug, Serialize)]
struct OpenAITool {
    #[serde(rename = "type")]
    kind: &'static str,
    name: String,
    description: String,
    parameters: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    strict: Option<bool>,
}

#[derive(Debug, Serialize)]
struct Reasoning {
    effort: String,
}

impl OpenAIRequest {
    pub(super) fn build(
        config: &ModelConfig,
        messages: Vec<Message>,
        tools: Vec<ToolDefinition>,
        options: RequestOptions,
        effort: Option<String>,
    ) -> Self {
        let responses_style = is_responses_style(&config.model);
        let (instructions, input) = convert_messages(messages);

        let token_limit = options.max_tokens.or(config.max_tokens);
        let (max_tokens, max_completion_tokens) = if responses_style {
            (None, token_limit)
        } else {
            (token_limit, None)
        };

        let tools = if tools.is_empty() {
            None
        } else {
            Some(
                tools
                    .into_iter()
                    .map(|tool| convert_tool(tool, responses_style))
                    .collect(),
            )
        };

        Self {
            model: config.model.clone(),
            instructions,
            input,
            max_tokens,
            max_completion_tokens,
            temperature: options.temperature.or(config.temperature),
            top_p: config.top_p,
            frequency_penalty: config.frequency_penalty,
            presence_penalty: config.presence_penalty,
            parallel_tool_calls: config.parallel_tool_calls,
            tools,
            reasoning: effort.map(|effort| Reasoning { effort }),
            stream: true,
        }
    }

    pub(super) fn has_token_limit(&self) -> bool {
        self.max_tokens.is_some() || self.max_completion_tokens.is_some()
    }

    pub(super) fn clear_token_limit(&mut self) {
        self.max_tokens = None;
        self.max_completion_tokens = None;
    }
}

/// Convert canonical messages into the system instructions slot and the
/// input item list.
///
/// System messages leave the turn list entirely. Consecutive tool-role
/// messages collapse into a single user message of tool-result blocks, the
/// same grouping the Bedrock converter applies.
fn convert_messages(messages: Vec<Message>) -> (Option<String>, Vec<InputItem>) {
    let mut system = Vec::new();
    let mut input = Vec::new();
    let mut pending_results: Vec<ContentItem> = Vec::new();

    for message in messages {
        if message.role == Role::Tool {
            pending_results.push(ContentItem::FunctionCallOutput {
                call_id: message.tool_call_id.unwrap_or_default(),
                output: message.content,
            });
            continue;
        }

        if !pending_results.is_empty() {
            input.push(InputItem::Message {
                role: "user",
                content: std::mem::take(&mut pending_results),
            });
        }

        match message.role {
            Role::System => system.push(message.content),
            Role::User => {
                let content = user_content(message);
                if !content.is_empty() {
                    input.push(InputItem::Message {
                        role: "user",
                        content,
                    });
                }
            }
            Role::Assistant => {
                // Reasoning traces are not replayed on this wire; the
                // signature-bearing variant is a Bedrock concern.
                if !message.content.is_empty() {
                    input.push(InputItem::Message {
                        role: "assistant",
                        content: vec![ContentItem::OutputText {
                            text: message.content,
                        }],
                    });
                }

                for call in message.tool_calls.into_iter().flatten() {
                    input.push(InputItem::FunctionCall {
                        call_id: call.id,
                        name: call.function.name,
                        arguments: call.function.arguments,
                    });
                }
            }
            // Tool messages were consumed into pending_results above.
            Role::Tool => {}
        }
    }

    if !pending_results.is_empty() {
        input.push(InputItem::Message {
            role: "user",
            content: pending_results,
        });
    }

    let instructions = if system.is_empty() {
        None
    } else {
        Some(system.iter().join("\n\n"))
    };

    (instructions, input)
}

fn user_content(message: Message) -> Vec<ContentItem> {
    let Some(parts) = message.parts else {
        if message.content.is_empty() {
            return Vec::new();
        }
        return vec![ContentItem::InputText {
            text: message.content,
        }];
    };

    parts
        .into_iter()
        .filter_map(|part| match part {
            ContentPart::Text { text } => Some(ContentItem::InputText { text }),
            ContentPart::ImageUrl { url } => {
                // Only well-formed data URLs survive; anything else is
                // dropped while surrounding text is kept.
                if parse_data_url(&url).is_some() {
                    Some(ContentItem::InputImage { image_url: url })
                } else {
                    log::debug!("dropping non-data or malformed image URL from user message");
                    None
                }
            }
        })
        .collect()
}

fn convert_tool(tool: ToolDefinition, responses_style: bool) -> OpenAITool {
    let parameters = if responses_style {
        schema::normalize_strict(&tool.input_schema)
    } else {
        schema::normalize(&tool.input_schema)
    };

    OpenAITool {
        kind: "function",
        name: tool.name,
        description: tool.description,
        parameters,
        strict: responses_style.then_some(true),
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::panic)]

    use super::*;
    use crate::messages::ToolCall;
    use serde_json::json;

    fn request(messages: Vec<Message>, model: &str) -> OpenAIRequest {
        let config = ModelConfig::new(config::ProviderKind::Openai, model);
        OpenAIRequest::build(&config, messages, Vec::new(), RequestOptions::default(), None)
    }

    #[test]
    fn system_messages_move_into_instructions() {
        let request = request(
            vec![
                Message::system("be brief"),
                Message::system("be kind"),
                Message::user("hi"),
            ],
            "gpt-4o",
        );

        assert_eq!(request.instructions.as_deref(), Some("be brief\n\nbe kind"));
        assert_eq!(request.input.len(), 1);
    }

    #[test]
    fn consecutive_tool_results_group_into_one_user_item() {
        let request = request(
            vec![
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
            ],
            "gpt-4o",
        );

        // user, function_call x2, grouped results, trailing user
        assert_eq!(request.input.len(), 5);
        assert_eq!(
            request.input[3],
            InputItem::Message {
                role: "user",
                content: vec![
                    ContentItem::FunctionCallOutput {
                        call_id: "t1".into(),
                        output: "a".into(),
                    },
                    ContentItem::FunctionCallOutput {
                        call_id: "t2".into(),
                        output: "b".into(),
                    },
                ],
            }
        );
        assert!(matches!(
            &request.input[4],
            InputItem::Message { role: "user", content } if content.len() == 1
        ));
    }

    #[test]
    fn responses_family_uses_max_completion_tokens() {
        let mut config = ModelConfig::new(config::ProviderKind::Openai, "gpt-5");
        config.max_tokens = Some(4096);

        let request = OpenAIRequest::build(
            &config,
            vec![Message::user("hi")],
            Vec::new(),
            RequestOptions::default(),
            None,
        );

        assert_eq!(request.max_tokens, None);
        assert_eq!(request.max_completion_tokens, Some(4096));
    }

    #[test]
    fn request_options_override_config_budget() {
        let mut config = ModelConfig::new(config::ProviderKind::Openai, "gpt-4o");
        config.max_tokens = Some(4096);

        let request = OpenAIRequest::build(
            &config,
            vec![Message::user("hi")],
            Vec::new(),
            RequestOptions {
                max_tokens: Some(64),
                temperature: None,
            },
            None,
        );

        assert_eq!(request.max_tokens, Some(64));
    }

    #[test]
    fn invalid_image_urls_are_dropped_but_text_survives() {
        let request = request(
            vec![Message {
                parts: Some(vec![
                    ContentPart::Text {
                        text: "look:".into(),
                    },
                    ContentPart::ImageUrl {
                        url: "https://example.com/cat.png".into(),
                    },
                    ContentPart::ImageUrl {
                        url: "data:image/png;base64,@@broken@@".into(),
                    },
                ]),
                ..Message::user("")
            }],
            "gpt-4o",
        );

        let InputItem::Message { content, .. } = &request.input[0] else {
            panic!("expected message item");
        };
        assert_eq!(
            content,
            &[ContentItem::InputText {
                text: "look:".into()
            }]
        );
    }

    #[test]
    fn strict_schema_for_responses_family() {
        let tool = ToolDefinition::new(
            "add",
            "Add two numbers",
            json!({
                "type": "object",
                "properties": {
                    "a": { "type": "number" },
                    "b": { "type": "number" }
                },
                "required": ["a"]
            }),
        );

        let config = ModelConfig::new(config::ProviderKind::Openai, "o3");
        let request = OpenAIRequest::build(
            &config,
            vec![Message::user("1+2?")],
            vec![tool],
            RequestOptions::default(),
            None,
        );

        let tools = request.tools.expect("tools");
        assert_eq!(tools[0].strict, Some(true));
        assert_eq!(tools[0].parameters["required"], json!(["a", "b"]));
        assert_eq!(tools[0].parameters["properties"]["b"]["type"], json!(["number", "null"]));
    }
}
