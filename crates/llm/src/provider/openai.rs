//! OpenAI provider speaking the Responses-style streaming API.

mod input;
mod output;

use std::sync::Arc;

use reqwest::{Client, header::AUTHORIZATION};
use secrecy::ExposeSecret;

use config::{ModelConfig, ThinkingBudget};

use crate::{
    env::{EnvProvider, keys},
    error::LlmError,
    messages::{ChatCompletionStream, Message, ToolDefinition},
    provider::{
        BaseConfig, Provider, RequestOptions, ensure_messages,
        http_client::{fresh_http_client, http_client},
        token::{Auth, TokenSource},
    },
};

use self::input::OpenAIRequest;

const DEFAULT_OPENAI_API_URL: &str = "https://api.openai.com/v1";

/// Model families served by the Responses-style API surface; these take
/// `max_completion_tokens` instead of `max_tokens`.
const RESPONSES_STYLE_PREFIXES: &[&str] = &["gpt-4.1", "o1", "o3", "o4", "gpt-5"];

/// Reasoning-capable families that accept a thinking effort.
const REASONING_PREFIXES: &[&str] = &["o1", "o3", "o4", "gpt-5"];

const VALID_EFFORTS: &[&str] = &["minimal", "low", "medium", "high"];

pub struct OpenAIProvider {
    client: Client,
    base_url: String,
    config: ModelConfig,
    env: Arc<dyn EnvProvider>,
    auth: Auth,
}

impl OpenAIProvider {
    pub fn new(config: ModelConfig, env: Arc<dyn EnvProvider>) -> crate::Result<Self> {
        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_OPENAI_API_URL.to_string());

        let auth = Auth::from_config(&config, keys::OPENAI_API_KEY);

        Ok(Self {
            client: http_client(),
            base_url,
            config,
            env,
            auth,
        })
    }

    /// Switch to gateway-token auth; the credential is refreshed and the
    /// underlying client rebuilt on every request.
    pub fn with_token_source(mut self, source: Arc<dyn TokenSource>) -> Self {
        self.auth = Auth::Gateway(source);
        self
    }

    fn request_client(&self) -> Client {
        if self.auth.is_gateway() {
            fresh_http_client()
        } else {
            self.client.clone()
        }
    }

    async fn send(&self, body: Vec<u8>) -> crate::Result<reqwest::Response> {
        let url = format!("{}/responses", self.base_url);
        let key = self.auth.bearer(&self.config, self.env.as_ref()).await?;

        let response = self
            .request_client()
            .post(&url)
            .header(AUTHORIZATION, format!("Bearer {}", key.expose_secret()))
            .header("Content-Type", "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| {
                LlmError::ConnectionError(format!("Failed to send streaming request to OpenAI: {e}"))
            })?;

        let status = response.status();

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            log::error!("OpenAI streaming API error ({status}): {error_text}");

            return Err(LlmError::from_status(status.as_u16(), error_text));
        }

        Ok(response)
    }
}

#[async_trait::async_trait]
impl Provider for OpenAIProvider {
    async fn create_chat_completion_stream(
        &self,
        messages: Vec<Message>,
        tools: Vec<ToolDefinition>,
        options: RequestOptions,
    ) -> crate::Result<ChatCompletionStream> {
        ensure_messages(&messages)?;

        let effort = reasoning_effort(&self.config.model, self.config.thinking_budget.as_ref())?;
        let mut request = OpenAIRequest::build(&self.config, messages, tools, options, effort);

        let body = sonic_rs::to_vec(&request)
            .map_err(|e| LlmError::InvalidRequest(format!("Failed to serialize request: {e}")))?;

        let response = match self.send(body).await {
            // Some deployments reject the renamed token limit outright;
            // retry once with no limit at all.
            Err(LlmError::InvalidRequest(message))
                if request.has_token_limit() && message.contains("maxCompletionTokens") =>
            {
                log::debug!("retrying OpenAI request without a token limit: {message}");
                request.clear_token_limit();

                let body = sonic_rs::to_vec(&request).map_err(|e| {
                    LlmError::InvalidRequest(format!("Failed to serialize request: {e}"))
                })?;

                self.send(body).await?
            }
            other => other?,
        };

        Ok(output::event_stream(response))
    }

    fn id(&self) -> String {
        format!("openai/{}", self.config.model)
    }

    fn base_config(&self) -> BaseConfig {
        BaseConfig {
            config: self.config.clone(),
            env: self.env.clone(),
        }
    }

    async fn clone_with_config(
        &self,
        config: ModelConfig,
    ) -> crate::Result<std::sync::Arc<dyn Provider>> {
        Ok(std::sync::Arc::new(Self::new(config, self.env.clone())?))
    }
}

pub(crate) fn is_responses_style(model: &str) -> bool {
    RESPONSES_STYLE_PREFIXES
        .iter()
        .any(|prefix| model.starts_with(prefix))
}

fn is_reasoning_model(model: &str) -> bool {
    REASONING_PREFIXES
        .iter()
        .any(|prefix| model.starts_with(prefix))
}

/// Resolve the reasoning effort for a model, if any.
///
/// Non-reasoning models never get an effort and never fail. Reasoning models
/// require a well-formed effort whenever a thinking budget is present; a bare
/// token budget is a configuration error since token budgets mean nothing to
/// this family.
fn reasoning_effort(model: &str, budget: Option<&ThinkingBudget>) -> crate::Result<Option<String>> {
    if !is_reasoning_model(model) {
        return Ok(None);
    }

    let Some(budget) = budget else {
        return Ok(None);
    };

    match budget.effort.as_deref() {
        Some(effort) => {
            let normalized = effort.trim().to_ascii_lowercase();
            if VALID_EFFORTS.contains(&normalized.as_str()) {
                Ok(Some(normalized))
            } else {
                Err(LlmError::InvalidConfig(format!(
                    "invalid reasoning effort {effort:?} for model {model}: expected one of {VALID_EFFORTS:?}"
                )))
            }
        }
        None => Err(LlmError::InvalidConfig(format!(
            "model {model} takes a reasoning effort, not a token budget; set thinking_budget.effort"
        ))),
    }
}
