//! Provider contract and adapter factory.

pub mod bedrock;
mod http_client;
pub mod openai;
mod token;

use std::sync::Arc;

use async_trait::async_trait;

use config::{ModelConfig, ProviderKind};

use crate::{
    catalog::ModelCatalog,
    env::EnvProvider,
    error::LlmError,
    messages::{ChatCompletionStream, Message, ToolDefinition},
};

pub use token::TokenSource;

/// Per-call parameter overrides layered over the base [`ModelConfig`].
///
/// Used by degenerate subtasks (title generation) that reuse a provider with
/// a smaller budget.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestOptions {
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

/// Everything needed to reconstruct a sibling provider instance.
///
/// Cloning with different options goes through [`connect`] on a mutated
/// config copy; providers never hold back-pointers to their factory.
#[derive(Clone)]
pub struct BaseConfig {
    pub config: ModelConfig,
    pub env: Arc<dyn EnvProvider>,
}

/// A model binding able to stream one chat completion per call.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Open a streaming completion over the given conversation.
    ///
    /// The message list must be non-empty; adapters reject an empty list
    /// before any I/O.
    async fn create_chat_completion_stream(
        &self,
        messages: Vec<Message>,
        tools: Vec<ToolDefinition>,
        options: RequestOptions,
    ) -> crate::Result<ChatCompletionStream>;

    /// `"provider/model"` identifier.
    fn id(&self) -> String;

    /// Config snapshot for sibling reconstruction.
    fn base_config(&self) -> BaseConfig;

    /// Reconstruct this provider with a mutated config, e.g. a lower token
    /// budget for a title-generation subtask. Implementations go through
    /// their own constructor; no back-pointers.
    async fn clone_with_config(&self, config: ModelConfig) -> crate::Result<Arc<dyn Provider>>;
}

/// Construct the adapter selected by `config.provider`.
pub async fn connect(
    config: ModelConfig,
    env: Arc<dyn EnvProvider>,
    catalog: Arc<ModelCatalog>,
) -> crate::Result<Arc<dyn Provider>> {
    match config.provider {
        ProviderKind::Openai => Ok(Arc::new(openai::OpenAIProvider::new(config, env)?)),
        ProviderKind::Bedrock => Ok(Arc::new(
            bedrock::BedrockProvider::new(config, env, catalog).await?,
        )),
    }
}

pub(crate) fn ensure_messages(messages: &[Message]) -> crate::Result<()> {
    if messages.is_empty() {
        return Err(LlmError::InvalidRequest(
            "messages must not be empty".to_string(),
        ));
    }
    Ok(())
}

/// Decoded `data:` URL image.
pub(crate) struct DataUrlImage {
    pub mime: String,
    pub bytes: Vec<u8>,
}

/// Parse a `data:<mime>;base64,<payload>` URL. Anything else — including
/// invalid base64 — yields `None` and the caller drops the image block.
pub(crate) fn parse_data_url(url: &str) -> Option<DataUrlImage> {
    use base64::Engine as _;

    let rest = url.strip_prefix("data:")?;
    let (mime, payload) = rest.split_once(";base64,")?;

    let bytes = base64::engine::general_purpose::STANDARD
        .decode(payload.trim())
        .ok()?;

    Some(DataUrlImage {
        mime: mime.to_string(),
        bytes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_url_decodes_mime_and_payload() {
        let image = parse_data_url("data:image/png;base64,aGVsbG8=").expect("image");

        assert_eq!(image.mime, "image/png");
        assert_eq!(image.bytes, b"hello");
    }

    #[test]
    fn non_data_urls_are_rejected() {
        assert!(parse_data_url("https://example.com/cat.png").is_none());
        assert!(parse_data_url("data:image/png;base64,@@invalid@@").is_none());
        assert!(parse_data_url("data:image/png,plain").is_none());
    }
}
