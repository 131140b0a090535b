//! Session title generation, a degenerate subtask of the runtime.

use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use llm::{
    messages::{Message, Role, StreamEvent},
    provider::RequestOptions,
};

use crate::{error::RuntimeError, event::Event, run::Runtime, session::Session};

const TITLE_MAX_TOKENS: u32 = 64;

const TITLE_PROMPT: &str =
    "Generate a short title (at most six words) summarizing the conversation below. \
     Reply with the title only, no quotes.";

impl Runtime {
    /// Generate and publish a title for the session.
    ///
    /// Clones the root agent's provider with a small token budget and no
    /// thinking, sends a fixed meta-prompt over the first user message, and
    /// reads a single completion.
    pub async fn generate_title(
        &self,
        cancellation: &CancellationToken,
        session: &mut Session,
    ) -> crate::Result<String> {
        let root = self.team().root();
        let provider = root.provider().cloned().ok_or_else(|| {
            RuntimeError::InvalidConfig(format!("agent '{}' has no model", root.name()))
        })?;

        let base = provider.base_config();
        let mut config = base.config;
        config.max_tokens = Some(TITLE_MAX_TOKENS);
        config.thinking_budget = None;
        let sibling = provider.clone_with_config(config).await?;

        let seed = session
            .entries()
            .iter()
            .find(|entry| entry.message.role == Role::User && !entry.implicit)
            .map(|entry| entry.message.content.clone())
            .ok_or_else(|| {
                RuntimeError::Internal("session has no user message to title".to_string())
            })?;

        let messages = vec![Message::system(TITLE_PROMPT), Message::user(seed)];
        let mut stream = sibling
            .create_chat_completion_stream(messages, Vec::new(), RequestOptions::default())
            .await?;

        let mut title = String::new();

        loop {
            let event = tokio::select! {
                biased;
                () = cancellation.cancelled() => return Err(RuntimeError::Cancelled),
                event = stream.next() => event,
            };

            let Some(event) = event else { break };

            match event? {
                StreamEvent::ContentDelta { text } => title.push_str(&text),
                StreamEvent::Finish(_) => break,
                _ => {}
            }
        }

        let title = title.trim().trim_matches('"').to_string();
        session.set_title(title.clone());
        self.emit(Event::SessionTitle {
            title: title.clone(),
        });

        Ok(title)
    }
}
