//! Append-only conversation log with per-agent usage accounting.

use std::collections::HashMap;

use llm::messages::{Message, Role, Usage};
use uuid::Uuid;

/// One entry of the conversation log.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionEntry {
    pub message: Message,
    /// Synthetic messages (e.g. the bootstrap user message of a transfer)
    /// that rehydrators may filter out.
    pub implicit: bool,
}

/// The conversation state one run operates on.
///
/// Mutated exclusively by the runtime loop and the dispatcher during a run;
/// not thread-safe across concurrent writers.
#[derive(Debug, Clone)]
pub struct Session {
    id: String,
    entries: Vec<SessionEntry>,
    usage: HashMap<String, Usage>,
    title: Option<String>,
}

impl Session {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            entries: Vec::new(),
            usage: HashMap::new(),
            title: None,
        }
    }

    /// Session bootstrapped with an initial user message.
    pub fn with_user_message(content: impl Into<String>) -> Self {
        let mut session = Self::new();
        session.append(Message::user(content));
        session
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn append(&mut self, message: Message) {
        self.entries.push(SessionEntry {
            message,
            implicit: false,
        });
    }

    /// Append a synthetic message that rehydrators may filter out.
    pub fn append_implicit(&mut self, message: Message) {
        self.entries.push(SessionEntry {
            message,
            implicit: true,
        });
    }

    pub fn entries(&self) -> &[SessionEntry] {
        &self.entries
    }

    /// Plain message list, in order, implicit entries included.
    pub fn messages_snapshot(&self) -> Vec<Message> {
        self.entries
            .iter()
            .map(|entry| entry.message.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Fold a usage report into the given agent's running total.
    pub fn update_usage(&mut self, agent: &str, usage: &Usage) {
        self.usage
            .entry(agent.to_string())
            .or_default()
            .accumulate(usage);
    }

    pub fn usage(&self) -> &HashMap<String, Usage> {
        &self.usage
    }

    pub fn usage_for(&self, agent: &str) -> Option<&Usage> {
        self.usage.get(agent)
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    pub fn set_title(&mut self, title: impl Into<String>) {
        self.title = Some(title.into());
    }

    pub(crate) fn last_message_mut(&mut self) -> Option<&mut Message> {
        self.entries.last_mut().map(|entry| &mut entry.message)
    }

    /// Drop tool calls on the trailing assistant message that never got a
    /// result (cancellation mid-turn); removes the message entirely when
    /// nothing else remains on it.
    pub(crate) fn prune_incomplete_tool_calls(&mut self) {
        let answered: Vec<String> = self
            .entries
            .iter()
            .filter_map(|entry| entry.message.tool_call_id.clone())
            .collect();

        let Some(entry) = self.entries.last_mut() else {
            return;
        };

        if entry.message.role != Role::Assistant {
            return;
        }

        if let Some(calls) = entry.message.tool_calls.as_mut() {
            calls.retain(|call| answered.contains(&call.id));
            if calls.is_empty() {
                entry.message.tool_calls = None;
            }
        }

        if entry.message.tool_calls.is_none()
            && entry.message.content.is_empty()
            && entry.message.reasoning_content.is_none()
        {
            self.entries.pop();
        }
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use llm::messages::ToolCall;

    #[test]
    fn usage_accumulates_per_agent() {
        let mut session = Session::new();

        session.update_usage(
            "root",
            &Usage {
                input_tokens: 10,
                output_tokens: 2,
                ..Usage::default()
            },
        );
        session.update_usage(
            "root",
            &Usage {
                input_tokens: 5,
                output_tokens: 1,
                ..Usage::default()
            },
        );

        let usage = session.usage_for("root").expect("usage");
        assert_eq!(usage.input_tokens, 15);
        assert_eq!(usage.output_tokens, 3);
        assert!(session.usage_for("child").is_none());
    }

    #[test]
    fn pruning_drops_unanswered_tool_calls() {
        let mut session = Session::with_user_message("hi");
        session.append(Message {
            tool_calls: Some(vec![
                ToolCall::function("t1", "read", "{}"),
                ToolCall::function("t2", "grep", "{}"),
            ]),
            ..Message::assistant("")
        });

        session.prune_incomplete_tool_calls();

        // Nothing answered either call, so the whole message goes.
        assert_eq!(session.len(), 1);
    }

    #[test]
    fn pruning_keeps_partial_text() {
        let mut session = Session::with_user_message("hi");
        session.append(Message {
            tool_calls: Some(vec![ToolCall::function("t1", "read", "{}")]),
            ..Message::assistant("partial thought")
        });

        session.prune_incomplete_tool_calls();

        assert_eq!(session.len(), 2);
        let last = session.entries().last().unwrap();
        assert_eq!(last.message.content, "partial thought");
        assert!(last.message.tool_calls.is_none());
    }

    #[test]
    fn implicit_entries_are_flagged() {
        let mut session = Session::new();
        session.append_implicit(Message::user("synthetic bootstrap"));

        assert!(session.entries()[0].implicit);
        assert_eq!(session.messages_snapshot().len(), 1);
    }
}
