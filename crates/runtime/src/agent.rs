//! Agent definition.

use std::sync::Arc;

use llm::provider::Provider;

use crate::tool::ToolSet;

/// A named participant of a team: a system prompt, a model binding, tool
/// sets, and optionally sub-agents it can delegate to.
///
/// Immutable after construction; the `with_*` builders consume `self`.
#[derive(Clone)]
pub struct Agent {
    name: String,
    instructions: String,
    description: Option<String>,
    provider: Option<Arc<dyn Provider>>,
    tool_sets: Vec<Arc<dyn ToolSet>>,
    sub_agents: Vec<String>,
}

impl Agent {
    pub fn new(name: impl Into<String>, instructions: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            instructions: instructions.into(),
            description: None,
            provider: None,
            tool_sets: Vec::new(),
            sub_agents: Vec::new(),
        }
    }

    pub fn with_model(mut self, provider: Arc<dyn Provider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn with_tool_sets(mut self, tool_sets: Vec<Arc<dyn ToolSet>>) -> Self {
        self.tool_sets = tool_sets;
        self
    }

    /// Declare the team members this agent may delegate to.
    pub fn with_sub_agents(mut self, agents: Vec<&Agent>) -> Self {
        self.sub_agents = agents.iter().map(|agent| agent.name().to_string()).collect();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn instructions(&self) -> &str {
        &self.instructions
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn provider(&self) -> Option<&Arc<dyn Provider>> {
        self.provider.as_ref()
    }

    pub fn tool_sets(&self) -> &[Arc<dyn ToolSet>] {
        &self.tool_sets
    }

    pub fn sub_agent_names(&self) -> &[String] {
        &self.sub_agents
    }

    /// Human-facing name for a tool, so UIs need not reach into the
    /// registry. Delegation built-ins get fixed labels; everything else is
    /// derived from the wire name.
    pub fn display_name_for_tool(&self, name: &str) -> String {
        match name {
            crate::run::TRANSFER_TASK_TOOL => "Delegate task".to_string(),
            crate::run::HANDOFF_TOOL => "Hand off".to_string(),
            other => humanize(other),
        }
    }
}

fn humanize(name: &str) -> String {
    let mut out = String::with_capacity(name.len());

    for (index, word) in name.split(['_', '-']).filter(|w| !w.is_empty()).enumerate() {
        if index > 0 {
            out.push(' ');
        }
        let mut chars = word.chars();
        if let Some(first) = chars.next() {
            if index == 0 {
                out.extend(first.to_uppercase());
            } else {
                out.push(first);
            }
        }
        out.push_str(chars.as_str());
    }

    out
}
