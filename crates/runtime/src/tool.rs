//! Tool ABI and per-turn registry.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use llm::messages::{ToolCall, ToolCallResult, ToolDefinition};

/// Execution context handed to tools and tool sets.
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub session_id: String,
    /// Mirrors the host token; long-running tools should poll it.
    pub cancellation: CancellationToken,
}

/// One callable tool.
#[async_trait]
pub trait Tool: Send + Sync {
    fn definition(&self) -> &ToolDefinition;

    /// Invoke the tool. Arguments arrive as the call's JSON string, already
    /// validated to parse; errors become tool-role messages, never panics.
    async fn call(&self, ctx: &ToolContext, call: &ToolCall) -> anyhow::Result<ToolCallResult>;
}

/// A named group of tools with a shared lifecycle.
#[async_trait]
pub trait ToolSet: Send + Sync {
    async fn start(&self, _ctx: &ToolContext) -> anyhow::Result<()> {
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Extra system-prompt material describing how to use these tools.
    fn instructions(&self) -> Option<String> {
        None
    }

    async fn tools(&self, ctx: &ToolContext) -> Vec<Arc<dyn Tool>>;
}

/// Tools available to one agent for one turn, indexed by name.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    order: Vec<String>,
}

impl ToolRegistry {
    /// Build a registry from the collected tools; the first definition of a
    /// name wins.
    pub fn new(tools: Vec<Arc<dyn Tool>>) -> Self {
        let mut by_name = HashMap::with_capacity(tools.len());
        let mut order = Vec::with_capacity(tools.len());

        for tool in tools {
            let name = tool.definition().name.clone();
            if by_name.contains_key(&name) {
                log::warn!("duplicate tool name {name}; keeping the first definition");
                continue;
            }
            order.push(name.clone());
            by_name.insert(name, tool);
        }

        Self {
            tools: by_name,
            order,
        }
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.get(name)
    }

    /// Definitions in registration order.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|tool| tool.definition().clone())
            .collect()
    }

    /// Human-facing name for a tool, falling back to the wire name.
    pub fn display_name(&self, name: &str) -> String {
        self.tools
            .get(name)
            .and_then(|tool| tool.definition().display_name.clone())
            .unwrap_or_else(|| name.to_string())
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
