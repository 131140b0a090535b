//! Tool-call dispatch with approval gating.
//!
//! Status machine: `Pending → (Confirmation?) → Running → (Completed |
//! Error)`. Every failure mode — unknown tool, malformed arguments, host
//! denial, tool error, even a panic — is captured as an error-carrying
//! [`ToolCallResult`]; nothing propagates to the runtime loop.

use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;

use llm::messages::{ToolCall, ToolCallResult, ToolDefinition};

use crate::{
    event::ToolCallStatus,
    tool::{ToolContext, ToolRegistry},
};

/// Sentinel prefix of a rejection result; callers match on it to tell a
/// user denial apart from ordinary tool failures.
pub const REJECTION_SENTINEL: &str = "Tool call was rejected by the user";

/// Gate decision for a tool call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Approval {
    Allow,
    /// Suspend and ask the host before running.
    Ask,
    Deny,
}

/// Host-supplied approval policy.
#[async_trait]
pub trait ApprovalPolicy: Send + Sync {
    /// Decide how to gate this call before it runs.
    fn requirement(&self, definition: &ToolDefinition, arguments: &str) -> Approval;

    /// Ask the host to confirm; only called when [`Approval::Ask`] was
    /// returned. The dispatcher suspends until the decision arrives.
    async fn confirm(&self, call: &ToolCall) -> bool;
}

/// Policy that lets every call through unprompted.
pub struct AllowAll;

#[async_trait]
impl ApprovalPolicy for AllowAll {
    fn requirement(&self, _definition: &ToolDefinition, _arguments: &str) -> Approval {
        Approval::Allow
    }

    async fn confirm(&self, _call: &ToolCall) -> bool {
        true
    }
}

pub struct ToolDispatcher {
    policy: Arc<dyn ApprovalPolicy>,
}

impl ToolDispatcher {
    pub fn new(policy: Arc<dyn ApprovalPolicy>) -> Self {
        Self { policy }
    }

    /// Run one tool call through its lifecycle.
    ///
    /// `report` receives the intermediate statuses (`Pending`,
    /// `Confirmation`, `Running`); the terminal status comes back with the
    /// result.
    pub async fn dispatch(
        &self,
        ctx: &ToolContext,
        registry: &ToolRegistry,
        call: &ToolCall,
        mut report: impl FnMut(ToolCallStatus) + Send,
    ) -> (ToolCallResult, ToolCallStatus) {
        report(ToolCallStatus::Pending);

        let name = call.function.name.as_str();

        let Some(tool) = registry.get(name) else {
            return (
                ToolCallResult::failed(format!("unknown tool: {name}")),
                ToolCallStatus::Error,
            );
        };

        // Arguments must decode before the tool sees them. An empty string
        // is tolerated; models emit it for zero-argument tools.
        if !call.function.arguments.is_empty()
            && let Err(error) = serde_json::from_str::<serde_json::Value>(&call.function.arguments)
        {
            log::debug!("tool call {} has undecodable arguments: {error}", call.id);
            return (
                ToolCallResult::failed(format!("invalid_arguments: {error}")),
                ToolCallStatus::Error,
            );
        }

        match self.policy.requirement(tool.definition(), &call.function.arguments) {
            Approval::Allow => {}
            Approval::Deny => {
                return (
                    ToolCallResult::failed(format!("{REJECTION_SENTINEL} (denied by policy)")),
                    ToolCallStatus::Error,
                );
            }
            Approval::Ask => {
                report(ToolCallStatus::Confirmation);
                if !self.policy.confirm(call).await {
                    return (
                        ToolCallResult::failed(REJECTION_SENTINEL),
                        ToolCallStatus::Error,
                    );
                }
            }
        }

        report(ToolCallStatus::Running);

        let outcome = std::panic::AssertUnwindSafe(tool.call(ctx, call))
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(result)) => {
                let status = if result.is_error() {
                    ToolCallStatus::Error
                } else {
                    ToolCallStatus::Completed
                };
                (result, status)
            }
            Ok(Err(error)) => {
                log::debug!("tool {name} failed: {error:#}");
                (
                    ToolCallResult::failed(format!("tool failed: {error:#}")),
                    ToolCallStatus::Error,
                )
            }
            Err(_) => {
                log::error!("tool {name} panicked");
                (
                    ToolCallResult::failed(format!("tool {name} panicked")),
                    ToolCallStatus::Error,
                )
            }
        }
    }
}
