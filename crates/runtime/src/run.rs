//! The runtime loop: request → stream → tool calls → repeat.

use std::sync::Arc;

use futures::StreamExt;
use itertools::Itertools;
use serde::Deserialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use llm::{
    messages::{
        ChatCompletionStream, FinishReason, Message, Role, StreamEvent, ToolCall, ToolCallResult,
        ToolDefinition,
    },
    provider::RequestOptions,
};

use crate::{
    agent::Agent,
    dispatch::{AllowAll, ApprovalPolicy, ToolDispatcher},
    error::RuntimeError,
    event::{Event, EventSink, SwitchReason, ToolCallStatus},
    session::Session,
    team::Team,
    tool::{ToolContext, ToolRegistry, ToolSet},
};

pub(crate) const TRANSFER_TASK_TOOL: &str = "transfer_task";
pub(crate) const HANDOFF_TOOL: &str = "handoff";

/// Knobs for one run.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Maximum model turns per run; 0 means unbounded.
    pub max_iterations: usize,
}

/// Drives sessions to completion over a team of agents.
pub struct Runtime {
    team: Team,
    dispatcher: ToolDispatcher,
    sinks: Vec<Arc<dyn EventSink>>,
    options: RunOptions,
}

struct TurnOutcome {
    finish: Option<FinishReason>,
    tool_calls: Vec<ToolCall>,
}

impl Runtime {
    pub fn new(team: Team) -> Self {
        Self {
            team,
            dispatcher: ToolDispatcher::new(Arc::new(AllowAll)),
            sinks: Vec::new(),
            options: RunOptions::default(),
        }
    }

    pub fn with_approval_policy(mut self, policy: Arc<dyn ApprovalPolicy>) -> Self {
        self.dispatcher = ToolDispatcher::new(policy);
        self
    }

    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn with_options(mut self, options: RunOptions) -> Self {
        self.options = options;
        self
    }

    pub fn team(&self) -> &Team {
        &self.team
    }

    pub(crate) fn emit(&self, event: Event) {
        for sink in &self.sinks {
            sink.on_event(&event);
        }
    }

    /// Process the session until the current agent produces a non-tool
    /// finish reason, then return the message log.
    pub async fn run(
        &self,
        cancellation: CancellationToken,
        session: &mut Session,
    ) -> crate::Result<Vec<Message>> {
        let root = self.team.root().clone();
        self.run_agent(&cancellation, session, root).await?;
        Ok(session.messages_snapshot())
    }

    pub(crate) async fn run_agent(
        &self,
        cancellation: &CancellationToken,
        session: &mut Session,
        agent: Arc<Agent>,
    ) -> crate::Result<()> {
        let ctx = ToolContext {
            session_id: session.id().to_string(),
            cancellation: cancellation.clone(),
        };

        let mut started: Vec<Arc<dyn ToolSet>> = Vec::new();
        let result = self
            .run_loop(cancellation, session, agent, &ctx, &mut started)
            .await;

        for set in started {
            if let Err(error) = set.stop().await {
                log::warn!("tool set failed to stop cleanly: {error:#}");
            }
        }

        result
    }

    async fn run_loop(
        &self,
        cancellation: &CancellationToken,
        session: &mut Session,
        mut agent: Arc<Agent>,
        ctx: &ToolContext,
        started: &mut Vec<Arc<dyn ToolSet>>,
    ) -> crate::Result<()> {
        let mut iterations = 0usize;
        let mut sets_pending = true;

        loop {
            if cancellation.is_cancelled() {
                return Err(RuntimeError::Cancelled);
            }

            iterations += 1;
            if self.options.max_iterations != 0 && iterations > self.options.max_iterations {
                return Err(RuntimeError::IterationLimit(self.options.max_iterations));
            }

            let agent_name = agent.name().to_string();
            let provider = agent.provider().cloned().ok_or_else(|| {
                RuntimeError::InvalidConfig(format!("agent '{agent_name}' has no model"))
            })?;
            let track_usage = provider.base_config().config.track_usage;

            if sets_pending {
                for set in agent.tool_sets() {
                    if started.iter().any(|other| Arc::ptr_eq(other, set)) {
                        continue;
                    }
                    if let Err(error) = set.start(ctx).await {
                        log::warn!("tool set failed to start: {error:#}");
                        continue;
                    }
                    started.push(set.clone());
                }
                sets_pending = false;
            }

            let mut tools = Vec::new();
            for set in agent.tool_sets() {
                tools.extend(set.tools(ctx).await);
            }
            let registry = ToolRegistry::new(tools);

            let mut definitions = registry.definitions();
            if !agent.sub_agent_names().is_empty() {
                definitions.push(transfer_task_definition(&self.team, &agent));
                definitions.push(handoff_definition(&self.team, &agent));
            }

            let messages = render_messages(session, &agent);

            log::debug!("requesting completion from {} for agent {agent_name}", provider.id());

            let mut stream = provider
                .create_chat_completion_stream(messages, definitions, RequestOptions::default())
                .await?;

            self.emit(Event::StreamStart {
                agent: agent_name.clone(),
            });

            let outcome = self
                .consume_turn(cancellation, session, &agent_name, track_usage, &mut stream)
                .await?;
            drop(stream);

            if outcome.finish.unwrap_or(FinishReason::Stop) != FinishReason::ToolCalls {
                return Ok(());
            }

            let mut switched = false;

            for call in &outcome.tool_calls {
                if cancellation.is_cancelled() {
                    session.prune_incomplete_tool_calls();
                    return Err(RuntimeError::Cancelled);
                }

                match call.function.name.as_str() {
                    TRANSFER_TASK_TOOL => {
                        let result = match self.run_transfer(cancellation, session, &agent, call).await {
                            Ok(result) => result,
                            Err(error) => {
                                // A cancelled child run leaves the transfer
                                // call unanswered on the parent message.
                                session.prune_incomplete_tool_calls();
                                return Err(error);
                            }
                        };
                        let status = if result.is_error() {
                            ToolCallStatus::Error
                        } else {
                            ToolCallStatus::Completed
                        };
                        self.emit(Event::ToolCallResponse {
                            agent: agent_name.clone(),
                            id: call.id.clone(),
                            result: result.clone(),
                            status,
                        });
                        session.append(Message::tool(call.id.clone(), result.output));
                    }
                    HANDOFF_TOOL => match self.resolve_handoff(&agent, call) {
                        Ok(target) => {
                            self.emit(Event::AgentSwitch {
                                from: agent_name.clone(),
                                to: target.name().to_string(),
                                reason: SwitchReason::Handoff,
                            });
                            agent = target;
                            sets_pending = true;
                            switched = true;
                            break;
                        }
                        Err(result) => {
                            self.emit(Event::ToolCallResponse {
                                agent: agent_name.clone(),
                                id: call.id.clone(),
                                result: result.clone(),
                                status: ToolCallStatus::Error,
                            });
                            session.append(Message::tool(call.id.clone(), result.output));
                        }
                    },
                    _ => {
                        let (result, status) = tokio::select! {
                            biased;
                            () = cancellation.cancelled() => {
                                session.prune_incomplete_tool_calls();
                                return Err(RuntimeError::Cancelled);
                            }
                            outcome = self.dispatcher.dispatch(ctx, &registry, call, |status| {
                                self.emit(Event::ToolCallDispatch {
                                    agent: agent_name.clone(),
                                    id: call.id.clone(),
                                    status,
                                });
                            }) => outcome,
                        };

                        self.emit(Event::ToolCallResponse {
                            agent: agent_name.clone(),
                            id: call.id.clone(),
                            result: result.clone(),
                            status,
                        });
                        session.append(Message::tool(call.id.clone(), result.output));
                    }
                }
            }

            if switched {
                // The handoff call (and anything after it) gets no result;
                // drop the dangling entries so the next request stays
                // well-formed.
                session.prune_incomplete_tool_calls();
            }
        }
    }

    async fn consume_turn(
        &self,
        cancellation: &CancellationToken,
        session: &mut Session,
        agent_name: &str,
        track_usage: bool,
        stream: &mut ChatCompletionStream,
    ) -> crate::Result<TurnOutcome> {
        let mut assistant_started = false;
        let mut outcome = TurnOutcome {
            finish: None,
            tool_calls: Vec::new(),
        };

        loop {
            let event = tokio::select! {
                biased;
                () = cancellation.cancelled() => {
                    session.prune_incomplete_tool_calls();
                    return Err(RuntimeError::Cancelled);
                }
                event = stream.next() => event,
            };

            let Some(event) = event else {
                // Stream closed without a finish reason; treat as stop.
                break;
            };

            let event = match event {
                Ok(event) => event,
                Err(error) => {
                    self.emit(Event::Error {
                        kind: error.error_type(),
                        detail: error.to_string(),
                    });
                    session.prune_incomplete_tool_calls();
                    return Err(error.into());
                }
            };

            match event {
                StreamEvent::ContentDelta { text } => {
                    self.emit(Event::TextDelta {
                        agent: agent_name.to_string(),
                        text: text.clone(),
                    });
                    assistant_message(session, &mut assistant_started)
                        .content
                        .push_str(&text);
                }
                StreamEvent::ReasoningDelta { text } => {
                    self.emit(Event::ReasoningDelta {
                        agent: agent_name.to_string(),
                        text: text.clone(),
                    });
                    let message = assistant_message(session, &mut assistant_started);
                    match message.reasoning_content.as_mut() {
                        Some(reasoning) => reasoning.push_str(&text),
                        None => message.reasoning_content = Some(text),
                    }
                }
                StreamEvent::ThinkingSignature { signature, .. } => {
                    assistant_message(session, &mut assistant_started).thinking_signature =
                        Some(signature);
                }
                StreamEvent::ToolCallStart { id, name } => {
                    let call = ToolCall::function(id, name, "");
                    self.emit(Event::ToolCallStart {
                        agent: agent_name.to_string(),
                        tool_call: call.clone(),
                    });
                    assistant_message(session, &mut assistant_started)
                        .tool_calls
                        .get_or_insert_with(Vec::new)
                        .push(call);
                }
                StreamEvent::ToolCallArgsDelta { id, fragment } => {
                    self.emit(Event::ToolCallArgsDelta {
                        agent: agent_name.to_string(),
                        id: id.clone(),
                        fragment: fragment.clone(),
                    });
                    let message = assistant_message(session, &mut assistant_started);
                    match message
                        .tool_calls
                        .as_mut()
                        .and_then(|calls| calls.iter_mut().find(|call| call.id == id))
                    {
                        Some(call) => call.function.arguments.push_str(&fragment),
                        None => log::warn!("argument fragment for unknown tool call {id}"),
                    }
                }
                StreamEvent::ToolCallEnd { id } => {
                    self.emit(Event::ToolCallEnd {
                        agent: agent_name.to_string(),
                        id,
                    });
                }
                StreamEvent::Usage(usage) => {
                    session.update_usage(agent_name, &usage);
                    self.emit(Event::UsageReport {
                        agent: agent_name.to_string(),
                        usage: usage.clone(),
                    });
                    if track_usage {
                        assistant_message(session, &mut assistant_started).usage = Some(usage);
                    }
                }
                StreamEvent::Finish(reason) => {
                    self.emit(Event::TurnEnd {
                        agent: agent_name.to_string(),
                        finish_reason: reason,
                    });
                    outcome.finish = Some(reason);
                    break;
                }
            }
        }

        if assistant_started && let Some(message) = session.last_message_mut() {
            outcome.tool_calls = message.tool_calls.clone().unwrap_or_default();
        }

        Ok(outcome)
    }

    async fn run_transfer(
        &self,
        cancellation: &CancellationToken,
        session: &mut Session,
        agent: &Arc<Agent>,
        call: &ToolCall,
    ) -> crate::Result<ToolCallResult> {
        self.emit(Event::ToolCallDispatch {
            agent: agent.name().to_string(),
            id: call.id.clone(),
            status: ToolCallStatus::Running,
        });

        let args: TransferArgs = match serde_json::from_str(&call.function.arguments) {
            Ok(args) => args,
            Err(error) => {
                return Ok(ToolCallResult::failed(format!("invalid_arguments: {error}")));
            }
        };

        if !agent.sub_agent_names().contains(&args.target) {
            return Ok(ToolCallResult::failed(format!(
                "agent '{}' cannot delegate to '{}'",
                agent.name(),
                args.target
            )));
        }

        let Some(target) = self.team.get(&args.target).cloned() else {
            return Ok(ToolCallResult::failed(format!(
                "unknown agent: {}",
                args.target
            )));
        };

        self.emit(Event::AgentSwitch {
            from: agent.name().to_string(),
            to: target.name().to_string(),
            reason: SwitchReason::Transfer,
        });

        let mut child_session = Session::new();
        child_session.append_implicit(Message::user(transfer_prompt(&args)));

        let child_result =
            Box::pin(self.run_agent(cancellation, &mut child_session, target.clone())).await;

        self.emit(Event::AgentSwitch {
            from: target.name().to_string(),
            to: agent.name().to_string(),
            reason: SwitchReason::Transfer,
        });

        for (name, usage) in child_session.usage() {
            session.update_usage(name, usage);
        }

        match child_result {
            Ok(()) => Ok(ToolCallResult::text(terminal_assistant_text(&child_session))),
            Err(RuntimeError::Cancelled) => Err(RuntimeError::Cancelled),
            Err(error) => Ok(ToolCallResult::failed(format!(
                "transfer to '{}' failed: {error}",
                args.target
            ))),
        }
    }

    fn resolve_handoff(
        &self,
        agent: &Arc<Agent>,
        call: &ToolCall,
    ) -> Result<Arc<Agent>, ToolCallResult> {
        let args: HandoffArgs = match serde_json::from_str(&call.function.arguments) {
            Ok(args) => args,
            Err(error) => {
                return Err(ToolCallResult::failed(format!("invalid_arguments: {error}")));
            }
        };

        if !agent.sub_agent_names().contains(&args.agent) {
            return Err(ToolCallResult::failed(format!(
                "agent '{}' cannot hand off to '{}'",
                agent.name(),
                args.agent
            )));
        }

        self.team
            .get(&args.agent)
            .cloned()
            .ok_or_else(|| ToolCallResult::failed(format!("unknown agent: {}", args.agent)))
    }
}

fn assistant_message<'a>(session: &'a mut Session, started: &mut bool) -> &'a mut Message {
    if !*started {
        session.append(Message::assistant(""));
        *started = true;
    }
    session
        .last_message_mut()
        .expect("assistant message appended above")
}

fn render_messages(session: &Session, agent: &Agent) -> Vec<Message> {
    let mut system = vec![agent.instructions().to_string()];
    system.extend(
        agent
            .tool_sets()
            .iter()
            .filter_map(|set| set.instructions()),
    );
    let system = system.iter().filter(|block| !block.is_empty()).join("\n\n");

    let mut messages = Vec::with_capacity(session.len() + 1);
    if !system.is_empty() {
        messages.push(Message::system(system));
    }
    messages.extend(session.messages_snapshot());
    messages
}

/// The child's terminal assistant text; empty when the child finished on
/// tool calls without a text reply.
fn terminal_assistant_text(session: &Session) -> String {
    session
        .entries()
        .iter()
        .rev()
        .find(|entry| entry.message.role == Role::Assistant)
        .map(|entry| entry.message.content.clone())
        .unwrap_or_default()
}

#[derive(Debug, Default, Deserialize)]
struct TransferArgs {
    #[serde(default)]
    target: String,
    #[serde(default)]
    task: String,
    #[serde(default)]
    expected_output: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct HandoffArgs {
    #[serde(default)]
    agent: String,
}

fn transfer_prompt(args: &TransferArgs) -> String {
    match &args.expected_output {
        Some(expected) => format!("{}\n\nExpected output: {expected}", args.task),
        None => args.task.clone(),
    }
}

fn transfer_task_definition(team: &Team, agent: &Agent) -> ToolDefinition {
    let targets = agent
        .sub_agent_names()
        .iter()
        .filter_map(|name| team.describe(name))
        .join("\n");

    ToolDefinition::new(
        TRANSFER_TASK_TOOL,
        format!("Delegate a task to a sub-agent and wait for its result. Available agents:\n{targets}"),
        json!({
            "type": "object",
            "properties": {
                "target": {
                    "type": "string",
                    "description": "Name of the agent to delegate to"
                },
                "task": {
                    "type": "string",
                    "description": "Task for the agent to perform"
                },
                "expected_output": {
                    "type": "string",
                    "description": "What a good result looks like"
                }
            },
            "required": ["target", "task"]
        }),
    )
}

fn handoff_definition(team: &Team, agent: &Agent) -> ToolDefinition {
    let targets = agent
        .sub_agent_names()
        .iter()
        .filter_map(|name| team.describe(name))
        .join("\n");

    ToolDefinition::new(
        HANDOFF_TOOL,
        format!("Hand the conversation off to another agent for the rest of the run. Available agents:\n{targets}"),
        json!({
            "type": "object",
            "properties": {
                "agent": {
                    "type": "string",
                    "description": "Name of the agent to hand off to"
                }
            },
            "required": ["agent"]
        }),
    )
}
