//! The tool-calling loop.
//!
//! One `run_agent` call drives an agent until it settles:
//!
//! 1. **Run** the agent with the forwarded properties, the tools visible to
//!    it and the current context
//! 2. **Scan** the new messages for tool calls without a result
//! 3. **Execute** each call against the registered frontend tool (or the
//!    wildcard) and insert the result right after the calling message
//! 4. **Follow up** with another run when a tool asked for it, otherwise
//!    regenerate suggestions and return
//!
//! Handler failures become `Error: ...` tool results and the loop carries
//! on. Arguments that are not valid JSON abort the whole call.

use std::collections::HashSet;
use std::sync::{Arc, RwLock, Weak};
use std::time::Instant;

use agentdeck_core::error::{AgentError, CoreError, CoreErrorCode, ToolError};
use agentdeck_core::sync::{read, write};
use agentdeck_core::tool::WILDCARD_TOOL_NAME;
use agentdeck_core::{
    Agent, AgentSubscriber, CoreEvent, ErrorEvent, FrontendTool, Message, Role, RunAgentParams,
    RunAgentResult, ToolCall, ToolDefinition, ToolRegistry,
};
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::facade::CoreFacade;

/// Executes agent turns and owns the frontend tool registry.
pub struct RunHandler {
    core: Weak<dyn CoreFacade>,
    tools: RwLock<ToolRegistry>,
}

/// What executing one tool call asks of the loop.
enum CallOutcome {
    /// No tool applies; the call stays unresolved
    Skipped,
    Resolved { follow_up: bool },
}

impl RunHandler {
    pub fn new(core: Weak<dyn CoreFacade>) -> Self {
        Self {
            core,
            tools: RwLock::new(ToolRegistry::new()),
        }
    }

    pub fn add_tool(&self, tool: FrontendTool) -> Result<(), ToolError> {
        write(&self.tools).add(tool)
    }

    /// Remove a tool. Without `agent_id` only the global tool goes.
    pub fn remove_tool(&self, name: &str, agent_id: Option<&str>) -> bool {
        write(&self.tools).remove(name, agent_id)
    }

    /// The tool named `name` for `agent_id`: agent-scoped first, then global.
    pub fn get_tool(&self, name: &str, agent_id: Option<&str>) -> Option<FrontendTool> {
        read(&self.tools).get(name, agent_id).cloned()
    }

    pub fn set_tools(&self, tools: Vec<FrontendTool>) {
        write(&self.tools).set(tools);
    }

    pub fn tools(&self) -> Vec<FrontendTool> {
        read(&self.tools).tools().to_vec()
    }

    /// Definitions advertised to an agent: global tools plus those scoped
    /// to it, with normalized schemas.
    ///
    /// The `*` wildcard is left out even though it is registered like any
    /// other tool. It has no name an agent could call and only serves as
    /// the fallback for unknown calls.
    pub fn build_frontend_tools(&self, agent_id: Option<&str>) -> Vec<ToolDefinition> {
        let tools = read(&self.tools);
        match agent_id {
            Some(id) => tools.definitions(id),
            None => tools
                .tools()
                .iter()
                .filter(|t| t.agent_id.is_none() && !t.is_wildcard())
                .map(FrontendTool::definition)
                .collect(),
        }
    }

    /// Run `agent` until no tool asks for a follow-up.
    ///
    /// Returns the last run's result. Fails when a run fails or a tool call
    /// carries arguments that are not valid JSON.
    pub async fn run_agent(&self, agent: &Arc<dyn Agent>) -> Result<RunAgentResult, CoreError> {
        let core = self.facade()?;
        let agent_id = agent.agent_id().ok_or(AgentError::MissingId)?;
        let ceiling = core.max_follow_up_runs().max(1);

        let mut runs = 0;
        loop {
            core.clear_suggestions(&agent_id);
            agent.set_headers(&core.headers());

            runs += 1;
            debug!(agent_id = %agent_id, run = runs, "Running agent");
            let params = self.params(core.as_ref(), &agent_id);
            let relay = ErrorRelay::new(&self.core, &agent_id);
            let result = match agent.run_agent(params, Some(relay)).await {
                Ok(result) => result,
                Err(e) => {
                    warn!(agent_id = %agent_id, error = %e, "Agent run failed");
                    core.emit_error(
                        ErrorEvent::new(CoreErrorCode::AgentRunFailed, e.to_string())
                            .with_context("agentId", agent_id.clone()),
                    );
                    return Err(e.into());
                }
            };

            let follow_up = self
                .process_tool_calls(core.as_ref(), agent, &agent_id, &result.new_messages)
                .await?;
            if !follow_up {
                info!(agent_id = %agent_id, runs, "Agent run settled");
                core.reload_suggestions(&agent_id);
                return Ok(result);
            }
            if runs >= ceiling {
                warn!(
                    agent_id = %agent_id,
                    max_runs = ceiling,
                    "Follow-up ceiling reached, returning last batch"
                );
                core.reload_suggestions(&agent_id);
                return Ok(result);
            }
        }
    }

    /// Reset `agent` and attach to its conversation on the remote side.
    ///
    /// Any active run is detached and local messages and state are cleared
    /// first. Tool calls in the replayed history are processed as after a
    /// run.
    pub async fn connect_agent(&self, agent: &Arc<dyn Agent>) -> Result<RunAgentResult, CoreError> {
        let core = self.facade()?;
        let agent_id = agent.agent_id().ok_or(AgentError::MissingId)?;

        agent.detach_active_run();
        agent.set_messages(Vec::new());
        agent.set_state(json!({}));
        agent.set_headers(&core.headers());

        let params = self.params(core.as_ref(), &agent_id);
        let relay = ErrorRelay::new(&self.core, &agent_id);
        let result = match agent.connect_agent(params, Some(relay)).await {
            Ok(result) => result,
            Err(e) => {
                warn!(agent_id = %agent_id, error = %e, "Agent connect failed");
                core.emit_error(
                    ErrorEvent::new(CoreErrorCode::AgentConnectFailed, e.to_string())
                        .with_context("agentId", agent_id.clone()),
                );
                return Err(e.into());
            }
        };
        info!(agent_id = %agent_id, messages = result.new_messages.len(), "Agent connected");

        let follow_up = self
            .process_tool_calls(core.as_ref(), agent, &agent_id, &result.new_messages)
            .await?;
        if follow_up {
            return self.run_agent(agent).await;
        }
        core.reload_suggestions(&agent_id);
        Ok(result)
    }

    fn facade(&self) -> Result<Arc<dyn CoreFacade>, CoreError> {
        self.core
            .upgrade()
            .ok_or_else(|| CoreError::Runtime("agent deck has been dropped".into()))
    }

    fn params(&self, core: &dyn CoreFacade, agent_id: &str) -> RunAgentParams {
        RunAgentParams {
            forwarded_props: core.properties(),
            tools: self.build_frontend_tools(Some(agent_id)),
            context: core.context(),
            run_id: None,
        }
    }

    /// Execute every unresolved tool call in `new_messages`, in order.
    /// Returns whether any of them asked for a follow-up run.
    async fn process_tool_calls(
        &self,
        core: &dyn CoreFacade,
        agent: &Arc<dyn Agent>,
        agent_id: &str,
        new_messages: &[Message],
    ) -> Result<bool, CoreError> {
        let mut follow_up = false;
        let mut resolved: HashSet<&str> = new_messages
            .iter()
            .filter(|m| m.role == Role::Tool)
            .filter_map(|m| m.tool_call_id.as_deref())
            .collect();

        for message in new_messages.iter().filter(|m| m.role == Role::Assistant) {
            // Results for one message stay in call order directly after it
            let mut anchor = message.id.clone();
            for call in &message.tool_calls {
                if !resolved.insert(call.id.as_str()) {
                    debug!(tool_call_id = %call.id, "Tool call already resolved");
                    continue;
                }
                match self
                    .execute_tool_call(core, agent, agent_id, &anchor, message, call)
                    .await?
                {
                    CallOutcome::Skipped => {}
                    CallOutcome::Resolved {
                        follow_up: wants,
                    } => {
                        follow_up |= wants;
                        if let Some(inserted) = agent
                            .messages()
                            .iter()
                            .find(|m| m.is_result_for(&call.id))
                        {
                            anchor = inserted.id.clone();
                        }
                    }
                }
            }
        }
        Ok(follow_up)
    }

    async fn execute_tool_call(
        &self,
        core: &dyn CoreFacade,
        agent: &Arc<dyn Agent>,
        agent_id: &str,
        anchor: &str,
        message: &Message,
        call: &ToolCall,
    ) -> Result<CallOutcome, CoreError> {
        let Some(tool) = self
            .get_tool(call.name(), Some(agent_id))
            .or_else(|| self.get_tool(WILDCARD_TOOL_NAME, Some(agent_id)))
        else {
            debug!(tool = %call.name(), tool_call_id = %call.id, "No tool registered, leaving call unresolved");
            return Ok(CallOutcome::Skipped);
        };
        if tool.agent_id.as_deref().is_some_and(|scope| scope != agent_id) {
            return Ok(CallOutcome::Skipped);
        }

        let tool_type = if tool.is_wildcard() { "wildcard" } else { "specific" };
        let mut content = String::new();
        let mut error_message = None;

        if let Some(handler) = &tool.handler {
            let started = Instant::now();
            let parsed = serde_json::from_str::<Value>(&call.function.arguments);
            let parse_error = parsed.as_ref().err().map(ToString::to_string);
            let parsed_args = parsed.unwrap_or(Value::Null);

            if let Some(reason) = &parse_error {
                warn!(tool = %call.name(), tool_call_id = %call.id, error = %reason, "Tool arguments are not valid JSON");
                core.emit_error(
                    ErrorEvent::new(CoreErrorCode::ToolArgumentParseFailed, reason.clone())
                        .with_context("agentId", agent_id)
                        .with_context("toolCallId", call.id.clone())
                        .with_context("toolName", call.name())
                        .with_context("rawArguments", call.function.arguments.clone())
                        .with_context("toolType", tool_type)
                        .with_context("messageId", message.id.clone()),
                );
                error_message = Some(reason.clone());
            }

            let args = if tool.is_wildcard() {
                json!({ "toolName": call.name(), "args": parsed_args })
            } else {
                parsed_args
            };
            core.notify(CoreEvent::ToolExecutionStart {
                tool_call_id: call.id.clone(),
                agent_id: agent_id.to_string(),
                tool_name: call.name().to_string(),
                args: args.clone(),
            });

            if error_message.is_none() {
                debug!(tool = %call.name(), tool_call_id = %call.id, "Executing tool");
                match handler.call(args.clone(), call).await {
                    Ok(result) => content = tool_result_text(result),
                    Err(e) => {
                        let reason = e.to_string();
                        warn!(tool = %call.name(), tool_call_id = %call.id, error = %reason, "Tool handler failed");
                        core.emit_error(
                            ErrorEvent::new(CoreErrorCode::ToolHandlerFailed, reason.clone())
                                .with_context("agentId", agent_id)
                                .with_context("toolCallId", call.id.clone())
                                .with_context("toolName", call.name())
                                .with_context("parsedArgs", args)
                                .with_context("toolType", tool_type)
                                .with_context("messageId", message.id.clone()),
                        );
                        error_message = Some(reason);
                    }
                }
            }

            if let Some(reason) = &error_message {
                content = format!("Error: {reason}");
            }
            core.notify(CoreEvent::ToolExecutionEnd {
                tool_call_id: call.id.clone(),
                agent_id: agent_id.to_string(),
                tool_name: call.name().to_string(),
                result: if error_message.is_some() {
                    String::new()
                } else {
                    content.clone()
                },
                error: error_message.clone(),
                duration_ms: started.elapsed().as_millis() as u64,
            });

            if let Some(reason) = parse_error {
                return Err(ToolError::InvalidArguments {
                    tool_name: call.name().to_string(),
                    reason,
                }
                .into());
            }
        }

        agent.insert_message_after(anchor, Message::tool_result(call.id.clone(), content));
        Ok(CallOutcome::Resolved {
            follow_up: error_message.is_none() && tool.wants_follow_up(),
        })
    }
}

impl std::fmt::Debug for RunHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunHandler")
            .field("tools", &read(&self.tools).tools().len())
            .finish()
    }
}

/// Tool results are always text: nothing becomes `""`, strings pass
/// through, anything else is serialized.
fn tool_result_text(result: Value) -> String {
    match result {
        Value::Null => String::new(),
        Value::String(text) => text,
        other => other.to_string(),
    }
}

/// Relays an agent's own failure signals onto the deck's error channel.
struct ErrorRelay {
    core: Weak<dyn CoreFacade>,
    agent_id: String,
}

impl ErrorRelay {
    fn new(core: &Weak<dyn CoreFacade>, agent_id: &str) -> Arc<dyn AgentSubscriber> {
        Arc::new(Self {
            core: core.clone(),
            agent_id: agent_id.to_string(),
        })
    }
}

impl AgentSubscriber for ErrorRelay {
    fn on_run_failed(&self, error: &AgentError) {
        if let Some(core) = self.core.upgrade() {
            core.emit_error(
                ErrorEvent::new(CoreErrorCode::AgentRunFailedEvent, error.to_string())
                    .with_context("agentId", self.agent_id.clone())
                    .with_context("source", "onRunFailed"),
            );
        }
    }

    fn on_run_error_event(&self, message: &str, code: Option<&str>) {
        if let Some(core) = self.core.upgrade() {
            let mut event = ErrorEvent::new(CoreErrorCode::AgentRunErrorEvent, message)
                .with_context("agentId", self.agent_id.clone())
                .with_context("source", "onRunErrorEvent");
            if let Some(code) = code {
                event = event.with_context("code", code);
            }
            core.emit_error(event);
        }
    }
}
