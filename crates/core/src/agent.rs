//! The agent abstraction driven by the orchestration core.
//!
//! An [`Agent`] owns a conversation (messages plus a JSON state object) and
//! runs against it. Local agents execute in-process; remote ones proxy a
//! runtime over HTTP. Either way progress is reported to
//! [`AgentSubscriber`]s as the run's event stream is applied.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::context::ContextEntry;
use crate::error::AgentError;
use crate::message::Message;
use crate::protocol::PatchOperation;
use crate::subscription::Subscription;
use crate::tool::ToolDefinition;

/// Caller-supplied parameters for one run.
#[derive(Debug, Clone, Default)]
pub struct RunAgentParams {
    /// Opaque properties forwarded to the agent as-is
    pub forwarded_props: Map<String, Value>,
    pub tools: Vec<ToolDefinition>,
    pub context: Vec<ContextEntry>,
    /// Fixed run id; a fresh one is generated when unset
    pub run_id: Option<String>,
}

/// Everything an agent receives for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunAgentInput {
    pub thread_id: String,
    pub run_id: String,
    pub state: Value,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDefinition>,
    pub context: Vec<ContextEntry>,
    pub forwarded_props: Value,
}

/// Outcome of a completed run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunAgentResult {
    /// Result attached to `RUN_FINISHED`, if any
    pub result: Option<Value>,
    /// Messages whose ids were not in the conversation when the run started
    pub new_messages: Vec<Message>,
}

/// Observer of an agent's run lifecycle.
///
/// Every method has a no-op default so implementors override only what
/// they need. Callbacks run synchronously on the task applying the run's
/// events and must not block.
#[allow(unused_variables)]
pub trait AgentSubscriber: Send + Sync {
    fn on_run_started_event(&self, input: &RunAgentInput, state: &Value) {}

    fn on_run_finished_event(&self, input: &RunAgentInput, result: Option<&Value>, state: &Value) {}

    /// Called before the snapshot replaces `state`.
    fn on_state_snapshot_event(&self, snapshot: &Value, input: &RunAgentInput, state: &Value) {}

    /// Called after `delta` was applied; `state` is the patched state.
    fn on_state_delta_event(&self, delta: &[PatchOperation], input: &RunAgentInput, state: &Value) {}

    fn on_messages_snapshot_event(&self, messages: &[Message], input: &RunAgentInput) {}

    /// A message was appended. `input` is `None` outside of a run.
    fn on_new_message(&self, message: &Message, input: Option<&RunAgentInput>) {}

    /// The message list changed (appended, extended or replaced).
    fn on_messages_changed(&self, messages: &[Message], input: Option<&RunAgentInput>) {}

    fn on_run_failed(&self, error: &AgentError) {}

    fn on_run_error_event(&self, message: &str, code: Option<&str>) {}
}

/// An agent the core can run.
#[async_trait]
pub trait Agent: Send + Sync {
    fn agent_id(&self) -> Option<String>;

    fn set_agent_id(&self, agent_id: &str);

    fn thread_id(&self) -> String;

    fn set_thread_id(&self, thread_id: &str);

    fn description(&self) -> Option<String> {
        None
    }

    fn messages(&self) -> Vec<Message>;

    fn set_messages(&self, messages: Vec<Message>);

    /// Append a message and notify subscribers.
    fn add_message(&self, message: Message);

    /// Insert `message` directly after the message with id `anchor_id`,
    /// appending when the anchor is missing.
    fn insert_message_after(&self, anchor_id: &str, message: Message);

    fn state(&self) -> Value;

    fn set_state(&self, state: Value);

    /// Headers sent with remote requests. Local agents ignore them.
    fn set_headers(&self, headers: &HashMap<String, String>) {
        let _ = headers;
    }

    /// Run against the current conversation. `subscriber` observes this run
    /// only, in addition to the persistent subscribers.
    async fn run_agent(
        &self,
        params: RunAgentParams,
        subscriber: Option<Arc<dyn AgentSubscriber>>,
    ) -> Result<RunAgentResult, AgentError>;

    /// Attach to an existing conversation and replay its history.
    async fn connect_agent(
        &self,
        params: RunAgentParams,
        subscriber: Option<Arc<dyn AgentSubscriber>>,
    ) -> Result<RunAgentResult, AgentError>;

    /// Stop observing the active run without stopping it remotely.
    fn detach_active_run(&self);

    /// Cancel the active run. Idempotent; a no-op when idle.
    fn abort_run(&self);

    /// An independent copy sharing configuration and a snapshot of the
    /// conversation, but no subscribers and no active run.
    fn clone_agent(&self) -> Arc<dyn Agent>;

    fn subscribe(&self, subscriber: Arc<dyn AgentSubscriber>) -> Subscription;
}
