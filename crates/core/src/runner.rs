//! Shared agent machinery.
//!
//! [`AgentCore`] holds the conversation of one agent instance and applies a
//! run's [`AgentEvent`] stream to it, notifying subscribers as it goes.
//! Concrete agents embed it and only supply the event stream.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use futures::{Stream, StreamExt};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::agent::{AgentSubscriber, RunAgentInput, RunAgentParams, RunAgentResult};
use crate::error::AgentError;
use crate::message::{Message, Role, ToolCall};
use crate::protocol::AgentEvent;
use crate::subscription::{SubscriberList, Subscription};
use crate::sync::lock;

#[derive(Debug, Clone)]
struct Conversation {
    agent_id: Option<String>,
    thread_id: String,
    description: Option<String>,
    messages: Vec<Message>,
    state: Value,
    headers: HashMap<String, String>,
}

/// Conversation storage and event application for an agent instance.
pub struct AgentCore {
    conversation: Mutex<Conversation>,
    subscribers: SubscriberList<dyn AgentSubscriber>,
    active_run: Mutex<Option<(u64, CancellationToken)>>,
    run_seq: AtomicU64,
}

impl AgentCore {
    pub fn new() -> Self {
        Self {
            conversation: Mutex::new(Conversation {
                agent_id: None,
                thread_id: Uuid::new_v4().to_string(),
                description: None,
                messages: Vec::new(),
                state: Value::Object(Map::new()),
                headers: HashMap::new(),
            }),
            subscribers: SubscriberList::new(),
            active_run: Mutex::new(None),
            run_seq: AtomicU64::new(0),
        }
    }

    pub fn with_agent_id(self, agent_id: impl Into<String>) -> Self {
        lock(&self.conversation).agent_id = Some(agent_id.into());
        self
    }

    pub fn with_description(self, description: impl Into<String>) -> Self {
        lock(&self.conversation).description = Some(description.into());
        self
    }

    /// A copy of the conversation with no subscribers and no active run.
    pub fn fork(&self) -> Self {
        Self {
            conversation: Mutex::new(lock(&self.conversation).clone()),
            subscribers: SubscriberList::new(),
            active_run: Mutex::new(None),
            run_seq: AtomicU64::new(0),
        }
    }

    pub fn agent_id(&self) -> Option<String> {
        lock(&self.conversation).agent_id.clone()
    }

    pub fn set_agent_id(&self, agent_id: &str) {
        lock(&self.conversation).agent_id = Some(agent_id.to_string());
    }

    pub fn thread_id(&self) -> String {
        lock(&self.conversation).thread_id.clone()
    }

    pub fn set_thread_id(&self, thread_id: &str) {
        lock(&self.conversation).thread_id = thread_id.to_string();
    }

    pub fn description(&self) -> Option<String> {
        lock(&self.conversation).description.clone()
    }

    pub fn messages(&self) -> Vec<Message> {
        lock(&self.conversation).messages.clone()
    }

    pub fn set_messages(&self, messages: Vec<Message>) {
        lock(&self.conversation).messages = messages;
    }

    pub fn state(&self) -> Value {
        lock(&self.conversation).state.clone()
    }

    pub fn set_state(&self, state: Value) {
        lock(&self.conversation).state = state;
    }

    pub fn headers(&self) -> HashMap<String, String> {
        lock(&self.conversation).headers.clone()
    }

    pub fn set_headers(&self, headers: &HashMap<String, String>) {
        lock(&self.conversation).headers = headers.clone();
    }

    pub fn subscribe(&self, subscriber: Arc<dyn AgentSubscriber>) -> Subscription {
        self.subscribers.add(subscriber)
    }

    pub fn add_message(&self, message: Message) {
        let messages = {
            let mut conv = lock(&self.conversation);
            conv.messages.push(message.clone());
            conv.messages.clone()
        };
        for s in self.subscribers.snapshot() {
            s.on_new_message(&message, None);
            s.on_messages_changed(&messages, None);
        }
    }

    pub fn insert_message_after(&self, anchor_id: &str, message: Message) {
        let messages = {
            let mut conv = lock(&self.conversation);
            match conv.messages.iter().position(|m| m.id == anchor_id) {
                Some(idx) => conv.messages.insert(idx + 1, message.clone()),
                None => conv.messages.push(message.clone()),
            }
            conv.messages.clone()
        };
        for s in self.subscribers.snapshot() {
            s.on_new_message(&message, None);
            s.on_messages_changed(&messages, None);
        }
    }

    /// Snapshot the conversation into the input for a new run.
    pub fn build_input(&self, params: RunAgentParams) -> RunAgentInput {
        let conv = lock(&self.conversation);
        RunAgentInput {
            thread_id: conv.thread_id.clone(),
            run_id: params.run_id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            state: conv.state.clone(),
            messages: conv.messages.clone(),
            tools: params.tools,
            context: params.context,
            forwarded_props: Value::Object(params.forwarded_props),
        }
    }

    pub fn is_running(&self) -> bool {
        lock(&self.active_run).is_some()
    }

    /// Cancel the active run; it resolves with the events applied so far.
    pub fn abort(&self) {
        if let Some((_, token)) = lock(&self.active_run).take() {
            token.cancel();
        }
    }

    /// Apply `events` until the stream ends, fails or the run is aborted.
    ///
    /// `RUN_ERROR` and stream errors fail the run after notifying
    /// subscribers; an abort resolves normally.
    pub async fn run<S>(
        &self,
        input: RunAgentInput,
        events: S,
        subscriber: Option<Arc<dyn AgentSubscriber>>,
    ) -> Result<RunAgentResult, AgentError>
    where
        S: Stream<Item = Result<AgentEvent, AgentError>> + Send,
    {
        let token = CancellationToken::new();
        let seq = self.run_seq.fetch_add(1, Ordering::Relaxed);
        if let Some((_, previous)) = lock(&self.active_run).replace((seq, token.clone())) {
            previous.cancel();
        }

        let known: HashSet<String> = lock(&self.conversation)
            .messages
            .iter()
            .map(|m| m.id.clone())
            .collect();
        let mut subscribers = self.subscribers.snapshot();
        subscribers.extend(subscriber);

        let mut result = None;
        let mut events = std::pin::pin!(events);
        let outcome = loop {
            let next = tokio::select! {
                biased;
                _ = token.cancelled() => {
                    debug!(run_id = %input.run_id, "Run aborted");
                    break Ok(());
                }
                next = events.next() => next,
            };
            match next {
                None => break Ok(()),
                Some(Err(e)) => break Err(e),
                Some(Ok(event)) => {
                    if let Err(e) = self.apply(event, &input, &subscribers, &mut result) {
                        break Err(e);
                    }
                }
            }
        };

        {
            let mut active = lock(&self.active_run);
            if active.as_ref().is_some_and(|(active_seq, _)| *active_seq == seq) {
                *active = None;
            }
        }

        if let Err(e) = outcome {
            for s in &subscribers {
                s.on_run_failed(&e);
            }
            return Err(e);
        }

        let new_messages = lock(&self.conversation)
            .messages
            .iter()
            .filter(|m| !known.contains(&m.id))
            .cloned()
            .collect();
        Ok(RunAgentResult {
            result,
            new_messages,
        })
    }

    fn apply(
        &self,
        event: AgentEvent,
        input: &RunAgentInput,
        subscribers: &[Arc<dyn AgentSubscriber>],
        result: &mut Option<Value>,
    ) -> Result<(), AgentError> {
        match event {
            AgentEvent::RunStarted { .. } => {
                let state = self.state();
                for s in subscribers {
                    s.on_run_started_event(input, &state);
                }
            }
            AgentEvent::RunFinished { result: finished, .. } => {
                *result = finished;
                let state = self.state();
                for s in subscribers {
                    s.on_run_finished_event(input, result.as_ref(), &state);
                }
            }
            AgentEvent::RunError { message, code } => {
                for s in subscribers {
                    s.on_run_error_event(&message, code.as_deref());
                }
                return Err(AgentError::RunError { message, code });
            }
            AgentEvent::TextMessageStart { message_id, role } => {
                let exists = lock(&self.conversation)
                    .messages
                    .iter()
                    .any(|m| m.id == message_id);
                if !exists {
                    let mut message = Message::assistant("").with_id(message_id);
                    message.role = role;
                    self.push(message, input, subscribers);
                }
            }
            AgentEvent::TextMessageContent { message_id, delta } => {
                let appended = {
                    let mut conv = lock(&self.conversation);
                    match conv.messages.iter_mut().find(|m| m.id == message_id) {
                        Some(message) => {
                            message.content.push_str(&delta);
                            Some(conv.messages.clone())
                        }
                        None => None,
                    }
                };
                match appended {
                    Some(messages) => notify_changed(subscribers, &messages, input),
                    None => self.push(
                        Message::assistant(delta).with_id(message_id),
                        input,
                        subscribers,
                    ),
                }
            }
            AgentEvent::TextMessageEnd { .. } | AgentEvent::ToolCallEnd { .. } => {}
            AgentEvent::ToolCallStart {
                tool_call_id,
                tool_call_name,
                parent_message_id,
            } => {
                let call = ToolCall::new(tool_call_id, tool_call_name, "");
                let attached = {
                    let mut conv = lock(&self.conversation);
                    let parent = parent_message_id.as_deref().and_then(|pid| {
                        conv.messages
                            .iter_mut()
                            .find(|m| m.id == pid && m.role == Role::Assistant)
                    });
                    match parent {
                        Some(message) => {
                            message.tool_calls.push(call.clone());
                            Some(conv.messages.clone())
                        }
                        None => None,
                    }
                };
                match attached {
                    Some(messages) => notify_changed(subscribers, &messages, input),
                    None => {
                        let id = parent_message_id.unwrap_or_else(|| Uuid::new_v4().to_string());
                        let message = Message::assistant("").with_id(id).with_tool_calls(vec![call]);
                        self.push(message, input, subscribers);
                    }
                }
            }
            AgentEvent::ToolCallArgs {
                tool_call_id,
                delta,
            } => {
                let updated = {
                    let mut conv = lock(&self.conversation);
                    let call = conv
                        .messages
                        .iter_mut()
                        .rev()
                        .flat_map(|m| m.tool_calls.iter_mut())
                        .find(|c| c.id == tool_call_id);
                    match call {
                        Some(call) => {
                            call.function.arguments.push_str(&delta);
                            Some(conv.messages.clone())
                        }
                        None => None,
                    }
                };
                match updated {
                    Some(messages) => notify_changed(subscribers, &messages, input),
                    None => debug!(tool_call_id = %tool_call_id, "Arguments for unknown tool call ignored"),
                }
            }
            AgentEvent::ToolCallResult {
                message_id,
                tool_call_id,
                content,
            } => {
                let message = Message::tool_result(tool_call_id, content).with_id(message_id);
                self.push(message, input, subscribers);
            }
            AgentEvent::StateSnapshot { snapshot } => {
                let previous = self.state();
                for s in subscribers {
                    s.on_state_snapshot_event(&snapshot, input, &previous);
                }
                self.set_state(snapshot);
            }
            AgentEvent::StateDelta { delta } => {
                let mut patched = self.state();
                match json_patch::patch(&mut patched, &delta) {
                    Ok(()) => {
                        self.set_state(patched.clone());
                        for s in subscribers {
                            s.on_state_delta_event(&delta.0, input, &patched);
                        }
                    }
                    Err(e) => warn!(run_id = %input.run_id, error = %e, "Discarding state delta"),
                }
            }
            AgentEvent::MessagesSnapshot { messages } => {
                for s in subscribers {
                    s.on_messages_snapshot_event(&messages, input);
                }
                self.set_messages(messages.clone());
                notify_changed(subscribers, &messages, input);
            }
        }
        Ok(())
    }

    fn push(&self, message: Message, input: &RunAgentInput, subscribers: &[Arc<dyn AgentSubscriber>]) {
        let messages = {
            let mut conv = lock(&self.conversation);
            conv.messages.push(message.clone());
            conv.messages.clone()
        };
        for s in subscribers {
            s.on_new_message(&message, Some(input));
        }
        notify_changed(subscribers, &messages, input);
    }
}

impl Default for AgentCore {
    fn default() -> Self {
        Self::new()
    }
}

fn notify_changed(subscribers: &[Arc<dyn AgentSubscriber>], messages: &[Message], input: &RunAgentInput) {
    for s in subscribers {
        s.on_messages_changed(messages, Some(input));
    }
}
