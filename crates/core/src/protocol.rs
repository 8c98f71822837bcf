//! Agent wire events.
//!
//! Agents report progress as a stream of [`AgentEvent`]s. The JSON form uses
//! a `type` discriminator in SCREAMING_SNAKE_CASE with camelCase fields, the
//! same shape remote runtimes stream over SSE.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::message::{Message, Role};

/// RFC 6902 patches carried by `STATE_DELTA`.
pub use json_patch::{Patch, PatchOperation};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentEvent {
    #[serde(rename_all = "camelCase")]
    RunStarted { thread_id: String, run_id: String },

    #[serde(rename_all = "camelCase")]
    RunFinished {
        thread_id: String,
        run_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
    },

    RunError {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<String>,
    },

    #[serde(rename_all = "camelCase")]
    TextMessageStart {
        message_id: String,
        #[serde(default = "default_role")]
        role: Role,
    },

    #[serde(rename_all = "camelCase")]
    TextMessageContent { message_id: String, delta: String },

    #[serde(rename_all = "camelCase")]
    TextMessageEnd { message_id: String },

    #[serde(rename_all = "camelCase")]
    ToolCallStart {
        tool_call_id: String,
        tool_call_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent_message_id: Option<String>,
    },

    #[serde(rename_all = "camelCase")]
    ToolCallArgs { tool_call_id: String, delta: String },

    #[serde(rename_all = "camelCase")]
    ToolCallEnd { tool_call_id: String },

    #[serde(rename_all = "camelCase")]
    ToolCallResult {
        message_id: String,
        tool_call_id: String,
        content: String,
    },

    StateSnapshot { snapshot: Value },

    StateDelta { delta: Patch },

    MessagesSnapshot { messages: Vec<Message> },
}

fn default_role() -> Role {
    Role::Assistant
}

impl AgentEvent {
    /// Wire name of the event, e.g. `RUN_STARTED`.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::RunStarted { .. } => "RUN_STARTED",
            Self::RunFinished { .. } => "RUN_FINISHED",
            Self::RunError { .. } => "RUN_ERROR",
            Self::TextMessageStart { .. } => "TEXT_MESSAGE_START",
            Self::TextMessageContent { .. } => "TEXT_MESSAGE_CONTENT",
            Self::TextMessageEnd { .. } => "TEXT_MESSAGE_END",
            Self::ToolCallStart { .. } => "TOOL_CALL_START",
            Self::ToolCallArgs { .. } => "TOOL_CALL_ARGS",
            Self::ToolCallEnd { .. } => "TOOL_CALL_END",
            Self::ToolCallResult { .. } => "TOOL_CALL_RESULT",
            Self::StateSnapshot { .. } => "STATE_SNAPSHOT",
            Self::StateDelta { .. } => "STATE_DELTA",
            Self::MessagesSnapshot { .. } => "MESSAGES_SNAPSHOT",
        }
    }

    /// The event sequence that makes an agent append `message` to its
    /// conversation.
    pub fn for_message(message: &Message) -> Vec<AgentEvent> {
        if message.role == Role::Tool {
            return vec![AgentEvent::ToolCallResult {
                message_id: message.id.clone(),
                tool_call_id: message.tool_call_id.clone().unwrap_or_default(),
                content: message.content.clone(),
            }];
        }

        let mut events = vec![AgentEvent::TextMessageStart {
            message_id: message.id.clone(),
            role: message.role,
        }];
        if !message.content.is_empty() {
            events.push(AgentEvent::TextMessageContent {
                message_id: message.id.clone(),
                delta: message.content.clone(),
            });
        }
        events.push(AgentEvent::TextMessageEnd {
            message_id: message.id.clone(),
        });
        for call in &message.tool_calls {
            events.push(AgentEvent::ToolCallStart {
                tool_call_id: call.id.clone(),
                tool_call_name: call.function.name.clone(),
                parent_message_id: Some(message.id.clone()),
            });
            if !call.function.arguments.is_empty() {
                events.push(AgentEvent::ToolCallArgs {
                    tool_call_id: call.id.clone(),
                    delta: call.function.arguments.clone(),
                });
            }
            events.push(AgentEvent::ToolCallEnd {
                tool_call_id: call.id.clone(),
            });
        }
        events
    }
}
