//! Core event system.
//!
//! Everything observable about the orchestration core is published as a
//! [`CoreEvent`]. Delivery is synchronous and in subscription order; a
//! subscriber that fails or panics is logged and skipped so the rest still
//! receive the event. Every event is mirrored onto a broadcast channel for
//! async consumers.

use std::collections::{BTreeMap, HashMap};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::broadcast;
use tracing::error;

use crate::agent::Agent;
use crate::error::CoreErrorCode;
use crate::runtime::RuntimeConnectionStatus;
use crate::subscription::{SubscriberList, Subscription};
use crate::suggestion::Suggestion;

/// Agents keyed by registration id.
pub type AgentMap = BTreeMap<String, Arc<dyn Agent>>;

/// An error published on the core event channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorEvent {
    pub message: String,
    pub code: CoreErrorCode,
    /// Structured details such as `agentId`, `toolCallId` or `source`
    pub context: Map<String, Value>,
    pub timestamp: DateTime<Utc>,
}

impl ErrorEvent {
    pub fn new(code: CoreErrorCode, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code,
            context: Map::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_context(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.context.insert(key.to_string(), value.into());
        self
    }
}

/// Events published by the orchestration core.
#[derive(Clone)]
pub enum CoreEvent {
    RuntimeConnectionStatusChanged {
        status: RuntimeConnectionStatus,
    },

    AgentsChanged {
        agents: AgentMap,
    },

    ContextChanged,

    SuggestionsConfigChanged,

    SuggestionsChanged {
        agent_id: String,
        suggestions: Vec<Suggestion>,
    },

    SuggestionsStartedLoading {
        agent_id: String,
    },

    SuggestionsFinishedLoading {
        agent_id: String,
    },

    ToolExecutionStart {
        tool_call_id: String,
        agent_id: String,
        tool_name: String,
        args: Value,
    },

    ToolExecutionEnd {
        tool_call_id: String,
        agent_id: String,
        tool_name: String,
        result: String,
        error: Option<String>,
        duration_ms: u64,
    },

    PropertiesChanged {
        properties: Map<String, Value>,
    },

    HeadersChanged {
        headers: HashMap<String, String>,
    },

    Error(ErrorEvent),
}

impl CoreEvent {
    /// Short name used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::RuntimeConnectionStatusChanged { .. } => "runtime_connection_status_changed",
            Self::AgentsChanged { .. } => "agents_changed",
            Self::ContextChanged => "context_changed",
            Self::SuggestionsConfigChanged => "suggestions_config_changed",
            Self::SuggestionsChanged { .. } => "suggestions_changed",
            Self::SuggestionsStartedLoading { .. } => "suggestions_started_loading",
            Self::SuggestionsFinishedLoading { .. } => "suggestions_finished_loading",
            Self::ToolExecutionStart { .. } => "tool_execution_start",
            Self::ToolExecutionEnd { .. } => "tool_execution_end",
            Self::PropertiesChanged { .. } => "properties_changed",
            Self::HeadersChanged { .. } => "headers_changed",
            Self::Error(_) => "error",
        }
    }
}

impl std::fmt::Debug for CoreEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AgentsChanged { agents } => f
                .debug_struct("AgentsChanged")
                .field("agents", &agents.keys().collect::<Vec<_>>())
                .finish(),
            Self::SuggestionsChanged { agent_id, suggestions } => f
                .debug_struct("SuggestionsChanged")
                .field("agent_id", agent_id)
                .field("suggestions", suggestions)
                .finish(),
            Self::ToolExecutionEnd { tool_call_id, error, .. } => f
                .debug_struct("ToolExecutionEnd")
                .field("tool_call_id", tool_call_id)
                .field("error", error)
                .finish(),
            Self::Error(event) => f.debug_tuple("Error").field(event).finish(),
            other => f.write_str(other.kind()),
        }
    }
}

pub type SubscriberResult = std::result::Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Receiver of core events.
pub trait CoreSubscriber: Send + Sync {
    fn on_event(&self, event: &CoreEvent) -> SubscriberResult;
}

impl<F> CoreSubscriber for F
where
    F: Fn(&CoreEvent) -> SubscriberResult + Send + Sync,
{
    fn on_event(&self, event: &CoreEvent) -> SubscriberResult {
        self(event)
    }
}

/// Fan-out of core events to subscribers and a broadcast channel.
pub struct EventBus {
    subscribers: SubscriberList<dyn CoreSubscriber>,
    sender: broadcast::Sender<Arc<CoreEvent>>,
}

impl EventBus {
    /// Create a new event bus whose broadcast mirror holds `capacity` events.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            subscribers: SubscriberList::new(),
            sender,
        }
    }

    /// Deliver `event` to every subscriber, then to broadcast receivers.
    pub fn publish(&self, event: CoreEvent) {
        for subscriber in self.subscribers.snapshot() {
            match catch_unwind(AssertUnwindSafe(|| subscriber.on_event(&event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(event = event.kind(), error = %e, "Subscriber failed"),
                Err(_) => error!(event = event.kind(), "Subscriber panicked"),
            }
        }
        // No receivers is fine
        let _ = self.sender.send(Arc::new(event));
    }

    pub fn subscribe(&self, subscriber: Arc<dyn CoreSubscriber>) -> Subscription {
        self.subscribers.add(subscriber)
    }

    /// Async receiver of every published event.
    pub fn receiver(&self) -> broadcast::Receiver<Arc<CoreEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
