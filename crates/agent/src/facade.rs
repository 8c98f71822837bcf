//! The narrow view of the deck handed to its components.
//!
//! [`RunHandler`](crate::RunHandler), [`SuggestionEngine`](crate::SuggestionEngine),
//! [`StateManager`](crate::StateManager) and [`AgentRegistry`](crate::AgentRegistry)
//! never see the deck itself. They receive a `Weak<dyn CoreFacade>` at
//! construction and reach shared state only through it.

use std::collections::HashMap;
use std::sync::Arc;

use agentdeck_core::{Agent, ContextEntry, CoreEvent, ErrorEvent, ToolDefinition};
use serde_json::{Map, Value};

pub trait CoreFacade: Send + Sync {
    /// Publish an event to every deck subscriber.
    fn notify(&self, event: CoreEvent);

    /// Publish an error on the event channel.
    fn emit_error(&self, error: ErrorEvent) {
        self.notify(CoreEvent::Error(error));
    }

    fn headers(&self) -> HashMap<String, String>;

    /// Properties forwarded to every run.
    fn properties(&self) -> Map<String, Value>;

    fn context(&self) -> Vec<ContextEntry>;

    /// Look up a registered agent (local or remote).
    fn agent(&self, agent_id: &str) -> Option<Arc<dyn Agent>>;

    /// Tool definitions advertised to `agent_id`.
    fn frontend_tools(&self, agent_id: &str) -> Vec<ToolDefinition>;

    fn clear_suggestions(&self, agent_id: &str);

    fn reload_suggestions(&self, agent_id: &str);

    /// Ceiling on agent invocations within one `run_agent` call.
    fn max_follow_up_runs(&self) -> u32;
}
