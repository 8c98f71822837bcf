//! # agentdeck core
//!
//! Domain types, traits, and error definitions for the agentdeck
//! orchestration core. Agents, tools, suggestions and the event system are
//! defined here; the orchestration itself lives in `agentdeck-agent` and
//! the HTTP runtime client in `agentdeck-runtime`.

pub mod agent;
pub mod context;
pub mod error;
pub mod event;
pub mod message;
pub mod protocol;
pub mod runner;
pub mod runtime;
pub mod subscription;
pub mod suggestion;
pub mod sync;
pub mod testing;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use agent::{Agent, AgentSubscriber, RunAgentInput, RunAgentParams, RunAgentResult};
pub use context::ContextEntry;
pub use error::{AgentError, ConfigurationError, CoreError, CoreErrorCode, Result, ToolError};
pub use event::{AgentMap, CoreEvent, CoreSubscriber, ErrorEvent, EventBus, SubscriberResult};
pub use message::{FunctionCall, Message, Role, ToolCall};
pub use protocol::{AgentEvent, PatchOperation};
pub use runner::AgentCore;
pub use runtime::{RuntimeConnectionStatus, RuntimeTransport};
pub use subscription::Subscription;
pub use suggestion::{
    DynamicSuggestionsConfig, StaticSuggestionsConfig, Suggestion, SuggestionAvailability,
    SuggestionsConfig,
};
pub use tool::{FrontendTool, ToolDefinition, ToolHandler, ToolRegistry};
