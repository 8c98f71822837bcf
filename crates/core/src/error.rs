//! Error types for the agentdeck domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The top-level error type for all agentdeck operations.
#[derive(Debug, Error)]
pub enum CoreError {
    // --- Agent errors ---
    #[error("Agent error: {0}")]
    Agent(#[from] AgentError),

    // --- Tool errors ---
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    // --- Configuration errors ---
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    // --- Runtime errors ---
    #[error("Runtime error: {0}")]
    Runtime(String),

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, CoreError>;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum AgentError {
    #[error("Agent run failed: {0}")]
    RunFailed(String),

    #[error("Agent reported a run error: {message}")]
    RunError {
        message: String,
        code: Option<String>,
    },

    #[error("Agent connect failed: {0}")]
    ConnectFailed(String),

    #[error("Agent transport error: {0}")]
    Transport(String),

    #[error("Agent has no id")]
    MissingId,
}

#[derive(Debug, Clone, Error)]
pub enum ToolError {
    #[error("Tool already exists: '{name}' for agent '{scope}'")]
    AlreadyRegistered { name: String, scope: String },

    #[error("{0}")]
    HandlerFailed(String),

    #[error("Invalid tool arguments for {tool_name}: {reason}")]
    InvalidArguments { tool_name: String, reason: String },
}

impl ToolError {
    /// Convenience constructor for handler failures.
    pub fn handler(message: impl Into<String>) -> Self {
        Self::HandlerFailed(message.into())
    }
}

#[derive(Debug, Clone, Error)]
pub enum ConfigurationError {
    #[error(
        "Agent registration mismatch: Agent with ID \"{agent_id}\" cannot be registered under key \"{key}\". \
         The agent ID must match the registration key or be unset."
    )]
    AgentIdMismatch { agent_id: String, key: String },

    #[error("Invalid runtime transport: {0}")]
    InvalidTransport(String),
}

/// Codes attached to every error published on the core event channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoreErrorCode {
    RuntimeInfoFetchFailed,
    AgentConnectFailed,
    AgentRunFailed,
    AgentRunFailedEvent,
    AgentRunErrorEvent,
    ToolArgumentParseFailed,
    ToolHandlerFailed,
}

impl CoreErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RuntimeInfoFetchFailed => "runtime_info_fetch_failed",
            Self::AgentConnectFailed => "agent_connect_failed",
            Self::AgentRunFailed => "agent_run_failed",
            Self::AgentRunFailedEvent => "agent_run_failed_event",
            Self::AgentRunErrorEvent => "agent_run_error_event",
            Self::ToolArgumentParseFailed => "tool_argument_parse_failed",
            Self::ToolHandlerFailed => "tool_handler_failed",
        }
    }
}

impl std::fmt::Display for CoreErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_id_mismatch_displays_both_ids() {
        let err = CoreError::Configuration(ConfigurationError::AgentIdMismatch {
            agent_id: "weather".into(),
            key: "default".into(),
        });
        let text = err.to_string();
        assert!(text.contains("\"weather\""));
        assert!(text.contains("\"default\""));
    }

    #[test]
    fn handler_failure_displays_bare_message() {
        let err = ToolError::handler("boom");
        assert_eq!(err.to_string(), "boom");
    }

    #[test]
    fn error_codes_serialize_snake_case() {
        let json = serde_json::to_string(&CoreErrorCode::ToolArgumentParseFailed).unwrap();
        assert_eq!(json, r#""tool_argument_parse_failed""#);
        assert_eq!(
            CoreErrorCode::RuntimeInfoFetchFailed.to_string(),
            "runtime_info_fetch_failed"
        );
    }
}
