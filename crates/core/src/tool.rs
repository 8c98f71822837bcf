//! Frontend tools and the tool registry.
//!
//! A frontend tool is a function the host application exposes to agents.
//! Agents see only its [`ToolDefinition`]; when an agent requests a call the
//! run handler looks the tool up here and invokes its [`ToolHandler`].

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::error::ToolError;
use crate::message::ToolCall;

/// Name of the catch-all tool consulted when no exact match exists.
pub const WILDCARD_TOOL_NAME: &str = "*";

/// The callable half of a frontend tool.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Execute the tool with parsed arguments.
    async fn call(&self, args: Value, call: &ToolCall) -> Result<Value, ToolError>;
}

/// Adapter turning an async closure into a [`ToolHandler`].
pub struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> ToolHandler for FnHandler<F>
where
    F: Fn(Value, ToolCall) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, ToolError>> + Send,
{
    async fn call(&self, args: Value, call: &ToolCall) -> Result<Value, ToolError> {
        (self.0)(args, call.clone()).await
    }
}

/// Tool definition as advertised to an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema for the arguments, always an object schema
    pub parameters: Value,
}

/// A tool registered by the host application.
#[derive(Clone)]
pub struct FrontendTool {
    pub name: String,
    pub description: Option<String>,
    /// Raw JSON Schema for the arguments; normalized when advertised
    pub parameters: Option<Value>,
    pub handler: Option<Arc<dyn ToolHandler>>,
    /// `Some(false)` suppresses the follow-up run after this tool executes
    pub follow_up: Option<bool>,
    /// Restricts the tool to one agent; `None` makes it global
    pub agent_id: Option<String>,
}

impl FrontendTool {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            parameters: None,
            handler: None,
            follow_up: None,
            agent_id: None,
        }
    }

    /// The catch-all tool. Its handler receives `{"toolName", "args"}`.
    pub fn wildcard() -> Self {
        Self::new(WILDCARD_TOOL_NAME)
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_parameters(mut self, schema: Value) -> Self {
        self.parameters = Some(schema);
        self
    }

    /// Derive the argument schema from a Rust type.
    pub fn with_schema_for<T: JsonSchema>(mut self) -> Self {
        self.parameters = serde_json::to_value(schemars::schema_for!(T)).ok();
        self
    }

    pub fn with_handler(mut self, handler: impl ToolHandler + 'static) -> Self {
        self.handler = Some(Arc::new(handler));
        self
    }

    pub fn with_handler_fn<F, Fut>(self, f: F) -> Self
    where
        F: Fn(Value, ToolCall) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, ToolError>> + Send + 'static,
    {
        self.with_handler(FnHandler(f))
    }

    pub fn with_follow_up(mut self, follow_up: bool) -> Self {
        self.follow_up = Some(follow_up);
        self
    }

    pub fn for_agent(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    pub fn wants_follow_up(&self) -> bool {
        self.follow_up != Some(false)
    }

    pub fn is_wildcard(&self) -> bool {
        self.name == WILDCARD_TOOL_NAME
    }

    pub fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name.clone(),
            description: self.description.clone().unwrap_or_default(),
            parameters: normalize_tool_schema(self.parameters.as_ref()),
        }
    }

    fn scope(&self) -> &str {
        self.agent_id.as_deref().unwrap_or("global")
    }
}

impl std::fmt::Debug for FrontendTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrontendTool")
            .field("name", &self.name)
            .field("agent_id", &self.agent_id)
            .field("follow_up", &self.follow_up)
            .field("has_handler", &self.handler.is_some())
            .finish()
    }
}

/// Ordered registry of frontend tools.
///
/// A name is unique per scope: a global tool and an agent-scoped tool may
/// share a name, and the scoped one wins for that agent.
#[derive(Debug, Default, Clone)]
pub struct ToolRegistry {
    tools: Vec<FrontendTool>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool; a duplicate name within the same scope is rejected.
    pub fn add(&mut self, tool: FrontendTool) -> Result<(), ToolError> {
        if self.exact(&tool.name, tool.agent_id.as_deref()).is_some() {
            tracing::warn!(tool = %tool.name, scope = tool.scope(), "Tool already exists, skipping");
            return Err(ToolError::AlreadyRegistered {
                name: tool.name.clone(),
                scope: tool.scope().to_string(),
            });
        }
        self.tools.push(tool);
        Ok(())
    }

    /// Remove the tool registered under `name` in the given scope.
    pub fn remove(&mut self, name: &str, agent_id: Option<&str>) -> bool {
        let before = self.tools.len();
        self.tools
            .retain(|t| !(t.name == name && t.agent_id.as_deref() == agent_id));
        self.tools.len() != before
    }

    /// Look up a tool, preferring the agent-scoped one over the global one.
    pub fn get(&self, name: &str, agent_id: Option<&str>) -> Option<&FrontendTool> {
        agent_id
            .and_then(|id| self.exact(name, Some(id)))
            .or_else(|| self.exact(name, None))
    }

    /// Replace every tool. Later duplicates are dropped.
    pub fn set(&mut self, tools: Vec<FrontendTool>) {
        self.tools.clear();
        for tool in tools {
            let _ = self.add(tool);
        }
    }

    pub fn tools(&self) -> &[FrontendTool] {
        &self.tools
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Tools visible to `agent_id`: global tools plus those scoped to it.
    pub fn visible_to<'a>(&'a self, agent_id: &'a str) -> impl Iterator<Item = &'a FrontendTool> {
        self.tools.iter().filter(move |t| match t.agent_id.as_deref() {
            None => self.exact(&t.name, Some(agent_id)).is_none(),
            Some(scope) => scope == agent_id,
        })
    }

    /// Definitions advertised to `agent_id`. The wildcard is never advertised.
    pub fn definitions(&self, agent_id: &str) -> Vec<ToolDefinition> {
        self.visible_to(agent_id)
            .filter(|t| !t.is_wildcard())
            .map(FrontendTool::definition)
            .collect()
    }

    fn exact(&self, name: &str, agent_id: Option<&str>) -> Option<&FrontendTool> {
        self.tools
            .iter()
            .find(|t| t.name == name && t.agent_id.as_deref() == agent_id)
    }
}

/// Normalize a tool's argument schema into the shape agents accept: an
/// object schema with a `properties` object, no `$schema` key and no
/// `additionalProperties` anywhere.
pub fn normalize_tool_schema(schema: Option<&Value>) -> Value {
    let Some(Value::Object(raw)) = schema else {
        return json!({ "type": "object", "properties": {} });
    };

    let mut schema: Map<String, Value> = raw.clone();
    schema.remove("$schema");
    if !matches!(schema.get("type"), Some(Value::String(_))) {
        schema.insert("type".into(), Value::String("object".into()));
    }
    if !matches!(schema.get("properties"), Some(Value::Object(_))) {
        schema.insert("properties".into(), Value::Object(Map::new()));
    }

    let mut schema = Value::Object(schema);
    strip_additional_properties(&mut schema);
    schema
}

fn strip_additional_properties(value: &mut Value) {
    match value {
        Value::Object(map) => {
            map.remove("additionalProperties");
            map.values_mut().for_each(strip_additional_properties);
        }
        Value::Array(items) => items.iter_mut().for_each(strip_additional_properties),
        _ => {}
    }
}
