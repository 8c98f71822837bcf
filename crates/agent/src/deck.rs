//! The orchestration core object.
//!
//! [`AgentDeck`] wires the components together and is the only public entry
//! point: agents, tools, context, suggestion configurations, headers and
//! properties are all managed through it, and everything observable is
//! published on its event bus.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, Weak};
use std::time::Duration;

use agentdeck_config::DeckConfig;
use agentdeck_core::error::{ConfigurationError, CoreError, ToolError};
use agentdeck_core::sync::{read, write};
use agentdeck_core::{
    Agent, AgentMap, ContextEntry, CoreEvent, CoreSubscriber, EventBus, FrontendTool,
    RunAgentResult, RuntimeConnectionStatus, RuntimeTransport, Subscription, SuggestionsConfig,
    ToolDefinition,
};
use agentdeck_runtime::{
    HttpRuntimeInfoFetcher, ProxiedAgentFactory, RemoteAgentFactory, RuntimeInfoFetcher, http_client,
};
use serde_json::{Map, Value};
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::agent_registry::AgentRegistry;
use crate::context_store::ContextStore;
use crate::facade::CoreFacade;
use crate::run_handler::RunHandler;
use crate::state_manager::StateManager;
use crate::suggestion_engine::{SuggestionEngine, SuggestionsSnapshot};

/// Programmatic construction options.
///
/// Unlike [`DeckConfig`] these can carry tools (which own handlers) and
/// pre-built agents, and can swap the runtime client for tests.
pub struct DeckOptions {
    pub runtime_url: Option<String>,
    pub runtime_transport: RuntimeTransport,
    pub headers: HashMap<String, String>,
    pub properties: Map<String, Value>,
    pub agents: AgentMap,
    pub tools: Vec<FrontendTool>,
    pub suggestions: Vec<SuggestionsConfig>,
    /// Ceiling on agent invocations per `run_agent` call
    pub max_follow_up_runs: u32,
    /// Connect timeout for runtime HTTP calls
    pub request_timeout: Duration,
    /// Replaces the HTTP runtime-info fetcher
    pub info_fetcher: Option<Arc<dyn RuntimeInfoFetcher>>,
    /// Replaces the proxied remote agent factory
    pub agent_factory: Option<Arc<dyn RemoteAgentFactory>>,
}

impl Default for DeckOptions {
    fn default() -> Self {
        let config = DeckConfig::default();
        Self {
            runtime_url: config.runtime_url,
            runtime_transport: config.runtime_transport,
            headers: config.headers,
            properties: config.properties,
            agents: AgentMap::new(),
            tools: Vec::new(),
            suggestions: config.suggestions,
            max_follow_up_runs: config.max_follow_up_runs,
            request_timeout: Duration::from_secs(config.request_timeout_secs),
            info_fetcher: None,
            agent_factory: None,
        }
    }
}

impl DeckOptions {
    /// Options mirroring a loaded configuration, with the given local
    /// agents.
    pub fn from_config(config: &DeckConfig, agents: AgentMap) -> Self {
        Self {
            runtime_url: config.runtime_url.clone(),
            runtime_transport: config.runtime_transport,
            headers: config.headers.clone(),
            properties: config.properties.clone(),
            agents,
            tools: Vec::new(),
            suggestions: config.suggestions.clone(),
            max_follow_up_runs: config.max_follow_up_runs,
            request_timeout: Duration::from_secs(config.request_timeout_secs),
            info_fetcher: None,
            agent_factory: None,
        }
    }

    pub fn with_agent(mut self, agent_id: impl Into<String>, agent: Arc<dyn Agent>) -> Self {
        self.agents.insert(agent_id.into(), agent);
        self
    }

    pub fn with_tool(mut self, tool: FrontendTool) -> Self {
        self.tools.push(tool);
        self
    }

    pub fn with_suggestions(mut self, config: impl Into<SuggestionsConfig>) -> Self {
        self.suggestions.push(config.into());
        self
    }

    pub fn with_runtime(mut self, url: impl Into<String>, transport: RuntimeTransport) -> Self {
        self.runtime_url = Some(url.into());
        self.runtime_transport = transport;
        self
    }

    pub fn with_info_fetcher(mut self, fetcher: Arc<dyn RuntimeInfoFetcher>) -> Self {
        self.info_fetcher = Some(fetcher);
        self
    }

    pub fn with_agent_factory(mut self, factory: Arc<dyn RemoteAgentFactory>) -> Self {
        self.agent_factory = Some(factory);
        self
    }
}

struct DeckInner {
    bus: EventBus,
    headers: RwLock<HashMap<String, String>>,
    properties: RwLock<Map<String, Value>>,
    context: ContextStore,
    registry: AgentRegistry,
    run_handler: RunHandler,
    suggestions: SuggestionEngine,
    state_manager: StateManager,
    max_follow_up_runs: u32,
}

impl CoreFacade for DeckInner {
    fn notify(&self, event: CoreEvent) {
        if let CoreEvent::AgentsChanged { agents } = &event {
            self.state_manager.sync_agents(agents);
        }
        debug!(event = event.kind(), "Publishing core event");
        self.bus.publish(event);
    }

    fn headers(&self) -> HashMap<String, String> {
        read(&self.headers).clone()
    }

    fn properties(&self) -> Map<String, Value> {
        read(&self.properties).clone()
    }

    fn context(&self) -> Vec<ContextEntry> {
        self.context.entries()
    }

    fn agent(&self, agent_id: &str) -> Option<Arc<dyn Agent>> {
        self.registry.get_agent(agent_id)
    }

    fn frontend_tools(&self, agent_id: &str) -> Vec<ToolDefinition> {
        self.run_handler.build_frontend_tools(Some(agent_id))
    }

    fn clear_suggestions(&self, agent_id: &str) {
        self.suggestions.clear_suggestions(agent_id);
    }

    fn reload_suggestions(&self, agent_id: &str) {
        self.suggestions.reload_suggestions(agent_id);
    }

    fn max_follow_up_runs(&self) -> u32 {
        self.max_follow_up_runs
    }
}

/// The agent orchestration core.
///
/// Cheap to clone; clones share the same state.
#[derive(Clone)]
pub struct AgentDeck {
    inner: Arc<DeckInner>,
}

impl AgentDeck {
    /// Build a deck. The runtime, if configured, is not contacted until
    /// [`refresh_runtime_connection`](Self::refresh_runtime_connection).
    pub fn new(options: DeckOptions) -> Result<Self, CoreError> {
        let (fetcher, factory) = match (options.info_fetcher, options.agent_factory) {
            (Some(fetcher), Some(factory)) => (fetcher, factory),
            (fetcher, factory) => {
                let client = http_client(options.request_timeout)
                    .map_err(|e| CoreError::Runtime(e.to_string()))?;
                let fetcher: Arc<dyn RuntimeInfoFetcher> = match fetcher {
                    Some(fetcher) => fetcher,
                    None => Arc::new(HttpRuntimeInfoFetcher::new(client.clone())),
                };
                let factory: Arc<dyn RemoteAgentFactory> = match factory {
                    Some(factory) => factory,
                    None => Arc::new(ProxiedAgentFactory::new(client)),
                };
                (fetcher, factory)
            }
        };

        let inner = Arc::new_cyclic(|weak: &Weak<DeckInner>| {
            let core: Weak<dyn CoreFacade> = weak.clone();
            DeckInner {
                bus: EventBus::default(),
                headers: RwLock::new(options.headers),
                properties: RwLock::new(options.properties),
                context: ContextStore::new(),
                registry: AgentRegistry::new(core.clone(), fetcher, factory),
                run_handler: RunHandler::new(core.clone()),
                suggestions: SuggestionEngine::new(core),
                state_manager: StateManager::new(),
                max_follow_up_runs: options.max_follow_up_runs,
            }
        });

        inner.registry.set_runtime_url(options.runtime_url.as_deref());
        inner.registry.set_runtime_transport(options.runtime_transport);
        inner.registry.set_agents(options.agents)?;
        inner.run_handler.set_tools(options.tools);
        for config in options.suggestions {
            inner.suggestions.add_suggestions_config(config);
        }

        info!(
            agents = inner.registry.agents().len(),
            runtime_url = ?inner.registry.runtime_url(),
            "Agent deck ready"
        );
        Ok(Self { inner })
    }

    pub fn from_config(config: &DeckConfig, agents: AgentMap) -> Result<Self, CoreError> {
        Self::new(DeckOptions::from_config(config, agents))
    }

    // --- Events ---

    /// Receive every core event synchronously, in publication order.
    pub fn subscribe(&self, subscriber: Arc<dyn CoreSubscriber>) -> Subscription {
        self.inner.bus.subscribe(subscriber)
    }

    /// Async stream of core events.
    pub fn events(&self) -> broadcast::Receiver<Arc<CoreEvent>> {
        self.inner.bus.receiver()
    }

    // --- Headers, properties, context ---

    pub fn headers(&self) -> HashMap<String, String> {
        self.inner.headers()
    }

    /// Replace the shared headers and push them to every agent.
    pub fn set_headers(&self, headers: HashMap<String, String>) {
        *write(&self.inner.headers) = headers.clone();
        self.inner.registry.apply_headers(&headers);
        self.inner.notify(CoreEvent::HeadersChanged { headers });
    }

    pub fn properties(&self) -> Map<String, Value> {
        self.inner.properties()
    }

    pub fn set_properties(&self, properties: Map<String, Value>) {
        *write(&self.inner.properties) = properties.clone();
        self.inner.notify(CoreEvent::PropertiesChanged { properties });
    }

    pub fn context(&self) -> Vec<ContextEntry> {
        self.inner.context()
    }

    /// Add a context entry sent with every run; returns its id.
    pub fn add_context(&self, entry: ContextEntry) -> String {
        let id = self.inner.context.add(entry);
        self.inner.notify(CoreEvent::ContextChanged);
        id
    }

    pub fn remove_context(&self, id: &str) -> bool {
        let removed = self.inner.context.remove(id);
        if removed {
            self.inner.notify(CoreEvent::ContextChanged);
        }
        removed
    }

    // --- Tools ---

    pub fn add_tool(&self, tool: FrontendTool) -> Result<(), ToolError> {
        self.inner.run_handler.add_tool(tool)
    }

    pub fn remove_tool(&self, name: &str, agent_id: Option<&str>) -> bool {
        self.inner.run_handler.remove_tool(name, agent_id)
    }

    pub fn get_tool(&self, name: &str, agent_id: Option<&str>) -> Option<FrontendTool> {
        self.inner.run_handler.get_tool(name, agent_id)
    }

    pub fn set_tools(&self, tools: Vec<FrontendTool>) {
        self.inner.run_handler.set_tools(tools);
    }

    pub fn tools(&self) -> Vec<FrontendTool> {
        self.inner.run_handler.tools()
    }

    pub fn build_frontend_tools(&self, agent_id: Option<&str>) -> Vec<ToolDefinition> {
        self.inner.run_handler.build_frontend_tools(agent_id)
    }

    // --- Suggestions ---

    pub fn add_suggestions_config(&self, config: impl Into<SuggestionsConfig>) -> String {
        self.inner.suggestions.add_suggestions_config(config)
    }

    pub fn remove_suggestions_config(&self, id: &str) -> bool {
        self.inner.suggestions.remove_suggestions_config(id)
    }

    pub fn suggestions_configs(&self) -> Vec<(String, SuggestionsConfig)> {
        self.inner.suggestions.suggestions_configs()
    }

    pub fn reload_suggestions(&self, agent_id: &str) {
        self.inner.suggestions.reload_suggestions(agent_id);
    }

    pub fn clear_suggestions(&self, agent_id: &str) {
        self.inner.suggestions.clear_suggestions(agent_id);
    }

    pub fn get_suggestions(&self, agent_id: &str) -> SuggestionsSnapshot {
        self.inner.suggestions.get_suggestions(agent_id)
    }

    // --- Agents ---

    pub fn agents(&self) -> AgentMap {
        self.inner.registry.agents()
    }

    pub fn get_agent(&self, agent_id: &str) -> Option<Arc<dyn Agent>> {
        self.inner.registry.get_agent(agent_id)
    }

    pub fn set_agents(&self, agents: AgentMap) -> Result<(), ConfigurationError> {
        self.inner.registry.set_agents(agents)
    }

    pub fn add_agent(&self, agent_id: &str, agent: Arc<dyn Agent>) -> Result<(), ConfigurationError> {
        self.inner.registry.add_agent(agent_id, agent)
    }

    pub fn remove_agent(&self, agent_id: &str) -> bool {
        self.inner.registry.remove_agent(agent_id)
    }

    // --- Runtime ---

    pub fn runtime_url(&self) -> Option<String> {
        self.inner.registry.runtime_url()
    }

    pub fn runtime_transport(&self) -> RuntimeTransport {
        self.inner.registry.runtime_transport()
    }

    pub fn runtime_version(&self) -> Option<String> {
        self.inner.registry.runtime_version()
    }

    pub fn runtime_connection_status(&self) -> RuntimeConnectionStatus {
        self.inner.registry.runtime_connection_status()
    }

    /// Point the deck at another runtime and reconnect. A no-op when the
    /// URL is unchanged.
    pub async fn set_runtime_url(&self, url: Option<&str>) {
        if self.inner.registry.set_runtime_url(url) {
            self.inner.registry.update_runtime_connection().await;
        }
    }

    /// Switch transport and reconnect. A no-op when unchanged.
    pub async fn set_runtime_transport(&self, transport: RuntimeTransport) {
        if self.inner.registry.set_runtime_transport(transport) {
            self.inner.registry.update_runtime_connection().await;
        }
    }

    /// Fetch the runtime descriptor again and rebuild the remote agents.
    pub async fn refresh_runtime_connection(&self) {
        self.inner.registry.update_runtime_connection().await;
    }

    // --- Runs ---

    /// Run `agent` through the tool-calling loop.
    pub async fn run_agent(&self, agent: &Arc<dyn Agent>) -> Result<RunAgentResult, CoreError> {
        self.inner.run_handler.run_agent(agent).await
    }

    /// Reset `agent` and reattach it to its remote conversation.
    pub async fn connect_agent(&self, agent: &Arc<dyn Agent>) -> Result<RunAgentResult, CoreError> {
        self.inner.run_handler.connect_agent(agent).await
    }

    pub fn stop_agent(&self, agent: &Arc<dyn Agent>) {
        agent.abort_run();
    }

    pub fn state_manager(&self) -> &StateManager {
        &self.inner.state_manager
    }

    pub fn max_follow_up_runs(&self) -> u32 {
        self.inner.max_follow_up_runs
    }
}

impl std::fmt::Debug for AgentDeck {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentDeck")
            .field("registry", &self.inner.registry)
            .field("run_handler", &self.inner.run_handler)
            .field("suggestions", &self.inner.suggestions)
            .finish()
    }
}
