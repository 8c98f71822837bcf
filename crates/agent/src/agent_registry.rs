//! Local and runtime-discovered agents.
//!
//! Local agents are registered explicitly. Remote agents come from the
//! runtime descriptor and are replaced wholesale on every connection
//! update. The visible map merges both, local entries winning on a name
//! clash.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};

use agentdeck_core::error::ConfigurationError;
use agentdeck_core::sync::{read, write};
use agentdeck_core::{
    Agent, AgentMap, CoreErrorCode, CoreEvent, ErrorEvent, RuntimeConnectionStatus, RuntimeTransport,
};
use agentdeck_runtime::{RemoteAgentFactory, RuntimeInfoFetcher};
use tracing::{debug, info, warn};

use crate::facade::CoreFacade;

#[derive(Debug, Default)]
struct RuntimeSettings {
    url: Option<String>,
    transport: RuntimeTransport,
    version: Option<String>,
    status: RuntimeConnectionStatus,
}

pub struct AgentRegistry {
    core: Weak<dyn CoreFacade>,
    local: RwLock<AgentMap>,
    remote: RwLock<AgentMap>,
    runtime: RwLock<RuntimeSettings>,
    /// Bumped on every connection update; stale fetches compare against it
    epoch: AtomicU64,
    fetcher: Arc<dyn RuntimeInfoFetcher>,
    factory: Arc<dyn RemoteAgentFactory>,
}

impl AgentRegistry {
    pub fn new(
        core: Weak<dyn CoreFacade>,
        fetcher: Arc<dyn RuntimeInfoFetcher>,
        factory: Arc<dyn RemoteAgentFactory>,
    ) -> Self {
        Self {
            core,
            local: RwLock::new(AgentMap::new()),
            remote: RwLock::new(AgentMap::new()),
            runtime: RwLock::new(RuntimeSettings::default()),
            epoch: AtomicU64::new(0),
            fetcher,
            factory,
        }
    }

    /// Local and remote agents merged, local first.
    pub fn agents(&self) -> AgentMap {
        let mut merged = read(&self.remote).clone();
        merged.extend(read(&self.local).iter().map(|(k, v)| (k.clone(), v.clone())));
        merged
    }

    /// Replace every local agent. All ids are checked before anything
    /// changes.
    pub fn set_agents(&self, agents: AgentMap) -> Result<(), ConfigurationError> {
        for (key, agent) in &agents {
            validate_agent_id(key, agent.as_ref())?;
        }
        let headers = self.headers();
        for (key, agent) in &agents {
            assign_agent_id(key, agent.as_ref());
            agent.set_headers(&headers);
        }
        *write(&self.local) = agents;
        self.notify_agents_changed();
        Ok(())
    }

    pub fn add_agent(&self, key: &str, agent: Arc<dyn Agent>) -> Result<(), ConfigurationError> {
        validate_agent_id(key, agent.as_ref())?;
        assign_agent_id(key, agent.as_ref());
        agent.set_headers(&self.headers());
        write(&self.local).insert(key.to_string(), agent);
        self.notify_agents_changed();
        Ok(())
    }

    /// Remove a local agent. Remote agents are owned by the runtime and
    /// cannot be removed.
    pub fn remove_agent(&self, key: &str) -> bool {
        let removed = write(&self.local).remove(key).is_some();
        if removed {
            self.notify_agents_changed();
        }
        removed
    }

    /// Look up an agent by id.
    ///
    /// While a runtime is configured but not yet connected a miss is
    /// expected and stays silent; otherwise it is logged.
    pub fn get_agent(&self, agent_id: &str) -> Option<Arc<dyn Agent>> {
        if let Some(agent) = read(&self.local).get(agent_id) {
            return Some(agent.clone());
        }
        if let Some(agent) = read(&self.remote).get(agent_id) {
            return Some(agent.clone());
        }

        let runtime = read(&self.runtime);
        let pending = matches!(
            runtime.status,
            RuntimeConnectionStatus::Disconnected | RuntimeConnectionStatus::Connecting
        );
        if runtime.url.is_none() || !pending {
            warn!(agent_id = %agent_id, "Agent not found");
        }
        None
    }

    /// Push `headers` to every local and remote agent.
    pub fn apply_headers(&self, headers: &HashMap<String, String>) {
        for agent in self.agents().values() {
            agent.set_headers(headers);
        }
    }

    pub fn runtime_url(&self) -> Option<String> {
        read(&self.runtime).url.clone()
    }

    pub fn runtime_transport(&self) -> RuntimeTransport {
        read(&self.runtime).transport
    }

    pub fn runtime_version(&self) -> Option<String> {
        read(&self.runtime).version.clone()
    }

    pub fn runtime_connection_status(&self) -> RuntimeConnectionStatus {
        read(&self.runtime).status
    }

    /// Store a new runtime URL (trailing `/` trimmed). Returns whether it
    /// differs from the current one.
    pub fn set_runtime_url(&self, url: Option<&str>) -> bool {
        let url = url.map(|u| u.trim_end_matches('/').to_string());
        let mut runtime = write(&self.runtime);
        if runtime.url == url {
            return false;
        }
        runtime.url = url;
        true
    }

    /// Store a new transport. Returns whether it changed.
    pub fn set_runtime_transport(&self, transport: RuntimeTransport) -> bool {
        let mut runtime = write(&self.runtime);
        if runtime.transport == transport {
            return false;
        }
        runtime.transport = transport;
        true
    }

    /// Re-run the connection state machine against the current runtime
    /// settings.
    ///
    /// Without a URL the registry drops to `Disconnected` immediately.
    /// Otherwise it moves to `Connecting`, fetches the descriptor and
    /// settles in `Connected` or `Error`. An update overtaken by a newer one
    /// discards its result.
    pub async fn update_runtime_connection(&self) {
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        let (url, transport) = {
            let runtime = read(&self.runtime);
            (runtime.url.clone(), runtime.transport)
        };

        let Some(url) = url else {
            {
                let mut runtime = write(&self.runtime);
                runtime.status = RuntimeConnectionStatus::Disconnected;
                runtime.version = None;
            }
            write(&self.remote).clear();
            self.notify_status(RuntimeConnectionStatus::Disconnected);
            self.notify_agents_changed();
            return;
        };

        write(&self.runtime).status = RuntimeConnectionStatus::Connecting;
        self.notify_status(RuntimeConnectionStatus::Connecting);

        let headers = self.headers();
        let fetched = self.fetcher.fetch(&url, transport, &headers).await;
        if self.epoch.load(Ordering::SeqCst) != epoch {
            debug!(runtime_url = %url, "Discarding superseded runtime info");
            return;
        }

        match fetched {
            Ok(runtime_info) => {
                let remote: AgentMap = runtime_info
                    .agents
                    .iter()
                    .map(|(id, description)| {
                        let agent = self.factory.create(id, description, &url, transport);
                        agent.set_headers(&headers);
                        (id.clone(), agent)
                    })
                    .collect();
                info!(
                    runtime_url = %url,
                    version = %runtime_info.version,
                    agents = remote.len(),
                    "Connected to runtime"
                );
                *write(&self.remote) = remote;
                {
                    let mut runtime = write(&self.runtime);
                    runtime.status = RuntimeConnectionStatus::Connected;
                    runtime.version = Some(runtime_info.version);
                }
                self.notify_status(RuntimeConnectionStatus::Connected);
                self.notify_agents_changed();
            }
            Err(e) => {
                write(&self.runtime).status = RuntimeConnectionStatus::Error;
                write(&self.remote).clear();
                self.notify_status(RuntimeConnectionStatus::Error);
                self.notify_agents_changed();

                let message = e.to_string();
                warn!(runtime_url = %url, error = %message, "Failed to load runtime info ({url}/info)");
                if let Some(core) = self.core.upgrade() {
                    core.emit_error(
                        ErrorEvent::new(CoreErrorCode::RuntimeInfoFetchFailed, message)
                            .with_context("runtimeUrl", url.clone()),
                    );
                }
            }
        }
    }

    fn headers(&self) -> HashMap<String, String> {
        self.core
            .upgrade()
            .map(|core| core.headers())
            .unwrap_or_default()
    }

    fn notify_status(&self, status: RuntimeConnectionStatus) {
        if let Some(core) = self.core.upgrade() {
            core.notify(CoreEvent::RuntimeConnectionStatusChanged { status });
        }
    }

    fn notify_agents_changed(&self) {
        if let Some(core) = self.core.upgrade() {
            core.notify(CoreEvent::AgentsChanged {
                agents: self.agents(),
            });
        }
    }
}

impl std::fmt::Debug for AgentRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let runtime = read(&self.runtime);
        f.debug_struct("AgentRegistry")
            .field("local", &read(&self.local).keys().collect::<Vec<_>>())
            .field("remote", &read(&self.remote).keys().collect::<Vec<_>>())
            .field("runtime_url", &runtime.url)
            .field("status", &runtime.status)
            .finish()
    }
}

/// An agent's own id, when set, must equal its registration key.
fn validate_agent_id(key: &str, agent: &dyn Agent) -> Result<(), ConfigurationError> {
    match agent.agent_id() {
        Some(agent_id) if agent_id != key => Err(ConfigurationError::AgentIdMismatch {
            agent_id,
            key: key.to_string(),
        }),
        _ => Ok(()),
    }
}

fn assign_agent_id(key: &str, agent: &dyn Agent) {
    if agent.agent_id().is_none() {
        agent.set_agent_id(key);
    }
}
