//! Remote agents proxied through a runtime endpoint.

use std::collections::HashMap;
use std::sync::Arc;

use agentdeck_core::agent::{Agent, AgentSubscriber, RunAgentInput, RunAgentParams, RunAgentResult};
use agentdeck_core::protocol::AgentEvent;
use agentdeck_core::{AgentCore, AgentError, Message, RuntimeTransport, Subscription};
use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

use crate::info::AgentDescription;
use crate::sse::SseDecoder;

#[derive(Debug, Clone, Copy)]
enum Operation {
    Run,
    Connect,
}

impl Operation {
    fn path(self) -> &'static str {
        match self {
            Self::Run => "run",
            Self::Connect => "connect",
        }
    }

    fn method(self) -> &'static str {
        match self {
            Self::Run => "agent/run",
            Self::Connect => "agent/connect",
        }
    }
}

/// An agent hosted by a remote runtime.
///
/// Runs are POSTed to the runtime and its SSE response is applied as the
/// run's event stream.
pub struct ProxiedRuntimeAgent {
    core: AgentCore,
    runtime_url: String,
    transport: RuntimeTransport,
    client: reqwest::Client,
}

impl ProxiedRuntimeAgent {
    pub fn new(
        agent_id: impl Into<String>,
        runtime_url: impl Into<String>,
        transport: RuntimeTransport,
        client: reqwest::Client,
    ) -> Self {
        Self {
            core: AgentCore::new().with_agent_id(agent_id),
            runtime_url: runtime_url.into().trim_end_matches('/').to_string(),
            transport,
            client,
        }
    }

    pub fn with_description(self, description: impl Into<String>) -> Self {
        Self {
            core: self.core.with_description(description),
            ..self
        }
    }

    pub fn runtime_url(&self) -> &str {
        &self.runtime_url
    }

    pub fn transport(&self) -> RuntimeTransport {
        self.transport
    }

    pub fn headers(&self) -> HashMap<String, String> {
        self.core.headers()
    }

    fn request(&self, operation: Operation, agent_id: &str, input: &RunAgentInput) -> reqwest::RequestBuilder {
        let body = match self.transport {
            RuntimeTransport::Rest => serde_json::to_value(input).unwrap_or(Value::Null),
            RuntimeTransport::Single => json!({
                "method": operation.method(),
                "params": { "agentId": agent_id },
                "body": input,
            }),
        };
        let url = match self.transport {
            RuntimeTransport::Rest => format!("{}/agent/{agent_id}/{}", self.runtime_url, operation.path()),
            RuntimeTransport::Single => self.runtime_url.clone(),
        };
        self.with_headers(self.client.post(url))
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .json(&body)
    }

    fn stop_request(&self, agent_id: &str, thread_id: &str) -> reqwest::RequestBuilder {
        let request = match self.transport {
            RuntimeTransport::Rest => self.client.post(format!(
                "{}/agent/{agent_id}/stop/{thread_id}",
                self.runtime_url
            )),
            RuntimeTransport::Single => self.client.post(&self.runtime_url).json(&json!({
                "method": "agent/stop",
                "params": { "agentId": agent_id, "threadId": thread_id },
            })),
        };
        self.with_headers(request)
    }

    fn with_headers(&self, mut request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        for (name, value) in self.core.headers() {
            request = request.header(name, value);
        }
        request
    }

    async fn execute(
        &self,
        operation: Operation,
        params: RunAgentParams,
        subscriber: Option<Arc<dyn AgentSubscriber>>,
    ) -> Result<RunAgentResult, AgentError> {
        let agent_id = self.core.agent_id().ok_or(AgentError::MissingId)?;
        let input = self.core.build_input(params);
        let request = self.request(operation, &agent_id, &input);

        info!(agent_id = %agent_id, run_id = %input.run_id, operation = operation.path(), "Starting remote run");

        let (tx, rx) = mpsc::channel(64);
        // Spawn task to read the SSE byte stream and decode events
        tokio::spawn(async move {
            let response = match request.send().await {
                Ok(response) => response,
                Err(e) => {
                    let _ = tx.send(Err(AgentError::Transport(e.to_string()))).await;
                    return;
                }
            };

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                let message = format!("Runtime request failed with status {}: {body}", status.as_u16());
                let _ = tx.send(Err(AgentError::RunFailed(message))).await;
                return;
            }

            let mut bytes = response.bytes_stream();
            let mut decoder = SseDecoder::new();
            loop {
                let next = tokio::select! {
                    _ = tx.closed() => return,
                    next = bytes.next() => next,
                };
                let chunk = match next {
                    None => break,
                    Some(Ok(chunk)) => chunk,
                    Some(Err(e)) => {
                        let _ = tx.send(Err(AgentError::Transport(e.to_string()))).await;
                        return;
                    }
                };
                for payload in decoder.push(&chunk) {
                    if !forward(&tx, &payload).await {
                        return;
                    }
                }
            }
            if let Some(payload) = decoder.finish() {
                forward(&tx, &payload).await;
            }
        });

        self.core.run(input, ReceiverStream::new(rx), subscriber).await
    }
}

/// Decode one SSE payload and send it on. Returns false once the run stopped
/// listening.
async fn forward(tx: &mpsc::Sender<Result<AgentEvent, AgentError>>, payload: &str) -> bool {
    match serde_json::from_str::<AgentEvent>(payload) {
        Ok(event) => tx.send(Ok(event)).await.is_ok(),
        Err(e) => {
            debug!(error = %e, "Skipping unrecognized runtime event");
            !tx.is_closed()
        }
    }
}

#[async_trait]
impl Agent for ProxiedRuntimeAgent {
    fn agent_id(&self) -> Option<String> {
        self.core.agent_id()
    }

    fn set_agent_id(&self, agent_id: &str) {
        self.core.set_agent_id(agent_id);
    }

    fn thread_id(&self) -> String {
        self.core.thread_id()
    }

    fn set_thread_id(&self, thread_id: &str) {
        self.core.set_thread_id(thread_id);
    }

    fn description(&self) -> Option<String> {
        self.core.description()
    }

    fn messages(&self) -> Vec<Message> {
        self.core.messages()
    }

    fn set_messages(&self, messages: Vec<Message>) {
        self.core.set_messages(messages);
    }

    fn add_message(&self, message: Message) {
        self.core.add_message(message);
    }

    fn insert_message_after(&self, anchor_id: &str, message: Message) {
        self.core.insert_message_after(anchor_id, message);
    }

    fn state(&self) -> Value {
        self.core.state()
    }

    fn set_state(&self, state: Value) {
        self.core.set_state(state);
    }

    fn set_headers(&self, headers: &HashMap<String, String>) {
        self.core.set_headers(headers);
    }

    async fn run_agent(
        &self,
        params: RunAgentParams,
        subscriber: Option<Arc<dyn AgentSubscriber>>,
    ) -> Result<RunAgentResult, AgentError> {
        self.execute(Operation::Run, params, subscriber).await
    }

    async fn connect_agent(
        &self,
        params: RunAgentParams,
        subscriber: Option<Arc<dyn AgentSubscriber>>,
    ) -> Result<RunAgentResult, AgentError> {
        self.execute(Operation::Connect, params, subscriber).await
    }

    fn detach_active_run(&self) {
        self.core.abort();
    }

    fn abort_run(&self) {
        self.core.abort();

        let Some(agent_id) = self.core.agent_id() else {
            return;
        };
        let thread_id = self.core.thread_id();
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            debug!(agent_id = %agent_id, "No runtime available, skipping remote stop");
            return;
        };
        let request = self.stop_request(&agent_id, &thread_id);
        handle.spawn(async move {
            match request.send().await {
                Ok(response) if !response.status().is_success() => {
                    warn!(agent_id = %agent_id, status = response.status().as_u16(), "Remote stop rejected");
                }
                Ok(_) => debug!(agent_id = %agent_id, thread_id = %thread_id, "Remote run stopped"),
                Err(e) => warn!(agent_id = %agent_id, error = %e, "Remote stop failed"),
            }
        });
    }

    fn clone_agent(&self) -> Arc<dyn Agent> {
        Arc::new(Self {
            core: self.core.fork(),
            runtime_url: self.runtime_url.clone(),
            transport: self.transport,
            client: self.client.clone(),
        })
    }

    fn subscribe(&self, subscriber: Arc<dyn AgentSubscriber>) -> Subscription {
        self.core.subscribe(subscriber)
    }
}

/// Creates the agents listed in a runtime descriptor.
pub trait RemoteAgentFactory: Send + Sync {
    fn create(
        &self,
        agent_id: &str,
        description: &AgentDescription,
        runtime_url: &str,
        transport: RuntimeTransport,
    ) -> Arc<dyn Agent>;
}

/// Default factory producing [`ProxiedRuntimeAgent`]s.
pub struct ProxiedAgentFactory {
    client: reqwest::Client,
}

impl ProxiedAgentFactory {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl RemoteAgentFactory for ProxiedAgentFactory {
    fn create(
        &self,
        agent_id: &str,
        description: &AgentDescription,
        runtime_url: &str,
        transport: RuntimeTransport,
    ) -> Arc<dyn Agent> {
        let agent = ProxiedRuntimeAgent::new(agent_id, runtime_url, transport, self.client.clone());
        match &description.description {
            Some(text) => Arc::new(agent.with_description(text.clone())),
            None => Arc::new(agent),
        }
    }
}
