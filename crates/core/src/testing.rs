//! Test doubles.
//!
//! [`ScriptedAgent`] is a local agent whose runs replay scripted events. It
//! records every input it receives so tests can assert on what the core
//! sent, and counts aborts and detaches.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::Stream;
use serde_json::Value;

use crate::agent::{Agent, AgentSubscriber, RunAgentInput, RunAgentParams, RunAgentResult};
use crate::error::AgentError;
use crate::message::Message;
use crate::protocol::AgentEvent;
use crate::runner::AgentCore;
use crate::subscription::Subscription;
use crate::sync::lock;

/// One step of a scripted run.
#[derive(Debug, Clone)]
pub enum ScriptStep {
    Event(AgentEvent),
    /// Append a complete message (expanded into its event sequence)
    Message(Message),
    Delay(Duration),
    /// Fail the run's stream with a transport error
    Fail(String),
}

type Responder = dyn Fn(&RunAgentInput) -> Vec<ScriptStep> + Send + Sync;

/// A local agent driven by a script.
pub struct ScriptedAgent {
    core: AgentCore,
    responder: Arc<Responder>,
    runs: AtomicUsize,
    connects: AtomicUsize,
    aborts: AtomicUsize,
    detaches: AtomicUsize,
    inputs: Mutex<Vec<RunAgentInput>>,
    clones: Arc<Mutex<Vec<Arc<ScriptedAgent>>>>,
}

impl ScriptedAgent {
    /// An agent whose runs produce nothing.
    pub fn new() -> Self {
        Self::with_responder(|_| Vec::new())
    }

    /// An agent answering each run with the next script; runs past the end
    /// produce nothing.
    pub fn with_runs(runs: Vec<Vec<ScriptStep>>) -> Self {
        let queue = Mutex::new(VecDeque::from(runs));
        Self::with_responder(move |_| lock(&queue).pop_front().unwrap_or_default())
    }

    /// An agent answering every run with the same script.
    pub fn replying(steps: Vec<ScriptStep>) -> Self {
        Self::with_responder(move |_| steps.clone())
    }

    pub fn with_responder<F>(responder: F) -> Self
    where
        F: Fn(&RunAgentInput) -> Vec<ScriptStep> + Send + Sync + 'static,
    {
        Self {
            core: AgentCore::new(),
            responder: Arc::new(responder),
            runs: AtomicUsize::new(0),
            connects: AtomicUsize::new(0),
            aborts: AtomicUsize::new(0),
            detaches: AtomicUsize::new(0),
            inputs: Mutex::new(Vec::new()),
            clones: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_id(self, agent_id: impl Into<String>) -> Self {
        Self {
            core: self.core.with_agent_id(agent_id),
            ..self
        }
    }

    pub fn with_description(self, description: impl Into<String>) -> Self {
        Self {
            core: self.core.with_description(description),
            ..self
        }
    }

    pub fn run_count(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn abort_count(&self) -> usize {
        self.aborts.load(Ordering::SeqCst)
    }

    pub fn detach_count(&self) -> usize {
        self.detaches.load(Ordering::SeqCst)
    }

    /// Inputs of every run and connect, oldest first.
    pub fn inputs(&self) -> Vec<RunAgentInput> {
        lock(&self.inputs).clone()
    }

    pub fn headers(&self) -> HashMap<String, String> {
        self.core.headers()
    }

    /// Every clone made from this agent or its clones.
    pub fn clones(&self) -> Vec<Arc<ScriptedAgent>> {
        lock(&self.clones).clone()
    }

    async fn execute(
        &self,
        params: RunAgentParams,
        subscriber: Option<Arc<dyn AgentSubscriber>>,
    ) -> Result<RunAgentResult, AgentError> {
        let input = self.core.build_input(params);
        lock(&self.inputs).push(input.clone());
        let steps = (self.responder)(&input);
        let events = script_stream(&input, steps);
        self.core.run(input, events, subscriber).await
    }
}

impl Default for ScriptedAgent {
    fn default() -> Self {
        Self::new()
    }
}

/// Wrap the steps in `RUN_STARTED`/`RUN_FINISHED` and pace them.
fn script_stream(
    input: &RunAgentInput,
    steps: Vec<ScriptStep>,
) -> impl Stream<Item = Result<AgentEvent, AgentError>> + Send + use<> {
    let mut queue: VecDeque<ScriptStep> = VecDeque::with_capacity(steps.len() + 2);
    queue.push_back(ScriptStep::Event(AgentEvent::RunStarted {
        thread_id: input.thread_id.clone(),
        run_id: input.run_id.clone(),
    }));
    for step in steps {
        match step {
            ScriptStep::Message(message) => queue.extend(
                AgentEvent::for_message(&message)
                    .into_iter()
                    .map(ScriptStep::Event),
            ),
            other => queue.push_back(other),
        }
    }
    queue.push_back(ScriptStep::Event(AgentEvent::RunFinished {
        thread_id: input.thread_id.clone(),
        run_id: input.run_id.clone(),
        result: None,
    }));

    futures::stream::unfold(Some(queue), |state| async move {
        let mut queue = state?;
        loop {
            match queue.pop_front()? {
                ScriptStep::Delay(duration) => tokio::time::sleep(duration).await,
                ScriptStep::Event(event) => return Some((Ok(event), Some(queue))),
                ScriptStep::Fail(message) => return Some((Err(AgentError::Transport(message)), None)),
                ScriptStep::Message(_) => {}
            }
        }
    })
}

#[async_trait]
impl Agent for ScriptedAgent {
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
        self.runs.fetch_add(1, Ordering::SeqCst);
        self.execute(params, subscriber).await
    }

    async fn connect_agent(
        &self,
        params: RunAgentParams,
        subscriber: Option<Arc<dyn AgentSubscriber>>,
    ) -> Result<RunAgentResult, AgentError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.execute(params, subscriber).await
    }

    fn detach_active_run(&self) {
        self.detaches.fetch_add(1, Ordering::SeqCst);
        self.core.abort();
    }

    fn abort_run(&self) {
        self.aborts.fetch_add(1, Ordering::SeqCst);
        self.core.abort();
    }

    fn clone_agent(&self) -> Arc<dyn Agent> {
        let copy = Arc::new(ScriptedAgent {
            core: self.core.fork(),
            responder: self.responder.clone(),
            runs: AtomicUsize::new(0),
            connects: AtomicUsize::new(0),
            aborts: AtomicUsize::new(0),
            detaches: AtomicUsize::new(0),
            inputs: Mutex::new(Vec::new()),
            clones: self.clones.clone(),
        });
        lock(&self.clones).push(copy.clone());
        copy
    }

    fn subscribe(&self, subscriber: Arc<dyn AgentSubscriber>) -> Subscription {
        self.core.subscribe(subscriber)
    }
}
