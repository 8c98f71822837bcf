//! Per-run state and message provenance.
//!
//! The [`StateManager`] attaches a tracker to every agent it is told about
//! and records, per `(agent, thread, run)`, the state at each observed
//! point of the run and which run produced each message. Everything handed
//! out is an owned copy; tracked history can only change through the
//! trackers.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock, Weak};

use agentdeck_core::protocol::PatchOperation;
use agentdeck_core::sync::{lock, read, write};
use agentdeck_core::{Agent, AgentMap, AgentSubscriber, Message, RunAgentInput, Subscription};
use serde_json::Value;
use tracing::debug;

#[derive(Debug, Default)]
struct ThreadRuns {
    /// Run ids in the order they were first seen
    order: Vec<String>,
    states: HashMap<String, Value>,
    /// message id -> run id
    message_runs: HashMap<String, String>,
}

/// agent id -> thread id -> runs
type Tables = HashMap<String, HashMap<String, ThreadRuns>>;

struct Tracked {
    agent: Weak<dyn Agent>,
    subscription: Subscription,
}

/// Records run-indexed state snapshots and message provenance.
#[derive(Default)]
pub struct StateManager {
    tables: Arc<RwLock<Tables>>,
    tracked: Mutex<HashMap<String, Tracked>>,
}

impl StateManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking `agent`, replacing any tracker already attached for
    /// the same agent id. Agents without an id are ignored.
    pub fn subscribe_to_agent(&self, agent: &Arc<dyn Agent>) {
        let Some(agent_id) = agent.agent_id() else {
            debug!("Not tracking state of an agent without id");
            return;
        };
        let tracker = Arc::new(RunTracker {
            agent_id: agent_id.clone(),
            tables: self.tables.clone(),
        });
        let subscription = agent.subscribe(tracker);
        let previous = lock(&self.tracked).insert(
            agent_id,
            Tracked {
                agent: Arc::downgrade(agent),
                subscription,
            },
        );
        if let Some(previous) = previous {
            previous.subscription.unsubscribe();
        }
    }

    /// Detach the tracker for `agent_id`. Recorded history is kept.
    pub fn unsubscribe_from_agent(&self, agent_id: &str) {
        if let Some(tracked) = lock(&self.tracked).remove(agent_id) {
            tracked.subscription.unsubscribe();
        }
    }

    /// Track exactly the agents in `agents`: new ones are subscribed, ones
    /// that disappeared are detached, unchanged ones are left alone.
    pub fn sync_agents(&self, agents: &AgentMap) {
        let stale: Vec<String> = lock(&self.tracked)
            .iter()
            .filter(|(id, tracked)| match agents.get(id.as_str()) {
                Some(agent) => !Weak::ptr_eq(&tracked.agent, &Arc::downgrade(agent)),
                None => true,
            })
            .map(|(id, _)| id.clone())
            .collect();
        for id in &stale {
            self.unsubscribe_from_agent(id);
        }

        for (id, agent) in agents {
            let known = lock(&self.tracked).contains_key(id);
            if !known {
                self.subscribe_to_agent(agent);
            }
        }
    }

    pub fn is_tracking(&self, agent_id: &str) -> bool {
        lock(&self.tracked).contains_key(agent_id)
    }

    pub fn get_state_by_run(&self, agent_id: &str, thread_id: &str, run_id: &str) -> Option<Value> {
        read(&self.tables)
            .get(agent_id)?
            .get(thread_id)?
            .states
            .get(run_id)
            .cloned()
    }

    pub fn get_run_id_for_message(
        &self,
        agent_id: &str,
        thread_id: &str,
        message_id: &str,
    ) -> Option<String> {
        read(&self.tables)
            .get(agent_id)?
            .get(thread_id)?
            .message_runs
            .get(message_id)
            .cloned()
    }

    /// Every recorded `(run id, state)` of a thread, oldest run first.
    pub fn get_states_for_thread(&self, agent_id: &str, thread_id: &str) -> Vec<(String, Value)> {
        let tables = read(&self.tables);
        let Some(runs) = tables.get(agent_id).and_then(|t| t.get(thread_id)) else {
            return Vec::new();
        };
        runs.order
            .iter()
            .filter_map(|run_id| {
                runs.states
                    .get(run_id)
                    .map(|state| (run_id.clone(), state.clone()))
            })
            .collect()
    }

    pub fn get_run_ids_for_thread(&self, agent_id: &str, thread_id: &str) -> Vec<String> {
        read(&self.tables)
            .get(agent_id)
            .and_then(|t| t.get(thread_id))
            .map(|runs| runs.order.clone())
            .unwrap_or_default()
    }

    pub fn clear_agent_state(&self, agent_id: &str) {
        write(&self.tables).remove(agent_id);
    }

    pub fn clear_thread_state(&self, agent_id: &str, thread_id: &str) {
        if let Some(threads) = write(&self.tables).get_mut(agent_id) {
            threads.remove(thread_id);
        }
    }
}

impl std::fmt::Debug for StateManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateManager")
            .field("tracked", &lock(&self.tracked).keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Subscriber attached to one agent, writing into the shared tables.
struct RunTracker {
    agent_id: String,
    tables: Arc<RwLock<Tables>>,
}

impl RunTracker {
    fn with_runs<R>(&self, input: &RunAgentInput, f: impl FnOnce(&mut ThreadRuns) -> R) -> R {
        let mut tables = write(&self.tables);
        let runs = tables
            .entry(self.agent_id.clone())
            .or_default()
            .entry(input.thread_id.clone())
            .or_default();
        f(runs)
    }

    fn save_state(&self, input: &RunAgentInput, state: Value) {
        self.with_runs(input, |runs| {
            if !runs.states.contains_key(&input.run_id) {
                runs.order.push(input.run_id.clone());
            }
            runs.states.insert(input.run_id.clone(), state);
        });
    }

    fn record_message(&self, input: &RunAgentInput, message_id: &str) {
        self.with_runs(input, |runs| {
            runs.message_runs
                .insert(message_id.to_string(), input.run_id.clone());
        });
    }
}

impl AgentSubscriber for RunTracker {
    fn on_run_started_event(&self, input: &RunAgentInput, state: &Value) {
        self.save_state(input, state.clone());
    }

    fn on_run_finished_event(&self, input: &RunAgentInput, _result: Option<&Value>, state: &Value) {
        self.save_state(input, state.clone());
    }

    fn on_state_snapshot_event(&self, snapshot: &Value, input: &RunAgentInput, _state: &Value) {
        self.with_runs(input, |runs| {
            let merged = match (runs.states.get(&input.run_id), snapshot) {
                (Some(Value::Object(current)), Value::Object(incoming)) => {
                    let mut merged = current.clone();
                    merged.extend(incoming.clone());
                    Value::Object(merged)
                }
                _ => snapshot.clone(),
            };
            if !runs.states.contains_key(&input.run_id) {
                runs.order.push(input.run_id.clone());
            }
            runs.states.insert(input.run_id.clone(), merged);
        });
    }

    fn on_state_delta_event(&self, _delta: &[PatchOperation], input: &RunAgentInput, state: &Value) {
        self.save_state(input, state.clone());
    }

    fn on_messages_snapshot_event(&self, messages: &[Message], input: &RunAgentInput) {
        for message in messages {
            self.record_message(input, &message.id);
        }
    }

    fn on_new_message(&self, message: &Message, input: Option<&RunAgentInput>) {
        if let Some(input) = input {
            self.record_message(input, &message.id);
        }
    }
}
