//! Shared fixtures for the deck integration tests.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use agentdeck_agent::{AgentDeck, DeckOptions};
use agentdeck_core::testing::{ScriptStep, ScriptedAgent};
use agentdeck_core::{Agent, CoreEvent, ErrorEvent, Message, SubscriberResult, Suggestion, ToolCall};
use tokio::sync::broadcast;

/// Records every core event published by a deck.
pub struct EventLog {
    events: Arc<Mutex<Vec<CoreEvent>>>,
}

impl EventLog {
    pub fn attach(deck: &AgentDeck) -> Self {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        deck.subscribe(Arc::new(move |event: &CoreEvent| -> SubscriberResult {
            sink.lock().unwrap().push(event.clone());
            Ok(())
        }));
        Self { events }
    }

    pub fn events(&self) -> Vec<CoreEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn kinds(&self) -> Vec<&'static str> {
        self.events().iter().map(CoreEvent::kind).collect()
    }

    pub fn errors(&self) -> Vec<ErrorEvent> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                CoreEvent::Error(error) => Some(error),
                _ => None,
            })
            .collect()
    }

    /// Every suggestion list published for `agent_id`, in order.
    pub fn suggestion_lists(&self, agent_id: &str) -> Vec<Vec<Suggestion>> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                CoreEvent::SuggestionsChanged {
                    agent_id: id,
                    suggestions,
                } if id == agent_id => Some(suggestions),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, kind: &str) -> usize {
        self.kinds().iter().filter(|k| **k == kind).count()
    }
}

/// A deck with the given local agents and default options otherwise.
pub fn deck(agents: &[(&str, Arc<ScriptedAgent>)]) -> AgentDeck {
    deck_with(agents, DeckOptions::default())
}

pub fn deck_with(agents: &[(&str, Arc<ScriptedAgent>)], options: DeckOptions) -> AgentDeck {
    let options = agents.iter().fold(options, |options, (id, agent)| {
        let agent: Arc<dyn Agent> = agent.clone();
        options.with_agent(*id, agent)
    });
    AgentDeck::new(options).unwrap()
}

pub fn as_dyn(agent: &Arc<ScriptedAgent>) -> Arc<dyn Agent> {
    agent.clone()
}

/// An assistant message carrying tool calls given as `(id, name, args)`.
pub fn calling(message_id: &str, calls: &[(&str, &str, &str)]) -> ScriptStep {
    ScriptStep::Message(
        Message::assistant("").with_id(message_id).with_tool_calls(
            calls
                .iter()
                .map(|(id, name, args)| ToolCall::new(*id, *name, *args))
                .collect(),
        ),
    )
}

pub fn say(message_id: &str, text: &str) -> ScriptStep {
    ScriptStep::Message(Message::assistant(text).with_id(message_id))
}

/// Wait for the first event matching `pred`, failing after five seconds.
pub async fn wait_for(
    events: &mut broadcast::Receiver<Arc<CoreEvent>>,
    pred: impl Fn(&CoreEvent) -> bool,
) -> Arc<CoreEvent> {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await {
                Ok(event) if pred(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => panic!("event bus closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

pub fn finished_loading(agent_id: &'static str) -> impl Fn(&CoreEvent) -> bool {
    move |event| {
        matches!(event, CoreEvent::SuggestionsFinishedLoading { agent_id: id } if id == agent_id)
    }
}
