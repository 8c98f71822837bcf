//! Speculative suggestion generation.
//!
//! For every suggestion configuration that applies to a consumer agent the
//! engine produces one *generation*: static configurations publish their
//! list immediately, dynamic ones clone the provider agent, hand it the
//! consumer's conversation and force it to call the suggest tool. The
//! tool's arguments are re-parsed as they stream in so the list grows live.
//!
//! A consumer is loading from the moment its first dynamic generation
//! starts until its last one settles. Clearing aborts every running clone
//! and discards whatever they publish afterwards.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock, Weak};

use agentdeck_core::suggestion::{DEFAULT_MAX_SUGGESTIONS, DEFAULT_MIN_SUGGESTIONS, DEFAULT_PROVIDER_AGENT_ID};
use agentdeck_core::sync::{lock, read, write};
use agentdeck_core::{
    Agent, AgentSubscriber, CoreEvent, DynamicSuggestionsConfig, Message, Role, RunAgentInput,
    RunAgentParams, Suggestion, SuggestionsConfig, ToolDefinition,
};
use serde_json::{Value, json};
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::facade::CoreFacade;
use crate::partial_json::parse_partial;

/// Name of the tool the provider agent is forced to call.
pub const SUGGEST_TOOL_NAME: &str = "copilotkitSuggest";

/// The tool advertised to suggestion runs.
pub fn suggest_tool() -> ToolDefinition {
    ToolDefinition {
        name: SUGGEST_TOOL_NAME.into(),
        description: "Suggest what the user could say next".into(),
        parameters: json!({
            "type": "object",
            "properties": {
                "suggestions": {
                    "type": "array",
                    "description": "List of suggestions shown to the user as buttons.",
                    "items": {
                        "type": "object",
                        "properties": {
                            "title": {
                                "type": "string",
                                "description": "The title of the suggestion. This is shown as a button and should be short."
                            },
                            "message": {
                                "type": "string",
                                "description": "The message to send when the suggestion is clicked. This should be a clear, complete sentence and will be sent as an instruction to the AI."
                            }
                        },
                        "required": ["title", "message"]
                    }
                }
            },
            "required": ["suggestions"]
        }),
    }
}

/// What a consumer currently shows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SuggestionsSnapshot {
    pub suggestions: Vec<Suggestion>,
    pub is_loading: bool,
}

#[derive(Default)]
struct ConsumerSuggestions {
    /// Suggestions per generation, in start order
    generations: Vec<(String, Vec<Suggestion>)>,
    running: Vec<RunningGeneration>,
}

/// A provider clone that has not settled yet.
struct RunningGeneration {
    generation_id: String,
    agent: Arc<dyn Agent>,
    /// Cancelled on clear, even before the clone's run has started
    cancel: CancellationToken,
}

impl ConsumerSuggestions {
    fn flattened(&self) -> Vec<Suggestion> {
        self.generations
            .iter()
            .flat_map(|(_, suggestions)| suggestions.iter().cloned())
            .collect()
    }
}

struct Shared {
    core: Weak<dyn CoreFacade>,
    configs: RwLock<Vec<(String, SuggestionsConfig)>>,
    consumers: Mutex<HashMap<String, ConsumerSuggestions>>,
}

/// A prepared dynamic generation, ready to run.
struct Generation {
    consumer_id: String,
    generation_id: String,
    agent: Arc<dyn Agent>,
    params: RunAgentParams,
    cancel: CancellationToken,
}

/// Owns the suggestion configurations and the per-consumer suggestion
/// lists.
pub struct SuggestionEngine {
    shared: Arc<Shared>,
}

impl SuggestionEngine {
    pub fn new(core: Weak<dyn CoreFacade>) -> Self {
        Self {
            shared: Arc::new(Shared {
                core,
                configs: RwLock::new(Vec::new()),
                consumers: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Register a configuration and return its id.
    pub fn add_suggestions_config(&self, config: impl Into<SuggestionsConfig>) -> String {
        let id = Uuid::new_v4().to_string();
        write(&self.shared.configs).push((id.clone(), config.into()));
        self.shared.notify(CoreEvent::SuggestionsConfigChanged);
        id
    }

    pub fn remove_suggestions_config(&self, id: &str) -> bool {
        let removed = {
            let mut configs = write(&self.shared.configs);
            let before = configs.len();
            configs.retain(|(config_id, _)| config_id != id);
            configs.len() != before
        };
        if removed {
            self.shared.notify(CoreEvent::SuggestionsConfigChanged);
        }
        removed
    }

    /// Registered configurations with their ids, in registration order.
    pub fn suggestions_configs(&self) -> Vec<(String, SuggestionsConfig)> {
        read(&self.shared.configs).clone()
    }

    pub fn get_suggestions(&self, agent_id: &str) -> SuggestionsSnapshot {
        lock(&self.shared.consumers)
            .get(agent_id)
            .map(|entry| SuggestionsSnapshot {
                suggestions: entry.flattened(),
                is_loading: !entry.running.is_empty(),
            })
            .unwrap_or_default()
    }

    /// Discard the consumer's suggestions and start a new generation for
    /// every configuration that applies to it and is currently available.
    ///
    /// Dynamic generations run in the background; failures are logged and
    /// never reach the caller.
    pub fn reload_suggestions(&self, agent_id: &str) {
        self.clear_suggestions(agent_id);

        let Some(core) = self.shared.core.upgrade() else {
            return;
        };
        let Some(consumer) = core.agent(agent_id) else {
            return;
        };

        let message_count = consumer.messages().len();
        let configs: Vec<SuggestionsConfig> = read(&self.shared.configs)
            .iter()
            .map(|(_, config)| config)
            .filter(|config| config.applies_to(agent_id) && config.is_available(message_count))
            .cloned()
            .collect();

        // Register every generation before spawning any; the wave ends when
        // the last registered one settles.
        let mut generations = Vec::new();
        for config in configs {
            let generation_id = Uuid::new_v4().to_string();
            match config {
                SuggestionsConfig::Static(config) => {
                    self.shared
                        .add_static(agent_id, generation_id, config.suggestions);
                }
                SuggestionsConfig::Dynamic(config) => {
                    generations.extend(self.shared.prepare(
                        core.as_ref(),
                        consumer.as_ref(),
                        agent_id,
                        generation_id,
                        &config,
                    ));
                }
            }
        }

        if generations.is_empty() {
            return;
        }
        core.notify(CoreEvent::SuggestionsStartedLoading {
            agent_id: agent_id.to_string(),
        });
        for generation in generations {
            self.shared.spawn(generation);
        }
    }

    /// Abort every running generation for the consumer and empty its list.
    pub fn clear_suggestions(&self, agent_id: &str) {
        let removed = lock(&self.shared.consumers).remove(agent_id);
        let running = removed.map(|entry| entry.running).unwrap_or_default();
        let was_loading = !running.is_empty();
        for generation in running {
            debug!(
                agent_id = %agent_id,
                generation = %generation.generation_id,
                "Aborting suggestion generation"
            );
            generation.cancel.cancel();
            generation.agent.abort_run();
        }

        if was_loading {
            self.shared.notify(CoreEvent::SuggestionsFinishedLoading {
                agent_id: agent_id.to_string(),
            });
        }
        self.shared.notify(CoreEvent::SuggestionsChanged {
            agent_id: agent_id.to_string(),
            suggestions: Vec::new(),
        });
    }
}

impl std::fmt::Debug for SuggestionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SuggestionEngine")
            .field("configs", &read(&self.shared.configs).len())
            .field("consumers", &lock(&self.shared.consumers).len())
            .finish()
    }
}

impl Shared {
    fn notify(&self, event: CoreEvent) {
        if let Some(core) = self.core.upgrade() {
            core.notify(event);
        }
    }

    fn notify_changed(&self, consumer_id: &str, suggestions: Vec<Suggestion>) {
        self.notify(CoreEvent::SuggestionsChanged {
            agent_id: consumer_id.to_string(),
            suggestions,
        });
    }

    fn add_static(&self, consumer_id: &str, generation_id: String, suggestions: Vec<Suggestion>) {
        let suggestions = suggestions
            .into_iter()
            .map(|s| Suggestion {
                is_loading: false,
                ..s
            })
            .collect();
        let all = {
            let mut consumers = lock(&self.consumers);
            let entry = consumers.entry(consumer_id.to_string()).or_default();
            entry.generations.push((generation_id, suggestions));
            entry.flattened()
        };
        self.notify_changed(consumer_id, all);
    }

    /// Clone the provider, seed it with the consumer's conversation and the
    /// suggestion prompt, and register the generation as running.
    fn prepare(
        &self,
        core: &dyn CoreFacade,
        consumer: &dyn Agent,
        consumer_id: &str,
        generation_id: String,
        config: &DynamicSuggestionsConfig,
    ) -> Option<Generation> {
        let provider_id = config
            .provider_agent_id
            .as_deref()
            .unwrap_or(DEFAULT_PROVIDER_AGENT_ID);
        let Some(provider) = core.agent(provider_id) else {
            warn!(
                agent_id = %consumer_id,
                provider = %provider_id,
                "Suggestions provider agent not found"
            );
            return None;
        };

        let agent = provider.clone_agent();
        agent.set_thread_id(&generation_id);
        agent.set_messages(consumer.messages());
        agent.set_state(consumer.state());

        let cancel = CancellationToken::new();
        {
            let mut consumers = lock(&self.consumers);
            let entry = consumers.entry(consumer_id.to_string()).or_default();
            entry.generations.push((generation_id.clone(), Vec::new()));
            entry.running.push(RunningGeneration {
                generation_id: generation_id.clone(),
                agent: agent.clone(),
                cancel: cancel.clone(),
            });
        }

        let tools = serde_json::to_string(&core.frontend_tools(consumer_id))
            .unwrap_or_else(|_| "[]".into());
        let prompt = [
            format!(
                "Suggest what the user could say next. Provide clear, highly relevant suggestions by calling the `{SUGGEST_TOOL_NAME}` tool."
            ),
            format!(
                "Provide at least {} and at most {} suggestions.",
                config.min_suggestions.unwrap_or(DEFAULT_MIN_SUGGESTIONS),
                config.max_suggestions.unwrap_or(DEFAULT_MAX_SUGGESTIONS),
            ),
            format!("The user has the following tools available: {tools}."),
            format!(" {}", config.instructions),
        ]
        .join("\n");
        agent.add_message(Message::user(prompt).with_id(generation_id.clone()));

        let mut forwarded_props = core.properties();
        forwarded_props.insert(
            "toolChoice".into(),
            json!({ "type": "function", "function": { "name": SUGGEST_TOOL_NAME } }),
        );

        Some(Generation {
            consumer_id: consumer_id.to_string(),
            generation_id,
            agent,
            params: RunAgentParams {
                forwarded_props,
                tools: vec![suggest_tool()],
                context: core.context(),
                run_id: None,
            },
            cancel,
        })
    }

    fn spawn(self: &Arc<Self>, generation: Generation) {
        match Handle::try_current() {
            Ok(handle) => {
                let shared = self.clone();
                handle.spawn(async move { shared.generate(generation).await });
            }
            Err(_) => {
                warn!(
                    agent_id = %generation.consumer_id,
                    "No async runtime, skipping suggestion generation"
                );
                self.finish(&generation.consumer_id, &generation.generation_id, None);
            }
        }
    }

    async fn generate(self: Arc<Self>, generation: Generation) {
        let Generation {
            consumer_id,
            generation_id,
            agent,
            params,
            cancel,
        } = generation;

        let extractor: Arc<dyn AgentSubscriber> = Arc::new(StreamExtractor {
            shared: Arc::downgrade(&self),
            consumer_id: consumer_id.clone(),
            generation_id: generation_id.clone(),
        });
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(agent_id = %consumer_id, generation = %generation_id, "Suggestion generation cancelled");
                return;
            }
            outcome = agent.run_agent(params, Some(extractor)) => outcome,
        };
        let suggestions = match outcome {
            Ok(_) => final_suggestions(&agent.messages(), &generation_id),
            Err(e) => {
                warn!(agent_id = %consumer_id, error = %e, "Error generating suggestions");
                None
            }
        };
        self.finish(&consumer_id, &generation_id, suggestions);
    }

    /// Replace a running generation's list with streamed suggestions.
    /// Generations that were cleared are ignored.
    fn publish_streaming(&self, consumer_id: &str, generation_id: &str, suggestions: Vec<Suggestion>) {
        let all = {
            let mut consumers = lock(&self.consumers);
            let Some(entry) = consumers.get_mut(consumer_id) else {
                return;
            };
            let Some((_, slot)) = entry
                .generations
                .iter_mut()
                .find(|(id, _)| id == generation_id)
            else {
                return;
            };
            if *slot == suggestions {
                return;
            }
            *slot = suggestions;
            entry.flattened()
        };
        self.notify_changed(consumer_id, all);
    }

    /// Settle a generation: store its final list (dropping blank entries),
    /// stop tracking its clone and end the loading wave if it was the last.
    fn finish(&self, consumer_id: &str, generation_id: &str, suggestions: Option<Vec<Suggestion>>) {
        let (changed, finished) = {
            let mut consumers = lock(&self.consumers);
            let Some(entry) = consumers.get_mut(consumer_id) else {
                return;
            };

            let mut changed = None;
            if let Some(index) = entry
                .generations
                .iter()
                .position(|(id, _)| id == generation_id)
            {
                let finalized: Vec<Suggestion> = suggestions
                    .unwrap_or_default()
                    .into_iter()
                    .filter(|s| !(s.title.is_empty() && s.message.is_empty()))
                    .map(|s| Suggestion {
                        is_loading: false,
                        ..s
                    })
                    .collect();
                if finalized.is_empty() {
                    entry.generations.remove(index);
                } else {
                    entry.generations[index].1 = finalized;
                }
                changed = Some(entry.flattened());
            }

            let before = entry.running.len();
            entry.running.retain(|g| g.generation_id != generation_id);
            let finished = before != entry.running.len() && entry.running.is_empty();
            (changed, finished)
        };

        if let Some(all) = changed {
            self.notify_changed(consumer_id, all);
        }
        if finished {
            self.notify(CoreEvent::SuggestionsFinishedLoading {
                agent_id: consumer_id.to_string(),
            });
        }
    }
}

/// Re-parses the suggest tool's arguments every time the clone's messages
/// change.
struct StreamExtractor {
    shared: Weak<Shared>,
    consumer_id: String,
    generation_id: String,
}

impl AgentSubscriber for StreamExtractor {
    fn on_messages_changed(&self, messages: &[Message], _input: Option<&RunAgentInput>) {
        let Some(shared) = self.shared.upgrade() else {
            return;
        };
        let Some(suggestions) = collect_suggestions(messages, &self.generation_id, parse_partial) else {
            return;
        };
        let streaming = suggestions
            .into_iter()
            .map(|s| Suggestion {
                is_loading: true,
                ..s
            })
            .collect();
        shared.publish_streaming(&self.consumer_id, &self.generation_id, streaming);
    }
}

/// Strictly parse the completed tool call. Arguments that are not valid
/// JSON yield nothing.
fn final_suggestions(messages: &[Message], generation_id: &str) -> Option<Vec<Suggestion>> {
    collect_suggestions(messages, generation_id, |raw| serde_json::from_str(raw).ok())
}

/// Suggestions carried by suggest-tool calls after the prompt message.
/// `None` when no such call exists yet.
fn collect_suggestions(
    messages: &[Message],
    generation_id: &str,
    parse: impl Fn(&str) -> Option<Value>,
) -> Option<Vec<Suggestion>> {
    let prompt = messages.iter().position(|m| m.id == generation_id)?;
    let calls: Vec<&str> = messages[prompt + 1..]
        .iter()
        .filter(|m| m.role == Role::Assistant)
        .flat_map(|m| m.tool_calls.iter())
        .filter(|call| call.name() == SUGGEST_TOOL_NAME)
        .map(|call| call.function.arguments.as_str())
        .collect();
    if calls.is_empty() {
        return None;
    }

    let mut suggestions = Vec::new();
    for raw in calls {
        let Some(Value::Object(parsed)) = parse(raw) else {
            continue;
        };
        let Some(Value::Array(items)) = parsed.get("suggestions") else {
            continue;
        };
        for item in items {
            let Value::Object(item) = item else {
                continue;
            };
            if !item.contains_key("title") {
                continue;
            }
            let text = |key: &str| {
                item.get(key)
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string()
            };
            suggestions.push(Suggestion::new(text("title"), text("message")));
        }
    }
    Some(suggestions)
}
