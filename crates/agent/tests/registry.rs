//! Integration tests for agent registration, runtime discovery and run
//! state tracking.

mod common;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use agentdeck_agent::{AgentDeck, DeckOptions};
use agentdeck_core::error::ConfigurationError;
use agentdeck_core::protocol::AgentEvent;
use agentdeck_core::testing::{ScriptStep, ScriptedAgent};
use agentdeck_core::{
    Agent, AgentMap, CoreErrorCode, CoreEvent, Message, RuntimeConnectionStatus, RuntimeTransport,
};
use agentdeck_runtime::{
    AgentDescription, RemoteAgentFactory, RuntimeError, RuntimeInfo, RuntimeInfoFetcher,
};
use async_trait::async_trait;
use serde_json::json;

use common::{EventLog, as_dyn, deck, deck_with, say};

// ── Fakes ────────────────────────────────────────────────────────────────

/// Serves canned descriptors per runtime URL, optionally after a delay.
#[derive(Default)]
struct FakeFetcher {
    responses: HashMap<String, (Duration, Result<RuntimeInfo, RuntimeError>)>,
    requests: Mutex<Vec<(String, HashMap<String, String>)>>,
}

impl FakeFetcher {
    fn serving(mut self, url: &str, info: RuntimeInfo) -> Self {
        self.responses
            .insert(url.to_string(), (Duration::ZERO, Ok(info)));
        self
    }

    fn failing(mut self, url: &str, error: RuntimeError) -> Self {
        self.responses
            .insert(url.to_string(), (Duration::ZERO, Err(error)));
        self
    }

    fn slow(mut self, url: &str, delay: Duration, info: RuntimeInfo) -> Self {
        self.responses.insert(url.to_string(), (delay, Ok(info)));
        self
    }
}

#[async_trait]
impl RuntimeInfoFetcher for FakeFetcher {
    async fn fetch(
        &self,
        runtime_url: &str,
        _transport: RuntimeTransport,
        headers: &HashMap<String, String>,
    ) -> Result<RuntimeInfo, RuntimeError> {
        self.requests
            .lock()
            .unwrap()
            .push((runtime_url.to_string(), headers.clone()));
        let (delay, response) = self
            .responses
            .get(runtime_url)
            .cloned()
            .unwrap_or_else(|| (Duration::ZERO, Err(RuntimeError::Network("unreachable".into()))));
        tokio::time::sleep(delay).await;
        response
    }
}

/// Builds scripted stand-ins for remote agents and keeps them for
/// inspection.
#[derive(Default)]
struct FakeFactory {
    created: Mutex<Vec<Arc<ScriptedAgent>>>,
}

impl RemoteAgentFactory for FakeFactory {
    fn create(
        &self,
        agent_id: &str,
        description: &AgentDescription,
        _runtime_url: &str,
        _transport: RuntimeTransport,
    ) -> Arc<dyn Agent> {
        let agent = Arc::new(
            ScriptedAgent::new()
                .with_id(agent_id)
                .with_description(description.description.clone().unwrap_or_default()),
        );
        self.created.lock().unwrap().push(agent.clone());
        agent
    }
}

fn info(version: &str, agents: &[&str]) -> RuntimeInfo {
    RuntimeInfo {
        version: version.to_string(),
        agents: agents
            .iter()
            .map(|id| (id.to_string(), AgentDescription::default()))
            .collect(),
    }
}

fn remote_deck(
    fetcher: FakeFetcher,
    local: &[(&str, Arc<ScriptedAgent>)],
) -> (AgentDeck, Arc<FakeFetcher>, Arc<FakeFactory>) {
    let fetcher = Arc::new(fetcher);
    let factory = Arc::new(FakeFactory::default());
    let options = DeckOptions::default()
        .with_runtime("http://rt/", RuntimeTransport::Rest)
        .with_info_fetcher(fetcher.clone())
        .with_agent_factory(factory.clone());
    let options = DeckOptions {
        headers: HashMap::from([("x-tenant".to_string(), "acme".to_string())]),
        ..options
    };
    (deck_with(local, options), fetcher, factory)
}

fn statuses(log: &EventLog) -> Vec<RuntimeConnectionStatus> {
    log.events()
        .into_iter()
        .filter_map(|e| match e {
            CoreEvent::RuntimeConnectionStatusChanged { status } => Some(status),
            _ => None,
        })
        .collect()
}

fn keys(agents: &AgentMap) -> Vec<&str> {
    agents.keys().map(String::as_str).collect()
}

// ── Runtime connection ───────────────────────────────────────────────────

#[tokio::test]
async fn without_runtime_url_the_deck_stays_disconnected() {
    let deck = deck(&[]);
    let log = EventLog::attach(&deck);

    deck.refresh_runtime_connection().await;

    assert_eq!(deck.runtime_connection_status(), RuntimeConnectionStatus::Disconnected);
    assert_eq!(statuses(&log), vec![RuntimeConnectionStatus::Disconnected]);
    assert_eq!(deck.runtime_version(), None);
}

#[tokio::test]
async fn construction_does_not_contact_the_runtime() {
    let (deck, fetcher, _) = remote_deck(FakeFetcher::default(), &[]);

    assert!(fetcher.requests.lock().unwrap().is_empty());
    assert_eq!(deck.runtime_url().as_deref(), Some("http://rt"));
    assert_eq!(deck.runtime_connection_status(), RuntimeConnectionStatus::Disconnected);
}

#[tokio::test]
async fn successful_fetch_registers_remote_agents() {
    let local = Arc::new(ScriptedAgent::new().with_id("support"));
    let (deck, fetcher, factory) = remote_deck(
        FakeFetcher::default().serving("http://rt", info("2.0", &["research", "support"])),
        &[("support", local.clone())],
    );
    let log = EventLog::attach(&deck);

    deck.refresh_runtime_connection().await;

    assert_eq!(
        statuses(&log),
        vec![RuntimeConnectionStatus::Connecting, RuntimeConnectionStatus::Connected]
    );
    assert_eq!(deck.runtime_version().as_deref(), Some("2.0"));
    assert_eq!(keys(&deck.agents()), vec!["research", "support"]);

    // Local registrations win a name clash
    let support = deck.get_agent("support").unwrap();
    assert!(Arc::ptr_eq(&support, &as_dyn(&local)));

    let (url, headers) = fetcher.requests.lock().unwrap()[0].clone();
    assert_eq!(url, "http://rt");
    assert_eq!(headers["x-tenant"], "acme");
    for created in factory.created.lock().unwrap().iter() {
        assert_eq!(created.headers()["x-tenant"], "acme");
    }
    assert!(deck.state_manager().is_tracking("research"));
}

#[tokio::test]
async fn failed_fetch_reports_and_keeps_only_local_agents() {
    let local = Arc::new(ScriptedAgent::new().with_id("chat"));
    let (deck, _, _) = remote_deck(
        FakeFetcher::default().failing("http://rt", RuntimeError::InfoStatus(503)),
        &[("chat", local)],
    );
    let log = EventLog::attach(&deck);

    deck.refresh_runtime_connection().await;

    assert_eq!(deck.runtime_connection_status(), RuntimeConnectionStatus::Error);
    assert_eq!(keys(&deck.agents()), vec!["chat"]);
    let errors = log.errors();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].code, CoreErrorCode::RuntimeInfoFetchFailed);
    assert_eq!(errors[0].context["runtimeUrl"], "http://rt");
}

#[tokio::test]
async fn clearing_the_url_drops_remote_agents() {
    let (deck, _, _) = remote_deck(
        FakeFetcher::default().serving("http://rt", info("2.0", &["research"])),
        &[],
    );
    deck.refresh_runtime_connection().await;
    assert_eq!(keys(&deck.agents()), vec!["research"]);

    deck.set_runtime_url(None).await;

    assert_eq!(deck.runtime_connection_status(), RuntimeConnectionStatus::Disconnected);
    assert!(deck.agents().is_empty());
    assert_eq!(deck.runtime_version(), None);
    assert!(!deck.state_manager().is_tracking("research"));
}

#[tokio::test]
async fn unchanged_url_does_not_reconnect() {
    let (deck, fetcher, _) = remote_deck(
        FakeFetcher::default().serving("http://rt", info("2.0", &[])),
        &[],
    );

    deck.set_runtime_url(Some("http://rt/")).await;

    assert!(fetcher.requests.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn superseded_fetch_is_discarded() {
    let (deck, _, _) = remote_deck(
        FakeFetcher::default()
            .slow("http://rt", Duration::from_millis(500), info("1.0", &["old"]))
            .serving("http://next", info("2.0", &["new"])),
        &[],
    );

    let first = tokio::spawn({
        let deck = deck.clone();
        async move { deck.refresh_runtime_connection().await }
    });
    tokio::task::yield_now().await;
    deck.set_runtime_url(Some("http://next")).await;
    first.await.unwrap();

    assert_eq!(deck.runtime_version().as_deref(), Some("2.0"));
    assert_eq!(keys(&deck.agents()), vec!["new"]);
    assert_eq!(deck.runtime_connection_status(), RuntimeConnectionStatus::Connected);
}

// ── Local registration ───────────────────────────────────────────────────

#[tokio::test]
async fn mismatched_agent_id_is_rejected() {
    let deck = deck(&[]);
    let agent: Arc<dyn Agent> = Arc::new(ScriptedAgent::new().with_id("b"));

    let err = deck.add_agent("a", agent).unwrap_err();

    assert!(matches!(
        err,
        ConfigurationError::AgentIdMismatch { ref agent_id, ref key } if agent_id == "b" && key == "a"
    ));
    assert!(deck.agents().is_empty());
}

#[tokio::test]
async fn set_agents_is_all_or_nothing() {
    let existing = Arc::new(ScriptedAgent::new());
    let deck = deck(&[("chat", existing)]);

    let mut replacement = AgentMap::new();
    replacement.insert("fine".into(), Arc::new(ScriptedAgent::new()) as Arc<dyn Agent>);
    replacement.insert(
        "wrong".into(),
        Arc::new(ScriptedAgent::new().with_id("other")) as Arc<dyn Agent>,
    );

    assert!(deck.set_agents(replacement).is_err());
    assert_eq!(keys(&deck.agents()), vec!["chat"]);
}

#[tokio::test]
async fn registration_assigns_missing_ids_and_headers() {
    let options = DeckOptions {
        headers: HashMap::from([("authorization".to_string(), "Bearer t".to_string())]),
        ..Default::default()
    };
    let deck = deck_with(&[], options);
    let agent = Arc::new(ScriptedAgent::new());
    let log = EventLog::attach(&deck);

    deck.add_agent("helper", as_dyn(&agent)).unwrap();

    assert_eq!(agent.agent_id().as_deref(), Some("helper"));
    assert_eq!(agent.headers()["authorization"], "Bearer t");
    assert_eq!(log.kinds(), vec!["agents_changed"]);

    assert!(deck.remove_agent("helper"));
    assert!(!deck.remove_agent("helper"));
    assert!(deck.get_agent("helper").is_none());
}

// ── Run state tracking ───────────────────────────────────────────────────

#[tokio::test]
async fn runs_are_indexed_by_thread() {
    let agent = Arc::new(
        ScriptedAgent::with_runs(vec![
            vec![
                ScriptStep::Event(AgentEvent::StateSnapshot {
                    snapshot: json!({"step": 1}),
                }),
                say("a1", "first"),
            ],
            vec![
                ScriptStep::Event(AgentEvent::StateSnapshot {
                    snapshot: json!({"step": 2}),
                }),
                say("a2", "second"),
            ],
        ])
        .with_id("chat"),
    );
    let deck = deck(&[("chat", agent.clone())]);
    let thread = agent.thread_id();

    agent.add_message(Message::user("one"));
    deck.run_agent(&as_dyn(&agent)).await.unwrap();
    agent.add_message(Message::user("two"));
    deck.run_agent(&as_dyn(&agent)).await.unwrap();

    let states = deck.state_manager();
    let run_ids = states.get_run_ids_for_thread("chat", &thread);
    assert_eq!(run_ids.len(), 2);
    assert_eq!(
        states.get_states_for_thread("chat", &thread),
        vec![
            (run_ids[0].clone(), json!({"step": 1})),
            (run_ids[1].clone(), json!({"step": 2})),
        ]
    );
    assert_eq!(
        states.get_run_id_for_message("chat", &thread, "a2").as_deref(),
        Some(run_ids[1].as_str())
    );

    states.clear_thread_state("chat", &thread);
    assert!(states.get_run_ids_for_thread("chat", &thread).is_empty());
}

#[tokio::test]
async fn returned_states_are_copies() {
    let agent = Arc::new(
        ScriptedAgent::replying(vec![ScriptStep::Event(AgentEvent::StateSnapshot {
            snapshot: json!({"items": [1]}),
        })])
        .with_id("chat"),
    );
    let deck = deck(&[("chat", agent.clone())]);
    deck.run_agent(&as_dyn(&agent)).await.unwrap();

    let thread = agent.thread_id();
    let run_id = deck.state_manager().get_run_ids_for_thread("chat", &thread)[0].clone();
    let mut state = deck
        .state_manager()
        .get_state_by_run("chat", &thread, &run_id)
        .unwrap();
    state["items"] = json!([]);

    assert_eq!(
        deck.state_manager().get_state_by_run("chat", &thread, &run_id),
        Some(json!({"items": [1]}))
    );
}

// ── End to end over HTTP ─────────────────────────────────────────────────

mod http {
    use super::*;
    use axum::Router;
    use axum::extract::Path;
    use axum::http::{HeaderMap, header};
    use axum::routing::{get, post};
    use serde_json::Value;

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn sse(events: &[Value]) -> String {
        events.iter().map(|e| format!("data: {e}\n\n")).collect()
    }

    #[tokio::test]
    async fn discovered_agent_runs_through_the_runtime() {
        let seen = Arc::new(Mutex::new(None::<HeaderMap>));
        let captured = seen.clone();
        let app = Router::new()
            .route(
                "/info",
                get(|| async {
                    axum::Json(json!({
                        "version": "0.9.0",
                        "agents": {"support": {"name": "support", "description": "Answers questions"}}
                    }))
                }),
            )
            .route(
                "/agent/{id}/run",
                post(move |Path(id): Path<String>, headers: HeaderMap| {
                    let captured = captured.clone();
                    async move {
                        assert_eq!(id, "support");
                        *captured.lock().unwrap() = Some(headers);
                        let events = [
                            json!({"type": "RUN_STARTED", "threadId": "t", "runId": "r"}),
                            json!({"type": "TEXT_MESSAGE_START", "messageId": "m1", "role": "assistant"}),
                            json!({"type": "TEXT_MESSAGE_CONTENT", "messageId": "m1", "delta": "How can I help?"}),
                            json!({"type": "TEXT_MESSAGE_END", "messageId": "m1"}),
                            json!({"type": "RUN_FINISHED", "threadId": "t", "runId": "r"}),
                        ];
                        ([(header::CONTENT_TYPE, "text/event-stream")], sse(&events))
                    }
                }),
            );
        let url = serve(app).await;

        let options = DeckOptions {
            headers: HashMap::from([("authorization".to_string(), "Bearer t".to_string())]),
            ..DeckOptions::default().with_runtime(url, RuntimeTransport::Rest)
        };
        let deck = AgentDeck::new(options).unwrap();
        deck.refresh_runtime_connection().await;

        assert_eq!(deck.runtime_connection_status(), RuntimeConnectionStatus::Connected);
        assert_eq!(deck.runtime_version().as_deref(), Some("0.9.0"));

        let agent = deck.get_agent("support").unwrap();
        assert_eq!(agent.description().as_deref(), Some("Answers questions"));
        agent.add_message(Message::user("hello"));

        let result = deck.run_agent(&agent).await.unwrap();

        assert_eq!(result.new_messages.len(), 1);
        assert_eq!(result.new_messages[0].content, "How can I help?");
        let headers = seen.lock().unwrap().clone().unwrap();
        assert_eq!(headers["authorization"], "Bearer t");
    }
}
