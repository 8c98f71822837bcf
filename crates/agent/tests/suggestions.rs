//! Integration tests for suggestion generation.

mod common;

use std::sync::Arc;
use std::time::Duration;

use agentdeck_agent::{SUGGEST_TOOL_NAME, SuggestionsSnapshot};
use agentdeck_core::protocol::AgentEvent;
use agentdeck_core::testing::{ScriptStep, ScriptedAgent};
use agentdeck_core::{Agent, CoreEvent, Message, Role, Suggestion, SuggestionAvailability, SuggestionsConfig};

use common::{EventLog, as_dyn, deck, finished_loading, say, wait_for};

// ── Fixtures ─────────────────────────────────────────────────────────────

/// Steps streaming one suggest-tool call whose arguments arrive in `chunks`.
fn suggesting(chunks: &[&str]) -> Vec<ScriptStep> {
    let mut steps = vec![ScriptStep::Event(AgentEvent::ToolCallStart {
        tool_call_id: "s1".into(),
        tool_call_name: SUGGEST_TOOL_NAME.into(),
        parent_message_id: None,
    })];
    for chunk in chunks {
        steps.push(ScriptStep::Delay(Duration::from_millis(5)));
        steps.push(ScriptStep::Event(AgentEvent::ToolCallArgs {
            tool_call_id: "s1".into(),
            delta: (*chunk).into(),
        }));
    }
    steps.push(ScriptStep::Event(AgentEvent::ToolCallEnd {
        tool_call_id: "s1".into(),
    }));
    steps
}

fn provider(steps: Vec<ScriptStep>) -> Arc<ScriptedAgent> {
    Arc::new(ScriptedAgent::replying(steps))
}

/// A consumer that has already exchanged one message.
fn consumer() -> Arc<ScriptedAgent> {
    let agent = Arc::new(ScriptedAgent::new().with_id("chat"));
    agent.add_message(Message::user("hi"));
    agent
}

fn loading(title: &str, message: &str) -> Suggestion {
    Suggestion {
        is_loading: true,
        ..Suggestion::new(title, message)
    }
}

fn titles(snapshot: &SuggestionsSnapshot) -> Vec<&str> {
    snapshot.suggestions.iter().map(|s| s.title.as_str()).collect()
}

// ── Dynamic generation ───────────────────────────────────────────────────

#[tokio::test]
async fn streamed_suggestions_settle_into_final_list() {
    let provider = provider(suggesting(&[
        r#"{"suggestions":[{"title":"A","message":"do a"}"#,
        "]}",
    ]));
    let chat = consumer();
    let deck = deck(&[("chat", chat.clone()), ("default", provider.clone())]);
    deck.add_suggestions_config(SuggestionsConfig::dynamic("Keep it short"));
    let log = EventLog::attach(&deck);
    let mut events = deck.events();

    deck.reload_suggestions("chat");
    wait_for(&mut events, finished_loading("chat")).await;

    assert_eq!(
        log.suggestion_lists("chat"),
        vec![
            vec![],
            vec![loading("A", "do a")],
            vec![Suggestion::new("A", "do a")],
        ]
    );
    assert_eq!(log.count("suggestions_started_loading"), 1);
    assert_eq!(
        deck.get_suggestions("chat"),
        SuggestionsSnapshot {
            suggestions: vec![Suggestion::new("A", "do a")],
            is_loading: false,
        }
    );
}

#[tokio::test]
async fn generation_runs_on_an_isolated_clone() {
    let provider = provider(suggesting(&[r#"{"suggestions":[]}"#]));
    let chat = consumer();
    let deck = deck(&[("chat", chat.clone()), ("default", provider.clone())]);
    deck.add_suggestions_config(SuggestionsConfig::dynamic("Focus on billing").with_bounds(2, 4));
    let mut events = deck.events();

    deck.reload_suggestions("chat");
    wait_for(&mut events, finished_loading("chat")).await;

    assert_eq!(provider.run_count(), 0);
    assert_eq!(chat.messages().len(), 1);

    let clone = &provider.clones()[0];
    let input = &clone.inputs()[0];
    assert_eq!(input.tools.len(), 1);
    assert_eq!(input.tools[0].name, SUGGEST_TOOL_NAME);
    assert_eq!(input.forwarded_props["toolChoice"]["function"]["name"], SUGGEST_TOOL_NAME);

    let prompt = input.messages.last().unwrap();
    assert_eq!(prompt.role, Role::User);
    assert_eq!(prompt.id, input.thread_id);
    assert!(prompt.content.contains("at least 2 and at most 4"));
    assert!(prompt.content.ends_with("\n Focus on billing"));
    assert_eq!(input.messages[0].content, "hi");
}

#[tokio::test]
async fn parallel_generations_share_one_loading_wave() {
    let first = provider(suggesting(&[r#"{"suggestions":[{"title":"A","message":"a"}]}"#]));
    let second = provider(suggesting(&[r#"{"suggestions":[{"title":"B","message":"b"}]}"#]));
    let chat = consumer();
    let deck = deck(&[
        ("chat", chat),
        ("default", first),
        ("alt", second),
    ]);
    deck.add_suggestions_config(SuggestionsConfig::dynamic("first"));
    deck.add_suggestions_config(SuggestionsConfig::dynamic("second").with_provider("alt"));
    let log = EventLog::attach(&deck);
    let mut events = deck.events();

    deck.reload_suggestions("chat");
    wait_for(&mut events, finished_loading("chat")).await;

    assert_eq!(log.count("suggestions_started_loading"), 1);
    assert_eq!(log.count("suggestions_finished_loading"), 1);
    assert_eq!(titles(&deck.get_suggestions("chat")), vec!["A", "B"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn instant_generations_on_worker_threads_share_one_wave() {
    const WAVES: usize = 50;
    let instant = |title: &str| {
        provider(vec![
            ScriptStep::Event(AgentEvent::ToolCallStart {
                tool_call_id: "s1".into(),
                tool_call_name: SUGGEST_TOOL_NAME.into(),
                parent_message_id: None,
            }),
            ScriptStep::Event(AgentEvent::ToolCallArgs {
                tool_call_id: "s1".into(),
                delta: format!(r#"{{"suggestions":[{{"title":"{title}","message":""}}]}}"#),
            }),
            ScriptStep::Event(AgentEvent::ToolCallEnd {
                tool_call_id: "s1".into(),
            }),
        ])
    };
    let deck = deck(&[
        ("chat", consumer()),
        ("default", instant("A")),
        ("second", instant("B")),
        ("third", instant("C")),
    ]);
    deck.add_suggestions_config(SuggestionsConfig::dynamic("a"));
    deck.add_suggestions_config(SuggestionsConfig::dynamic("b").with_provider("second"));
    deck.add_suggestions_config(SuggestionsConfig::dynamic("c").with_provider("third"));
    let log = EventLog::attach(&deck);
    let mut events = deck.events();

    for _ in 0..WAVES {
        deck.reload_suggestions("chat");
        wait_for(&mut events, finished_loading("chat")).await;

        let snapshot = deck.get_suggestions("chat");
        assert!(!snapshot.is_loading);
        assert_eq!(titles(&snapshot), vec!["A", "B", "C"]);
    }
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(log.count("suggestions_started_loading"), WAVES);
    assert_eq!(log.count("suggestions_finished_loading"), WAVES);
}

#[tokio::test]
async fn missing_provider_starts_nothing() {
    let chat = consumer();
    let deck = deck(&[("chat", chat)]);
    deck.add_suggestions_config(SuggestionsConfig::dynamic("x").with_provider("ghost"));
    let log = EventLog::attach(&deck);

    deck.reload_suggestions("chat");

    assert_eq!(log.count("suggestions_started_loading"), 0);
    assert_eq!(deck.get_suggestions("chat"), SuggestionsSnapshot::default());
}

#[tokio::test]
async fn failed_generation_ends_loading_without_suggestions() {
    let provider = provider(vec![ScriptStep::Fail("provider down".into())]);
    let chat = consumer();
    let deck = deck(&[("chat", chat), ("default", provider)]);
    deck.add_suggestions_config(SuggestionsConfig::dynamic("x"));
    let mut events = deck.events();

    deck.reload_suggestions("chat");
    wait_for(&mut events, finished_loading("chat")).await;

    assert_eq!(deck.get_suggestions("chat"), SuggestionsSnapshot::default());
}

#[tokio::test]
async fn truncated_final_arguments_yield_nothing() {
    let provider = provider(suggesting(&[r#"{"suggestions":[{"title":"A","message":"a"}"#]));
    let chat = consumer();
    let deck = deck(&[("chat", chat), ("default", provider)]);
    deck.add_suggestions_config(SuggestionsConfig::dynamic("x"));
    let log = EventLog::attach(&deck);
    let mut events = deck.events();

    deck.reload_suggestions("chat");
    wait_for(&mut events, finished_loading("chat")).await;

    // Streamed while running, dropped once the run ends
    assert!(log.suggestion_lists("chat").contains(&vec![loading("A", "a")]));
    assert!(deck.get_suggestions("chat").suggestions.is_empty());
}

// ── Cancellation ─────────────────────────────────────────────────────────

#[tokio::test]
async fn clearing_aborts_running_generations() {
    let mut steps = vec![ScriptStep::Delay(Duration::from_secs(60))];
    steps.extend(suggesting(&[r#"{"suggestions":[{"title":"late","message":""}]}"#]));
    let provider = provider(steps);
    let chat = consumer();
    let deck = deck(&[("chat", chat), ("default", provider.clone())]);
    deck.add_suggestions_config(SuggestionsConfig::dynamic("x"));
    let log = EventLog::attach(&deck);

    deck.reload_suggestions("chat");
    tokio::task::yield_now().await;
    assert!(deck.get_suggestions("chat").is_loading);

    deck.clear_suggestions("chat");

    assert_eq!(provider.clones()[0].abort_count(), 1);
    assert_eq!(deck.get_suggestions("chat"), SuggestionsSnapshot::default());
    assert_eq!(log.count("suggestions_finished_loading"), 1);

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(log.suggestion_lists("chat").iter().all(Vec::is_empty));
}

#[tokio::test]
async fn generation_cleared_before_it_starts_never_runs() {
    let provider = provider(suggesting(&[r#"{"suggestions":[{"title":"A","message":"a"}]}"#]));
    let deck = deck(&[("chat", consumer()), ("default", provider.clone())]);
    deck.add_suggestions_config(SuggestionsConfig::dynamic("x"));
    let log = EventLog::attach(&deck);

    // The spawned generation has not been polled yet
    deck.reload_suggestions("chat");
    deck.clear_suggestions("chat");
    tokio::time::sleep(Duration::from_millis(50)).await;

    let clones = provider.clones();
    assert_eq!(clones.len(), 1);
    assert_eq!(clones[0].run_count(), 0);
    assert_eq!(log.count("suggestions_finished_loading"), 1);
    assert_eq!(deck.get_suggestions("chat"), SuggestionsSnapshot::default());
}

#[tokio::test]
async fn running_the_consumer_cancels_its_generations() {
    let provider = provider(vec![ScriptStep::Delay(Duration::from_secs(60))]);
    let chat = Arc::new(ScriptedAgent::replying(vec![say("a1", "hello")]).with_id("chat"));
    let deck = deck(&[("chat", chat.clone()), ("default", provider.clone())]);
    deck.add_suggestions_config(
        SuggestionsConfig::dynamic("x").with_availability(SuggestionAvailability::BeforeFirstMessage),
    );

    deck.reload_suggestions("chat");
    tokio::task::yield_now().await;
    chat.add_message(Message::user("question"));
    deck.run_agent(&as_dyn(&chat)).await.unwrap();

    let clones = provider.clones();
    assert_eq!(clones.len(), 1);
    assert_eq!(clones[0].abort_count(), 1);
    assert_eq!(deck.get_suggestions("chat"), SuggestionsSnapshot::default());
}

// ── Static configurations ────────────────────────────────────────────────

#[tokio::test]
async fn availability_follows_the_message_count() {
    let chat = Arc::new(ScriptedAgent::new().with_id("chat"));
    let deck = deck(&[("chat", chat.clone())]);
    for (title, available) in [
        ("before", SuggestionAvailability::BeforeFirstMessage),
        ("after", SuggestionAvailability::AfterFirstMessage),
        ("always", SuggestionAvailability::Always),
        ("never", SuggestionAvailability::Disabled),
    ] {
        deck.add_suggestions_config(
            SuggestionsConfig::fixed(vec![Suggestion::new(title, title)]).with_availability(available),
        );
    }

    deck.reload_suggestions("chat");
    assert_eq!(titles(&deck.get_suggestions("chat")), vec!["before", "always"]);

    chat.add_message(Message::user("hi"));
    deck.reload_suggestions("chat");
    assert_eq!(titles(&deck.get_suggestions("chat")), vec!["after", "always"]);
}

#[tokio::test]
async fn static_suggestions_default_to_an_empty_conversation() {
    let chat = Arc::new(ScriptedAgent::new().with_id("chat"));
    let deck = deck(&[("chat", chat)]);
    deck.add_suggestions_config(SuggestionsConfig::fixed(vec![Suggestion {
        is_loading: true,
        ..Suggestion::new("Start here", "How do I begin?")
    }]));

    deck.reload_suggestions("chat");

    assert_eq!(
        deck.get_suggestions("chat"),
        SuggestionsSnapshot {
            suggestions: vec![Suggestion::new("Start here", "How do I begin?")],
            is_loading: false,
        }
    );
}

#[tokio::test]
async fn configurations_target_their_consumer() {
    let chat = Arc::new(ScriptedAgent::new().with_id("chat"));
    let support = Arc::new(ScriptedAgent::new().with_id("support"));
    let deck = deck(&[("chat", chat), ("support", support)]);
    deck.add_suggestions_config(
        SuggestionsConfig::fixed(vec![Suggestion::new("only support", "")]).with_consumer("support"),
    );
    deck.add_suggestions_config(
        SuggestionsConfig::fixed(vec![Suggestion::new("everyone", "")]).with_consumer("*"),
    );

    deck.reload_suggestions("chat");
    deck.reload_suggestions("support");

    assert_eq!(titles(&deck.get_suggestions("chat")), vec!["everyone"]);
    assert_eq!(
        titles(&deck.get_suggestions("support")),
        vec!["only support", "everyone"]
    );
}

#[tokio::test]
async fn settled_runs_reload_suggestions() {
    let chat = Arc::new(ScriptedAgent::replying(vec![say("a1", "hello")]).with_id("chat"));
    let deck = deck(&[("chat", chat.clone())]);
    deck.add_suggestions_config(SuggestionsConfig::fixed(vec![Suggestion::new("next", "Tell me more")]).with_availability(SuggestionAvailability::AfterFirstMessage));
    chat.add_message(Message::user("hi"));

    deck.run_agent(&as_dyn(&chat)).await.unwrap();

    assert_eq!(titles(&deck.get_suggestions("chat")), vec!["next"]);
}

#[tokio::test]
async fn config_changes_are_published() {
    let deck = deck(&[]);
    let log = EventLog::attach(&deck);

    let id = deck.add_suggestions_config(SuggestionsConfig::fixed(Vec::new()));
    assert!(deck.remove_suggestions_config(&id));
    assert!(!deck.remove_suggestions_config(&id));

    assert_eq!(log.count("suggestions_config_changed"), 2);
    assert!(deck.suggestions_configs().is_empty());
    assert!(
        log.events()
            .iter()
            .all(|e| matches!(e, CoreEvent::SuggestionsConfigChanged))
    );
}
