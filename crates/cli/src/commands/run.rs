//! `agentdeck run`: One turn against a runtime agent.

use std::time::Duration;

use agentdeck_core::{CoreEvent, Message, Role, Suggestion};
use anyhow::Context;
use tokio::sync::broadcast;
use tracing::warn;

use super::ConfigSource;

/// How long to wait for suggestion generation after the run settles.
const SUGGESTION_WAIT: Duration = Duration::from_secs(60);

pub async fn run(
    source: &ConfigSource,
    agent_id: &str,
    message: &str,
    with_suggestions: bool,
) -> anyhow::Result<()> {
    let deck = super::connect(source).await?;
    let agent = deck
        .get_agent(agent_id)
        .with_context(|| format!("Agent '{agent_id}' is not offered by the runtime"))?;

    let mut events = deck.events();
    agent.add_message(Message::user(message));
    let result = deck.run_agent(&agent).await?;

    for message in &result.new_messages {
        println!("{}", render_message(message));
    }

    if !with_suggestions {
        return Ok(());
    }
    if deck.get_suggestions(agent_id).is_loading
        && tokio::time::timeout(SUGGESTION_WAIT, settled(&mut events, agent_id))
            .await
            .is_err()
    {
        warn!(agent_id = %agent_id, "Gave up waiting for suggestions");
    }

    let suggestions = deck.get_suggestions(agent_id).suggestions;
    if !suggestions.is_empty() {
        println!();
        println!("Suggestions:");
        for suggestion in &suggestions {
            println!("{}", render_suggestion(suggestion));
        }
    }
    Ok(())
}

/// Resolves once suggestion loading for `agent_id` has finished.
async fn settled(events: &mut broadcast::Receiver<std::sync::Arc<CoreEvent>>, agent_id: &str) {
    loop {
        match events.recv().await {
            Ok(event) => {
                if let CoreEvent::SuggestionsFinishedLoading { agent_id: id } = event.as_ref()
                    && id == agent_id
                {
                    return;
                }
            }
            Err(broadcast::error::RecvError::Lagged(_)) => {}
            Err(broadcast::error::RecvError::Closed) => return,
        }
    }
}

fn render_message(message: &Message) -> String {
    let mut out = match message.role {
        Role::Tool => format!(
            "[tool {}] {}",
            message.tool_call_id.as_deref().unwrap_or("?"),
            message.content
        ),
        _ => format!("[{}] {}", role_name(message.role), message.content),
    };
    for call in &message.tool_calls {
        out.push_str(&format!(
            "\n    -> {}({})",
            call.name(),
            call.function.arguments
        ));
    }
    out
}

fn role_name(role: Role) -> &'static str {
    match role {
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::System => "system",
        Role::Developer => "developer",
        Role::Tool => "tool",
    }
}

fn render_suggestion(suggestion: &Suggestion) -> String {
    if suggestion.message.is_empty() || suggestion.message == suggestion.title {
        format!("  * {}", suggestion.title)
    } else {
        format!("  * {}: {}", suggestion.title, suggestion.message)
    }
}
