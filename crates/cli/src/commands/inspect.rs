//! `agentdeck inspect`: Show what a runtime offers.

use agentdeck_agent::AgentDeck;

use super::ConfigSource;

pub async fn run(source: &ConfigSource) -> anyhow::Result<()> {
    let deck = super::connect(source).await?;
    for line in describe(&deck) {
        println!("{line}");
    }
    Ok(())
}

/// Human-readable summary of a connected deck.
fn describe(deck: &AgentDeck) -> Vec<String> {
    let mut lines = vec![
        format!("Runtime:    {}", deck.runtime_url().unwrap_or_default()),
        format!("Transport:  {}", deck.runtime_transport()),
        format!(
            "Version:    {}",
            deck.runtime_version().unwrap_or_else(|| "unknown".into())
        ),
    ];

    let agents = deck.agents();
    if agents.is_empty() {
        lines.push("No agents available".into());
        return lines;
    }

    lines.push(format!("Agents ({}):", agents.len()));
    for (id, agent) in &agents {
        match agent.description().filter(|d| !d.is_empty()) {
            Some(description) => lines.push(format!("  {id:<20} {description}")),
            None => lines.push(format!("  {id}")),
        }
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::routing::get;
    use serde_json::json;

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn source(runtime_url: &str) -> ConfigSource {
        ConfigSource {
            path: Some("/nonexistent/agentdeck/config.toml".into()),
            runtime_url: Some(runtime_url.to_string()),
        }
    }

    #[tokio::test]
    async fn lists_runtime_agents() {
        let app = Router::new().route(
            "/info",
            get(|| async {
                axum::Json(json!({
                    "version": "1.4.0",
                    "agents": {
                        "support": {"description": "Answers product questions"},
                        "research": {}
                    }
                }))
            }),
        );
        let url = serve(app).await;

        let deck = super::super::connect(&source(&url)).await.unwrap();
        let lines = describe(&deck);

        assert_eq!(lines[2], "Version:    1.4.0");
        assert_eq!(lines[3], "Agents (2):");
        assert_eq!(lines[4], "  research");
        assert!(lines[5].starts_with("  support"));
        assert!(lines[5].ends_with("Answers product questions"));
    }

    #[tokio::test]
    async fn unreachable_runtime_is_an_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);

        let err = super::super::connect(&source(&url)).await.unwrap_err();
        assert!(err.to_string().starts_with("Could not connect to runtime"));
    }

    #[tokio::test]
    async fn missing_url_is_reported() {
        let source = ConfigSource {
            path: Some("/nonexistent/agentdeck/config.toml".into()),
            runtime_url: None,
        };
        let err = super::super::connect(&source).await.unwrap_err();
        assert!(err.to_string().contains("No runtime URL configured"));
    }
}
