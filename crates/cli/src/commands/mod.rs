pub mod config_cmd;
pub mod inspect;
pub mod run;

use std::path::PathBuf;

use agentdeck_agent::AgentDeck;
use agentdeck_config::DeckConfig;
use agentdeck_core::{AgentMap, RuntimeConnectionStatus};
use anyhow::{Context, bail};

/// Where the configuration comes from, plus command-line overrides.
pub struct ConfigSource {
    pub path: Option<PathBuf>,
    pub runtime_url: Option<String>,
}

impl ConfigSource {
    pub fn load(&self) -> anyhow::Result<DeckConfig> {
        let mut config = match &self.path {
            Some(path) => DeckConfig::load_from(path)?,
            None => DeckConfig::load()?,
        };
        if let Some(url) = &self.runtime_url {
            config.runtime_url = Some(url.trim().trim_end_matches('/').to_string());
            config.validate()?;
        }
        Ok(config)
    }

    pub fn config_path(&self) -> PathBuf {
        self.path
            .clone()
            .unwrap_or_else(|| DeckConfig::config_dir().join("config.toml"))
    }
}

/// Build a deck from the configuration and connect it to the runtime.
pub async fn connect(source: &ConfigSource) -> anyhow::Result<AgentDeck> {
    let config = source.load()?;
    let Some(url) = config.runtime_url.clone() else {
        bail!("No runtime URL configured (pass --url or set AGENTDECK_RUNTIME_URL)");
    };

    let deck = AgentDeck::from_config(&config, AgentMap::new()).context("Failed to build agent deck")?;
    deck.refresh_runtime_connection().await;

    if deck.runtime_connection_status() != RuntimeConnectionStatus::Connected {
        bail!("Could not connect to runtime at {url}");
    }
    Ok(deck)
}
