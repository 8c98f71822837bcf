//! `agentdeck config`: Configuration management commands.

use agentdeck_config::DeckConfig;
use agentdeck_core::SuggestionsConfig;

use super::ConfigSource;

pub fn print_default() {
    println!("{}", DeckConfig::default_toml());
}

pub fn show(source: &ConfigSource) -> anyhow::Result<()> {
    let config = source.load()?;
    // Debug output redacts header values
    println!("{config:#?}");
    Ok(())
}

pub fn validate(source: &ConfigSource) -> anyhow::Result<()> {
    println!("Validating {}", source.config_path().display());

    let config = match source.load() {
        Ok(config) => config,
        Err(e) => {
            println!("   Config error: {e}");
            return Err(e);
        }
    };

    let dynamic = config
        .suggestions
        .iter()
        .filter(|s| matches!(s, SuggestionsConfig::Dynamic(_)))
        .count();

    println!("   Config OK");
    println!();
    println!(
        "   Runtime:      {}",
        config.runtime_url.as_deref().unwrap_or("(none)")
    );
    println!("   Transport:    {}", config.runtime_transport);
    println!("   Follow-ups:   {}", config.max_follow_up_runs);
    println!("   Timeout:      {}s", config.request_timeout_secs);
    println!("   Headers:      {}", config.headers.len());
    println!(
        "   Suggestions:  {} ({dynamic} dynamic)",
        config.suggestions.len()
    );
    Ok(())
}

pub fn path(source: &ConfigSource) {
    println!("{}", source.config_path().display());
}
