//! agentdeck CLI: the main entry point.
//!
//! Commands:
//! - `inspect`: connect to a runtime and list its agents
//! - `run`: run one turn against a runtime agent
//! - `config`: print, show, validate or locate the configuration

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "agentdeck",
    about = "agentdeck: drive runtime agents from the terminal",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Read configuration from this file instead of ~/.agentdeck/config.toml
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Override the runtime URL
    #[arg(long, global = true, env = "AGENTDECK_RUNTIME_URL")]
    url: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to the runtime and list its agents
    Inspect,

    /// Send one message to an agent and print its reply
    Run {
        /// Agent to run
        #[arg(short, long)]
        agent: String,

        /// User message to send
        #[arg(short, long)]
        message: String,

        /// Skip waiting for suggestions after the run
        #[arg(long)]
        no_suggestions: bool,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the default configuration as TOML
    Default,
    /// Print the effective configuration
    Show,
    /// Check the configuration for errors
    Validate,
    /// Print the configuration file path
    Path,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    let source = commands::ConfigSource {
        path: cli.config,
        runtime_url: cli.url,
    };

    match cli.command {
        Commands::Inspect => commands::inspect::run(&source).await?,
        Commands::Run {
            agent,
            message,
            no_suggestions,
        } => commands::run::run(&source, &agent, &message, !no_suggestions).await?,
        Commands::Config { action } => match action {
            ConfigAction::Default => commands::config_cmd::print_default(),
            ConfigAction::Show => commands::config_cmd::show(&source)?,
            ConfigAction::Validate => commands::config_cmd::validate(&source)?,
            ConfigAction::Path => commands::config_cmd::path(&source),
        },
    }

    Ok(())
}
