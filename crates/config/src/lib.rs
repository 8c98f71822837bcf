//! Configuration loading, validation, and management for agentdeck.
//!
//! Loads configuration from `~/.agentdeck/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use agentdeck_core::{RuntimeTransport, SuggestionsConfig};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Environment variable overriding `runtime_url`.
pub const ENV_RUNTIME_URL: &str = "AGENTDECK_RUNTIME_URL";
/// Environment variable overriding `runtime_transport`.
pub const ENV_RUNTIME_TRANSPORT: &str = "AGENTDECK_RUNTIME_TRANSPORT";

/// The root configuration structure.
///
/// Maps directly to `~/.agentdeck/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct DeckConfig {
    /// Base URL of the remote runtime; unset means local agents only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_url: Option<String>,

    /// How requests are addressed to the runtime
    #[serde(default)]
    pub runtime_transport: RuntimeTransport,

    /// Ceiling on agent runs triggered by tool follow-ups within one turn
    #[serde(default = "default_max_follow_up_runs")]
    pub max_follow_up_runs: u32,

    /// Timeout for runtime HTTP requests, in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Headers sent with every runtime request
    #[serde(default)]
    pub headers: HashMap<String, String>,

    /// Properties forwarded to agents with every run
    #[serde(default)]
    pub properties: Map<String, Value>,

    /// Suggestion configurations
    #[serde(default)]
    pub suggestions: Vec<SuggestionsConfig>,
}

fn default_max_follow_up_runs() -> u32 {
    25
}
fn default_request_timeout_secs() -> u64 {
    30
}

impl std::fmt::Debug for DeckConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&String> = self.headers.keys().collect();
        names.sort();
        let headers: Vec<String> = names
            .into_iter()
            .map(|name| format!("{name}: [REDACTED]"))
            .collect();
        f.debug_struct("DeckConfig")
            .field("runtime_url", &self.runtime_url)
            .field("runtime_transport", &self.runtime_transport)
            .field("headers", &headers)
            .field("properties", &self.properties)
            .field("max_follow_up_runs", &self.max_follow_up_runs)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("suggestions", &self.suggestions.len())
            .finish()
    }
}

impl Default for DeckConfig {
    fn default() -> Self {
        Self {
            runtime_url: None,
            runtime_transport: RuntimeTransport::default(),
            headers: HashMap::new(),
            properties: Map::new(),
            max_follow_up_runs: default_max_follow_up_runs(),
            request_timeout_secs: default_request_timeout_secs(),
            suggestions: Vec::new(),
        }
    }
}

impl DeckConfig {
    /// Load configuration from the default path (~/.agentdeck/config.toml).
    ///
    /// Environment variables take precedence over the file:
    /// - `AGENTDECK_RUNTIME_URL`
    /// - `AGENTDECK_RUNTIME_TRANSPORT`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::read(&config_path)?;
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.normalize();
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::read(path)?;
        config.normalize();
        config.validate()?;
        Ok(config)
    }

    fn read(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Apply overrides from an environment lookup.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_RUNTIME_URL) {
            self.runtime_url = Some(url).filter(|u| !u.trim().is_empty());
        }

        if let Some(transport) = lookup(ENV_RUNTIME_TRANSPORT) {
            self.runtime_transport = transport
                .parse()
                .map_err(|e: agentdeck_core::ConfigurationError| {
                    ConfigError::ValidationError(e.to_string())
                })?;
        }

        Ok(())
    }

    fn normalize(&mut self) {
        if let Some(url) = &mut self.runtime_url {
            let trimmed = url.trim().trim_end_matches('/').to_string();
            *url = trimmed;
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".agentdeck")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_follow_up_runs == 0 {
            return Err(ConfigError::ValidationError(
                "max_follow_up_runs must be at least 1".into(),
            ));
        }

        if let Some(url) = &self.runtime_url
            && !(url.starts_with("http://") || url.starts_with("https://"))
        {
            return Err(ConfigError::ValidationError(format!(
                "runtime_url must start with http:// or https://, got '{url}'"
            )));
        }

        for cfg in &self.suggestions {
            if let SuggestionsConfig::Dynamic(dynamic) = cfg
                && let (Some(min), Some(max)) = (dynamic.min_suggestions, dynamic.max_suggestions)
                && min > max
            {
                return Err(ConfigError::ValidationError(format!(
                    "min_suggestions ({min}) must not exceed max_suggestions ({max})"
                )));
            }
        }

        Ok(())
    }

    /// Generate a default config TOML string (for the `config` command).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn default_config_is_valid() {
        let config = DeckConfig::default();
        assert_eq!(config.max_follow_up_runs, 25);
        assert_eq!(config.runtime_transport, RuntimeTransport::Rest);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let config = DeckConfig::load_from(Path::new("/nonexistent/config.toml")).unwrap();
        assert!(config.runtime_url.is_none());
        assert_eq!(config.request_timeout_secs, 30);
    }

    #[test]
    fn parses_full_config() {
        let file = write_config(
            r#"
runtime_url = "https://runtime.example.com/api/"
runtime_transport = "single"
max_follow_up_runs = 5

[headers]
Authorization = "Bearer secret"

[properties]
model = "fast"

[[suggestions]]
instructions = "Suggest follow-up questions"
max_suggestions = 2
consumerAgentId = "support"

[[suggestions]]
available = "always"
[[suggestions.suggestions]]
title = "Hello"
message = "Say hello"
"#,
        );

        let config = DeckConfig::load_from(file.path()).unwrap();
        assert_eq!(config.runtime_url.as_deref(), Some("https://runtime.example.com/api"));
        assert_eq!(config.runtime_transport, RuntimeTransport::Single);
        assert_eq!(config.max_follow_up_runs, 5);
        assert_eq!(config.properties["model"], "fast");
        assert_eq!(config.suggestions.len(), 2);
        assert!(matches!(
            &config.suggestions[0],
            SuggestionsConfig::Dynamic(d) if d.max_suggestions == Some(2)
                && d.consumer_agent_id.as_deref() == Some("support")
        ));
        assert!(matches!(&config.suggestions[1], SuggestionsConfig::Static(_)));
    }

    #[test]
    fn invalid_transport_rejected_at_parse() {
        let file = write_config(r#"runtime_transport = "grpc""#);
        assert!(matches!(
            DeckConfig::load_from(file.path()),
            Err(ConfigError::ParseError { .. })
        ));
    }

    #[test]
    fn zero_follow_up_ceiling_rejected() {
        let config = DeckConfig {
            max_follow_up_runs: 0,
            ..DeckConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn runtime_url_needs_http_scheme() {
        let config = DeckConfig {
            runtime_url: Some("localhost:4000".into()),
            ..DeckConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn min_above_max_rejected() {
        let config = DeckConfig {
            suggestions: vec![SuggestionsConfig::dynamic("x").with_bounds(4, 2).into()],
            ..DeckConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("min_suggestions"));
    }

    #[test]
    fn env_overrides_win() {
        let mut config = DeckConfig::default();
        config
            .apply_env_overrides(|key| match key {
                ENV_RUNTIME_URL => Some("http://localhost:4000".into()),
                ENV_RUNTIME_TRANSPORT => Some("single".into()),
                _ => None,
            })
            .unwrap();
        assert_eq!(config.runtime_url.as_deref(), Some("http://localhost:4000"));
        assert_eq!(config.runtime_transport, RuntimeTransport::Single);

        let bad = config.apply_env_overrides(|key| {
            (key == ENV_RUNTIME_TRANSPORT).then(|| "carrier-pigeon".to_string())
        });
        assert!(bad.is_err());
    }

    #[test]
    fn debug_redacts_header_values() {
        let mut config = DeckConfig::default();
        config
            .headers
            .insert("Authorization".into(), "Bearer secret".into());
        let debug = format!("{config:?}");
        assert!(debug.contains("Authorization: [REDACTED]"));
        assert!(!debug.contains("secret"));
    }

    #[test]
    fn default_toml_generation() {
        let toml_str = DeckConfig::default_toml();
        assert!(toml_str.contains("max_follow_up_runs = 25"));
        assert!(toml_str.contains("runtime_transport = \"rest\""));
    }
}
