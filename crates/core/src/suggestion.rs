//! Suggestion configuration and values.

use serde::{Deserialize, Serialize};

/// Provider agent used when a dynamic configuration names none.
pub const DEFAULT_PROVIDER_AGENT_ID: &str = "default";
/// Consumer wildcard: the configuration applies to every agent.
pub const ANY_CONSUMER: &str = "*";

pub const DEFAULT_MIN_SUGGESTIONS: u32 = 1;
pub const DEFAULT_MAX_SUGGESTIONS: u32 = 3;

/// When a configuration is allowed to produce suggestions, relative to the
/// consumer agent's message count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SuggestionAvailability {
    BeforeFirstMessage,
    AfterFirstMessage,
    Always,
    Disabled,
}

impl SuggestionAvailability {
    pub fn allows(&self, message_count: usize) -> bool {
        match self {
            Self::BeforeFirstMessage => message_count == 0,
            Self::AfterFirstMessage => message_count > 0,
            Self::Always => true,
            Self::Disabled => false,
        }
    }
}

/// A single suggestion shown to the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Suggestion {
    pub title: String,
    pub message: String,
    #[serde(default)]
    pub is_loading: bool,
}

impl Suggestion {
    pub fn new(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
            is_loading: false,
        }
    }
}

/// Suggestions generated by a provider agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DynamicSuggestionsConfig {
    pub instructions: String,
    #[serde(default, alias = "min_suggestions")]
    pub min_suggestions: Option<u32>,
    #[serde(default, alias = "max_suggestions")]
    pub max_suggestions: Option<u32>,
    #[serde(default, alias = "provider_agent_id")]
    pub provider_agent_id: Option<String>,
    #[serde(default, alias = "consumer_agent_id")]
    pub consumer_agent_id: Option<String>,
    #[serde(default)]
    pub available: Option<SuggestionAvailability>,
}

/// A fixed list of suggestions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StaticSuggestionsConfig {
    pub suggestions: Vec<Suggestion>,
    #[serde(default, alias = "consumer_agent_id")]
    pub consumer_agent_id: Option<String>,
    #[serde(default)]
    pub available: Option<SuggestionAvailability>,
}

/// Either kind of suggestion configuration.
///
/// Deserializes untagged: a table with `instructions` is dynamic, one with
/// `suggestions` is static.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SuggestionsConfig {
    Dynamic(DynamicSuggestionsConfig),
    Static(StaticSuggestionsConfig),
}

impl SuggestionsConfig {
    pub fn dynamic(instructions: impl Into<String>) -> DynamicSuggestionsConfig {
        DynamicSuggestionsConfig {
            instructions: instructions.into(),
            min_suggestions: None,
            max_suggestions: None,
            provider_agent_id: None,
            consumer_agent_id: None,
            available: None,
        }
    }

    pub fn fixed(suggestions: Vec<Suggestion>) -> StaticSuggestionsConfig {
        StaticSuggestionsConfig {
            suggestions,
            consumer_agent_id: None,
            available: None,
        }
    }

    pub fn consumer_agent_id(&self) -> Option<&str> {
        match self {
            Self::Dynamic(cfg) => cfg.consumer_agent_id.as_deref(),
            Self::Static(cfg) => cfg.consumer_agent_id.as_deref(),
        }
    }

    /// Whether this configuration targets `agent_id`. An unset consumer or
    /// `"*"` targets every agent.
    pub fn applies_to(&self, agent_id: &str) -> bool {
        match self.consumer_agent_id() {
            None | Some(ANY_CONSUMER) => true,
            Some(consumer) => consumer == agent_id,
        }
    }

    /// Effective availability. Dynamic configurations default to
    /// after-first-message, static ones to before-first-message.
    pub fn availability(&self) -> SuggestionAvailability {
        match self {
            Self::Dynamic(cfg) => cfg
                .available
                .unwrap_or(SuggestionAvailability::AfterFirstMessage),
            Self::Static(cfg) => cfg
                .available
                .unwrap_or(SuggestionAvailability::BeforeFirstMessage),
        }
    }

    pub fn is_available(&self, message_count: usize) -> bool {
        self.availability().allows(message_count)
    }
}

impl From<DynamicSuggestionsConfig> for SuggestionsConfig {
    fn from(cfg: DynamicSuggestionsConfig) -> Self {
        Self::Dynamic(cfg)
    }
}

impl From<StaticSuggestionsConfig> for SuggestionsConfig {
    fn from(cfg: StaticSuggestionsConfig) -> Self {
        Self::Static(cfg)
    }
}

impl DynamicSuggestionsConfig {
    pub fn with_provider(mut self, agent_id: impl Into<String>) -> Self {
        self.provider_agent_id = Some(agent_id.into());
        self
    }

    pub fn with_consumer(mut self, agent_id: impl Into<String>) -> Self {
        self.consumer_agent_id = Some(agent_id.into());
        self
    }

    pub fn with_bounds(mut self, min: u32, max: u32) -> Self {
        self.min_suggestions = Some(min);
        self.max_suggestions = Some(max);
        self
    }

    pub fn with_availability(mut self, available: SuggestionAvailability) -> Self {
        self.available = Some(available);
        self
    }
}

impl StaticSuggestionsConfig {
    pub fn with_consumer(mut self, agent_id: impl Into<String>) -> Self {
        self.consumer_agent_id = Some(agent_id.into());
        self
    }

    pub fn with_availability(mut self, available: SuggestionAvailability) -> Self {
        self.available = Some(available);
        self
    }
}
