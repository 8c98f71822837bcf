use serde::{Deserialize, Serialize};

/// A piece of application context forwarded to agents with every run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextEntry {
    pub description: String,
    pub value: String,
}

impl ContextEntry {
    pub fn new(description: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            value: value.into(),
        }
    }
}
