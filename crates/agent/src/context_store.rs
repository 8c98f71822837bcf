//! Context entries sent along with every run.

use std::sync::RwLock;

use agentdeck_core::ContextEntry;
use agentdeck_core::sync::{read, write};
use uuid::Uuid;

/// Context entries in insertion order, keyed by generated id.
#[derive(Debug, Default)]
pub struct ContextStore {
    entries: RwLock<Vec<(String, ContextEntry)>>,
}

impl ContextStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `entry` and return its id.
    pub fn add(&self, entry: ContextEntry) -> String {
        let id = Uuid::new_v4().to_string();
        write(&self.entries).push((id.clone(), entry));
        id
    }

    /// Returns `false` when no entry had that id.
    pub fn remove(&self, id: &str) -> bool {
        let mut entries = write(&self.entries);
        let before = entries.len();
        entries.retain(|(entry_id, _)| entry_id != id);
        entries.len() != before
    }

    pub fn entries(&self) -> Vec<ContextEntry> {
        read(&self.entries)
            .iter()
            .map(|(_, entry)| entry.clone())
            .collect()
    }

    pub fn get(&self, id: &str) -> Option<ContextEntry> {
        read(&self.entries)
            .iter()
            .find(|(entry_id, _)| entry_id == id)
            .map(|(_, entry)| entry.clone())
    }
}
