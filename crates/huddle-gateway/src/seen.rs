use std::collections::HashMap;

use huddle_types::models::Participant;

/// Message id -> connections that have observed it, in observation order.
///
/// Sets only grow. An entry disappears when its message is deleted.
#[derive(Debug, Default)]
pub struct SeenTracker {
    entries: HashMap<String, Vec<Participant>>,
}

impl SeenTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the entry for a new message, seen only by its sender.
    pub fn start(&mut self, message_id: &str, sender: Participant) -> Vec<Participant> {
        let seen = vec![sender];
        self.entries.insert(message_id.to_string(), seen.clone());
        seen
    }

    /// Track a message that exists in the store but not in this session.
    pub fn hydrate(&mut self, message_id: &str) {
        self.entries.entry(message_id.to_string()).or_default();
    }

    pub fn contains(&self, message_id: &str) -> bool {
        self.entries.contains_key(message_id)
    }

    /// Add a viewer (idempotent) and return the full seen list.
    pub fn mark(&mut self, message_id: &str, viewer: Participant) -> Vec<Participant> {
        let seen = self.entries.entry(message_id.to_string()).or_default();
        if !seen.iter().any(|p| p.id == viewer.id) {
            seen.push(viewer);
        }
        seen.clone()
    }

    pub fn get(&self, message_id: &str) -> Option<&[Participant]> {
        self.entries.get(message_id).map(Vec::as_slice)
    }

    pub fn purge(&mut self, message_ids: &[String]) {
        for id in message_ids {
            self.entries.remove(id);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
