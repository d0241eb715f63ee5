use std::collections::HashMap;

use huddle_types::models::{Participant, ReactionSnapshot};

/// Message id -> (emoji -> reactors).
///
/// A connection sits in at most one emoji bucket per message. Reacting with a
/// different emoji moves it; reacting with the same emoji again removes it.
#[derive(Debug, Default)]
pub struct ReactionTable {
    entries: HashMap<String, ReactionSnapshot>,
}

impl ReactionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an entry from a persisted snapshot. Existing entries win.
    pub fn hydrate(&mut self, message_id: &str, snapshot: ReactionSnapshot) {
        self.entries
            .entry(message_id.to_string())
            .or_insert(snapshot);
    }

    pub fn contains(&self, message_id: &str) -> bool {
        self.entries.contains_key(message_id)
    }

    /// Toggle `reactor`'s `emoji` on a message and return the new snapshot.
    pub fn toggle(&mut self, message_id: &str, reactor: Participant, emoji: &str) -> ReactionSnapshot {
        let buckets = self.entries.entry(message_id.to_string()).or_default();

        let mut had_target = false;
        for (bucket_emoji, reactors) in buckets.iter_mut() {
            if let Some(pos) = reactors.iter().position(|p| p.id == reactor.id) {
                reactors.remove(pos);
                if bucket_emoji == emoji {
                    had_target = true;
                }
            }
        }

        if !had_target {
            buckets.entry(emoji.to_string()).or_default().push(reactor);
        }

        buckets.retain(|_, reactors| !reactors.is_empty());
        buckets.clone()
    }

    pub fn snapshot(&self, message_id: &str) -> ReactionSnapshot {
        self.entries.get(message_id).cloned().unwrap_or_default()
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

#[cfg(test)]
mod tests {
    use super::*;
    use huddle_types::models::Profile;
    use uuid::Uuid;

    fn participant(name: &str) -> Participant {
        Participant {
            id: Uuid::new_v4(),
            profile: Profile::from_claim(Some(name), None, None),
        }
    }

    fn bucket_ids(snapshot: &ReactionSnapshot, emoji: &str) -> Vec<Uuid> {
        snapshot
            .get(emoji)
            .map(|reactors| reactors.iter().map(|p| p.id).collect())
            .unwrap_or_default()
    }

    #[test]
    fn test_switching_emoji_moves_reactor() {
        let mut table = ReactionTable::new();
        let c = participant("Cat");

        table.toggle("m", c.clone(), "👍");
        let snapshot = table.toggle("m", c.clone(), "❤️");

        assert_eq!(bucket_ids(&snapshot, "❤️"), vec![c.id]);
        assert!(bucket_ids(&snapshot, "👍").is_empty());
        assert!(!snapshot.contains_key("👍"));
    }

    #[test]
    fn test_same_emoji_twice_toggles_off() {
        let mut table = ReactionTable::new();
        let c = participant("Cat");

        table.toggle("m", c.clone(), "👍");
        let snapshot = table.toggle("m", c.clone(), "👍");
        assert!(snapshot.is_empty());
    }

    #[test]
    fn test_reactors_keep_order_and_are_independent() {
        let mut table = ReactionTable::new();
        let (a, b, c) = (participant("Ann"), participant("Bob"), participant("Cat"));

        table.toggle("m", a.clone(), "👍");
        table.toggle("m", b.clone(), "👍");
        table.toggle("m", c.clone(), "😂");
        let snapshot = table.toggle("other", a.clone(), "😂");
        assert_eq!(bucket_ids(&snapshot, "😂"), vec![a.id]);

        let snapshot = table.snapshot("m");
        assert_eq!(bucket_ids(&snapshot, "👍"), vec![a.id, b.id]);
        assert_eq!(bucket_ids(&snapshot, "😂"), vec![c.id]);
    }

    #[test]
    fn test_single_bucket_invariant_under_churn() {
        let mut table = ReactionTable::new();
        let reactors: Vec<_> = (0..4).map(|i| participant(&format!("u{i}"))).collect();
        let emojis = ["👍", "❤️", "😂"];

        for step in 0..60 {
            let reactor = reactors[step % reactors.len()].clone();
            let emoji = emojis[(step * 7) % emojis.len()];
            let snapshot = table.toggle("m", reactor, emoji);

            for r in &reactors {
                let buckets = snapshot
                    .values()
                    .filter(|bucket| bucket.iter().any(|p| p.id == r.id))
                    .count();
                assert!(buckets <= 1, "reactor in {buckets} buckets at step {step}");
            }
        }
    }

    #[test]
    fn test_hydrate_and_purge() {
        let mut table = ReactionTable::new();
        let a = participant("Ann");
        let mut persisted = ReactionSnapshot::new();
        persisted.insert("👍".to_string(), vec![a.clone()]);

        table.hydrate("m", persisted.clone());
        assert_eq!(table.snapshot("m"), persisted);

        // Toggling after hydration honours the persisted membership
        assert!(table.toggle("m", a, "👍").is_empty());

        table.purge(&["m".to_string()]);
        assert!(!table.contains("m"));
        assert!(table.is_empty());
    }
}
