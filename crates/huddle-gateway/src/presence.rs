use std::collections::HashMap;

use huddle_types::models::{ConnectionId, Participant, Profile};

/// Active connections and the profiles they joined with.
#[derive(Debug, Default)]
pub struct PresenceRegistry {
    users: HashMap<ConnectionId, (u64, Profile)>,
    next_seq: u64,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the profile for a connection. A connection holds one profile for
    /// its whole lifetime, so a second join returns `None` and changes nothing.
    pub fn join(&mut self, conn_id: ConnectionId, profile: Profile) -> Option<Participant> {
        if self.users.contains_key(&conn_id) {
            return None;
        }
        self.next_seq += 1;
        self.users.insert(conn_id, (self.next_seq, profile.clone()));
        Some(Participant {
            id: conn_id,
            profile,
        })
    }

    pub fn leave(&mut self, conn_id: ConnectionId) -> Option<Participant> {
        self.users
            .remove(&conn_id)
            .map(|(_, profile)| Participant {
                id: conn_id,
                profile,
            })
    }

    pub fn profile(&self, conn_id: ConnectionId) -> Option<&Profile> {
        self.users.get(&conn_id).map(|(_, profile)| profile)
    }

    /// The connection's current participant view, anonymous if it never joined.
    pub fn participant(&self, conn_id: ConnectionId) -> Participant {
        Participant {
            id: conn_id,
            profile: self
                .profile(conn_id)
                .cloned()
                .unwrap_or_else(Profile::anonymous),
        }
    }

    /// Everyone present, in join order.
    pub fn roster(&self) -> Vec<Participant> {
        let mut entries: Vec<_> = self.users.iter().collect();
        entries.sort_by_key(|(_, (seq, _))| *seq);
        entries
            .into_iter()
            .map(|(id, (_, profile))| Participant {
                id: *id,
                profile: profile.clone(),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn profile(name: &str) -> Profile {
        Profile::from_claim(Some(name), None, None)
    }

    #[test]
    fn test_join_leave_roster() {
        let mut presence = PresenceRegistry::new();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

        assert!(presence.join(a, profile("Ann")).is_some());
        assert!(presence.join(b, profile("Bob")).is_some());

        let names: Vec<_> = presence.roster().into_iter().map(|p| p.profile.name).collect();
        assert_eq!(names, ["Ann", "Bob"]);

        let left = presence.leave(a).unwrap();
        assert_eq!(left.profile.name, "Ann");
        assert!(presence.leave(a).is_none());
        assert_eq!(presence.len(), 1);
    }

    #[test]
    fn test_second_join_is_ignored() {
        let mut presence = PresenceRegistry::new();
        let a = Uuid::new_v4();

        presence.join(a, profile("Ann"));
        assert!(presence.join(a, profile("Mallory")).is_none());
        assert_eq!(presence.profile(a).unwrap().name, "Ann");
    }

    #[test]
    fn test_unjoined_connection_is_anonymous() {
        let presence = PresenceRegistry::new();
        let participant = presence.participant(Uuid::new_v4());
        assert_eq!(participant.profile.name, "Anonymous");
        assert!(presence.is_empty());
    }
}
