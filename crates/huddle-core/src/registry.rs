//! Identity registry.
//!
//! Tracks joined participants by connection and keeps usernames unique
//! case-insensitively among everyone currently connected.

use crate::error::BrokerError;
use huddle_protocol::{ConnectionId, Participant};
use std::collections::HashMap;
use tracing::debug;

/// Default maximum username length, in characters.
pub const DEFAULT_MAX_USERNAME_LENGTH: usize = 32;

#[derive(Debug)]
struct Entry {
    /// Join order, used to keep snapshots stable.
    seq: u64,
    participant: Participant,
}

/// Registry of joined participants.
#[derive(Debug)]
pub struct IdentityRegistry {
    participants: HashMap<ConnectionId, Entry>,
    /// Lowercased username -> owning connection.
    usernames: HashMap<String, ConnectionId>,
    next_seq: u64,
    max_username_length: usize,
}

impl Default for IdentityRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_USERNAME_LENGTH)
    }
}

fn username_key(username: &str) -> String {
    username.to_lowercase()
}

impl IdentityRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new(max_username_length: usize) -> Self {
        Self {
            participants: HashMap::new(),
            usernames: HashMap::new(),
            next_seq: 0,
            max_username_length,
        }
    }

    /// Check a requested username without registering it.
    ///
    /// Returns the trimmed username.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is empty, too long, or taken.
    pub fn validate<'a>(&self, requested: &'a str) -> Result<&'a str, BrokerError> {
        let username = requested.trim();
        if username.is_empty() {
            return Err(BrokerError::UsernameEmpty);
        }
        if username.chars().count() > self.max_username_length {
            return Err(BrokerError::UsernameTooLong(self.max_username_length));
        }
        if self.usernames.contains_key(&username_key(username)) {
            return Err(BrokerError::UsernameTaken(username.to_string()));
        }
        Ok(username)
    }

    /// Register a participant.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection already joined or the username is
    /// rejected. The registry is unchanged on error.
    pub fn join(
        &mut self,
        connection_id: ConnectionId,
        requested: &str,
    ) -> Result<Participant, BrokerError> {
        if self.participants.contains_key(&connection_id) {
            return Err(BrokerError::AlreadyJoined);
        }
        let username = self.validate(requested)?;

        let participant = Participant::new(connection_id.clone(), username);
        self.usernames
            .insert(username_key(username), connection_id.clone());
        self.participants.insert(
            connection_id,
            Entry {
                seq: self.next_seq,
                participant: participant.clone(),
            },
        );
        self.next_seq += 1;

        debug!(connection = %participant.connection_id, username = %participant.username, "Registered participant");
        Ok(participant)
    }

    /// Remove a participant. Repeated removal returns `None`.
    pub fn remove(&mut self, connection_id: &ConnectionId) -> Option<Participant> {
        let entry = self.participants.remove(connection_id)?;
        self.usernames
            .remove(&username_key(&entry.participant.username));
        debug!(connection = %connection_id, "Removed participant");
        Some(entry.participant)
    }

    /// Look up a participant by connection.
    #[must_use]
    pub fn lookup(&self, connection_id: &ConnectionId) -> Option<&Participant> {
        self.participants.get(connection_id).map(|e| &e.participant)
    }

    /// Check if a connection has joined.
    #[must_use]
    pub fn contains(&self, connection_id: &ConnectionId) -> bool {
        self.participants.contains_key(connection_id)
    }

    /// Point-in-time copy of all participants, in join order.
    #[must_use]
    pub fn list_all(&self) -> Vec<Participant> {
        let mut entries: Vec<&Entry> = self.participants.values().collect();
        entries.sort_by_key(|e| e.seq);
        entries.into_iter().map(|e| e.participant.clone()).collect()
    }

    /// Connections of all joined participants, in no particular order.
    #[must_use]
    pub fn connection_ids(&self) -> Vec<ConnectionId> {
        self.participants.keys().cloned().collect()
    }

    /// Number of joined participants.
    #[must_use]
    pub fn len(&self) -> usize {
        self.participants.len()
    }

    /// Check if nobody has joined.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_trims_and_registers() {
        let mut registry = IdentityRegistry::default();

        let alice = registry.join("c-1".into(), "  alice ").unwrap();
        assert_eq!(alice.username, "alice");
        assert_eq!(registry.lookup(&"c-1".into()), Some(&alice));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_rejects_empty_and_long_names() {
        let mut registry = IdentityRegistry::new(5);

        assert_eq!(
            registry.join("c-1".into(), "   "),
            Err(BrokerError::UsernameEmpty)
        );
        assert_eq!(
            registry.join("c-1".into(), "abcdef"),
            Err(BrokerError::UsernameTooLong(5))
        );
        assert!(registry.is_empty());
    }

    #[test]
    fn test_username_uniqueness_is_case_insensitive() {
        let mut registry = IdentityRegistry::default();
        registry.join("c-1".into(), "alice").unwrap();

        let before = registry.list_all();
        assert_eq!(
            registry.join("c-2".into(), "Alice"),
            Err(BrokerError::UsernameTaken("Alice".into()))
        );
        assert_eq!(registry.list_all(), before);
    }

    #[test]
    fn test_same_connection_cannot_join_twice() {
        let mut registry = IdentityRegistry::default();
        registry.join("c-1".into(), "alice").unwrap();

        assert_eq!(
            registry.join("c-1".into(), "bob"),
            Err(BrokerError::AlreadyJoined)
        );
    }

    #[test]
    fn test_remove_frees_username() {
        let mut registry = IdentityRegistry::default();
        registry.join("c-1".into(), "alice").unwrap();

        assert!(registry.remove(&"c-1".into()).is_some());
        assert!(registry.remove(&"c-1".into()).is_none());

        assert!(registry.join("c-2".into(), "ALICE").is_ok());
    }

    #[test]
    fn test_list_all_is_join_ordered_snapshot() {
        let mut registry = IdentityRegistry::default();
        for (id, name) in [("c-3", "carol"), ("c-1", "alice"), ("c-2", "bob")] {
            registry.join(id.into(), name).unwrap();
        }

        let snapshot = registry.list_all();
        registry.remove(&"c-1".into());

        let names: Vec<_> = snapshot.iter().map(|p| p.username.as_str()).collect();
        assert_eq!(names, ["carol", "alice", "bob"]);
        assert_eq!(registry.list_all().len(), 2);
    }

    #[test]
    fn test_connection_ids_cover_joined_only() {
        let mut registry = IdentityRegistry::default();
        registry.join("c-1".into(), "alice").unwrap();
        registry.join("c-2".into(), "bob").unwrap();
        registry.remove(&"c-1".into());

        assert_eq!(registry.connection_ids(), [ConnectionId::from("c-2")]);
    }
}
