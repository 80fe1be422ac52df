//! In-memory per-user presence tracking with multi-connection support.
//!
//! Presence is per-**user**: a user is online on this instance while at least
//! one of their connections is registered. Both directions of the mapping live
//! behind one lock so a connection can never be owned by two users.

use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;

#[derive(Default)]
struct PresenceMaps {
    /// user id → live connection ids.
    by_user: HashMap<String, HashSet<String>>,
    /// connection id → owning user id.
    owners: HashMap<String, String>,
}

/// Thread-safe presence registry for connections local to this instance.
pub struct PresenceRegistry {
    inner: RwLock<PresenceMaps>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(PresenceMaps::default()),
        }
    }

    /// Register a live connection for a user.
    ///
    /// A connection previously registered under another user is moved.
    /// Returns `true` if this made the user go from offline to online.
    pub fn register(&self, user_id: &str, connection_id: &str) -> bool {
        let mut maps = self.inner.write();

        if let Some(previous) = maps.owners.get(connection_id).cloned() {
            if previous != user_id {
                remove_connection(&mut maps.by_user, &previous, connection_id);
            }
        }

        maps.owners
            .insert(connection_id.to_string(), user_id.to_string());
        let connections = maps.by_user.entry(user_id.to_string()).or_default();
        let was_offline = connections.is_empty();
        connections.insert(connection_id.to_string());
        was_offline
    }

    /// Remove a connection. Dropping the user's last connection removes the
    /// entry entirely.
    ///
    /// Returns `true` if this made the user go offline.
    pub fn unregister(&self, user_id: &str, connection_id: &str) -> bool {
        let mut maps = self.inner.write();

        if maps.owners.get(connection_id).map(String::as_str) == Some(user_id) {
            maps.owners.remove(connection_id);
        }
        remove_connection(&mut maps.by_user, user_id, connection_id)
    }

    /// All live connections of a user (empty if offline).
    pub fn lookup(&self, user_id: &str) -> HashSet<String> {
        self.inner
            .read()
            .by_user
            .get(user_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn is_online(&self, user_id: &str) -> bool {
        self.inner.read().by_user.contains_key(user_id)
    }

    /// Number of distinct users online on this instance.
    pub fn online_count(&self) -> usize {
        self.inner.read().by_user.len()
    }

    /// The user owning a connection, if registered.
    pub fn owner_of(&self, connection_id: &str) -> Option<String> {
        self.inner.read().owners.get(connection_id).cloned()
    }
}

impl Default for PresenceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Returns `true` when the user's entry was removed because it became empty.
fn remove_connection(
    by_user: &mut HashMap<String, HashSet<String>>,
    user_id: &str,
    connection_id: &str,
) -> bool {
    let Some(connections) = by_user.get_mut(user_id) else {
        return false;
    };
    if !connections.remove(connection_id) {
        return false;
    }
    if connections.is_empty() {
        by_user.remove(user_id);
        return true;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_connection_brings_user_online() {
        let reg = PresenceRegistry::new();
        assert!(reg.register("u1", "c1"));
        assert!(reg.is_online("u1"));
        assert_eq!(reg.online_count(), 1);
    }

    #[test]
    fn second_connection_is_not_a_status_change() {
        let reg = PresenceRegistry::new();
        reg.register("u1", "c1");
        assert!(!reg.register("u1", "c2"));
        assert_eq!(reg.lookup("u1").len(), 2);
        assert_eq!(reg.online_count(), 1);
    }

    #[test]
    fn register_is_idempotent() {
        let reg = PresenceRegistry::new();
        reg.register("u1", "c1");
        reg.register("u1", "c1");
        assert_eq!(reg.lookup("u1").len(), 1);
    }

    #[test]
    fn multi_connection_offline_only_after_last_unregister() {
        let reg = PresenceRegistry::new();
        reg.register("u1", "c1");
        reg.register("u1", "c2");

        assert!(!reg.unregister("u1", "c1"));
        assert!(reg.is_online("u1"));

        assert!(reg.unregister("u1", "c2"));
        assert!(!reg.is_online("u1"));
        assert!(reg.lookup("u1").is_empty());
        assert_eq!(reg.online_count(), 0);
    }

    #[test]
    fn unregister_unknown_is_noop() {
        let reg = PresenceRegistry::new();
        assert!(!reg.unregister("ghost", "c1"));
        reg.register("u1", "c1");
        assert!(!reg.unregister("u1", "c-other"));
        assert!(reg.is_online("u1"));
    }

    #[test]
    fn connection_moves_between_users() {
        let reg = PresenceRegistry::new();
        reg.register("u1", "c1");
        reg.register("u2", "c1");

        assert!(!reg.is_online("u1"));
        assert!(reg.is_online("u2"));
        assert_eq!(reg.owner_of("c1").as_deref(), Some("u2"));

        // The stale owner cannot remove a connection it no longer owns.
        reg.unregister("u1", "c1");
        assert_eq!(reg.owner_of("c1").as_deref(), Some("u2"));
    }

    #[test]
    fn online_iff_connections_nonempty_over_mixed_sequence() {
        let reg = PresenceRegistry::new();
        let ops: &[(bool, &str, &str)] = &[
            (true, "a", "1"),
            (true, "b", "2"),
            (true, "a", "3"),
            (false, "a", "1"),
            (false, "b", "9"),
            (false, "b", "2"),
            (true, "b", "1"),
            (false, "a", "3"),
            (false, "a", "3"),
        ];
        for &(add, user, conn) in ops {
            if add {
                reg.register(user, conn);
            } else {
                reg.unregister(user, conn);
            }
            for u in ["a", "b"] {
                assert_eq!(reg.is_online(u), !reg.lookup(u).is_empty());
            }
        }
        assert!(!reg.is_online("a"));
        assert!(reg.is_online("b"));
    }
}
