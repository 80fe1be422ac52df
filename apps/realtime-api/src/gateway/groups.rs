//! Connection-scoped broadcast groups, one per conversation.

use std::collections::HashSet;

use dashmap::DashMap;

/// Tracks which live connections are joined to which group.
///
/// Membership is per connection: a user's second device joins independently.
/// Uses `DashMap` for shard-level concurrency; empty groups are dropped.
pub struct GroupTracker {
    groups: DashMap<String, HashSet<String>>,
}

impl GroupTracker {
    pub fn new() -> Self {
        Self {
            groups: DashMap::new(),
        }
    }

    /// Join a connection to a group. Idempotent; returns `true` if newly added.
    pub fn join(&self, group_id: &str, connection_id: &str) -> bool {
        self.groups
            .entry(group_id.to_string())
            .or_default()
            .insert(connection_id.to_string())
    }

    /// Remove a connection from a group. Leaving as a non-member is a no-op.
    pub fn leave(&self, group_id: &str, connection_id: &str) -> bool {
        let removed = match self.groups.get_mut(group_id) {
            Some(mut members) => members.remove(connection_id),
            None => return false,
        };
        self.groups.remove_if(group_id, |_, members| members.is_empty());
        removed
    }

    /// Drop a connection from every group it joined. Returns the number of
    /// groups it was removed from.
    pub fn leave_all(&self, connection_id: &str) -> usize {
        let mut left = 0;
        for mut entry in self.groups.iter_mut() {
            if entry.value_mut().remove(connection_id) {
                left += 1;
            }
        }
        left
    }

    pub fn members(&self, group_id: &str) -> HashSet<String> {
        self.groups
            .get(group_id)
            .map(|members| members.clone())
            .unwrap_or_default()
    }

    pub fn is_member(&self, group_id: &str, connection_id: &str) -> bool {
        self.groups
            .get(group_id)
            .is_some_and(|members| members.contains(connection_id))
    }

    /// Remove groups with no members. Returns the number removed.
    pub fn cleanup_empty(&self) -> usize {
        let before = self.groups.len();
        self.groups.retain(|_, members| !members.is_empty());
        before - self.groups.len()
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }
}

impl Default for GroupTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_is_idempotent() {
        let groups = GroupTracker::new();
        assert!(groups.join("c1", "conn1"));
        assert!(!groups.join("c1", "conn1"));
        assert_eq!(groups.members("c1").len(), 1);
    }

    #[test]
    fn leave_non_member_is_noop() {
        let groups = GroupTracker::new();
        groups.join("c1", "conn1");
        assert!(!groups.leave("c1", "conn2"));
        assert!(!groups.leave("missing", "conn1"));
        assert_eq!(groups.members("c1").len(), 1);
    }

    #[test]
    fn last_leave_drops_group() {
        let groups = GroupTracker::new();
        groups.join("c1", "conn1");
        assert!(groups.leave("c1", "conn1"));
        assert_eq!(groups.group_count(), 0);
        assert!(groups.members("c1").is_empty());
    }

    #[test]
    fn membership_is_per_connection() {
        let groups = GroupTracker::new();
        groups.join("c1", "phone");
        assert!(groups.is_member("c1", "phone"));
        assert!(!groups.is_member("c1", "laptop"));
    }

    #[test]
    fn leave_all_then_cleanup_empty() {
        let groups = GroupTracker::new();
        groups.join("c1", "conn1");
        groups.join("c2", "conn1");
        groups.join("c2", "conn2");

        assert_eq!(groups.leave_all("conn1"), 2);
        assert_eq!(groups.cleanup_empty(), 1);
        assert_eq!(groups.group_count(), 1);
        assert!(groups.is_member("c2", "conn2"));
    }
}
