//! Channel-to-group registry.
//!
//! The registry is an explicitly owned object held in server state (not a
//! process global) mapping a channel id to its [`BroadcastGroup`].

use crate::group::BroadcastGroup;
use dashmap::DashMap;
use tracing::debug;

/// Lookup/creation point for broadcast groups.
///
/// Groups are created lazily on first reference and never evicted: an empty
/// group is retained and handed back on the next `get`, and memory grows
/// with the number of distinct channels seen over the process lifetime.
/// Callers must not assume bounded memory.
#[derive(Debug, Default)]
pub struct Registry {
    groups: DashMap<i64, BroadcastGroup>,
}

impl Registry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            groups: DashMap::new(),
        }
    }

    /// Return the group for `channel_id`, constructing it and starting its
    /// event loop exactly once. Safe under arbitrary concurrent calls: the
    /// map's entry lock makes check-or-create atomic per id, so two first
    /// callers always observe the identical group.
    pub fn get(&self, channel_id: i64) -> BroadcastGroup {
        self.groups
            .entry(channel_id)
            .or_insert_with(|| {
                debug!(channel = channel_id, "creating broadcast group");
                BroadcastGroup::spawn(channel_id)
            })
            .clone()
    }

    /// Number of groups created so far.
    #[must_use]
    pub fn group_count(&self) -> usize {
        self.groups.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::group::{next_connection_id, Member};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_get_returns_same_group_per_channel() {
        let registry = Registry::new();

        let first = registry.get(7);
        let again = registry.get(7);
        let other = registry.get(8);

        assert!(first.same_group(&again));
        assert!(!first.same_group(&other));
        assert_eq!(registry.group_count(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_first_get_yields_one_group() {
        let registry = Arc::new(Registry::new());

        let mut tasks = Vec::new();
        for _ in 0..32 {
            let registry = Arc::clone(&registry);
            tasks.push(tokio::spawn(async move { registry.get(7) }));
        }

        let mut groups = Vec::new();
        for task in tasks {
            groups.push(task.await.unwrap());
        }

        let first = &groups[0];
        assert!(groups.iter().all(|g| g.same_group(first)));
        assert_eq!(registry.group_count(), 1);
    }

    #[tokio::test]
    async fn test_empty_groups_are_retained() {
        let registry = Registry::new();
        let group = registry.get(7);

        let id = next_connection_id();
        let (member, _outbound) = Member::new(id);
        group.register(member);
        group.unregister(id);
        assert_eq!(group.member_count().await, 0);

        // Last member left, but the group survives.
        assert!(registry.get(7).same_group(&group));
        assert_eq!(registry.group_count(), 1);
    }
}
