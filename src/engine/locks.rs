//! Per-tree advisory locks.
//!
//! The shifting algorithms read a sibling or subtree set and then write based
//! on it. SQLite offers no range locks, so two mutations of the same tree are
//! serialized here instead.

use crate::types::TreeId;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Held for the whole read-decide-write sequence of one mutation
pub type TreeGuard = OwnedMutexGuard<()>;

/// Lock table keyed by tree id.
///
/// Clones share the table, so engines built over the same store should share
/// one `TreeLocks` (see `MutationEngine::with_locks`).
#[derive(Debug, Clone, Default)]
pub struct TreeLocks {
    trees: Arc<Mutex<HashMap<TreeId, Arc<AsyncMutex<()>>>>>,
}

impl TreeLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// The tree's mutex. Entries nobody holds or waits on are dropped first,
    /// so the table stays as large as the set of trees in use.
    fn entry(&self, tree_id: TreeId) -> Arc<AsyncMutex<()>> {
        let mut trees = self.trees.lock().unwrap_or_else(PoisonError::into_inner);
        trees.retain(|_, mutex| Arc::strong_count(mutex) > 1);
        trees.entry(tree_id).or_default().clone()
    }

    pub async fn lock(&self, tree_id: TreeId) -> TreeGuard {
        self.entry(tree_id).lock_owned().await
    }

    /// Lock several trees at once, always in id order
    pub async fn lock_all(&self, tree_ids: &[TreeId]) -> Vec<TreeGuard> {
        let mut ids = tree_ids.to_vec();
        ids.sort();
        ids.dedup();
        let mut guards = Vec::with_capacity(ids.len());
        for tree_id in ids {
            guards.push(self.lock(tree_id).await);
        }
        guards
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn same_tree_is_serialized() {
        let locks = TreeLocks::new();
        let tree_id = TreeId::from_name("smiths");

        let guard = locks.lock(tree_id).await;
        let contended = tokio::time::timeout(Duration::from_millis(50), locks.lock(tree_id)).await;
        assert!(contended.is_err());

        drop(guard);
        let reacquired = tokio::time::timeout(Duration::from_millis(50), locks.lock(tree_id)).await;
        assert!(reacquired.is_ok());
    }

    #[tokio::test]
    async fn different_trees_do_not_contend() {
        let locks = TreeLocks::new();
        let _smiths = locks.lock(TreeId::from_name("smiths")).await;
        let jones = tokio::time::timeout(
            Duration::from_millis(50),
            locks.lock(TreeId::from_name("jones")),
        )
        .await;
        assert!(jones.is_ok());
    }

    #[tokio::test]
    async fn lock_all_dedups() {
        let locks = TreeLocks::new();
        let tree_id = TreeId::from_name("smiths");
        let guards = locks.lock_all(&[tree_id, tree_id]).await;
        assert_eq!(guards.len(), 1);
    }

    fn tracked(locks: &TreeLocks) -> usize {
        locks.trees.lock().unwrap().len()
    }

    #[tokio::test]
    async fn idle_trees_are_pruned() {
        let locks = TreeLocks::new();
        let smiths = TreeId::from_name("smiths");

        drop(locks.lock(smiths).await);
        let jones = locks.lock(TreeId::from_name("jones")).await;
        assert_eq!(tracked(&locks), 1);

        // Held entries survive
        let _smiths = locks.lock(smiths).await;
        assert_eq!(tracked(&locks), 2);
        drop(jones);
        let still_held = tokio::time::timeout(Duration::from_millis(50), locks.lock(smiths)).await;
        assert!(still_held.is_err());
    }
}
