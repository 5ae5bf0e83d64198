//! In-process store.
//!
//! Transactions hold the store lock for their whole lifetime and work on a
//! private copy of the state, which replaces the shared state on commit.
//! Location rewrites are applied row by row in location order and each write
//! is checked against the rows already in place, so an update that would pass
//! through a duplicate location fails even if the final state would be unique.

use super::{
    LocationRewrite, NewNodeRecord, NodeFilter, NodeQuery, NodeRecord, StoreError,
    StoreTransaction, TreeStore,
};
use crate::types::{current_timestamp, Marriage, NodeId};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Debug, Clone, Default)]
struct MemoryState {
    nodes: Vec<NodeRecord>,
    marriages: Vec<Marriage>,
}

impl MemoryState {
    fn query(&self, query: &NodeQuery) -> Result<Vec<NodeRecord>, StoreError> {
        let patterns = query.filter.compile_patterns()?;
        let mut rows: Vec<NodeRecord> = self
            .nodes
            .iter()
            .filter(|record| query.filter.accepts(record, &patterns))
            .cloned()
            .collect();
        query.order.sort(&mut rows);
        if let Some(limit) = query.limit {
            rows.truncate(limit);
        }
        Ok(rows)
    }

    fn location_taken(&self, skip: Option<usize>, record: &NodeRecord, location: &str) -> bool {
        self.nodes.iter().enumerate().any(|(i, other)| {
            Some(i) != skip && other.tree_id == record.tree_id && other.location == location
        })
    }

    fn insert(&mut self, row: NewNodeRecord) -> Result<NodeRecord, StoreError> {
        let now = current_timestamp();
        let record = NodeRecord {
            id: NodeId::new(),
            tree_id: row.tree_id,
            location: row.location,
            gender: row.gender,
            payload: row.payload,
            created_at: now,
            updated_at: now,
        };
        if self.location_taken(None, &record, &record.location) {
            return Err(StoreError::UniqueViolation {
                location: record.location,
            });
        }
        self.nodes.push(record.clone());
        Ok(record)
    }

    fn update_location(
        &mut self,
        filter: &NodeFilter,
        rewrite: &LocationRewrite,
    ) -> Result<u64, StoreError> {
        let patterns = filter.compile_patterns()?;
        let mut matched: Vec<usize> = self
            .nodes
            .iter()
            .enumerate()
            .filter(|(_, record)| filter.accepts(record, &patterns))
            .map(|(i, _)| i)
            .collect();
        matched.sort_by(|a, b| self.nodes[*a].location.cmp(&self.nodes[*b].location));

        let now = current_timestamp();
        for &i in &matched {
            let location = rewrite.apply(&self.nodes[i].location);
            if self.location_taken(Some(i), &self.nodes[i], &location) {
                return Err(StoreError::UniqueViolation { location });
            }
            self.nodes[i].location = location;
            self.nodes[i].updated_at = now;
        }
        Ok(matched.len() as u64)
    }

    fn delete(&mut self, filter: &NodeFilter) -> Result<u64, StoreError> {
        let patterns = filter.compile_patterns()?;
        let before = self.nodes.len();
        self.nodes.retain(|record| !filter.accepts(record, &patterns));
        Ok((before - self.nodes.len()) as u64)
    }

    fn marriages_of(&self, ids: &[NodeId]) -> Vec<Marriage> {
        self.marriages
            .iter()
            .filter(|m| ids.iter().any(|id| m.involves(id)))
            .cloned()
            .collect()
    }

    fn delete_marriages_where(&mut self, doomed: impl Fn(&Marriage) -> bool) -> u64 {
        let before = self.marriages.len();
        self.marriages.retain(|m| !doomed(m));
        (before - self.marriages.len()) as u64
    }
}

/// Store that keeps every tree in process memory
#[derive(Debug, Clone, Default)]
pub struct MemoryTreeStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryTreeStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TreeStore for MemoryTreeStore {
    async fn query(&self, query: &NodeQuery) -> Result<Vec<NodeRecord>, StoreError> {
        self.state.lock().await.query(query)
    }

    async fn count(&self, filter: &NodeFilter) -> Result<u64, StoreError> {
        let rows = self.state.lock().await.query(&NodeQuery::new(filter.clone()))?;
        Ok(rows.len() as u64)
    }

    async fn marriages_of(&self, ids: &[NodeId]) -> Result<Vec<Marriage>, StoreError> {
        Ok(self.state.lock().await.marriages_of(ids))
    }

    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError> {
        let guard = self.state.clone().lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(MemoryTransaction { guard, working }))
    }
}

struct MemoryTransaction {
    guard: OwnedMutexGuard<MemoryState>,
    working: MemoryState,
}

#[async_trait]
impl StoreTransaction for MemoryTransaction {
    async fn query(&mut self, query: &NodeQuery) -> Result<Vec<NodeRecord>, StoreError> {
        self.working.query(query)
    }

    async fn insert(&mut self, row: NewNodeRecord) -> Result<NodeRecord, StoreError> {
        self.working.insert(row)
    }

    async fn update_location(
        &mut self,
        filter: &NodeFilter,
        rewrite: &LocationRewrite,
    ) -> Result<u64, StoreError> {
        self.working.update_location(filter, rewrite)
    }

    async fn delete(&mut self, filter: &NodeFilter) -> Result<u64, StoreError> {
        self.working.delete(filter)
    }

    async fn marriages_of(&mut self, ids: &[NodeId]) -> Result<Vec<Marriage>, StoreError> {
        Ok(self.working.marriages_of(ids))
    }

    async fn insert_marriage(&mut self, marriage: &Marriage) -> Result<(), StoreError> {
        self.working.marriages.push(marriage.clone());
        Ok(())
    }

    async fn delete_marriage(&mut self, a: &NodeId, b: &NodeId) -> Result<u64, StoreError> {
        Ok(self
            .working
            .delete_marriages_where(|m| m.partner_of(a) == Some(*b)))
    }

    async fn delete_marriages_within(&mut self, filter: &NodeFilter) -> Result<u64, StoreError> {
        let ids: HashSet<NodeId> = self
            .working
            .query(&NodeQuery::new(filter.clone()))?
            .into_iter()
            .map(|r| r.id)
            .collect();
        Ok(self
            .working
            .delete_marriages_where(|m| ids.contains(&m.husband) || ids.contains(&m.wife)))
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let MemoryTransaction { mut guard, working } = *self;
        *guard = working;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::LocationPredicate;
    use crate::types::{Gender, TreeId};
    use serde_json::json;

    fn row(tree_id: TreeId, location: &str) -> NewNodeRecord {
        NewNodeRecord {
            tree_id,
            location: location.to_string(),
            gender: Gender::Male,
            payload: json!({ "name": location }),
        }
    }

    async fn seeded(locations: &[&str]) -> (MemoryTreeStore, TreeId) {
        let store = MemoryTreeStore::new();
        let tree_id = TreeId::new();
        let mut tx = store.begin().await.unwrap();
        for location in locations {
            tx.insert(row(tree_id, location)).await.unwrap();
        }
        tx.commit().await.unwrap();
        (store, tree_id)
    }

    async fn locations(store: &MemoryTreeStore, tree_id: TreeId) -> Vec<String> {
        store
            .query(&NodeQuery::new(NodeFilter::tree(tree_id)))
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.location)
            .collect()
    }

    #[tokio::test]
    async fn dropped_transaction_rolls_back() {
        let (store, tree_id) = seeded(&["aaa"]).await;
        {
            let mut tx = store.begin().await.unwrap();
            tx.insert(row(tree_id, "aaa.aaa")).await.unwrap();
        }
        assert_eq!(locations(&store, tree_id).await, vec!["aaa"]);
    }

    #[tokio::test]
    async fn duplicate_insert_is_rejected() {
        let (store, tree_id) = seeded(&["aaa"]).await;
        let mut tx = store.begin().await.unwrap();
        let err = tx.insert(row(tree_id, "aaa")).await.unwrap_err();
        assert!(matches!(err, StoreError::UniqueViolation { .. }));

        // Same location in another tree is fine
        tx.insert(row(TreeId::new(), "aaa")).await.unwrap();
    }

    #[tokio::test]
    async fn transient_duplicates_fail_the_statement() {
        let (store, tree_id) = seeded(&["aaa", "aaa.aaa", "aaa.aab"]).await;
        let mut tx = store.begin().await.unwrap();

        // aaa.aaa -> aaa.aab collides with the row that has not moved yet
        let err = tx
            .update_location(
                &NodeFilter::tree(tree_id).at("aaa.aaa"),
                &LocationRewrite::Set("aaa.aab".into()),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::UniqueViolation { .. }));
    }

    #[tokio::test]
    async fn prefix_rewrite_moves_subtree() {
        let (store, tree_id) = seeded(&["aaa", "aaa.aab", "aaa.aab.aaa", "aaa.aac"]).await;
        let mut tx = store.begin().await.unwrap();
        let moved = tx
            .update_location(
                &NodeFilter::tree(tree_id).subtree("aaa.aab"),
                &LocationRewrite::move_prefix("aaa.aab", "aaa.aac.aaa"),
            )
            .await
            .unwrap();
        assert_eq!(moved, 2);
        tx.commit().await.unwrap();

        assert_eq!(
            locations(&store, tree_id).await,
            vec!["aaa", "aaa.aac", "aaa.aac.aaa", "aaa.aac.aaa.aaa"]
        );
    }

    #[tokio::test]
    async fn delete_by_range() {
        let (store, tree_id) = seeded(&["aaa", "aaa.aaa", "aaa.aab", "aaa.aac"]).await;
        let mut tx = store.begin().await.unwrap();
        let deleted = tx
            .delete(
                &NodeFilter::tree(tree_id)
                    .location(LocationPredicate::GreaterOrEqual("aaa.aab".into())),
            )
            .await
            .unwrap();
        assert_eq!(deleted, 2);
        tx.commit().await.unwrap();
        assert_eq!(locations(&store, tree_id).await, vec!["aaa", "aaa.aaa"]);
    }
}
