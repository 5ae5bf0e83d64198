//! MutationEngine: every structural change to a tree.
//!
//! Each public operation takes the tree's advisory lock, opens one store
//! transaction, re-reads the nodes it was handed, checks its preconditions,
//! writes, and commits. Any error drops the transaction, which rolls it back.
//!
//! Location rewrites are ordered so that no statement ever passes through a
//! duplicate `(tree_id, location)` pair. Subtrees that have to get out of the
//! way are parked first by prefixing their locations with the separator,
//! which no valid location starts with.

mod locks;
mod marriage;
mod relocate;


pub use locks::{TreeGuard, TreeLocks};
pub use relocate::Placement;

use crate::error::{NotFound, StructuralViolation, TreeError};
use crate::path::PathCodec;
use crate::repository::{NodeRepository, TreeQueries};
use crate::store::{
    LocationRewrite, NewNodeRecord, NodeFilter, NodeQuery, NodeRecord, StoreError,
    StoreTransaction, TreeStore,
};
use crate::types::{Gender, Node, NodeId, Payload, TreeId};
use serde_json::Value;
use std::marker::PhantomData;
use std::sync::Arc;

/// Write side of the tree
pub struct MutationEngine<P = Value> {
    store: Arc<dyn TreeStore>,
    codec: PathCodec,
    locks: TreeLocks,
    _payload: PhantomData<fn() -> P>,
}

impl<P> Clone for MutationEngine<P> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            codec: self.codec.clone(),
            locks: self.locks.clone(),
            _payload: PhantomData,
        }
    }
}

impl<P: Payload> MutationEngine<P> {
    pub fn new(store: Arc<dyn TreeStore>, codec: PathCodec) -> Self {
        Self {
            store,
            codec,
            locks: TreeLocks::new(),
            _payload: PhantomData,
        }
    }

    /// Share a lock table with other engines over the same store
    pub fn with_locks(mut self, locks: TreeLocks) -> Self {
        self.locks = locks;
        self
    }

    pub fn codec(&self) -> &PathCodec {
        &self.codec
    }

    pub fn locks(&self) -> &TreeLocks {
        &self.locks
    }

    /// Read-only view over the same store and codec
    pub fn repository(&self) -> NodeRepository<P> {
        NodeRepository::new(self.store.clone(), self.codec.clone())
    }

    /// Commit on success; otherwise roll back and hand the error on
    async fn finish<T>(
        &self,
        tx: Box<dyn StoreTransaction>,
        operation: &'static str,
        tree_id: TreeId,
        result: Result<T, TreeError>,
    ) -> Result<T, TreeError> {
        match result {
            Ok(value) => {
                tx.commit().await?;
                Ok(value)
            }
            Err(err) => {
                tracing::warn!(tree_id = %tree_id, operation, error = %err, "Mutation rolled back");
                if let Err(rollback) = tx.rollback().await {
                    tracing::warn!(tree_id = %tree_id, operation, error = %rollback, "Rollback failed");
                }
                Err(err)
            }
        }
    }

    // ------------------------------------------------------------------------
    // Creation
    // ------------------------------------------------------------------------

    /// First node of an empty tree, placed at the first possible segment
    pub async fn create_root(&self, tree_id: TreeId, payload: P, gender: Gender) -> Result<Node<P>, TreeError> {
        let payload = encode_payload(&payload)?;
        let _guard = self.locks.lock(tree_id).await;
        let mut tx = self.store.begin().await?;

        let result = async {
            let mut scope = TreeTx::new(&mut *tx, &self.codec, tree_id);
            if !scope.is_empty().await? {
                return Err(StructuralViolation::TreeNotEmpty(tree_id).into());
            }
            scope
                .insert(self.codec.first_possible_segment(), gender, payload)
                .await
        }
        .await;

        let record = self.finish(tx, "create_root", tree_id, result).await?;
        tracing::info!(tree_id = %tree_id, location = %record.location, "Created root");
        Ok(record.into_node()?)
    }

    /// New youngest child of `parent`
    pub async fn create_child(&self, parent: &Node<P>, payload: P, gender: Gender) -> Result<Node<P>, TreeError> {
        let payload = encode_payload(&payload)?;
        let tree_id = parent.tree_id;
        let _guard = self.locks.lock(tree_id).await;
        let mut tx = self.store.begin().await?;

        let result = async {
            let mut scope = TreeTx::new(&mut *tx, &self.codec, tree_id);
            let parent = scope.load(parent.id).await?;
            if parent.gender == Gender::Female {
                return Err(StructuralViolation::FemaleCannotBearChildren {
                    location: parent.location,
                }
                .into());
            }
            let location = scope.next_child_location(&parent.location).await?;
            scope.insert(location, gender, payload).await
        }
        .await;

        let record = self.finish(tx, "create_child", tree_id, result).await?;
        tracing::info!(tree_id = %tree_id, location = %record.location, "Created child");
        Ok(record.into_node()?)
    }

    /// New youngest sibling of `node`, placed after the last existing sibling
    pub async fn create_sibling(&self, node: &Node<P>, payload: P, gender: Gender) -> Result<Node<P>, TreeError> {
        let payload = encode_payload(&payload)?;
        let tree_id = node.tree_id;
        let _guard = self.locks.lock(tree_id).await;
        let mut tx = self.store.begin().await?;

        let result = async {
            let mut scope = TreeTx::new(&mut *tx, &self.codec, tree_id);
            let node = scope.load(node.id).await?;
            if self.codec.is_root(&node.location) {
                return Err(StructuralViolation::RootNotAllowed {
                    operation: "create_sibling",
                    location: node.location,
                }
                .into());
            }
            let location = scope.next_sibling_slot(&node.location).await?;
            scope.insert(location, gender, payload).await
        }
        .await;

        let record = self.finish(tx, "create_sibling", tree_id, result).await?;
        tracing::info!(tree_id = %tree_id, location = %record.location, "Created sibling");
        Ok(record.into_node()?)
    }

    /// New male root whose only child is the old root.
    ///
    /// Every location first gains a leading separator and then the first
    /// segment, so the old root never shares a location with its new father.
    pub async fn create_ancestor_above_root(&self, tree_id: TreeId, payload: P) -> Result<Node<P>, TreeError> {
        let payload = encode_payload(&payload)?;
        let _guard = self.locks.lock(tree_id).await;
        let mut tx = self.store.begin().await?;

        let result = async {
            let mut scope = TreeTx::new(&mut *tx, &self.codec, tree_id);
            let query = scope.queries().root();
            if scope.first(query).await?.is_none() {
                return Err(NotFound::Root(tree_id).into());
            }
            let first = self.codec.first_possible_segment();
            let whole_tree = NodeFilter::tree(tree_id);

            let rows = scope
                .rewrite(&whole_tree, &LocationRewrite::Prepend(self.codec.separator().to_string()))
                .await?;
            scope
                .rewrite(&whole_tree, &LocationRewrite::Prepend(first.clone()))
                .await?;
            tracing::debug!(tree_id = %tree_id, rows, "Pushed tree one generation down");

            scope.insert(first, Gender::Male, payload).await
        }
        .await;

        let record = self.finish(tx, "create_ancestor_above_root", tree_id, result).await?;
        tracing::info!(tree_id = %tree_id, location = %record.location, "Created ancestor above root");
        Ok(record.into_node()?)
    }

    // ------------------------------------------------------------------------
    // Removal
    // ------------------------------------------------------------------------

    /// Remove `node`, everything below it, and every marriage touching them
    pub async fn delete_with_descendants(&self, node: &Node<P>) -> Result<u64, TreeError> {
        let tree_id = node.tree_id;
        let _guard = self.locks.lock(tree_id).await;
        let mut tx = self.store.begin().await?;

        let result = async {
            let mut scope = TreeTx::new(&mut *tx, &self.codec, tree_id);
            let node = scope.load(node.id).await?;
            let subtree = NodeFilter::tree(tree_id).subtree(node.location.as_str());
            let marriages = scope.tx.delete_marriages_within(&subtree).await?;
            let deleted = scope.tx.delete(&subtree).await?;
            Ok::<_, TreeError>((node.location, deleted, marriages))
        }
        .await;

        let (location, deleted, marriages) = self
            .finish(tx, "delete_with_descendants", tree_id, result)
            .await?;
        tracing::info!(tree_id = %tree_id, location = %location, deleted, marriages, "Deleted subtree");
        Ok(deleted)
    }

    /// Delete the single row at `location`, leaving anything below it orphaned.
    ///
    /// Only safe when the caller immediately re-inserts a row there. Marriages
    /// of the removed row are deleted with it.
    pub async fn detach_location(&self, tree_id: TreeId, location: &str) -> Result<u64, TreeError> {
        self.codec.validate(location)?;
        let _guard = self.locks.lock(tree_id).await;
        let mut tx = self.store.begin().await?;

        let result = async {
            let mut scope = TreeTx::new(&mut *tx, &self.codec, tree_id);
            let query = scope.queries().at(location);
            let record = scope.first(query).await?.ok_or_else(|| NotFound::Location {
                tree_id,
                location: location.to_string(),
            })?;
            let row = NodeFilter::tree(tree_id).id(record.id);
            scope.tx.delete_marriages_within(&row).await?;
            let deleted = scope.tx.delete(&row).await?;
            Ok::<_, TreeError>(deleted)
        }
        .await;

        let deleted = self.finish(tx, "detach_location", tree_id, result).await?;
        tracing::info!(tree_id = %tree_id, location, "Detached location");
        Ok(deleted)
    }
}

// ============================================================================
// Transaction scope
// ============================================================================

/// One tree's view of an open transaction
pub(crate) struct TreeTx<'a> {
    tx: &'a mut dyn StoreTransaction,
    codec: &'a PathCodec,
    tree_id: TreeId,
}

impl<'a> TreeTx<'a> {
    fn new(tx: &'a mut dyn StoreTransaction, codec: &'a PathCodec, tree_id: TreeId) -> Self {
        Self { tx, codec, tree_id }
    }

    fn queries(&self) -> TreeQueries<'a> {
        TreeQueries::new(self.codec, self.tree_id)
    }

    async fn fetch(&mut self, query: NodeQuery) -> Result<Vec<NodeRecord>, TreeError> {
        Ok(self.tx.query(&query).await?)
    }

    async fn first(&mut self, query: NodeQuery) -> Result<Option<NodeRecord>, TreeError> {
        Ok(self.fetch(query.limit(1)).await?.into_iter().next())
    }

    async fn load(&mut self, id: NodeId) -> Result<NodeRecord, TreeError> {
        load_record(self.tx, self.tree_id, id).await
    }

    async fn is_empty(&mut self) -> Result<bool, TreeError> {
        let query = self.queries().all();
        Ok(self.first(query).await?.is_none())
    }

    async fn insert(&mut self, location: String, gender: Gender, payload: Value) -> Result<NodeRecord, TreeError> {
        let row = NewNodeRecord {
            tree_id: self.tree_id,
            location,
            gender,
            payload,
        };
        self.tx.insert(row).await.map_err(lift)
    }

    async fn rewrite(&mut self, filter: &NodeFilter, rewrite: &LocationRewrite) -> Result<u64, TreeError> {
        self.tx.update_location(filter, rewrite).await.map_err(lift)
    }

    /// Slot after the youngest child of `parent`, or its first child slot
    async fn next_child_location(&mut self, parent: &str) -> Result<String, TreeError> {
        let query = self.queries().last_child(parent);
        match self.first(query).await? {
            Some(last) => self
                .codec
                .next_sibling_location(&last.location)
                .ok_or_else(|| TreeError::capacity(&last.location)),
            None => Ok(self.codec.first_child(parent)),
        }
    }

    /// Slot after the youngest sibling of `location`, itself included
    async fn next_sibling_slot(&mut self, location: &str) -> Result<String, TreeError> {
        let last = match self.queries().last_sibling(location) {
            Some(query) => self.first(query).await?,
            None => None,
        };
        let last = last.map(|r| r.location).unwrap_or_else(|| location.to_string());
        self.codec
            .next_sibling_location(&last)
            .ok_or_else(|| TreeError::capacity(&last))
    }
}

async fn load_record(
    tx: &mut dyn StoreTransaction,
    tree_id: TreeId,
    id: NodeId,
) -> Result<NodeRecord, TreeError> {
    let query = NodeQuery::new(NodeFilter::tree(tree_id).id(id)).limit(1);
    tx.query(&query)
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| NotFound::Node { tree_id, id }.into())
}

/// Unique violations during a mutation are structural, not infrastructure, failures
fn lift(err: StoreError) -> TreeError {
    match err {
        StoreError::UniqueViolation { location } => {
            StructuralViolation::DuplicateLocation { location }.into()
        }
        other => other.into(),
    }
}

/// Serialize a caller payload, rejecting empty ones
pub(crate) fn encode_payload<P: Payload>(payload: &P) -> Result<Value, TreeError> {
    let value = serde_json::to_value(payload)?;
    let empty = match &value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(fields) => fields.is_empty(),
        _ => false,
    };
    if empty {
        return Err(TreeError::InvalidPayload(format!("empty payload {}", value)));
    }
    Ok(value)
}
