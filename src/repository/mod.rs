//! Read side of the tree.
//!
//! Every method here is side-effect free and runs outside any transaction.
//! Sequences come back ordered by location ascending unless the method says
//! otherwise; presentation code rebuilds the tree shape from that order alone.

mod lineage;
mod queries;

pub use lineage::{DrawDepth, LineageRow};
pub use queries::TreeQueries;

use crate::error::{NotFound, TreeError};
use crate::path::PathCodec;
use crate::store::{NodeFilter, NodeQuery, NodeRecord, TreeStore};
use crate::types::{Gender, Node, NodeId, Payload, TreeId};
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

/// Typed, read-only view over a [`TreeStore`]
pub struct NodeRepository<P = serde_json::Value> {
    store: Arc<dyn TreeStore>,
    codec: PathCodec,
    _payload: PhantomData<fn() -> P>,
}

impl<P> Clone for NodeRepository<P> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            codec: self.codec.clone(),
            _payload: PhantomData,
        }
    }
}

impl<P: Payload> NodeRepository<P> {
    pub fn new(store: Arc<dyn TreeStore>, codec: PathCodec) -> Self {
        Self {
            store,
            codec,
            _payload: PhantomData,
        }
    }

    pub fn codec(&self) -> &PathCodec {
        &self.codec
    }

    fn queries(&self, tree_id: TreeId) -> TreeQueries<'_> {
        TreeQueries::new(&self.codec, tree_id)
    }

    async fn fetch(&self, query: NodeQuery) -> Result<Vec<Node<P>>, TreeError> {
        let records = self.store.query(&query).await?;
        decode_all(records)
    }

    async fn fetch_first(&self, query: NodeQuery) -> Result<Option<Node<P>>, TreeError> {
        Ok(self.fetch(query.limit(1)).await?.into_iter().next())
    }

    pub async fn find(&self, tree_id: TreeId, location: &str) -> Result<Node<P>, TreeError> {
        self.codec.validate(location)?;
        self.fetch_first(self.queries(tree_id).at(location))
            .await?
            .ok_or_else(|| {
                NotFound::Location {
                    tree_id,
                    location: location.to_string(),
                }
                .into()
            })
    }

    pub async fn find_by_id(&self, tree_id: TreeId, id: NodeId) -> Result<Node<P>, TreeError> {
        self.fetch_first(self.queries(tree_id).by_id(id))
            .await?
            .ok_or_else(|| NotFound::Node { tree_id, id }.into())
    }

    /// The single generation-1 node; `NotFound::Root` when the tree is empty
    pub async fn root(&self, tree_id: TreeId) -> Result<Node<P>, TreeError> {
        self.fetch_first(self.queries(tree_id).root())
            .await?
            .ok_or_else(|| NotFound::Root(tree_id).into())
    }

    pub async fn father(&self, tree_id: TreeId, location: &str) -> Result<Option<Node<P>>, TreeError> {
        self.codec.validate(location)?;
        match self.codec.father(location) {
            Some(father) => self.fetch_first(self.queries(tree_id).at(father)).await,
            None => Ok(None),
        }
    }

    /// Relational root test: no row exists at the father location.
    ///
    /// Differs from [`PathCodec::is_root`] only for detached or orphaned rows.
    pub async fn has_no_father_row(&self, tree_id: TreeId, location: &str) -> Result<bool, TreeError> {
        Ok(self.father(tree_id, location).await?.is_none())
    }

    pub async fn children(
        &self,
        tree_id: TreeId,
        location: &str,
        gender: Option<Gender>,
    ) -> Result<Vec<Node<P>>, TreeError> {
        self.codec.validate(location)?;
        self.fetch(self.queries(tree_id).children(location, gender)).await
    }

    pub async fn descendants(&self, tree_id: TreeId, location: &str) -> Result<Vec<Node<P>>, TreeError> {
        self.codec.validate(location)?;
        self.fetch(self.queries(tree_id).descendants(location)).await
    }

    /// Empty for a root
    pub async fn siblings(
        &self,
        tree_id: TreeId,
        location: &str,
        include_self: bool,
    ) -> Result<Vec<Node<P>>, TreeError> {
        self.codec.validate(location)?;
        match self.queries(tree_id).siblings(location, include_self) {
            Some(query) => self.fetch(query).await,
            None => Ok(Vec::new()),
        }
    }

    /// From the immediate father up to the root (location descending)
    pub async fn ancestors_chain(&self, tree_id: TreeId, location: &str) -> Result<Vec<Node<P>>, TreeError> {
        self.codec.validate(location)?;
        self.fetch(self.queries(tree_id).ancestors(location)).await
    }

    /// Every node of generation `n` (root = 1); empty for `n == 0`
    pub async fn generation(&self, tree_id: TreeId, n: usize) -> Result<Vec<Node<P>>, TreeError> {
        match self.queries(tree_id).generation(n) {
            Some(query) => self.fetch(query).await,
            None => Ok(Vec::new()),
        }
    }

    /// Deepest location, ties broken by the greatest one
    pub async fn longest_location(
        &self,
        tree_id: TreeId,
        prefix: Option<&str>,
    ) -> Result<Option<String>, TreeError> {
        let records = self.store.query(&self.queries(tree_id).longest(prefix)).await?;
        Ok(records.into_iter().next().map(|r| r.location))
    }

    /// Rows in the tree, or in the subtree at `prefix` (itself included)
    pub async fn count(&self, tree_id: TreeId, prefix: Option<&str>) -> Result<u64, TreeError> {
        Ok(self.store.count(&self.queries(tree_id).count_filter(prefix)).await?)
    }

    /// Partners of `node`, ordered by location
    pub async fn spouses(&self, node: &Node<P>) -> Result<Vec<Node<P>>, TreeError> {
        let marriages = self.store.marriages_of(&[node.id]).await?;
        let partners: Vec<NodeId> = marriages
            .iter()
            .filter_map(|m| m.partner_of(&node.id))
            .collect();
        if partners.is_empty() {
            return Ok(Vec::new());
        }
        self.fetch(NodeQuery::new(NodeFilter::ids(partners))).await
    }

    /// The location-sorted rows below `from` (the root when `None`), each with its spouses
    pub async fn lineage(
        &self,
        tree_id: TreeId,
        from: Option<&str>,
        depth: DrawDepth,
    ) -> Result<Vec<LineageRow<P>>, TreeError> {
        let start = match from {
            Some(location) => {
                self.codec.validate(location)?;
                location.to_string()
            }
            None => self.root(tree_id).await?.location,
        };
        let queries = self.queries(tree_id);
        let query = match depth {
            DrawDepth::All => queries.subtree(&start),
            DrawDepth::Generations(n) => queries.window(&start, n),
        };
        let records = self.store.query(&query).await?;
        if records.is_empty() {
            return Err(NotFound::Location { tree_id, location: start }.into());
        }

        let ids: Vec<NodeId> = records.iter().map(|r| r.id).collect();
        let marriages = self.store.marriages_of(&ids).await?;
        let mut partner_ids: Vec<NodeId> = marriages
            .iter()
            .flat_map(|m| [m.husband, m.wife])
            .collect();
        partner_ids.sort();
        partner_ids.dedup();
        let partners: HashMap<NodeId, NodeRecord> = self
            .store
            .query(&NodeQuery::new(NodeFilter::ids(partner_ids)))
            .await?
            .into_iter()
            .map(|r| (r.id, r))
            .collect();

        let mut rows = Vec::with_capacity(records.len());
        for record in records {
            let mut spouses: Vec<NodeRecord> = marriages
                .iter()
                .filter_map(|m| m.partner_of(&record.id))
                .filter_map(|id| partners.get(&id).cloned())
                .collect();
            spouses.sort_by(|a, b| a.location.cmp(&b.location));
            rows.push(LineageRow {
                node: record.into_node()?,
                spouses: decode_all(spouses)?,
            });
        }
        Ok(rows)
    }
}

fn decode_all<P: Payload>(records: Vec<NodeRecord>) -> Result<Vec<Node<P>>, TreeError> {
    records
        .into_iter()
        .map(|r| r.into_node().map_err(TreeError::from))
        .collect()
}
