//! Subtree relocation.
//!
//! Sibling shifts use linked renumbering: each sibling in the shift list takes
//! the location the previous one just vacated, so every write lands on a free
//! prefix. Gaps in a sibling group are preserved, not compacted.

use super::{MutationEngine, TreeTx};
use crate::error::{NotFound, StructuralViolation, TreeError};
use crate::store::{LocationRewrite, NodeFilter, NodeRecord};
use crate::types::{Gender, Node, Payload};

/// Where a moved node lands relative to its target sibling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    Before,
    After,
}

impl Placement {
    fn operation(&self) -> &'static str {
        match self {
            Placement::Before => "move_before_sibling",
            Placement::After => "move_after_sibling",
        }
    }
}

impl<P: Payload> MutationEngine<P> {
    /// Make `node` (with its subtree) the youngest child of `new_parent`.
    ///
    /// The old sibling group keeps its gap.
    pub async fn move_to_parent(&self, node: &Node<P>, new_parent: &Node<P>) -> Result<Node<P>, TreeError> {
        if node.tree_id != new_parent.tree_id {
            return Err(StructuralViolation::DifferentTrees {
                a: node.id,
                b: new_parent.id,
            }
            .into());
        }
        let tree_id = node.tree_id;
        let _guard = self.locks.lock(tree_id).await;
        let mut tx = self.store.begin().await?;

        let result = async {
            let mut scope = TreeTx::new(&mut *tx, &self.codec, tree_id);
            let node = scope.load(node.id).await?;
            let parent = scope.load(new_parent.id).await?;

            if self.codec.is_in_subtree(&parent.location, &node.location) {
                return Err(StructuralViolation::MoveIntoOwnSubtree {
                    node: node.location,
                    target: parent.location,
                }
                .into());
            }
            if parent.gender == Gender::Female {
                return Err(StructuralViolation::FemaleCannotBearChildren {
                    location: parent.location,
                }
                .into());
            }
            if self.codec.father(&node.location) == Some(parent.location.as_str()) {
                return Err(StructuralViolation::AlreadyChildOf {
                    node: node.location,
                    parent: parent.location,
                }
                .into());
            }

            let base = scope.next_child_location(&parent.location).await?;
            scope.move_subtree(&node.location, &base).await?;
            scope.load(node.id).await
        }
        .await;

        let record = self.finish(tx, "move_to_parent", tree_id, result).await?;
        tracing::info!(tree_id = %tree_id, location = %record.location, "Moved to new parent");
        Ok(record.into_node()?)
    }

    /// Place `node` directly before `target` in the target's sibling group
    pub async fn move_before_sibling(&self, node: &Node<P>, target: &Node<P>) -> Result<Node<P>, TreeError> {
        self.move_beside(node, target, Placement::Before).await
    }

    /// Place `node` directly after `target` in the target's sibling group
    pub async fn move_after_sibling(&self, node: &Node<P>, target: &Node<P>) -> Result<Node<P>, TreeError> {
        self.move_beside(node, target, Placement::After).await
    }

    pub async fn move_beside(
        &self,
        node: &Node<P>,
        target: &Node<P>,
        placement: Placement,
    ) -> Result<Node<P>, TreeError> {
        if node.tree_id != target.tree_id {
            return Err(StructuralViolation::DifferentTrees {
                a: node.id,
                b: target.id,
            }
            .into());
        }
        let tree_id = node.tree_id;
        let operation = placement.operation();
        let _guard = self.locks.lock(tree_id).await;
        let mut tx = self.store.begin().await?;

        let result = async {
            let mut scope = TreeTx::new(&mut *tx, &self.codec, tree_id);
            let node = scope.load(node.id).await?;
            let target = scope.load(target.id).await?;

            if node.id == target.id {
                return Err(StructuralViolation::SameNode {
                    location: node.location,
                }
                .into());
            }
            for location in [&node.location, &target.location] {
                if self.codec.is_root(location) {
                    return Err(StructuralViolation::RootNotAllowed {
                        operation,
                        location: location.clone(),
                    }
                    .into());
                }
            }
            if self.codec.is_in_subtree(&target.location, &node.location) {
                return Err(StructuralViolation::MoveIntoOwnSubtree {
                    node: node.location,
                    target: target.location,
                }
                .into());
            }

            if self.codec.are_siblings(&node.location, &target.location) {
                scope.reorder(&node, &target, placement).await?;
            } else {
                scope.transplant(&node, &target, placement).await?;
            }
            scope.load(node.id).await
        }
        .await;

        let record = self.finish(tx, operation, tree_id, result).await?;
        tracing::info!(tree_id = %tree_id, operation, location = %record.location, "Moved beside sibling");
        Ok(record.into_node()?)
    }
}

impl TreeTx<'_> {
    /// Rewrite the subtree at `from` so that it starts at `to`
    pub(super) async fn move_subtree(&mut self, from: &str, to: &str) -> Result<u64, TreeError> {
        let filter = NodeFilter::tree(self.tree_id).subtree(from);
        let rows = self
            .rewrite(&filter, &LocationRewrite::move_prefix(from, to))
            .await?;
        tracing::debug!(tree_id = %self.tree_id, from, to, rows, "Moved subtree");
        Ok(rows)
    }

    /// Move the subtree at `location` out of the location space; returns its parked prefix
    async fn park(&mut self, location: &str) -> Result<String, TreeError> {
        let parked = format!("{}{}", self.codec.separator(), location);
        let filter = NodeFilter::tree(self.tree_id).subtree(location);
        let prefix = LocationRewrite::Prepend(self.codec.separator().to_string());
        self.rewrite(&filter, &prefix).await?;
        Ok(parked)
    }

    /// Give each location in `chain` the slot the previous one vacated; returns the last vacated slot
    async fn shift_chain(&mut self, chain: &[String], vacated: String) -> Result<String, TreeError> {
        let mut vacated = vacated;
        for location in chain {
            self.move_subtree(location, &vacated).await?;
            vacated = location.clone();
        }
        Ok(vacated)
    }

    async fn sibling_locations(&mut self, location: &str) -> Result<Vec<String>, TreeError> {
        let query = self.queries().siblings(location, true).ok_or_else(|| {
            StructuralViolation::RootNotAllowed {
                operation: "siblings",
                location: location.to_string(),
            }
        })?;
        Ok(self.fetch(query).await?.into_iter().map(|r| r.location).collect())
    }

    fn position(&self, siblings: &[String], location: &str) -> Result<usize, TreeError> {
        siblings
            .iter()
            .position(|s| s == location)
            .ok_or_else(|| {
                NotFound::Location {
                    tree_id: self.tree_id,
                    location: location.to_string(),
                }
                .into()
            })
    }

    /// Move within one sibling group, shifting the siblings in between by one slot
    async fn reorder(
        &mut self,
        node: &NodeRecord,
        target: &NodeRecord,
        placement: Placement,
    ) -> Result<(), TreeError> {
        let siblings = self.sibling_locations(&node.location).await?;
        let from = self.position(&siblings, &node.location)?;
        let to = self.position(&siblings, &target.location)?;

        // Siblings between the old and the new position, in shift order
        let chain: Vec<String> = match (placement, from < to) {
            (Placement::Before, true) => siblings[from + 1..to].to_vec(),
            (Placement::After, true) => siblings[from + 1..=to].to_vec(),
            (Placement::Before, false) => siblings[to..from].iter().rev().cloned().collect(),
            (Placement::After, false) => siblings[to + 1..from].iter().rev().cloned().collect(),
        };
        if chain.is_empty() {
            tracing::debug!(tree_id = %self.tree_id, location = %node.location, "Already in place");
            return Ok(());
        }

        let parked = self.park(&node.location).await?;
        let slot = self.shift_chain(&chain, node.location.clone()).await?;
        self.move_subtree(&parked, &slot).await?;
        Ok(())
    }

    /// Move into another sibling group: close the old gap, then open one beside the target
    async fn transplant(
        &mut self,
        node: &NodeRecord,
        target: &NodeRecord,
        placement: Placement,
    ) -> Result<(), TreeError> {
        let parked = self.park(&node.location).await?;

        let younger = match self.queries().younger_siblings(&node.location) {
            Some(query) => self.fetch(query).await?,
            None => Vec::new(),
        };
        let younger: Vec<String> = younger.into_iter().map(|r| r.location).collect();
        self.shift_chain(&younger, node.location.clone()).await?;

        // Closing the gap may have moved the target
        let target = self.load(target.id).await?;
        let siblings = self.sibling_locations(&target.location).await?;
        let at = self.position(&siblings, &target.location)?;
        let insert_at = match placement {
            Placement::Before => at,
            Placement::After => at + 1,
        };

        let last = siblings.last().unwrap_or(&target.location).clone();
        let fresh = self
            .codec
            .next_sibling_location(&last)
            .ok_or_else(|| TreeError::capacity(&last))?;
        let displaced: Vec<String> = siblings[insert_at..].iter().rev().cloned().collect();
        let slot = self.shift_chain(&displaced, fresh).await?;

        self.move_subtree(&parked, &slot).await?;
        Ok(())
    }
}
