//! Error taxonomy for path handling, queries and tree mutations

use crate::store::StoreError;
use crate::types::{Gender, NodeId, TreeId};

/// Every public operation either succeeds or fails with exactly one of these
#[derive(Debug, thiserror::Error)]
pub enum TreeError {
    #[error("Invalid path {path:?}: {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("Invalid path configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    NotFound(#[from] NotFound),

    #[error("No free slot after {location:?}: segment capacity exhausted")]
    CapacityExceeded { location: String },

    #[error(transparent)]
    Structural(#[from] StructuralViolation),

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Payload serialization failed: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("Transaction failed: {0}")]
    TransactionFailed(#[from] StoreError),
}

impl TreeError {
    pub(crate) fn invalid_path(path: &str, reason: impl Into<String>) -> Self {
        TreeError::InvalidPath {
            path: path.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn capacity(location: &str) -> Self {
        TreeError::CapacityExceeded {
            location: location.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, TreeError::NotFound(_))
    }

    pub fn is_structural(&self) -> bool {
        matches!(self, TreeError::Structural(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NotFound {
    #[error("No node at {location:?} in tree {tree_id}")]
    Location { tree_id: TreeId, location: String },

    #[error("Node {id} not found in tree {tree_id}")]
    Node { tree_id: TreeId, id: NodeId },

    #[error("Tree {0} is empty")]
    Root(TreeId),
}

/// The specific tree rule an operation would have broken
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StructuralViolation {
    #[error("Tree {0} already has a root")]
    TreeNotEmpty(TreeId),

    #[error("Operation {operation} is not allowed on the root {location:?}")]
    RootNotAllowed {
        operation: &'static str,
        location: String,
    },

    #[error("Female node {location:?} cannot bear children")]
    FemaleCannotBearChildren { location: String },

    #[error("Cannot move {node:?} into its own subtree at {target:?}")]
    MoveIntoOwnSubtree { node: String, target: String },

    #[error("{node:?} is already a child of {parent:?}")]
    AlreadyChildOf { node: String, parent: String },

    #[error("{location:?} cannot be moved relative to itself")]
    SameNode { location: String },

    #[error("Location {location:?} is already taken")]
    DuplicateLocation { location: String },

    #[error("Nodes {a} and {b} are in different trees")]
    DifferentTrees { a: NodeId, b: NodeId },

    #[error("Cannot marry two {gender} nodes")]
    IncompatibleSpouses { gender: Gender },

    #[error("A node cannot marry itself")]
    SelfMarriage,

    #[error("{husband} and {wife} are already married")]
    AlreadyMarried { husband: NodeId, wife: NodeId },

    #[error("{a} and {b} are not married")]
    NotMarried { a: NodeId, b: NodeId },
}
