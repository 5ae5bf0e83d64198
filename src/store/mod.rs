//! Persistence boundary.
//!
//! The tree logic never touches SQL directly: it describes *which* rows it
//! wants with a [`NodeFilter`] and *how* their locations change with a
//! [`LocationRewrite`], and a [`TreeStore`] evaluates both. All writes happen
//! inside a [`StoreTransaction`].

mod memory;
mod sqlite;

pub use memory::MemoryTreeStore;
pub use sqlite::{SqliteStoreConfig, SqliteTreeStore};

use crate::types::{Gender, Marriage, Node, NodeId, Payload, TreeId};
use async_trait::async_trait;
use regex::Regex;

// ============================================================================
// Rows
// ============================================================================

/// A node exactly as stored; the payload is still raw JSON
#[derive(Debug, Clone, PartialEq)]
pub struct NodeRecord {
    pub id: NodeId,
    pub tree_id: TreeId,
    pub location: String,
    pub gender: Gender,
    pub payload: serde_json::Value,
    pub created_at: i64,
    pub updated_at: i64,
}

impl NodeRecord {
    /// Decode the stored JSON payload into the caller's type
    pub fn into_node<P: Payload>(self) -> Result<Node<P>, serde_json::Error> {
        Ok(Node {
            id: self.id,
            tree_id: self.tree_id,
            location: self.location,
            gender: self.gender,
            payload: serde_json::from_value(self.payload)?,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// A row to insert; the store assigns identity and timestamps
#[derive(Debug, Clone)]
pub struct NewNodeRecord {
    pub tree_id: TreeId,
    pub location: String,
    pub gender: Gender,
    pub payload: serde_json::Value,
}

// ============================================================================
// Predicates
// ============================================================================

/// A test on the `location` column
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocationPredicate {
    Equals(String),
    StartsWith(String),
    /// Anchored regular expression
    Matches(String),
    Less(String),
    Greater(String),
    LessOrEqual(String),
    GreaterOrEqual(String),
    In(Vec<String>),
    /// Exactly this many characters
    Length(usize),
    LengthAtMost(usize),
}

impl LocationPredicate {
    /// Evaluate in memory; used by stores that cannot push a predicate down
    pub fn evaluate(&self, location: &str, pattern: Option<&Regex>) -> bool {
        match self {
            LocationPredicate::Equals(value) => location == value,
            LocationPredicate::StartsWith(prefix) => location.starts_with(prefix.as_str()),
            LocationPredicate::Matches(_) => pattern.map(|re| re.is_match(location)).unwrap_or(false),
            LocationPredicate::Less(value) => location < value.as_str(),
            LocationPredicate::Greater(value) => location > value.as_str(),
            LocationPredicate::LessOrEqual(value) => location <= value.as_str(),
            LocationPredicate::GreaterOrEqual(value) => location >= value.as_str(),
            LocationPredicate::In(values) => values.iter().any(|v| v == location),
            LocationPredicate::Length(len) => location.chars().count() == *len,
            LocationPredicate::LengthAtMost(len) => location.chars().count() <= *len,
        }
    }
}

/// Conjunction of constraints selecting node rows
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeFilter {
    pub tree_id: Option<TreeId>,
    pub ids: Option<Vec<NodeId>>,
    pub gender: Option<Gender>,
    pub location: Vec<LocationPredicate>,
}

impl NodeFilter {
    pub fn tree(tree_id: TreeId) -> Self {
        Self {
            tree_id: Some(tree_id),
            ..Self::default()
        }
    }

    /// Rows with the given identities, in whichever trees they live
    pub fn ids(ids: Vec<NodeId>) -> Self {
        Self {
            ids: Some(ids),
            ..Self::default()
        }
    }

    pub fn id(mut self, id: NodeId) -> Self {
        self.ids = Some(vec![id]);
        self
    }

    pub fn gender(mut self, gender: Option<Gender>) -> Self {
        self.gender = gender;
        self
    }

    pub fn location(mut self, predicate: LocationPredicate) -> Self {
        self.location.push(predicate);
        self
    }

    pub fn at(self, location: impl Into<String>) -> Self {
        self.location(LocationPredicate::Equals(location.into()))
    }

    /// `location` and everything below it
    pub fn subtree(self, location: impl Into<String>) -> Self {
        self.location(LocationPredicate::StartsWith(location.into()))
    }

    pub fn matching(self, pattern: impl Into<String>) -> Self {
        self.location(LocationPredicate::Matches(pattern.into()))
    }

    /// Compile the regular expressions this filter carries, in predicate order
    pub fn compile_patterns(&self) -> Result<Vec<Regex>, StoreError> {
        self.location
            .iter()
            .filter_map(|p| match p {
                LocationPredicate::Matches(pattern) => Some(pattern),
                _ => None,
            })
            .map(|pattern| {
                Regex::new(pattern).map_err(|e| StoreError::Pattern {
                    pattern: pattern.clone(),
                    message: e.to_string(),
                })
            })
            .collect()
    }

    pub fn has_patterns(&self) -> bool {
        self.location
            .iter()
            .any(|p| matches!(p, LocationPredicate::Matches(_)))
    }

    /// Test a stored row against every constraint
    pub fn accepts(&self, record: &NodeRecord, patterns: &[Regex]) -> bool {
        if self.tree_id.is_some_and(|tree_id| tree_id != record.tree_id) {
            return false;
        }
        if let Some(ids) = &self.ids {
            if !ids.contains(&record.id) {
                return false;
            }
        }
        if self.gender.is_some_and(|gender| gender != record.gender) {
            return false;
        }
        self.location_accepts(&record.location, patterns)
    }

    pub fn location_accepts(&self, location: &str, patterns: &[Regex]) -> bool {
        let mut patterns = patterns.iter();
        self.location.iter().all(|predicate| {
            let pattern = match predicate {
                LocationPredicate::Matches(_) => patterns.next(),
                _ => None,
            };
            predicate.evaluate(location, pattern)
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum NodeOrder {
    #[default]
    LocationAsc,
    LocationDesc,
    /// Deepest first, ties broken by location descending
    LongestFirst,
}

impl NodeOrder {
    pub fn sort(&self, records: &mut [NodeRecord]) {
        match self {
            NodeOrder::LocationAsc => records.sort_by(|a, b| a.location.cmp(&b.location)),
            NodeOrder::LocationDesc => records.sort_by(|a, b| b.location.cmp(&a.location)),
            NodeOrder::LongestFirst => records.sort_by(|a, b| {
                let len = |r: &NodeRecord| r.location.chars().count();
                len(b).cmp(&len(a)).then_with(|| b.location.cmp(&a.location))
            }),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeQuery {
    pub filter: NodeFilter,
    pub order: NodeOrder,
    pub limit: Option<usize>,
}

impl NodeQuery {
    pub fn new(filter: NodeFilter) -> Self {
        Self {
            filter,
            order: NodeOrder::default(),
            limit: None,
        }
    }

    pub fn order(mut self, order: NodeOrder) -> Self {
        self.order = order;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

// ============================================================================
// Rewrites
// ============================================================================

/// New value for the location column of every matched row
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocationRewrite {
    Set(String),
    /// Drop the first `prefix_len` characters and put `replacement` in front
    ReplacePrefix { prefix_len: usize, replacement: String },
    Prepend(String),
}

impl LocationRewrite {
    /// Move a whole subtree: every location starting with `from` now starts with `to`
    pub fn move_prefix(from: &str, to: impl Into<String>) -> Self {
        LocationRewrite::ReplacePrefix {
            prefix_len: from.chars().count(),
            replacement: to.into(),
        }
    }

    pub fn apply(&self, location: &str) -> String {
        match self {
            LocationRewrite::Set(value) => value.clone(),
            LocationRewrite::ReplacePrefix {
                prefix_len,
                replacement,
            } => {
                let rest: String = location.chars().skip(*prefix_len).collect();
                format!("{}{}", replacement, rest)
            }
            LocationRewrite::Prepend(prefix) => format!("{}{}", prefix, location),
        }
    }
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Location {location:?} is already taken")]
    UniqueViolation { location: String },

    #[error("Invalid pattern {pattern:?}: {message}")]
    Pattern { pattern: String, message: String },

    #[error("Corrupt row: {0}")]
    Corrupt(String),

    #[error("Transaction already finished")]
    Finished,
}

// ============================================================================
// Traits
// ============================================================================

/// Backing store for one or more trees.
///
/// Reads through the store itself see committed data only; mutations go
/// through [`TreeStore::begin`].
#[async_trait]
pub trait TreeStore: Send + Sync {
    async fn query(&self, query: &NodeQuery) -> Result<Vec<NodeRecord>, StoreError>;

    async fn count(&self, filter: &NodeFilter) -> Result<u64, StoreError>;

    /// Marriages in which any of `ids` takes part
    async fn marriages_of(&self, ids: &[NodeId]) -> Result<Vec<Marriage>, StoreError>;

    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError>;
}

/// One atomic unit of work.
///
/// Dropping a transaction without calling [`commit`](StoreTransaction::commit)
/// discards every write made through it.
#[async_trait]
pub trait StoreTransaction: Send {
    async fn query(&mut self, query: &NodeQuery) -> Result<Vec<NodeRecord>, StoreError>;

    async fn insert(&mut self, row: NewNodeRecord) -> Result<NodeRecord, StoreError>;

    /// Rewrite the location of every matched row; returns the number of rows touched
    async fn update_location(
        &mut self,
        filter: &NodeFilter,
        rewrite: &LocationRewrite,
    ) -> Result<u64, StoreError>;

    async fn delete(&mut self, filter: &NodeFilter) -> Result<u64, StoreError>;

    async fn marriages_of(&mut self, ids: &[NodeId]) -> Result<Vec<Marriage>, StoreError>;

    async fn insert_marriage(&mut self, marriage: &Marriage) -> Result<(), StoreError>;

    /// Remove the edge between `a` and `b`, in either direction
    async fn delete_marriage(&mut self, a: &NodeId, b: &NodeId) -> Result<u64, StoreError>;

    /// Remove every edge touching a node matched by `filter`
    async fn delete_marriages_within(&mut self, filter: &NodeFilter) -> Result<u64, StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}
