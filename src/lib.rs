//! Genealogical trees stored as materialized paths.
//!
//! Every node carries its full ancestry in its `location` (`aaa.aab.aac`), so
//! ancestors, descendants, siblings and generations are prefix, pattern and
//! range queries over one column. [`MutationEngine`] keeps those locations
//! unique and connected while subtrees are created, moved and deleted;
//! [`NodeRepository`] answers the read-side questions.

pub mod config;
pub mod engine;
pub mod error;
pub mod path;
pub mod repository;
pub mod store;
pub mod types;

// Re-export commonly used items
pub use config::{ConfigError, LineageConfig};
pub use engine::{MutationEngine, Placement, TreeLocks};
pub use error::{NotFound, StructuralViolation, TreeError};
pub use path::{Alphabet, PathCodec, PathConfig};
pub use repository::{DrawDepth, LineageRow, NodeRepository};
pub use store::{MemoryTreeStore, SqliteStoreConfig, SqliteTreeStore, StoreError, TreeStore};
pub use types::{Gender, LineageId, Marriage, Node, NodeId, Payload, TreeId};
