use serde::{de::DeserializeOwned, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

// ============================================================================
// Identifiers
// ============================================================================

/// Wrapper around UUID with proper parsing and serialization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LineageId(Uuid);

impl LineageId {
    /// Create a new random UUID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Derive a stable id from a name (useful for fixtures and CLI aliases)
    pub fn from_name(name: &str) -> Self {
        Self(Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes()))
    }

    /// Parse from string
    pub fn parse_str(s: &str) -> Result<Self, String> {
        Uuid::from_str(s)
            .map(Self)
            .map_err(|e| format!("Invalid UUID: {}", e))
    }

    /// Get the inner UUID
    pub fn inner(&self) -> &Uuid {
        &self.0
    }
}

impl Default for LineageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for LineageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for LineageId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_str(s)
    }
}

impl From<Uuid> for LineageId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Serialize for LineageId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for LineageId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::parse_str(&s).map_err(serde::de::Error::custom)
    }
}

/// Identifier of a tree (one family forest)
pub type TreeId = LineageId;

/// Identity of a person node, stable across relocations
pub type NodeId = LineageId;

// ============================================================================
// Gender
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Gender {
    Male,
    Female,
}

impl Gender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Gender::Male => "male",
            Gender::Female => "female",
        }
    }

    pub fn opposite(&self) -> Gender {
        match self {
            Gender::Male => Gender::Female,
            Gender::Female => Gender::Male,
        }
    }
}

impl fmt::Display for Gender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Gender {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "male" | "m" => Ok(Gender::Male),
            "female" | "f" => Ok(Gender::Female),
            other => Err(format!("Unknown gender: {}", other)),
        }
    }
}

// ============================================================================
// Payload
// ============================================================================

/// Caller-owned data attached to a node (name, dates, photo reference, ...).
///
/// The tree never interprets the payload; it only round-trips it through
/// JSON. Any serde type qualifies.
pub trait Payload: Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T> Payload for T where T: Serialize + DeserializeOwned + Send + Sync + 'static {}

// ============================================================================
// Nodes and marriages
// ============================================================================

/// One member of a family tree
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Node<P = serde_json::Value> {
    /// Identity, unchanged by moves
    pub id: NodeId,

    /// Owning tree
    pub tree_id: TreeId,

    /// Materialized path, unique within the tree
    pub location: String,

    pub gender: Gender,

    pub payload: P,

    /// Creation timestamp (Unix seconds)
    pub created_at: i64,

    /// Last time the location changed (Unix seconds)
    pub updated_at: i64,
}

impl<P> Node<P> {
    pub fn is_male(&self) -> bool {
        self.gender == Gender::Male
    }

    pub fn is_female(&self) -> bool {
        self.gender == Gender::Female
    }
}

/// Spousal edge between two nodes of opposite gender.
///
/// Edges key off node identity, so relocating either partner never touches them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Marriage {
    pub husband: NodeId,
    pub wife: NodeId,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,

    /// Creation timestamp (Unix seconds)
    pub created_at: i64,
}

impl Marriage {
    /// The partner of `id` in this marriage, if `id` is part of it
    pub fn partner_of(&self, id: &NodeId) -> Option<NodeId> {
        if &self.husband == id {
            Some(self.wife)
        } else if &self.wife == id {
            Some(self.husband)
        } else {
            None
        }
    }

    pub fn involves(&self, id: &NodeId) -> bool {
        self.partner_of(id).is_some()
    }
}

/// Current Unix timestamp in seconds
pub(crate) fn current_timestamp() -> i64 {
    chrono::Utc::now().timestamp()
}
