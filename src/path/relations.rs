//! Relationship predicates between two locations.
//!
//! All of these are string tests; none of them needs the store.

use super::codec::PathCodec;

impl PathCodec {
    /// Structural root: a valid location with a single segment.
    ///
    /// Whether a row exists at the father location is a different question,
    /// answered by `NodeRepository::has_no_father_row`.
    pub fn is_root(&self, path: &str) -> bool {
        self.is_valid(path) && !path.contains(self.separator())
    }

    pub fn are_father_and_child(&self, father: &str, child: &str) -> bool {
        self.is_valid(father) && self.is_valid(child) && self.father(child) == Some(father)
    }

    /// Distinct non-root locations under the same father
    pub fn are_siblings(&self, a: &str, b: &str) -> bool {
        if a == b || !self.is_valid(a) || !self.is_valid(b) {
            return false;
        }
        match (self.father(a), self.father(b)) {
            (Some(fa), Some(fb)) => fa == fb,
            _ => false,
        }
    }

    /// Strict ancestry: `descendant` lies somewhere below `ancestor`
    pub fn is_ancestor_of(&self, ancestor: &str, descendant: &str) -> bool {
        descendant.len() > ancestor.len()
            && descendant.starts_with(ancestor)
            && descendant[ancestor.len()..].starts_with(self.separator())
    }

    pub fn is_descendant_of(&self, descendant: &str, ancestor: &str) -> bool {
        self.is_ancestor_of(ancestor, descendant)
    }

    /// `path` itself or anything below it
    pub fn is_in_subtree(&self, path: &str, subtree_root: &str) -> bool {
        path == subtree_root || self.is_ancestor_of(subtree_root, path)
    }
}
