//! Relationship questions turned into store queries.
//!
//! Shared by the read-only repository and by the engine, which runs the same
//! queries inside its transactions.

use crate::path::PathCodec;
use crate::store::{LocationPredicate, NodeFilter, NodeOrder, NodeQuery};
use crate::types::{Gender, NodeId, TreeId};

/// Query builder bound to one tree
#[derive(Debug, Clone, Copy)]
pub struct TreeQueries<'a> {
    codec: &'a PathCodec,
    tree_id: TreeId,
}

impl<'a> TreeQueries<'a> {
    pub fn new(codec: &'a PathCodec, tree_id: TreeId) -> Self {
        Self { codec, tree_id }
    }

    fn filter(&self) -> NodeFilter {
        NodeFilter::tree(self.tree_id)
    }

    pub fn all(&self) -> NodeQuery {
        NodeQuery::new(self.filter())
    }

    pub fn at(&self, location: &str) -> NodeQuery {
        NodeQuery::new(self.filter().at(location)).limit(1)
    }

    pub fn by_id(&self, id: NodeId) -> NodeQuery {
        NodeQuery::new(self.filter().id(id)).limit(1)
    }

    /// Every location under `father`, one generation below it
    fn below(&self, father: &str) -> NodeFilter {
        let prefix = format!("{}{}", father, self.codec.separator());
        let depth = self.codec.depth(father) + 1;
        self.filter()
            .subtree(prefix)
            .location(LocationPredicate::Length(self.codec.location_length(depth)))
    }

    pub fn root(&self) -> NodeQuery {
        let filter = self
            .filter()
            .location(LocationPredicate::Length(self.codec.location_length(1)))
            .matching(self.codec.root_pattern());
        NodeQuery::new(filter).limit(1)
    }

    pub fn children(&self, location: &str, gender: Option<Gender>) -> NodeQuery {
        NodeQuery::new(
            self.below(location)
                .matching(self.codec.children_pattern(location))
                .gender(gender),
        )
    }

    pub fn last_child(&self, location: &str) -> NodeQuery {
        self.children(location, None)
            .order(NodeOrder::LocationDesc)
            .limit(1)
    }

    /// Everything strictly below `location`
    pub fn descendants(&self, location: &str) -> NodeQuery {
        let prefix = format!("{}{}", location, self.codec.separator());
        NodeQuery::new(self.filter().subtree(prefix))
    }

    /// `location` and everything below it
    pub fn subtree(&self, location: &str) -> NodeQuery {
        NodeQuery::new(self.filter().subtree(location))
    }

    /// `None` for a root, which has no siblings
    pub fn siblings(&self, location: &str, include_self: bool) -> Option<NodeQuery> {
        let pattern = self.codec.siblings_pattern(location, include_self)?;
        let father = self.codec.father(location)?;
        Some(NodeQuery::new(self.below(father).matching(pattern)))
    }

    pub fn last_sibling(&self, location: &str) -> Option<NodeQuery> {
        Some(
            self.siblings(location, true)?
                .order(NodeOrder::LocationDesc)
                .limit(1),
        )
    }

    /// Younger siblings of `location`, oldest first
    pub fn younger_siblings(&self, location: &str) -> Option<NodeQuery> {
        let mut query = self.siblings(location, false)?;
        query.filter = query
            .filter
            .location(LocationPredicate::Greater(location.to_string()));
        Some(query)
    }

    /// Every ancestor in one batched fetch, nearest first
    pub fn ancestors(&self, location: &str) -> NodeQuery {
        let chain = self
            .codec
            .ancestors(location)
            .into_iter()
            .map(str::to_string)
            .collect();
        NodeQuery::new(self.filter().location(LocationPredicate::In(chain)))
            .order(NodeOrder::LocationDesc)
    }

    /// `None` for generation 0, which does not exist
    pub fn generation(&self, n: usize) -> Option<NodeQuery> {
        let pattern = self.codec.single_generation_pattern(n)?;
        let filter = self
            .filter()
            .location(LocationPredicate::Length(self.codec.location_length(n)))
            .matching(pattern);
        Some(NodeQuery::new(filter))
    }

    /// `location` plus at most `depth` generations below it
    pub fn window(&self, location: &str, depth: usize) -> NodeQuery {
        let deepest = self.codec.depth(location) + depth;
        NodeQuery::new(
            self.filter()
                .subtree(location)
                .location(LocationPredicate::LengthAtMost(self.codec.location_length(deepest)))
                .matching(self.codec.multi_generation_pattern(location, depth)),
        )
    }

    pub fn longest(&self, prefix: Option<&str>) -> NodeQuery {
        let filter = match prefix {
            Some(prefix) => self.filter().subtree(prefix),
            None => self.filter(),
        };
        NodeQuery::new(filter).order(NodeOrder::LongestFirst).limit(1)
    }

    pub fn count_filter(&self, prefix: Option<&str>) -> NodeFilter {
        match prefix {
            Some(prefix) => self.filter().subtree(prefix),
            None => self.filter(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::PathConfig;

    fn codec() -> PathCodec {
        PathCodec::new(PathConfig::default()).unwrap()
    }

    #[test]
    fn children_filter_carries_gender_and_pattern() {
        let codec = codec();
        let tree_id = TreeId::from_name("smiths");
        let query = TreeQueries::new(&codec, tree_id).children("aaa", Some(Gender::Female));

        assert_eq!(query.filter.tree_id, Some(tree_id));
        assert_eq!(query.filter.gender, Some(Gender::Female));
        assert_eq!(
            query.filter.location,
            vec![
                LocationPredicate::StartsWith("aaa.".to_string()),
                LocationPredicate::Length(7),
                LocationPredicate::Matches(codec.children_pattern("aaa")),
            ]
        );
        assert_eq!(query.order, NodeOrder::LocationAsc);
    }

    #[test]
    fn ancestors_are_one_batched_lookup() {
        let codec = codec();
        let query = TreeQueries::new(&codec, TreeId::new()).ancestors("aaa.aab.aac");
        assert_eq!(
            query.filter.location,
            vec![LocationPredicate::In(vec![
                "aaa.aab".to_string(),
                "aaa".to_string()
            ])]
        );
        assert_eq!(query.order, NodeOrder::LocationDesc);
    }

    #[test]
    fn descendants_use_separator_prefix() {
        let codec = codec();
        let query = TreeQueries::new(&codec, TreeId::new()).descendants("aaa.aab");
        assert_eq!(
            query.filter.location,
            vec![LocationPredicate::StartsWith("aaa.aab.".to_string())]
        );
    }

    #[test]
    fn roots_have_no_sibling_query() {
        let codec = codec();
        let queries = TreeQueries::new(&codec, TreeId::new());
        assert!(queries.siblings("aaa", true).is_none());
        assert!(queries.younger_siblings("aaa").is_none());
        assert!(queries.generation(0).is_none());
    }

    /// Every pattern query also carries a constraint SQL can use without the regex
    #[test]
    fn pattern_queries_are_narrowed() {
        let codec = codec();
        let queries = TreeQueries::new(&codec, TreeId::new());
        let narrowed = |query: NodeQuery| {
            query.filter.location.iter().any(|p| {
                matches!(
                    p,
                    LocationPredicate::Length(_) | LocationPredicate::LengthAtMost(_)
                )
            })
        };

        assert!(narrowed(queries.root()));
        assert!(narrowed(queries.children("aaa.aab", None)));
        assert!(narrowed(queries.last_child("aaa.aab")));
        assert!(narrowed(queries.siblings("aaa.aab", false).unwrap()));
        assert!(narrowed(queries.last_sibling("aaa.aab").unwrap()));
        assert!(narrowed(queries.younger_siblings("aaa.aab").unwrap()));
        assert!(narrowed(queries.generation(3).unwrap()));
        assert!(narrowed(queries.window("aaa", 2)));

        let siblings = queries.siblings("aaa.aab", true).unwrap();
        assert!(siblings
            .filter
            .location
            .contains(&LocationPredicate::StartsWith("aaa.".to_string())));
        assert!(siblings.filter.location.contains(&LocationPredicate::Length(7)));
    }
}
