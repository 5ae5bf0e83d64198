//! Materialized-path encoding
//!
//! A location is a run of fixed-width segments joined by a one-character
//! separator (`aaa.aab.aac`). Because every segment has the same width, plain
//! string order is sibling birth order, and "starts with" is "descends from".
//! Everything in this module is pure; no storage is touched.

use crate::error::{StructuralViolation, TreeError};
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Characters a segment may be built from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Alphabet {
    /// `a` to `z`
    #[default]
    Chars,
    /// `0` to `9`
    Digits,
}

impl Alphabet {
    pub fn first(&self) -> char {
        match self {
            Alphabet::Chars => 'a',
            Alphabet::Digits => '0',
        }
    }

    pub fn last(&self) -> char {
        match self {
            Alphabet::Chars => 'z',
            Alphabet::Digits => '9',
        }
    }

    pub fn size(&self) -> u32 {
        self.last() as u32 - self.first() as u32 + 1
    }

    pub fn contains(&self, c: char) -> bool {
        (self.first()..=self.last()).contains(&c)
    }

    fn class(&self) -> &'static str {
        match self {
            Alphabet::Chars => "[a-z]",
            Alphabet::Digits => "[0-9]",
        }
    }

    fn successor(&self, c: char) -> Option<char> {
        if c == self.last() || !self.contains(c) {
            return None;
        }
        char::from_u32(c as u32 + 1)
    }

    fn predecessor(&self, c: char) -> Option<char> {
        if c == self.first() || !self.contains(c) {
            return None;
        }
        char::from_u32(c as u32 - 1)
    }

    /// Bracket expression matching every letter of the alphabet except `c`
    fn class_without(&self, c: char) -> String {
        let members: String = (self.first()..=self.last()).filter(|m| *m != c).collect();
        format!("[{}]", members)
    }
}

/// Shape of the locations in one tree.
///
/// Passed explicitly to every codec; trees with different shapes can live
/// side by side in the same process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathConfig {
    pub separator: char,
    pub alphabet: Alphabet,
    pub segment_length: usize,
}

impl Default for PathConfig {
    fn default() -> Self {
        Self {
            separator: '.',
            alphabet: Alphabet::Chars,
            segment_length: 3,
        }
    }
}

impl PathConfig {
    pub fn digits(segment_length: usize) -> Self {
        Self {
            alphabet: Alphabet::Digits,
            segment_length,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), TreeError> {
        if self.segment_length == 0 {
            return Err(TreeError::InvalidConfig(
                "segment_length must be positive".to_string(),
            ));
        }
        if self.alphabet.contains(self.separator) {
            return Err(TreeError::InvalidConfig(format!(
                "separator {:?} is part of the segment alphabet",
                self.separator
            )));
        }
        Ok(())
    }
}

/// Encodes, decodes and pattern-matches locations for one [`PathConfig`]
#[derive(Debug, Clone)]
pub struct PathCodec {
    config: PathConfig,
    grammar: Regex,
}

impl PathCodec {
    pub fn new(config: PathConfig) -> Result<Self, TreeError> {
        config.validate()?;
        let segment = format!("{}{{{}}}", config.alphabet.class(), config.segment_length);
        let grammar = Regex::new(&format!(
            "^{seg}(?:{sep}{seg})*$",
            seg = segment,
            sep = regex::escape(&config.separator.to_string()),
        ))
        .map_err(|e| TreeError::InvalidConfig(e.to_string()))?;

        Ok(Self { config, grammar })
    }

    pub fn config(&self) -> &PathConfig {
        &self.config
    }

    pub fn separator(&self) -> char {
        self.config.separator
    }

    fn escaped_separator(&self) -> String {
        regex::escape(&self.config.separator.to_string())
    }

    // ------------------------------------------------------------------------
    // Validation
    // ------------------------------------------------------------------------

    pub fn is_valid(&self, path: &str) -> bool {
        self.grammar.is_match(path)
    }

    pub fn validate(&self, path: &str) -> Result<(), TreeError> {
        if path.is_empty() {
            return Err(TreeError::invalid_path(path, "empty location"));
        }
        if !self.is_valid(path) {
            return Err(TreeError::invalid_path(
                path,
                format!(
                    "expected segments of {} {:?} characters joined by {:?}",
                    self.config.segment_length, self.config.alphabet, self.config.separator
                ),
            ));
        }
        Ok(())
    }

    pub fn is_segment(&self, segment: &str) -> bool {
        segment.chars().count() == self.config.segment_length
            && segment.chars().all(|c| self.config.alphabet.contains(c))
    }

    // ------------------------------------------------------------------------
    // Ancestry
    // ------------------------------------------------------------------------

    /// Everything before the last separator; `None` for a root or an invalid path
    pub fn father<'a>(&self, path: &'a str) -> Option<&'a str> {
        if !self.is_valid(path) {
            return None;
        }
        path.rsplit_once(self.config.separator).map(|(father, _)| father)
    }

    /// Like [`father`](Self::father) but fails for invalid paths and roots
    pub fn try_father<'a>(&self, path: &'a str) -> Result<&'a str, TreeError> {
        self.validate(path)?;
        self.father(path).ok_or_else(|| {
            StructuralViolation::RootNotAllowed {
                operation: "father",
                location: path.to_string(),
            }
            .into()
        })
    }

    pub fn grandfather<'a>(&self, path: &'a str) -> Option<&'a str> {
        self.ancestor(path, 2)
    }

    /// Strip the last `n` segments; `None` when fewer than `n + 1` exist
    pub fn ancestor<'a>(&self, path: &'a str, n: usize) -> Option<&'a str> {
        let mut current = path;
        for _ in 0..n {
            current = self.father(current)?;
        }
        Some(current)
    }

    /// All ancestors of `path`, nearest first, ending with the root
    pub fn ancestors<'a>(&self, path: &'a str) -> Vec<&'a str> {
        let mut chain = Vec::new();
        let mut current = path;
        while let Some(father) = self.father(current) {
            chain.push(father);
            current = father;
        }
        chain
    }

    /// Number of segments; the root is generation 1
    pub fn generation(&self, path: &str) -> Result<usize, TreeError> {
        self.validate(path)?;
        Ok(self.depth(path))
    }

    /// Segment count of a location already known to be valid
    pub fn depth(&self, path: &str) -> usize {
        path.matches(self.config.separator).count() + 1
    }

    /// Character length of every location of generation `n`
    pub fn location_length(&self, generation: usize) -> usize {
        match generation {
            0 => 0,
            n => n * self.config.segment_length + (n - 1),
        }
    }

    pub fn last_segment<'a>(&self, path: &'a str) -> &'a str {
        path.rsplit_once(self.config.separator)
            .map(|(_, segment)| segment)
            .unwrap_or(path)
    }

    // ------------------------------------------------------------------------
    // Segment arithmetic
    // ------------------------------------------------------------------------

    pub fn first_possible_segment(&self) -> String {
        std::iter::repeat(self.config.alphabet.first())
            .take(self.config.segment_length)
            .collect()
    }

    pub fn last_possible_segment(&self) -> String {
        std::iter::repeat(self.config.alphabet.last())
            .take(self.config.segment_length)
            .collect()
    }

    /// Number of sibling slots under one father
    pub fn capacity(&self) -> u128 {
        (self.config.alphabet.size() as u128).saturating_pow(self.config.segment_length as u32)
    }

    /// Base-N increment over the alphabet (`aaz` -> `aba`).
    ///
    /// `None` when `segment` is already the last possible one, or is not a segment.
    pub fn increment_segment(&self, segment: &str) -> Option<String> {
        if !self.is_segment(segment) {
            return None;
        }
        let alphabet = self.config.alphabet;
        let mut chars: Vec<char> = segment.chars().collect();
        for c in chars.iter_mut().rev() {
            match alphabet.successor(*c) {
                Some(next) => {
                    *c = next;
                    return Some(chars.into_iter().collect());
                }
                None => *c = alphabet.first(),
            }
        }
        None
    }

    /// Inverse of [`increment_segment`](Self::increment_segment); `None` below the first segment
    pub fn decrement_segment(&self, segment: &str) -> Option<String> {
        if !self.is_segment(segment) {
            return None;
        }
        let alphabet = self.config.alphabet;
        let mut chars: Vec<char> = segment.chars().collect();
        for c in chars.iter_mut().rev() {
            match alphabet.predecessor(*c) {
                Some(prev) => {
                    *c = prev;
                    return Some(chars.into_iter().collect());
                }
                None => *c = alphabet.last(),
            }
        }
        None
    }

    // ------------------------------------------------------------------------
    // Location construction
    // ------------------------------------------------------------------------

    pub fn child(&self, path: &str, segment: &str) -> String {
        format!("{}{}{}", path, self.config.separator, segment)
    }

    pub fn first_child(&self, path: &str) -> String {
        self.child(path, &self.first_possible_segment())
    }

    pub fn last_child(&self, path: &str) -> String {
        self.child(path, &self.last_possible_segment())
    }

    fn with_last_segment(&self, path: &str, segment: &str) -> String {
        match self.father(path) {
            Some(father) => self.child(father, segment),
            None => segment.to_string(),
        }
    }

    /// Slot right after `path` under the same father; `None` at capacity
    pub fn next_sibling_location(&self, path: &str) -> Option<String> {
        let next = self.increment_segment(self.last_segment(path))?;
        Some(self.with_last_segment(path, &next))
    }

    pub fn previous_sibling_location(&self, path: &str) -> Option<String> {
        let prev = self.decrement_segment(self.last_segment(path))?;
        Some(self.with_last_segment(path, &prev))
    }

    // ------------------------------------------------------------------------
    // Patterns (anchored regular expressions over the location column)
    // ------------------------------------------------------------------------

    /// One segment, unanchored
    pub fn segment_pattern(&self) -> String {
        format!(
            "{}{{{}}}",
            self.config.alphabet.class(),
            self.config.segment_length
        )
    }

    pub fn root_pattern(&self) -> String {
        format!("^{}$", self.segment_pattern())
    }

    /// Exactly one generation below `path`
    pub fn children_pattern(&self, path: &str) -> String {
        format!(
            "^{}{}{}$",
            regex::escape(path),
            self.escaped_separator(),
            self.segment_pattern()
        )
    }

    /// Any depth below `path`, excluding `path` itself
    pub fn descendants_pattern(&self, path: &str) -> String {
        format!(
            "^{}(?:{}{})+$",
            regex::escape(path),
            self.escaped_separator(),
            self.segment_pattern()
        )
    }

    /// Locations sharing the father of `path`; `None` for a root, which has no siblings.
    ///
    /// Excluding `path` is expressed inside the pattern itself as an
    /// alternation of "differs at position i", so stores without look-around
    /// can evaluate it.
    pub fn siblings_pattern(&self, path: &str, include_self: bool) -> Option<String> {
        let father = self.father(path)?;
        let prefix = format!("^{}{}", regex::escape(father), self.escaped_separator());
        if include_self {
            return Some(format!("{}{}$", prefix, self.segment_pattern()));
        }

        let alphabet = self.config.alphabet;
        let own: Vec<char> = self.last_segment(path).chars().collect();
        let branches: Vec<String> = own
            .iter()
            .enumerate()
            .map(|(i, c)| {
                let head: String = own[..i].iter().collect();
                let rest = self.config.segment_length - i - 1;
                let tail = if rest > 0 {
                    format!("{}{{{}}}", alphabet.class(), rest)
                } else {
                    String::new()
                };
                format!(
                    "{}{}{}",
                    regex::escape(&head),
                    alphabet.class_without(*c),
                    tail
                )
            })
            .collect();
        Some(format!("{}(?:{})$", prefix, branches.join("|")))
    }

    /// Every location of generation `n`; `None` for `n == 0`
    pub fn single_generation_pattern(&self, n: usize) -> Option<String> {
        if n == 0 {
            return None;
        }
        let segment = self.segment_pattern();
        Some(format!(
            "^{seg}(?:{sep}{seg}){{{deeper}}}$",
            seg = segment,
            sep = self.escaped_separator(),
            deeper = n - 1,
        ))
    }

    /// `path` itself plus its descendants at most `count` generations below it
    pub fn multi_generation_pattern(&self, path: &str, count: usize) -> String {
        format!(
            "^{}(?:{}{}){{0,{}}}$",
            regex::escape(path),
            self.escaped_separator(),
            self.segment_pattern(),
            count
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn chars() -> PathCodec {
        PathCodec::new(PathConfig::default()).unwrap()
    }

    fn digits() -> PathCodec {
        PathCodec::new(PathConfig::digits(3)).unwrap()
    }

    fn matches(pattern: &str, path: &str) -> bool {
        Regex::new(pattern).unwrap().is_match(path)
    }

    #[test]
    fn rejects_bad_config() {
        assert!(PathCodec::new(PathConfig {
            segment_length: 0,
            ..PathConfig::default()
        })
        .is_err());
        assert!(PathCodec::new(PathConfig {
            separator: 'q',
            ..PathConfig::default()
        })
        .is_err());
    }

    #[test]
    fn validates_grammar() {
        let codec = chars();
        for ok in ["aaa", "aaa.aab", "zzz.abc.qwe"] {
            assert!(codec.validate(ok).is_ok(), "{ok} should be valid");
        }
        for bad in ["", "aa", "aaaa", "aaa.", ".aaa", "aaa..aab", "aAa", "a1a", "aaa/aab"] {
            assert!(
                matches!(codec.validate(bad), Err(TreeError::InvalidPath { .. })),
                "{bad} should be invalid"
            );
        }
        assert!(digits().validate("000.123").is_ok());
        assert!(digits().validate("000.abc").is_err());
    }

    #[test]
    fn ancestry_accessors() {
        let codec = chars();
        assert_eq!(codec.father("aaa.aab.aac"), Some("aaa.aab"));
        assert_eq!(codec.father("aaa"), None);
        assert_eq!(codec.father("aaa."), None);
        assert_eq!(codec.father(".aaa.aab"), None);
        assert_eq!(codec.ancestor("aaa.aab.", 1), None);
        assert_eq!(codec.grandfather("aaa.aab.aac"), Some("aaa"));
        assert_eq!(codec.grandfather("aaa.aab"), None);
        assert_eq!(codec.ancestor("aaa.aab.aac", 0), Some("aaa.aab.aac"));
        assert_eq!(codec.ancestor("aaa.aab.aac", 3), None);
        assert_eq!(codec.ancestors("aaa.aab.aac"), vec!["aaa.aab", "aaa"]);
        assert!(codec.ancestors("aaa").is_empty());

        assert!(matches!(
            codec.try_father("aaa"),
            Err(TreeError::Structural(StructuralViolation::RootNotAllowed { .. }))
        ));
        assert!(matches!(
            codec.try_father("nope"),
            Err(TreeError::InvalidPath { .. })
        ));
    }

    #[test]
    fn generation_counts_segments() {
        let codec = chars();
        assert_eq!(codec.generation("aaa").unwrap(), 1);
        assert_eq!(codec.generation("aaa.bbb.ccc").unwrap(), 3);
        assert!(codec.generation("").is_err());
    }

    #[test]
    fn increments_like_a_counter() {
        let codec = chars();
        assert_eq!(codec.increment_segment("abc").as_deref(), Some("abd"));
        assert_eq!(codec.increment_segment("aaz").as_deref(), Some("aba"));
        assert_eq!(codec.increment_segment("azz").as_deref(), Some("baa"));
        assert_eq!(codec.increment_segment("zzz"), None);
        assert_eq!(codec.increment_segment("zz"), None);

        assert_eq!(digits().increment_segment("045").as_deref(), Some("046"));
        assert_eq!(digits().increment_segment("099").as_deref(), Some("100"));
        assert_eq!(digits().increment_segment("999"), None);

        assert_eq!(codec.decrement_segment("aba").as_deref(), Some("aaz"));
        assert_eq!(codec.decrement_segment("aaa"), None);
    }

    #[test]
    fn exhausts_exactly_at_capacity() {
        for codec in [chars(), digits()] {
            let mut segment = codec.first_possible_segment();
            let mut steps: u128 = 0;
            while let Some(next) = codec.increment_segment(&segment) {
                segment = next;
                steps += 1;
            }
            assert_eq!(segment, codec.last_possible_segment());
            assert_eq!(steps, codec.capacity() - 1);
        }
    }

    #[test]
    fn sibling_and_child_locations() {
        let codec = chars();
        assert_eq!(codec.first_child("aaa"), "aaa.aaa");
        assert_eq!(codec.last_child("aaa"), "aaa.zzz");
        assert_eq!(
            codec.next_sibling_location("aaa.aab").as_deref(),
            Some("aaa.aac")
        );
        assert_eq!(codec.next_sibling_location("aaa.zzz"), None);
        assert_eq!(
            codec.previous_sibling_location("aaa.aab").as_deref(),
            Some("aaa.aaa")
        );
        assert_eq!(codec.next_sibling_location("aaa").as_deref(), Some("aab"));
    }

    #[test]
    fn custom_separator_is_escaped() {
        let codec = PathCodec::new(PathConfig {
            separator: '|',
            ..PathConfig::default()
        })
        .unwrap();
        assert!(codec.is_valid("aaa|bbb"));
        let children = codec.children_pattern("aaa");
        assert!(matches(&children, "aaa|abc"));
        assert!(!matches(&children, "aaa"));
    }

    #[test]
    fn structural_patterns() {
        let codec = chars();

        let root = codec.root_pattern();
        assert!(matches(&root, "abc"));
        assert!(!matches(&root, "abc.abc"));

        let children = codec.children_pattern("aaa.aab");
        assert!(matches(&children, "aaa.aab.qqq"));
        assert!(!matches(&children, "aaa.aab"));
        assert!(!matches(&children, "aaa.aab.qqq.aaa"));
        assert!(!matches(&children, "aaa.aac.qqq"));

        let descendants = codec.descendants_pattern("aaa");
        assert!(matches(&descendants, "aaa.aab.qqq"));
        assert!(!matches(&descendants, "aaa"));

        let second = codec.single_generation_pattern(2).unwrap();
        assert!(matches(&second, "aaa.bbb"));
        assert!(!matches(&second, "aaa"));
        assert!(!matches(&second, "aaa.bbb.ccc"));
        assert!(codec.single_generation_pattern(0).is_none());

        let window = codec.multi_generation_pattern("aaa.aab", 1);
        assert!(matches(&window, "aaa.aab"));
        assert!(matches(&window, "aaa.aab.aaa"));
        assert!(!matches(&window, "aaa.aab.aaa.aaa"));
        assert!(!matches(&window, "aaa.aac"));
    }

    #[test]
    fn siblings_pattern_can_exclude_self() {
        let codec = chars();
        assert!(codec.siblings_pattern("aaa", true).is_none());

        let all = codec.siblings_pattern("aaa.abc", true).unwrap();
        let others = codec.siblings_pattern("aaa.abc", false).unwrap();
        for sibling in ["aaa.aaa", "aaa.abd", "aaa.zbc", "aaa.acc"] {
            assert!(matches(&all, sibling));
            assert!(matches(&others, sibling), "{sibling} should be a sibling");
        }
        assert!(matches(&all, "aaa.abc"));
        assert!(!matches(&others, "aaa.abc"));
        assert!(!matches(&others, "aab.abd"));
        assert!(!matches(&others, "aaa.abd.aaa"));
    }

    fn segment() -> impl Strategy<Value = String> {
        "[a-z]{3}"
    }

    fn location() -> impl Strategy<Value = String> {
        prop::collection::vec(segment(), 1..6).prop_map(|segments| segments.join("."))
    }

    proptest! {
        #[test]
        fn generated_locations_validate(path in location()) {
            let codec = chars();
            prop_assert!(codec.validate(&path).is_ok());
            prop_assert_eq!(
                codec.generation(&path).unwrap(),
                path.matches('.').count() + 1
            );
        }

        #[test]
        fn strings_outside_the_grammar_fail(path in "[a-z.]{0,12}") {
            let codec = chars();
            let well_formed = !path.is_empty()
                && path.split('.').all(|segment| segment.len() == 3);
            prop_assert_eq!(codec.validate(&path).is_ok(), well_formed);
        }

        #[test]
        fn increment_then_decrement_is_identity(seg in segment()) {
            let codec = chars();
            if let Some(next) = codec.increment_segment(&seg) {
                prop_assert!(next > seg);
                prop_assert_eq!(codec.decrement_segment(&next), Some(seg));
            }
        }

        #[test]
        fn siblings_pattern_matches_exactly_other_siblings(
            path in location(),
            other in segment(),
        ) {
            let codec = chars();
            if let Some(father) = codec.father(&path) {
                let candidate = codec.child(father, &other);
                let pattern = codec.siblings_pattern(&path, false).unwrap();
                prop_assert_eq!(matches(&pattern, &candidate), candidate != path);
            }
        }
    }
}
