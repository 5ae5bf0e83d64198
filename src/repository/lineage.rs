//! Location-sorted rows handed to presentation code

use crate::types::Node;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// How many generations below the starting node to include
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DrawDepth {
    #[default]
    All,
    /// The starting node plus this many generations below it
    Generations(usize),
}

/// Spelled-out depths accepted alongside numerals
const DEPTH_WORDS: [(&str, usize); 11] = [
    ("zero", 0),
    ("one", 1),
    ("two", 2),
    ("three", 3),
    ("four", 4),
    ("five", 5),
    ("six", 6),
    ("seven", 7),
    ("eight", 8),
    ("nine", 9),
    ("ten", 10),
];

impl FromStr for DrawDepth {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase();
        if s == "all" {
            return Ok(DrawDepth::All);
        }
        if let Ok(n) = s.parse::<usize>() {
            return Ok(DrawDepth::Generations(n));
        }
        DEPTH_WORDS
            .iter()
            .find(|(word, _)| *word == s)
            .map(|(_, n)| DrawDepth::Generations(*n))
            .ok_or_else(|| format!("Unknown depth: {}", s))
    }
}

impl fmt::Display for DrawDepth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DrawDepth::All => f.write_str("all"),
            DrawDepth::Generations(n) => write!(f, "{}", n),
        }
    }
}

/// One node with its spouses resolved, in the order a renderer walks them
#[derive(Debug, Clone, Serialize)]
pub struct LineageRow<P> {
    pub node: Node<P>,
    pub spouses: Vec<Node<P>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_depths() {
        assert_eq!("all".parse::<DrawDepth>().unwrap(), DrawDepth::All);
        assert_eq!("3".parse::<DrawDepth>().unwrap(), DrawDepth::Generations(3));
        assert_eq!(
            " Three ".parse::<DrawDepth>().unwrap(),
            DrawDepth::Generations(3)
        );
        assert!("many".parse::<DrawDepth>().is_err());
        assert_eq!(DrawDepth::Generations(2).to_string(), "2");
    }
}
