//! Body similarity strategies for soft-404 detection

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// Scores how alike two response bodies are, from 0.0 (nothing shared) to 1.0
pub trait SimilarityStrategy: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    fn similarity(&self, a: &str, b: &str) -> f64;
}

/// Jaccard index over the sets of alphanumeric tokens
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenJaccard;

impl TokenJaccard {
    fn tokens(text: &str) -> HashSet<&str> {
        text.split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .collect()
    }
}

impl SimilarityStrategy for TokenJaccard {
    fn name(&self) -> &'static str {
        "token_jaccard"
    }

    fn similarity(&self, a: &str, b: &str) -> f64 {
        let left = Self::tokens(a);
        let right = Self::tokens(b);

        if left.is_empty() && right.is_empty() {
            return 1.0;
        }

        let shared = left.intersection(&right).count();
        let total = left.union(&right).count();
        shared as f64 / total as f64
    }
}

/// Levenshtein distance over the first `max_chars` characters, normalized by
/// the longer input
#[derive(Debug, Clone, Copy)]
pub struct NormalizedEditDistance {
    pub max_chars: usize,
}

impl Default for NormalizedEditDistance {
    fn default() -> Self {
        Self { max_chars: 2000 }
    }
}

impl SimilarityStrategy for NormalizedEditDistance {
    fn name(&self) -> &'static str {
        "edit_distance"
    }

    fn similarity(&self, a: &str, b: &str) -> f64 {
        let a: Vec<char> = a.chars().take(self.max_chars).collect();
        let b: Vec<char> = b.chars().take(self.max_chars).collect();

        let longest = a.len().max(b.len());
        if longest == 0 {
            return 1.0;
        }

        1.0 - levenshtein(&a, &b) as f64 / longest as f64
    }
}

fn levenshtein(a: &[char], b: &[char]) -> usize {
    let mut previous: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitution = previous[j] + usize::from(ca != cb);
            current[j + 1] = substitution.min(previous[j + 1] + 1).min(current[j] + 1);
        }
        std::mem::swap(&mut previous, &mut current);
    }

    previous[b.len()]
}

/// Configurable strategy selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimilarityKind {
    #[default]
    TokenJaccard,
    EditDistance,
}

impl SimilarityKind {
    pub fn build(self) -> Arc<dyn SimilarityStrategy> {
        match self {
            SimilarityKind::TokenJaccard => Arc::new(TokenJaccard),
            SimilarityKind::EditDistance => Arc::new(NormalizedEditDistance::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jaccard() {
        let s = TokenJaccard;
        assert_eq!(s.similarity("", ""), 1.0);
        assert_eq!(s.similarity("not found", "not found"), 1.0);
        assert_eq!(s.similarity("a b", "c d"), 0.0);
        assert!((s.similarity("page not found", "page was found") - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_edit_distance() {
        let s = NormalizedEditDistance::default();
        assert_eq!(s.similarity("", ""), 1.0);
        assert_eq!(s.similarity("kitten", "kitten"), 1.0);
        assert!((s.similarity("kitten", "sitting") - (1.0 - 3.0 / 7.0)).abs() < 1e-9);
        assert_eq!(s.similarity("abc", ""), 0.0);
    }

    #[test]
    fn test_edit_distance_truncates() {
        let s = NormalizedEditDistance { max_chars: 4 };
        assert_eq!(s.similarity("abcdXXXX", "abcdYYYY"), 1.0);
    }

    #[test]
    fn test_kind_builds_strategy() {
        assert_eq!(SimilarityKind::TokenJaccard.build().name(), "token_jaccard");
        assert_eq!(SimilarityKind::EditDistance.build().name(), "edit_distance");
        let kind: SimilarityKind = serde_json::from_str("\"edit_distance\"").unwrap();
        assert_eq!(kind, SimilarityKind::EditDistance);
    }
}
