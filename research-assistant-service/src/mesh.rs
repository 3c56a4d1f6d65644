//! Expansion of MeSH vocabulary terms into AND-joined search queries.

use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::fmt;

use crate::error::{AssistantError, Result};

pub const DEFAULT_MAX_TERMS: usize = 3;
pub const DEFAULT_MAX_COMBINATIONS: usize = 5;

/// A MeSH heading or free-text keyword
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Term(String);

impl Term {
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Term {
    fn from(text: &str) -> Self {
        Self::new(text)
    }
}

impl From<String> for Term {
    fn from(text: String) -> Self {
        Self(text)
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Distinct terms joined by AND, kept in input order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Combination {
    terms: Vec<Term>,
    score: u64,
}

impl Combination {
    pub fn terms(&self) -> &[Term] {
        &self.terms
    }

    pub fn len(&self) -> usize {
        self.terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    /// Product of the 1-based input positions of the terms; lower means earlier terms
    pub fn score(&self) -> u64 {
        self.score
    }

    pub fn query(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Combination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, term) in self.terms.iter().enumerate() {
            if i > 0 {
                f.write_str(" AND ")?;
            }
            f.write_str(term.as_str())?;
        }
        Ok(())
    }
}

/// Breadth-first generator of bounded term combinations
#[derive(Debug, Clone, Copy)]
pub struct MeshCombinationEngine {
    max_terms: usize,
}

impl Default for MeshCombinationEngine {
    fn default() -> Self {
        Self {
            max_terms: DEFAULT_MAX_TERMS,
        }
    }
}

impl MeshCombinationEngine {
    pub fn new(max_terms: usize) -> Result<Self> {
        if max_terms == 0 {
            return Err(AssistantError::InvalidArgument(
                "a combination needs room for at least one term".to_string(),
            ));
        }
        Ok(Self { max_terms })
    }

    pub fn max_terms(&self) -> usize {
        self.max_terms
    }

    /// Enumerate combinations: every single term in input order, then pairs ordered by
    /// (first index, second index), then triples, up to `max_combinations` results.
    ///
    /// Duplicate and blank input terms are skipped. The output only depends on the input.
    pub fn generate(&self, terms: &[Term], max_combinations: usize) -> Result<Vec<Combination>> {
        if max_combinations == 0 {
            return Err(AssistantError::InvalidArgument(
                "max_combinations must be at least 1".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        let terms: Vec<&Term> = terms
            .iter()
            .filter(|term| !term.as_str().trim().is_empty())
            .filter(|term| seen.insert(term.as_str()))
            .collect();

        // Each entry holds indices into `terms`, strictly increasing.
        let mut queue: VecDeque<Vec<usize>> = (0..terms.len()).map(|i| vec![i]).collect();
        let mut combinations = Vec::new();

        while combinations.len() < max_combinations {
            let Some(indices) = queue.pop_front() else {
                break;
            };

            if indices.len() < self.max_terms {
                let last = indices[indices.len() - 1];
                for next in last + 1..terms.len() {
                    let mut extended = indices.clone();
                    extended.push(next);
                    queue.push_back(extended);
                }
            }

            combinations.push(Combination {
                score: indices.iter().map(|&i| i as u64 + 1).product(),
                terms: indices.iter().map(|&i| terms[i].clone()).collect(),
            });
        }

        Ok(combinations)
    }
}

/// [`MeshCombinationEngine::generate`] with the default three-term limit
pub fn generate_combinations(terms: &[Term], max_combinations: usize) -> Result<Vec<Combination>> {
    MeshCombinationEngine::default().generate(terms, max_combinations)
}

/// Query strings to run for `raw_query`: the combinations when any exist, the raw query otherwise
pub fn queries_or_fallback(combinations: &[Combination], raw_query: &str) -> Vec<String> {
    if combinations.is_empty() {
        vec![raw_query.to_string()]
    } else {
        combinations.iter().map(Combination::query).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn terms(names: &[&str]) -> Vec<Term> {
        names.iter().map(|name| Term::from(*name)).collect()
    }

    fn queries(combinations: &[Combination]) -> Vec<String> {
        combinations.iter().map(Combination::query).collect()
    }

    #[test]
    fn singles_then_pairs_in_index_order() {
        let result = generate_combinations(&terms(&["A", "B", "C"]), 5).unwrap();
        assert_eq!(queries(&result), ["A", "B", "C", "A AND B", "A AND C"]);
    }

    #[test]
    fn full_enumeration_ends_with_the_triple() {
        let result = generate_combinations(&terms(&["A", "B", "C"]), 100).unwrap();
        assert_eq!(
            queries(&result),
            ["A", "B", "C", "A AND B", "A AND C", "B AND C", "A AND B AND C"]
        );
    }

    #[test]
    fn empty_input_gives_empty_output() {
        assert!(generate_combinations(&[], 5).unwrap().is_empty());
    }

    #[test]
    fn zero_combinations_is_rejected() {
        let err = generate_combinations(&terms(&["A"]), 0).unwrap_err();
        assert!(matches!(err, AssistantError::InvalidArgument(_)));
        assert!(MeshCombinationEngine::new(0).is_err());
    }

    #[test]
    fn combinations_are_bounded_and_distinct() {
        let input = terms(&["Sepsis", "Lactate", "Mortality", "Child", "Fluid Therapy"]);
        for max in 1..40 {
            let result = generate_combinations(&input, max).unwrap();
            assert!(result.len() <= max);

            let mut seen = HashSet::new();
            for combination in &result {
                assert!((1..=3).contains(&combination.len()));
                let unique: HashSet<_> = combination.terms().iter().collect();
                assert_eq!(unique.len(), combination.len());
                assert!(seen.insert(combination.query()));
            }
        }
    }

    #[test]
    fn output_is_deterministic() {
        let input = terms(&["Asthma", "Child", "Asthma", " ", "Inhaled Corticosteroids"]);
        let first = generate_combinations(&input, 6).unwrap();
        let second = generate_combinations(&input, 6).unwrap();
        assert_eq!(first, second);
        assert_eq!(
            queries(&first),
            [
                "Asthma",
                "Child",
                "Inhaled Corticosteroids",
                "Asthma AND Child",
                "Asthma AND Inhaled Corticosteroids",
                "Child AND Inhaled Corticosteroids",
            ]
        );
    }

    #[test]
    fn max_terms_limits_combination_length() {
        let engine = MeshCombinationEngine::new(2).unwrap();
        let result = engine.generate(&terms(&["A", "B", "C"]), 50).unwrap();
        assert_eq!(result.len(), 6);
        assert!(result.iter().all(|c| c.len() <= 2));
        assert_eq!(result[4].score(), 3);
    }

    #[test]
    fn fallback_uses_raw_query() {
        assert_eq!(queries_or_fallback(&[], "heart attack"), ["heart attack"]);
        let result = generate_combinations(&terms(&["Myocardial Infarction"]), 5).unwrap();
        assert_eq!(queries_or_fallback(&result, "heart attack"), ["Myocardial Infarction"]);
    }
}
