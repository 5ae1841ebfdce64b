//! Query complexity estimation and adaptive retrieval parameters.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

const QUESTION_WORDS: &[&str] = &["what", "when", "where", "who", "why", "how", "which", "whose"];
const RELATIONAL_WORDS: &[&str] = &["relationship", "between", "with", "and", "or", "related"];

static CAPITALIZED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b[A-Z][a-z]+\b").expect("valid entity pattern"));
static TEMPORAL_REFS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(when|date|time|ago|last|first|before|after)\b").expect("valid temporal pattern")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryType {
    Temporal,
    Relational,
    Complex,
    Simple,
}

impl QueryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Temporal => "temporal",
            Self::Relational => "relational",
            Self::Complex => "complex",
            Self::Simple => "simple",
        }
    }
}

impl std::fmt::Display for QueryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Derived per query, never stored.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComplexityProfile {
    /// Bounded score in `[0.0, 1.0]`.
    pub complexity: f64,
    pub query_type: QueryType,
    pub suggested_top_k: usize,
    pub suggested_expansions: usize,
    pub question_count: usize,
    pub entities: usize,
    pub temporal_refs: usize,
    pub relational_count: usize,
}

/// Score a query's structure and pick a retrieval tier.
///
/// Question words and relational words count once each if present as
/// substrings; entities are capitalized tokens; temporal references are
/// word-bounded hits. Tiers split at 0.3 and 0.6.
pub fn estimate_complexity(query: &str) -> ComplexityProfile {
    let lower = query.to_lowercase();

    let question_count = QUESTION_WORDS.iter().filter(|w| lower.contains(*w)).count();
    let entities = CAPITALIZED.find_iter(query).count();
    let temporal_refs = TEMPORAL_REFS.find_iter(&lower).count();
    let relational_count = RELATIONAL_WORDS.iter().filter(|w| lower.contains(*w)).count();
    let word_count = query.split_whitespace().count();

    let complexity = (question_count as f64 * 0.2
        + entities.min(5) as f64 * 0.15
        + temporal_refs as f64 * 0.2
        + relational_count.min(3) as f64 * 0.15
        + (word_count as f64 / 50.0) * 0.3)
        .min(1.0);

    let query_type = if temporal_refs > 0 {
        QueryType::Temporal
    } else if relational_count > 0 {
        QueryType::Relational
    } else if question_count > 1 {
        QueryType::Complex
    } else {
        QueryType::Simple
    };

    let (suggested_top_k, suggested_expansions) = if complexity < 0.3 {
        (10, 1)
    } else if complexity < 0.6 {
        (20, 2)
    } else {
        (30, 3)
    };

    ComplexityProfile {
        complexity,
        query_type,
        suggested_top_k,
        suggested_expansions,
        question_count,
        entities,
        temporal_refs,
        relational_count,
    }
}
