//! Per-category comparison of two results files.
//!
//! Each entry is scored by `f1_score`, `bleu_score`, and `llm_score` when an
//! external evaluator has added them. Without `f1_score`, token F1 between
//! `response` and `answer` is computed here.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct ResultEntry {
    #[serde(default)]
    category: serde_json::Value,
    #[serde(default)]
    answer: serde_json::Value,
    #[serde(default)]
    response: String,
    f1_score: Option<f64>,
    bleu_score: Option<f64>,
    llm_score: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoredItem {
    pub category: i64,
    pub f1: f64,
    pub bleu: Option<f64>,
    pub llm: Option<f64>,
}

/// Means over a group of scored items. `bleu` and `llm` average only the
/// items that carry them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScoreSummary {
    pub count: usize,
    pub f1: f64,
    pub bleu: Option<f64>,
    pub llm: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    pub by_category: BTreeMap<i64, ScoreSummary>,
    pub overall: ScoreSummary,
}

/// Categories may be stored as numbers or numeric strings; anything else is -1.
fn category_of(value: &serde_json::Value) -> i64 {
    match value {
        serde_json::Value::Number(n) => n.as_i64().unwrap_or(-1),
        serde_json::Value::String(s) => s.trim().parse().unwrap_or(-1),
        _ => -1,
    }
}

fn answer_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn tokens(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Harmonic mean of token precision and recall, case and punctuation
/// insensitive. Two empty strings match perfectly.
pub fn token_f1(prediction: &str, reference: &str) -> f64 {
    let predicted = tokens(prediction);
    let expected = tokens(reference);
    if predicted.is_empty() || expected.is_empty() {
        return if predicted.is_empty() && expected.is_empty() { 1.0 } else { 0.0 };
    }

    let mut remaining: HashMap<&str, usize> = HashMap::new();
    for token in &expected {
        *remaining.entry(token.as_str()).or_default() += 1;
    }
    let mut common = 0usize;
    for token in &predicted {
        if let Some(n) = remaining.get_mut(token.as_str()).filter(|n| **n > 0) {
            *n -= 1;
            common += 1;
        }
    }
    if common == 0 {
        return 0.0;
    }
    let precision = common as f64 / predicted.len() as f64;
    let recall = common as f64 / expected.len() as f64;
    2.0 * precision * recall / (precision + recall)
}

/// Flatten a results map (conversation index → entries) into scored items.
pub fn parse_scored(json: &str) -> Result<Vec<ScoredItem>> {
    let map: BTreeMap<String, Vec<ResultEntry>> =
        serde_json::from_str(json).context("results file is not a map of entry lists")?;
    Ok(map
        .into_values()
        .flatten()
        .map(|entry| ScoredItem {
            category: category_of(&entry.category),
            f1: entry
                .f1_score
                .unwrap_or_else(|| token_f1(&entry.response, &answer_text(&entry.answer))),
            bleu: entry.bleu_score,
            llm: entry.llm_score,
        })
        .collect())
}

pub fn load_scored(path: &Path) -> Result<Vec<ScoredItem>> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read results file: {}", path.display()))?;
    parse_scored(&json).with_context(|| format!("in {}", path.display()))
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, n) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    (n > 0).then(|| sum / n as f64)
}

fn summarize_group(items: &[&ScoredItem]) -> ScoreSummary {
    ScoreSummary {
        count: items.len(),
        f1: mean(items.iter().map(|i| i.f1)).unwrap_or(0.0),
        bleu: mean(items.iter().filter_map(|i| i.bleu)),
        llm: mean(items.iter().filter_map(|i| i.llm)),
    }
}

pub fn summarize(items: &[ScoredItem]) -> RunSummary {
    let mut groups: BTreeMap<i64, Vec<&ScoredItem>> = BTreeMap::new();
    for item in items {
        groups.entry(item.category).or_default().push(item);
    }
    RunSummary {
        by_category: groups
            .iter()
            .map(|(category, group)| (*category, summarize_group(group)))
            .collect(),
        overall: summarize_group(&items.iter().collect::<Vec<_>>()),
    }
}

/// Change from `baseline` to `candidate`, and that change as a percentage of
/// the baseline. The percentage is `None` when the baseline is zero.
pub fn improvement(baseline: f64, candidate: f64) -> (f64, Option<f64>) {
    let delta = candidate - baseline;
    let pct = (baseline != 0.0).then(|| delta / baseline * 100.0);
    (delta, pct)
}
