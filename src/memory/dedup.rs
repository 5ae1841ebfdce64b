//! Near-duplicate removal and topical consolidation of candidate sets.

use std::collections::{HashMap, HashSet};

use super::types::MemoryRecord;

/// Word-overlap Jaccard similarity of two texts (lowercased, whitespace
/// tokens). `0.0` if either side has no tokens.
pub fn jaccard_similarity(a: &str, b: &str) -> f64 {
    let a = a.to_lowercase();
    let b = b.to_lowercase();
    let words_a: HashSet<&str> = a.split_whitespace().collect();
    let words_b: HashSet<&str> = b.split_whitespace().collect();
    if words_a.is_empty() || words_b.is_empty() {
        return 0.0;
    }
    let intersection = words_a.intersection(&words_b).count();
    let union = words_a.union(&words_b).count();
    intersection as f64 / union as f64
}

/// Drop exact (case-insensitive) and near duplicates.
///
/// Records are considered highest score first, so of any pair with
/// similarity `>= threshold` the higher scorer survives; equal scores keep
/// the one seen first. Survivors keep their input order, and the result is a
/// fixed point: running it again changes nothing.
pub fn deduplicate(records: Vec<MemoryRecord>, threshold: f64) -> Vec<MemoryRecord> {
    if records.len() < 2 {
        return records;
    }

    let mut order: Vec<usize> = (0..records.len()).collect();
    order.sort_by(|&a, &b| {
        records[b]
            .ranking_score()
            .partial_cmp(&records[a].ranking_score())
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut seen_hashes = HashSet::new();
    let mut accepted: Vec<usize> = Vec::new();

    for idx in order {
        let text = &records[idx].text;
        let hash = blake3::hash(text.to_lowercase().as_bytes());
        if !seen_hashes.insert(hash) {
            continue;
        }
        let near_duplicate = accepted
            .iter()
            .any(|&kept| jaccard_similarity(text, &records[kept].text) >= threshold);
        if !near_duplicate {
            accepted.push(idx);
        }
    }

    let keep: HashSet<usize> = accepted.into_iter().collect();
    let before = records.len();
    let out: Vec<MemoryRecord> = records
        .into_iter()
        .enumerate()
        .filter_map(|(i, r)| keep.contains(&i).then_some(r))
        .collect();
    tracing::debug!(before, after = out.len(), "deduplicated candidates");
    out
}

fn group_key(text: &str) -> String {
    text.to_lowercase()
        .split_whitespace()
        .take(3)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Cap each topical group (first three lowercase words) at `max_group`
/// members, keeping the top scorers. Groups appear in order of first
/// appearance; small groups pass through in input order.
pub fn consolidate(records: Vec<MemoryRecord>, max_group: usize) -> Vec<MemoryRecord> {
    if records.len() <= 1 {
        return records;
    }
    let max_group = max_group.max(1);

    let mut index: HashMap<String, usize> = HashMap::new();
    let mut groups: Vec<Vec<MemoryRecord>> = Vec::new();
    for record in records {
        let key = group_key(&record.text);
        match index.get(&key) {
            Some(&slot) => groups[slot].push(record),
            None => {
                index.insert(key, groups.len());
                groups.push(vec![record]);
            }
        }
    }

    let mut out = Vec::new();
    for mut group in groups {
        if group.len() > max_group {
            super::types::sort_by_ranking(&mut group);
            group.truncate(max_group);
        }
        out.extend(group);
    }
    out
}
