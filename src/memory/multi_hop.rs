//! Multi-hop chaining over a memory-similarity graph built on the fly.

use std::collections::{BTreeSet, HashSet, VecDeque};

use super::dedup::jaccard_similarity;
use super::graph::{EntityExtractor, HeuristicExtractor};
use super::types::MemoryRecord;

const MULTI_HOP_INDICATORS: &[&str] = &[
    "relationship",
    "between",
    "related",
    "connected",
    "chain",
    "because",
    "why",
    "how",
    "through",
    "via",
];

/// Candidates enqueued per source memory.
const FAN_OUT: usize = 5;

pub const SINGLE_HOP_TRACE: &str = "Single-hop reasoning sufficient";

pub fn needs_multi_hop(query: &str) -> bool {
    let lower = query.to_lowercase();
    MULTI_HOP_INDICATORS.iter().any(|k| lower.contains(k))
}

#[derive(Debug, Clone)]
pub struct MultiHopReasoner {
    pub max_hops: usize,
    /// Minimum Jaccard similarity for a link when no entity is shared.
    pub similarity_threshold: f64,
}

impl Default for MultiHopReasoner {
    fn default() -> Self {
        Self {
            max_hops: 2,
            similarity_threshold: 0.3,
        }
    }
}

impl MultiHopReasoner {
    pub fn new(max_hops: usize, similarity_threshold: f64) -> Self {
        Self {
            max_hops,
            similarity_threshold,
        }
    }

    /// Chain `seeds` into `candidates` when the query calls for it.
    ///
    /// Returns the seeds unchanged with [`SINGLE_HOP_TRACE`] when the query
    /// has no multi-hop indicator or there are no seeds.
    pub fn reason(
        &self,
        query: &str,
        seeds: Vec<MemoryRecord>,
        candidates: &[MemoryRecord],
    ) -> (Vec<MemoryRecord>, String) {
        if seeds.is_empty() || !needs_multi_hop(query) {
            return (seeds, SINGLE_HOP_TRACE.to_string());
        }
        let initial = seeds.len();
        let chained = self.chain(seeds, candidates);
        let trace = format!(
            "Found {initial} initial memories, chained to {} related memories through {} hops",
            chained.len() - initial.min(chained.len()),
            self.max_hops
        );
        (chained, trace)
    }

    /// Breadth-first expansion from the seeds.
    ///
    /// A candidate links to the memory being expanded if they share an
    /// entity or their word similarity reaches the threshold. Link strength
    /// is `0.5 * overlap + 0.5 * similarity`; the strongest [`FAN_OUT`] links
    /// per memory are followed. Ids are visited at most once, so the output
    /// (seeds first, then discoveries in order) has no repeated ids and no
    /// hop level above `max_hops`.
    pub fn chain(&self, seeds: Vec<MemoryRecord>, candidates: &[MemoryRecord]) -> Vec<MemoryRecord> {
        let extractor = HeuristicExtractor;
        let candidate_entities: Vec<BTreeSet<String>> = candidates
            .iter()
            .map(|c| extractor.extract_entities(&c.text))
            .collect();

        let mut visited: HashSet<String> = HashSet::new();
        let mut chained: Vec<MemoryRecord> = Vec::with_capacity(seeds.len());
        let mut queue: VecDeque<(usize, usize)> = VecDeque::new();

        for seed in seeds {
            if visited.insert(seed.id.clone()) {
                queue.push_back((chained.len(), 0));
                chained.push(seed);
            }
        }

        while let Some((idx, hop)) = queue.pop_front() {
            if hop >= self.max_hops {
                continue;
            }
            let source_text = chained[idx].text.clone();
            let source_entities = extractor.extract_entities(&source_text);

            let mut links: Vec<(usize, f64)> = candidates
                .iter()
                .enumerate()
                .filter(|(_, c)| !visited.contains(&c.id))
                .filter_map(|(i, c)| {
                    let overlap = source_entities.intersection(&candidate_entities[i]).count();
                    let similarity = jaccard_similarity(&source_text, &c.text);
                    (overlap > 0 || similarity >= self.similarity_threshold)
                        .then(|| (i, 0.5 * overlap as f64 + 0.5 * similarity))
                })
                .collect();
            links.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

            for (i, strength) in links.into_iter().take(FAN_OUT) {
                let candidate = &candidates[i];
                if !visited.insert(candidate.id.clone()) {
                    continue;
                }
                let mut discovered = candidate.clone();
                discovered.hop_level = hop + 1;
                discovered.relation_score = Some(strength);
                queue.push_back((chained.len(), hop + 1));
                chained.push(discovered);
            }
        }

        tracing::debug!(total = chained.len(), max_hops = self.max_hops, "multi-hop chain built");
        chained
    }
}
