//! Per-speaker retrieval pipeline.
//!
//! [`RetrievalPipeline::search_speaker`] runs one question against one
//! speaker's memories:
//!
//! 1. complexity profile picks `top_k` and the expansion count
//! 2. temporal intent is extracted from the question
//! 3. the generator proposes expansions (falls back to the question alone)
//! 4. every expansion is searched in the store (`2 * top_k` each)
//! 5. candidates merge on first-seen id
//! 6. near-duplicates are removed and topical groups capped
//! 7. proximity to the question's instant boosts scores
//! 8. the generator reranks candidates in batches (per-batch fallback)
//! 9. multi-hop chaining folds in linked memories from the full set
//! 10. the list is cut to `top_k`
//!
//! Store faults survive their retries and fail the question. Generator faults
//! never do: every generator step has a fallback.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use super::complexity::{estimate_complexity, ComplexityProfile};
use super::dedup::{consolidate, deduplicate};
use super::graph::{EntityExtractor, HeuristicExtractor, MemoryGraph};
use super::multi_hop::MultiHopReasoner;
use super::temporal::{proximity, HeuristicTemporalParser, TemporalInfo, TemporalParser};
use super::types::{sort_by_ranking, MemoryRecord, RankedMemory, RelationView};
use crate::config::{MemhopConfig, RetrievalConfig};
use crate::error::{RecallError, Result};
use crate::generator::{extract_json, ChatMessage, ResponseFormat, TextGenerator};
use crate::retry::RetryPolicy;
use crate::store::{MemoryStore, SearchFilters};

/// Attempts for the expansion call, independent of the global retry budget.
const EXPANSION_ATTEMPTS: u32 = 3;
const EXPANSION_TEMPERATURE: f32 = 0.3;
/// Memories whose entities seed the graph lookup.
const GRAPH_SEED_MEMORIES: usize = 5;

/// One speaker's answer to one question.
#[derive(Debug, Clone, Serialize)]
pub struct SpeakerRetrieval {
    pub memories: Vec<RankedMemory>,
    /// `Some` only in graph mode; `Some(vec![])` when nothing is related.
    pub graph_relations: Option<Vec<RelationView>>,
    #[serde(with = "secs_f64")]
    pub elapsed: Duration,
    pub profile: ComplexityProfile,
    pub reasoning: String,
}

pub struct RetrievalPipeline {
    store: Arc<dyn MemoryStore>,
    generator: Arc<dyn TextGenerator>,
    config: RetrievalConfig,
    store_retry: RetryPolicy,
    generator_retry: RetryPolicy,
    temporal: Arc<dyn TemporalParser>,
    reasoner: MultiHopReasoner,
    graphs: Mutex<HashMap<String, Arc<MemoryGraph>>>,
    reference: Option<NaiveDateTime>,
    answer_temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ExpansionReply {
    #[serde(default)]
    queries: Vec<String>,
}

impl RetrievalPipeline {
    pub fn new(
        store: Arc<dyn MemoryStore>,
        generator: Arc<dyn TextGenerator>,
        config: &MemhopConfig,
    ) -> Self {
        Self {
            store,
            generator,
            reasoner: MultiHopReasoner::new(
                config.retrieval.max_hops,
                config.retrieval.hop_similarity_threshold,
            ),
            config: config.retrieval.clone(),
            store_retry: RetryPolicy::for_store(&config.retry),
            generator_retry: RetryPolicy::for_generator(&config.retry),
            temporal: Arc::new(HeuristicTemporalParser),
            graphs: Mutex::new(HashMap::new()),
            reference: None,
            answer_temperature: config.generator.temperature,
        }
    }

    /// Pin "now" for relative expressions. Defaults to local wall-clock time.
    pub fn with_reference_time(mut self, reference: NaiveDateTime) -> Self {
        self.reference = Some(reference);
        self
    }

    pub fn with_temporal_parser(mut self, parser: Arc<dyn TemporalParser>) -> Self {
        self.temporal = parser;
        self
    }

    pub fn with_retry_policies(mut self, store: RetryPolicy, generator: RetryPolicy) -> Self {
        self.store_retry = store;
        self.generator_retry = generator;
        self
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    pub(crate) fn generator(&self) -> &dyn TextGenerator {
        self.generator.as_ref()
    }

    pub(crate) fn generator_retry(&self) -> &RetryPolicy {
        &self.generator_retry
    }

    /// Sampling temperature of the answer call, from `[generator]`.
    pub(crate) fn answer_temperature(&self) -> f32 {
        self.answer_temperature
    }

    pub(crate) fn reference_time(&self) -> NaiveDateTime {
        self.reference
            .unwrap_or_else(|| chrono::Local::now().naive_local())
    }

    pub fn temporal_info(&self, query: &str) -> TemporalInfo {
        self.temporal.extract_info(query, self.reference_time())
    }

    /// Retrieve the ranked memories of `user_id` for `query`.
    pub async fn search_speaker(&self, user_id: &str, query: &str) -> Result<SpeakerRetrieval> {
        let started = Instant::now();

        let profile = estimate_complexity(query);
        let (top_k, expansions) = if self.config.adaptive {
            (profile.suggested_top_k, profile.suggested_expansions)
        } else {
            (self.config.top_k, self.config.default_expansions)
        };
        let top_k = top_k.max(1);
        tracing::debug!(
            user_id,
            complexity = profile.complexity,
            query_type = %profile.query_type,
            top_k,
            expansions,
            "query profile"
        );

        let temporal = self.temporal_info(query);
        let queries = self.expand_query(query, expansions).await;
        let mut candidates = self.fetch_candidates(user_id, &queries, top_k * 2).await?;
        let fetched = candidates.len();

        if self.config.deduplication {
            candidates = deduplicate(candidates, self.config.dedup_threshold);
            candidates = consolidate(candidates, self.config.consolidation_max_group);
        }

        if temporal.has_temporal {
            if let Some(instant) = temporal.parsed_instant {
                self.apply_temporal_boost(&mut candidates, instant);
            }
        }

        let mut ranked = self.rerank(query, candidates).await;

        let mut reasoning = super::multi_hop::SINGLE_HOP_TRACE.to_string();
        if self.config.multi_hop {
            match self.fold_in_multi_hop(user_id, query, &mut ranked, top_k).await {
                Ok(trace) => reasoning = trace,
                Err(e) => {
                    tracing::warn!(user_id, error = %e, "multi-hop reasoning failed, keeping ranked order");
                }
            }
        }

        ranked.truncate(top_k);
        let memories: Vec<RankedMemory> = ranked.iter().map(MemoryRecord::to_ranked).collect();

        let graph_relations = if self.config.graph_mode {
            match self.graph_relations(user_id, query, &memories).await {
                Ok(relations) => Some(relations),
                Err(e) => {
                    tracing::warn!(user_id, error = %e, "graph lookup failed");
                    None
                }
            }
        } else {
            None
        };

        tracing::debug!(
            user_id,
            expansions = queries.len(),
            fetched,
            returned = memories.len(),
            "retrieval complete"
        );

        Ok(SpeakerRetrieval {
            memories,
            graph_relations,
            elapsed: started.elapsed(),
            profile,
            reasoning,
        })
    }

    /// The question followed by up to `expansions` generated variants.
    ///
    /// Never fails: parse or generator errors are retried, then the question
    /// alone is returned.
    pub async fn expand_query(&self, query: &str, expansions: usize) -> Vec<String> {
        if expansions == 0 {
            return vec![query.to_string()];
        }

        let prompt = format!(
            "Given the following question, generate {expansions} related queries that could \
             help retrieve relevant information.\n\
             Cover:\n\
             1. Temporal aspects (when, what date, which period)\n\
             2. Entity relationships (who, how they are related)\n\
             3. Contextual variations (synonyms, related concepts)\n\n\
             Original question: {query}\n\n\
             Return a JSON object with a \"queries\" key holding an array of query strings:\n\
             {{\"queries\": [\"query1\", \"query2\"]}}"
        );
        let messages = [ChatMessage::user(prompt)];
        let policy = RetryPolicy {
            max_attempts: EXPANSION_ATTEMPTS,
            ..self.generator_retry.clone()
        };

        let reply = policy
            .run("query expansion", || async {
                let raw = self
                    .generator
                    .generate(&messages, ResponseFormat::JsonObject, EXPANSION_TEMPERATURE)
                    .await?;
                Ok(serde_json::from_str::<ExpansionReply>(extract_json(&raw))?)
            })
            .await;

        match reply {
            Ok(reply) => merge_expansions(query, reply.queries, expansions),
            Err(e) => {
                tracing::warn!(error = %e, "query expansion failed, using original query");
                vec![query.to_string()]
            }
        }
    }

    /// Search the store once per query and merge on first-seen id.
    async fn fetch_candidates(
        &self,
        user_id: &str,
        queries: &[String],
        limit: usize,
    ) -> Result<Vec<MemoryRecord>> {
        let filters = self
            .config
            .filter_memories
            .then(|| SearchFilters::for_user(user_id));

        let mut seen = HashSet::new();
        let mut merged = Vec::new();
        for query in queries {
            let rows = self
                .store_retry
                .run("store search", || {
                    self.store.search(query, user_id, limit, filters.as_ref())
                })
                .await?;
            for record in rows.into_iter().map(MemoryRecord::from) {
                if seen.insert(record.id.clone()) {
                    merged.push(record);
                }
            }
        }
        Ok(merged)
    }

    /// Multiply scores by `1 + proximity / 2` for records whose timestamp
    /// parses.
    fn apply_temporal_boost(&self, records: &mut [MemoryRecord], query_instant: NaiveDateTime) {
        let reference = self.reference_time();
        for record in records.iter_mut() {
            let Some(stamp) = record.timestamp.as_deref() else {
                continue;
            };
            if let Some(instant) = self.temporal.parse(stamp, reference) {
                let closeness = proximity(Some(instant), Some(query_instant));
                record.temporal_proximity = Some(closeness);
                record.score *= 1.0 + closeness * 0.5;
            }
        }
    }

    /// Score candidates in fixed-size batches and sort globally.
    ///
    /// A failed batch keeps its records' existing scores; an index missing
    /// from a successful reply keeps that record's score.
    pub async fn rerank(&self, query: &str, mut records: Vec<MemoryRecord>) -> Vec<MemoryRecord> {
        if records.is_empty() {
            return records;
        }
        let batch_size = self.config.rerank_batch_size.max(1);

        for (n, batch) in records.chunks_mut(batch_size).enumerate() {
            match self.score_batch(query, batch).await {
                Ok(scores) => {
                    for (i, record) in batch.iter_mut().enumerate() {
                        record.rerank_score = Some(scores.get(&i).copied().unwrap_or(record.score));
                    }
                }
                Err(e) => {
                    tracing::warn!(batch = n, error = %e, "reranking failed, using original scores");
                }
            }
        }

        sort_by_ranking(&mut records);
        records
    }

    async fn score_batch(&self, query: &str, batch: &[MemoryRecord]) -> Result<HashMap<usize, f64>> {
        let listing: Vec<serde_json::Value> = batch
            .iter()
            .enumerate()
            .map(|(i, r)| serde_json::json!({ "id": i, "memory": r.text }))
            .collect();
        let prompt = format!(
            "Given the query and a list of memories, score each memory's relevance to the \
             query.\nQuery: {query}\n\nMemories:\n{}\n\n\
             Return a JSON object with memory ids as keys and relevance scores (0-1) as values:\n\
             {{\"0\": 0.9, \"1\": 0.7}}",
            serde_json::to_string_pretty(&listing)?
        );
        let messages = [ChatMessage::user(prompt)];

        self.generator_retry
            .run("rerank batch", || async {
                let raw = self
                    .generator
                    .generate(&messages, ResponseFormat::JsonObject, 0.0)
                    .await?;
                parse_rerank_scores(extract_json(&raw))
            })
            .await
    }

    /// Chain the top `top_k` records through the speaker's full memory set
    /// and merge new discoveries. Returns the reasoning trace.
    async fn fold_in_multi_hop(
        &self,
        user_id: &str,
        query: &str,
        ranked: &mut Vec<MemoryRecord>,
        top_k: usize,
    ) -> Result<String> {
        let all: Vec<MemoryRecord> = self
            .store_retry
            .run("store list_all", || self.store.list_all(user_id))
            .await?
            .into_iter()
            .map(MemoryRecord::from)
            .collect();

        let seeds: Vec<MemoryRecord> = ranked.iter().take(top_k).cloned().collect();
        let (chained, trace) = self.reasoner.reason(query, seeds, &all);

        let mut seen: HashSet<String> = ranked.iter().map(|r| r.id.clone()).collect();
        let before = ranked.len();
        for record in chained {
            if seen.insert(record.id.clone()) {
                ranked.push(record);
            }
        }
        sort_by_ranking(ranked);
        tracing::debug!(user_id, added = ranked.len() - before, trace = %trace, "multi-hop merged");
        Ok(trace)
    }

    /// The speaker's graph, built from the full memory set on first use and
    /// cached for the life of the pipeline.
    pub async fn speaker_graph(&self, user_id: &str) -> Result<Arc<MemoryGraph>> {
        if let Some(graph) = self.cached_graph(user_id)? {
            return Ok(graph);
        }

        let all: Vec<MemoryRecord> = self
            .store_retry
            .run("store list_all", || self.store.list_all(user_id))
            .await?
            .into_iter()
            .map(MemoryRecord::from)
            .collect();
        let built = Arc::new(MemoryGraph::from_records(&all));

        let mut graphs = self
            .graphs
            .lock()
            .map_err(|e| RecallError::Store(format!("graph cache lock poisoned: {e}")))?;
        // A concurrent builder may have won; keep the first graph inserted.
        let graph = Arc::clone(graphs.entry(user_id.to_string()).or_insert(built));
        Ok(graph)
    }

    fn cached_graph(&self, user_id: &str) -> Result<Option<Arc<MemoryGraph>>> {
        let graphs = self
            .graphs
            .lock()
            .map_err(|e| RecallError::Store(format!("graph cache lock poisoned: {e}")))?;
        let graph = graphs.get(user_id).cloned();
        Ok(graph)
    }

    /// Relations touching entities named in the question or in the top
    /// memories.
    async fn graph_relations(
        &self,
        user_id: &str,
        query: &str,
        memories: &[RankedMemory],
    ) -> Result<Vec<RelationView>> {
        let graph = self.speaker_graph(user_id).await?;
        let extractor = HeuristicExtractor;
        let mut entities = extractor.extract_entities(query);
        for memory in memories.iter().take(GRAPH_SEED_MEMORIES) {
            entities.extend(extractor.extract_entities(&memory.memory));
        }
        Ok(graph.relations_for(entities.iter().map(String::as_str)))
    }

    /// Reweight an output list toward the question's time frame and re-sort
    /// by `score * weight`.
    ///
    /// Weights: `1 + proximity / 2` when both sides parse, 1.3 when only the
    /// memory has a (non-parsing or unmatched) timestamp, 1.0 otherwise.
    /// Questions without temporal intent are left untouched.
    pub fn apply_temporal_attention(&self, memories: &mut [RankedMemory], temporal: &TemporalInfo) {
        if !temporal.has_temporal {
            return;
        }
        let reference = self.reference_time();
        for memory in memories.iter_mut() {
            let weight = if memory.timestamp.is_empty() {
                1.0
            } else {
                match (
                    temporal.parsed_instant,
                    self.temporal.parse(&memory.timestamp, reference),
                ) {
                    (Some(query), Some(instant)) => {
                        1.0 + proximity(Some(instant), Some(query)) * 0.5
                    }
                    _ => 1.3,
                }
            };
            memory.temporal_weight = Some(weight);
        }
        memories.sort_by(|a, b| {
            let wa = a.score * a.temporal_weight.unwrap_or(1.0);
            let wb = b.score * b.temporal_weight.unwrap_or(1.0);
            wb.partial_cmp(&wa).unwrap_or(std::cmp::Ordering::Equal)
        });
    }
}

/// Put the question first, drop blanks and repeats, cap at `expansions + 1`.
fn merge_expansions(query: &str, generated: Vec<String>, expansions: usize) -> Vec<String> {
    let mut queries = vec![query.to_string()];
    for candidate in generated {
        let candidate = candidate.trim();
        if candidate.is_empty() || queries.iter().any(|q| q == candidate) {
            continue;
        }
        queries.push(candidate.to_string());
    }
    queries.truncate(expansions + 1);
    queries
}

/// Parse `{"0": 0.9, "1": 0.7}` into index → score. Non-numeric values and
/// non-index keys are ignored; scores are clamped to `[0, 1]`.
fn parse_rerank_scores(json: &str) -> Result<HashMap<usize, f64>> {
    let value: serde_json::Value = serde_json::from_str(json)?;
    let object = value
        .as_object()
        .ok_or_else(|| RecallError::MalformedResponse("rerank reply is not an object".into()))?;
    Ok(object
        .iter()
        .filter_map(|(k, v)| {
            let index = k.trim().parse::<usize>().ok()?;
            let score = v
                .as_f64()
                .or_else(|| v.as_str().and_then(|s| s.trim().parse().ok()))?;
            score.is_finite().then(|| (index, score.clamp(0.0, 1.0)))
        })
        .collect())
}

mod secs_f64 {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }
}
