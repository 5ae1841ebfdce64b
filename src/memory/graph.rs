//! Entity-relationship graph over memory records.
//!
//! Nodes are heuristically extracted entities (capitalized words and quoted
//! phrases); edges come from a fixed list of relationship templates and are
//! stored in both directions. Two indices map memories to entities and back.
//!
//! A graph is append-only and owned by one speaker. It is built single-writer
//! and then shared read-only (typically behind an `Arc`).

use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::types::{Edge, Entity, MemoryRecord, RelationKind, RelationView};

const STOPWORDS: &[&str] = &[
    "The", "This", "That", "These", "Those", "A", "An", "I", "You", "He", "She", "It", "We",
    "They", "When", "Where", "What", "Who", "Why", "How", "Which",
];

static CAPITALIZED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b[A-Z][a-z]+\b").expect("valid entity pattern"));
static QUOTED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""([^"]+)""#).expect("valid quoted pattern"));

/// Relationship templates, tried in order over the lowercased text.
static RELATION_TEMPLATES: LazyLock<Vec<(Regex, RelationKind)>> = LazyLock::new(|| {
    [
        (r"(\w+)\s+(?:is|was|are|were)\s+(?:a|an|the)?\s*(\w+)", RelationKind::IsA),
        (r"(\w+)\s+(?:has|had|have)\s+(\w+)", RelationKind::Has),
        (r"(\w+)\s+(?:works?|worked)\s+(?:at|for)\s+(\w+)", RelationKind::WorksAt),
        (r"(\w+)\s+(?:lives?|lived)\s+(?:in|at)\s+(\w+)", RelationKind::LivesIn),
        (r"(\w+)\s+(?:loves?|likes?|enjoys?)\s+(\w+)", RelationKind::Likes),
        (r"(\w+)\s+(?:went|goes|going)\s+to\s+(\w+)", RelationKind::WentTo),
        (r"(\w+)\s+(?:met|meets?)\s+(\w+)", RelationKind::Met),
        (r"(\w+)\s+(?:with|and)\s+(\w+)", RelationKind::With),
    ]
    .into_iter()
    .map(|(pattern, kind)| (Regex::new(pattern).expect("valid relation template"), kind))
    .collect()
});

/// Strategy for pulling entities and typed relationships out of text.
pub trait EntityExtractor: Send + Sync {
    fn extract_entities(&self, text: &str) -> BTreeSet<String>;

    /// Relationships `(source, target, kind)` whose endpoints are both in
    /// `entities`.
    fn extract_relationships(
        &self,
        text: &str,
        entities: &BTreeSet<String>,
    ) -> Vec<(String, String, RelationKind)>;
}

/// Regex and stopword heuristics. No language model involved.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicExtractor;

impl EntityExtractor for HeuristicExtractor {
    fn extract_entities(&self, text: &str) -> BTreeSet<String> {
        let mut entities: BTreeSet<String> = CAPITALIZED
            .find_iter(text)
            .map(|m| m.as_str())
            .filter(|word| !STOPWORDS.contains(word))
            .map(str::to_string)
            .collect();
        entities.extend(QUOTED.captures_iter(text).map(|c| c[1].to_string()));
        entities
    }

    fn extract_relationships(
        &self,
        text: &str,
        entities: &BTreeSet<String>,
    ) -> Vec<(String, String, RelationKind)> {
        let lower = text.to_lowercase();
        let mut found = Vec::new();
        for (pattern, kind) in RELATION_TEMPLATES.iter() {
            for caps in pattern.captures_iter(&lower) {
                let source = capitalize(&caps[1]);
                let target = capitalize(&caps[2]);
                if entities.contains(&source) && entities.contains(&target) {
                    found.push((source, target, *kind));
                }
            }
        }
        found
    }
}

/// Upper-case the first character, lower-case the rest.
fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

/// Summary counts for a graph.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraphStats {
    pub num_entities: usize,
    /// Undirected count: each stored pair of directed edges counts once.
    pub num_relationships: usize,
    pub num_memories: usize,
    pub avg_entities_per_memory: f64,
    pub avg_memories_per_entity: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryGraph {
    entities: BTreeMap<String, Entity>,
    relationships: BTreeMap<String, Vec<Edge>>,
    memory_entities: BTreeMap<String, BTreeSet<String>>,
    entity_memories: BTreeMap<String, BTreeSet<String>>,
}

impl MemoryGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a graph from a speaker's full memory set. Repeated ids are
    /// skipped so the add-once precondition holds.
    pub fn from_records(records: &[MemoryRecord]) -> Self {
        let mut graph = Self::new();
        let mut seen = HashSet::new();
        for record in records {
            if seen.insert(record.id.as_str()) {
                graph.add_memory(&record.id, &record.text, record.timestamp.as_deref());
            }
        }
        tracing::debug!(
            memories = graph.memory_entities.len(),
            entities = graph.entities.len(),
            "built memory graph"
        );
        graph
    }

    /// Index a memory with the heuristic extractor.
    ///
    /// Callers must not add the same `memory_id` twice: counts and edges
    /// would be doubled.
    pub fn add_memory(&mut self, memory_id: &str, text: &str, timestamp: Option<&str>) {
        self.add_memory_with(&HeuristicExtractor, memory_id, text, timestamp);
    }

    pub fn add_memory_with(
        &mut self,
        extractor: &dyn EntityExtractor,
        memory_id: &str,
        text: &str,
        timestamp: Option<&str>,
    ) {
        let entities = extractor.extract_entities(text);
        let first_seen = timestamp.unwrap_or_default();

        for entity in &entities {
            self.entity_memories
                .entry(entity.clone())
                .or_default()
                .insert(memory_id.to_string());
            self.ensure_entity(entity, first_seen).memory_count += 1;
        }

        for (source, target, kind) in extractor.extract_relationships(text, &entities) {
            self.ensure_entity(&source, first_seen);
            self.ensure_entity(&target, first_seen);
            self.relationships.entry(source.clone()).or_default().push(Edge {
                target: target.clone(),
                kind,
                strength: 1.0,
                forward: true,
            });
            self.relationships.entry(target).or_default().push(Edge {
                target: source,
                kind,
                strength: 1.0,
                forward: false,
            });
        }

        self.memory_entities.insert(memory_id.to_string(), entities);
    }

    fn ensure_entity(&mut self, name: &str, first_seen: &str) -> &mut Entity {
        self.entities.entry(name.to_string()).or_insert_with(|| Entity {
            id: name.to_string(),
            first_seen: first_seen.to_string(),
            memory_count: 0,
        })
    }

    pub fn entity(&self, name: &str) -> Option<&Entity> {
        self.entities.get(name)
    }

    pub fn entities(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    pub fn edges(&self, entity: &str) -> &[Edge] {
        self.relationships.get(entity).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn entities_of(&self, memory_id: &str) -> Option<&BTreeSet<String>> {
        self.memory_entities.get(memory_id)
    }

    pub fn memories_of(&self, entity: &str) -> Option<&BTreeSet<String>> {
        self.entity_memories.get(entity)
    }

    pub fn is_empty(&self) -> bool {
        self.memory_entities.is_empty()
    }

    /// Entities within `max_depth` edges of `entity`, excluding `entity`.
    /// Unknown entities yield an empty set.
    pub fn related_entities(&self, entity: &str, max_depth: usize) -> BTreeSet<String> {
        let mut related = BTreeSet::new();
        if !self.entities.contains_key(entity) {
            return related;
        }

        let mut visited: HashSet<&str> = HashSet::from([entity]);
        let mut queue = VecDeque::from([(entity, 0usize)]);
        while let Some((current, depth)) = queue.pop_front() {
            if depth >= max_depth {
                continue;
            }
            for edge in self.edges(current) {
                if visited.insert(edge.target.as_str()) {
                    related.insert(edge.target.clone());
                    queue.push_back((edge.target.as_str(), depth + 1));
                }
            }
        }
        related
    }

    /// Memories mentioning `entity` or any entity related to it within
    /// `max_depth` edges.
    pub fn related_memories(&self, entity: &str, max_depth: usize) -> BTreeSet<String> {
        if !self.entities.contains_key(entity) {
            return BTreeSet::new();
        }
        std::iter::once(entity.to_string())
            .chain(self.related_entities(entity, max_depth))
            .filter_map(|e| self.entity_memories.get(&e))
            .flatten()
            .cloned()
            .collect()
    }

    /// Shortest path from `from` to `to` using at most `max_depth` edges.
    pub fn find_path(&self, from: &str, to: &str, max_depth: usize) -> Option<Vec<String>> {
        if !self.entities.contains_key(from) || !self.entities.contains_key(to) {
            return None;
        }
        if from == to {
            return Some(vec![from.to_string()]);
        }

        let mut parent: BTreeMap<&str, &str> = BTreeMap::new();
        let mut visited: HashSet<&str> = HashSet::from([from]);
        let mut queue = VecDeque::from([(from, 0usize)]);

        while let Some((current, depth)) = queue.pop_front() {
            if depth >= max_depth {
                continue;
            }
            for edge in self.edges(current) {
                let next = edge.target.as_str();
                if !visited.insert(next) {
                    continue;
                }
                parent.insert(next, current);
                if next == to {
                    let mut path = vec![to.to_string()];
                    let mut node = to;
                    while let Some(&prev) = parent.get(node) {
                        path.push(prev.to_string());
                        node = prev;
                    }
                    path.reverse();
                    return Some(path);
                }
                queue.push_back((next, depth + 1));
            }
        }
        None
    }

    pub fn stats(&self) -> GraphStats {
        let directed: usize = self.relationships.values().map(Vec::len).sum();
        let avg = |total: usize, n: usize| if n == 0 { 0.0 } else { total as f64 / n as f64 };
        GraphStats {
            num_entities: self.entities.len(),
            num_relationships: directed / 2,
            num_memories: self.memory_entities.len(),
            avg_entities_per_memory: avg(
                self.memory_entities.values().map(BTreeSet::len).sum(),
                self.memory_entities.len(),
            ),
            avg_memories_per_entity: avg(
                self.entity_memories.values().map(BTreeSet::len).sum(),
                self.entity_memories.len(),
            ),
        }
    }

    /// Direct relationships of the given entities, each reported once in its
    /// stored direction. Unknown entities are ignored.
    pub fn relations_for<'a>(
        &self,
        entities: impl IntoIterator<Item = &'a str>,
    ) -> Vec<RelationView> {
        let mut seen = HashSet::new();
        let mut views = Vec::new();
        for entity in entities {
            for edge in self.edges(entity) {
                let (source, target) = if edge.forward {
                    (entity.to_string(), edge.target.clone())
                } else {
                    (edge.target.clone(), entity.to_string())
                };
                if !seen.insert((source.clone(), edge.kind, target.clone())) {
                    continue;
                }
                views.push(RelationView {
                    source,
                    relationship: edge.kind.to_string(),
                    target,
                });
            }
        }
        views
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}
