//! Core record and graph type definitions.
//!
//! Defines [`MemoryRecord`] (the unit ranked by the pipeline), [`RawMemory`]
//! (the loosely shaped row a store hands back), [`RankedMemory`] (the
//! display form written to results), and the entity-graph types
//! [`Entity`], [`RelationKind`], [`Edge`] and [`RelationView`].

use serde::{Deserialize, Serialize};

/// Stable surrogate id for records that arrive without one.
pub fn content_id(text: &str) -> String {
    blake3::hash(text.as_bytes()).to_hex().to_string()
}

/// A memory record as it moves through the retrieval stages.
///
/// Each speaker owns its own working set; records are mutated in place by
/// scoring stages and dropped once the question's result is final.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    /// Store id, or [`content_id`] of `text` when the store had none.
    pub id: String,
    pub text: String,
    /// Raw timestamp string as stored (e.g. `"2024-01-01"`, `"today"`).
    pub timestamp: Option<String>,
    /// Retrieval score, boosted in place by temporal proximity.
    pub score: f64,
    /// Relevance assigned by the reranker, if its batch succeeded.
    pub rerank_score: Option<f64>,
    pub temporal_proximity: Option<f64>,
    pub temporal_weight: f64,
    /// 0 for directly retrieved records, >0 for multi-hop discoveries.
    pub hop_level: usize,
    /// Link strength to the record it was discovered from (multi-hop only).
    pub relation_score: Option<f64>,
}

impl MemoryRecord {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            timestamp: None,
            score: 0.0,
            rerank_score: None,
            temporal_proximity: None,
            temporal_weight: 1.0,
            hop_level: 0,
            relation_score: None,
        }
    }

    /// Record identified by the content hash of its text.
    pub fn from_text(text: impl Into<String>) -> Self {
        let text = text.into();
        Self::new(content_id(&text), text)
    }

    pub fn with_timestamp(mut self, timestamp: impl Into<String>) -> Self {
        self.timestamp = Some(timestamp.into());
        self
    }

    pub fn with_score(mut self, score: f64) -> Self {
        self.score = score;
        self
    }

    /// Score used for ordering: the reranker's verdict when present.
    pub fn ranking_score(&self) -> f64 {
        self.rerank_score.unwrap_or(self.score)
    }

    /// Display form with a score rounded to two decimals.
    pub fn to_ranked(&self) -> RankedMemory {
        RankedMemory {
            memory: self.text.clone(),
            timestamp: self.timestamp.clone().unwrap_or_default(),
            score: round2(self.ranking_score()),
            hop_level: self.hop_level,
            temporal_weight: None,
        }
    }
}

/// Sort records by [`MemoryRecord::ranking_score`], highest first. Stable.
pub fn sort_by_ranking(records: &mut [MemoryRecord]) {
    records.sort_by(|a, b| {
        b.ranking_score()
            .partial_cmp(&a.ranking_score())
            .unwrap_or(std::cmp::Ordering::Equal)
    });
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// A memory row as returned by a store, before normalization.
///
/// Stores disagree on key names; every alternative is accepted here and
/// collapsed by the `From<RawMemory> for MemoryRecord` conversion so nothing
/// downstream branches on shape.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawMemory {
    #[serde(default, alias = "memory_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl From<RawMemory> for MemoryRecord {
    fn from(raw: RawMemory) -> Self {
        let text = [raw.memory, raw.text, raw.data]
            .into_iter()
            .flatten()
            .find(|t| !t.is_empty())
            .unwrap_or_default();

        let id = raw
            .id
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| content_id(&text));

        let timestamp = raw
            .metadata
            .as_ref()
            .and_then(|m| m.get("timestamp"))
            .and_then(|t| t.as_str())
            .map(str::to_string)
            .or(raw.timestamp)
            .filter(|t| !t.is_empty());

        Self {
            timestamp,
            score: raw.score.unwrap_or(0.0),
            ..MemoryRecord::new(id, text)
        }
    }
}

/// One retrieved memory in a question result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedMemory {
    pub memory: String,
    pub timestamp: String,
    pub score: f64,
    pub hop_level: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temporal_weight: Option<f64>,
}

/// A graph node: a heuristically extracted proper noun or quoted phrase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Canonical name, which doubles as the id.
    pub id: String,
    /// Timestamp of the memory that introduced the entity (empty if unknown).
    pub first_seen: String,
    pub memory_count: u32,
}

/// Relationship templates recognised by the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    IsA,
    Has,
    WorksAt,
    LivesIn,
    Likes,
    WentTo,
    Met,
    With,
}

impl RelationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::IsA => "is_a",
            Self::Has => "has",
            Self::WorksAt => "works_at",
            Self::LivesIn => "lives_in",
            Self::Likes => "likes",
            Self::WentTo => "went_to",
            Self::Met => "met",
            Self::With => "with",
        }
    }
}

impl std::fmt::Display for RelationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RelationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "is_a" => Ok(Self::IsA),
            "has" => Ok(Self::Has),
            "works_at" => Ok(Self::WorksAt),
            "lives_in" => Ok(Self::LivesIn),
            "likes" => Ok(Self::Likes),
            "went_to" => Ok(Self::WentTo),
            "met" => Ok(Self::Met),
            "with" => Ok(Self::With),
            _ => Err(format!("unknown relation kind: {s}")),
        }
    }
}

/// One direction of a stored relationship. The reverse direction is stored
/// under the target entity with `forward` unset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub target: String,
    pub kind: RelationKind,
    pub strength: f64,
    /// Whether the owning entity is the relationship's subject.
    #[serde(default = "forward_default")]
    pub forward: bool,
}

fn forward_default() -> bool {
    true
}

/// A relationship rendered for an answer prompt.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RelationView {
    pub source: String,
    pub relationship: String,
    pub target: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_memory_prefers_memory_key_and_metadata_timestamp() {
        let raw: RawMemory = serde_json::from_value(serde_json::json!({
            "id": "m1",
            "memory": "Caroline went to a support group",
            "score": 0.42,
            "metadata": {"timestamp": "2023-05-08"}
        }))
        .unwrap();
        let record = MemoryRecord::from(raw);
        assert_eq!(record.id, "m1");
        assert_eq!(record.text, "Caroline went to a support group");
        assert_eq!(record.timestamp.as_deref(), Some("2023-05-08"));
        assert_eq!(record.score, 0.42);
        assert_eq!(record.temporal_weight, 1.0);
        assert_eq!(record.hop_level, 0);
    }

    #[test]
    fn raw_memory_without_id_gets_content_hash() {
        let raw: RawMemory =
            serde_json::from_value(serde_json::json!({"text": "Melanie paints"})).unwrap();
        let record = MemoryRecord::from(raw);
        assert_eq!(record.id, content_id("Melanie paints"));
        assert_eq!(record.score, 0.0);
        assert!(record.timestamp.is_none());
    }

    #[test]
    fn memory_id_alias_is_accepted() {
        let raw: RawMemory = serde_json::from_value(serde_json::json!({
            "memory_id": "abc",
            "data": "fallback text key",
            "timestamp": "yesterday"
        }))
        .unwrap();
        let record = MemoryRecord::from(raw);
        assert_eq!(record.id, "abc");
        assert_eq!(record.text, "fallback text key");
        assert_eq!(record.timestamp.as_deref(), Some("yesterday"));
    }

    #[test]
    fn ranking_prefers_rerank_score() {
        let mut a = MemoryRecord::new("a", "x").with_score(0.9);
        a.rerank_score = Some(0.1);
        let b = MemoryRecord::new("b", "y").with_score(0.5);
        let mut records = vec![a, b];
        sort_by_ranking(&mut records);
        assert_eq!(records[0].id, "b");
    }

    #[test]
    fn ranked_score_is_rounded() {
        let ranked = MemoryRecord::new("a", "x").with_score(0.12345).to_ranked();
        assert_eq!(ranked.score, 0.12);
        assert_eq!(ranked.timestamp, "");
    }

    #[test]
    fn relation_kind_round_trips_through_str() {
        for kind in [RelationKind::IsA, RelationKind::WorksAt, RelationKind::With] {
            assert_eq!(kind.as_str().parse::<RelationKind>().unwrap(), kind);
        }
        assert!("manages".parse::<RelationKind>().is_err());
    }
}
