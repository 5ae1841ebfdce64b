//! Retrieval engine: heuristics, ranking, graph, and answer synthesis.
//!
//! - [`types`] — normalized memory record and its display form
//! - [`temporal`] — time expression parsing and proximity
//! - [`complexity`] — adaptive `top_k` and expansion count
//! - [`dedup`] — near-duplicate removal and topical consolidation
//! - [`graph`] — per-speaker entity-relationship graph
//! - [`multi_hop`] — entity/similarity chaining across memories
//! - [`search`] — the per-speaker retrieval pipeline
//! - [`answer`] — prompt rendering and question answering

pub mod answer;
pub mod complexity;
pub mod dedup;
pub mod graph;
pub mod multi_hop;
pub mod search;
pub mod temporal;
pub mod types;
