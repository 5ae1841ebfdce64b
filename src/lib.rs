//! Multi-hop memory retrieval over two-speaker conversations.
//!
//! memhop answers questions about long conversations from per-speaker memory
//! stores. Each speaker's memories are retrieved through an adaptive
//! pipeline, then both lists go into a single answer prompt:
//!
//! | Stage | What it does |
//! |-------|--------------|
//! | **Profile** | Query complexity picks `top_k` and the expansion count |
//! | **Expand** | The generator proposes related queries |
//! | **Search** | BM25 over each query, merged on id |
//! | **Dedup** | Near-duplicates removed, topical groups capped |
//! | **Temporal** | Scores boosted by closeness to the question's time frame |
//! | **Rerank** | The generator scores candidates in batches |
//! | **Multi-hop** | Linked memories chained in through shared entities |
//!
//! Every generator step falls back to the un-generated result on failure.
//! Store failures fail the question.
//!
//! # Modules
//!
//! - [`config`] — Configuration loading from TOML files and environment variables
//! - [`db`] — SQLite database initialization and schema
//! - [`store`] — Memory store trait and the SQLite/FTS5 implementation
//! - [`generator`] — Text generator trait and the OpenAI-compatible client
//! - [`memory`] — Retrieval heuristics, graph, pipeline, and answer synthesis
//! - [`dataset`] — Conversation dataset parsing
//! - [`runner`] — Ingestion and the batched evaluation run
//! - [`compare`] — Per-category score comparison of two results files
//! - [`retry`] — Bounded retry with per-attempt timeouts
//! - [`error`] — Library error type

pub mod compare;
pub mod config;
pub mod dataset;
pub mod db;
pub mod error;
pub mod generator;
pub mod memory;
pub mod retry;
pub mod runner;
pub mod store;
