pub mod compare;
pub mod graph;
pub mod ingest;
pub mod run;
pub mod search;
pub mod stats;

use std::sync::Arc;

use anyhow::Result;

use memhop::config::MemhopConfig;
use memhop::generator::{create_generator, TextGenerator};
use memhop::memory::search::RetrievalPipeline;
use memhop::store::{open_store, MemoryStore};

/// Open the configured store and generator and wire them into a pipeline.
pub fn build_pipeline(config: &MemhopConfig) -> Result<RetrievalPipeline> {
    let store: Arc<dyn MemoryStore> = Arc::new(open_store(config)?);
    let generator: Arc<dyn TextGenerator> = Arc::from(create_generator(&config.generator)?);
    Ok(RetrievalPipeline::new(store, generator, config))
}

/// Shorten `text` to at most `max` characters, marking the cut.
pub fn preview(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}
