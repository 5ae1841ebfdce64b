use std::path::Path;
use std::sync::Arc;

use anyhow::Result;

use memhop::config::MemhopConfig;
use memhop::dataset::load_dataset;
use memhop::retry::RetryPolicy;
use memhop::runner::ingest_dataset;
use memhop::store::{open_store, MemoryStore};

/// Load a dataset into the store, one scope per speaker.
pub async fn ingest(config: &MemhopConfig, dataset: &Path) -> Result<()> {
    let items = load_dataset(dataset)?;
    let store: Arc<dyn MemoryStore> = Arc::new(open_store(config)?);
    let retry = RetryPolicy::for_store(&config.retry);

    println!("Ingesting {} conversation(s) from {}", items.len(), dataset.display());
    let report = ingest_dataset(store, &items, &retry, true).await?;

    println!("  Conversations:  {}", report.conversations);
    println!("  Skipped:        {}", report.skipped);
    println!("  Memories added: {}", report.memories);
    Ok(())
}
