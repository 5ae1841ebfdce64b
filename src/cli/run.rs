use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;

use memhop::config::MemhopConfig;
use memhop::dataset::load_dataset;
use memhop::runner::{process_dataset, RunOptions};

/// Command-line overrides for an evaluation run.
#[derive(Debug, Default)]
pub struct RunOverrides {
    pub output: Option<PathBuf>,
    pub graph: bool,
    pub top_k: Option<usize>,
    pub workers: Option<usize>,
    pub batch_size: Option<usize>,
}

impl RunOverrides {
    /// A fixed `--top-k` turns adaptive parameters off.
    fn apply(&self, config: &mut MemhopConfig) {
        if self.graph {
            config.retrieval.graph_mode = true;
        }
        if let Some(top_k) = self.top_k {
            config.retrieval.top_k = top_k;
            config.retrieval.adaptive = false;
        }
        if let Some(workers) = self.workers {
            config.runner.workers = workers;
        }
        if let Some(batch_size) = self.batch_size {
            config.runner.batch_size = batch_size;
        }
    }
}

/// Answer every question in a dataset and write the results file.
pub async fn run(mut config: MemhopConfig, dataset: &Path, overrides: RunOverrides) -> Result<()> {
    overrides.apply(&mut config);
    let items = load_dataset(dataset)?;
    let pipeline = Arc::new(super::build_pipeline(&config)?);

    let mut options = RunOptions::from_config(&config.runner);
    if let Some(output) = overrides.output {
        options.output_path = output;
    }

    let questions: usize = items.iter().map(|i| i.qa.len()).sum();
    println!(
        "Answering {questions} question(s) across {} conversation(s) (graph mode: {})",
        items.len(),
        config.retrieval.graph_mode
    );
    let results = process_dataset(pipeline, &items, &options).await?;

    let answered: usize = results.values().map(Vec::len).sum();
    println!("Answered {answered}/{questions}");
    println!("Results written to {}", options.output_path.display());
    Ok(())
}
