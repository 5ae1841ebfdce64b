mod cli;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use memhop::config::MemhopConfig;

#[derive(Parser)]
#[command(
    name = "memhop",
    version,
    about = "Multi-hop conversational memory retrieval and QA evaluation"
)]
struct Cli {
    /// Config file (defaults to ~/.memhop/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Load a conversation dataset into the memory store
    Ingest {
        /// Dataset JSON file
        dataset: PathBuf,
    },
    /// Answer every question in a dataset and write the results file
    Run {
        /// Dataset JSON file
        dataset: PathBuf,
        /// Results file (overrides [runner] output_path)
        #[arg(long)]
        output: Option<PathBuf>,
        /// Include per-speaker graph relations in the answer prompt
        #[arg(long)]
        graph: bool,
        /// Fixed result count; disables adaptive parameters
        #[arg(long)]
        top_k: Option<usize>,
        #[arg(long)]
        workers: Option<usize>,
        #[arg(long)]
        batch_size: Option<usize>,
    },
    /// Retrieve one speaker's memories for a question
    Search {
        /// Speaker scope, e.g. Caroline_0
        user: String,
        question: String,
        #[arg(long)]
        json: bool,
    },
    /// Inspect a speaker's entity graph
    Graph {
        user: String,
        /// Show the neighbourhood of this entity
        #[arg(long)]
        entity: Option<String>,
        #[arg(long, default_value_t = 2)]
        depth: usize,
        #[arg(long)]
        json: bool,
    },
    /// Show store statistics
    Stats,
    /// Compare per-category scores of two results files
    Compare {
        /// Results file to compare against
        baseline: PathBuf,
        candidate: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => MemhopConfig::load_from(path)?,
        None => MemhopConfig::load()?,
    };

    // Log to stderr so stdout stays clean for --json output.
    let filter = EnvFilter::try_new(&config.general.log_level)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Ingest { dataset } => cli::ingest::ingest(&config, &dataset).await?,
        Command::Run {
            dataset,
            output,
            graph,
            top_k,
            workers,
            batch_size,
        } => {
            let overrides = cli::run::RunOverrides {
                output,
                graph,
                top_k,
                workers,
                batch_size,
            };
            cli::run::run(config, &dataset, overrides).await?
        }
        Command::Search {
            user,
            question,
            json,
        } => cli::search::search(&config, &user, &question, json).await?,
        Command::Graph {
            user,
            entity,
            depth,
            json,
        } => cli::graph::graph(&config, &user, entity.as_deref(), depth, json).await?,
        Command::Stats => cli::stats::stats(&config).await?,
        Command::Compare {
            baseline,
            candidate,
        } => cli::compare::compare(&baseline, &candidate)?,
    }

    Ok(())
}
