//! Dataset ingestion and the batched evaluation run.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::config::RunnerConfig;
use crate::dataset::{DatasetItem, QaItem};
use crate::memory::answer::QuestionResult;
use crate::memory::search::RetrievalPipeline;
use crate::retry::RetryPolicy;
use crate::store::MemoryStore;

/// Results keyed by conversation index, questions in dataset order.
pub type RunResults = BTreeMap<usize, Vec<QuestionResult>>;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IngestReport {
    pub conversations: usize,
    pub skipped: usize,
    pub memories: usize,
}

fn progress_bar(len: u64, visible: bool, template: &str) -> ProgressBar {
    if !visible {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(len);
    pb.set_style(
        ProgressStyle::default_bar()
            .template(template)
            .expect("valid template")
            .progress_chars("##-"),
    );
    pb
}

/// Load every conversation into the store, one user scope per speaker.
///
/// Both speakers receive every turn as `"{speaker}: {text}"` stamped with the
/// session's date. Existing memories of the two scopes are cleared first. A
/// conversation with a turn by an unknown speaker is skipped before anything
/// is written.
pub async fn ingest_dataset(
    store: Arc<dyn MemoryStore>,
    items: &[DatasetItem],
    retry: &RetryPolicy,
    show_progress: bool,
) -> Result<IngestReport> {
    let total_turns: usize = items
        .iter()
        .flat_map(|i| &i.conversation.sessions)
        .map(|s| s.turns.len())
        .sum();
    let pb = progress_bar(
        (total_turns * 2) as u64,
        show_progress,
        "  Ingesting {bar:40.cyan/blue} {pos}/{len} memories ({eta})",
    );

    let mut report = IngestReport::default();
    for item in items {
        if let Err(e) = item.conversation.validate_speakers() {
            error!(conversation = item.index, error = %e, "skipping conversation");
            report.skipped += 1;
            continue;
        }

        let (user_a, user_b) = (item.speaker_a_user_id(), item.speaker_b_user_id());
        for user_id in [&user_a, &user_b] {
            let removed = retry
                .run("store delete_user", || store.delete_user(user_id))
                .await?;
            if removed > 0 {
                info!(user_id = %user_id, removed, "cleared existing memories");
            }
        }

        let (added_a, added_b) = tokio::join!(
            ingest_speaker(store.as_ref(), &user_a, item, retry, &pb),
            ingest_speaker(store.as_ref(), &user_b, item, retry, &pb),
        );
        report.memories += added_a? + added_b?;
        report.conversations += 1;
    }

    pb.finish_and_clear();
    info!(
        conversations = report.conversations,
        skipped = report.skipped,
        memories = report.memories,
        "ingestion complete"
    );
    Ok(report)
}

async fn ingest_speaker(
    store: &dyn MemoryStore,
    user_id: &str,
    item: &DatasetItem,
    retry: &RetryPolicy,
    pb: &ProgressBar,
) -> Result<usize> {
    let mut added = 0;
    for session in &item.conversation.sessions {
        for turn in &session.turns {
            let text = format!("{}: {}", turn.speaker, turn.text);
            retry
                .run("store add", || store.add(user_id, &text, Some(session.date_time.as_str())))
                .await
                .with_context(|| format!("failed to add memory for {user_id}"))?;
            added += 1;
            pb.inc(1);
        }
    }
    Ok(added)
}

/// Knobs for [`process_dataset`].
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub workers: usize,
    pub batch_size: usize,
    pub output_path: PathBuf,
    pub show_progress: bool,
}

impl RunOptions {
    pub fn from_config(config: &RunnerConfig) -> Self {
        Self {
            workers: config.workers,
            batch_size: config.batch_size,
            output_path: crate::config::expand_tilde(&config.output_path),
            show_progress: true,
        }
    }
}

struct Job {
    conversation: usize,
    qa: QaItem,
    speaker_a: String,
    speaker_b: String,
}

/// Answer every question in the dataset.
///
/// Questions are taken in batches of `batch_size`; a batch runs on at most
/// `workers` concurrent tasks and its results are appended in dataset order.
/// The whole result map is rewritten after each batch. A failed question is
/// logged and left out.
pub async fn process_dataset(
    pipeline: Arc<RetrievalPipeline>,
    items: &[DatasetItem],
    options: &RunOptions,
) -> Result<RunResults> {
    let jobs: Vec<Job> = items
        .iter()
        .flat_map(|item| {
            let (speaker_a, speaker_b) = (item.speaker_a_user_id(), item.speaker_b_user_id());
            item.qa.iter().map(move |qa| Job {
                conversation: item.index,
                qa: qa.clone(),
                speaker_a: speaker_a.clone(),
                speaker_b: speaker_b.clone(),
            })
        })
        .collect();

    let batch_size = options.batch_size.max(1);
    let pb = progress_bar(
        jobs.len() as u64,
        options.show_progress,
        "  Answering {bar:40.cyan/blue} {pos}/{len} questions ({eta})",
    );

    let mut results = RunResults::new();
    let mut failed = 0usize;
    let mut jobs = jobs.into_iter().peekable();
    while jobs.peek().is_some() {
        let batch: Vec<Job> = jobs.by_ref().take(batch_size).collect();
        let permits = Arc::new(Semaphore::new(options.workers.clamp(1, batch.len())));

        let mut set = JoinSet::new();
        for (position, job) in batch.into_iter().enumerate() {
            let pipeline = Arc::clone(&pipeline);
            let permits = Arc::clone(&permits);
            set.spawn(async move {
                let _permit = permits.acquire_owned().await;
                let outcome = pipeline
                    .answer_question(&job.speaker_a, &job.speaker_b, &job.qa)
                    .await;
                (position, job, outcome)
            });
        }

        let mut finished = Vec::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(done) => finished.push(done),
                Err(e) => {
                    error!(error = %e, "question task panicked");
                    failed += 1;
                }
            }
            pb.inc(1);
        }
        finished.sort_by_key(|(position, _, _)| *position);

        for (_, job, outcome) in finished {
            match outcome {
                Ok(result) => results.entry(job.conversation).or_default().push(result),
                Err(e) => {
                    error!(
                        conversation = job.conversation,
                        question = %job.qa.question,
                        error = %e,
                        "skipping question"
                    );
                    failed += 1;
                }
            }
        }

        save_results(&options.output_path, &results)?;
    }

    pb.finish_and_clear();
    if failed > 0 {
        warn!(failed, "some questions were skipped");
    }
    info!(
        answered = results.values().map(Vec::len).sum::<usize>(),
        output = %options.output_path.display(),
        "run complete"
    );
    Ok(results)
}

/// Write the results map as pretty JSON. Uses atomic write (tmp + rename).
pub fn save_results(path: &Path, results: &RunResults) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create output dir: {}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(results).context("failed to serialize results")?;
    let tmp_path = path.with_extension("tmp");
    std::fs::write(&tmp_path, json)
        .with_context(|| format!("failed to write temp file: {}", tmp_path.display()))?;
    std::fs::rename(&tmp_path, path).context("failed to rename temp file")?;
    Ok(())
}
