use std::path::Path;

use anyhow::Result;

use memhop::compare::{improvement, load_scored, summarize, RunSummary, ScoreSummary};

fn optional(value: Option<f64>) -> String {
    value.map_or_else(|| "-".to_string(), |v| format!("{v:.4}"))
}

fn print_summary(title: &str, summary: &RunSummary) {
    println!("{title}");
    println!("  {:<10} {:>6} {:>8} {:>8} {:>8}", "category", "count", "f1", "bleu", "llm");
    for (category, scores) in &summary.by_category {
        print_row(&category.to_string(), scores);
    }
    print_row("overall", &summary.overall);
    println!();
}

fn print_row(label: &str, scores: &ScoreSummary) {
    println!(
        "  {:<10} {:>6} {:>8.4} {:>8} {:>8}",
        label,
        scores.count,
        scores.f1,
        optional(scores.bleu),
        optional(scores.llm)
    );
}

fn change(baseline: Option<f64>, candidate: Option<f64>) -> String {
    match (baseline, candidate) {
        (Some(b), Some(c)) => match improvement(b, c) {
            (delta, Some(pct)) => format!("{delta:+.4} ({pct:+.2}%)"),
            (delta, None) => format!("{delta:+.4}"),
        },
        _ => "-".to_string(),
    }
}

/// Print both runs' per-category means and the change between them.
pub fn compare(baseline_path: &Path, candidate_path: &Path) -> Result<()> {
    let baseline = summarize(&load_scored(baseline_path)?);
    let candidate = summarize(&load_scored(candidate_path)?);

    print_summary(&format!("Baseline: {}", baseline_path.display()), &baseline);
    print_summary(&format!("Candidate: {}", candidate_path.display()), &candidate);

    println!("Change");
    println!("  {:<10} {:>22} {:>22} {:>22}", "category", "f1", "bleu", "llm");
    let rows = candidate
        .by_category
        .iter()
        .filter_map(|(category, c)| {
            baseline
                .by_category
                .get(category)
                .map(|b| (category.to_string(), b, c))
        })
        .chain(std::iter::once(("overall".to_string(), &baseline.overall, &candidate.overall)));
    for (label, b, c) in rows {
        println!(
            "  {:<10} {:>22} {:>22} {:>22}",
            label,
            change(Some(b.f1), Some(c.f1)),
            change(b.bleu, c.bleu),
            change(b.llm, c.llm)
        );
    }
    Ok(())
}
