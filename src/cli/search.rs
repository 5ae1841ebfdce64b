use anyhow::Result;

use memhop::config::MemhopConfig;

/// Run the retrieval pipeline for one speaker and print the ranked memories.
pub async fn search(config: &MemhopConfig, user_id: &str, question: &str, json: bool) -> Result<()> {
    let pipeline = super::build_pipeline(config)?;
    let mut retrieval = pipeline.search_speaker(user_id, question).await?;
    let temporal = pipeline.temporal_info(question);
    pipeline.apply_temporal_attention(&mut retrieval.memories, &temporal);

    if json {
        println!("{}", serde_json::to_string_pretty(&retrieval)?);
        return Ok(());
    }

    if retrieval.memories.is_empty() {
        println!("No results found.");
        return Ok(());
    }

    println!(
        "Found {} result(s) in {:.2}s (complexity {:.2}, {})\n",
        retrieval.memories.len(),
        retrieval.elapsed.as_secs_f64(),
        retrieval.profile.complexity,
        retrieval.profile.query_type,
    );
    for (i, memory) in retrieval.memories.iter().enumerate() {
        println!(
            "  {}. [{}] {} (score: {:.2}, hop: {})",
            i + 1,
            memory.timestamp,
            super::preview(&memory.memory, 120),
            memory.score,
            memory.hop_level
        );
    }
    println!("\n{}", retrieval.reasoning);

    if let Some(relations) = &retrieval.graph_relations {
        println!("\nRelations:");
        for r in relations {
            println!("  {} --{}--> {}", r.source, r.relationship, r.target);
        }
    }
    Ok(())
}
