use anyhow::Result;

use memhop::config::MemhopConfig;
use memhop::memory::graph::MemoryGraph;
use memhop::memory::types::MemoryRecord;
use memhop::store::{open_store, MemoryStore};

/// Build a speaker's entity graph and print its summary, or the
/// neighbourhood of one entity.
pub async fn graph(
    config: &MemhopConfig,
    user_id: &str,
    entity: Option<&str>,
    depth: usize,
    json: bool,
) -> Result<()> {
    let store = open_store(config)?;
    let records: Vec<MemoryRecord> = store
        .list_all(user_id)
        .await?
        .into_iter()
        .map(MemoryRecord::from)
        .collect();
    let graph = MemoryGraph::from_records(&records);

    let Some(entity) = entity else {
        if json {
            println!("{}", graph.to_json()?);
            return Ok(());
        }
        let stats = graph.stats();
        println!("Graph for {user_id}");
        println!("{}", "=".repeat(40));
        println!("  Entities:             {}", stats.num_entities);
        println!("  Relationships:        {}", stats.num_relationships);
        println!("  Memories:             {}", stats.num_memories);
        println!("  Entities per memory:  {:.2}", stats.avg_entities_per_memory);
        println!("  Memories per entity:  {:.2}", stats.avg_memories_per_entity);
        return Ok(());
    };

    if graph.entity(entity).is_none() {
        println!("No entity named '{entity}' for {user_id}.");
        return Ok(());
    }

    let related = graph.related_entities(entity, depth);
    let memory_ids = graph.related_memories(entity, depth);
    if json {
        let view = serde_json::json!({
            "entity": graph.entity(entity),
            "edges": graph.edges(entity),
            "related_entities": related,
            "related_memories": memory_ids,
        });
        println!("{}", serde_json::to_string_pretty(&view)?);
        return Ok(());
    }

    println!("Edges of {entity}:");
    for edge in graph.edges(entity) {
        if edge.forward {
            println!("  --{}--> {} (strength: {:.2})", edge.kind, edge.target, edge.strength);
        } else {
            println!("  <--{}-- {} (strength: {:.2})", edge.kind, edge.target, edge.strength);
        }
    }
    println!();
    println!("Related within {depth} hop(s): {}", related.len());
    for name in &related {
        println!("  {name}");
    }
    println!();
    println!("Memories ({}):", memory_ids.len());
    for record in records.iter().filter(|r| memory_ids.contains(&r.id)) {
        println!("  {}", super::preview(&record.text, 120));
    }
    Ok(())
}
