use anyhow::Result;

use memhop::config::MemhopConfig;
use memhop::store::open_store;

/// Display store statistics in the terminal.
pub async fn stats(config: &MemhopConfig) -> Result<()> {
    let db_path = config.resolved_db_path();
    let store = open_store(config)?;
    let stats = store.stats().await?;

    println!("Memory Statistics");
    println!("{}", "=".repeat(40));
    println!("  Database:        {}", db_path.display());
    println!("  Schema version:  {}", stats.schema_version);
    println!("  Total memories:  {}", stats.total_memories);
    println!();

    if stats.users.is_empty() {
        println!("No speakers ingested yet.");
        return Ok(());
    }
    println!("By Speaker:");
    for user in &stats.users {
        println!("  {:<24} {}", user.user_id, user.memories);
    }
    Ok(())
}
