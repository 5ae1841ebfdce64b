//! Memory store interface.
//!
//! The pipeline only needs keyword/vector `search` and a full `list_all` per
//! speaker; `add` and `delete_user` serve ingestion. [`sqlite::SqliteStore`]
//! is the bundled implementation, created via [`open_store`] from config.

pub mod sqlite;

use async_trait::async_trait;

use crate::error::Result;
use crate::memory::types::RawMemory;

/// Extra constraints passed through to the store on search.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchFilters {
    pub user_id: Option<String>,
}

impl SearchFilters {
    pub fn for_user(user_id: &str) -> Self {
        Self {
            user_id: Some(user_id.to_string()),
        }
    }
}

/// A per-speaker memory store. "No results" is an empty list, never an error.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// Best matches for `query` within `user_id`'s memories, best first.
    async fn search(
        &self,
        query: &str,
        user_id: &str,
        limit: usize,
        filters: Option<&SearchFilters>,
    ) -> Result<Vec<RawMemory>>;

    /// Every memory of `user_id`, in insertion order.
    async fn list_all(&self, user_id: &str) -> Result<Vec<RawMemory>>;

    /// Append a memory and return its id.
    async fn add(&self, user_id: &str, text: &str, timestamp: Option<&str>) -> Result<String>;

    /// Remove every memory of `user_id`, returning how many were deleted.
    async fn delete_user(&self, user_id: &str) -> Result<usize>;
}

/// Open the configured SQLite store.
pub fn open_store(config: &crate::config::MemhopConfig) -> anyhow::Result<sqlite::SqliteStore> {
    sqlite::SqliteStore::open(config.resolved_db_path())
}
