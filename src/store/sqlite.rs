//! SQLite + FTS5 keyword store.
//!
//! Search is BM25 over an OR-joined term list scoped to one speaker. The
//! connection sits behind `Arc<Mutex<_>>` and every call runs on the blocking
//! pool via `spawn_blocking`.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;

use super::{MemoryStore, SearchFilters};
use crate::error::{RecallError, Result};
use crate::memory::types::RawMemory;

#[derive(Clone)]
pub struct SqliteStore {
    db: Arc<Mutex<Connection>>,
}

/// Row counts per speaker.
#[derive(Debug, Serialize)]
pub struct StoreStats {
    pub total_memories: usize,
    pub users: Vec<UserCount>,
    pub schema_version: u32,
}

#[derive(Debug, Serialize)]
pub struct UserCount {
    pub user_id: String,
    pub memories: usize,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        Ok(Self::from_connection(crate::db::open_database(path)?))
    }

    pub fn in_memory() -> anyhow::Result<Self> {
        Ok(Self::from_connection(crate::db::open_memory_database()?))
    }

    pub fn from_connection(conn: Connection) -> Self {
        Self {
            db: Arc::new(Mutex::new(conn)),
        }
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> rusqlite::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || {
            let mut conn = db
                .lock()
                .map_err(|e| RecallError::Store(format!("db lock poisoned: {e}")))?;
            f(&mut conn).map_err(RecallError::from)
        })
        .await
        .map_err(|e| RecallError::Store(format!("db task failed: {e}")))?
    }

    pub async fn stats(&self) -> Result<StoreStats> {
        self.with_conn(|conn| store_stats(conn)).await
    }
}

#[async_trait]
impl MemoryStore for SqliteStore {
    async fn search(
        &self,
        query: &str,
        user_id: &str,
        limit: usize,
        filters: Option<&SearchFilters>,
    ) -> Result<Vec<RawMemory>> {
        // A filter naming another speaker can never match a scoped search.
        if let Some(other) = filters.and_then(|f| f.user_id.as_deref()) {
            if other != user_id {
                return Ok(Vec::new());
            }
        }
        let query = query.to_string();
        let user_id = user_id.to_string();
        self.with_conn(move |conn| fts_search(conn, &query, &user_id, limit))
            .await
    }

    async fn list_all(&self, user_id: &str) -> Result<Vec<RawMemory>> {
        let user_id = user_id.to_string();
        self.with_conn(move |conn| list_user_memories(conn, &user_id))
            .await
    }

    async fn add(&self, user_id: &str, text: &str, timestamp: Option<&str>) -> Result<String> {
        let user_id = user_id.to_string();
        let text = text.to_string();
        let timestamp = timestamp.map(str::to_string);
        self.with_conn(move |conn| insert_memory(conn, &user_id, &text, timestamp.as_deref()))
            .await
    }

    async fn delete_user(&self, user_id: &str) -> Result<usize> {
        let user_id = user_id.to_string();
        self.with_conn(move |conn| delete_user_memories(conn, &user_id))
            .await
    }
}

/// Insert a memory and sync the FTS index in one transaction.
pub fn insert_memory(
    conn: &mut Connection,
    user_id: &str,
    content: &str,
    timestamp: Option<&str>,
) -> rusqlite::Result<String> {
    let id = uuid::Uuid::now_v7().to_string();
    let now = chrono::Utc::now().to_rfc3339();
    let metadata = timestamp.map(|ts| serde_json::json!({ "timestamp": ts }).to_string());

    let tx = conn.transaction()?;
    tx.execute(
        "INSERT INTO memories (id, user_id, content, timestamp, created_at, metadata) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![id, user_id, content, timestamp, now, metadata],
    )?;
    let rowid = tx.last_insert_rowid();
    tx.execute(
        "INSERT INTO memories_fts (rowid, content, id, user_id) VALUES (?1, ?2, ?3, ?4)",
        params![rowid, content, id, user_id],
    )?;
    tx.commit()?;
    Ok(id)
}

/// FTS5 BM25 search scoped to one user.
///
/// FTS5 rank is negative (more negative = better); it is negated and mapped
/// to `r / (1 + r)` so scores fall in `[0, 1)` and keep their order.
pub fn fts_search(
    conn: &Connection,
    query_text: &str,
    user_id: &str,
    limit: usize,
) -> rusqlite::Result<Vec<RawMemory>> {
    let escaped = escape_fts_query(query_text);
    if escaped.is_empty() || limit == 0 {
        return Ok(Vec::new());
    }

    let mut stmt = conn.prepare(
        "SELECT m.id, m.content, m.timestamp, m.metadata, memories_fts.rank \
         FROM memories_fts JOIN memories m ON m.rowid = memories_fts.rowid \
         WHERE memories_fts MATCH ?1 AND m.user_id = ?2 \
         ORDER BY memories_fts.rank LIMIT ?3",
    )?;
    let rows = stmt
        .query_map(params![escaped, user_id, limit as i64], |row| {
            let rank: f64 = row.get(4)?;
            let relevance = (-rank).max(0.0);
            Ok(raw_from_row(
                row.get(0)?,
                row.get(1)?,
                row.get(2)?,
                row.get(3)?,
                Some(relevance / (1.0 + relevance)),
            ))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

pub fn list_user_memories(conn: &Connection, user_id: &str) -> rusqlite::Result<Vec<RawMemory>> {
    let mut stmt = conn.prepare(
        "SELECT id, content, timestamp, metadata FROM memories \
         WHERE user_id = ?1 ORDER BY rowid",
    )?;
    let rows = stmt
        .query_map([user_id], |row| {
            Ok(raw_from_row(row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, None))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

/// Delete a user's rows, removing each from the external-content FTS index
/// first.
pub fn delete_user_memories(conn: &mut Connection, user_id: &str) -> rusqlite::Result<usize> {
    let tx = conn.transaction()?;
    let rows: Vec<(i64, String, String)> = {
        let mut stmt =
            tx.prepare("SELECT rowid, content, id FROM memories WHERE user_id = ?1")?;
        let collected = stmt
            .query_map([user_id], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        collected
    };
    for (rowid, content, id) in &rows {
        tx.execute(
            "INSERT INTO memories_fts (memories_fts, rowid, content, id, user_id) \
             VALUES ('delete', ?1, ?2, ?3, ?4)",
            params![rowid, content, id, user_id],
        )?;
    }
    let deleted = tx.execute("DELETE FROM memories WHERE user_id = ?1", [user_id])?;
    tx.commit()?;
    Ok(deleted)
}

fn store_stats(conn: &Connection) -> rusqlite::Result<StoreStats> {
    let mut stmt = conn.prepare(
        "SELECT user_id, COUNT(*) FROM memories GROUP BY user_id ORDER BY user_id",
    )?;
    let users = stmt
        .query_map([], |row| {
            Ok(UserCount {
                user_id: row.get(0)?,
                memories: row.get::<_, i64>(1)? as usize,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    let schema_version = conn
        .query_row(
            "SELECT value FROM schema_meta WHERE key = 'schema_version'",
            [],
            |row| row.get::<_, String>(0),
        )
        .optional()?
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    Ok(StoreStats {
        total_memories: users.iter().map(|u| u.memories).sum(),
        users,
        schema_version,
    })
}

fn raw_from_row(
    id: String,
    content: String,
    timestamp: Option<String>,
    metadata: Option<String>,
    score: Option<f64>,
) -> RawMemory {
    RawMemory {
        id: Some(id),
        memory: Some(content),
        timestamp,
        metadata: metadata.and_then(|m| serde_json::from_str(&m).ok()),
        score,
        ..RawMemory::default()
    }
}

/// Escape a user query for FTS5 MATCH syntax.
///
/// Wraps each whitespace-delimited word in double quotes and joins with `OR`
/// so any matching term contributes. Tokens without an alphanumeric
/// character are dropped.
fn escape_fts_query(query: &str) -> String {
    query
        .split_whitespace()
        .map(|word| word.replace('"', ""))
        .filter(|w| w.chars().any(char::is_alphanumeric))
        .map(|w| format!("\"{w}\""))
        .collect::<Vec<_>>()
        .join(" OR ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_memory_database;

    fn test_db() -> Connection {
        open_memory_database().unwrap()
    }

    #[test]
    fn test_escape_fts_query() {
        assert_eq!(escape_fts_query("hello world"), "\"hello\" OR \"world\"");
        assert_eq!(escape_fts_query("say \"hi\""), "\"say\" OR \"hi\"");
        assert_eq!(escape_fts_query("  spaces ? "), "\"spaces\"");
        assert_eq!(escape_fts_query(""), "");
    }

    #[test]
    fn search_is_scoped_and_ranked() {
        let mut conn = test_db();
        insert_memory(&mut conn, "sarah_0", "Sarah works at Acme", Some("2024-01-01")).unwrap();
        insert_memory(&mut conn, "sarah_0", "Sarah likes hiking in the hills", None).unwrap();
        insert_memory(&mut conn, "tom_0", "Tom works at Acme too", None).unwrap();
        for filler in ["Tom bakes bread", "Tom plays chess", "Tom owns a cat", "Tom reads novels"] {
            insert_memory(&mut conn, "tom_0", filler, None).unwrap();
        }

        let results = fts_search(&conn, "where does Sarah work at Acme?", "sarah_0", 10).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].memory.as_deref(), Some("Sarah works at Acme"));
        let first = results[0].score.unwrap();
        let second = results[1].score.unwrap();
        assert!(first > second);
        assert!((0.0..1.0).contains(&first));

        let ts = results[0].metadata.as_ref().unwrap()["timestamp"].as_str();
        assert_eq!(ts, Some("2024-01-01"));
    }

    #[test]
    fn search_without_terms_is_empty() {
        let mut conn = test_db();
        insert_memory(&mut conn, "u", "anything", None).unwrap();
        assert!(fts_search(&conn, " ?! ", "u", 10).unwrap().is_empty());
        assert!(fts_search(&conn, "nomatch", "u", 10).unwrap().is_empty());
    }

    #[test]
    fn list_keeps_insertion_order() {
        let mut conn = test_db();
        for text in ["first", "second", "third"] {
            insert_memory(&mut conn, "u", text, None).unwrap();
        }
        let all = list_user_memories(&conn, "u").unwrap();
        let texts: Vec<_> = all.iter().filter_map(|r| r.memory.as_deref()).collect();
        assert_eq!(texts, vec!["first", "second", "third"]);
        assert!(all.iter().all(|r| r.score.is_none()));
    }

    #[test]
    fn delete_user_clears_rows_and_index() {
        let mut conn = test_db();
        insert_memory(&mut conn, "a", "Melanie paints sunsets", None).unwrap();
        insert_memory(&mut conn, "b", "Melanie runs", None).unwrap();
        assert_eq!(delete_user_memories(&mut conn, "a").unwrap(), 1);
        assert!(fts_search(&conn, "paints", "a", 10).unwrap().is_empty());
        assert_eq!(fts_search(&conn, "Melanie", "b", 10).unwrap().len(), 1);
        conn.execute("INSERT INTO memories_fts(memories_fts) VALUES('integrity-check')", [])
            .unwrap();
    }

    #[tokio::test]
    async fn async_store_round_trip() {
        let store = SqliteStore::in_memory().unwrap();
        let id = store.add("u", "Caroline went to a support group", Some("8 May 2023")).await.unwrap();
        let hits = store.search("support group", "u", 5, None).await.unwrap();
        assert_eq!(hits[0].id.as_deref(), Some(id.as_str()));

        let other = SearchFilters::for_user("v");
        assert!(store.search("support", "u", 5, Some(&other)).await.unwrap().is_empty());

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.total_memories, 1);
        assert_eq!(stats.users[0].user_id, "u");
        assert_eq!(stats.schema_version, crate::db::schema::SCHEMA_VERSION);
    }
}
