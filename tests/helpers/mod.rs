#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::NaiveDateTime;

use memhop::config::MemhopConfig;
use memhop::error::{RecallError, Result};
use memhop::generator::{ChatMessage, ResponseFormat, Role, TextGenerator};
use memhop::memory::search::RetrievalPipeline;
use memhop::memory::types::RawMemory;
use memhop::store::{MemoryStore, SearchFilters};

/// Config with no retry delays and no per-attempt timeout.
pub fn test_config() -> MemhopConfig {
    let mut config = MemhopConfig::default();
    config.retry.store_delay_ms = 0;
    config.retry.generator_delay_ms = 0;
    config.retry.attempt_timeout_secs = 0;
    config
}

pub fn reference_time() -> NaiveDateTime {
    NaiveDateTime::parse_from_str("2024-06-15 12:00:00", "%Y-%m-%d %H:%M:%S").unwrap()
}

pub fn pipeline(
    store: Arc<dyn MemoryStore>,
    generator: Arc<dyn TextGenerator>,
    config: &MemhopConfig,
) -> RetrievalPipeline {
    RetrievalPipeline::new(store, generator, config).with_reference_time(reference_time())
}

/// Which pipeline step a generator call belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptKind {
    Expansion,
    Rerank,
    Answer,
}

pub fn classify(messages: &[ChatMessage]) -> PromptKind {
    match messages.first() {
        Some(m) if m.role == Role::System => PromptKind::Answer,
        Some(m) if m.content.contains("\"queries\"") => PromptKind::Expansion,
        _ => PromptKind::Rerank,
    }
}

type Script = dyn Fn(PromptKind, &str) -> Result<String> + Send + Sync;

/// Generator that answers from a closure and records every prompt with its
/// temperature.
pub struct ScriptedGenerator {
    script: Box<Script>,
    pub calls: Mutex<Vec<(PromptKind, String)>>,
    pub temperatures: Mutex<Vec<(PromptKind, f32)>>,
}

impl ScriptedGenerator {
    pub fn new(script: impl Fn(PromptKind, &str) -> Result<String> + Send + Sync + 'static) -> Self {
        Self {
            script: Box::new(script),
            calls: Mutex::new(Vec::new()),
            temperatures: Mutex::new(Vec::new()),
        }
    }

    /// Every call fails with a transient generator error.
    pub fn failing() -> Self {
        Self::new(|_, _| Err(RecallError::Generator("503 service unavailable".into())))
    }

    pub fn calls_of(&self, kind: PromptKind) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(k, _)| *k == kind)
            .map(|(_, p)| p.clone())
            .collect()
    }

    pub fn temperatures_of(&self, kind: PromptKind) -> Vec<f32> {
        self.temperatures
            .lock()
            .unwrap()
            .iter()
            .filter(|(k, _)| *k == kind)
            .map(|(_, t)| *t)
            .collect()
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    async fn generate(
        &self,
        messages: &[ChatMessage],
        _format: ResponseFormat,
        temperature: f32,
    ) -> Result<String> {
        let kind = classify(messages);
        let prompt = messages.iter().map(|m| m.content.as_str()).collect::<Vec<_>>().join("\n");
        self.calls.lock().unwrap().push((kind, prompt.clone()));
        self.temperatures.lock().unwrap().push((kind, temperature));
        (self.script)(kind, &prompt)
    }
}

/// Store that scores by the share of query words present in a memory.
#[derive(Default)]
pub struct InMemoryStore {
    users: Mutex<BTreeMap<String, Vec<RawMemory>>>,
}

fn words(text: &str) -> BTreeSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() > 2)
        .map(str::to_lowercase)
        .collect()
}

impl InMemoryStore {
    pub fn with(user_id: &str, memories: &[(&str, &str)]) -> Self {
        let store = Self::default();
        store.insert(user_id, memories);
        store
    }

    pub fn insert(&self, user_id: &str, memories: &[(&str, &str)]) {
        let mut users = self.users.lock().unwrap();
        let rows = users.entry(user_id.to_string()).or_default();
        for (text, timestamp) in memories {
            rows.push(RawMemory {
                id: Some(format!("{user_id}-{}", rows.len())),
                memory: Some(text.to_string()),
                timestamp: (!timestamp.is_empty()).then(|| timestamp.to_string()),
                ..Default::default()
            });
        }
    }

    pub fn count(&self, user_id: &str) -> usize {
        self.users.lock().unwrap().get(user_id).map_or(0, Vec::len)
    }
}

#[async_trait]
impl MemoryStore for InMemoryStore {
    async fn search(
        &self,
        query: &str,
        user_id: &str,
        limit: usize,
        _filters: Option<&SearchFilters>,
    ) -> Result<Vec<RawMemory>> {
        let query_words = words(query);
        if query_words.is_empty() {
            return Ok(Vec::new());
        }
        let users = self.users.lock().unwrap();
        let mut hits: Vec<RawMemory> = users
            .get(user_id)
            .into_iter()
            .flatten()
            .filter_map(|row| {
                let text = row.memory.as_deref().unwrap_or_default();
                let shared = words(text).intersection(&query_words).count();
                (shared > 0).then(|| RawMemory {
                    score: Some(shared as f64 / query_words.len() as f64),
                    ..row.clone()
                })
            })
            .collect();
        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap());
        hits.truncate(limit);
        Ok(hits)
    }

    async fn list_all(&self, user_id: &str) -> Result<Vec<RawMemory>> {
        Ok(self.users.lock().unwrap().get(user_id).cloned().unwrap_or_default())
    }

    async fn add(&self, user_id: &str, text: &str, timestamp: Option<&str>) -> Result<String> {
        self.insert(user_id, &[(text, timestamp.unwrap_or_default())]);
        Ok(format!("{user_id}-{}", self.count(user_id) - 1))
    }

    async fn delete_user(&self, user_id: &str) -> Result<usize> {
        Ok(self.users.lock().unwrap().remove(user_id).map_or(0, |rows| rows.len()))
    }
}

/// Store whose every call fails.
#[derive(Default)]
pub struct FailingStore {
    pub calls: Mutex<usize>,
}

impl FailingStore {
    fn fail<T>(&self) -> Result<T> {
        *self.calls.lock().unwrap() += 1;
        Err(RecallError::Store("connection refused".into()))
    }
}

#[async_trait]
impl MemoryStore for FailingStore {
    async fn search(&self, _: &str, _: &str, _: usize, _: Option<&SearchFilters>) -> Result<Vec<RawMemory>> {
        self.fail()
    }

    async fn list_all(&self, _: &str) -> Result<Vec<RawMemory>> {
        self.fail()
    }

    async fn add(&self, _: &str, _: &str, _: Option<&str>) -> Result<String> {
        self.fail()
    }

    async fn delete_user(&self, _: &str) -> Result<usize> {
        self.fail()
    }
}

/// Store that serves searches but cannot list a user's full memory set.
#[derive(Default)]
pub struct ListAllFailingStore {
    pub inner: InMemoryStore,
    pub list_calls: Mutex<usize>,
}

impl ListAllFailingStore {
    pub fn with(user_id: &str, memories: &[(&str, &str)]) -> Self {
        Self {
            inner: InMemoryStore::with(user_id, memories),
            list_calls: Mutex::new(0),
        }
    }
}

#[async_trait]
impl MemoryStore for ListAllFailingStore {
    async fn search(
        &self,
        query: &str,
        user_id: &str,
        limit: usize,
        filters: Option<&SearchFilters>,
    ) -> Result<Vec<RawMemory>> {
        self.inner.search(query, user_id, limit, filters).await
    }

    async fn list_all(&self, _: &str) -> Result<Vec<RawMemory>> {
        *self.list_calls.lock().unwrap() += 1;
        Err(RecallError::Store("list timed out".into()))
    }

    async fn add(&self, user_id: &str, text: &str, timestamp: Option<&str>) -> Result<String> {
        self.inner.add(user_id, text, timestamp).await
    }

    async fn delete_user(&self, user_id: &str) -> Result<usize> {
        self.inner.delete_user(user_id).await
    }
}
