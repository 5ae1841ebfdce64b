//! LoCoMo-style conversation datasets.
//!
//! The file is a JSON array. Each item has a `qa` list and a `conversation`
//! object holding `speaker_a`, `speaker_b`, and numbered sessions
//! (`session_1`, `session_2`, …) each paired with a `session_N_date_time`
//! string.

use std::path::Path;

use serde::Deserialize;

use crate::error::{RecallError, Result};

#[derive(Debug, Clone, Deserialize)]
pub struct QaItem {
    #[serde(default)]
    pub question: String,
    #[serde(default)]
    pub answer: serde_json::Value,
    #[serde(default = "default_category")]
    pub category: i64,
    #[serde(default)]
    pub evidence: serde_json::Value,
    #[serde(default)]
    pub adversarial_answer: serde_json::Value,
}

fn default_category() -> i64 {
    -1
}

#[derive(Debug, Clone, Deserialize)]
pub struct Turn {
    pub speaker: String,
    pub text: String,
}

#[derive(Debug, Clone)]
pub struct Session {
    pub number: u32,
    pub date_time: String,
    pub turns: Vec<Turn>,
}

#[derive(Debug, Clone)]
pub struct Conversation {
    pub speaker_a: String,
    pub speaker_b: String,
    /// Ordered by session number.
    pub sessions: Vec<Session>,
}

#[derive(Debug, Clone)]
pub struct DatasetItem {
    pub index: usize,
    pub qa: Vec<QaItem>,
    pub conversation: Conversation,
}

impl DatasetItem {
    /// Store scope of speaker A: `"{speaker_a}_{index}"`.
    pub fn speaker_a_user_id(&self) -> String {
        format!("{}_{}", self.conversation.speaker_a, self.index)
    }

    pub fn speaker_b_user_id(&self) -> String {
        format!("{}_{}", self.conversation.speaker_b, self.index)
    }
}

#[derive(Deserialize)]
struct RawItem {
    #[serde(default)]
    qa: Vec<QaItem>,
    conversation: serde_json::Map<String, serde_json::Value>,
}

impl Conversation {
    fn from_map(mut map: serde_json::Map<String, serde_json::Value>, index: usize) -> Result<Self> {
        let mut take_str = |key: &str| -> Result<String> {
            match map.remove(key) {
                Some(serde_json::Value::String(s)) => Ok(s),
                _ => Err(RecallError::Dataset(format!(
                    "conversation {index} has no string field '{key}'"
                ))),
            }
        };
        let speaker_a = take_str("speaker_a")?;
        let speaker_b = take_str("speaker_b")?;

        let mut sessions = Vec::new();
        for (key, value) in &map {
            let Some(number) = session_number(key) else {
                continue;
            };
            let turns: Vec<Turn> = serde_json::from_value(value.clone()).map_err(|e| {
                RecallError::Dataset(format!("conversation {index}, {key}: {e}"))
            })?;
            let date_time = map
                .get(&format!("{key}_date_time"))
                .and_then(|v| v.as_str())
                .ok_or_else(|| {
                    RecallError::Dataset(format!("conversation {index}: {key} has no date_time"))
                })?
                .to_string();
            sessions.push(Session {
                number,
                date_time,
                turns,
            });
        }
        sessions.sort_by_key(|s| s.number);

        Ok(Self {
            speaker_a,
            speaker_b,
            sessions,
        })
    }

    /// Reject turns by anyone but the two participants.
    pub fn validate_speakers(&self) -> Result<()> {
        for session in &self.sessions {
            if let Some(turn) = session
                .turns
                .iter()
                .find(|t| t.speaker != self.speaker_a && t.speaker != self.speaker_b)
            {
                return Err(RecallError::UnknownSpeaker(turn.speaker.clone()));
            }
        }
        Ok(())
    }
}

/// `"session_12"` → `Some(12)`; date keys and anything else → `None`.
fn session_number(key: &str) -> Option<u32> {
    key.strip_prefix("session_")?.parse().ok()
}

/// Parse a dataset from JSON text.
pub fn parse_dataset(json: &str) -> Result<Vec<DatasetItem>> {
    let raw: Vec<RawItem> =
        serde_json::from_str(json).map_err(|e| RecallError::Dataset(e.to_string()))?;
    raw.into_iter()
        .enumerate()
        .map(|(index, item)| {
            Ok(DatasetItem {
                index,
                qa: item.qa,
                conversation: Conversation::from_map(item.conversation, index)?,
            })
        })
        .collect()
}

pub fn load_dataset(path: impl AsRef<Path>) -> Result<Vec<DatasetItem>> {
    let path = path.as_ref();
    let json = std::fs::read_to_string(path)
        .map_err(|e| RecallError::Dataset(format!("{}: {e}", path.display())))?;
    parse_dataset(&json)
}
