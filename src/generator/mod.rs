//! Text generation interface.
//!
//! The pipeline asks a generator for three things: query expansions and
//! rerank scores (both JSON objects) and the final free-text answer. The
//! [`TextGenerator`] trait is the seam; [`openai::OpenAiGenerator`] talks to
//! any OpenAI-compatible chat-completions endpoint and is created via
//! [`create_generator`] from configuration.

pub mod openai;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::GeneratorConfig;
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Requested shape of the generator's reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseFormat {
    #[default]
    Text,
    JsonObject,
}

#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(
        &self,
        messages: &[ChatMessage],
        format: ResponseFormat,
        temperature: f32,
    ) -> Result<String>;
}

/// Create a text generator from config.
///
/// Only `"openai"` (any OpenAI-compatible endpoint, including Ollama's
/// `/v1`) is supported.
pub fn create_generator(config: &GeneratorConfig) -> anyhow::Result<Box<dyn TextGenerator>> {
    match config.provider.as_str() {
        "openai" => Ok(Box::new(openai::OpenAiGenerator::new(config)?)),
        other => anyhow::bail!("unknown generator provider: {other}. Supported: openai"),
    }
}

/// Cut the first balanced JSON object out of model output, tolerating code
/// fences and chatter around it.
pub fn extract_json(output: &str) -> &str {
    let cleaned = output
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();

    let Some(start) = cleaned.find('{') else {
        return cleaned;
    };
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in cleaned[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return &cleaned[start..start + i + 1];
                }
            }
            _ => {}
        }
    }
    &cleaned[start..]
}
