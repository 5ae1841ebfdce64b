//! Answer synthesis over both speakers' retrievals.

use std::time::Instant;

use serde::Serialize;

use super::search::{RetrievalPipeline, SpeakerRetrieval};
use super::types::{RankedMemory, RelationView};
use crate::dataset::QaItem;
use crate::error::Result;
use crate::generator::{ChatMessage, ResponseFormat};

const INSTRUCTIONS: &str = "\
You are a memory assistant answering questions about a conversation between two people.

# CONTEXT:
You can see timestamped memories from both speakers. Some of them are relevant to the question.";

const GRAPH_CONTEXT: &str = "\
You can also see relations extracted for each speaker, linking the people, places, and events they mention.";

const METHOD: &str = "\
# HOW TO ANSWER:
1. Split compound questions into parts and reason about each part in turn.
2. Use the timestamps. Turn relative references (\"last year\", \"two weeks ago\") into \
concrete dates measured from the timestamp of the memory that contains them. When memories \
disagree, prefer the most recent one.
3. Combine memories from both speakers when one memory is not enough.";

const GRAPH_METHOD: &str = "\
4. Follow the relations to connect entities named in the question with memories that never name them directly.";

const PRECISION: &str = "\
# PRECISION:
- Ground the answer in the memories. Never invent facts.
- Prefer specific names, dates and places over vague descriptions.
- Keep the answer to five or six words.";

/// Answer prompt, with or without graph relations.
pub fn answer_prompt_template(graph: bool) -> String {
    let mut template = String::from(INSTRUCTIONS);
    if graph {
        template.push(' ');
        template.push_str(GRAPH_CONTEXT);
    }
    template.push_str("\n\n");
    template.push_str(METHOD);
    if graph {
        template.push('\n');
        template.push_str(GRAPH_METHOD);
    }
    template.push_str("\n\n");
    template.push_str(PRECISION);
    template.push_str("\n\nMemories for user {{speaker_1_user_id}}:\n\n{{speaker_1_memories}}\n\n");
    if graph {
        template.push_str(
            "Relations for user {{speaker_1_user_id}}:\n\n{{speaker_1_graph_memories}}\n\n",
        );
    }
    template.push_str("Memories for user {{speaker_2_user_id}}:\n\n{{speaker_2_memories}}\n\n");
    if graph {
        template.push_str(
            "Relations for user {{speaker_2_user_id}}:\n\n{{speaker_2_graph_memories}}\n\n",
        );
    }
    template.push_str("Question: {{question}}\n\nAnswer:\n");
    template
}

/// `"Caroline_0"` → `"Caroline"`.
pub fn display_name(user_id: &str) -> &str {
    user_id.split('_').next().unwrap_or(user_id)
}

/// Render memories as a pretty JSON array of `"{timestamp}: {memory}"`.
fn render_memories(memories: &[RankedMemory]) -> Result<String> {
    let lines: Vec<String> = memories
        .iter()
        .map(|m| format!("{}: {}", m.timestamp, m.memory))
        .collect();
    Ok(serde_json::to_string_pretty(&lines)?)
}

fn render_relations(relations: Option<&[RelationView]>) -> Result<String> {
    match relations {
        Some(relations) if !relations.is_empty() => Ok(serde_json::to_string_pretty(relations)?),
        _ => Ok("[]".to_string()),
    }
}

pub struct AnswerPrompt<'a> {
    pub speaker_1_user_id: &'a str,
    pub speaker_2_user_id: &'a str,
    pub speaker_1: &'a SpeakerRetrieval,
    pub speaker_2: &'a SpeakerRetrieval,
    pub question: &'a str,
    pub graph: bool,
}

impl AnswerPrompt<'_> {
    pub fn render(&self) -> Result<String> {
        let relations_1 = render_relations(self.speaker_1.graph_relations.as_deref())?;
        let relations_2 = render_relations(self.speaker_2.graph_relations.as_deref())?;
        Ok(answer_prompt_template(self.graph)
            .replace("{{speaker_1_user_id}}", display_name(self.speaker_1_user_id))
            .replace("{{speaker_2_user_id}}", display_name(self.speaker_2_user_id))
            .replace("{{speaker_1_memories}}", &render_memories(&self.speaker_1.memories)?)
            .replace("{{speaker_2_memories}}", &render_memories(&self.speaker_2.memories)?)
            .replace("{{speaker_1_graph_memories}}", &relations_1)
            .replace("{{speaker_2_graph_memories}}", &relations_2)
            .replace("{{question}}", self.question))
    }
}

/// One answered question, as written to the results file.
#[derive(Debug, Clone, Serialize)]
pub struct QuestionResult {
    pub question: String,
    pub answer: serde_json::Value,
    pub category: i64,
    pub evidence: serde_json::Value,
    pub response: String,
    pub adversarial_answer: serde_json::Value,
    pub speaker_1_memories: Vec<RankedMemory>,
    pub speaker_2_memories: Vec<RankedMemory>,
    pub num_speaker_1_memories: usize,
    pub num_speaker_2_memories: usize,
    pub speaker_1_memory_time: f64,
    pub speaker_2_memory_time: f64,
    pub speaker_1_graph_memories: Option<Vec<RelationView>>,
    pub speaker_2_graph_memories: Option<Vec<RelationView>>,
    pub response_time: f64,
}

impl RetrievalPipeline {
    /// Retrieve for both speakers concurrently, weight toward the question's
    /// time frame, and ask the generator for a short answer.
    ///
    /// Store failures and a failed answer call both fail the question.
    pub async fn answer_question(
        &self,
        speaker_1_user_id: &str,
        speaker_2_user_id: &str,
        qa: &QaItem,
    ) -> Result<QuestionResult> {
        let question = qa.question.as_str();
        let (first, second) = tokio::join!(
            self.search_speaker(speaker_1_user_id, question),
            self.search_speaker(speaker_2_user_id, question),
        );
        let (mut first, mut second) = (first?, second?);

        let temporal = self.temporal_info(question);
        self.apply_temporal_attention(&mut first.memories, &temporal);
        self.apply_temporal_attention(&mut second.memories, &temporal);

        let prompt = AnswerPrompt {
            speaker_1_user_id,
            speaker_2_user_id,
            speaker_1: &first,
            speaker_2: &second,
            question,
            graph: self.config().graph_mode,
        }
        .render()?;
        let messages = [ChatMessage::system(prompt)];

        let started = Instant::now();
        let response = self
            .generator_retry()
            .run("answer", || {
                self.generator()
                    .generate(&messages, ResponseFormat::Text, self.answer_temperature())
            })
            .await?;
        let response_time = started.elapsed().as_secs_f64();

        Ok(QuestionResult {
            question: qa.question.clone(),
            answer: qa.answer.clone(),
            category: qa.category,
            evidence: qa.evidence.clone(),
            response: response.trim().to_string(),
            adversarial_answer: qa.adversarial_answer.clone(),
            num_speaker_1_memories: first.memories.len(),
            num_speaker_2_memories: second.memories.len(),
            speaker_1_memory_time: first.elapsed.as_secs_f64(),
            speaker_2_memory_time: second.elapsed.as_secs_f64(),
            speaker_1_memories: first.memories,
            speaker_2_memories: second.memories,
            speaker_1_graph_memories: first.graph_relations,
            speaker_2_graph_memories: second.graph_relations,
            response_time,
        })
    }
}
