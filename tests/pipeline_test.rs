mod helpers;

use std::sync::Arc;

use helpers::{
    pipeline, test_config, FailingStore, InMemoryStore, ListAllFailingStore, PromptKind,
    ScriptedGenerator,
};
use memhop::dataset::QaItem;
use memhop::error::RecallError;
use memhop::memory::multi_hop::SINGLE_HOP_TRACE;
use memhop::memory::types::MemoryRecord;

fn scored(id: &str, score: f64) -> MemoryRecord {
    MemoryRecord::new(id, format!("memory {id}")).with_score(score)
}

fn ids(records: &[MemoryRecord]) -> Vec<&str> {
    records.iter().map(|r| r.id.as_str()).collect()
}

#[tokio::test]
async fn rerank_failure_falls_back_to_original_scores() {
    let generator = Arc::new(ScriptedGenerator::failing());
    let p = pipeline(Arc::new(InMemoryStore::default()), generator.clone(), &test_config());

    let ranked = p
        .rerank("anything", vec![scored("a", 0.2), scored("b", 0.9), scored("c", 0.5)])
        .await;

    assert_eq!(ids(&ranked), vec!["b", "c", "a"]);
    assert!(ranked.iter().all(|r| r.rerank_score.is_none()));
    assert_eq!(generator.calls_of(PromptKind::Rerank).len(), 3);
}

#[tokio::test]
async fn rerank_keeps_original_score_for_missing_index() {
    let generator = Arc::new(ScriptedGenerator::new(|_, _| Ok(r#"{"0": 0.1}"#.into())));
    let p = pipeline(Arc::new(InMemoryStore::default()), generator, &test_config());

    let ranked = p
        .rerank("anything", vec![scored("a", 0.2), scored("b", 0.9), scored("c", 0.5)])
        .await;

    assert_eq!(ids(&ranked), vec!["b", "c", "a"]);
    assert_eq!(ranked[2].rerank_score, Some(0.1));
    assert_eq!(ranked[0].rerank_score, Some(0.9));
}

#[tokio::test]
async fn rerank_runs_one_call_per_batch() {
    let generator = Arc::new(ScriptedGenerator::new(|_, _| Ok("{}".into())));
    let mut config = test_config();
    config.retrieval.rerank_batch_size = 2;
    let p = pipeline(Arc::new(InMemoryStore::default()), generator.clone(), &config);

    let records = (0..5).map(|i| scored(&i.to_string(), i as f64 / 10.0)).collect();
    let ranked = p.rerank("q", records).await;

    assert_eq!(ranked.len(), 5);
    assert_eq!(generator.calls_of(PromptKind::Rerank).len(), 3);
    assert_eq!(ranked[0].id, "4");
}

#[tokio::test]
async fn failed_rerank_batch_does_not_touch_other_batches() {
    let generator = Arc::new(ScriptedGenerator::new(|_, prompt| {
        if prompt.contains("\"memory c\"") {
            Err(RecallError::Generator("503 service unavailable".into()))
        } else {
            Ok(r#"{"0": 0.9, "1": 0.05}"#.into())
        }
    }));
    let mut config = test_config();
    config.retrieval.rerank_batch_size = 2;
    let p = pipeline(Arc::new(InMemoryStore::default()), generator.clone(), &config);

    let records = vec![scored("a", 0.4), scored("b", 0.3), scored("c", 0.2), scored("d", 0.1)];
    let ranked = p.rerank("q", records).await;

    assert_eq!(ids(&ranked), vec!["a", "c", "d", "b"]);
    let by_id = |id: &str| ranked.iter().find(|r| r.id == id).unwrap().clone();
    assert_eq!(by_id("a").rerank_score, Some(0.9));
    assert_eq!(by_id("b").rerank_score, Some(0.05));
    assert_eq!(by_id("c").rerank_score, None);
    assert_eq!(by_id("c").score, 0.2);
    assert_eq!(by_id("d").rerank_score, None);
    assert_eq!(by_id("d").score, 0.1);
    // one call for the first batch, the full retry budget for the second
    assert_eq!(
        generator.calls_of(PromptKind::Rerank).len(),
        1 + test_config().retry.max_attempts as usize
    );
}

#[tokio::test]
async fn expansion_falls_back_to_the_question() {
    let generator = Arc::new(ScriptedGenerator::new(|_, _| Ok("I cannot help with that".into())));
    let p = pipeline(Arc::new(InMemoryStore::default()), generator.clone(), &test_config());

    let queries = p.expand_query("When did Sarah move?", 2).await;

    assert_eq!(queries, vec!["When did Sarah move?"]);
    assert_eq!(generator.calls_of(PromptKind::Expansion).len(), 3);
}

#[tokio::test]
async fn expansion_puts_the_question_first() {
    let generator = Arc::new(ScriptedGenerator::new(|_, _| {
        Ok("```json\n{\"queries\": [\"Sarah moving date\", \"When did Sarah move?\", \"Sarah new city\", \"extra\"]}\n```".into())
    }));
    let p = pipeline(Arc::new(InMemoryStore::default()), generator, &test_config());

    let queries = p.expand_query("When did Sarah move?", 2).await;

    assert_eq!(queries, vec!["When did Sarah move?", "Sarah moving date", "Sarah new city"]);
}

#[tokio::test]
async fn store_failure_fails_the_search() {
    let store = Arc::new(FailingStore::default());
    let p = pipeline(store.clone(), Arc::new(ScriptedGenerator::failing()), &test_config());

    let err = p.search_speaker("Sarah_0", "Where does Sarah work?").await.unwrap_err();

    assert!(matches!(err, RecallError::Store(_)));
    assert_eq!(*store.calls.lock().unwrap(), test_config().retry.max_attempts as usize);
}

#[tokio::test]
async fn yesterday_prefers_recent_memories() {
    let store = InMemoryStore::with(
        "Sarah_0",
        &[
            ("Sarah: I baked bread with my grandmother", "2024-03-16"),
            ("Sarah: I went hiking at Bear Lake", "2024-06-14"),
        ],
    );
    let p = pipeline(Arc::new(store), Arc::new(ScriptedGenerator::failing()), &test_config());

    let retrieval = p.search_speaker("Sarah_0", "What did Sarah do yesterday?").await.unwrap();

    assert_eq!(retrieval.memories.len(), 2);
    assert_eq!(retrieval.memories[0].timestamp, "2024-06-14");
    assert!(retrieval.memories[0].score > retrieval.memories[1].score);
    assert!(retrieval.graph_relations.is_none());
}

#[tokio::test]
async fn temporal_attention_weights_output() {
    let store = InMemoryStore::with(
        "Sarah_0",
        &[
            ("Sarah: I baked bread with my grandmother", "2024-03-16"),
            ("Sarah: I went hiking at Bear Lake", "2024-06-14"),
            ("Sarah: I love the ocean", ""),
        ],
    );
    let p = pipeline(Arc::new(store), Arc::new(ScriptedGenerator::failing()), &test_config());
    let question = "What did Sarah do yesterday?";

    let mut memories = p.search_speaker("Sarah_0", question).await.unwrap().memories;
    p.apply_temporal_attention(&mut memories, &p.temporal_info(question));

    assert_eq!(memories[0].timestamp, "2024-06-14");
    let undated = memories.iter().find(|m| m.timestamp.is_empty()).unwrap();
    assert_eq!(undated.temporal_weight, Some(1.0));
    assert!(memories.iter().all(|m| m.temporal_weight.is_some()));
}

#[tokio::test]
async fn graph_mode_returns_relations() {
    let store = InMemoryStore::with(
        "Sarah_0",
        &[("Sarah works at Acme", "2024-01-01"), ("Sarah adopted a dog", "2024-02-01")],
    );
    let mut config = test_config();
    config.retrieval.graph_mode = true;
    let p = pipeline(Arc::new(store), Arc::new(ScriptedGenerator::failing()), &config);

    let retrieval = p.search_speaker("Sarah_0", "Where does Sarah work?").await.unwrap();
    let relations = retrieval.graph_relations.unwrap();

    assert!(relations
        .iter()
        .any(|r| r.source == "Sarah" && r.relationship == "works_at" && r.target == "Acme"));
    assert!(!relations.iter().any(|r| r.source == "Acme"));
}

#[tokio::test]
async fn multi_hop_finds_memories_the_search_missed() {
    let store = InMemoryStore::with(
        "Sarah_0",
        &[("Sarah works at Acme", "2024-01-01"), ("Acme is based in Denver", "2024-01-02")],
    );
    let p = pipeline(Arc::new(store), Arc::new(ScriptedGenerator::failing()), &test_config());

    let retrieval = p.search_speaker("Sarah_0", "How is Sarah connected to work?").await.unwrap();

    assert_eq!(retrieval.memories.len(), 2);
    assert_eq!(retrieval.memories[0].memory, "Sarah works at Acme");
    assert_eq!(retrieval.memories[0].hop_level, 0);
    let discovered = &retrieval.memories[1];
    assert_eq!(discovered.memory, "Acme is based in Denver");
    assert_eq!(discovered.hop_level, 1);
    assert_ne!(retrieval.reasoning, SINGLE_HOP_TRACE);
    assert!(retrieval.reasoning.starts_with("Found 1 initial memories"));
}

#[tokio::test]
async fn list_all_failure_keeps_the_ranked_order() {
    let memories = [
        ("Sarah works at Acme", "2024-01-01"),
        ("Sarah moved to Denver for work", "2024-01-02"),
        ("Acme is based in Denver", "2024-01-03"),
    ];
    let question = "How is Sarah connected to work?";
    let store = Arc::new(ListAllFailingStore::with("Sarah_0", &memories));
    let p = pipeline(store.clone(), Arc::new(ScriptedGenerator::failing()), &test_config());

    let retrieval = p.search_speaker("Sarah_0", question).await.unwrap();

    let mut single_hop = test_config();
    single_hop.retrieval.multi_hop = false;
    let baseline = pipeline(
        Arc::new(InMemoryStore::with("Sarah_0", &memories)),
        Arc::new(ScriptedGenerator::failing()),
        &single_hop,
    )
    .search_speaker("Sarah_0", question)
    .await
    .unwrap();

    let texts = |r: &memhop::memory::search::SpeakerRetrieval| {
        r.memories.iter().map(|m| m.memory.clone()).collect::<Vec<_>>()
    };
    assert_eq!(texts(&retrieval), texts(&baseline));
    assert!(retrieval.memories.iter().all(|m| m.hop_level == 0));
    assert_eq!(retrieval.reasoning, SINGLE_HOP_TRACE);
    assert_eq!(*store.list_calls.lock().unwrap(), test_config().retry.max_attempts as usize);
}

#[tokio::test]
async fn graph_is_cached_per_speaker() {
    let store = Arc::new(InMemoryStore::with("Sarah_0", &[("Sarah works at Acme", "")]));
    let p = pipeline(store.clone(), Arc::new(ScriptedGenerator::failing()), &test_config());

    let first = p.speaker_graph("Sarah_0").await.unwrap();
    store.insert("Sarah_0", &[("Sarah lives in Boston", "")]);
    let second = p.speaker_graph("Sarah_0").await.unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert!(second.entity("Boston").is_none());
}

#[tokio::test]
async fn answers_question_from_both_speakers() {
    let store = Arc::new(InMemoryStore::default());
    store.insert(
        "Caroline_0",
        &[
            ("Caroline: I went to the LGBTQ support group yesterday", "1:56 pm on 8 May, 2023"),
            ("Melanie: That sounds great", "1:56 pm on 8 May, 2023"),
        ],
    );
    store.insert(
        "Melanie_0",
        &[("Caroline: I went to the LGBTQ support group yesterday", "1:56 pm on 8 May, 2023")],
    );
    let generator = Arc::new(ScriptedGenerator::new(|kind, _| match kind {
        PromptKind::Expansion => Ok(r#"{"queries": ["Caroline support group date"]}"#.into()),
        PromptKind::Rerank => Ok(r#"{"0": 0.95}"#.into()),
        PromptKind::Answer => Ok(" 7 May 2023\n".into()),
    }));
    let p = pipeline(store, generator.clone(), &test_config());

    let qa = QaItem {
        question: "When did Caroline go to the support group?".into(),
        answer: "7 May 2023".into(),
        category: 2,
        evidence: serde_json::json!(["D1:3"]),
        adversarial_answer: serde_json::Value::Null,
    };
    let result = p.answer_question("Caroline_0", "Melanie_0", &qa).await.unwrap();

    assert_eq!(result.response, "7 May 2023");
    assert_eq!(result.category, 2);
    assert_eq!(result.num_speaker_1_memories, result.speaker_1_memories.len());
    assert!(result.num_speaker_1_memories >= 1);
    assert_eq!(result.num_speaker_2_memories, 1);
    assert!(result.speaker_1_graph_memories.is_none());

    let answers = generator.calls_of(PromptKind::Answer);
    assert_eq!(answers.len(), 1);
    assert!(answers[0].contains("Memories for user Caroline:"));
    assert!(answers[0].contains("Memories for user Melanie:"));
    assert!(answers[0].contains("1:56 pm on 8 May, 2023: Caroline: I went to the LGBTQ support group yesterday"));
}

#[tokio::test]
async fn failed_answer_call_fails_the_question() {
    let store = Arc::new(InMemoryStore::with("A_0", &[("A: hello there", "")]));
    let generator = Arc::new(ScriptedGenerator::new(|kind, _| match kind {
        PromptKind::Answer => Err(RecallError::Generator("rate limited".into())),
        _ => Ok("{}".into()),
    }));
    let p = pipeline(store, generator, &test_config());

    let qa = QaItem {
        question: "What did A say hello?".into(),
        answer: serde_json::Value::Null,
        category: -1,
        evidence: serde_json::Value::Null,
        adversarial_answer: serde_json::Value::Null,
    };
    let err = p.answer_question("A_0", "B_0", &qa).await.unwrap_err();
    assert!(matches!(err, RecallError::Generator(_)));
}

#[tokio::test]
async fn answer_call_uses_the_configured_temperature() {
    let store = Arc::new(InMemoryStore::with("A_0", &[("A: hello there", "")]));
    let generator = Arc::new(ScriptedGenerator::new(|kind, _| match kind {
        PromptKind::Answer => Ok("hello".into()),
        _ => Ok("{}".into()),
    }));
    let mut config = test_config();
    config.generator.temperature = 0.2;
    let p = pipeline(store, generator.clone(), &config);

    let qa = QaItem {
        question: "What did A say hello?".into(),
        answer: serde_json::Value::Null,
        category: -1,
        evidence: serde_json::Value::Null,
        adversarial_answer: serde_json::Value::Null,
    };
    p.answer_question("A_0", "B_0", &qa).await.unwrap();

    assert_eq!(generator.temperatures_of(PromptKind::Answer), vec![0.2]);
    assert!(generator.temperatures_of(PromptKind::Rerank).iter().all(|t| *t == 0.0));
}
