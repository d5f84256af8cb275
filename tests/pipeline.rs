#![cfg(test)]

use std::sync::{Arc, Mutex};

use aiops_bot::{
    base::{
        config::{Config, ConfigInner},
        types::{AgentEvent, AgentRequest, CitationType, KnowledgeHit, KnowledgePoint, Message, NotificationPayload, ProactiveReply, Res, ReviewStatus, Void},
    },
    pipeline::{
        Pipelines, Services,
        proactive::ProactiveOutcome,
        review::ReviewOutcome,
        session::{SessionKey, SessionStore},
    },
    service::{
        agent::{AgentClient, AgentEventStream, GenericAgentClient},
        db::{DbClient, GenericDbClient},
        embedding::{EmbeddingClient, GenericEmbeddingClient},
        knowledge::{GenericKnowledgeClient, KnowledgeClient},
        notify::{GenericNotifier, NotifyClient},
    },
};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use mockall::{mock, predicate::eq};
use serde_json::{Value, json};

// Mocks.

mock! {
    pub Agent {}

    #[async_trait]
    impl GenericAgentClient for Agent {
        async fn run(&self, session: &SessionKey, request: &AgentRequest) -> Res<AgentEventStream>;
    }
}

mock! {
    pub Knowledge {}

    #[async_trait]
    impl GenericKnowledgeClient for Knowledge {
        async fn search(&self, collection: &str, query: &str, top_k: u32) -> Res<Vec<KnowledgeHit>>;
        async fn upsert(&self, collection: &str, point: &KnowledgePoint) -> Res<String>;
        async fn delete(&self, collection: &str, key: &str) -> Void;
    }
}

mock! {
    pub Embedding {}

    #[async_trait]
    impl GenericEmbeddingClient for Embedding {
        async fn create(&self, texts: &[String]) -> Res<Vec<Vec<f32>>>;
    }
}

mock! {
    pub Notifier {}

    #[async_trait]
    impl GenericNotifier for Notifier {
        async fn send(&self, bot: &str, payload: &NotificationPayload) -> Void;
    }
}

mock! {
    pub Db {}

    #[async_trait]
    impl GenericDbClient for Db {
        async fn save_message(&self, message: &Message) -> Void;
        async fn get_message(&self, message_id: &str) -> Res<Option<Message>>;
        async fn get_messages_between(&self, chat_id: &str, start: DateTime<Utc>, end: DateTime<Utc>) -> Res<Vec<Message>>;
        async fn get_recent_messages_between(&self, chat_id: &str, start: DateTime<Utc>, end: DateTime<Utc>, limit: u32) -> Res<Vec<Message>>;
        async fn get_messages_before(&self, chat_id: &str, timestamp: DateTime<Utc>, limit: u32) -> Res<Vec<Message>>;
        async fn get_messages_after(&self, chat_id: &str, timestamp: DateTime<Utc>, limit: u32) -> Res<Vec<Message>>;
    }
}

/// A knowledge base whose calls never complete.
struct StalledKnowledge;

#[async_trait]
impl GenericKnowledgeClient for StalledKnowledge {
    async fn search(&self, _collection: &str, _query: &str, _top_k: u32) -> Res<Vec<KnowledgeHit>> {
        futures::future::pending().await
    }

    async fn upsert(&self, _collection: &str, _point: &KnowledgePoint) -> Res<String> {
        futures::future::pending().await
    }

    async fn delete(&self, _collection: &str, _key: &str) -> Void {
        futures::future::pending().await
    }
}

// Helpers.

const QUERY_EMBEDDING: [f32; 3] = [1.0, 0.0, 0.0];
const ANSWER_EMBEDDING: [f32; 3] = [0.0, 1.0, 0.0];

fn config() -> Config {
    config_with(|_| {})
}

fn config_with(adjust: impl FnOnce(&mut ConfigInner)) -> Config {
    let mut inner = ConfigInner {
        bot_name: "aiops-bot".to_string(),
        knowledge_collections: vec!["runbooks".to_string()],
        knowledge_top_k: 5,
        review_collection: Some("qa".to_string()),
        similarity_threshold: 0.7,
        similarity_lookback_secs: 3600,
        similarity_lookback_limit: 100,
        history_window: 20,
        stage_timeout_secs: 30,
        review_context_window: 10,
        ..Default::default()
    };
    adjust(&mut inner);

    Config { inner: Arc::new(inner) }
}

fn message(id: &str, secs: i64) -> Message {
    Message {
        id: id.to_string(),
        chat_id: "C1".to_string(),
        sender: "U2".to_string(),
        channel: "slack".to_string(),
        thread_ts: "1700000000.000100".to_string(),
        timestamp: Utc.timestamp_opt(secs, 0).unwrap(),
        content: "Hi all, the payments gateway returns 502 after deploy, how do I fix it?".to_string(),
        ..Default::default()
    }
}

fn prior_reply(id: &str, answer_embedding: Vec<f32>, query_embedding: Vec<f32>) -> Message {
    prior_reply_at(id, 1_700_000_000 - 60, answer_embedding, query_embedding)
}

fn prior_reply_at(id: &str, secs: i64, answer_embedding: Vec<f32>, query_embedding: Vec<f32>) -> Message {
    Message {
        proactive_reply: Some(ProactiveReply {
            query: "earlier".to_string(),
            answer: Some("earlier answer".to_string()),
            answer_embedding: Some(answer_embedding),
            query_embedding: Some(query_embedding),
            ..Default::default()
        }),
        ..message(id, secs)
    }
}

fn hit(key: &str) -> KnowledgeHit {
    KnowledgeHit {
        key: key.to_string(),
        kind: CitationType::Document,
        title: Some(format!("Runbook {key}")),
        content: Some("Roll back the gateway config.".to_string()),
        question: None,
        answer: None,
        source: None,
        updated_at: Some(1_700_000_000),
    }
}

/// An agent whose event stream never ends.
fn stalled_agent() -> AgentClient {
    let mut mock = MockAgent::new();
    mock.expect_run().returning(|_, _| Ok(Box::pin(futures::stream::pending::<Res<AgentEvent>>())));

    AgentClient::new(Arc::new(mock))
}

/// An agent that answers each stage with its scripted output, or with no final event when the
/// stage is not scripted.  The `failing` stage returns an error.
fn agent(outputs: Vec<(&'static str, Value)>, failing: Option<&'static str>) -> AgentClient {
    let mut mock = MockAgent::new();

    mock.expect_run().returning(move |_, request| {
        if failing == Some(request.name.as_str()) {
            return Err(anyhow::anyhow!("agent runtime crashed"));
        }

        let events = outputs
            .iter()
            .filter(|(name, _)| *name == request.name)
            .map(|(name, output)| AgentEvent {
                author: name.to_string(),
                text: None,
                output: Some(output.clone()),
                is_final: true,
            })
            .collect::<Vec<_>>();

        Ok(Box::pin(futures::stream::iter(events.into_iter().map(Ok::<AgentEvent, anyhow::Error>))))
    });

    AgentClient::new(Arc::new(mock))
}

fn proactive_outputs(analysis: Value) -> Vec<(&'static str, Value)> {
    vec![
        ("identify", json!({ "within_scope": true, "thinking": "A troubleshooting question." })),
        (
            "rewrite",
            json!({ "overall_query": "How to fix payments gateway 502 errors after deploy?", "sub_queries": ["How to fix payments gateway 502 errors after deploy?"] }),
        ),
        ("analysis", analysis),
    ]
}

fn answerable() -> Value {
    json!({ "thinking": "Runbook 1 covers it.", "is_answerable": true, "answer": "## Fix\nRoll back the gateway config.", "citations": [1, 9] })
}

fn knowledge() -> KnowledgeClient {
    let mut mock = MockKnowledge::new();
    mock.expect_search().returning(|_, _, _| Ok(vec![hit("k1"), hit("k2")]));

    KnowledgeClient::new(Arc::new(mock))
}

/// Embeds `[query, answer]` when there is an answer, and `[query]` when there is not.
fn embedding() -> EmbeddingClient {
    let mut mock = MockEmbedding::new();
    mock.expect_create().times(1).returning(|texts| match texts.len() {
        1 => Ok(vec![QUERY_EMBEDDING.to_vec()]),
        2 => Ok(vec![QUERY_EMBEDDING.to_vec(), ANSWER_EMBEDDING.to_vec()]),
        n => panic!("unexpected embedding batch of {n}"),
    });

    EmbeddingClient::new(Arc::new(mock))
}

fn notifier(times: usize, sent: Arc<Mutex<Vec<NotificationPayload>>>) -> NotifyClient {
    let mut mock = MockNotifier::new();
    mock.expect_send().times(times).returning(move |bot, payload| {
        assert_eq!(bot, "aiops-bot");
        sent.lock().unwrap().push(payload.clone());
        Ok(())
    });

    NotifyClient::new(Arc::new(mock))
}

/// Keep the newest `limit` messages, in ascending time order.
fn newest(mut messages: Vec<Message>, limit: u32) -> Vec<Message> {
    messages.sort_by_key(|m| m.timestamp);
    let skip = messages.len().saturating_sub(limit as usize);

    messages.split_off(skip)
}

/// A message store that holds `stored` and records every save into `saved`.
///
/// Range queries are scoped to the chat and honor their window and limit.
fn db(stored: Vec<Message>, saved: Arc<Mutex<Vec<Message>>>) -> DbClient {
    let mut mock = MockDb::new();
    let in_chat = |messages: &[Message], chat_id: &str| messages.iter().filter(|m| m.chat_id == chat_id).cloned().collect::<Vec<_>>();

    let by_id = stored.clone();
    mock.expect_get_message().returning(move |id| Ok(by_id.iter().find(|m| m.id == id).cloned()));

    let between = stored.clone();
    mock.expect_get_messages_between()
        .returning(move |chat, start, end| Ok(in_chat(&between, chat).into_iter().filter(|m| m.timestamp >= start && m.timestamp <= end).collect()));

    let recent = stored.clone();
    mock.expect_get_recent_messages_between().returning(move |chat, start, end, limit| {
        let window = in_chat(&recent, chat).into_iter().filter(|m| m.timestamp >= start && m.timestamp < end).collect();
        Ok(newest(window, limit))
    });

    let before = stored.clone();
    mock.expect_get_messages_before()
        .returning(move |chat, ts, limit| Ok(newest(in_chat(&before, chat).into_iter().filter(|m| m.timestamp < ts).collect(), limit)));

    mock.expect_get_messages_after().returning(move |chat, ts, limit| {
        let mut after = in_chat(&stored, chat).into_iter().filter(|m| m.timestamp > ts).collect::<Vec<_>>();
        after.sort_by_key(|m| m.timestamp);
        after.truncate(limit as usize);
        Ok(after)
    });

    mock.expect_save_message().returning(move |message| {
        saved.lock().unwrap().push(message.clone());
        Ok(())
    });

    DbClient::new(Arc::new(mock))
}

fn pipelines(db: DbClient, agent: AgentClient, kb: Option<KnowledgeClient>, embedding: EmbeddingClient, notify: NotifyClient) -> Pipelines {
    pipelines_with(config(), db, agent, kb, embedding, notify)
}

fn pipelines_with(config: Config, db: DbClient, agent: AgentClient, kb: Option<KnowledgeClient>, embedding: EmbeddingClient, notify: NotifyClient) -> Pipelines {
    Pipelines::new(&Services {
        config,
        db,
        agent,
        kb,
        embedding,
        notify,
        sessions: SessionStore::memory(),
    })
}

fn unused_embedding() -> EmbeddingClient {
    EmbeddingClient::new(Arc::new(MockEmbedding::new()))
}

fn unused_notifier() -> NotifyClient {
    NotifyClient::new(Arc::new(MockNotifier::new()))
}

fn saved_reply(saved: &Arc<Mutex<Vec<Message>>>) -> ProactiveReply {
    let saved = saved.lock().unwrap();
    assert_eq!(saved.len(), 1);

    saved[0].proactive_reply.clone().unwrap()
}

// Proactive tests.

#[tokio::test]
async fn test_first_answer_is_persisted_and_notified() {
    let saved = Arc::new(Mutex::new(Vec::new()));
    let sent = Arc::new(Mutex::new(Vec::new()));
    let pipelines = pipelines(db(vec![], saved.clone()), agent(proactive_outputs(answerable()), None), Some(knowledge()), embedding(), notifier(1, sent.clone()));

    let outcome = pipelines.proactive.run(&message("m1", 1_700_000_000)).await;

    assert_eq!(outcome, ProactiveOutcome::Answered { notified: true });

    let reply = saved_reply(&saved);
    assert!(reply.is_first_answer);
    assert!(reply.is_first_query);
    assert_eq!(reply.answer_similarity, 0.0);
    assert_eq!(reply.query_similarity, 0.0);
    assert_eq!(reply.answer.as_deref(), Some("Fix\nRoll back the gateway config."));
    assert_eq!(reply.review_status, ReviewStatus::Pending);
    assert_eq!(reply.citations.len(), 1);
    assert_eq!(reply.citations[0].knowledge_key, "k1");

    let sent = sent.lock().unwrap();
    assert_eq!(sent[0].message_id, "m1");
    assert_eq!(sent[0].question, "How to fix payments gateway 502 errors after deploy?");
}

#[tokio::test]
async fn test_repeated_answer_is_persisted_but_not_notified() {
    let saved = Arc::new(Mutex::new(Vec::new()));
    let prior = prior_reply("m0", ANSWER_EMBEDDING.to_vec(), vec![0.0, 0.0, 1.0]);
    let pipelines = pipelines(
        db(vec![prior], saved.clone()),
        agent(proactive_outputs(answerable()), None),
        Some(knowledge()),
        embedding(),
        notifier(0, Arc::default()),
    );

    let outcome = pipelines.proactive.run(&message("m1", 1_700_000_000)).await;

    assert_eq!(outcome, ProactiveOutcome::Answered { notified: false });

    let reply = saved_reply(&saved);
    assert!(!reply.is_first_answer);
    assert!((reply.answer_similarity - 1.0).abs() < 1e-6);
    assert!(reply.is_first_query);
}

#[tokio::test]
async fn test_dissimilar_prior_answer_still_notifies() {
    let saved = Arc::new(Mutex::new(Vec::new()));
    let prior = prior_reply("m0", vec![1.0, 0.0, 0.0], QUERY_EMBEDDING.to_vec());
    let pipelines = pipelines(
        db(vec![prior], saved.clone()),
        agent(proactive_outputs(answerable()), None),
        Some(knowledge()),
        embedding(),
        notifier(1, Arc::default()),
    );

    let outcome = pipelines.proactive.run(&message("m1", 1_700_000_000)).await;

    assert_eq!(outcome, ProactiveOutcome::Answered { notified: true });

    let reply = saved_reply(&saved);
    assert!(reply.is_first_answer);
    assert!(!reply.is_first_query);
}

#[tokio::test]
async fn test_unanswerable_with_answer_is_persisted_without_notification() {
    let saved = Arc::new(Mutex::new(Vec::new()));
    let analysis = json!({ "thinking": "", "is_answerable": false, "answer": "A guess.", "citations": [1] });
    let pipelines = pipelines(db(vec![], saved.clone()), agent(proactive_outputs(analysis), None), Some(knowledge()), embedding(), unused_notifier());

    let outcome = pipelines.proactive.run(&message("m1", 1_700_000_000)).await;

    assert_eq!(outcome, ProactiveOutcome::Unanswerable);

    // Nothing earlier in the chat, so both flags agree with their zero similarities.
    let reply = saved_reply(&saved);
    assert_eq!(reply.answer, None);
    assert_eq!(reply.answer_embedding, None);
    assert_eq!(reply.answer_similarity, 0.0);
    assert!(reply.is_first_answer);
    assert_eq!(reply.query_similarity, 0.0);
    assert!(reply.is_first_query);
    assert_eq!(reply.query_embedding, Some(QUERY_EMBEDDING.to_vec()));
    assert_eq!(reply.query, "How to fix payments gateway 502 errors after deploy?");
}

#[tokio::test]
async fn test_unanswerable_repeated_question_is_not_first_query() {
    let saved = Arc::new(Mutex::new(Vec::new()));
    let prior = prior_reply("m0", ANSWER_EMBEDDING.to_vec(), QUERY_EMBEDDING.to_vec());
    let analysis = json!({ "thinking": "", "is_answerable": false, "answer": null, "citations": [] });
    let pipelines = pipelines(db(vec![prior], saved.clone()), agent(proactive_outputs(analysis), None), Some(knowledge()), embedding(), unused_notifier());

    assert_eq!(pipelines.proactive.run(&message("m1", 1_700_000_000)).await, ProactiveOutcome::Unanswerable);

    let reply = saved_reply(&saved);
    assert!((reply.query_similarity - 1.0).abs() < 1e-6);
    assert!(!reply.is_first_query);
    assert_eq!(reply.answer_similarity, 0.0);
    assert!(reply.is_first_answer);
}

#[tokio::test]
async fn test_null_answer_is_unanswerable() {
    let saved = Arc::new(Mutex::new(Vec::new()));
    let analysis = json!({ "thinking": "", "is_answerable": true, "answer": null, "citations": null });
    let pipelines = pipelines(db(vec![], saved.clone()), agent(proactive_outputs(analysis), None), Some(knowledge()), embedding(), unused_notifier());

    let outcome = pipelines.proactive.run(&message("m1", 1_700_000_000)).await;

    assert_eq!(outcome, ProactiveOutcome::Unanswerable);
    assert_eq!(saved_reply(&saved).answer, None);
}

#[tokio::test]
async fn test_private_message_returns_before_any_call() {
    let pipelines = pipelines(
        DbClient::new(Arc::new(MockDb::new())),
        AgentClient::new(Arc::new(MockAgent::new())),
        Some(KnowledgeClient::new(Arc::new(MockKnowledge::new()))),
        unused_embedding(),
        unused_notifier(),
    );

    let mut private = message("m1", 1_700_000_000);
    private.chat_type = aiops_bot::base::types::ChatType::Private;

    assert_eq!(pipelines.proactive.run(&private).await, ProactiveOutcome::Skipped);
}

#[tokio::test]
async fn test_already_replied_message_is_skipped() {
    let saved = Arc::new(Mutex::new(Vec::new()));
    let replied = prior_reply("m1", ANSWER_EMBEDDING.to_vec(), QUERY_EMBEDDING.to_vec());
    let pipelines = pipelines(
        db(vec![replied.clone()], saved.clone()),
        AgentClient::new(Arc::new(MockAgent::new())),
        None,
        unused_embedding(),
        unused_notifier(),
    );

    // Both the in-hand copy and the stored copy guard the run.
    assert_eq!(pipelines.proactive.run(&replied).await, ProactiveOutcome::Skipped);
    assert_eq!(pipelines.proactive.run(&message("m1", 1_700_000_000 - 60)).await, ProactiveOutcome::Skipped);
    assert!(saved.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_out_of_scope_stops_before_retrieval() {
    let saved = Arc::new(Mutex::new(Vec::new()));
    let outputs = vec![("identify", json!({ "within_scope": false, "thinking": "Just a greeting." }))];
    let pipelines = pipelines(
        db(vec![], saved.clone()),
        agent(outputs, None),
        Some(KnowledgeClient::new(Arc::new(MockKnowledge::new()))),
        unused_embedding(),
        unused_notifier(),
    );

    assert_eq!(pipelines.proactive.run(&message("m1", 1_700_000_000)).await, ProactiveOutcome::OutOfScope);
    assert!(saved.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_empty_rewrite_stops_silently() {
    let saved = Arc::new(Mutex::new(Vec::new()));
    let outputs = vec![
        ("identify", json!({ "within_scope": true, "thinking": "" })),
        ("rewrite", json!({ "overall_query": " ", "sub_queries": ["", "  "] })),
    ];
    let pipelines = pipelines(db(vec![], saved.clone()), agent(outputs, None), None, unused_embedding(), unused_notifier());

    assert_eq!(pipelines.proactive.run(&message("m1", 1_700_000_000)).await, ProactiveOutcome::NoRewrite);
    assert!(saved.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_no_citations_is_persisted_as_unanswerable_without_analysis() {
    let saved = Arc::new(Mutex::new(Vec::new()));
    let mut kb = MockKnowledge::new();
    kb.expect_search().with(eq("runbooks"), eq("How to fix payments gateway 502 errors after deploy?"), eq(5)).times(1).returning(|_, _, _| Ok(vec![]));

    // Analysis fails if it is ever run.
    let outputs = proactive_outputs(json!({})).into_iter().filter(|(name, _)| *name != "analysis").collect();
    let pipelines = pipelines(db(vec![], saved.clone()), agent(outputs, Some("analysis")), Some(KnowledgeClient::new(Arc::new(kb))), embedding(), unused_notifier());

    assert_eq!(pipelines.proactive.run(&message("m1", 1_700_000_000)).await, ProactiveOutcome::Unanswerable);

    let reply = saved_reply(&saved);
    assert!(reply.citations.is_empty());
    assert!(reply.is_first_answer);
    assert!(reply.is_first_query);
}

#[tokio::test]
async fn test_stage_failure_stops_without_persisting_or_notifying() {
    let saved = Arc::new(Mutex::new(Vec::new()));
    let pipelines = pipelines(
        db(vec![], saved.clone()),
        agent(proactive_outputs(answerable()), Some("rewrite")),
        Some(KnowledgeClient::new(Arc::new(MockKnowledge::new()))),
        unused_embedding(),
        unused_notifier(),
    );

    let outcome = pipelines.proactive.run(&message("m1", 1_700_000_000)).await;

    assert_eq!(outcome, ProactiveOutcome::Failed { stage: "rewrite".to_string() });
    assert!(saved.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_embedding_failure_stops_without_persisting() {
    let saved = Arc::new(Mutex::new(Vec::new()));
    let mut embedding = MockEmbedding::new();
    embedding.expect_create().times(1).returning(|_| Err(anyhow::anyhow!("rate limited")));
    let pipelines = pipelines(
        db(vec![], saved.clone()),
        agent(proactive_outputs(answerable()), None),
        Some(knowledge()),
        EmbeddingClient::new(Arc::new(embedding)),
        unused_notifier(),
    );

    let outcome = pipelines.proactive.run(&message("m1", 1_700_000_000)).await;

    assert_eq!(outcome, ProactiveOutcome::Failed { stage: "embedding".to_string() });
    assert!(saved.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_stalled_agent_times_out_without_persisting() {
    let saved = Arc::new(Mutex::new(Vec::new()));
    let pipelines = pipelines_with(
        config_with(|c| c.stage_timeout_secs = 1),
        db(vec![], saved.clone()),
        stalled_agent(),
        Some(KnowledgeClient::new(Arc::new(MockKnowledge::new()))),
        unused_embedding(),
        unused_notifier(),
    );

    let outcome = pipelines.proactive.run(&message("m1", 1_700_000_000)).await;

    assert_eq!(outcome, ProactiveOutcome::Failed { stage: "identify".to_string() });
    assert!(saved.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_stalled_knowledge_base_times_out_as_retrieve() {
    let saved = Arc::new(Mutex::new(Vec::new()));
    let pipelines = pipelines_with(
        config_with(|c| c.stage_timeout_secs = 1),
        db(vec![], saved.clone()),
        agent(proactive_outputs(answerable()), Some("analysis")),
        Some(KnowledgeClient::new(Arc::new(StalledKnowledge))),
        unused_embedding(),
        unused_notifier(),
    );

    let outcome = pipelines.proactive.run(&message("m1", 1_700_000_000)).await;

    assert_eq!(outcome, ProactiveOutcome::Failed { stage: "retrieve".to_string() });
    assert!(saved.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_duplicate_outside_lookback_window_is_ignored() {
    // The duplicate answer is two hours old.
    for (lookback_secs, expect_first) in [(3600, true), (3 * 3600, false)] {
        let saved = Arc::new(Mutex::new(Vec::new()));
        let prior = prior_reply_at("m0", 1_700_000_000 - 7200, ANSWER_EMBEDDING.to_vec(), QUERY_EMBEDDING.to_vec());
        let pipelines = pipelines_with(
            config_with(|c| c.similarity_lookback_secs = lookback_secs),
            db(vec![prior], saved.clone()),
            agent(proactive_outputs(answerable()), None),
            Some(knowledge()),
            embedding(),
            notifier(usize::from(expect_first), Arc::default()),
        );

        let outcome = pipelines.proactive.run(&message("m1", 1_700_000_000)).await;

        assert_eq!(outcome, ProactiveOutcome::Answered { notified: expect_first });

        let reply = saved_reply(&saved);
        assert_eq!(reply.is_first_answer, expect_first);
        assert_eq!(reply.is_first_query, expect_first);
    }
}

#[tokio::test]
async fn test_duplicate_beyond_lookback_limit_is_ignored() {
    // The duplicate is the oldest of three earlier replies; the two newer ones are unrelated.
    let unrelated = vec![0.0, 0.0, 1.0];
    let stored = vec![
        prior_reply_at("m0", 1_700_000_000 - 180, ANSWER_EMBEDDING.to_vec(), QUERY_EMBEDDING.to_vec()),
        prior_reply_at("m1", 1_700_000_000 - 120, unrelated.clone(), unrelated.clone()),
        prior_reply_at("m2", 1_700_000_000 - 60, unrelated.clone(), unrelated),
    ];

    for (limit, expect_first) in [(2, true), (3, false)] {
        let saved = Arc::new(Mutex::new(Vec::new()));
        let pipelines = pipelines_with(
            config_with(|c| c.similarity_lookback_limit = limit),
            db(stored.clone(), saved.clone()),
            agent(proactive_outputs(answerable()), None),
            Some(knowledge()),
            embedding(),
            notifier(usize::from(expect_first), Arc::default()),
        );

        let outcome = pipelines.proactive.run(&message("m3", 1_700_000_000)).await;

        assert_eq!(outcome, ProactiveOutcome::Answered { notified: expect_first });
        assert_eq!(saved_reply(&saved).is_first_answer, expect_first);
    }
}

#[tokio::test]
async fn test_duplicate_in_another_chat_is_ignored() {
    let saved = Arc::new(Mutex::new(Vec::new()));
    let elsewhere = Message {
        chat_id: "C2".to_string(),
        ..prior_reply("m0", ANSWER_EMBEDDING.to_vec(), QUERY_EMBEDDING.to_vec())
    };
    let pipelines = pipelines(
        db(vec![elsewhere], saved.clone()),
        agent(proactive_outputs(answerable()), None),
        Some(knowledge()),
        embedding(),
        notifier(1, Arc::default()),
    );

    let outcome = pipelines.proactive.run(&message("m1", 1_700_000_000)).await;

    assert_eq!(outcome, ProactiveOutcome::Answered { notified: true });

    let reply = saved_reply(&saved);
    assert!(reply.is_first_answer);
    assert!(reply.is_first_query);
}

#[tokio::test]
async fn test_failed_notification_does_not_fail_the_run() {
    let mut notifier = MockNotifier::new();
    notifier.expect_send().times(1).returning(|_, _| Err(anyhow::anyhow!("webhook unreachable")));
    let pipelines = pipelines(
        db(vec![], Arc::default()),
        agent(proactive_outputs(answerable()), None),
        Some(knowledge()),
        embedding(),
        NotifyClient::new(Arc::new(notifier)),
    );

    let outcome = pipelines.proactive.run(&message("m1", 1_700_000_000)).await;

    assert_eq!(outcome, ProactiveOutcome::Answered { notified: true });
}

// Review tests.

fn answered_message() -> Message {
    let mut message = message("m1", 1_700_000_000);
    message.proactive_reply = Some(ProactiveReply {
        query: "How to fix payments gateway 502 errors after deploy?".to_string(),
        answer: Some("Roll back the gateway config.".to_string()),
        citations: vec![hit("k1").into_citation("runbooks"), hit("k2").into_citation("runbooks")],
        is_first_answer: true,
        is_first_query: true,
        ..Default::default()
    });

    message
}

fn review_agent(decision: Option<Value>) -> AgentClient {
    let outputs = decision.map(|d| vec![("review", d)]).unwrap_or_default();
    agent(outputs, None)
}

async fn review(decision: Option<Value>, kb: Option<KnowledgeClient>) -> (ReviewOutcome, Arc<Mutex<Vec<Message>>>) {
    let saved = Arc::new(Mutex::new(Vec::new()));
    let later = Message {
        content: "Rolling back did not help, we had to restart the pods.".to_string(),
        ..message("m2", 1_700_000_000 + 300)
    };
    let pipelines = pipelines(db(vec![answered_message(), later], saved.clone()), review_agent(decision), kb, unused_embedding(), unused_notifier());

    let outcome = pipelines.review.run("m1").await.unwrap();

    (outcome, saved)
}

#[tokio::test]
async fn test_review_pending_and_keep_become_keep_without_kb_calls() {
    for action in ["pending", "keep"] {
        let kb = KnowledgeClient::new(Arc::new(MockKnowledge::new()));
        let (outcome, saved) = review(Some(json!({ "action": action, "question": null, "answer": null, "delete_citation_ids": null })), Some(kb)).await;

        assert_eq!(outcome, ReviewOutcome::Applied(ReviewStatus::Keep));
        assert_eq!(saved_reply(&saved).review_status, ReviewStatus::Keep);
    }
}

#[tokio::test]
async fn test_review_modify_upserts_and_records_key() {
    let mut kb = MockKnowledge::new();
    kb.expect_upsert()
        .withf(|collection, point| collection == "qa" && point.answer == "Restart the gateway pods." && point.source == "review:m1")
        .times(1)
        .returning(|_, _| Ok("qa-42".to_string()));

    let decision = json!({ "action": "modify", "question": "How to fix gateway 502s after deploy?", "answer": "Restart the gateway pods.", "delete_citation_ids": null });
    let (outcome, saved) = review(Some(decision), Some(KnowledgeClient::new(Arc::new(kb)))).await;

    assert_eq!(outcome, ReviewOutcome::Applied(ReviewStatus::Modify));

    let reply = saved_reply(&saved);
    assert_eq!(reply.review_status, ReviewStatus::Modify);
    assert_eq!(reply.modified_query.as_deref(), Some("How to fix gateway 502s after deploy?"));
    assert_eq!(reply.modified_answer.as_deref(), Some("Restart the gateway pods."));
    assert_eq!(reply.knowledge_key.as_deref(), Some("qa-42"));
    assert_eq!(reply.answer.as_deref(), Some("Roll back the gateway config."));
}

#[tokio::test]
async fn test_review_delete_removes_matching_citation_once() {
    let mut kb = MockKnowledge::new();
    kb.expect_delete().with(eq("runbooks"), eq("k1")).times(1).returning(|_, _| Ok(()));

    let decision = json!({ "action": "delete", "question": null, "answer": null, "delete_citation_ids": ["k1"] });
    let (outcome, saved) = review(Some(decision), Some(KnowledgeClient::new(Arc::new(kb)))).await;

    assert_eq!(outcome, ReviewOutcome::Applied(ReviewStatus::Delete));

    let reply = saved_reply(&saved);
    assert_eq!(reply.review_status, ReviewStatus::Delete);
    assert_eq!(reply.deleted_citations, vec!["k1".to_string()]);
}

#[tokio::test]
async fn test_review_without_decision_leaves_record_unchanged() {
    let (outcome, saved) = review(None, None).await;

    assert_eq!(outcome, ReviewOutcome::NoDecision);
    assert!(saved.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_review_modify_without_kb_leaves_record_unchanged() {
    let decision = json!({ "action": "modify", "question": null, "answer": "Restart the pods.", "delete_citation_ids": null });
    let (outcome, saved) = review(Some(decision), None).await;

    assert_eq!(outcome, ReviewOutcome::Unchanged);
    assert!(saved.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_review_of_unanswered_message_is_not_applicable() {
    let saved = Arc::new(Mutex::new(Vec::new()));
    let pipelines = pipelines(
        db(vec![message("m1", 1_700_000_000)], saved.clone()),
        AgentClient::new(Arc::new(MockAgent::new())),
        None,
        unused_embedding(),
        unused_notifier(),
    );

    assert_eq!(pipelines.review.run("m1").await.unwrap(), ReviewOutcome::NotApplicable);
    assert!(pipelines.review.run("missing").await.is_err());
}

// Reactive tests.

#[tokio::test]
async fn test_reactive_answer_lists_cited_sources() {
    let outputs = vec![
        ("rewrite", json!({ "overall_query": "How to fix payments gateway 502 errors?", "sub_queries": [] })),
        ("reactive_analysis", json!({ "thinking": "", "is_answerable": true, "answer": "Roll back the gateway config.", "citations": [2] })),
    ];
    let pipelines = pipelines(db(vec![], Arc::default()), agent(outputs, None), Some(knowledge()), unused_embedding(), unused_notifier());

    let answer = pipelines.reactive.answer(&message("m1", 1_700_000_000)).await.unwrap();

    assert_eq!(answer.as_deref(), Some("Roll back the gateway config.\n\nSources:\n- Runbook k2"));
}

#[tokio::test]
async fn test_reactive_stays_silent_when_unanswerable() {
    let outputs = vec![
        ("rewrite", json!({ "overall_query": "How to fix payments gateway 502 errors?", "sub_queries": [] })),
        ("reactive_analysis", json!({ "thinking": "", "is_answerable": false, "answer": null, "citations": null })),
    ];
    let pipelines = pipelines(db(vec![], Arc::default()), agent(outputs, None), Some(knowledge()), unused_embedding(), unused_notifier());

    assert_eq!(pipelines.reactive.answer(&message("m1", 1_700_000_000)).await.unwrap(), None);
}
