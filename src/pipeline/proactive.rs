//! The proactive reply pipeline.
//!
//! `identify → rewrite → retrieve → analyze → embed and dedup → persist → notify`
//!
//! Every early exit is an outcome rather than an error, and every stage failure (including a
//! timeout) stops the run without persisting anything or sending a notification.

use std::{fmt, future::Future, time::Duration};

use chrono::Duration as ChronoDuration;
use tokio::time::timeout;
use tracing::{error, info, instrument, warn};

use crate::{
    base::{
        config::Config,
        types::{AnalysisResult, Citation, Err, IdentifyResult, Message, NotificationPayload, ProactiveReply, Res, RewriteResult},
    },
    pipeline::{
        Services,
        retrieval::{format_citations, retrieve, select_citations},
        session::{SessionKey, SessionStore},
        similarity::{is_first, prior_embeddings, should_notify, similarity},
        stage::{AgentStage, StageRef, analysis_context, conversation_context},
    },
    service::{db::DbClient, embedding::EmbeddingClient, knowledge::KnowledgeClient, notify::NotifyClient},
};

/// The session app name of proactive runs.
const APP: &str = "proactive";

/// How a proactive run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProactiveOutcome {
    /// The message is private, or was already handled.
    Skipped,
    /// The message is not a question the bot should answer (or identify produced nothing).
    OutOfScope,
    /// The question could not be rewritten into a query.
    NoRewrite,
    /// No answer could be grounded in the knowledge base; the attempt was persisted.
    Unanswerable,
    /// An answer was persisted, and announced when it was new to the chat.
    Answered { notified: bool },
    /// A stage failed or timed out.
    Failed { stage: String },
}

/// A failure of one named stage.
#[derive(Debug)]
struct StageFailure {
    stage: String,
    source: Err,
}

impl StageFailure {
    fn new(stage: &str, source: Err) -> Self {
        Self { stage: stage.to_string(), source }
    }
}

impl fmt::Display for StageFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stage `{}` failed: {:#}", self.stage, self.source)
    }
}

/// The proactive pipeline.
///
/// This is trivially cloneable and can be passed around without the need for `Arc` or `Mutex`.
#[derive(Clone)]
pub struct ProactivePipeline {
    config: Config,
    db: DbClient,
    kb: Option<KnowledgeClient>,
    embedding: EmbeddingClient,
    notify: NotifyClient,
    sessions: SessionStore,
    identify: StageRef<IdentifyResult>,
    rewrite: StageRef<RewriteResult>,
    analysis: StageRef<AnalysisResult>,
}

impl ProactivePipeline {
    pub fn new(services: &Services) -> Self {
        Self {
            config: services.config.clone(),
            db: services.db.clone(),
            kb: services.kb.clone(),
            embedding: services.embedding.clone(),
            notify: services.notify.clone(),
            sessions: services.sessions.clone(),
            identify: AgentStage::identify(&services.config, services.agent.clone()),
            rewrite: AgentStage::rewrite(&services.config, services.agent.clone()),
            analysis: AgentStage::analysis(&services.config, services.agent.clone()),
        }
    }

    /// Run the pipeline over one message.
    ///
    /// Never fails: failures are logged and reported as [`ProactiveOutcome::Failed`].
    #[instrument(name = "ProactivePipeline::run", skip_all, fields(message_id = %message.id, chat_id = %message.chat_id))]
    pub async fn run(&self, message: &Message) -> ProactiveOutcome {
        if message.is_private() {
            info!("Skipping private message.");
            return ProactiveOutcome::Skipped;
        }

        if message.proactive_reply.is_some() {
            info!("Skipping message that already has a proactive reply.");
            return ProactiveOutcome::Skipped;
        }

        let session = SessionKey::new(APP, &message.chat_id, &message.id);

        let outcome = match self.run_stages(&session, message).await {
            Ok(outcome) => outcome,
            Err(failure) => {
                error!(stage = %failure.stage, message_id = %message.id, chat_id = %message.chat_id, "Proactive pipeline stopped: {}", failure);
                ProactiveOutcome::Failed { stage: failure.stage }
            }
        };

        if let Err(err) = self.sessions.remove(&session).await {
            warn!("Failed to remove session: {}", err);
        }

        info!("Proactive pipeline finished with {:?}.", outcome);

        outcome
    }

    async fn run_stages(&self, session: &SessionKey, message: &Message) -> Result<ProactiveOutcome, StageFailure> {
        // The stored copy may have been answered since this one was read.
        if let Some(stored) = self.step("load", self.db.get_message(&message.id)).await?
            && stored.proactive_reply.is_some()
        {
            info!("Stored message already has a proactive reply.");
            return Ok(ProactiveOutcome::Skipped);
        }

        let history = self.step("history", self.db.get_messages_before(&message.chat_id, message.timestamp, self.config.history_window)).await?;
        let context = conversation_context(&history, message);

        // Identify.

        let identify = self.step(self.identify.name(), self.identify.run(session, &self.sessions, &context)).await?;

        match identify {
            Some(identify) if identify.within_scope => {}
            Some(_) => {
                info!("Message is out of scope.");
                return Ok(ProactiveOutcome::OutOfScope);
            }
            None => {
                info!("Identify produced no result; cannot proceed.");
                return Ok(ProactiveOutcome::OutOfScope);
            }
        }

        // Rewrite.

        let rewrite = self.step(self.rewrite.name(), self.rewrite.run(session, &self.sessions, &context)).await?;

        let Some(rewrite) = rewrite else {
            info!("Rewrite produced no result.");
            return Ok(ProactiveOutcome::NoRewrite);
        };

        let sub_queries = rewrite.queries();
        if sub_queries.is_empty() {
            info!("Rewrite produced no usable query.");
            return Ok(ProactiveOutcome::NoRewrite);
        }

        let query = match rewrite.overall_query.trim() {
            "" => sub_queries.join("\n"),
            overall => overall.to_string(),
        };

        // Retrieve.

        let citations = self
            .step("retrieve", async {
                Ok::<_, Err>(match &self.kb {
                    Some(kb) => retrieve(kb, &self.config.knowledge_collections, &sub_queries, self.config.knowledge_top_k).await,
                    None => {
                        warn!("No knowledge base is configured; nothing to retrieve.");
                        Vec::new()
                    }
                })
            })
            .await?;

        if citations.is_empty() {
            info!("No citations found; persisting as unanswerable.");
            self.persist_unanswered(message, query, sub_queries).await?;
            return Ok(ProactiveOutcome::Unanswerable);
        }

        // Analyze.

        let context = analysis_context(&history, &format_citations(&citations), &query);
        let analysis = self.step(self.analysis.name(), self.analysis.run(session, &self.sessions, &context)).await?;

        let Some((analysis, answer)) = analysis.and_then(|a| a.usable_answer().map(|answer| (a, answer))) else {
            info!("Question is not answerable from the citations; persisting as unanswerable.");
            self.persist_unanswered(message, query, sub_queries).await?;
            return Ok(ProactiveOutcome::Unanswerable);
        };

        let selected = select_citations(&citations, analysis.citations.as_deref().unwrap_or_default());

        // Embed and dedup.

        let embeddings = self.step("embedding", self.embedding.create(&[query.clone(), answer.clone()])).await?;
        let [query_embedding, answer_embedding]: [Vec<f32>; 2] = embeddings
            .try_into()
            .map_err(|e: Vec<Vec<f32>>| StageFailure::new("embedding", anyhow::anyhow!("Expected 2 embeddings, received {}.", e.len())))?;

        let prior = self.step("dedup", self.prior_messages(message)).await?;
        let (prior_answers, prior_queries) = prior_embeddings(&prior);

        let answer_similarity = similarity(&answer_embedding, &prior_answers);
        let query_similarity = similarity(&query_embedding, &prior_queries);
        let is_first_answer = is_first(answer_similarity, self.config.similarity_threshold);
        let is_first_query = is_first(query_similarity, self.config.similarity_threshold);

        info!(
            "Compared against {} prior messages: answer similarity {:.3}, query similarity {:.3}.",
            prior.len(),
            answer_similarity,
            query_similarity
        );

        // Persist.

        let reply = ProactiveReply {
            query: query.clone(),
            sub_queries,
            answer: Some(answer.clone()),
            answer_embedding: Some(answer_embedding),
            query_embedding: Some(query_embedding),
            citations: selected.clone(),
            answer_similarity,
            query_similarity,
            is_first_answer,
            is_first_query,
            ..Default::default()
        };

        self.persist(message, reply).await?;

        // Notify.

        if !should_notify(&analysis, is_first_answer) {
            info!("Answer repeats earlier information; not notifying.");
            return Ok(ProactiveOutcome::Answered { notified: false });
        }

        let payload = notification(message, query, answer, selected);
        self.notify.notify(&self.config.bot_name, &payload).await;

        Ok(ProactiveOutcome::Answered { notified: true })
    }

    /// Prior messages of the same chat within the lookback window, most recent last.
    async fn prior_messages(&self, message: &Message) -> Res<Vec<Message>> {
        let lookback = ChronoDuration::seconds(i64::try_from(self.config.similarity_lookback_secs)?);
        let start = message.timestamp - lookback;

        let prior = self
            .db
            .get_recent_messages_between(&message.chat_id, start, message.timestamp, self.config.similarity_lookback_limit)
            .await?
            .into_iter()
            .filter(|m| m.id != message.id)
            .collect();

        Ok(prior)
    }

    /// Persist an attempt that produced no answer.
    ///
    /// There is no answer to compare, so the answer counts as first.  The query is still
    /// embedded and scored against the chat's earlier queries.
    async fn persist_unanswered(&self, message: &Message, query: String, sub_queries: Vec<String>) -> Result<(), StageFailure> {
        let embeddings = self.step("embedding", self.embedding.create(std::slice::from_ref(&query))).await?;
        let [query_embedding]: [Vec<f32>; 1] = embeddings
            .try_into()
            .map_err(|e: Vec<Vec<f32>>| StageFailure::new("embedding", anyhow::anyhow!("Expected 1 embedding, received {}.", e.len())))?;

        let prior = self.step("dedup", self.prior_messages(message)).await?;
        let (_, prior_queries) = prior_embeddings(&prior);

        let query_similarity = similarity(&query_embedding, &prior_queries);

        info!("Compared the query against {} prior messages: similarity {:.3}.", prior.len(), query_similarity);

        let reply = ProactiveReply {
            query,
            sub_queries,
            query_embedding: Some(query_embedding),
            answer_similarity: 0.0,
            query_similarity,
            is_first_answer: is_first(0.0, self.config.similarity_threshold),
            is_first_query: is_first(query_similarity, self.config.similarity_threshold),
            ..Default::default()
        };

        self.persist(message, reply).await
    }

    /// Persist `reply` into the message's reply slot.
    async fn persist(&self, message: &Message, reply: ProactiveReply) -> Result<(), StageFailure> {
        let mut message = message.clone();
        message.proactive_reply = Some(reply);

        self.step("persist", self.db.save_message(&message)).await
    }

    /// Run one unit of work under the stage timeout.
    async fn step<T>(&self, stage: &str, work: impl Future<Output = Res<T>>) -> Result<T, StageFailure> {
        let limit = Duration::from_secs(self.config.stage_timeout_secs);

        match timeout(limit, work).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(StageFailure::new(stage, err)),
            Err(_) => Err(StageFailure::new(stage, anyhow::anyhow!("timed out after {}s", limit.as_secs()))),
        }
    }
}

fn notification(message: &Message, question: String, answer: String, citations: Vec<Citation>) -> NotificationPayload {
    NotificationPayload {
        chat_id: message.chat_id.clone(),
        message_id: message.id.clone(),
        question,
        answer,
        citations,
    }
}
