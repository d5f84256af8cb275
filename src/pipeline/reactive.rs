//! The reactive reply pipeline.
//!
//! Answers messages addressed to the bot (mentions and private chats) by reusing the rewrite,
//! retrieval, and analysis steps of the proactive pipeline.  There is no identify step and no
//! dedup: the user asked, so the bot answers whenever the knowledge base allows it.

use tracing::{info, instrument, warn};

use crate::{
    base::{
        config::Config,
        types::{AnalysisResult, Message, Res, RewriteResult},
    },
    pipeline::{
        Services,
        retrieval::{format_citations, retrieve, select_citations},
        session::{SessionKey, SessionStore},
        stage::{AgentStage, StageRef, analysis_context, conversation_context},
    },
    service::{db::DbClient, knowledge::KnowledgeClient},
};

/// The session app name of reactive runs.
const APP: &str = "reactive";

/// The reactive pipeline.
///
/// This is trivially cloneable and can be passed around without the need for `Arc` or `Mutex`.
#[derive(Clone)]
pub struct ReactivePipeline {
    config: Config,
    db: DbClient,
    kb: Option<KnowledgeClient>,
    sessions: SessionStore,
    rewrite: StageRef<RewriteResult>,
    analysis: StageRef<AnalysisResult>,
}

impl ReactivePipeline {
    pub fn new(services: &Services) -> Self {
        Self {
            config: services.config.clone(),
            db: services.db.clone(),
            kb: services.kb.clone(),
            sessions: services.sessions.clone(),
            rewrite: AgentStage::rewrite(&services.config, services.agent.clone()),
            analysis: AgentStage::reactive_analysis(&services.config, services.agent.clone()),
        }
    }

    /// Produce the reply text for a message, or `None` when the knowledge base has no answer.
    #[instrument(name = "ReactivePipeline::answer", skip_all, fields(message_id = %message.id, chat_id = %message.chat_id))]
    pub async fn answer(&self, message: &Message) -> Res<Option<String>> {
        let session = SessionKey::new(APP, &message.chat_id, &message.id);

        let result = self.answer_internal(&session, message).await;

        if let Err(err) = self.sessions.remove(&session).await {
            warn!("Failed to remove session: {}", err);
        }

        result
    }

    async fn answer_internal(&self, session: &SessionKey, message: &Message) -> Res<Option<String>> {
        let Some(kb) = &self.kb else {
            warn!("No knowledge base is configured; cannot answer.");
            return Ok(None);
        };

        let history = self.db.get_messages_before(&message.chat_id, message.timestamp, self.config.history_window).await?;
        let context = conversation_context(&history, message);

        let Some(rewrite) = self.rewrite.run(session, &self.sessions, &context).await? else {
            info!("Rewrite produced no result.");
            return Ok(None);
        };

        let queries = rewrite.queries();
        if queries.is_empty() {
            info!("Rewrite produced no usable query.");
            return Ok(None);
        }

        let query = match rewrite.overall_query.trim() {
            "" => queries.join("\n"),
            overall => overall.to_string(),
        };

        let citations = retrieve(kb, &self.config.knowledge_collections, &queries, self.config.knowledge_top_k).await;
        if citations.is_empty() {
            info!("No citations found.");
            return Ok(None);
        }

        let context = analysis_context(&history, &format_citations(&citations), &query);
        let Some(analysis) = self.analysis.run(session, &self.sessions, &context).await? else {
            info!("Analysis produced no result.");
            return Ok(None);
        };

        let Some(answer) = analysis.usable_answer() else {
            info!("Question is not answerable from the citations.");
            return Ok(None);
        };

        let sources = select_citations(&citations, analysis.citations.as_deref().unwrap_or_default())
            .into_iter()
            .filter_map(|c| c.source.or(c.title))
            .collect::<Vec<_>>();

        Ok(Some(with_sources(answer, &sources)))
    }
}

/// Append a source list to an answer.
fn with_sources(answer: String, sources: &[String]) -> String {
    if sources.is_empty() {
        return answer;
    }

    let list = sources.iter().map(|s| format!("- {s}")).collect::<Vec<_>>().join("\n");
    format!("{answer}\n\nSources:\n{list}")
}

// Tests.
