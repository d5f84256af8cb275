//! The review pipeline.
//!
//! Some time after a proactive answer is published, the review agent re-reads it against the
//! conversation around the question and decides to keep, modify, or delete it.  Modifications
//! are written back into the knowledge base as QA points, and deletions remove the citations
//! that led to a wrong answer.

use tracing::{info, instrument, warn};

use crate::{
    base::{
        config::Config,
        types::{KnowledgePoint, ProactiveReply, Res, ReviewAction, ReviewDecision, ReviewStatus},
    },
    pipeline::{
        Services,
        session::{SessionKey, SessionStore},
        stage::{AgentStage, StageRef, review_context},
    },
    service::{db::DbClient, knowledge::KnowledgeClient},
};

/// The session app name of review runs.
const APP: &str = "review";

/// How a review run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReviewOutcome {
    /// The message has no published proactive answer to review.
    NotApplicable,
    /// The review agent emitted no decision; the record is unchanged.
    NoDecision,
    /// The decision could not be applied; the record is unchanged.
    Unchanged,
    /// The decision was applied and persisted.
    Applied(ReviewStatus),
}

/// The review pipeline.
///
/// This is trivially cloneable and can be passed around without the need for `Arc` or `Mutex`.
#[derive(Clone)]
pub struct ReviewPipeline {
    config: Config,
    db: DbClient,
    kb: Option<KnowledgeClient>,
    sessions: SessionStore,
    review: StageRef<ReviewDecision>,
}

impl ReviewPipeline {
    pub fn new(services: &Services) -> Self {
        Self {
            config: services.config.clone(),
            db: services.db.clone(),
            kb: services.kb.clone(),
            sessions: services.sessions.clone(),
            review: AgentStage::review(&services.config, services.agent.clone()),
        }
    }

    /// Review the proactive answer of a stored message.
    #[instrument(name = "ReviewPipeline::run", skip(self))]
    pub async fn run(&self, message_id: &str) -> Res<ReviewOutcome> {
        let mut message = self.db.get_message(message_id).await?.ok_or_else(|| anyhow::anyhow!("Message `{}` not found.", message_id))?;

        let Some(reply) = &message.proactive_reply else {
            info!("Message has no proactive reply to review.");
            return Ok(ReviewOutcome::NotApplicable);
        };

        let Some(answer) = &reply.answer else {
            info!("Message has no published answer to review.");
            return Ok(ReviewOutcome::NotApplicable);
        };

        // Gather the conversation around the question.

        let window = self.config.review_context_window;
        let before = self.db.get_messages_before(&message.chat_id, message.timestamp, window).await?;
        let after = self.db.get_messages_after(&message.chat_id, message.timestamp, window).await?;

        let context = review_context(&reply.query, answer, &reply.citations, &before, &after);

        // Run the review agent.

        let session = SessionKey::new(APP, &message.chat_id, &message.id);
        let decision = self.review.run(&session, &self.sessions, &context).await;

        if let Err(err) = self.sessions.remove(&session).await {
            warn!("Failed to remove session: {}", err);
        }

        let Some(decision) = decision? else {
            info!("Review produced no decision; leaving the record unchanged.");
            return Ok(ReviewOutcome::NoDecision);
        };

        info!("Review decided `{:?}`.", decision.action);

        // Apply and persist.

        let source = format!("review:{}", message.id);
        let Some(reviewed) = apply_decision(reply, &decision, self.kb.as_ref(), self.config.review_collection(), &source).await? else {
            return Ok(ReviewOutcome::Unchanged);
        };

        let status = reviewed.review_status;
        message.proactive_reply = Some(reviewed);
        self.db.save_message(&message).await?;

        Ok(ReviewOutcome::Applied(status))
    }
}

/// Apply a review decision to a reply, performing the knowledge-base side effects.
///
/// Returns the reviewed reply, or `None` when the decision needs a knowledge base that is not
/// available.  Pending and keep never touch the knowledge base.
pub async fn apply_decision(reply: &ProactiveReply, decision: &ReviewDecision, kb: Option<&KnowledgeClient>, review_collection: Option<&str>, source: &str) -> Res<Option<ProactiveReply>> {
    let mut reviewed = reply.clone();

    match decision.action {
        ReviewAction::Pending | ReviewAction::Keep => {
            reviewed.review_status = ReviewStatus::Keep;
        }
        ReviewAction::Modify => {
            let (Some(kb), Some(collection)) = (kb, review_collection) else {
                warn!("Cannot apply a modification without a knowledge base.");
                return Ok(None);
            };

            let question = non_blank(decision.question.as_deref()).unwrap_or(&reply.query).to_string();
            let Some(answer) = non_blank(decision.answer.as_deref()).or(reply.answer.as_deref()).map(str::to_string) else {
                warn!("Modification carries no answer.");
                return Ok(None);
            };

            let point = KnowledgePoint {
                question: question.clone(),
                answer: answer.clone(),
                source: source.to_string(),
            };
            let key = kb.upsert(collection, &point).await?;

            info!("Stored the reviewed answer as `{}` in `{}`.", key, collection);

            reviewed.review_status = ReviewStatus::Modify;
            reviewed.modified_query = Some(question);
            reviewed.modified_answer = Some(answer);
            reviewed.knowledge_key = Some(key);
        }
        ReviewAction::Delete => {
            let Some(kb) = kb else {
                warn!("Cannot apply a deletion without a knowledge base.");
                return Ok(None);
            };

            for id in &decision.delete_citation_ids {
                if reviewed.deleted_citations.contains(id) {
                    continue;
                }

                let Some(citation) = reply.citations.iter().find(|c| &c.knowledge_key == id) else {
                    warn!("Review asked to delete `{}`, which is not a citation of this answer.", id);
                    continue;
                };

                match kb.delete(&citation.collection, id).await {
                    Ok(()) => {
                        info!("Deleted citation `{}` from `{}`.", id, citation.collection);
                        reviewed.deleted_citations.push(id.clone());
                    }
                    Err(err) => warn!("Failed to delete citation `{}` from `{}`: {}", id, citation.collection, err),
                }
            }

            reviewed.review_status = ReviewStatus::Delete;
        }
    }

    Ok(Some(reviewed))
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

// Tests.
