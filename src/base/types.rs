use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_with::{DefaultOnNull, serde_as};

pub type Err = anyhow::Error;
pub type Res<T> = Result<T, Err>;
pub type Void = Res<()>;

// Messages.

/// Whether a chat is shared by many users, or is a 1:1 conversation with the bot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatType {
    #[default]
    Group,
    Private,
}

/// A single LLM-compatible content part of a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { url: String },
}

/// A chat utterance, as ingested from a chat platform.
///
/// Messages are immutable after ingestion, apart from the `proactive_reply` slot, which
/// is written (in full) by the proactive pipeline, and later by the review pipeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub chat_id: String,
    #[serde(default)]
    pub chat_type: ChatType,
    pub sender: String,
    /// The platform that delivered the message (e.g., `slack`).
    pub channel: String,
    /// The platform reference used to reply in the message's thread.
    #[serde(default)]
    pub thread_ts: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    pub content: String,
    #[serde(default)]
    pub parts: Vec<ContentPart>,
    #[serde(default)]
    pub mentions: Vec<String>,
    #[serde(default)]
    pub is_mentioned: bool,
    #[serde(default)]
    pub proactive_reply: Option<ProactiveReply>,
}

impl Message {
    pub fn is_private(&self) -> bool {
        self.chat_type == ChatType::Private
    }
}

// Proactive replies.

/// The review disposition of a published proactive answer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewStatus {
    #[default]
    Pending,
    Keep,
    Delete,
    Modify,
}

/// The persisted result of the proactive pipeline for one message.
///
/// Field names and the `review_status` values are read by other systems, so they are stable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProactiveReply {
    /// The rewritten, self-contained overall query.
    pub query: String,
    pub sub_queries: Vec<String>,
    pub answer: Option<String>,
    pub answer_embedding: Option<Vec<f32>>,
    pub query_embedding: Option<Vec<f32>>,
    pub citations: Vec<Citation>,
    pub answer_similarity: f32,
    pub query_similarity: f32,
    pub is_first_answer: bool,
    pub is_first_query: bool,
    pub review_status: ReviewStatus,
    #[serde(default)]
    pub modified_query: Option<String>,
    #[serde(default)]
    pub modified_answer: Option<String>,
    #[serde(default)]
    pub knowledge_key: Option<String>,
    #[serde(default)]
    pub deleted_citations: Vec<String>,
}

// Knowledge.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CitationType {
    #[serde(alias = "document")]
    Document,
    #[serde(rename = "QA", alias = "qa")]
    Qa,
}

/// One retrieved knowledge unit backing an answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    pub knowledge_key: String,
    pub citation_type: CitationType,
    pub title: Option<String>,
    pub content: String,
    pub source: Option<String>,
    /// Last update time of the knowledge unit (epoch seconds).
    pub updated_at: i64,
    /// The knowledge collection the citation was retrieved from.
    pub collection: String,
}

/// A raw hit, as returned by the knowledge-base service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeHit {
    pub key: String,
    #[serde(rename = "type")]
    pub kind: CitationType,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub question: Option<String>,
    #[serde(default)]
    pub answer: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub updated_at: Option<i64>,
}

impl KnowledgeHit {
    /// Convert the hit into a uniform citation.
    ///
    /// QA hits are flattened into a single `Q:` / `A:` body.
    pub fn into_citation(self, collection: &str) -> Citation {
        let content = match self.kind {
            CitationType::Document => self.content.unwrap_or_default(),
            CitationType::Qa => format!(
                "Q: {}\nA: {}",
                self.question.unwrap_or_default(),
                self.answer.or(self.content).unwrap_or_default()
            ),
        };

        Citation {
            knowledge_key: self.key,
            citation_type: self.kind,
            title: self.title,
            content,
            source: self.source,
            updated_at: self.updated_at.unwrap_or_default(),
            collection: collection.to_string(),
        }
    }
}

/// A QA point written back to the knowledge base by the review pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgePoint {
    pub question: String,
    pub answer: String,
    pub source: String,
}

// Notifications.

/// Payload of a proactive answer notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationPayload {
    pub chat_id: String,
    pub message_id: String,
    pub question: String,
    pub answer: String,
    pub citations: Vec<Citation>,
}

// Stage results.

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IdentifyResult {
    pub within_scope: bool,
    #[serde(default)]
    pub thinking: String,
}

#[serde_as]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RewriteResult {
    pub overall_query: String,
    #[serde_as(deserialize_as = "DefaultOnNull")]
    #[serde(default)]
    pub sub_queries: Vec<String>,
}

impl RewriteResult {
    /// Returns the non-blank sub-queries, falling back to the overall query.
    ///
    /// Returns an empty list when the rewrite produced nothing usable.
    pub fn queries(&self) -> Vec<String> {
        let queries = self.sub_queries.iter().map(|q| q.trim()).filter(|q| !q.is_empty()).map(str::to_string).collect::<Vec<_>>();

        if !queries.is_empty() {
            return queries;
        }

        let overall = self.overall_query.trim();
        if overall.is_empty() { Vec::new() } else { vec![overall.to_string()] }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    #[serde(default)]
    pub thinking: String,
    pub is_answerable: bool,
    #[serde(default)]
    pub answer: Option<String>,
    /// 1-based indices into the supplied citation list.
    #[serde(default)]
    pub citations: Option<Vec<i64>>,
}

impl AnalysisResult {
    /// The answer, if and only if the result is answerable and the answer is non-empty.
    ///
    /// An answer that arrives alongside `is_answerable = false` is discarded. Heading lines are
    /// flattened, since chat clients render them poorly.
    pub fn usable_answer(&self) -> Option<String> {
        if !self.is_answerable {
            return None;
        }

        let answer = self.answer.as_deref()?.trim();
        if answer.is_empty() {
            return None;
        }

        Some(strip_headings(answer))
    }
}

/// Replace markdown heading markers with plain lines.
fn strip_headings(text: &str) -> String {
    text.lines()
        .map(|line| {
            let trimmed = line.trim_start();
            let hashes = trimmed.chars().take_while(|c| *c == '#').count();

            if (1..=6).contains(&hashes) && trimmed[hashes..].starts_with(' ') {
                trimmed[hashes..].trim_start()
            } else {
                line
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewAction {
    Pending,
    Keep,
    Delete,
    Modify,
}

#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewDecision {
    pub action: ReviewAction,
    #[serde(default)]
    pub question: Option<String>,
    #[serde(default)]
    pub answer: Option<String>,
    #[serde_as(deserialize_as = "DefaultOnNull")]
    #[serde(default)]
    pub delete_citation_ids: Vec<String>,
}

// Agent execution.

/// A titled block of context handed to an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextSection {
    pub title: String,
    pub body: String,
}

/// The context of one agent invocation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentContext {
    pub sections: Vec<ContextSection>,
    pub user_message: String,
}

impl AgentContext {
    pub fn new(user_message: impl Into<String>) -> Self {
        Self {
            sections: Vec::new(),
            user_message: user_message.into(),
        }
    }

    pub fn with_section(mut self, title: impl Into<String>, body: impl Into<String>) -> Self {
        self.sections.push(ContextSection { title: title.into(), body: body.into() });
        self
    }
}

/// A request to the agent execution engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRequest {
    /// The stage name, used as the agent's author name and for logging.
    pub name: String,
    pub instruction: String,
    pub context: AgentContext,
    /// JSON schema of the structured output of the final event.
    pub output_schema: Value,
}

/// An event emitted by the agent execution engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentEvent {
    pub author: String,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub output: Option<Value>,
    #[serde(default)]
    pub is_final: bool,
}

// Tests.

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_review_status_serializes_lowercase() {
        assert_eq!(serde_json::to_value(ReviewStatus::Modify).unwrap(), json!("modify"));
        assert_eq!(serde_json::from_value::<ReviewStatus>(json!("keep")).unwrap(), ReviewStatus::Keep);
    }

    #[test]
    fn test_citation_type_accepts_lowercase_aliases() {
        assert_eq!(serde_json::from_value::<CitationType>(json!("qa")).unwrap(), CitationType::Qa);
        assert_eq!(serde_json::from_value::<CitationType>(json!("QA")).unwrap(), CitationType::Qa);
        assert_eq!(serde_json::to_value(CitationType::Qa).unwrap(), json!("QA"));
        assert_eq!(serde_json::from_value::<CitationType>(json!("document")).unwrap(), CitationType::Document);
    }

    #[test]
    fn test_qa_hit_flattens_into_citation() {
        let hit = KnowledgeHit {
            key: "k1".to_string(),
            kind: CitationType::Qa,
            title: None,
            content: None,
            question: Some("How do I restart the agent?".to_string()),
            answer: Some("Run `systemctl restart agent`.".to_string()),
            source: None,
            updated_at: Some(1_700_000_000),
        };

        let citation = hit.into_citation("faq");

        assert_eq!(citation.knowledge_key, "k1");
        assert_eq!(citation.collection, "faq");
        assert_eq!(citation.content, "Q: How do I restart the agent?\nA: Run `systemctl restart agent`.");
        assert_eq!(citation.updated_at, 1_700_000_000);
    }

    #[test]
    fn test_unanswerable_analysis_discards_answer() {
        let analysis = AnalysisResult {
            thinking: String::new(),
            is_answerable: false,
            answer: Some("Try turning it off and on again.".to_string()),
            citations: Some(vec![1]),
        };

        assert_eq!(analysis.usable_answer(), None);
    }

    #[test]
    fn test_blank_answer_is_not_usable() {
        let analysis = AnalysisResult {
            is_answerable: true,
            answer: Some("   ".to_string()),
            ..Default::default()
        };

        assert_eq!(analysis.usable_answer(), None);
    }

    #[test]
    fn test_usable_answer_strips_headings() {
        let analysis = AnalysisResult {
            is_answerable: true,
            answer: Some("## Fix\nIncrease the pool size.\n#hashtag stays".to_string()),
            ..Default::default()
        };

        assert_eq!(analysis.usable_answer().unwrap(), "Fix\nIncrease the pool size.\n#hashtag stays");
    }

    #[test]
    fn test_rewrite_queries_fall_back_to_overall_query() {
        let rewrite: RewriteResult = serde_json::from_value(json!({ "overall_query": "How to fix OOM in pod?", "sub_queries": null })).unwrap();
        assert_eq!(rewrite.queries(), vec!["How to fix OOM in pod?".to_string()]);

        let rewrite = RewriteResult {
            overall_query: "  ".to_string(),
            sub_queries: vec![" ".to_string()],
        };
        assert!(rewrite.queries().is_empty());
    }

    #[test]
    fn test_review_decision_tolerates_null_ids() {
        let decision: ReviewDecision = serde_json::from_value(json!({
            "action": "keep",
            "question": null,
            "answer": null,
            "delete_citation_ids": null
        }))
        .unwrap();

        assert_eq!(decision.action, ReviewAction::Keep);
        assert!(decision.delete_citation_ids.is_empty());
    }

    #[test]
    fn test_message_timestamp_persists_as_millis() {
        let message = Message {
            id: "C1-1".to_string(),
            chat_id: "C1".to_string(),
            chat_type: ChatType::Group,
            sender: "U1".to_string(),
            channel: "slack".to_string(),
            thread_ts: "1.0".to_string(),
            timestamp: DateTime::from_timestamp_millis(1_700_000_000_123).unwrap(),
            content: "hi".to_string(),
            parts: vec![ContentPart::Text { text: "hi".to_string() }],
            mentions: Vec::new(),
            is_mentioned: false,
            proactive_reply: None,
        };

        let value = serde_json::to_value(&message).unwrap();

        assert_eq!(value["timestamp"], json!(1_700_000_000_123i64));
        assert_eq!(value["chat_type"], json!("group"));
        assert_eq!(value["parts"][0]["type"], json!("text"));
    }
}
