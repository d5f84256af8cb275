//! Agent stages.
//!
//! A stage runs the agent once with its own instruction and output schema, and turns the
//! final event into a typed result.  Pipelines hold stages as `Arc<dyn Stage<Output = T>>`,
//! so the concrete stage can be swapped per deployment (or per test).

use std::{marker::PhantomData, sync::Arc};

use async_trait::async_trait;
use futures::StreamExt;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{instrument, warn};

use crate::{
    base::{
        config::Config,
        prompts::{self, format_history},
        types::{AgentContext, AgentRequest, AnalysisResult, Citation, IdentifyResult, Message, Res, ReviewDecision, RewriteResult},
    },
    pipeline::session::{SessionKey, SessionStore},
    service::agent::AgentClient,
};

// Traits.

/// A single step of a pipeline.
#[async_trait]
pub trait Stage: Send + Sync {
    type Output: Send;

    /// The stage name, used for logging and as the session state key.
    fn name(&self) -> &str;

    /// Run the stage.
    ///
    /// Returns `Ok(None)` when the stage produced no usable result, and an error when the
    /// underlying execution failed.
    async fn run(&self, session: &SessionKey, sessions: &SessionStore, context: &AgentContext) -> Res<Option<Self::Output>>;
}

/// Shared reference to a stage producing `T`.
pub type StageRef<T> = Arc<dyn Stage<Output = T>>;

// Structs.

/// A stage backed by one agent run with a structured output.
pub struct AgentStage<T> {
    name: String,
    instruction: String,
    schema: Value,
    agent: AgentClient,
    _output: PhantomData<fn() -> T>,
}

impl<T> AgentStage<T> {
    pub fn new(name: impl Into<String>, instruction: impl Into<String>, schema: Value, agent: AgentClient) -> Self {
        Self {
            name: name.into(),
            instruction: instruction.into(),
            schema,
            agent,
            _output: PhantomData,
        }
    }
}

impl AgentStage<IdentifyResult> {
    pub fn identify(config: &Config, agent: AgentClient) -> StageRef<IdentifyResult> {
        Arc::new(Self::new("identify", config.identify_instruction.clone(), prompts::identify_schema().clone(), agent))
    }
}

impl AgentStage<RewriteResult> {
    pub fn rewrite(config: &Config, agent: AgentClient) -> StageRef<RewriteResult> {
        Arc::new(Self::new("rewrite", config.rewrite_instruction.clone(), prompts::rewrite_schema().clone(), agent))
    }
}

impl AgentStage<AnalysisResult> {
    pub fn analysis(config: &Config, agent: AgentClient) -> StageRef<AnalysisResult> {
        Arc::new(Self::new("analysis", config.analysis_instruction.clone(), prompts::analysis_schema().clone(), agent))
    }

    /// The analysis stage, for questions addressed to the bot directly.
    pub fn reactive_analysis(config: &Config, agent: AgentClient) -> StageRef<AnalysisResult> {
        let instruction = format!("{}\n{}", config.analysis_instruction, prompts::REACTIVE_ADDENDUM);
        Arc::new(Self::new("reactive_analysis", instruction, prompts::analysis_schema().clone(), agent))
    }
}

impl AgentStage<ReviewDecision> {
    pub fn review(config: &Config, agent: AgentClient) -> StageRef<ReviewDecision> {
        Arc::new(Self::new("review", config.review_instruction.clone(), prompts::review_schema().clone(), agent))
    }
}

#[async_trait]
impl<T> Stage for AgentStage<T>
where
    T: DeserializeOwned + Send + 'static,
{
    type Output = T;

    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(name = "AgentStage::run", skip_all, fields(stage = %self.name))]
    async fn run(&self, session: &SessionKey, sessions: &SessionStore, context: &AgentContext) -> Res<Option<T>> {
        let request = AgentRequest {
            name: self.name.clone(),
            instruction: self.instruction.clone(),
            context: context.clone(),
            output_schema: self.schema.clone(),
        };

        let mut events = self.agent.run(session, &request).await?;
        let mut output = None;

        while let Some(event) = events.next().await {
            let event = event?;

            if event.is_final {
                output = event.output.clone();
            }

            sessions.append_event(session, event).await?;
        }

        let Some(output) = output else {
            warn!("Stage `{}` produced no final output.", self.name);
            return Ok(None);
        };

        match serde_json::from_value::<T>(output.clone()) {
            Ok(result) => {
                sessions.set_state(session, &self.name, output).await?;
                Ok(Some(result))
            }
            Err(err) => {
                warn!("Stage `{}` produced an invalid output: {}", self.name, err);
                Ok(None)
            }
        }
    }
}

// Contexts.

/// Context for the identify and rewrite stages: the history, and the latest message.
pub fn conversation_context(history: &[Message], latest: &Message) -> AgentContext {
    AgentContext::new(latest.content.clone()).with_section("Conversation History", format_history(history))
}

/// Context for the analysis stage.
pub fn analysis_context(history: &[Message], formatted_citations: &str, query: &str) -> AgentContext {
    AgentContext::new(query)
        .with_section("Conversation History", format_history(history))
        .with_section("Knowledge Citations", formatted_citations)
}

/// Context for the review stage.
///
/// Citations are listed by knowledge key, so the agent can name the ones to delete.
pub fn review_context(question: &str, answer: &str, citations: &[Citation], before: &[Message], after: &[Message]) -> AgentContext {
    let citations = if citations.is_empty() {
        "(no citations)".to_string()
    } else {
        citations.iter().map(|c| format!("[{}] {}", c.knowledge_key, c.content)).collect::<Vec<_>>().join("\n\n")
    };

    AgentContext::new(format!("Question:\n{question}\n\nYour answer:\n{answer}"))
        .with_section("Conversation Before The Question", format_history(before))
        .with_section("Conversation After The Question", format_history(after))
        .with_section("Citations Behind Your Answer", citations)
}

// Tests.
