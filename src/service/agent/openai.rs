//! OpenAI implementation of the agent execution engine.
//!
//! Each agent run is a single Responses API call with a strict JSON schema output
//! format.  The response is converted into a stream of `AgentEvent`s, where the last
//! event carrying structured output is marked final.

use std::{sync::Arc, time::Duration};

use async_openai::{
    Client,
    config::OpenAIConfig,
    types::responses::{
        Content, CreateResponseArgs, Input, InputItem, InputMessageArgs, OutputContent, Response, ResponseFormatJsonSchema, Role, TextConfig, TextResponseFormat,
    },
};
use async_trait::async_trait;
use serde_json::Value;
use tokio::time::timeout;
use tracing::{info, instrument, warn};

use crate::{
    base::{
        config::Config,
        types::{AgentEvent, AgentRequest, Res},
    },
    pipeline::session::SessionKey,
};

use super::{AgentClient, AgentEventStream, GenericAgentClient};

// Extra methods on `AgentClient` applied by the openai implementation.

impl AgentClient {
    pub fn openai(config: &Config) -> Self {
        let client = OpenAiAgentClient::new(config);
        Self { inner: Arc::new(client) }
    }
}

// Specific implementations.

/// OpenAI agent client implementation.
#[derive(Clone)]
pub struct OpenAiAgentClient {
    client: Client<OpenAIConfig>,
    config: Config,
}

impl OpenAiAgentClient {
    /// Create a new OpenAI agent client.
    #[instrument(name = "OpenAiAgentClient::new", skip_all)]
    pub fn new(config: &Config) -> Self {
        let cfg = OpenAIConfig::new().with_api_key(config.openai_api_key.clone()).with_api_base(config.openai_api_base.clone());

        Self {
            client: Client::with_config(cfg),
            config: config.clone(),
        }
    }

    /// Build the input items from the request context.
    #[instrument(name = "OpenAiAgentClient::build_input", skip_all)]
    fn build_input(&self, session: &SessionKey, request: &AgentRequest) -> Res<Input> {
        let mut items = vec![InputItem::Message(
            InputMessageArgs::default()
                .role(Role::Developer)
                .content(format!("## Bot\n\n`{}` (chat `{}`)\n\n", self.config.bot_name, session.user))
                .build()?,
        )];

        for section in &request.context.sections {
            items.push(InputItem::Message(
                InputMessageArgs::default()
                    .role(Role::Developer)
                    .content(format!("## {}\n\n{}\n\n", section.title, section.body))
                    .build()?,
            ));
        }

        items.push(InputItem::Message(
            InputMessageArgs::default()
                .role(Role::User)
                .content(format!("# User Message\n\n{}\n\n", request.context.user_message))
                .build()?,
        ));

        Ok(Input::Items(items))
    }

    /// Helper function to make OpenAI API calls with retry logic and timeout handling.
    async fn call_openai_api(&self, request_builder: CreateResponseArgs) -> Res<Response> {
        const MAX_RETRIES: u32 = 3;
        const TIMEOUT: u64 = 120;
        const RETRY_DELAY_MS: u64 = 1000;

        let mut retries = 0;

        loop {
            let request = request_builder.build()?;
            let result = timeout(Duration::from_secs(TIMEOUT), self.client.responses().create(request)).await;

            match result {
                Ok(Ok(response)) => {
                    info!("OpenAI API call succeeded after {} attempts", retries + 1);
                    return Ok(response);
                }
                Ok(Err(err)) => {
                    if retries >= MAX_RETRIES {
                        return Err(anyhow::anyhow!("OpenAI API call failed after {MAX_RETRIES} retries: {err}"));
                    }
                    retries += 1;
                    warn!("OpenAI API call failed, retrying {retries}/{MAX_RETRIES}: {err}");

                    let delay = Duration::from_millis(RETRY_DELAY_MS * 2_u64.pow(retries - 1));
                    tokio::time::sleep(delay).await;
                }
                Err(_) => {
                    if retries >= MAX_RETRIES {
                        return Err(anyhow::anyhow!("OpenAI API call timed out after {MAX_RETRIES} attempts"));
                    }
                    retries += 1;
                    warn!("OpenAI API call timed out, retrying {retries}/{MAX_RETRIES}");

                    let delay = Duration::from_millis(RETRY_DELAY_MS * 2_u64.pow(retries - 1));
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

#[async_trait]
impl GenericAgentClient for OpenAiAgentClient {
    #[instrument(name = "OpenAiAgentClient::run", skip_all, fields(stage = %request.name))]
    async fn run(&self, session: &SessionKey, request: &AgentRequest) -> Res<AgentEventStream> {
        let input = self.build_input(session, request)?;

        let text_config = TextConfig {
            format: TextResponseFormat::JsonSchema(ResponseFormatJsonSchema {
                name: request.name.clone(),
                description: Some(format!("Structured output of the `{}` stage.", request.name)),
                schema: Some(request.output_schema.clone()),
                strict: Some(true),
            }),
        };

        let mut builder = CreateResponseArgs::default();
        builder
            .instructions(request.instruction.clone())
            .max_output_tokens(self.config.openai_max_tokens)
            .model(&self.config.agent_model)
            .text(text_config)
            .input(input);

        // Add the temperature for the non-reasoning models.
        if self.config.agent_model.starts_with("gpt") {
            builder.temperature(self.config.agent_temperature);
        }

        let response = self.call_openai_api(builder).await?;
        let texts = parse_openai_response(&response)?;
        let events = events_from_texts(&request.name, texts);

        Ok(Box::pin(futures::stream::iter(events.into_iter().map(Ok::<AgentEvent, anyhow::Error>))))
    }
}

/// Extract the output texts of an OpenAI response.
#[instrument(skip_all)]
pub fn parse_openai_response(response: &Response) -> Res<Vec<String>> {
    let mut result = Vec::new();

    for output in &response.output {
        match output {
            OutputContent::Message(message) => {
                for message_content in &message.content {
                    match message_content {
                        Content::OutputText(text) => result.push(text.text.clone()),
                        Content::Refusal(reason) => {
                            return Err(anyhow::anyhow!("Request refused: {reason:#?}"));
                        }
                    }
                }
            }
            _ => {
                warn!("Unknown output: {output:#?}");
            }
        }
    }

    Ok(result)
}

/// Convert output texts into agent events.
///
/// Texts that parse as JSON objects carry structured output.  The last event with output is
/// final; if no text carries output, the last event is final without one.
pub fn events_from_texts(author: &str, texts: Vec<String>) -> Vec<AgentEvent> {
    let mut events = texts
        .into_iter()
        .map(|text| {
            let output = serde_json::from_str::<Value>(&text).ok().filter(Value::is_object);

            AgentEvent {
                author: author.to_string(),
                text: Some(text),
                output,
                is_final: false,
            }
        })
        .collect::<Vec<_>>();

    let last_output = events.iter().rposition(|e| e.output.is_some()).or(events.len().checked_sub(1));

    if let Some(index) = last_output {
        events[index].is_final = true;
    }

    events
}

// Tests.
