//! Load configuration via `config` crate with env-override support.

use std::{ops::Deref, sync::Arc};

use serde::Deserialize;

use crate::base::prompts;

use super::types::Res;

/// Default bot name, used in notifications and agent sessions.
fn default_bot_name() -> String {
    "aiops-bot".to_string()
}

/// Default OpenAI-compatible API base.
fn default_openai_api_base() -> String {
    "https://api.openai.com/v1".to_string()
}

/// Default agent model to use.
fn default_agent_model() -> String {
    "gpt-4.1".to_string()
}

/// Default sampling temperature for the agent model.
fn default_agent_temperature() -> f32 {
    0.0
}

/// Default max output tokens for the agent model.
fn default_openai_max_tokens() -> u32 {
    8192
}

/// Default embedding model.
fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

/// Default number of hits per knowledge search.
fn default_knowledge_top_k() -> u32 {
    5
}

/// Default similarity threshold above which an answer or query is a repeat.
fn default_similarity_threshold() -> f32 {
    0.7
}

/// Default dedup lookback window (7 days).
fn default_similarity_lookback_secs() -> u64 {
    7 * 24 * 60 * 60
}

/// Default maximum number of prior messages considered for dedup.
fn default_similarity_lookback_limit() -> u32 {
    100
}

/// Default number of prior messages handed to the agent stages.
fn default_history_window() -> u32 {
    20
}

/// Default timeout for a single agent stage.
fn default_stage_timeout_secs() -> u64 {
    120
}

fn default_review_enabled() -> bool {
    true
}

/// Default delay between a proactive answer and its review (30 minutes).
fn default_review_delay_secs() -> u64 {
    30 * 60
}

/// Default number of messages on each side of the question handed to the review stage.
fn default_review_context_window() -> u32 {
    10
}

fn default_identify_instruction() -> String {
    prompts::IDENTIFY_INSTRUCTION.to_string()
}

fn default_rewrite_instruction() -> String {
    prompts::REWRITE_INSTRUCTION.to_string()
}

fn default_analysis_instruction() -> String {
    prompts::ANALYSIS_INSTRUCTION.to_string()
}

fn default_review_instruction() -> String {
    prompts::REVIEW_INSTRUCTION.to_string()
}

/// Configuration for the aiops-bot application.
#[derive(Debug, Clone)]
pub struct Config {
    pub inner: Arc<ConfigInner>,
}

impl Deref for Config {
    type Target = ConfigInner;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ConfigInner {
    /// Bot name, sent with every notification (`BOT_NAME`).
    #[serde(default = "default_bot_name")]
    pub bot_name: String,
    /// OpenAI API key (`OPENAI_API_KEY`).
    pub openai_api_key: String,
    /// OpenAI-compatible API base (`OPENAI_API_BASE`).
    #[serde(default = "default_openai_api_base")]
    pub openai_api_base: String,
    /// Agent model to use for every stage (`AGENT_MODEL`).
    #[serde(default = "default_agent_model")]
    pub agent_model: String,
    /// Sampling temperature to use for the agent model (`AGENT_TEMPERATURE`).
    /// Value between 0 and 2.
    #[serde(default = "default_agent_temperature")]
    pub agent_temperature: f32,
    /// Max output tokens for the agent model (`OPENAI_MAX_TOKENS`).
    #[serde(default = "default_openai_max_tokens")]
    pub openai_max_tokens: u32,
    /// Embedding model (`EMBEDDING_MODEL`).
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    /// Knowledge-base service endpoint (`KNOWLEDGE_BASE_URL`).
    pub knowledge_base_url: String,
    /// Knowledge-base service API key (`KNOWLEDGE_BASE_API_KEY`).
    #[serde(default)]
    pub knowledge_base_api_key: String,
    /// Knowledge collections searched for every query (`KNOWLEDGE_COLLECTIONS`, comma separated).
    #[serde(default)]
    pub knowledge_collections: Vec<String>,
    /// Number of hits per knowledge search (`KNOWLEDGE_TOP_K`).
    #[serde(default = "default_knowledge_top_k")]
    pub knowledge_top_k: u32,
    /// Collection that receives review corrections (`REVIEW_COLLECTION`).
    /// Falls back to the first knowledge collection.
    #[serde(default)]
    pub review_collection: Option<String>,
    /// Notification webhook URL (`WEBHOOK_URL`).  Notifications are only logged when unset.
    #[serde(default)]
    pub webhook_url: Option<String>,
    /// Similarity at or above which an answer or query counts as a repeat (`SIMILARITY_THRESHOLD`).
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,
    /// How far back prior replies are compared for dedup (`SIMILARITY_LOOKBACK_SECS`).
    #[serde(default = "default_similarity_lookback_secs")]
    pub similarity_lookback_secs: u64,
    /// Maximum number of prior messages compared for dedup (`SIMILARITY_LOOKBACK_LIMIT`).
    #[serde(default = "default_similarity_lookback_limit")]
    pub similarity_lookback_limit: u32,
    /// Number of prior messages handed to the agent stages (`HISTORY_WINDOW`).
    #[serde(default = "default_history_window")]
    pub history_window: u32,
    /// Timeout for a single agent stage (`STAGE_TIMEOUT_SECS`).
    #[serde(default = "default_stage_timeout_secs")]
    pub stage_timeout_secs: u64,
    /// Whether proactive answers get reviewed (`REVIEW_ENABLED`).
    #[serde(default = "default_review_enabled")]
    pub review_enabled: bool,
    /// Delay between a proactive answer and its review (`REVIEW_DELAY_SECS`).
    #[serde(default = "default_review_delay_secs")]
    pub review_delay_secs: u64,
    /// Messages on each side of the question handed to the review stage (`REVIEW_CONTEXT_WINDOW`).
    #[serde(default = "default_review_context_window")]
    pub review_context_window: u32,
    /// Identify stage instruction override (`IDENTIFY_INSTRUCTION`).
    #[serde(default = "default_identify_instruction")]
    pub identify_instruction: String,
    /// Rewrite stage instruction override (`REWRITE_INSTRUCTION`).
    #[serde(default = "default_rewrite_instruction")]
    pub rewrite_instruction: String,
    /// Analysis stage instruction override (`ANALYSIS_INSTRUCTION`).
    #[serde(default = "default_analysis_instruction")]
    pub analysis_instruction: String,
    /// Review stage instruction override (`REVIEW_INSTRUCTION`).
    #[serde(default = "default_review_instruction")]
    pub review_instruction: String,
    /// Slack app token (`SLACK_APP_TOKEN`).
    pub slack_app_token: String,
    /// Slack bot token (`SLACK_BOT_TOKEN`).
    pub slack_bot_token: String,
    /// Slack signing secret (`SLACK_SIGNING_SECRET`).
    pub slack_signing_secret: String,
    /// Database endpoint URL (`DB_ENDPOINT`), e.g. `ws://localhost:8000` or `mem://`.
    pub db_endpoint: String,
    /// Database username (`DB_USERNAME`).
    #[serde(default)]
    pub db_username: String,
    /// Database password (`DB_PASSWORD`).
    #[serde(default)]
    pub db_password: String,
}

impl ConfigInner {
    /// The collection that receives review corrections.
    pub fn review_collection(&self) -> Option<&str> {
        self.review_collection.as_deref().or_else(|| self.knowledge_collections.first().map(String::as_str))
    }
}

impl Config {
    pub fn load(explicit_path: Option<&std::path::Path>) -> Res<Self> {
        let mut cfg = config::Config::builder().add_source(
            config::Environment::default()
                .prefix("AIOPS_BOT")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("knowledge_collections"),
        );

        if let Some(p) = explicit_path {
            cfg = cfg.add_source(config::File::from(p.to_path_buf()));
        } else if std::path::Path::new(".hidden/config.toml").exists() {
            cfg = cfg.add_source(config::File::with_name(".hidden/config.toml"));
        }

        let result = Config {
            inner: Arc::new(cfg.build()?.try_deserialize()?),
        };

        result.validate()?;

        Ok(result)
    }

    /// Validate the value ranges of the configuration.
    pub fn validate(&self) -> Res<()> {
        if self.agent_temperature < 0.0 || self.agent_temperature > 2.0 {
            return Err(anyhow::anyhow!("Agent temperature must be between 0 and 2."));
        }

        if self.openai_max_tokens < 1 || self.openai_max_tokens > 128000 {
            return Err(anyhow::anyhow!("OpenAI max tokens must be between 1 and 128000."));
        }

        if !(0.0..=1.0).contains(&self.similarity_threshold) {
            return Err(anyhow::anyhow!("Similarity threshold must be between 0 and 1."));
        }

        if self.knowledge_top_k < 1 {
            return Err(anyhow::anyhow!("Knowledge top k must be at least 1."));
        }

        if self.similarity_lookback_secs == 0 || self.similarity_lookback_limit == 0 {
            return Err(anyhow::anyhow!("Similarity lookback window must be positive."));
        }

        if self.stage_timeout_secs == 0 {
            return Err(anyhow::anyhow!("Stage timeout must be positive."));
        }

        Ok(())
    }
}

// Tests.
