//! Runtime services and shared state for the aiops-bot.

use tracing::{info, instrument, warn};

use crate::{
    base::{
        config::Config,
        types::{Res, Void},
    },
    pipeline::{Pipelines, Services, session::SessionStore},
    service::{agent::AgentClient, chat::ChatClient, db::DbClient, embedding::EmbeddingClient, knowledge::KnowledgeClient, notify::NotifyClient},
};

/// Runtime service context that can be shared across the application.
///
/// This struct holds the configuration, the collaborators, the pipelines, and the chat client.
/// It is designed to be trivially cloneable, allowing it to be passed around
/// without the need for `Arc` or `Mutex`.
#[derive(Clone)]
pub struct Runtime {
    /// The configuration for the application.
    pub config: Config,
    /// The collaborators the pipelines run against.
    pub services: Services,
    /// The reply pipelines.
    pub pipelines: Pipelines,
    /// The chat client instance.
    pub chat: ChatClient,
}

impl Runtime {
    /// Create a new runtime instance.
    #[instrument(skip_all)]
    pub async fn new(config: Config) -> Res<Self> {
        // Initialize the database.
        let db = DbClient::surreal(&config).await?;

        // Initialize the knowledge base, when one is configured.
        let kb = if config.knowledge_base_url.is_empty() {
            warn!("No knowledge base URL configured; the bot will not answer questions.");
            None
        } else {
            Some(KnowledgeClient::http(&config)?)
        };

        let services = Services {
            config: config.clone(),
            db: db.clone(),
            agent: AgentClient::openai(&config),
            kb,
            embedding: EmbeddingClient::openai(&config),
            notify: NotifyClient::webhook(&config)?,
            sessions: SessionStore::memory(),
        };

        // Initialize the pipelines.
        let pipelines = Pipelines::new(&services);

        // Initialize the chat client.
        let chat = ChatClient::slack(&config, db, pipelines.clone()).await?;

        info!("Runtime initialized.");

        Ok(Self { config, services, pipelines, chat })
    }

    pub async fn start(&self) -> Void {
        self.chat.start().await
    }
}
