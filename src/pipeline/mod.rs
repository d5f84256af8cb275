//! Reply pipelines.
//!
//! This module contains the multi-stage agent pipelines of the bot:
//! - The proactive pipeline, which answers questions nobody asked the bot directly
//! - The review pipeline, which re-evaluates a published proactive answer later on
//! - The reactive pipeline, which answers questions addressed to the bot
//!
//! The pipelines share the stage, retrieval, similarity, and session building blocks below.

pub mod proactive;
pub mod reactive;
pub mod retrieval;
pub mod review;
pub mod session;
pub mod similarity;
pub mod stage;

use proactive::ProactivePipeline;
use reactive::ReactivePipeline;
use review::ReviewPipeline;
use session::SessionStore;

use crate::{
    base::config::Config,
    service::{agent::AgentClient, db::DbClient, embedding::EmbeddingClient, knowledge::KnowledgeClient, notify::NotifyClient},
};

/// The collaborators the pipelines run against.
///
/// This is trivially cloneable, as every member is.
#[derive(Clone)]
pub struct Services {
    pub config: Config,
    pub db: DbClient,
    pub agent: AgentClient,
    pub kb: Option<KnowledgeClient>,
    pub embedding: EmbeddingClient,
    pub notify: NotifyClient,
    pub sessions: SessionStore,
}

/// All pipelines, built once per runtime.
#[derive(Clone)]
pub struct Pipelines {
    pub proactive: ProactivePipeline,
    pub reactive: ReactivePipeline,
    pub review: ReviewPipeline,
}

impl Pipelines {
    pub fn new(services: &Services) -> Self {
        Self {
            proactive: ProactivePipeline::new(services),
            reactive: ReactivePipeline::new(services),
            review: ReviewPipeline::new(services),
        }
    }
}
