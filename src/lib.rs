//! Library root for `aiops-bot`.
//!
//! Aiops-bot is an OpenAI-powered assistant for operations group chats designed to:
//! - Notice troubleshooting questions nobody asked it directly, and answer them from a knowledge base
//! - Suppress answers the chat has already seen, using embedding similarity
//! - Announce new answers to operators through a webhook
//! - Review published answers later, correcting the knowledge base where they were wrong
//! - Answer questions addressed to it directly
//!
//! The bot integrates with Slack for chat, SurrealDB for storage, an HTTP vector knowledge
//! base for retrieval, and OpenAI for agents and embeddings. The architecture is built around
//! extensible traits that allow for different implementations of each service.

pub mod base;
pub mod interaction;
pub mod pipeline;
pub mod runtime;
pub mod service;

use base::{config::Config, types::Void};
use rustls::crypto;
use tracing::info;

/// Public async entry for the binary crate.
///
/// Sets up necessary services and starts the aiops-bot runtime:
/// - Initializes the crypto provider
/// - Creates the runtime context with database, agent, knowledge, and chat clients
/// - Starts the main event loop for processing messages
pub async fn start(config: Config) -> Void {
    info!("Starting aiops-bot ...");

    // Start the crypto provider.
    crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install the default crypto provider."))?;

    // Initialize the runtime.
    let runtime = runtime::Runtime::new(config).await?;

    // Start the runtime.
    runtime.start().await?;

    Ok(())
}
