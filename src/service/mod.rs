//! Service integrations for external APIs and clients.
//!
//! This module contains implementations for the collaborators used by the aiops-bot:
//! - Agent execution (e.g., OpenAI)
//! - Chat services (e.g., Slack)
//! - Database services (e.g., SurrealDB)
//! - Embedding services (e.g., OpenAI)
//! - Knowledge-base services (HTTP)
//! - Notification sinks (webhooks)
//!
//! Each service module defines both generic traits and concrete implementations,
//! allowing for extensibility and easy testing.

pub mod agent;
pub mod chat;
pub mod db;
pub mod embedding;
pub mod knowledge;
pub mod notify;
