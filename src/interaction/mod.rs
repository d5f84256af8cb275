//! Event handling and user interactions for the aiops-bot.
//!
//! This module provides functionality for handling chat events:
//! - Storing every ingested message
//! - Routing messages to the reactive or proactive pipeline
//! - Scheduling the delayed review of published proactive answers

pub mod chat_event;
pub mod message_storage;
pub mod review;
