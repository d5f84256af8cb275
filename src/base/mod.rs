//! Core components, types, and utilities for the aiops-bot.
//!
//! This module contains fundamental building blocks used throughout the application:
//! - Configuration handling and environment variables.
//! - Instruction templates and output schemas for the agent stages.
//! - The message, reply, and stage result data model.

pub mod config;
pub mod prompts;
pub mod types;
