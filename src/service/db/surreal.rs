//! SurrealDB implementation of the message store.
//!
//! Messages are stored in the `message` table, keyed by message ID.  The chat ID and the
//! timestamp (epoch milliseconds) are kept as indexed columns for range queries, and the
//! message itself is kept as a JSON body.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use surrealdb::{
    Surreal,
    engine::any::{self, Any},
    opt::auth::Root,
};
use tracing::{debug, info, instrument};

use crate::base::{
    config::Config,
    types::{Message, Res, Void},
};

use super::{DbClient, GenericDbClient};

// Extra methods on `DbClient` applied by the surreal implementation.

impl DbClient {
    /// Connect to the configured SurrealDB endpoint.
    pub async fn surreal(config: &Config) -> Res<Self> {
        let client = SurrealDbClient::new(&config.db_endpoint, &config.db_username, &config.db_password).await?;
        Ok(Self { inner: Arc::new(client) })
    }

    /// Create an in-memory SurrealDB message store.
    pub async fn surreal_memory() -> Res<Self> {
        let client = SurrealDbClient::new("mem://", "", "").await?;
        Ok(Self { inner: Arc::new(client) })
    }
}

/// A message row in the database.
#[derive(Debug, Serialize, Deserialize)]
struct MessageRecord {
    message_id: String,
    chat_id: String,
    timestamp: i64,
    body: String,
}

impl MessageRecord {
    fn from_message(message: &Message) -> Res<Self> {
        Ok(Self {
            message_id: message.id.clone(),
            chat_id: message.chat_id.clone(),
            timestamp: message.timestamp.timestamp_millis(),
            body: serde_json::to_string(message)?,
        })
    }
}

/// The projection read back from the database.
#[derive(Debug, Deserialize)]
struct MessageBody {
    body: String,
}

impl MessageBody {
    fn into_message(self) -> Res<Message> {
        Ok(serde_json::from_str(&self.body)?)
    }
}

fn into_messages(rows: Vec<MessageBody>) -> Res<Vec<Message>> {
    rows.into_iter().map(MessageBody::into_message).collect()
}

// Specific implementations.

/// SurrealDB client implementation.
#[derive(Clone)]
pub struct SurrealDbClient {
    db: Surreal<Any>,
}

impl SurrealDbClient {
    /// Connect to `endpoint` (e.g., `mem://` or `ws://localhost:8000`).
    ///
    /// Credentials are only used for remote endpoints.
    #[instrument(name = "SurrealDbClient::new", skip(username, password))]
    pub async fn new(endpoint: &str, username: &str, password: &str) -> Res<Self> {
        let db = any::connect(endpoint).await?;

        if !endpoint.starts_with("mem://") && !username.is_empty() {
            db.signin(Root { username, password }).await?;
        }

        db.use_ns("aiops").use_db("bot").await?;

        // Define schemas.

        db.query("DEFINE TABLE IF NOT EXISTS message SCHEMALESS;").await?.check()?;
        db.query("DEFINE INDEX IF NOT EXISTS message_chat_time ON message FIELDS chat_id, timestamp;").await?.check()?;

        info!("Database initialized successfully.");

        Ok(Self { db })
    }
}

#[async_trait]
impl GenericDbClient for SurrealDbClient {
    #[instrument(name = "SurrealDbClient::save_message", skip_all, fields(message_id = %message.id))]
    async fn save_message(&self, message: &Message) -> Void {
        let record = MessageRecord::from_message(message)?;

        self.db
            .query("UPSERT type::thing('message', $id) CONTENT $record RETURN NONE;")
            .bind(("id", message.id.clone()))
            .bind(("record", record))
            .await?
            .check()?;

        debug!("Message saved.");

        Ok(())
    }

    #[instrument(name = "SurrealDbClient::get_message", skip(self))]
    async fn get_message(&self, message_id: &str) -> Res<Option<Message>> {
        let mut response = self.db.query("SELECT body FROM type::thing('message', $id);").bind(("id", message_id.to_string())).await?;

        let rows: Vec<MessageBody> = response.take(0)?;

        rows.into_iter().next().map(MessageBody::into_message).transpose()
    }

    #[instrument(name = "SurrealDbClient::get_messages_between", skip(self))]
    async fn get_messages_between(&self, chat_id: &str, start: DateTime<Utc>, end: DateTime<Utc>) -> Res<Vec<Message>> {
        let mut response = self
            .db
            .query("SELECT body, timestamp FROM message WHERE chat_id = $chat_id AND timestamp >= $start AND timestamp <= $end ORDER BY timestamp ASC;")
            .bind(("chat_id", chat_id.to_string()))
            .bind(("start", start.timestamp_millis()))
            .bind(("end", end.timestamp_millis()))
            .await?;

        into_messages(response.take(0)?)
    }

    #[instrument(name = "SurrealDbClient::get_recent_messages_between", skip(self))]
    async fn get_recent_messages_between(&self, chat_id: &str, start: DateTime<Utc>, end: DateTime<Utc>, limit: u32) -> Res<Vec<Message>> {
        let mut response = self
            .db
            .query("SELECT body, timestamp FROM message WHERE chat_id = $chat_id AND timestamp >= $start AND timestamp < $end ORDER BY timestamp DESC LIMIT $limit;")
            .bind(("chat_id", chat_id.to_string()))
            .bind(("start", start.timestamp_millis()))
            .bind(("end", end.timestamp_millis()))
            .bind(("limit", limit))
            .await?;

        let mut messages = into_messages(response.take(0)?)?;
        messages.reverse();

        Ok(messages)
    }

    #[instrument(name = "SurrealDbClient::get_messages_before", skip(self))]
    async fn get_messages_before(&self, chat_id: &str, timestamp: DateTime<Utc>, limit: u32) -> Res<Vec<Message>> {
        let mut response = self
            .db
            .query("SELECT body, timestamp FROM message WHERE chat_id = $chat_id AND timestamp < $timestamp ORDER BY timestamp DESC LIMIT $limit;")
            .bind(("chat_id", chat_id.to_string()))
            .bind(("timestamp", timestamp.timestamp_millis()))
            .bind(("limit", limit))
            .await?;

        let mut messages = into_messages(response.take(0)?)?;
        messages.reverse();

        Ok(messages)
    }

    #[instrument(name = "SurrealDbClient::get_messages_after", skip(self))]
    async fn get_messages_after(&self, chat_id: &str, timestamp: DateTime<Utc>, limit: u32) -> Res<Vec<Message>> {
        let mut response = self
            .db
            .query("SELECT body, timestamp FROM message WHERE chat_id = $chat_id AND timestamp > $timestamp ORDER BY timestamp ASC LIMIT $limit;")
            .bind(("chat_id", chat_id.to_string()))
            .bind(("timestamp", timestamp.timestamp_millis()))
            .bind(("limit", limit))
            .await?;

        into_messages(response.take(0)?)
    }
}

// Tests.
