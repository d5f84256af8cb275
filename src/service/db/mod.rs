pub mod surreal;

use std::{ops::Deref, sync::Arc};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::base::types::{Message, Res, Void};

// Traits.

/// Generic database client trait that clients must implement.
///
/// This trait defines the message store used by the pipelines: every ingested chat message
/// is saved here, and the proactive reply of a message is persisted by saving the whole
/// message again.
#[async_trait]
pub trait GenericDbClient: Send + Sync + 'static {
    /// Insert or replace a message, keyed by its ID.
    async fn save_message(&self, message: &Message) -> Void;

    /// Get a message by its ID.
    async fn get_message(&self, message_id: &str) -> Res<Option<Message>>;

    /// Get the messages of a chat with `start <= timestamp <= end`, in ascending time order.
    async fn get_messages_between(&self, chat_id: &str, start: DateTime<Utc>, end: DateTime<Utc>) -> Res<Vec<Message>>;

    /// Get up to `limit` of the most recent messages of a chat with `start <= timestamp < end`,
    /// in ascending time order.
    async fn get_recent_messages_between(&self, chat_id: &str, start: DateTime<Utc>, end: DateTime<Utc>, limit: u32) -> Res<Vec<Message>>;

    /// Get up to `limit` of the most recent messages of a chat strictly before `timestamp`,
    /// in ascending time order.
    async fn get_messages_before(&self, chat_id: &str, timestamp: DateTime<Utc>, limit: u32) -> Res<Vec<Message>>;

    /// Get up to `limit` of the earliest messages of a chat strictly after `timestamp`,
    /// in ascending time order.
    async fn get_messages_after(&self, chat_id: &str, timestamp: DateTime<Utc>, limit: u32) -> Res<Vec<Message>>;
}

// Structs.

/// Database client for the application.
///
/// This is trivially cloneable and can be passed around without the need for `Arc` or `Mutex`.
#[derive(Clone)]
pub struct DbClient {
    inner: Arc<dyn GenericDbClient>,
}

impl Deref for DbClient {
    type Target = dyn GenericDbClient;

    fn deref(&self) -> &Self::Target {
        &*self.inner
    }
}

impl DbClient {
    pub fn new(inner: Arc<dyn GenericDbClient>) -> Self {
        Self { inner }
    }
}
