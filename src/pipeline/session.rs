//! Explicit session storage for agent runs.
//!
//! A session is keyed by (pipeline name, user, session id) and collects the events of every
//! stage run in it, plus the structured output of each stage under the stage's name.  The
//! store is passed by reference into each stage call.

use std::{collections::HashMap, ops::Deref, sync::Arc};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::Mutex;

use crate::base::types::{AgentEvent, Res, Void};

/// Identifies one session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionKey {
    /// The pipeline that owns the session (e.g., `proactive`).
    pub app: String,
    /// The user on whose behalf the pipeline runs; the chat ID for chat pipelines.
    pub user: String,
    /// The session ID; the message ID for message pipelines.
    pub session: String,
}

impl SessionKey {
    pub fn new(app: impl Into<String>, user: impl Into<String>, session: impl Into<String>) -> Self {
        Self {
            app: app.into(),
            user: user.into(),
            session: session.into(),
        }
    }
}

/// The recorded state of a session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub events: Vec<AgentEvent>,
    pub state: Map<String, Value>,
}

// Traits.

/// Generic session store trait.
#[async_trait]
pub trait GenericSessionStore: Send + Sync + 'static {
    /// Append an event to the session, creating the session if needed.
    async fn append_event(&self, key: &SessionKey, event: AgentEvent) -> Void;

    /// Set a state entry of the session, creating the session if needed.
    async fn set_state(&self, key: &SessionKey, name: &str, value: Value) -> Void;

    /// Get a snapshot of the session.
    async fn get(&self, key: &SessionKey) -> Res<Option<Session>>;

    /// Remove the session.
    async fn remove(&self, key: &SessionKey) -> Void;
}

// Structs.

/// Session store for the application.
///
/// This is trivially cloneable and can be passed around without the need for `Arc` or `Mutex`.
#[derive(Clone)]
pub struct SessionStore {
    inner: Arc<dyn GenericSessionStore>,
}

impl Deref for SessionStore {
    type Target = dyn GenericSessionStore;

    fn deref(&self) -> &Self::Target {
        &*self.inner
    }
}

impl SessionStore {
    pub fn new(inner: Arc<dyn GenericSessionStore>) -> Self {
        Self { inner }
    }

    /// Creates an in-memory session store.
    pub fn memory() -> Self {
        Self::new(Arc::new(MemorySessionStore::default()))
    }
}

/// In-memory session store.
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: Mutex<HashMap<SessionKey, Session>>,
}

#[async_trait]
impl GenericSessionStore for MemorySessionStore {
    async fn append_event(&self, key: &SessionKey, event: AgentEvent) -> Void {
        self.sessions.lock().await.entry(key.clone()).or_default().events.push(event);
        Ok(())
    }

    async fn set_state(&self, key: &SessionKey, name: &str, value: Value) -> Void {
        self.sessions.lock().await.entry(key.clone()).or_default().state.insert(name.to_string(), value);
        Ok(())
    }

    async fn get(&self, key: &SessionKey) -> Res<Option<Session>> {
        Ok(self.sessions.lock().await.get(key).cloned())
    }

    async fn remove(&self, key: &SessionKey) -> Void {
        self.sessions.lock().await.remove(key);
        Ok(())
    }
}

// Tests.
