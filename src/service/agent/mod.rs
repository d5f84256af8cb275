pub mod openai;

use std::{ops::Deref, pin::Pin, sync::Arc};

use async_trait::async_trait;
use futures::Stream;

use crate::{
    base::types::{AgentEvent, AgentRequest, Res},
    pipeline::session::SessionKey,
};

// Types.

/// Stream of events produced by a single agent run.
pub type AgentEventStream = Pin<Box<dyn Stream<Item = Res<AgentEvent>> + Send>>;

// Traits.

/// Generic agent execution engine trait that clients must implement.
///
/// The engine owns model selection and authentication.  A run takes an instruction and
/// context, and produces a stream of events; the final event carries the structured
/// output matching the request's schema.
#[async_trait]
pub trait GenericAgentClient: Send + Sync + 'static {
    /// Run the agent for the given session.
    async fn run(&self, session: &SessionKey, request: &AgentRequest) -> Res<AgentEventStream>;
}

// Structs.

/// Agent client for the application.
///
/// This is trivially cloneable and can be passed around without the need for `Arc` or `Mutex`.
#[derive(Clone)]
pub struct AgentClient {
    inner: Arc<dyn GenericAgentClient>,
}

impl Deref for AgentClient {
    type Target = dyn GenericAgentClient;

    fn deref(&self) -> &Self::Target {
        &*self.inner
    }
}

impl AgentClient {
    pub fn new(inner: Arc<dyn GenericAgentClient>) -> Self {
        Self { inner }
    }
}
