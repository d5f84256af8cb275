pub mod http;

use std::{ops::Deref, sync::Arc};

use async_trait::async_trait;

use crate::base::types::{KnowledgeHit, KnowledgePoint, Res, Void};

// Traits.

/// Generic knowledge-base trait that clients must implement.
///
/// A knowledge base holds one or more named collections of documents and QA pairs, and
/// performs the semantic search itself.
#[async_trait]
pub trait GenericKnowledgeClient: Send + Sync + 'static {
    /// Search a collection for knowledge relevant to the query.
    async fn search(&self, collection: &str, query: &str, top_k: u32) -> Res<Vec<KnowledgeHit>>;

    /// Insert (or update) a QA point in a collection, returning its knowledge key.
    async fn upsert(&self, collection: &str, point: &KnowledgePoint) -> Res<String>;

    /// Delete a point from a collection.
    async fn delete(&self, collection: &str, key: &str) -> Void;
}

// Structs.

/// Knowledge-base client for the application.
///
/// This is trivially cloneable and can be passed around without the need for `Arc` or `Mutex`.
#[derive(Clone)]
pub struct KnowledgeClient {
    inner: Arc<dyn GenericKnowledgeClient>,
}

impl Deref for KnowledgeClient {
    type Target = dyn GenericKnowledgeClient;

    fn deref(&self) -> &Self::Target {
        &*self.inner
    }
}

impl KnowledgeClient {
    pub fn new(inner: Arc<dyn GenericKnowledgeClient>) -> Self {
        Self { inner }
    }
}
