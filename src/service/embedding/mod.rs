pub mod openai;

use std::{ops::Deref, sync::Arc};

use async_trait::async_trait;

use crate::base::types::Res;

// Traits.

/// Generic embedding client trait that clients must implement.
#[async_trait]
pub trait GenericEmbeddingClient: Send + Sync + 'static {
    /// Create one embedding vector per input text, in input order.
    async fn create(&self, texts: &[String]) -> Res<Vec<Vec<f32>>>;
}

// Structs.

/// Embedding client for the application.
///
/// This is trivially cloneable and can be passed around without the need for `Arc` or `Mutex`.
#[derive(Clone)]
pub struct EmbeddingClient {
    inner: Arc<dyn GenericEmbeddingClient>,
}

impl Deref for EmbeddingClient {
    type Target = dyn GenericEmbeddingClient;

    fn deref(&self) -> &Self::Target {
        &*self.inner
    }
}

impl EmbeddingClient {
    pub fn new(inner: Arc<dyn GenericEmbeddingClient>) -> Self {
        Self { inner }
    }
}
