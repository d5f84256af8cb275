//! OpenAI implementation of the embedding service.

use std::{sync::Arc, time::Duration};

use async_openai::{
    Client,
    config::OpenAIConfig,
    types::{CreateEmbeddingRequestArgs, Embedding},
};
use async_trait::async_trait;
use tokio::time::timeout;
use tracing::instrument;

use crate::base::{config::Config, types::Res};

use super::{EmbeddingClient, GenericEmbeddingClient};

const TIMEOUT: Duration = Duration::from_secs(30);

// Extra methods on `EmbeddingClient` applied by the openai implementation.

impl EmbeddingClient {
    pub fn openai(config: &Config) -> Self {
        let client = OpenAiEmbeddingClient::new(config);
        Self { inner: Arc::new(client) }
    }
}

// Specific implementations.

/// OpenAI embedding client implementation.
#[derive(Clone)]
pub struct OpenAiEmbeddingClient {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiEmbeddingClient {
    /// Create a new OpenAI embedding client.
    pub fn new(config: &Config) -> Self {
        let cfg = OpenAIConfig::new().with_api_key(config.openai_api_key.clone()).with_api_base(config.openai_api_base.clone());

        Self {
            client: Client::with_config(cfg),
            model: config.embedding_model.clone(),
        }
    }
}

#[async_trait]
impl GenericEmbeddingClient for OpenAiEmbeddingClient {
    #[instrument(name = "OpenAiEmbeddingClient::create", skip_all, fields(count = texts.len()))]
    async fn create(&self, texts: &[String]) -> Res<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let request = CreateEmbeddingRequestArgs::default().model(&self.model).input(texts.to_vec()).build()?;

        let response = timeout(TIMEOUT, self.client.embeddings().create(request))
            .await
            .map_err(|_| anyhow::anyhow!("Embedding request timed out after {}s", TIMEOUT.as_secs()))??;

        let vectors = into_ordered_vectors(response.data);

        if vectors.len() != texts.len() {
            return Err(anyhow::anyhow!("Expected {} embeddings, received {}.", texts.len(), vectors.len()));
        }

        Ok(vectors)
    }
}

/// Order embeddings by their input index.
fn into_ordered_vectors(mut data: Vec<Embedding>) -> Vec<Vec<f32>> {
    data.sort_by_key(|e| e.index);
    data.into_iter().map(|e| e.embedding).collect()
}

// Tests.

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embeddings_are_ordered_by_index() {
        let data = vec![
            Embedding {
                index: 1,
                object: "embedding".to_string(),
                embedding: vec![2.0, 3.0],
            },
            Embedding {
                index: 0,
                object: "embedding".to_string(),
                embedding: vec![0.5, 1.5],
            },
        ];

        assert_eq!(into_ordered_vectors(data), vec![vec![0.5, 1.5], vec![2.0, 3.0]]);
    }
}
