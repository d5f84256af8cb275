//! HTTP implementation of the knowledge-base service.
//!
//! Endpoints (relative to the configured base URL):
//! - `POST /collections/{collection}/search` with `{ "query", "top_k" }`, returning `{ "hits": [...] }`
//! - `POST /collections/{collection}/points` with a QA point, returning `{ "key" }`
//! - `DELETE /collections/{collection}/points/{key}`

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::Deserialize;
use tracing::{debug, instrument};

use crate::base::{
    config::Config,
    types::{KnowledgeHit, KnowledgePoint, Res, Void},
};

use super::{GenericKnowledgeClient, KnowledgeClient};

const TIMEOUT: Duration = Duration::from_secs(30);

// Extra methods on `KnowledgeClient` applied by the http implementation.

impl KnowledgeClient {
    pub fn http(config: &Config) -> Res<Self> {
        let client = HttpKnowledgeClient::new(&config.knowledge_base_url, &config.knowledge_base_api_key)?;
        Ok(Self { inner: Arc::new(client) })
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    hits: Vec<KnowledgeHit>,
}

#[derive(Debug, Deserialize)]
struct UpsertResponse {
    key: String,
}

// Specific implementations.

/// HTTP knowledge-base client implementation.
#[derive(Clone)]
pub struct HttpKnowledgeClient {
    client: Client,
    base_url: Url,
    api_key: String,
}

impl HttpKnowledgeClient {
    pub fn new(base_url: &str, api_key: &str) -> Res<Self> {
        let client = Client::builder().timeout(TIMEOUT).build()?;

        Ok(Self {
            client,
            base_url: Url::parse(base_url)?,
            api_key: api_key.to_string(),
        })
    }

    /// Build `{base}/collections/{collection}/{segments...}`, percent-encoding every segment.
    fn url(&self, collection: &str, segments: &[&str]) -> Res<Url> {
        let mut url = self.base_url.clone();

        url.path_segments_mut()
            .map_err(|_| anyhow::anyhow!("Knowledge base URL `{}` cannot be a base.", self.base_url))?
            .pop_if_empty()
            .push("collections")
            .push(collection)
            .extend(segments);

        Ok(url)
    }

    fn authorized(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if self.api_key.is_empty() { builder } else { builder.bearer_auth(&self.api_key) }
    }
}

#[async_trait]
impl GenericKnowledgeClient for HttpKnowledgeClient {
    #[instrument(name = "HttpKnowledgeClient::search", skip(self))]
    async fn search(&self, collection: &str, query: &str, top_k: u32) -> Res<Vec<KnowledgeHit>> {
        let request = self.client.post(self.url(collection, &["search"])?).json(&serde_json::json!({ "query": query, "top_k": top_k }));

        let response: SearchResponse = self.authorized(request).send().await?.error_for_status()?.json().await?;

        debug!("Knowledge search returned {} hits.", response.hits.len());

        Ok(response.hits)
    }

    #[instrument(name = "HttpKnowledgeClient::upsert", skip(self, point))]
    async fn upsert(&self, collection: &str, point: &KnowledgePoint) -> Res<String> {
        let request = self.client.post(self.url(collection, &["points"])?).json(point);

        let response: UpsertResponse = self.authorized(request).send().await?.error_for_status()?.json().await?;

        Ok(response.key)
    }

    #[instrument(name = "HttpKnowledgeClient::delete", skip(self))]
    async fn delete(&self, collection: &str, key: &str) -> Void {
        let request = self.client.delete(self.url(collection, &["points", key])?);

        self.authorized(request).send().await?.error_for_status()?;

        Ok(())
    }
}

// Tests.
