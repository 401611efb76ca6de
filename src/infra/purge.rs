//! Cache tag sinks that hand invalidations to the host cache backend.

use std::collections::BTreeSet;

use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::Serialize;
use tracing::{debug, info};

use crate::{
    application::repos::{CacheTagSink, RepoError},
    cache::CacheTag,
};

#[derive(Debug, Serialize)]
struct PurgeRequest<'a> {
    tags: &'a BTreeSet<CacheTag>,
}

/// Posts `{"tags": [...]}` to a purge endpoint.
#[derive(Clone, Debug)]
pub struct HttpPurgeSink {
    client: Client,
    endpoint: Url,
}

impl HttpPurgeSink {
    pub fn new(endpoint: Url) -> Result<Self, RepoError> {
        let client = Client::builder()
            .user_agent(Self::user_agent())
            .build()
            .map_err(RepoError::from_transport)?;
        Ok(Self { client, endpoint })
    }

    pub fn user_agent() -> &'static str {
        concat!("tidemark/", env!("CARGO_PKG_VERSION"))
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl CacheTagSink for HttpPurgeSink {
    async fn flush(&self, tags: &BTreeSet<CacheTag>) -> Result<(), RepoError> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&PurgeRequest { tags })
            .send()
            .await
            .map_err(RepoError::from_transport)?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(RepoError::from_transport(format!(
                "purge endpoint answered {status}: {text}"
            )));
        }

        debug!(
            target = "infra::purge",
            endpoint = %self.endpoint,
            tags = tags.len(),
            "purge request accepted"
        );
        Ok(())
    }
}

/// Sink for deployments without a purge endpoint: flushes are only logged.
#[derive(Clone, Debug, Default)]
pub struct TracingTagSink;

#[async_trait]
impl CacheTagSink for TracingTagSink {
    async fn flush(&self, tags: &BTreeSet<CacheTag>) -> Result<(), RepoError> {
        let tags: Vec<&str> = tags.iter().map(CacheTag::as_str).collect();
        info!(
            target = "infra::purge",
            tags = ?tags,
            "cache tags flushed (no purge endpoint configured)"
        );
        Ok(())
    }
}
