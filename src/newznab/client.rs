use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{Client, Error as ReqwestError};
use thiserror::Error;
use tracing::{debug, warn};

use crate::db::DbIndexer;
use crate::newznab::feed::{parse_search_feed, FeedError, ReleaseCandidate};
use crate::rate_limit::{EndpointClass, RateLimiter};

/// Book categories queried when an indexer has none configured.
/// 7000 is the Newznab "Books" parent; the rest are its ebook children.
pub const DEFAULT_EBOOK_CATEGORIES: &[u32] = &[7000, 7010, 7020, 7030];

const DEFAULT_PAGE_SIZE: u32 = 100;

#[derive(Error, Debug)]
pub enum NewznabError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] ReqwestError),
    #[error("API rate limit exceeded")]
    RateLimit,
    #[error("Invalid API key")]
    InvalidApiKey,
    #[error("Feed parse failed: {0}")]
    Feed(#[from] FeedError),
    #[error("Invalid category list: {0}")]
    Categories(#[from] serde_json::Error),
}

/// Seam between the search layer and the wire. `NewznabClient` is the real
/// implementation; tests substitute their own.
#[async_trait]
pub trait IndexerSearch: Send + Sync {
    async fn search(&self, query: &str) -> Result<Vec<ReleaseCandidate>, NewznabError>;
}

/// One configured Newznab endpoint
#[derive(Clone)]
pub struct NewznabClient {
    client: Client,
    name: String,
    base_url: String,
    api_key: Option<String>,
    categories: Vec<u32>,
    limiter: Arc<RateLimiter>,
}

impl NewznabClient {
    pub fn from_indexer(
        indexer: &DbIndexer,
        limiter: Arc<RateLimiter>,
    ) -> Result<Self, NewznabError> {
        let mut categories = indexer.category_ids()?;
        if categories.is_empty() {
            categories = DEFAULT_EBOOK_CATEGORIES.to_vec();
        }

        Ok(Self {
            client: Client::new(),
            name: indexer.name.clone(),
            base_url: indexer.base_url.trim_end_matches('/').to_string(),
            api_key: indexer.api_key.clone(),
            categories,
            limiter,
        })
    }

    pub fn categories(&self) -> &[u32] {
        &self.categories
    }
}

#[async_trait]
impl IndexerSearch for NewznabClient {
    async fn search(&self, query: &str) -> Result<Vec<ReleaseCandidate>, NewznabError> {
        self.limiter.acquire(EndpointClass::Indexer).await;

        let url = format!("{}/api", self.base_url);
        let cat = self
            .categories
            .iter()
            .map(|c| c.to_string())
            .collect::<Vec<_>>()
            .join(",");
        let limit = DEFAULT_PAGE_SIZE.to_string();

        let mut params = HashMap::new();
        params.insert("t", "search");
        params.insert("q", query);
        params.insert("cat", cat.as_str());
        params.insert("extended", "1");
        params.insert("o", "xml");
        params.insert("limit", limit.as_str());
        if let Some(key) = &self.api_key {
            params.insert("apikey", key.as_str());
        }

        debug!("Newznab: GET {} q={:?} cat={}", url, query, cat);

        let response = self.client.get(&url).query(&params).send().await?;

        if response.status().is_success() {
            let body = response.text().await?;
            let candidates = parse_search_feed(&body)?;
            debug!(
                "Newznab: {} returned {} candidate(s) for {:?}",
                self.name,
                candidates.len(),
                query
            );
            Ok(candidates)
        } else if response.status() == 429 {
            warn!("Newznab: {} rate limited", self.name);
            Err(NewznabError::RateLimit)
        } else if response.status() == 401 || response.status() == 403 {
            warn!("Newznab: {} rejected the API key", self.name);
            Err(NewznabError::InvalidApiKey)
        } else {
            Err(NewznabError::Request(
                response.error_for_status().unwrap_err(),
            ))
        }
    }
}
