// src/ingest/types.rs
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One configured feed. `priority` breaks ordering ties (lower first).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FeedSource {
    pub name: String,
    pub url: String,
    #[serde(default = "default_category")]
    pub category: String,
    #[serde(default)]
    pub priority: Option<u32>,
}

fn default_category() -> String {
    "tech_news".to_string()
}

/// Raw entry as returned by a fetcher, before normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedEntry {
    pub title: String,
    pub link: String,
    pub published_at: Option<DateTime<Utc>>,
    pub summary: String,
}

/// Normalized, deduplicated article. Immutable once ingested.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Article {
    pub source_id: String,
    pub title: String,
    pub link: String,
    pub published_at: DateTime<Utc>,
    pub raw_summary: String,
}

impl Article {
    pub fn fingerprint(&self) -> String {
        crate::ingest::fingerprint::fingerprint_key(&self.link, &self.source_id, &self.title)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("feed fetch timed out after {0:?}")]
    Timeout(Duration),

    #[error("feed returned HTTP {0}")]
    Http(u16),

    #[error("network error: {0}")]
    Network(String),

    #[error("malformed feed: {0}")]
    Malformed(String),
}

/// Feed fetch/parse primitive: given a url, return ordered entries.
#[async_trait::async_trait]
pub trait FeedFetcher: Send + Sync {
    async fn fetch(&self, url: &str, timeout: Duration) -> Result<Vec<FeedEntry>, FetchError>;

    fn name(&self) -> &'static str;
}
