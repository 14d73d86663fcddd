// tests/common/mod.rs
#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use channel_digest_bot::generate::providers::CompletionFuture;
use channel_digest_bot::generate::{ContentGenerator, Prompt, ProviderError, TextProvider};
use channel_digest_bot::ingest::types::{FeedEntry, FeedFetcher, FeedSource, FetchError};
use channel_digest_bot::publish::{MessageId, MessageTransport, Publisher, PublisherCfg, SendError};

// ---------- feeds ----------

pub fn source(name: &str, url: &str) -> FeedSource {
    FeedSource {
        name: name.to_string(),
        url: url.to_string(),
        category: "tech_news".to_string(),
        priority: None,
    }
}

pub fn entry(title: &str, link: &str, published_at: DateTime<Utc>) -> FeedEntry {
    FeedEntry {
        title: title.to_string(),
        link: link.to_string(),
        published_at: Some(published_at),
        summary: format!("Summary of {title}."),
    }
}

/// In-memory feeds keyed by url. Urls marked failing return a network error.
#[derive(Default)]
pub struct StaticFetcher {
    feeds: Mutex<HashMap<String, Vec<FeedEntry>>>,
    failing: Mutex<HashSet<String>>,
    pub calls: AtomicUsize,
}

impl StaticFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, url: &str, entries: Vec<FeedEntry>) {
        self.feeds
            .lock()
            .unwrap()
            .insert(url.to_string(), entries);
    }

    pub fn fail(&self, url: &str) {
        self.failing.lock().unwrap().insert(url.to_string());
    }
}

#[async_trait]
impl FeedFetcher for StaticFetcher {
    async fn fetch(&self, url: &str, _timeout: Duration) -> Result<Vec<FeedEntry>, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.lock().unwrap().contains(url) {
            return Err(FetchError::Network("connection refused".into()));
        }
        Ok(self
            .feeds
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .unwrap_or_default())
    }

    fn name(&self) -> &'static str {
        "static"
    }
}

// ---------- AI providers ----------

pub struct FixedProvider {
    pub name: &'static str,
    pub reply: String,
    pub calls: AtomicUsize,
}

impl FixedProvider {
    pub fn new(name: &'static str, reply: &str) -> Self {
        Self {
            name,
            reply: reply.to_string(),
            calls: AtomicUsize::new(0),
        }
    }
}

impl TextProvider for FixedProvider {
    fn complete<'a>(&'a self, _p: &'a Prompt, _m: u32, _t: Duration) -> CompletionFuture<'a> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Box::pin(async move { Ok(self.reply.clone()) })
    }

    fn name(&self) -> &'static str {
        self.name
    }
}

pub struct FailingProvider {
    pub name: &'static str,
    pub err: ProviderError,
}

impl TextProvider for FailingProvider {
    fn complete<'a>(&'a self, _p: &'a Prompt, _m: u32, _t: Duration) -> CompletionFuture<'a> {
        Box::pin(async move { Err(self.err.clone()) })
    }

    fn name(&self) -> &'static str {
        self.name
    }
}

/// Never answers within any reasonable timeout.
pub struct SlowProvider {
    pub delay: Duration,
}

impl TextProvider for SlowProvider {
    fn complete<'a>(&'a self, _p: &'a Prompt, _m: u32, _t: Duration) -> CompletionFuture<'a> {
        Box::pin(async move {
            tokio::time::sleep(self.delay).await;
            Ok("too late".to_string())
        })
    }

    fn name(&self) -> &'static str {
        "slow"
    }
}

pub fn generator(providers: Vec<Arc<dyn TextProvider>>, timeout: Duration) -> Arc<ContentGenerator> {
    Arc::new(ContentGenerator::new(providers, timeout, "English"))
}

pub fn failing_generator() -> Arc<ContentGenerator> {
    let p: Arc<dyn TextProvider> = Arc::new(FailingProvider {
        name: "down",
        err: ProviderError::Quota("exhausted".into()),
    });
    generator(vec![p], Duration::from_secs(5))
}

// ---------- transport ----------

/// Records every send. Scripted results are consumed first; afterwards every
/// send succeeds.
#[derive(Default)]
pub struct RecordingTransport {
    pub sent: Mutex<Vec<(String, String)>>,
    script: Mutex<VecDeque<Result<(), SendError>>>,
    attempts: AtomicUsize,
    next_id: AtomicI64,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_script(results: Vec<Result<(), SendError>>) -> Self {
        let t = Self::default();
        *t.script.lock().unwrap() = results.into();
        t
    }

    pub fn push(&self, r: Result<(), SendError>) {
        self.script.lock().unwrap().push_back(r);
    }

    pub fn texts(&self) -> Vec<String> {
        self.sent.lock().unwrap().iter().map(|(_, t)| t.clone()).collect()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MessageTransport for RecordingTransport {
    async fn send(&self, channel_id: &str, text: &str) -> Result<MessageId, SendError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let scripted = self.script.lock().unwrap().pop_front();
        if let Some(Err(e)) = scripted {
            return Err(e);
        }
        self.sent
            .lock()
            .unwrap()
            .push((channel_id.to_string(), text.to_string()));
        Ok(self.next_id.fetch_add(1, Ordering::SeqCst) + 1)
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}

/// Every send blocks until `release` is notified; `entered` fires when a
/// send starts.
#[derive(Default)]
pub struct HeldTransport {
    pub inner: RecordingTransport,
    pub entered: tokio::sync::Notify,
    pub release: tokio::sync::Notify,
}

#[async_trait]
impl MessageTransport for HeldTransport {
    async fn send(&self, channel_id: &str, text: &str) -> Result<MessageId, SendError> {
        self.entered.notify_one();
        self.release.notified().await;
        self.inner.send(channel_id, text).await
    }

    fn name(&self) -> &'static str {
        "held"
    }
}

pub fn transient(reason: &str) -> Result<(), SendError> {
    Err(SendError::Transient {
        reason: reason.to_string(),
        retry_after: None,
    })
}

pub fn permanent(reason: &str) -> Result<(), SendError> {
    Err(SendError::Permanent(reason.to_string()))
}

pub fn fast_publisher_cfg() -> PublisherCfg {
    PublisherCfg {
        max_len: 3500,
        min_interval: Duration::ZERO,
        max_attempts: 3,
        backoff_base: Duration::from_millis(1),
    }
}

pub fn publisher(transport: Arc<RecordingTransport>) -> Arc<Publisher> {
    publisher_with(transport)
}

pub fn publisher_with(transport: Arc<dyn MessageTransport>) -> Arc<Publisher> {
    Arc::new(Publisher::new(transport, "@channel", fast_publisher_cfg()))
}

// ---------- wiring ----------

/// Config from explicit key/value pairs only; feeds are replaced by a single
/// static source at `https://a/feed`.
pub fn config(pairs: &[(&str, &str)]) -> channel_digest_bot::AppConfig {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    let get = |k: &str| map.get(k).cloned();
    let mut cfg = channel_digest_bot::AppConfig::from_vars(&get).unwrap();
    cfg.feeds = vec![source("A", "https://a/feed")];
    cfg.publish_min_interval = Duration::ZERO;
    cfg.publish_backoff = Duration::from_millis(1);
    cfg
}

pub fn services(
    cfg: &channel_digest_bot::AppConfig,
    fetcher: Arc<StaticFetcher>,
    transport: Arc<RecordingTransport>,
) -> channel_digest_bot::Services {
    channel_digest_bot::Services::build(cfg, fetcher, failing_generator(), transport, false)
}
