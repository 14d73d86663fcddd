// src/ingest/mod.rs
pub mod config;
pub mod fingerprint;
pub mod providers;
pub mod types;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge};
use once_cell::sync::OnceCell;

use crate::ingest::fingerprint::FingerprintStore;
use crate::ingest::types::{Article, FeedEntry, FeedFetcher, FeedSource, FetchError};

/// One-time metrics registration (so series show up on /metrics).
fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("ingest_events_total", "Total entries parsed from feeds.");
        describe_counter!("ingest_kept_total", "New articles passed downstream.");
        describe_counter!(
            "ingest_filtered_total",
            "Entries dropped by keyword/age/empty filters."
        );
        describe_counter!(
            "ingest_dedup_total",
            "Entries dropped because their fingerprint was already recorded."
        );
        describe_counter!(
            "ingest_provider_errors_total",
            "Feed fetch/parse errors."
        );
        describe_histogram!("ingest_parse_ms", "Feed parse time in milliseconds.");
        describe_gauge!(
            "ingest_pipeline_last_run_ts",
            "Unix ts when the ingest cycle last ran."
        );
    });
}

/// Normalize feed text: decode entities, strip tags, collapse whitespace,
/// cap at `max_chars` characters.
pub fn normalize_text(s: &str, max_chars: usize) -> String {
    // 1) HTML entity decode
    let mut out = html_escape::decode_html_entities(s).to_string();

    // 2) Strip HTML tags
    static RE_TAGS: OnceCell<regex::Regex> = OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| regex::Regex::new(r"(?is)</?[^>]+>").unwrap());
    out = re_tags.replace_all(&out, " ").to_string();

    // 3) Normalize typographic quotes to ASCII
    out = out
        .replace(['\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");

    // 4) Collapse whitespace
    static RE_WS: OnceCell<regex::Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| regex::Regex::new(r"\s+").unwrap());
    out = re_ws.replace_all(&out, " ").to_string();
    out = out.trim().to_string();

    // 5) Length cap
    if out.chars().count() > max_chars {
        out = out.chars().take(max_chars).collect();
    }

    out
}

pub fn contains_excluded<S: AsRef<str>>(text: &str, keywords: &[S]) -> bool {
    let lower = text.to_lowercase();
    keywords
        .iter()
        .map(|k| k.as_ref().trim().to_lowercase())
        .any(|k| !k.is_empty() && lower.contains(&k))
}

#[derive(Debug, Clone)]
pub struct IngestCfg {
    /// Upper bound on a single source's fetch.
    pub fetch_timeout: Duration,
    /// Entries published earlier than `now - max_age` are skipped.
    pub max_age: Option<chrono::Duration>,
    /// Fingerprints older than this are pruned each cycle.
    pub retention: chrono::Duration,
    pub exclude_keywords: Vec<String>,
    pub summary_cap: usize,
}

impl Default for IngestCfg {
    fn default() -> Self {
        Self {
            fetch_timeout: Duration::from_secs(30),
            max_age: Some(chrono::Duration::hours(24)),
            retention: chrono::Duration::days(30),
            exclude_keywords: vec!["sponsored".into(), "advertisement".into()],
            summary_cap: 4000,
        }
    }
}

/// Outcome of one ingestion cycle. `articles` are new, fingerprinted, and
/// ordered oldest-first (ties: source priority, then discovery order).
#[derive(Debug, Default)]
pub struct IngestReport {
    pub articles: Vec<Article>,
    pub filtered: usize,
    pub dedup: usize,
    pub failed_sources: Vec<String>,
}

pub struct FeedIngestor {
    sources: Vec<FeedSource>,
    fetcher: Arc<dyn FeedFetcher>,
    store: Arc<FingerprintStore>,
    cfg: IngestCfg,
}

impl FeedIngestor {
    pub fn new(
        sources: Vec<FeedSource>,
        fetcher: Arc<dyn FeedFetcher>,
        store: Arc<FingerprintStore>,
        cfg: IngestCfg,
    ) -> Self {
        Self {
            sources,
            fetcher,
            store,
            cfg,
        }
    }

    /// Poll every source once. A failing source is logged and skipped; if
    /// all fail the report is simply empty.
    pub async fn run_cycle(&self, now: DateTime<Utc>) -> IngestReport {
        ensure_metrics_described();

        let fetched = self.fetch_all().await;

        let mut report = IngestReport::default();
        let mut kept: Vec<(u32, Article)> = Vec::new();

        for (idx, (src, res)) in self.sources.iter().zip(fetched).enumerate() {
            let entries = match res {
                Some(Ok(v)) => v,
                Some(Err(e)) => {
                    tracing::warn!(source = %src.name, url = %src.url, error = %e, "feed fetch failed");
                    counter!("ingest_provider_errors_total").increment(1);
                    report.failed_sources.push(src.name.clone());
                    continue;
                }
                None => {
                    tracing::warn!(source = %src.name, "feed task aborted");
                    counter!("ingest_provider_errors_total").increment(1);
                    report.failed_sources.push(src.name.clone());
                    continue;
                }
            };

            let priority = src.priority.unwrap_or(idx as u32);
            for entry in entries {
                match self.admit(src, entry, now) {
                    Admit::Filtered => report.filtered += 1,
                    Admit::Duplicate => report.dedup += 1,
                    Admit::New(article) => kept.push((priority, article)),
                }
            }
        }

        // Stable: equal (published_at, priority) keep discovery order.
        kept.sort_by(|a, b| {
            a.1.published_at
                .cmp(&b.1.published_at)
                .then(a.0.cmp(&b.0))
        });
        report.articles = kept.into_iter().map(|(_, a)| a).collect();

        let pruned = self.store.prune(now - self.cfg.retention);
        if let Err(e) = self.store.persist() {
            tracing::warn!(error = %format!("{e:#}"), "fingerprint persist failed");
        }

        counter!("ingest_kept_total").increment(report.articles.len() as u64);
        counter!("ingest_filtered_total").increment(report.filtered as u64);
        counter!("ingest_dedup_total").increment(report.dedup as u64);
        gauge!("ingest_pipeline_last_run_ts").set(now.timestamp().max(0) as f64);

        tracing::info!(
            target: "ingest",
            kept = report.articles.len(),
            filtered = report.filtered,
            dedup = report.dedup,
            failed = report.failed_sources.len(),
            pruned,
            "ingest cycle finished"
        );
        report
    }

    async fn fetch_all(&self) -> Vec<Option<Result<Vec<FeedEntry>, FetchError>>> {
        let mut set = tokio::task::JoinSet::new();
        for (idx, src) in self.sources.iter().enumerate() {
            let fetcher = Arc::clone(&self.fetcher);
            let url = src.url.clone();
            let timeout = self.cfg.fetch_timeout;
            set.spawn(async move {
                let res = match tokio::time::timeout(timeout, fetcher.fetch(&url, timeout)).await {
                    Ok(r) => r,
                    Err(_) => Err(FetchError::Timeout(timeout)),
                };
                (idx, res)
            });
        }

        let mut results: Vec<Option<Result<Vec<FeedEntry>, FetchError>>> =
            (0..self.sources.len()).map(|_| None).collect();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((idx, res)) => results[idx] = Some(res),
                Err(e) => tracing::warn!(error = %e, "feed task join error"),
            }
        }
        results
    }

    fn admit(&self, src: &FeedSource, entry: FeedEntry, now: DateTime<Utc>) -> Admit {
        let title = normalize_text(&entry.title, 500);
        let summary = normalize_text(&entry.summary, self.cfg.summary_cap);
        let link = entry.link.trim().to_string();

        if link.is_empty() && title.is_empty() {
            return Admit::Filtered;
        }
        if contains_excluded(&title, &self.cfg.exclude_keywords)
            || contains_excluded(&summary, &self.cfg.exclude_keywords)
        {
            return Admit::Filtered;
        }
        if let (Some(max_age), Some(published)) = (self.cfg.max_age, entry.published_at) {
            if now - published > max_age {
                return Admit::Filtered;
            }
        }

        let article = Article {
            source_id: src.name.clone(),
            title,
            link,
            published_at: entry.published_at.unwrap_or(now),
            raw_summary: summary,
        };
        // Recorded at ingestion time, before any downstream work.
        if self.store.check_and_record(&article.fingerprint(), now) {
            Admit::New(article)
        } else {
            Admit::Duplicate
        }
    }
}

enum Admit {
    Filtered,
    Duplicate,
    New(Article),
}
