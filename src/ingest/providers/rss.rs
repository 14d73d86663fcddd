// src/ingest/providers/rss.rs
use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use metrics::{counter, histogram};
use quick_xml::de::from_str;
use serde::Deserialize;
use time::{
    format_description::well_known::{Rfc2822, Rfc3339},
    OffsetDateTime,
};

use crate::ingest::types::{FeedEntry, FeedFetcher, FetchError};

const USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0 Safari/537.36 channel-digest-bot/0.1";

// ---- RSS 2.0 ----

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}

#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    item: Vec<Item>,
}

#[derive(Debug, Deserialize)]
struct Item {
    title: Option<String>,
    link: Option<String>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
    description: Option<String>,
}

// ---- Atom ----

#[derive(Debug, Deserialize)]
struct AtomFeed {
    #[serde(rename = "entry", default)]
    entry: Vec<AtomEntry>,
}

#[derive(Debug, Deserialize)]
struct AtomEntry {
    title: Option<AtomText>,
    #[serde(rename = "link", default)]
    links: Vec<AtomLink>,
    published: Option<String>,
    updated: Option<String>,
    summary: Option<AtomText>,
    content: Option<AtomText>,
}

#[derive(Debug, Deserialize)]
struct AtomLink {
    #[serde(rename = "@href")]
    href: Option<String>,
    #[serde(rename = "@rel")]
    rel: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AtomText {
    #[serde(rename = "$text", default)]
    value: String,
}

fn to_utc(dt: OffsetDateTime) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(dt.unix_timestamp(), 0).single()
}

pub(crate) fn parse_feed_date(ts: &str) -> Option<DateTime<Utc>> {
    let ts = ts.trim();
    if let Ok(dt) = OffsetDateTime::parse(ts, &Rfc2822) {
        return to_utc(dt);
    }
    if let Ok(dt) = OffsetDateTime::parse(ts, &Rfc3339) {
        return to_utc(dt);
    }
    // Feeds in the wild use zone names `time` rejects ("EST", "+0800 (CST)").
    DateTime::parse_from_rfc2822(ts)
        .ok()
        .map(|d| d.with_timezone(&Utc))
}

/// Parse an RSS 2.0 or Atom document into entries, in document order.
pub fn parse_feed(xml: &str) -> Result<Vec<FeedEntry>, FetchError> {
    let t0 = std::time::Instant::now();
    let xml_clean = scrub_html_entities_for_xml(xml);
    let is_atom = xml_clean.contains("<feed") && !xml_clean.contains("<rss");

    let out = if is_atom {
        let feed: AtomFeed =
            from_str(&xml_clean).map_err(|e| FetchError::Malformed(format!("atom: {e}")))?;
        feed.entry
            .into_iter()
            .map(|e| {
                let link = e
                    .links
                    .iter()
                    .find(|l| l.rel.as_deref().map_or(true, |r| r == "alternate"))
                    .or_else(|| e.links.first())
                    .and_then(|l| l.href.clone())
                    .unwrap_or_default();
                let summary = e
                    .summary
                    .or(e.content)
                    .map(|t| t.value)
                    .unwrap_or_default();
                FeedEntry {
                    title: e.title.map(|t| t.value).unwrap_or_default(),
                    link,
                    published_at: e
                        .published
                        .or(e.updated)
                        .as_deref()
                        .and_then(parse_feed_date),
                    summary,
                }
            })
            .collect::<Vec<_>>()
    } else {
        let rss: Rss =
            from_str(&xml_clean).map_err(|e| FetchError::Malformed(format!("rss: {e}")))?;
        rss.channel
            .item
            .into_iter()
            .map(|it| FeedEntry {
                title: it.title.unwrap_or_default(),
                link: it.link.unwrap_or_default().trim().to_string(),
                published_at: it.pub_date.as_deref().and_then(parse_feed_date),
                summary: it.description.unwrap_or_default(),
            })
            .collect::<Vec<_>>()
    };

    let ms = t0.elapsed().as_secs_f64() * 1_000.0;
    histogram!("ingest_parse_ms").record(ms);
    counter!("ingest_events_total").increment(out.len() as u64);
    Ok(out)
}

/// Fetches feeds over HTTP and parses them with [`parse_feed`].
pub struct HttpRssFetcher {
    client: reqwest::Client,
}

impl HttpRssFetcher {
    pub fn new() -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl FeedFetcher for HttpRssFetcher {
    async fn fetch(&self, url: &str, timeout: Duration) -> Result<Vec<FeedEntry>, FetchError> {
        let resp = self
            .client
            .get(url)
            .timeout(timeout)
            .header(
                reqwest::header::ACCEPT,
                "application/rss+xml, application/atom+xml, application/xml;q=0.9, */*;q=0.8",
            )
            .send()
            .await
            .map_err(|e| classify_reqwest(e, timeout))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Http(status.as_u16()));
        }
        let body = resp.text().await.map_err(|e| classify_reqwest(e, timeout))?;
        parse_feed(&body)
    }

    fn name(&self) -> &'static str {
        "http-rss"
    }
}

fn classify_reqwest(e: reqwest::Error, timeout: Duration) -> FetchError {
    if e.is_timeout() {
        FetchError::Timeout(timeout)
    } else {
        FetchError::Network(e.to_string())
    }
}

/// Serves embedded XML documents keyed by url. Unknown urls fail like a 404.
pub struct FixtureFetcher {
    feeds: HashMap<String, String>,
}

impl FixtureFetcher {
    pub fn new() -> Self {
        Self {
            feeds: HashMap::new(),
        }
    }

    pub fn with_feed(mut self, url: &str, xml: &str) -> Self {
        self.feeds.insert(url.to_string(), xml.to_string());
        self
    }
}

impl Default for FixtureFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FeedFetcher for FixtureFetcher {
    async fn fetch(&self, url: &str, _timeout: Duration) -> Result<Vec<FeedEntry>, FetchError> {
        match self.feeds.get(url) {
            Some(xml) => parse_feed(xml),
            None => Err(FetchError::Http(404)),
        }
    }

    fn name(&self) -> &'static str {
        "fixture"
    }
}

fn scrub_html_entities_for_xml(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&ndash;", "-")
        .replace("&mdash;", "-")
        .replace("&ldquo;", "\"")
        .replace("&rdquo;", "\"")
        .replace("&lsquo;", "'")
        .replace("&rsquo;", "'")
        .replace("&hellip;", "...")
}
