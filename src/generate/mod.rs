// src/generate/mod.rs
//! Content generation: prompt templates, ordered provider fallback, and the
//! caller-side fallbacks (raw summary for news, untouched text for listings).

pub mod prompts;
pub mod providers;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use metrics::counter;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};

use crate::config::AiSettings;
use crate::ingest::types::Article;

pub use prompts::Prompt;
pub use providers::{MockProvider, ProviderError, TextProvider};

/// `provider_used` value when a caller fell back to the unmodified text.
pub const FALLBACK_PROVIDER: &str = "fallback";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContentKind {
    NewsItem,
    ListingPolish,
    FreeformListing,
    AdPolish,
}

impl ContentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NewsItem => "news_item",
            Self::ListingPolish => "listing_polish",
            Self::FreeformListing => "freeform_listing",
            Self::AdPolish => "ad_polish",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Constraints {
    pub max_chars: usize,
}

impl Constraints {
    pub fn new(max_chars: usize) -> Self {
        Self {
            max_chars: max_chars.max(1),
        }
    }

    /// Rough token budget for `max_chars` characters of output.
    pub fn max_tokens(&self) -> u32 {
        let est = (self.max_chars as f64 / 3.5 + 40.0) as u32;
        est.clamp(200, 1200)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Origin {
    Article {
        source_id: String,
        title: String,
        link: String,
    },
    Listing {
        user_id: i64,
    },
}

impl Origin {
    pub fn from_article(a: &Article) -> Self {
        Self::Article {
            source_id: a.source_id.clone(),
            title: a.title.clone(),
            link: a.link.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedContent {
    pub origin: Origin,
    pub text: String,
    pub provider_used: String,
    pub generated_at: DateTime<Utc>,
}

impl GeneratedContent {
    pub fn is_fallback(&self) -> bool {
        self.provider_used == FALLBACK_PROVIDER
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GenerationError {
    #[error("no AI providers configured")]
    NoProviders,

    #[error("all AI providers failed; last ({provider}): {last}")]
    Exhausted {
        provider: &'static str,
        last: ProviderError,
    },
}

/// Ordered provider chain. Stops at the first provider that returns usable text.
pub struct ContentGenerator {
    providers: Vec<Arc<dyn TextProvider>>,
    timeout: Duration,
    language: String,
}

impl ContentGenerator {
    pub fn new(providers: Vec<Arc<dyn TextProvider>>, timeout: Duration, language: &str) -> Self {
        Self {
            providers,
            timeout,
            language: language.to_string(),
        }
    }

    /// Build the chain from settings.
    ///
    /// * `AI_TEST_MODE=mock` replaces the chain by a single deterministic mock.
    /// * Providers without an API key are skipped with a warning.
    pub fn from_settings(settings: &AiSettings) -> Self {
        let timeout = Duration::from_secs(settings.timeout_secs.max(1));

        if std::env::var("AI_TEST_MODE")
            .map(|v| v == "mock")
            .unwrap_or(false)
        {
            tracing::info!("AI_TEST_MODE=mock, using mock text provider");
            let mock: Arc<dyn TextProvider> = Arc::new(MockProvider::default());
            return Self::new(vec![mock], timeout, &settings.output_language);
        }

        let mut chain: Vec<Arc<dyn TextProvider>> = Vec::new();
        for p in &settings.providers {
            if p.api_key.trim().is_empty() {
                tracing::warn!(provider = p.kind.as_str(), key = p.kind.key_var(), "AI provider has no API key, skipped");
                continue;
            }
            match providers::build_provider(p, settings.temperature) {
                Ok(b) => chain.push(Arc::from(b)),
                Err(e) => {
                    tracing::warn!(provider = p.kind.as_str(), error = %e, "AI provider init failed, skipped")
                }
            }
        }
        tracing::info!(
            providers = ?chain.iter().map(|p| p.name()).collect::<Vec<_>>(),
            timeout_secs = timeout.as_secs(),
            "content generator ready"
        );
        Self::new(chain, timeout, &settings.output_language)
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Try each provider in order. Every call is bounded by the generator timeout.
    pub async fn generate(
        &self,
        origin: Origin,
        text: &str,
        kind: ContentKind,
        constraints: Constraints,
    ) -> Result<GeneratedContent, GenerationError> {
        if self.providers.is_empty() {
            return Err(GenerationError::NoProviders);
        }

        let prompt = prompts::build(kind, text, constraints.max_chars, &self.language);
        let max_tokens = constraints.max_tokens();
        let mut last: Option<(&'static str, ProviderError)> = None;

        for provider in &self.providers {
            let name = provider.name();
            let call = provider.complete(&prompt, max_tokens, self.timeout);
            let res = match tokio::time::timeout(self.timeout, call).await {
                Ok(r) => r,
                Err(_) => Err(ProviderError::Timeout(self.timeout)),
            };
            let res = res.and_then(|raw| {
                let out = raw.trim();
                if out.is_empty() {
                    Err(ProviderError::Malformed("empty output".into()))
                } else {
                    Ok(fit_to_budget(out, constraints.max_chars))
                }
            });

            match res {
                Ok(text) => {
                    tracing::debug!(provider = name, kind = kind.as_str(), chars = text.chars().count(), "generated");
                    return Ok(GeneratedContent {
                        origin,
                        text,
                        provider_used: name.to_string(),
                        generated_at: Utc::now(),
                    });
                }
                Err(e) => {
                    tracing::warn!(provider = name, kind = kind.as_str(), error = %e, "AI provider failed, trying next");
                    counter!("generate_provider_errors_total", "provider" => name).increment(1);
                    last = Some((name, e));
                }
            }
        }

        match last {
            Some((provider, last)) => Err(GenerationError::Exhausted { provider, last }),
            None => Err(GenerationError::NoProviders),
        }
    }

    /// News item. On failure the raw summary (or the title if the summary is
    /// empty) is used, truncated to `constraints.max_chars`.
    pub async fn digest_item(&self, article: &Article, constraints: Constraints) -> GeneratedContent {
        let source = if article.raw_summary.is_empty() {
            article.title.clone()
        } else {
            format!("{}\n\n{}", article.title, article.raw_summary)
        };
        let origin = Origin::from_article(article);

        match self
            .generate(origin.clone(), &source, ContentKind::NewsItem, constraints)
            .await
        {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(link = %article.link, error = %e, "generation failed, using raw summary");
                counter!("generate_fallback_total", "kind" => ContentKind::NewsItem.as_str()).increment(1);
                let raw = if article.raw_summary.trim().is_empty() {
                    &article.title
                } else {
                    &article.raw_summary
                };
                GeneratedContent {
                    origin,
                    text: truncate_on_word(raw.trim(), constraints.max_chars),
                    provider_used: FALLBACK_PROVIDER.to_string(),
                    generated_at: Utc::now(),
                }
            }
        }
    }

    /// Listing polish. On failure the user's text comes back unmodified.
    pub async fn polish_listing(
        &self,
        user_id: i64,
        raw: &str,
        constraints: Constraints,
    ) -> GeneratedContent {
        self.polish(ContentKind::ListingPolish, user_id, raw, constraints)
            .await
    }

    /// Advertisement polish, with the same unmodified-text fallback.
    pub async fn polish_ad(&self, user_id: i64, raw: &str, constraints: Constraints) -> GeneratedContent {
        self.polish(ContentKind::AdPolish, user_id, raw, constraints).await
    }

    /// Structure a free-form vacancy into the labelled listing layout. The
    /// first link in `raw` always survives: it is appended when the model
    /// dropped it, and on failure the raw text is used with the link line.
    pub async fn normalize_freeform(
        &self,
        user_id: i64,
        raw: &str,
        constraints: Constraints,
    ) -> GeneratedContent {
        let mut content = self
            .polish(ContentKind::FreeformListing, user_id, raw.trim(), constraints)
            .await;
        if let Some(link) = first_link(raw) {
            if !content.text.contains(link) {
                let line = format!("🔗 Link: {link}");
                let room = constraints
                    .max_chars
                    .saturating_sub(line.chars().count() + 1);
                content.text = format!("{}\n{line}", truncate_on_word(content.text.trim_end(), room));
            }
        }
        content
    }

    async fn polish(
        &self,
        kind: ContentKind,
        user_id: i64,
        raw: &str,
        constraints: Constraints,
    ) -> GeneratedContent {
        let origin = Origin::Listing { user_id };
        match self.generate(origin.clone(), raw, kind, constraints).await {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(user_id, kind = kind.as_str(), error = %e, "polish failed, keeping original text");
                counter!("generate_fallback_total", "kind" => kind.as_str()).increment(1);
                GeneratedContent {
                    origin,
                    text: raw.to_string(),
                    provider_used: FALLBACK_PROVIDER.to_string(),
                    generated_at: Utc::now(),
                }
            }
        }
    }
}

/// First `http(s)://` link in `text`, without trailing punctuation.
pub fn first_link(text: &str) -> Option<&str> {
    static RE_LINK: OnceCell<regex::Regex> = OnceCell::new();
    let re_link = RE_LINK.get_or_init(|| regex::Regex::new(r"https?://[^\s<>]+").unwrap());
    re_link
        .find(text)
        .map(|m| m.as_str().trim_end_matches(|c: char| matches!(c, '.' | ',' | ')' | ';' | '!' | '?')))
}

/// Cut at `limit` characters on a word boundary and append an ellipsis.
/// The result never exceeds `limit` characters.
pub fn truncate_on_word(s: &str, limit: usize) -> String {
    if s.chars().count() <= limit {
        return s.to_string();
    }
    if limit == 0 {
        return String::new();
    }
    let head: String = s.chars().take(limit - 1).collect();
    let cut = match head.rfind(char::is_whitespace) {
        Some(idx) if idx > 0 => head[..idx].trim_end().to_string(),
        _ => head.trim_end().to_string(),
    };
    format!("{cut}…")
}

/// Trim over-long output back to the last full sentence within `max_chars`.
/// Falls back to a word cut when no sentence end lies in the second half.
pub fn fit_to_budget(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let head: String = s.chars().take(max_chars).collect();
    let end = head
        .char_indices()
        .filter(|(_, c)| matches!(c, '.' | '!' | '?' | '。' | '…'))
        .map(|(i, c)| i + c.len_utf8())
        .last();
    match end {
        Some(e) if head[..e].chars().count() * 2 >= max_chars => head[..e].to_string(),
        _ => truncate_on_word(s, max_chars),
    }
}
