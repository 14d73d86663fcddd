mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use channel_digest_bot::generate::{
    Constraints, ContentKind, GenerationError, Origin, ProviderError, TextProvider,
    FALLBACK_PROVIDER,
};
use channel_digest_bot::ingest::types::Article;
use common::{generator, publisher, FailingProvider, FixedProvider, RecordingTransport, SlowProvider};

fn article(summary: &str) -> Article {
    Article {
        source_id: "Pandaily".into(),
        title: "Baidu ships a model".into(),
        link: "https://pandaily.com/baidu".into(),
        published_at: Utc::now(),
        raw_summary: summary.into(),
    }
}

#[tokio::test]
async fn falls_through_to_next_provider_in_order() {
    let first: Arc<dyn TextProvider> = Arc::new(FailingProvider {
        name: "gemini",
        err: ProviderError::Auth("HTTP 401".into()),
    });
    let second = Arc::new(FixedProvider::new("deepseek", "  Rewritten item.  "));
    let third = Arc::new(FixedProvider::new("openai", "unused"));
    let g = generator(
        vec![
            first,
            second.clone() as Arc<dyn TextProvider>,
            third.clone() as Arc<dyn TextProvider>,
        ],
        Duration::from_secs(5),
    );

    let out = g.digest_item(&article("raw"), Constraints::new(700)).await;
    assert_eq!(out.provider_used, "deepseek");
    assert_eq!(out.text, "Rewritten item.");
    assert_eq!(second.calls.load(Ordering::SeqCst), 1);
    assert_eq!(third.calls.load(Ordering::SeqCst), 0);
    assert!(matches!(out.origin, Origin::Article { .. }));
}

#[tokio::test]
async fn exhausted_chain_reports_last_failure() {
    let a: Arc<dyn TextProvider> = Arc::new(FailingProvider {
        name: "gemini",
        err: ProviderError::Quota("429".into()),
    });
    let b: Arc<dyn TextProvider> = Arc::new(FailingProvider {
        name: "openai",
        err: ProviderError::Malformed("no choices".into()),
    });
    let g = generator(vec![a, b], Duration::from_secs(5));
    let err = g
        .generate(
            Origin::Listing { user_id: 1 },
            "text",
            ContentKind::ListingPolish,
            Constraints::new(500),
        )
        .await
        .unwrap_err();
    assert_eq!(
        err,
        GenerationError::Exhausted {
            provider: "openai",
            last: ProviderError::Malformed("no choices".into()),
        }
    );

    let empty = generator(vec![], Duration::from_secs(5));
    assert_eq!(
        empty
            .generate(Origin::Listing { user_id: 1 }, "t", ContentKind::NewsItem, Constraints::new(10))
            .await
            .unwrap_err(),
        GenerationError::NoProviders
    );
}

#[tokio::test(start_paused = true)]
async fn stuck_provider_times_out_and_next_one_answers() {
    let slow: Arc<dyn TextProvider> = Arc::new(SlowProvider {
        delay: Duration::from_secs(3600),
    });
    let ok: Arc<dyn TextProvider> = Arc::new(FixedProvider::new("openai", "Done."));
    let g = generator(vec![slow, ok], Duration::from_secs(2));

    let started = tokio::time::Instant::now();
    let out = g.digest_item(&article("raw"), Constraints::new(700)).await;
    assert_eq!(out.provider_used, "openai");
    assert!(started.elapsed() >= Duration::from_secs(2));
    assert!(started.elapsed() < Duration::from_secs(60));
}

#[tokio::test]
async fn all_providers_failing_publishes_truncated_raw_summary() {
    let down: Arc<dyn TextProvider> = Arc::new(FailingProvider {
        name: "gemini",
        err: ProviderError::Transport("connection reset".into()),
    });
    let g = generator(vec![down], Duration::from_secs(5));

    let summary = "Baidu announced a new model today with better reasoning and lower cost for developers";
    let content = g.digest_item(&article(summary), Constraints::new(40)).await;
    assert_eq!(content.provider_used, FALLBACK_PROVIDER);
    assert_eq!(content.text, "Baidu announced a new model today with…");
    assert!(content.text.chars().count() <= 40);

    let transport = Arc::new(RecordingTransport::new());
    let p = publisher(transport.clone());
    p.publish(&content).await.unwrap();
    assert_eq!(transport.texts(), vec![content.text.clone()]);
}

#[tokio::test]
async fn empty_summary_falls_back_to_title() {
    let g = generator(vec![], Duration::from_secs(5));
    let content = g.digest_item(&article(""), Constraints::new(700)).await;
    assert_eq!(content.text, "Baidu ships a model");
}

#[tokio::test]
async fn over_long_output_is_trimmed_to_budget() {
    let long = format!("{} Tail that does not fit in the budget at all", "Short sentence.".repeat(3));
    let p: Arc<dyn TextProvider> = Arc::new(FixedProvider::new("gemini", &long));
    let g = generator(vec![p], Duration::from_secs(5));
    let out = g.digest_item(&article("raw"), Constraints::new(50)).await;
    assert_eq!(out.text, "Short sentence.Short sentence.Short sentence.");
}
