mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;

use channel_digest_bot::generate::{GeneratedContent, Origin};
use channel_digest_bot::publish::{Publisher, PublisherCfg, PublishError, SendError};
use common::{permanent, transient, RecordingTransport};

fn content(text: &str) -> GeneratedContent {
    GeneratedContent {
        origin: Origin::Listing { user_id: 1 },
        text: text.to_string(),
        provider_used: "gemini".to_string(),
        generated_at: Utc::now(),
    }
}

fn cfg(min_interval_ms: u64) -> PublisherCfg {
    PublisherCfg {
        max_len: 3500,
        min_interval: Duration::from_millis(min_interval_ms),
        max_attempts: 4,
        backoff_base: Duration::from_millis(500),
    }
}

#[tokio::test(start_paused = true)]
async fn transient_failures_are_retried_with_backoff() {
    let transport = Arc::new(RecordingTransport::with_script(vec![
        transient("502 bad gateway"),
        transient("502 bad gateway"),
    ]));
    let p = Publisher::new(transport.clone(), "@news", cfg(0));

    let started = Instant::now();
    let ack = p.publish(&content("Hello")).await.unwrap();
    assert_eq!(ack.attempts, 3);
    // 500ms + 1000ms
    assert!(started.elapsed() >= Duration::from_millis(1500));
    assert_eq!(transport.attempts(), 3);
    assert_eq!(transport.texts(), vec!["Hello".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn server_retry_after_is_honoured() {
    let transport = Arc::new(RecordingTransport::with_script(vec![Err(
        SendError::Transient {
            reason: "429 too many requests".into(),
            retry_after: Some(Duration::from_secs(7)),
        },
    )]));
    let p = Publisher::new(transport.clone(), "@news", cfg(0));

    let started = Instant::now();
    p.publish(&content("Hi")).await.unwrap();
    assert!(started.elapsed() >= Duration::from_secs(7));
}

#[tokio::test(start_paused = true)]
async fn permanent_failure_is_not_retried() {
    let transport = Arc::new(RecordingTransport::with_script(vec![permanent(
        "chat not found",
    )]));
    let p = Publisher::new(transport.clone(), "@news", cfg(0));

    let err = p.publish(&content("Hi")).await.unwrap_err();
    assert!(err.is_permanent());
    assert_eq!(transport.attempts(), 1);
    assert!(transport.texts().is_empty());
}

#[tokio::test(start_paused = true)]
async fn retries_stop_at_max_attempts() {
    let transport = Arc::new(RecordingTransport::with_script(
        (0..10).map(|_| transient("timeout")).collect(),
    ));
    let p = Publisher::new(transport.clone(), "@news", cfg(0));

    let err = p.publish(&content("Hi")).await.unwrap_err();
    assert_eq!(
        err,
        PublishError::RetriesExhausted {
            attempts: 4,
            last: "timeout".into(),
        }
    );
    assert_eq!(transport.attempts(), 4);
}

#[tokio::test(start_paused = true)]
async fn consecutive_sends_respect_min_interval() {
    let transport = Arc::new(RecordingTransport::new());
    let p = Publisher::new(transport.clone(), "@news", cfg(1500));

    let started = Instant::now();
    p.publish(&content("one")).await.unwrap();
    p.publish(&content("two")).await.unwrap();
    p.publish(&content("three")).await.unwrap();
    assert!(started.elapsed() >= Duration::from_millis(3000));
    assert_eq!(transport.texts(), vec!["one", "two", "three"]);
}

#[tokio::test(start_paused = true)]
async fn concurrent_publishes_are_serialized() {
    let transport = Arc::new(RecordingTransport::with_script(vec![transient("flaky")]));
    let p = Arc::new(Publisher::new(transport.clone(), "@news", cfg(100)));

    let handles: Vec<_> = (0..5)
        .map(|i| {
            let p = p.clone();
            tokio::spawn(async move { p.publish(&content(&format!("post {i}"))).await })
        })
        .collect();
    for h in handles {
        h.await.unwrap().unwrap();
    }

    let sent = transport.texts();
    assert_eq!(sent.len(), 5);
    // Each post is delivered exactly once.
    for i in 0..5 {
        assert_eq!(sent.iter().filter(|t| **t == format!("post {i}")).count(), 1);
    }
    assert_eq!(transport.attempts(), 6);
}

#[tokio::test]
async fn long_text_is_truncated_and_escaped() {
    let transport = Arc::new(RecordingTransport::new());
    let p = Publisher::new(
        transport.clone(),
        "@news",
        PublisherCfg {
            max_len: 20,
            min_interval: Duration::ZERO,
            ..cfg(0)
        },
    );
    p.publish(&content("R&D <budget> grows again this quarter"))
        .await
        .unwrap();
    let sent = &transport.texts()[0];
    assert!(sent.starts_with("R&amp;D &lt;budget&gt;"));
    assert!(sent.ends_with('…'));
}
