// src/publish/mod.rs
//! Channel publisher: formatting, pacing, and retry over a `MessageTransport`.

pub mod format;
pub mod notify;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::counter;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::generate::GeneratedContent;

pub type MessageId = i64;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    #[error("transient send failure: {reason}")]
    Transient {
        reason: String,
        retry_after: Option<Duration>,
    },

    #[error("permanent send failure: {0}")]
    Permanent(String),
}

/// Outbound messaging transport (send-message API of the target channel).
#[async_trait]
pub trait MessageTransport: Send + Sync {
    async fn send(&self, channel_id: &str, text: &str) -> Result<MessageId, SendError>;

    fn name(&self) -> &'static str;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PublishError {
    #[error("publish rejected: {0}")]
    Permanent(String),

    #[error("publish failed after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: String },
}

impl PublishError {
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::Permanent(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ack {
    pub message_id: MessageId,
    pub attempts: u32,
    pub sent_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct PublisherCfg {
    /// Character budget before HTML escaping.
    pub max_len: usize,
    /// Minimum gap between two sends to the channel.
    pub min_interval: Duration,
    pub max_attempts: u32,
    pub backoff_base: Duration,
}

impl Default for PublisherCfg {
    fn default() -> Self {
        Self {
            max_len: 3500,
            min_interval: Duration::from_millis(1500),
            max_attempts: 4,
            backoff_base: Duration::from_millis(500),
        }
    }
}

/// Single logical send queue for the channel. The gate mutex is held for the
/// whole send (retries included), so digest and listing posts never interleave.
pub struct Publisher {
    transport: Arc<dyn MessageTransport>,
    channel_id: String,
    cfg: PublisherCfg,
    gate: Mutex<Option<Instant>>,
}

impl Publisher {
    pub fn new(transport: Arc<dyn MessageTransport>, channel_id: &str, cfg: PublisherCfg) -> Self {
        Self {
            transport,
            channel_id: channel_id.to_string(),
            cfg,
            gate: Mutex::new(None),
        }
    }

    pub async fn publish(&self, content: &GeneratedContent) -> Result<Ack, PublishError> {
        let text = format::render_text(&content.text, self.cfg.max_len);
        self.send_formatted(&text).await
    }

    /// A user-composed post (listing, vacancy or advertisement).
    pub async fn publish_text(&self, text: &str) -> Result<Ack, PublishError> {
        let text = format::render_text(text, self.cfg.max_len);
        self.send_formatted(&text).await
    }

    async fn send_formatted(&self, text: &str) -> Result<Ack, PublishError> {
        let mut last_sent = self.gate.lock().await;
        if let Some(prev) = *last_sent {
            tokio::time::sleep_until(prev + self.cfg.min_interval).await;
        }

        let max_attempts = self.cfg.max_attempts.max(1);
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let res = self.transport.send(&self.channel_id, text).await;
            match res {
                Ok(message_id) => {
                    *last_sent = Some(Instant::now());
                    counter!("publish_sent_total").increment(1);
                    tracing::info!(message_id, attempts = attempt, chars = text.chars().count(), "published to channel");
                    return Ok(Ack {
                        message_id,
                        attempts: attempt,
                        sent_at: Utc::now(),
                    });
                }
                Err(SendError::Permanent(reason)) => {
                    *last_sent = Some(Instant::now());
                    counter!("publish_failed_total", "kind" => "permanent").increment(1);
                    tracing::error!(reason = %reason, transport = self.transport.name(), "permanent send failure");
                    return Err(PublishError::Permanent(reason));
                }
                Err(SendError::Transient {
                    reason,
                    retry_after,
                }) => {
                    if attempt >= max_attempts {
                        *last_sent = Some(Instant::now());
                        counter!("publish_failed_total", "kind" => "exhausted").increment(1);
                        tracing::error!(attempts = attempt, reason = %reason, "send retries exhausted");
                        return Err(PublishError::RetriesExhausted {
                            attempts: attempt,
                            last: reason,
                        });
                    }
                    let delay = backoff_delay(self.cfg.backoff_base, attempt, retry_after);
                    counter!("publish_retries_total").increment(1);
                    tracing::warn!(attempt, delay_ms = delay.as_millis() as u64, reason = %reason, "transient send failure, retrying");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

/// `base * 2^(attempt-1)`; a larger server-provided `retry_after` wins.
pub fn backoff_delay(base: Duration, attempt: u32, retry_after: Option<Duration>) -> Duration {
    let shift = attempt.saturating_sub(1).min(16);
    let exp = base.saturating_mul(1u32 << shift);
    match retry_after {
        Some(ra) if ra > exp => ra,
        _ => exp,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_honours_retry_after() {
        let base = Duration::from_millis(500);
        assert_eq!(backoff_delay(base, 1, None), Duration::from_millis(500));
        assert_eq!(backoff_delay(base, 3, None), Duration::from_millis(2000));
        assert_eq!(
            backoff_delay(base, 1, Some(Duration::from_secs(5))),
            Duration::from_secs(5)
        );
        assert_eq!(
            backoff_delay(base, 4, Some(Duration::from_millis(10))),
            Duration::from_millis(4000)
        );
    }
}
