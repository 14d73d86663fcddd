// src/telegram.rs
//! Minimal Telegram Bot API client: channel posts (`sendMessage`, HTML),
//! plain replies to operators, and long polling (`getUpdates`).

use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::publish::{MessageId, MessageTransport, SendError};

const API_BASE: &str = "https://api.telegram.org";

#[derive(Clone)]
pub struct TelegramClient {
    client: Client,
    base: String,
    timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    parameters: Option<ResponseParameters>,
}

#[derive(Debug, Deserialize)]
struct ResponseParameters {
    retry_after: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct SentMessage {
    message_id: i64,
}

#[derive(Serialize)]
struct SendMessageReq<'a> {
    chat_id: &'a str,
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    parse_mode: Option<&'a str>,
    disable_web_page_preview: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<IncomingMessage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IncomingMessage {
    pub message_id: i64,
    #[serde(default)]
    pub from: Option<User>,
    pub chat: Chat,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
    #[serde(rename = "type", default)]
    pub kind: String,
}

impl TelegramClient {
    pub fn new(token: &str) -> Result<Self> {
        Self::with_base_url(API_BASE, token)
    }

    pub fn with_base_url(base_url: &str, token: &str) -> Result<Self> {
        let client = Client::builder()
            .user_agent("channel-digest-bot/0.1")
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            base: format!("{}/bot{}", base_url.trim_end_matches('/'), token),
            timeout: Duration::from_secs(15),
        })
    }

    async fn send_message(
        &self,
        chat_id: &str,
        text: &str,
        parse_mode: Option<&str>,
    ) -> Result<MessageId, SendError> {
        let req = SendMessageReq {
            chat_id,
            text,
            parse_mode,
            disable_web_page_preview: false,
        };
        let rsp = self
            .client
            .post(format!("{}/sendMessage", self.base))
            .timeout(self.timeout)
            .json(&req)
            .send()
            .await
            .map_err(|e| SendError::Transient {
                reason: format!("request failed: {e}"),
                retry_after: None,
            })?;

        let status = rsp.status().as_u16();
        let body: ApiResponse<SentMessage> = match rsp.json().await {
            Ok(b) => b,
            Err(e) => {
                return Err(classify_failure(status, &format!("unreadable response: {e}"), None));
            }
        };
        if body.ok {
            if let Some(m) = body.result {
                return Ok(m.message_id);
            }
        }
        let retry_after = body
            .parameters
            .and_then(|p| p.retry_after)
            .map(Duration::from_secs);
        Err(classify_failure(
            status,
            body.description.as_deref().unwrap_or("unknown error"),
            retry_after,
        ))
    }

    /// Plain-text reply to an operator chat (no markup).
    pub async fn send_reply(&self, chat_id: i64, text: &str) -> Result<MessageId, SendError> {
        self.send_message(&chat_id.to_string(), text, None).await
    }

    /// Long-poll for new updates after `offset`.
    pub async fn get_updates(&self, offset: Option<i64>, poll_secs: u64) -> Result<Vec<Update>> {
        let mut query: Vec<(&str, String)> = vec![
            ("timeout", poll_secs.to_string()),
            ("allowed_updates", "[\"message\"]".to_string()),
        ];
        if let Some(o) = offset {
            query.push(("offset", o.to_string()));
        }
        let rsp = self
            .client
            .get(format!("{}/getUpdates", self.base))
            .query(&query)
            .timeout(Duration::from_secs(poll_secs + 10))
            .send()
            .await?;
        let body: ApiResponse<Vec<Update>> = rsp.json().await?;
        if !body.ok {
            return Err(anyhow!(
                "getUpdates failed: {}",
                body.description.unwrap_or_default()
            ));
        }
        Ok(body.result.unwrap_or_default())
    }
}

#[async_trait]
impl MessageTransport for TelegramClient {
    async fn send(&self, channel_id: &str, text: &str) -> Result<MessageId, SendError> {
        self.send_message(channel_id, text, Some("HTML")).await
    }

    fn name(&self) -> &'static str {
        "telegram"
    }
}

/// 429 and 5xx are retryable; any other failure status means the request
/// itself is wrong (bad chat, no rights, bad markup) and will not succeed.
fn classify_failure(status: u16, description: &str, retry_after: Option<Duration>) -> SendError {
    match status {
        429 => SendError::Transient {
            reason: format!("rate limited: {description}"),
            retry_after,
        },
        500..=599 => SendError::Transient {
            reason: format!("HTTP {status}: {description}"),
            retry_after,
        },
        _ => SendError::Permanent(format!("HTTP {status}: {description}")),
    }
}
