// src/generate/providers.rs
//! Text-completion providers. Each one does a single remote call; fallback
//! across providers lives in `ContentGenerator`.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::{ProviderKind, ProviderSettings};
use crate::generate::prompts::Prompt;

const USER_AGENT: &str = "channel-digest-bot/0.1";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    #[error("authentication rejected: {0}")]
    Auth(String),

    #[error("quota or rate limit exceeded: {0}")]
    Quota(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("provider not configured: {0}")]
    Unconfigured(String),
}

pub type CompletionFuture<'a> =
    Pin<Box<dyn Future<Output = Result<String, ProviderError>> + Send + 'a>>;

/// Common text-completion capability. `complete` must not outlive `timeout`
/// on its own; the generator also wraps each call in a hard timeout.
pub trait TextProvider: Send + Sync + 'static {
    fn complete<'a>(
        &'a self,
        prompt: &'a Prompt,
        max_tokens: u32,
        timeout: Duration,
    ) -> CompletionFuture<'a>;

    fn name(&self) -> &'static str;

    fn model(&self) -> &str {
        ""
    }
}

fn http_client() -> anyhow::Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(Duration::from_secs(10))
        .build()?)
}

fn classify_status(status: reqwest::StatusCode, body: &str) -> ProviderError {
    let snippet: String = body.chars().take(200).collect();
    match status.as_u16() {
        401 | 403 => ProviderError::Auth(format!("HTTP {status}")),
        402 | 429 => ProviderError::Quota(format!("HTTP {status}: {snippet}")),
        _ => ProviderError::Transport(format!("HTTP {status}: {snippet}")),
    }
}

fn classify_reqwest(e: reqwest::Error, timeout: Duration) -> ProviderError {
    if e.is_timeout() {
        ProviderError::Timeout(timeout)
    } else if e.is_decode() {
        ProviderError::Malformed(e.to_string())
    } else {
        ProviderError::Transport(e.to_string())
    }
}

// ------------------------------------------------------------
// OpenAI-compatible chat completions (OpenAI, DeepSeek)
// ------------------------------------------------------------

pub struct OpenAiCompatibleProvider {
    http: reqwest::Client,
    name: &'static str,
    endpoint: String,
    api_key: String,
    model: String,
    temperature: f32,
}

impl OpenAiCompatibleProvider {
    pub fn new(settings: &ProviderSettings, temperature: f32) -> anyhow::Result<Self> {
        Ok(Self {
            http: http_client()?,
            name: settings.kind.as_str(),
            endpoint: format!("{}/chat/completions", settings.base_url().trim_end_matches('/')),
            api_key: settings.api_key.clone(),
            model: settings.model.clone(),
            temperature,
        })
    }
}

impl TextProvider for OpenAiCompatibleProvider {
    fn complete<'a>(
        &'a self,
        prompt: &'a Prompt,
        max_tokens: u32,
        timeout: Duration,
    ) -> CompletionFuture<'a> {
        Box::pin(async move {
            if self.api_key.is_empty() {
                return Err(ProviderError::Unconfigured(self.name.to_string()));
            }

            #[derive(Serialize)]
            struct Msg<'a> {
                role: &'a str,
                content: &'a str,
            }
            #[derive(Serialize)]
            struct Req<'a> {
                model: &'a str,
                messages: Vec<Msg<'a>>,
                temperature: f32,
                max_tokens: u32,
            }
            #[derive(Deserialize)]
            struct Resp {
                #[serde(default)]
                choices: Vec<Choice>,
            }
            #[derive(Deserialize)]
            struct Choice {
                message: ChoiceMsg,
            }
            #[derive(Deserialize)]
            struct ChoiceMsg {
                #[serde(default)]
                content: Option<String>,
            }

            let req = Req {
                model: &self.model,
                messages: vec![
                    Msg {
                        role: "system",
                        content: &prompt.system,
                    },
                    Msg {
                        role: "user",
                        content: &prompt.user,
                    },
                ],
                temperature: self.temperature,
                max_tokens,
            };

            let resp = self
                .http
                .post(&self.endpoint)
                .bearer_auth(&self.api_key)
                .timeout(timeout)
                .json(&req)
                .send()
                .await
                .map_err(|e| classify_reqwest(e, timeout))?;

            let status = resp.status();
            if !status.is_success() {
                let body = resp.text().await.unwrap_or_default();
                return Err(classify_status(status, &body));
            }
            let body: Resp = resp.json().await.map_err(|e| classify_reqwest(e, timeout))?;
            body.choices
                .into_iter()
                .next()
                .and_then(|c| c.message.content)
                .ok_or_else(|| ProviderError::Malformed("no choices".into()))
        })
    }

    fn name(&self) -> &'static str {
        self.name
    }

    fn model(&self) -> &str {
        &self.model
    }
}

// ------------------------------------------------------------
// Gemini generateContent
// ------------------------------------------------------------

pub struct GeminiProvider {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    temperature: f32,
}

impl GeminiProvider {
    pub fn new(settings: &ProviderSettings, temperature: f32) -> anyhow::Result<Self> {
        Ok(Self {
            http: http_client()?,
            base_url: settings.base_url().trim_end_matches('/').to_string(),
            api_key: settings.api_key.clone(),
            model: settings.model.clone(),
            temperature,
        })
    }
}

impl TextProvider for GeminiProvider {
    fn complete<'a>(
        &'a self,
        prompt: &'a Prompt,
        max_tokens: u32,
        timeout: Duration,
    ) -> CompletionFuture<'a> {
        Box::pin(async move {
            if self.api_key.is_empty() {
                return Err(ProviderError::Unconfigured("gemini".into()));
            }

            #[derive(Serialize)]
            struct Part<'a> {
                text: &'a str,
            }
            #[derive(Serialize)]
            struct Content<'a> {
                #[serde(skip_serializing_if = "Option::is_none")]
                role: Option<&'a str>,
                parts: Vec<Part<'a>>,
            }
            #[derive(Serialize)]
            #[serde(rename_all = "camelCase")]
            struct GenConfig {
                temperature: f32,
                max_output_tokens: u32,
            }
            #[derive(Serialize)]
            #[serde(rename_all = "camelCase")]
            struct Req<'a> {
                system_instruction: Content<'a>,
                contents: Vec<Content<'a>>,
                generation_config: GenConfig,
            }
            #[derive(Deserialize)]
            struct Resp {
                #[serde(default)]
                candidates: Vec<Candidate>,
            }
            #[derive(Deserialize)]
            struct Candidate {
                content: Option<RespContent>,
            }
            #[derive(Deserialize)]
            struct RespContent {
                #[serde(default)]
                parts: Vec<RespPart>,
            }
            #[derive(Deserialize)]
            struct RespPart {
                #[serde(default)]
                text: String,
            }

            let req = Req {
                system_instruction: Content {
                    role: None,
                    parts: vec![Part {
                        text: &prompt.system,
                    }],
                },
                contents: vec![Content {
                    role: Some("user"),
                    parts: vec![Part { text: &prompt.user }],
                }],
                generation_config: GenConfig {
                    temperature: self.temperature,
                    max_output_tokens: max_tokens,
                },
            };

            let url = format!("{}/models/{}:generateContent", self.base_url, self.model);
            let resp = self
                .http
                .post(&url)
                .query(&[("key", self.api_key.as_str())])
                .timeout(timeout)
                .json(&req)
                .send()
                .await
                .map_err(|e| classify_reqwest(e, timeout))?;

            let status = resp.status();
            if !status.is_success() {
                let body = resp.text().await.unwrap_or_default();
                return Err(classify_status(status, &body));
            }
            let body: Resp = resp.json().await.map_err(|e| classify_reqwest(e, timeout))?;
            let text: String = body
                .candidates
                .into_iter()
                .next()
                .and_then(|c| c.content)
                .map(|c| c.parts.into_iter().map(|p| p.text).collect())
                .unwrap_or_default();
            if text.trim().is_empty() {
                return Err(ProviderError::Malformed("empty candidate".into()));
            }
            Ok(text)
        })
    }

    fn name(&self) -> &'static str {
        "gemini"
    }

    fn model(&self) -> &str {
        &self.model
    }
}

// ------------------------------------------------------------
// Mock (AI_TEST_MODE=mock)
// ------------------------------------------------------------

/// Deterministic provider: always returns `reply`.
pub struct MockProvider {
    pub reply: String,
}

impl Default for MockProvider {
    fn default() -> Self {
        Self {
            reply: "Mock rewrite of the source text.".to_string(),
        }
    }
}

impl TextProvider for MockProvider {
    fn complete<'a>(
        &'a self,
        _prompt: &'a Prompt,
        _max_tokens: u32,
        _timeout: Duration,
    ) -> CompletionFuture<'a> {
        Box::pin(async move { Ok(self.reply.clone()) })
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

/// Construct the concrete provider for one configured entry.
pub fn build_provider(
    settings: &ProviderSettings,
    temperature: f32,
) -> anyhow::Result<Box<dyn TextProvider>> {
    Ok(match settings.kind {
        ProviderKind::Gemini => Box::new(GeminiProvider::new(settings, temperature)?),
        ProviderKind::Deepseek | ProviderKind::Openai => {
            Box::new(OpenAiCompatibleProvider::new(settings, temperature)?)
        }
    })
}
