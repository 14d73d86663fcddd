// src/config/ai.rs
use serde::{Deserialize, Serialize};
use std::{fs, path::Path, path::PathBuf};

const ENV_PATH: &str = "AI_CONFIG_PATH";

fn default_timeout_secs() -> u64 {
    30
}
fn default_language() -> String {
    "Russian".to_string()
}
fn default_temperature() -> f32 {
    0.2
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Gemini,
    Deepseek,
    Openai,
}

impl ProviderKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gemini" | "google" => Some(Self::Gemini),
            "deepseek" => Some(Self::Deepseek),
            "openai" | "gpt" => Some(Self::Openai),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gemini => "gemini",
            Self::Deepseek => "deepseek",
            Self::Openai => "openai",
        }
    }

    pub fn key_var(&self) -> &'static str {
        match self {
            Self::Gemini => "GEMINI_API_KEY",
            Self::Deepseek => "DEEPSEEK_API_KEY",
            Self::Openai => "OPENAI_API_KEY",
        }
    }

    fn model_var(&self) -> &'static str {
        match self {
            Self::Gemini => "GEMINI_MODEL",
            Self::Deepseek => "DEEPSEEK_MODEL",
            Self::Openai => "OPENAI_MODEL",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            Self::Gemini => "gemini-1.5-flash",
            Self::Deepseek => "deepseek-chat",
            Self::Openai => "gpt-4o-mini",
        }
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            Self::Gemini => "https://generativelanguage.googleapis.com/v1beta",
            Self::Deepseek => "https://api.deepseek.com",
            Self::Openai => "https://api.openai.com/v1",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProviderSettings {
    pub kind: ProviderKind,
    /// "ENV" means: read from GEMINI_API_KEY / DEEPSEEK_API_KEY / OPENAI_API_KEY.
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub base_url: Option<String>,
}

impl ProviderSettings {
    pub fn base_url(&self) -> &str {
        self.base_url
            .as_deref()
            .unwrap_or_else(|| self.kind.default_base_url())
    }
}

/// AI provider chain, in priority order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AiSettings {
    #[serde(default)]
    pub providers: Vec<ProviderSettings>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_language")]
    pub output_language: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

impl Default for AiSettings {
    fn default() -> Self {
        Self {
            providers: Vec::new(),
            timeout_secs: default_timeout_secs(),
            output_language: default_language(),
            temperature: default_temperature(),
        }
    }
}

impl AiSettings {
    pub fn load_from_file<P: AsRef<Path>>(
        path: P,
        get: &dyn Fn(&str) -> Option<String>,
    ) -> anyhow::Result<Self> {
        let data = fs::read_to_string(path)?;
        let mut cfg: AiSettings = serde_json::from_str(&data)?;

        for p in cfg.providers.iter_mut() {
            if p.api_key.trim().eq_ignore_ascii_case("env") {
                p.api_key = get(p.kind.key_var()).unwrap_or_default();
            }
            if p.model.trim().is_empty() {
                p.model = p.kind.default_model().to_string();
            }
        }
        if cfg.timeout_secs == 0 {
            cfg.timeout_secs = default_timeout_secs();
        }
        Ok(cfg)
    }

    /// Build the chain from `LLM_PROVIDERS` and per-provider env vars.
    pub fn from_vars(get: &dyn Fn(&str) -> Option<String>) -> Self {
        let order = get("LLM_PROVIDERS").unwrap_or_else(|| "gemini,deepseek,openai".to_string());

        let mut providers: Vec<ProviderSettings> = Vec::new();
        for name in order.split(',').filter(|s| !s.trim().is_empty()) {
            let Some(kind) = ProviderKind::parse(name) else {
                tracing::warn!(provider = name.trim(), "unknown AI provider in LLM_PROVIDERS, skipped");
                continue;
            };
            if providers.iter().any(|p| p.kind == kind) {
                continue;
            }
            let base_url = match kind {
                ProviderKind::Deepseek => get("DEEPSEEK_BASE_URL"),
                ProviderKind::Openai => get("OPENAI_BASE_URL"),
                ProviderKind::Gemini => None,
            };
            providers.push(ProviderSettings {
                kind,
                api_key: get(kind.key_var()).unwrap_or_default(),
                model: get(kind.model_var()).unwrap_or_else(|| kind.default_model().to_string()),
                base_url,
            });
        }

        Self {
            providers,
            timeout_secs: get("AI_TIMEOUT_SECS")
                .and_then(|v| v.trim().parse().ok())
                .filter(|v: &u64| *v > 0)
                .unwrap_or_else(default_timeout_secs),
            output_language: get("OUTPUT_LANGUAGE")
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(default_language),
            temperature: default_temperature(),
        }
    }

    /// $AI_CONFIG_PATH, then config/ai.json, then env vars.
    pub fn load(get: &dyn Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        if let Some(p) = get(ENV_PATH) {
            let pb = PathBuf::from(p);
            if !pb.exists() {
                anyhow::bail!("AI_CONFIG_PATH points to non-existent path");
            }
            return Self::load_from_file(&pb, get);
        }
        let default_p = PathBuf::from("config/ai.json");
        if default_p.exists() {
            return Self::load_from_file(&default_p, get);
        }
        Ok(Self::from_vars(get))
    }
}
