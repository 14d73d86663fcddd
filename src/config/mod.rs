// src/config/mod.rs
//! Runtime configuration: env vars (optionally from `.env`) plus feed/AI files.

pub mod ai;

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use chrono::{FixedOffset, NaiveTime};

use crate::ingest::config::{default_sources, load_sources_default};
use crate::ingest::types::FeedSource;
use crate::ingest::IngestCfg;
use crate::publish::PublisherCfg;
use crate::schedule::SchedulerCfg;

pub use ai::{AiSettings, ProviderKind, ProviderSettings};

/// Hard platform limit for a single channel message.
pub const PLATFORM_MESSAGE_LIMIT: usize = 4096;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bot_token: Option<String>,
    pub channel_id: Option<String>,
    pub admin_ids: Vec<i64>,
    pub admin_token: Option<String>,

    pub tz_offset: FixedOffset,
    pub publish_time: NaiveTime,

    pub ingest_interval: Duration,
    pub feed_timeout: Duration,
    pub max_article_age: Option<chrono::Duration>,
    pub fingerprint_retention: chrono::Duration,
    pub exclude_keywords: Vec<String>,

    pub max_articles_per_day: u32,
    pub pending_max_age: Option<chrono::Duration>,
    /// Daily batch at `publish_time` (`ENABLE_DAILY_POST`).
    pub daily_post_enabled: bool,
    /// One article per interval (`ENABLE_HOURLY_POST`); `None` when off.
    pub trickle_interval: Option<Duration>,

    pub max_post_length: usize,
    pub publish_min_interval: Duration,
    pub publish_max_attempts: u32,
    pub publish_backoff: Duration,

    pub session_timeout: Duration,
    pub polish_enabled: bool,
    pub ad_polish_enabled: bool,

    pub state_dir: PathBuf,
    pub feeds: Vec<FeedSource>,
    pub ai: AiSettings,
}

impl AppConfig {
    /// Read the process environment and the feed/AI config files.
    pub fn from_env() -> Result<Self> {
        let get = |k: &str| std::env::var(k).ok();
        let mut cfg = Self::from_vars(&get)?;
        cfg.feeds = load_sources_default()?;
        cfg.ai = AiSettings::load(&get)?;
        Ok(cfg)
    }

    /// Build from an arbitrary key lookup. Feeds default to the built-in list.
    pub fn from_vars(get: &dyn Fn(&str) -> Option<String>) -> Result<Self> {
        let non_empty = |k: &str| get(k).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let tz_offset = match non_empty("TIMEZONE_OFFSET") {
            Some(v) => parse_offset(&v)?,
            None => FixedOffset::east_opt(8 * 3600).ok_or_else(|| anyhow!("bad default offset"))?,
        };
        let publish_time = match non_empty("PUBLISH_TIME") {
            Some(v) => NaiveTime::parse_from_str(&v, "%H:%M")
                .with_context(|| format!("PUBLISH_TIME must be HH:MM, got {v:?}"))?,
            None => NaiveTime::from_hms_opt(10, 0, 0).ok_or_else(|| anyhow!("bad default time"))?,
        };

        let max_age_hours: i64 = parse_or(get, "MAX_ARTICLE_AGE_HOURS", 24)?;
        let pending_hours: i64 = parse_or(get, "PENDING_MAX_AGE_HOURS", 0)?;
        let max_post_length: usize = parse_or(get, "MAX_POST_LENGTH", 3500)?;
        let trickle_secs: u64 = parse_or(get, "HOURLY_POST_INTERVAL_SECS", 600)?;

        Ok(Self {
            bot_token: non_empty("BOT_TOKEN"),
            channel_id: non_empty("CHANNEL_ID"),
            admin_ids: parse_admin_ids(&get("ADMIN_IDS").unwrap_or_default()),
            admin_token: non_empty("ADMIN_TOKEN"),

            tz_offset,
            publish_time,

            ingest_interval: Duration::from_secs(parse_or::<u64>(get, "INGEST_INTERVAL_SECS", 3600)?.max(1)),
            feed_timeout: Duration::from_secs(parse_or::<u64>(get, "FEED_TIMEOUT_SECS", 30)?.max(1)),
            max_article_age: (max_age_hours > 0).then(|| chrono::Duration::hours(max_age_hours)),
            fingerprint_retention: chrono::Duration::days(parse_or::<i64>(get, "FINGERPRINT_RETENTION_DAYS", 30)?.max(1)),
            exclude_keywords: split_list(
                &get("EXCLUDE_KEYWORDS").unwrap_or_else(|| "sponsored,advertisement".to_string()),
            ),

            max_articles_per_day: parse_or(get, "MAX_ARTICLES_PER_DAY", 3)?,
            pending_max_age: (pending_hours > 0).then(|| chrono::Duration::hours(pending_hours)),
            daily_post_enabled: env_bool(get, "ENABLE_DAILY_POST", true),
            trickle_interval: env_bool(get, "ENABLE_HOURLY_POST", false)
                .then(|| Duration::from_secs(trickle_secs.max(1))),

            max_post_length: max_post_length.clamp(1, PLATFORM_MESSAGE_LIMIT),
            publish_min_interval: Duration::from_millis(parse_or(get, "PUBLISH_MIN_INTERVAL_MS", 1500)?),
            publish_max_attempts: parse_or::<u32>(get, "PUBLISH_MAX_ATTEMPTS", 4)?.max(1),
            publish_backoff: Duration::from_millis(parse_or(get, "PUBLISH_BACKOFF_MS", 500)?),

            session_timeout: Duration::from_secs(parse_or::<u64>(get, "SESSION_TIMEOUT_SECS", 1800)?.max(1)),
            polish_enabled: env_bool(get, "AI_POLISH_ENABLE_LISTING", true),
            ad_polish_enabled: env_bool(get, "AI_POLISH_ENABLE_AD", true),

            state_dir: PathBuf::from(non_empty("STATE_DIR").unwrap_or_else(|| "state".to_string())),
            feeds: default_sources(),
            ai: AiSettings::from_vars(get),
        })
    }

    /// Collects every missing essential value so they can be reported at once.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut missing = Vec::new();
        if self.bot_token.is_none() {
            missing.push("BOT_TOKEN".to_string());
        }
        if self.channel_id.is_none() {
            missing.push("CHANNEL_ID".to_string());
        }
        if self.feeds.is_empty() {
            missing.push("feed sources".to_string());
        }
        if missing.is_empty() {
            Ok(())
        } else {
            Err(missing)
        }
    }


    pub fn fingerprints_path(&self) -> PathBuf {
        self.state_dir.join("fingerprints.json")
    }

    pub fn scheduler_path(&self) -> PathBuf {
        self.state_dir.join("scheduler.json")
    }

    pub fn ingest_cfg(&self) -> IngestCfg {
        IngestCfg {
            fetch_timeout: self.feed_timeout,
            max_age: self.max_article_age,
            retention: self.fingerprint_retention,
            exclude_keywords: self.exclude_keywords.clone(),
            summary_cap: 4000,
        }
    }

    pub fn publisher_cfg(&self) -> PublisherCfg {
        PublisherCfg {
            max_len: self.max_post_length,
            min_interval: self.publish_min_interval,
            max_attempts: self.publish_max_attempts,
            backoff_base: self.publish_backoff,
        }
    }

    pub fn scheduler_cfg(&self) -> SchedulerCfg {
        SchedulerCfg {
            daily_cap: self.max_articles_per_day,
            publish_time: self.publish_time,
            tz_offset: self.tz_offset,
            ingest_interval: self.ingest_interval,
            pending_max_age: self.pending_max_age,
            max_failures: 3,
            max_post_length: self.max_post_length,
        }
    }
}

fn parse_or<T>(get: &dyn Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match get(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty()) {
        Some(v) => v
            .parse::<T>()
            .map_err(|e| anyhow!("invalid {key}={v:?}: {e}")),
        None => Ok(default),
    }
}

pub fn env_bool(get: &dyn Fn(&str) -> Option<String>, key: &str, default: bool) -> bool {
    match get(key) {
        Some(v) => matches!(
            v.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "y" | "on"
        ),
        None => default,
    }
}

/// Non-numeric entries are ignored.
pub fn parse_admin_ids(s: &str) -> Vec<i64> {
    s.split(',')
        .filter_map(|p| p.trim().parse::<i64>().ok())
        .collect()
}

fn split_list(s: &str) -> Vec<String> {
    s.split(',')
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect()
}

/// `+08:00`, `-05:30`, `+0800`, `UTC`, `Z`.
pub fn parse_offset(s: &str) -> Result<FixedOffset> {
    let s = s.trim();
    if s.eq_ignore_ascii_case("utc") || s == "Z" {
        return FixedOffset::east_opt(0).ok_or_else(|| anyhow!("bad offset"));
    }
    let (sign, rest) = match s.as_bytes().first() {
        Some(b'+') => (1, &s[1..]),
        Some(b'-') => (-1, &s[1..]),
        _ => return Err(anyhow!("TIMEZONE_OFFSET must start with + or -, got {s:?}")),
    };
    let digits: String = rest.chars().filter(|c| *c != ':').collect();
    if digits.len() != 4 || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(anyhow!("TIMEZONE_OFFSET must look like +HH:MM, got {s:?}"));
    }
    let hours: i32 = digits[..2].parse()?;
    let minutes: i32 = digits[2..].parse()?;
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
        .ok_or_else(|| anyhow!("TIMEZONE_OFFSET out of range: {s:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn cfg_from(pairs: &[(&str, &str)]) -> Result<AppConfig> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_vars(&move |k: &str| map.get(k).cloned())
    }

    #[test]
    fn defaults_are_applied() {
        let c = cfg_from(&[]).unwrap();
        assert_eq!(c.publish_time, NaiveTime::from_hms_opt(10, 0, 0).unwrap());
        assert_eq!(c.tz_offset.local_minus_utc(), 8 * 3600);
        assert_eq!(c.max_articles_per_day, 3);
        assert_eq!(c.max_post_length, 3500);
        assert_eq!(c.exclude_keywords, vec!["sponsored", "advertisement"]);
        assert_eq!(c.max_article_age, Some(chrono::Duration::hours(24)));
        assert!(c.pending_max_age.is_none());
        assert!(c.polish_enabled);
        assert!(c.ad_polish_enabled);
        assert!(c.daily_post_enabled);
        assert!(c.trickle_interval.is_none());
        assert_eq!(c.validate().unwrap_err(), vec!["BOT_TOKEN", "CHANNEL_ID"]);
    }

    #[test]
    fn overrides_and_clamps() {
        let c = cfg_from(&[
            ("BOT_TOKEN", "t"),
            ("CHANNEL_ID", "@chan"),
            ("ADMIN_IDS", "1, x, 42"),
            ("MAX_POST_LENGTH", "10000"),
            ("MAX_ARTICLE_AGE_HOURS", "0"),
            ("AI_POLISH_ENABLE_LISTING", "off"),
            ("TIMEZONE_OFFSET", "-05:30"),
            ("ENABLE_HOURLY_POST", "yes"),
            ("ENABLE_DAILY_POST", "false"),
            ("AI_POLISH_ENABLE_AD", "0"),
        ])
        .unwrap();
        assert_eq!(c.admin_ids, vec![1, 42]);
        assert_eq!(c.max_post_length, PLATFORM_MESSAGE_LIMIT);
        assert!(c.max_article_age.is_none());
        assert!(!c.polish_enabled);
        assert!(!c.ad_polish_enabled);
        assert!(!c.daily_post_enabled);
        assert_eq!(c.trickle_interval, Some(Duration::from_secs(600)));
        assert_eq!(c.tz_offset.local_minus_utc(), -(5 * 3600 + 30 * 60));
        assert!(c.validate().is_ok());
    }

    #[test]
    fn malformed_values_are_errors() {
        assert!(cfg_from(&[("PUBLISH_TIME", "25:99")]).is_err());
        assert!(cfg_from(&[("MAX_ARTICLES_PER_DAY", "many")]).is_err());
        assert!(cfg_from(&[("TIMEZONE_OFFSET", "Asia/Shanghai")]).is_err());
    }

    #[test]
    fn offsets_parse() {
        assert_eq!(parse_offset("+0800").unwrap().local_minus_utc(), 28800);
        assert_eq!(parse_offset("UTC").unwrap().local_minus_utc(), 0);
    }
}
