// src/ingest/config.rs
use anyhow::{anyhow, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use crate::ingest::types::FeedSource;

const ENV_PATH: &str = "FEEDS_CONFIG_PATH";

/// Built-in sources used when no feed config file exists.
pub fn default_sources() -> Vec<FeedSource> {
    let mk = |name: &str, url: &str| FeedSource {
        name: name.to_string(),
        url: url.to_string(),
        category: "tech_news".to_string(),
        priority: None,
    };
    vec![
        mk("Tech in Asia (China)", "https://www.techinasia.com/tag/china/feed"),
        mk("ChinaTechNews.com", "https://chinatechnews.com/feed"),
        mk("Pandaily", "https://pandaily.com/feed"),
    ]
}

/// Load feed sources from an explicit path. Supports TOML or JSON formats.
pub fn load_sources_from(path: &Path) -> Result<Vec<FeedSource>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading feed sources from {}", path.display()))?;
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    parse_sources(&content, ext.as_str())
}

/// Load feed sources using env var + fallbacks:
/// 1) $FEEDS_CONFIG_PATH
/// 2) config/feeds.toml
/// 3) config/feeds.json
/// 4) built-in defaults
pub fn load_sources_default() -> Result<Vec<FeedSource>> {
    if let Ok(p) = std::env::var(ENV_PATH) {
        let pb = PathBuf::from(p);
        if pb.exists() {
            return load_sources_from(&pb);
        } else {
            return Err(anyhow!("FEEDS_CONFIG_PATH points to non-existent path"));
        }
    }
    let toml_p = PathBuf::from("config/feeds.toml");
    if toml_p.exists() {
        return load_sources_from(&toml_p);
    }
    let json_p = PathBuf::from("config/feeds.json");
    if json_p.exists() {
        return load_sources_from(&json_p);
    }
    Ok(default_sources())
}

/// The file extension decides the format. Without a known extension JSON is
/// tried first, then TOML, and both errors are reported.
fn parse_sources(s: &str, ext: &str) -> Result<Vec<FeedSource>> {
    match ext {
        "toml" => parse_toml(s).context("parsing TOML feed sources"),
        "json" => parse_json(s).context("parsing JSON feed sources"),
        _ => parse_json(s).or_else(|json_err| {
            parse_toml(s).map_err(|toml_err| {
                anyhow!("unsupported feed sources format (as JSON: {json_err}; as TOML: {toml_err})")
            })
        }),
    }
}

fn parse_toml(s: &str) -> Result<Vec<FeedSource>> {
    #[derive(serde::Deserialize)]
    struct TomlFeeds {
        feeds: Vec<FeedSource>,
    }
    let v: TomlFeeds = toml::from_str(s)?;
    Ok(clean_list(v.feeds))
}

fn parse_json(s: &str) -> Result<Vec<FeedSource>> {
    let v: Vec<FeedSource> = serde_json::from_str(s)?;
    Ok(clean_list(v))
}

/// Trim, drop blanks, collapse duplicate urls (first wins), and assign
/// list-position priorities where none were given.
fn clean_list(items: Vec<FeedSource>) -> Vec<FeedSource> {
    use std::collections::HashSet;
    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(items.len());
    for mut it in items {
        it.name = it.name.trim().to_string();
        it.url = it.url.trim().to_string();
        if it.name.is_empty() || it.url.is_empty() {
            continue;
        }
        if !seen.insert(it.url.clone()) {
            continue;
        }
        if it.priority.is_none() {
            it.priority = Some(out.len() as u32);
        }
        out.push(it);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toml_and_json_are_cleaned() {
        let toml = r#"
[[feeds]]
name = " Pandaily "
url = "https://pandaily.com/feed"

[[feeds]]
name = ""
url = "https://blank.example/feed"

[[feeds]]
name = "Dup"
url = "https://pandaily.com/feed"
"#;
        let v = parse_toml(toml).unwrap();
        assert_eq!(v.len(), 1);
        assert_eq!(v[0].name, "Pandaily");
        assert_eq!(v[0].category, "tech_news");
        assert_eq!(v[0].priority, Some(0));

        let json = r#"[{"name":"A","url":"https://a/feed","priority":7},{"name":"B","url":"https://b/feed"}]"#;
        let j = parse_json(json).unwrap();
        assert_eq!(j[0].priority, Some(7));
        assert_eq!(j[1].priority, Some(1));
    }

    #[test]
    fn unknown_format_errors() {
        let err = parse_sources("sources = 5", "txt").unwrap_err().to_string();
        assert!(err.contains("as JSON") && err.contains("as TOML"), "{err}");
    }

    #[test]
    fn extension_decides_format_regardless_of_content() {
        let json = r#"[{"name":"[[feeds]] digest","url":"https://a/feed"}]"#;
        assert_eq!(parse_sources(json, "json").unwrap()[0].name, "[[feeds]] digest");

        // A broken TOML file reports the TOML error instead of a JSON one.
        let err = parse_sources("[[feeds]]\nname = \"X\"\n", "toml").unwrap_err();
        assert!(format!("{err:#}").contains("TOML"), "{err:#}");

        // Unknown extension: TOML content is still accepted.
        let v = parse_sources("[[feeds]]\nname = \"X\"\nurl = \"https://x/feed\"\n", "").unwrap();
        assert_eq!(v[0].url, "https://x/feed");
    }
}
