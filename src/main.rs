//! Channel digest bot: service entrypoint.
//! Boots the background loops (ingestion, publication, session sweep, Telegram
//! polling) and serves the admin HTTP surface.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use channel_digest_bot::generate::ContentGenerator;
use channel_digest_bot::ingest::providers::HttpRssFetcher;
use channel_digest_bot::metrics::Metrics;
use channel_digest_bot::telegram::TelegramClient;
use channel_digest_bot::{bot, create_router, init_tracing, AppConfig, Services};
use shuttle_axum::ShuttleAxum;

#[shuttle_runtime::main]
async fn axum() -> ShuttleAxum {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cfg = AppConfig::from_env().context("loading configuration")?;
    if let Err(missing) = cfg.validate() {
        return Err(anyhow::anyhow!("missing configuration: {}", missing.join(", ")).into());
    }
    tracing::info!(
        feeds = cfg.feeds.len(),
        cap = cfg.max_articles_per_day,
        publish_time = %cfg.publish_time,
        tz = %cfg.tz_offset,
        "configuration loaded"
    );

    let metrics = Metrics::init(cfg.max_articles_per_day, cfg.feeds.len())?;

    let token = cfg.bot_token.clone().unwrap_or_default();
    let telegram = TelegramClient::new(&token)?;
    let fetcher = Arc::new(HttpRssFetcher::new()?);
    let generator = Arc::new(ContentGenerator::from_settings(&cfg.ai));
    if generator.is_empty() {
        tracing::warn!("no AI providers available, posts will use raw summaries");
    }

    let services = Services::build(&cfg, fetcher, generator, Arc::new(telegram.clone()), true);

    Arc::clone(&services.scheduler).spawn_ingest_loop();
    if cfg.daily_post_enabled {
        Arc::clone(&services.scheduler).spawn_publish_loop();
    }
    if let Some(every) = cfg.trickle_interval {
        tracing::info!(every_secs = every.as_secs(), "one-article publication enabled");
        Arc::clone(&services.scheduler).spawn_trickle_loop(every);
    }
    if !cfg.daily_post_enabled && cfg.trickle_interval.is_none() {
        tracing::warn!("both daily and interval publication are disabled, only /post_now publishes");
    }
    Arc::clone(&services.conversation).spawn_sweeper(Duration::from_secs(60));
    tokio::spawn(bot::run_polling(telegram, Arc::clone(&services.bot)));

    let router = create_router(services.app_state(&cfg)).merge(metrics.router());
    Ok(router.into())
}
