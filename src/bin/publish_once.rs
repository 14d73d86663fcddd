//! One-shot run: a single ingestion cycle followed by a single publication tick.
//! Uses the same state files as the service, so the daily cap and dedup apply.

use std::sync::Arc;

use chrono::Utc;
use channel_digest_bot::generate::ContentGenerator;
use channel_digest_bot::ingest::providers::HttpRssFetcher;
use channel_digest_bot::telegram::TelegramClient;
use channel_digest_bot::{init_tracing, AppConfig, Services};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    init_tracing();

    let cfg = AppConfig::from_env()?;
    if let Err(missing) = cfg.validate() {
        anyhow::bail!("missing configuration: {}", missing.join(", "));
    }

    let telegram = TelegramClient::new(cfg.bot_token.as_deref().unwrap_or_default())?;
    let fetcher = Arc::new(HttpRssFetcher::new()?);
    let generator = Arc::new(ContentGenerator::from_settings(&cfg.ai));
    let services = Services::build(&cfg, fetcher, generator, Arc::new(telegram), true);

    let queued = services.scheduler.ingest_tick(Utc::now()).await;
    let report = services.scheduler.publish_now().await;

    println!(
        "publish-once done: queued={} published={} failed={} pending={} cap_reached={}",
        queued, report.published, report.failed, report.pending, report.cap_reached
    );
    Ok(())
}
