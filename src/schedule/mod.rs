// src/schedule/mod.rs
//! Digest scheduler: hourly ingestion into a pending queue, a daily
//! publication tick bounded by the per-day cap, and the admin override.

pub mod state;

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, Offset, TimeZone, Utc};
use metrics::{describe_gauge, gauge};
use once_cell::sync::OnceCell;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::generate::{Constraints, ContentGenerator};
use crate::ingest::fingerprint::write_json_atomic;
use crate::ingest::FeedIngestor;
use crate::publish::notify::AdminNotifier;
use crate::publish::Publisher;

pub use state::{DailyPublishCounter, PendingItem, SchedulerState};

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_gauge!("digest_pending_articles", "Articles waiting for a publication tick.");
        describe_gauge!("digest_published_today", "Articles published on the current local day.");
    });
}

#[derive(Debug, Clone)]
pub struct SchedulerCfg {
    pub daily_cap: u32,
    pub publish_time: NaiveTime,
    pub tz_offset: FixedOffset,
    pub ingest_interval: Duration,
    /// Rolled-over articles older than this are dropped. `None` keeps them.
    pub pending_max_age: Option<chrono::Duration>,
    /// Failed publication ticks before an article is dropped.
    pub max_failures: u32,
    pub max_post_length: usize,
}

impl Default for SchedulerCfg {
    fn default() -> Self {
        Self {
            daily_cap: 3,
            publish_time: NaiveTime::from_hms_opt(10, 0, 0).unwrap_or_default(),
            tz_offset: FixedOffset::east_opt(8 * 3600).unwrap_or_else(|| Utc.fix()),
            ingest_interval: Duration::from_secs(3600),
            pending_max_age: None,
            max_failures: 3,
            max_post_length: 3500,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    pub published: u32,
    pub failed: u32,
    pub dropped: u32,
    pub remaining_quota: u32,
    pub pending: usize,
    /// The cap was already exhausted; nothing was attempted.
    pub cap_reached: bool,
    /// A permanent send failure stopped the batch.
    pub aborted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchedulerStatus {
    pub last_ingest_at: Option<DateTime<Utc>>,
    pub last_publish_at: Option<DateTime<Utc>>,
    pub pending: usize,
    pub published_today: u32,
    pub daily_cap: u32,
    pub next_publish_at: DateTime<Utc>,
}

fn failure_notice(r: &TickReport) -> String {
    let mut text = format!(
        "Publication tick: {} published, {} failed, {} dropped, {} still queued.",
        r.published, r.failed, r.dropped, r.pending
    );
    if r.aborted {
        text.push_str(" The channel rejected a post; check the bot's channel permissions.");
    }
    text
}

/// Local calendar day of `now` at `offset`.
pub fn local_date(now: DateTime<Utc>, offset: FixedOffset) -> NaiveDate {
    now.with_timezone(&offset).date_naive()
}

/// Next instant strictly after `now` whose local time is `publish_time`.
pub fn next_publish_at(
    now: DateTime<Utc>,
    publish_time: NaiveTime,
    offset: FixedOffset,
) -> DateTime<Utc> {
    let local = now.with_timezone(&offset).naive_local();
    let mut candidate = local.date().and_time(publish_time);
    if candidate <= local {
        candidate += chrono::Duration::days(1);
    }
    let utc_naive = candidate - chrono::Duration::seconds(offset.local_minus_utc() as i64);
    Utc.from_utc_datetime(&utc_naive)
}

pub struct DigestScheduler {
    ingestor: FeedIngestor,
    generator: Arc<ContentGenerator>,
    publisher: Arc<Publisher>,
    cfg: SchedulerCfg,
    state: Mutex<SchedulerState>,
    state_path: Option<PathBuf>,
    // Serializes snapshot+write so the newest snapshot lands last.
    persist_lock: Mutex<()>,
    // Held for a whole publication tick; `publish_now` waits behind it.
    publish_lock: tokio::sync::Mutex<()>,
    notifier: Option<Arc<AdminNotifier>>,
}

impl DigestScheduler {
    pub fn new(
        ingestor: FeedIngestor,
        generator: Arc<ContentGenerator>,
        publisher: Arc<Publisher>,
        cfg: SchedulerCfg,
        state_path: Option<PathBuf>,
    ) -> Self {
        ensure_metrics_described();
        let today = local_date(Utc::now(), cfg.tz_offset);
        let state = match &state_path {
            Some(p) => SchedulerState::load(p, today),
            None => SchedulerState::new(today),
        };
        Self {
            ingestor,
            generator,
            publisher,
            cfg,
            state: Mutex::new(state),
            state_path,
            persist_lock: Mutex::new(()),
            publish_lock: tokio::sync::Mutex::new(()),
            notifier: None,
        }
    }

    /// Direct-message admins when a tick leaves articles unsent.
    pub fn with_notifier(mut self, notifier: Arc<AdminNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    fn state(&self) -> MutexGuard<'_, SchedulerState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn persist(&self) {
        let Some(path) = &self.state_path else {
            return;
        };
        let _g = self.persist_lock.lock().unwrap_or_else(|p| p.into_inner());
        let snapshot = self.state().clone();
        if let Err(e) = write_json_atomic(path, &snapshot) {
            tracing::warn!(error = %format!("{e:#}"), "scheduler state persist failed");
        }
    }

    fn update_gauges(&self, now: DateTime<Utc>) {
        let st = self.state();
        gauge!("digest_pending_articles").set(st.pending.len() as f64);
        gauge!("digest_published_today")
            .set(st.counter.count_for(local_date(now, self.cfg.tz_offset)) as f64);
    }

    /// Run one ingestion cycle and queue its articles. Returns how many were queued.
    pub async fn ingest_tick(&self, now: DateTime<Utc>) -> usize {
        let report = self.ingestor.run_cycle(now).await;
        let (queued, expired, pending) = {
            let mut st = self.state();
            let queued = st.enqueue(report.articles, now);
            let expired = st.expire(now, self.cfg.pending_max_age);
            st.last_ingest_at = Some(now);
            (queued, expired, st.pending.len())
        };
        self.persist();
        self.update_gauges(now);
        tracing::info!(queued, expired, pending, "ingest tick");
        queued
    }

    /// Publish up to the remaining daily quota, oldest first. Items stay in the
    /// queue until their send succeeds; a failed item keeps its place at the
    /// head and surplus stays queued for later ticks.
    pub async fn publication_tick(&self, now: DateTime<Utc>) -> TickReport {
        self.run_tick(now, None).await
    }

    /// A tick that publishes at most one article, still bounded by the daily cap.
    pub async fn trickle_tick(&self, now: DateTime<Utc>) -> TickReport {
        self.run_tick(now, Some(1)).await
    }

    async fn run_tick(&self, now: DateTime<Utc>, limit: Option<usize>) -> TickReport {
        let _running = self.publish_lock.lock().await;
        let today = local_date(now, self.cfg.tz_offset);
        let cap = self.cfg.daily_cap;
        let mut report = TickReport::default();

        // Snapshot only; nothing leaves `pending` before it is on the channel.
        let batch: Vec<PendingItem> = {
            let mut st = self.state();
            st.counter.roll(today);
            report.dropped += st.expire(now, self.cfg.pending_max_age) as u32;
            let quota = st.counter.remaining(cap) as usize;
            if quota == 0 {
                report.cap_reached = true;
                report.pending = st.pending.len();
                Vec::new()
            } else {
                let take = limit.map_or(quota, |l| quota.min(l));
                st.pending.iter().take(take).cloned().collect()
            }
        };
        if report.cap_reached {
            tracing::info!(cap, pending = report.pending, "daily cap reached, publication tick skipped");
            self.persist();
            return report;
        }

        let constraints = Constraints::new(self.cfg.max_post_length);
        for item in batch {
            let link = item.article.link.as_str();
            let content = self.generator.digest_item(&item.article, constraints).await;
            match self.publisher.publish(&content).await {
                Ok(ack) => {
                    {
                        let mut st = self.state();
                        st.remove(link);
                        if !st.counter.try_increment(today, cap) {
                            tracing::error!("published past daily cap");
                        }
                        st.last_publish_at = Some(ack.sent_at);
                    }
                    report.published += 1;
                    self.persist();
                    tracing::info!(link = %link, provider = %content.provider_used, message_id = ack.message_id, "article published");
                }
                Err(e) => {
                    report.failed += 1;
                    let outcome = self.state().record_failure(link, self.cfg.max_failures);
                    match outcome {
                        Some((failures, true)) => {
                            report.dropped += 1;
                            tracing::warn!(link = %link, failures, error = %e, "article dropped after repeated failures");
                        }
                        Some((failures, false)) => {
                            tracing::warn!(link = %link, failures, error = %e, "article not sent, kept in queue");
                        }
                        None => tracing::warn!(link = %link, error = %e, "article not sent and no longer queued"),
                    }
                    self.persist();
                    if e.is_permanent() {
                        report.aborted = true;
                        break;
                    }
                }
            }
        }

        {
            let st = self.state();
            report.pending = st.pending.len();
            report.remaining_quota = st.counter.remaining(cap);
        }
        self.update_gauges(now);
        tracing::info!(
            published = report.published,
            failed = report.failed,
            dropped = report.dropped,
            pending = report.pending,
            aborted = report.aborted,
            "publication tick finished"
        );
        if report.failed > 0 {
            if let Some(notifier) = &self.notifier {
                notifier.notify(&failure_notice(&report)).await;
            }
        }
        report
    }

    /// Admin override: an immediate publication tick, bounded by the remaining
    /// quota. Queues behind a tick that is already running.
    pub async fn publish_now(&self) -> TickReport {
        tracing::info!("publish-now requested");
        self.publication_tick(Utc::now()).await
    }

    pub fn status(&self, now: DateTime<Utc>) -> SchedulerStatus {
        let st = self.state();
        SchedulerStatus {
            last_ingest_at: st.last_ingest_at,
            last_publish_at: st.last_publish_at,
            pending: st.pending.len(),
            published_today: st.counter.count_for(local_date(now, self.cfg.tz_offset)),
            daily_cap: self.cfg.daily_cap,
            next_publish_at: next_publish_at(now, self.cfg.publish_time, self.cfg.tz_offset),
        }
    }

    pub fn pending_len(&self) -> usize {
        self.state().pending.len()
    }

    /// Interval-driven ingestion; missed ticks are skipped, not replayed.
    pub fn spawn_ingest_loop(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(self.cfg.ingest_interval);
            tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tick.tick().await;
                self.ingest_tick(Utc::now()).await;
            }
        })
    }

    /// Fixed-interval publication of one article per tick.
    pub fn spawn_trickle_loop(self: Arc<Self>, every: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(every);
            tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tick.tick().await;
                self.trickle_tick(Utc::now()).await;
            }
        })
    }

    /// Wall-clock publication: sleep until the next local publish time, run
    /// the tick, repeat.
    pub fn spawn_publish_loop(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut from = Utc::now();
            loop {
                let next = next_publish_at(from, self.cfg.publish_time, self.cfg.tz_offset);
                let wait = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);
                tracing::info!(next = %next, wait_secs = wait.as_secs(), "next publication tick scheduled");
                tokio::time::sleep(wait).await;
                self.publication_tick(Utc::now()).await;
                from = Utc::now().max(next + chrono::Duration::seconds(1));
            }
        })
    }
}
