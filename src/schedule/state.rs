// src/schedule/state.rs
use std::collections::VecDeque;
use std::fs;
use std::path::Path;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::ingest::types::Article;

/// Articles published on `date` (local day). Reset when the day changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyPublishCounter {
    pub date: NaiveDate,
    pub count: u32,
}

impl DailyPublishCounter {
    pub fn new(date: NaiveDate) -> Self {
        Self { date, count: 0 }
    }

    /// Pure day-boundary reset. Returns true if the counter was reset.
    pub fn roll(&mut self, today: NaiveDate) -> bool {
        if self.date != today {
            self.date = today;
            self.count = 0;
            true
        } else {
            false
        }
    }

    pub fn remaining(&self, cap: u32) -> u32 {
        cap.saturating_sub(self.count)
    }

    /// Count one publish for `today`; refuses once `cap` is reached.
    pub fn try_increment(&mut self, today: NaiveDate, cap: u32) -> bool {
        self.roll(today);
        if self.count < cap {
            self.count += 1;
            true
        } else {
            false
        }
    }

    pub fn count_for(&self, today: NaiveDate) -> u32 {
        if self.date == today {
            self.count
        } else {
            0
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingItem {
    pub article: Article,
    pub enqueued_at: DateTime<Utc>,
    #[serde(default)]
    pub failures: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerState {
    pub pending: VecDeque<PendingItem>,
    pub counter: DailyPublishCounter,
    pub last_ingest_at: Option<DateTime<Utc>>,
    pub last_publish_at: Option<DateTime<Utc>>,
}

impl SchedulerState {
    pub fn new(today: NaiveDate) -> Self {
        Self {
            pending: VecDeque::new(),
            counter: DailyPublishCounter::new(today),
            last_ingest_at: None,
            last_publish_at: None,
        }
    }

    /// Missing or unreadable file yields a fresh state.
    pub fn load(path: &Path, today: NaiveDate) -> Self {
        match fs::read_to_string(path) {
            Ok(s) => match serde_json::from_str::<SchedulerState>(&s) {
                Ok(st) => {
                    tracing::info!(pending = st.pending.len(), count = st.counter.count, path = %path.display(), "scheduler state loaded");
                    st
                }
                Err(e) => {
                    tracing::warn!(error = %e, path = %path.display(), "scheduler state unreadable, starting fresh");
                    Self::new(today)
                }
            },
            Err(_) => Self::new(today),
        }
    }

    /// Append new articles, keeping the queue ordered oldest-first. The sort is
    /// stable, so equal timestamps keep their ingestion order.
    pub fn enqueue(&mut self, articles: Vec<Article>, now: DateTime<Utc>) -> usize {
        let n = articles.len();
        self.pending.extend(articles.into_iter().map(|article| PendingItem {
            article,
            enqueued_at: now,
            failures: 0,
        }));
        self.pending
            .make_contiguous()
            .sort_by(|a, b| a.article.published_at.cmp(&b.article.published_at));
        n
    }

    /// Remove the queued item for `link`, typically once it is published.
    pub fn remove(&mut self, link: &str) -> Option<PendingItem> {
        let pos = self.pending.iter().position(|it| it.article.link == link)?;
        self.pending.remove(pos)
    }

    /// Count one failed send for `link`. The item is removed once it reaches
    /// `max_failures`. Returns the new failure count and whether it was removed.
    pub fn record_failure(&mut self, link: &str, max_failures: u32) -> Option<(u32, bool)> {
        let pos = self.pending.iter().position(|it| it.article.link == link)?;
        let failures = {
            let item = &mut self.pending[pos];
            item.failures += 1;
            item.failures
        };
        let dropped = failures >= max_failures;
        if dropped {
            self.pending.remove(pos);
        }
        Some((failures, dropped))
    }

    /// Drop items queued before `now - max_age`. Returns how many were dropped.
    pub fn expire(&mut self, now: DateTime<Utc>, max_age: Option<chrono::Duration>) -> usize {
        let Some(max_age) = max_age else {
            return 0;
        };
        let before = self.pending.len();
        self.pending.retain(|it| now - it.enqueued_at <= max_age);
        before - self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, d).unwrap()
    }

    fn article(link: &str, hour: u32) -> Article {
        Article {
            source_id: "src".into(),
            title: link.into(),
            link: link.into(),
            published_at: Utc.with_ymd_and_hms(2025, 3, 1, hour, 0, 0).unwrap(),
            raw_summary: String::new(),
        }
    }

    #[test]
    fn counter_resets_on_new_day_and_respects_cap() {
        let mut c = DailyPublishCounter::new(day(1));
        assert!(c.try_increment(day(1), 2));
        assert!(c.try_increment(day(1), 2));
        assert!(!c.try_increment(day(1), 2));
        assert_eq!(c.remaining(2), 0);
        assert_eq!(c.count_for(day(2)), 0);

        assert!(c.roll(day(2)));
        assert!(!c.roll(day(2)));
        assert_eq!(c.remaining(2), 2);
    }

    #[test]
    fn enqueue_keeps_oldest_first() {
        let now = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
        let mut s = SchedulerState::new(day(1));
        s.enqueue(vec![article("b", 9), article("c", 9)], now);
        s.enqueue(vec![article("a", 8)], now);
        let order: Vec<_> = s.pending.iter().map(|p| p.article.link.as_str()).collect();
        assert_eq!(order, vec!["a", "b", "c"]);
    }

    #[test]
    fn expire_only_when_configured() {
        let t0 = Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap();
        let mut s = SchedulerState::new(day(1));
        s.enqueue(vec![article("a", 1)], t0);
        let later = t0 + chrono::Duration::days(10);
        assert_eq!(s.expire(later, None), 0);
        assert_eq!(s.expire(later, Some(chrono::Duration::hours(48))), 1);
        assert!(s.pending.is_empty());
    }

    #[test]
    fn failures_accumulate_in_place_until_dropped() {
        let now = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
        let mut s = SchedulerState::new(day(1));
        s.enqueue(vec![article("a", 1), article("b", 2)], now);

        assert_eq!(s.record_failure("a", 2), Some((1, false)));
        assert_eq!(s.pending[0].article.link, "a");
        assert_eq!(s.record_failure("a", 2), Some((2, true)));
        assert_eq!(s.record_failure("a", 2), None);

        assert_eq!(s.remove("b").map(|it| it.failures), Some(0));
        assert!(s.pending.is_empty());
    }

    #[test]
    fn state_round_trips_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scheduler.json");
        let mut s = SchedulerState::new(day(3));
        s.counter.count = 2;
        s.enqueue(vec![article("x", 5)], Utc::now());
        crate::ingest::fingerprint::write_json_atomic(&path, &s).unwrap();
        assert_eq!(SchedulerState::load(&path, day(4)), s);
    }
}
