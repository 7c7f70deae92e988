//! The tick engine: adaptive polling, fan-out, and the schedule cache.
//!
//! One tick acquires the TTL'd lock, polls the due channels through a small
//! worker pool, drains deferred queues, and runs due digests. Schedule state
//! lives in an in-memory cache and is flushed to the store periodically, so
//! a hot poll loop does not rewrite source rows every few seconds.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{Timelike, Utc};
use futures::future::join_all;

use crate::app::{Result, TelefeedError};
use crate::delivery;
use crate::digest;
use crate::domain::{normalize_username, DeliveryMode, Source, Subscription};
use crate::extractor;
use crate::fetcher::PageFetcher;
use crate::notifier::Notifier;
use crate::store::Store;

pub const MIN_POLL_SEC: i64 = 5;
pub const MAX_POLL_SEC: i64 = 240;

/// Interval growth on an empty poll and on a failed poll.
pub const EMPTY_GROWTH: f64 = 1.6;
pub const FAIL_GROWTH: f64 = 2.0;

/// Posts delivered when a source is seen for the first time.
pub const FIRST_SYNC_LIMIT: usize = 5;

pub const MAX_SOURCES_PER_TICK: usize = 30;
pub const MAX_FETCH_CONCURRENCY: usize = 6;

pub const LOCK_NAME: &str = "scrape_tick";
pub const LOCK_TTL_SEC: i64 = 25;

/// How often dirty schedule state is written back to the store.
pub const STATE_FLUSH_INTERVAL_SEC: i64 = 15 * 60;

pub const LAST_ERROR_MAX_LEN: usize = 250;

/// Upper bound on backfill posts at follow time.
pub const BACKFILL_MAX: i64 = 10;

fn grow_interval(current: i64, factor: f64) -> i64 {
    let grown = (current as f64 * factor).round() as i64;
    grown.clamp(MIN_POLL_SEC, MAX_POLL_SEC)
}

fn truncate_error(msg: &str) -> String {
    if msg.chars().count() <= LAST_ERROR_MAX_LEN {
        msg.to_string()
    } else {
        msg.chars().take(LAST_ERROR_MAX_LEN).collect()
    }
}

#[derive(Debug, Default)]
struct ScheduleCache {
    entries: HashMap<String, Source>,
    dirty: HashSet<String>,
    hydrated: bool,
    last_flush: i64,
}

/// Outcome of one tick, for logging and the `tick` command.
#[derive(Debug, Default, Clone, Copy)]
pub struct TickSummary {
    /// Another instance held the lock; nothing ran.
    pub skipped: bool,
    pub polled: usize,
    pub deferred_sent: usize,
    pub digest_posts: usize,
}

/// Result of a follow: the normalized channel name and how many posts
/// were backfilled.
#[derive(Debug, Clone)]
pub struct FollowOutcome {
    pub username: String,
    pub delivered: usize,
}

pub struct Ticker {
    store: Arc<dyn Store>,
    fetcher: Arc<dyn PageFetcher>,
    notifier: Arc<dyn Notifier>,
    archive_posts: bool,
    cache: Mutex<ScheduleCache>,
}

impl Ticker {
    pub fn new(
        store: Arc<dyn Store>,
        fetcher: Arc<dyn PageFetcher>,
        notifier: Arc<dyn Notifier>,
        archive_posts: bool,
    ) -> Self {
        Self {
            store,
            fetcher,
            notifier,
            archive_posts,
            cache: Mutex::new(ScheduleCache::default()),
        }
    }

    /// Run one tick against the real clock.
    pub async fn run_tick(&self) -> Result<TickSummary> {
        let now = Utc::now();
        self.run_tick_at(now.timestamp(), now.hour()).await
    }

    /// Run one tick at an explicit time. Split out so tests can pin the clock.
    pub async fn run_tick_at(&self, now_sec: i64, utc_hour: u32) -> Result<TickSummary> {
        if !self.store.try_acquire_lock(LOCK_NAME, now_sec, LOCK_TTL_SEC)? {
            tracing::debug!("tick lock held elsewhere, skipping");
            return Ok(TickSummary {
                skipped: true,
                ..TickSummary::default()
            });
        }

        // The TTL only recovers from a crashed tick; a finished one hands
        // the lock back so the next cadence firing is not starved.
        let result = self.tick_locked(now_sec, utc_hour).await;
        if let Err(e) = self.store.release_lock(LOCK_NAME) {
            tracing::error!("failed to release tick lock: {}", e);
        }
        result
    }

    async fn tick_locked(&self, now_sec: i64, utc_hour: u32) -> Result<TickSummary> {
        let due = self.due_sources(now_sec)?;
        let polled = due.len();
        if !due.is_empty() {
            self.poll_pool(due, now_sec, utc_hour).await;
        }

        let mut deferred_sent = 0;
        for user_id in self.store.users_with_deferred()? {
            match delivery::flush_deferred(
                self.store.as_ref(),
                self.notifier.as_ref(),
                user_id,
                now_sec,
                utc_hour,
            )
            .await
            {
                Ok(n) => deferred_sent += n,
                Err(e) => {
                    tracing::error!("deferred flush for user {} failed: {}", user_id, e);
                }
            }
        }

        let digest_posts = if self.archive_posts {
            digest::run_digests(self.store.as_ref(), self.notifier.as_ref(), now_sec).await?
        } else {
            0
        };

        self.flush_cache(now_sec, false)?;

        Ok(TickSummary {
            skipped: false,
            polled,
            deferred_sent,
            digest_posts,
        })
    }

    /// Channels due for a poll: subscribed, next_check_at reached, capped per
    /// tick with the longest-overdue first.
    fn due_sources(&self, now_sec: i64) -> Result<Vec<String>> {
        let subscribed: HashSet<String> = self.store.subscribed_usernames()?.into_iter().collect();

        let mut cache = self.lock_cache()?;
        if !cache.hydrated {
            for source in self.store.get_all_sources()? {
                cache.entries.insert(source.username.clone(), source);
            }
            cache.hydrated = true;
            cache.last_flush = now_sec;
        }

        // Sources followed from another process since hydration.
        for name in &subscribed {
            if !cache.entries.contains_key(name) {
                if let Some(source) = self.store.get_source(name)? {
                    cache.entries.insert(name.clone(), source);
                }
            }
        }

        let mut due: Vec<(i64, String)> = cache
            .entries
            .values()
            .filter(|s| subscribed.contains(&s.username) && s.next_check_at <= now_sec)
            .map(|s| (s.next_check_at, s.username.clone()))
            .collect();
        due.sort();
        due.truncate(MAX_SOURCES_PER_TICK);
        Ok(due.into_iter().map(|(_, name)| name).collect())
    }

    /// Poll the due set with a fixed number of workers pulling from a shared
    /// index, so slow channels never serialize the whole batch.
    async fn poll_pool(&self, due: Vec<String>, now_sec: i64, utc_hour: u32) {
        let next = AtomicUsize::new(0);
        let workers = (0..MAX_FETCH_CONCURRENCY.min(due.len())).map(|_| {
            let next = &next;
            let due = &due;
            async move {
                loop {
                    let i = next.fetch_add(1, Ordering::SeqCst);
                    let Some(name) = due.get(i) else { break };
                    if let Err(e) = self.poll_source(name, now_sec, utc_hour).await {
                        tracing::error!("poll of @{} failed: {}", name, e);
                    }
                }
            }
        });
        join_all(workers).await;
    }

    /// Poll one channel and fan new posts out to its subscribers.
    ///
    /// Fetch and extraction failures are absorbed into the source's backoff
    /// state; only store errors propagate.
    async fn poll_source(&self, username: &str, now_sec: i64, utc_hour: u32) -> Result<()> {
        let last_seen = self
            .lock_cache()?
            .entries
            .get(username)
            .map(|s| s.last_post_id)
            .unwrap_or(0);

        let posts = match self.fetcher.fetch(username).await {
            Ok(html) => {
                let posts = extractor::extract(username, &html);
                if posts.is_empty() {
                    self.record_failure(username, "no posts extracted", now_sec)?;
                    return Ok(());
                }
                posts
            }
            Err(e) => {
                self.record_failure(username, &e.to_string(), now_sec)?;
                return Ok(());
            }
        };

        let mut fresh: Vec<_> = posts.iter().filter(|p| p.post_id > last_seen).collect();
        if last_seen == 0 && fresh.len() > FIRST_SYNC_LIMIT {
            // Never flood a destination with a channel's whole visible history.
            fresh = fresh.split_off(fresh.len() - FIRST_SYNC_LIMIT);
        }

        if !fresh.is_empty() {
            if self.archive_posts {
                let owned: Vec<_> = fresh.iter().map(|p| (*p).clone()).collect();
                self.store.archive_posts(username, &owned, now_sec)?;
            }

            let subs = self.store.subscribers_for_channel(username)?;
            for post in &fresh {
                for sub in &subs {
                    let result = delivery::deliver_realtime(
                        self.store.as_ref(),
                        self.notifier.as_ref(),
                        sub,
                        post,
                        now_sec,
                        utc_hour,
                    )
                    .await;
                    // One broken destination must not starve the others.
                    if let Err(e) = result {
                        tracing::warn!(
                            "delivery of @{}/{} to user {} failed: {}",
                            username,
                            post.post_id,
                            sub.user_id,
                            e
                        );
                    }
                }
            }
        }

        let newest = posts.iter().map(|p| p.post_id).max().unwrap_or(last_seen);
        let mut cache = self.lock_cache()?;
        let entry = cache
            .entries
            .entry(username.to_string())
            .or_insert_with(|| Source::new(username, MIN_POLL_SEC, now_sec));
        entry.last_post_id = entry.last_post_id.max(newest);
        entry.check_every_sec = if fresh.is_empty() {
            grow_interval(entry.check_every_sec, EMPTY_GROWTH)
        } else {
            MIN_POLL_SEC
        };
        entry.next_check_at = now_sec + entry.check_every_sec;
        entry.fail_count = 0;
        entry.last_error = None;
        entry.last_success_at = now_sec;
        entry.updated_at = now_sec;
        let interval = entry.check_every_sec;
        cache.dirty.insert(username.to_string());

        tracing::debug!(
            "polled @{}: {} new, next check in {}s",
            username,
            fresh.len(),
            interval
        );
        Ok(())
    }

    fn record_failure(&self, username: &str, error: &str, now_sec: i64) -> Result<()> {
        let mut cache = self.lock_cache()?;
        let entry = cache
            .entries
            .entry(username.to_string())
            .or_insert_with(|| Source::new(username, MIN_POLL_SEC, now_sec));
        entry.check_every_sec = grow_interval(entry.check_every_sec, FAIL_GROWTH);
        entry.next_check_at = now_sec + entry.check_every_sec;
        entry.fail_count += 1;
        entry.last_error = Some(truncate_error(error));
        entry.last_error_at = now_sec;
        entry.updated_at = now_sec;
        let fails = entry.fail_count;
        let interval = entry.check_every_sec;
        cache.dirty.insert(username.to_string());

        tracing::warn!(
            "poll of @{} failed ({} in a row), backing off to {}s: {}",
            username,
            fails,
            interval,
            error
        );
        Ok(())
    }

    /// Write dirty schedule state back to the store. With `force`, flush
    /// regardless of the flush interval.
    pub fn flush_cache(&self, now_sec: i64, force: bool) -> Result<()> {
        let dirty_sources: Vec<Source> = {
            let mut cache = self.lock_cache()?;
            if !force && now_sec - cache.last_flush < STATE_FLUSH_INTERVAL_SEC {
                return Ok(());
            }
            cache.last_flush = now_sec;
            let names: Vec<String> = cache.dirty.drain().collect();
            names
                .iter()
                .filter_map(|n| cache.entries.get(n).cloned())
                .collect()
        };

        for source in &dirty_sources {
            self.store.upsert_source(source)?;
        }
        if !dirty_sources.is_empty() {
            tracing::debug!("flushed schedule state for {} sources", dirty_sources.len());
        }
        Ok(())
    }

    /// Follow a channel for a user: validate it by fetching it once, create
    /// the source and subscription, and backfill the most recent posts.
    pub async fn follow_channel(&self, user_id: i64, input: &str) -> Result<FollowOutcome> {
        let username = normalize_username(input)
            .ok_or_else(|| TelefeedError::InvalidUsername(input.to_string()))?;

        let dest = self
            .store
            .get_destination(user_id)?
            .ok_or(TelefeedError::NoDestination(user_id))?;
        if !dest.verified {
            return Err(TelefeedError::NoDestination(user_id));
        }

        let html = self.fetcher.fetch(&username).await?;
        let posts = extractor::extract(&username, &html);
        if posts.is_empty() {
            return Err(TelefeedError::EmptyExtraction(username));
        }

        let now = Utc::now();
        let now_sec = now.timestamp();
        let utc_hour = now.hour();
        let newest = posts.iter().map(|p| p.post_id).max().unwrap_or(0);

        let prefs = self.store.get_prefs(user_id)?;
        let backfill_n = prefs.default_backfill_n.clamp(0, BACKFILL_MAX);

        // Backfill covers the visible history; polling starts from here.
        // A re-follow snaps a backed-off source straight back to the floor.
        let mut source = self
            .store
            .get_source(&username)?
            .unwrap_or_else(|| Source::new(&username, MIN_POLL_SEC, now_sec));
        source.last_post_id = source.last_post_id.max(newest);
        source.check_every_sec = MIN_POLL_SEC;
        source.next_check_at = now_sec + MIN_POLL_SEC;
        source.fail_count = 0;
        source.last_error = None;
        source.last_success_at = now_sec;
        source.updated_at = now_sec;
        self.store.upsert_source(&source)?;
        {
            let mut cache = self.lock_cache()?;
            cache.entries.insert(username.clone(), source);
        }

        let sub = Subscription {
            user_id,
            username: username.clone(),
            paused: false,
            mode: DeliveryMode::Realtime,
            include_keywords: Vec::new(),
            exclude_keywords: Vec::new(),
            backfill_n,
            label: None,
        };
        self.store.add_subscription(&sub, now_sec)?;

        if self.archive_posts {
            self.store.archive_posts(&username, &posts, now_sec)?;
        }

        let mut delivered = 0;
        let skip = posts.len().saturating_sub(backfill_n as usize);
        for post in posts.iter().skip(skip) {
            // The follow already stands; a flaky send must not undo it or
            // swallow the rest of the backfill.
            match delivery::deliver_realtime(
                self.store.as_ref(),
                self.notifier.as_ref(),
                &sub,
                post,
                now_sec,
                utc_hour,
            )
            .await
            {
                Ok(delivery::DeliveryOutcome::Sent) => delivered += 1,
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(
                        "backfill of @{}/{} to user {} failed: {}",
                        username,
                        post.post_id,
                        user_id,
                        e
                    );
                }
            }
        }
        Ok(FollowOutcome {
            username,
            delivered,
        })
    }

    fn lock_cache(&self) -> Result<std::sync::MutexGuard<'_, ScheduleCache>> {
        self.cache
            .lock()
            .map_err(|e| TelefeedError::Other(format!("schedule cache poisoned: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::test_support::MockNotifier;
    use crate::store::SqliteStore;

    const NOW: i64 = 1_700_000_000;
    const DAY_HOUR: u32 = 12;

    struct MockFetcher {
        pages: Mutex<HashMap<String, std::result::Result<String, u16>>>,
    }

    impl MockFetcher {
        fn new() -> Self {
            Self {
                pages: Mutex::new(HashMap::new()),
            }
        }

        fn set_page(&self, username: &str, html: &str) {
            self.pages
                .lock()
                .unwrap()
                .insert(username.to_string(), Ok(html.to_string()));
        }

        fn set_error(&self, username: &str, status: u16) {
            self.pages
                .lock()
                .unwrap()
                .insert(username.to_string(), Err(status));
        }
    }

    #[async_trait::async_trait]
    impl PageFetcher for MockFetcher {
        async fn fetch(&self, username: &str) -> Result<String> {
            match self.pages.lock().unwrap().get(username) {
                Some(Ok(html)) => Ok(html.clone()),
                Some(Err(status)) => Err(TelefeedError::Fetch {
                    username: username.to_string(),
                    status: *status,
                }),
                None => Err(TelefeedError::Fetch {
                    username: username.to_string(),
                    status: 404,
                }),
            }
        }
    }

    fn page(chan: &str, ids: &[i64]) -> String {
        ids.iter()
            .map(|id| {
                format!(
                    r#"<div class="tgme_widget_message" data-post="{chan}/{id}"><div class="tgme_widget_message_text js-message_text">post {id}</div></div>"#
                )
            })
            .collect()
    }

    struct Fixture {
        ticker: Arc<Ticker>,
        store: Arc<SqliteStore>,
        fetcher: Arc<MockFetcher>,
        notifier: Arc<MockNotifier>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let fetcher = Arc::new(MockFetcher::new());
        let notifier = Arc::new(MockNotifier::new());
        let ticker = Arc::new(Ticker::new(
            store.clone(),
            fetcher.clone(),
            notifier.clone(),
            true,
        ));
        Fixture {
            ticker,
            store,
            fetcher,
            notifier,
        }
    }

    fn subscribe(store: &SqliteStore, user_id: i64, username: &str) {
        store.set_destination(user_id, -1000 - user_id, NOW).unwrap();
        store.mark_destination_verified(user_id, true).unwrap();
        let sub = Subscription {
            user_id,
            username: username.to_string(),
            paused: false,
            mode: DeliveryMode::Realtime,
            include_keywords: Vec::new(),
            exclude_keywords: Vec::new(),
            backfill_n: 3,
            label: None,
        };
        store.add_subscription(&sub, NOW).unwrap();
    }

    fn seed_source(store: &SqliteStore, username: &str, last_post_id: i64, interval: i64) {
        let mut source = Source::new(username, interval, NOW);
        source.last_post_id = last_post_id;
        source.next_check_at = NOW;
        store.upsert_source(&source).unwrap();
    }

    #[test]
    fn test_grow_interval_clamps() {
        assert_eq!(grow_interval(5, EMPTY_GROWTH), 8);
        assert_eq!(grow_interval(5, FAIL_GROWTH), 10);
        assert_eq!(grow_interval(200, FAIL_GROWTH), MAX_POLL_SEC);
        assert_eq!(grow_interval(1, EMPTY_GROWTH), MIN_POLL_SEC);
    }

    #[test]
    fn test_truncate_error() {
        assert_eq!(truncate_error("short"), "short");
        let long = "e".repeat(400);
        assert_eq!(truncate_error(&long).chars().count(), LAST_ERROR_MAX_LEN);
    }

    #[tokio::test]
    async fn test_tick_delivers_new_posts_and_resets_interval() {
        let f = fixture();
        subscribe(&f.store, 1, "somechan");
        seed_source(&f.store, "somechan", 10, 8);
        f.fetcher.set_page("somechan", &page("somechan", &[9, 10, 11, 12, 13]));

        let summary = f.ticker.run_tick_at(NOW, DAY_HOUR).await.unwrap();
        assert!(!summary.skipped);
        assert_eq!(summary.polled, 1);
        assert_eq!(f.notifier.sent_count(), 3);
        for id in [11, 12, 13] {
            assert!(f.store.delivery_exists(1, "somechan", id).unwrap());
        }
        assert!(!f.store.delivery_exists(1, "somechan", 10).unwrap());

        f.ticker.flush_cache(NOW, true).unwrap();
        let src = f.store.get_source("somechan").unwrap().unwrap();
        assert_eq!(src.last_post_id, 13);
        assert_eq!(src.check_every_sec, MIN_POLL_SEC);
        assert_eq!(src.next_check_at, NOW + MIN_POLL_SEC);
        assert_eq!(src.fail_count, 0);
    }

    #[tokio::test]
    async fn test_tick_is_idempotent_across_runs() {
        let f = fixture();
        subscribe(&f.store, 1, "somechan");
        seed_source(&f.store, "somechan", 10, 5);
        f.fetcher.set_page("somechan", &page("somechan", &[11, 12]));

        f.ticker.run_tick_at(NOW, DAY_HOUR).await.unwrap();
        // Force the source due again with the same page content.
        f.ticker.flush_cache(NOW, true).unwrap();
        seed_source(&f.store, "somechan", 12, 5);
        {
            let mut cache = f.ticker.lock_cache().unwrap();
            cache.entries.get_mut("somechan").unwrap().next_check_at = NOW + 5;
        }

        f.ticker.run_tick_at(NOW + 10, DAY_HOUR).await.unwrap();
        assert_eq!(f.notifier.sent_count(), 2);
    }

    #[tokio::test]
    async fn test_fetch_failure_backs_off() {
        let f = fixture();
        subscribe(&f.store, 1, "somechan");
        seed_source(&f.store, "somechan", 10, 5);
        f.fetcher.set_error("somechan", 500);

        f.ticker.run_tick_at(NOW, DAY_HOUR).await.unwrap();
        f.ticker.flush_cache(NOW, true).unwrap();

        let src = f.store.get_source("somechan").unwrap().unwrap();
        assert_eq!(src.fail_count, 1);
        assert_eq!(src.check_every_sec, 10);
        assert_eq!(src.last_post_id, 10);
        assert!(src.last_error.as_deref().unwrap().contains("500"));
        assert_eq!(f.notifier.sent_count(), 0);
    }

    #[tokio::test]
    async fn test_backoff_caps_at_max() {
        let f = fixture();
        subscribe(&f.store, 1, "somechan");
        seed_source(&f.store, "somechan", 10, 5);
        f.fetcher.set_error("somechan", 500);

        let mut now = NOW;
        for _ in 0..10 {
            f.ticker.run_tick_at(now, DAY_HOUR).await.unwrap();
            // Jump past the backoff so the source is due again.
            now += MAX_POLL_SEC + 1;
        }
        f.ticker.flush_cache(now, true).unwrap();

        let src = f.store.get_source("somechan").unwrap().unwrap();
        assert_eq!(src.check_every_sec, MAX_POLL_SEC);
        assert_eq!(src.fail_count, 10);
    }

    #[tokio::test]
    async fn test_empty_poll_grows_interval() {
        let f = fixture();
        subscribe(&f.store, 1, "somechan");
        seed_source(&f.store, "somechan", 13, 5);
        f.fetcher.set_page("somechan", &page("somechan", &[12, 13]));

        f.ticker.run_tick_at(NOW, DAY_HOUR).await.unwrap();
        f.ticker.flush_cache(NOW, true).unwrap();

        let src = f.store.get_source("somechan").unwrap().unwrap();
        assert_eq!(src.check_every_sec, 8);
        assert_eq!(src.last_post_id, 13);
        assert_eq!(f.notifier.sent_count(), 0);
    }

    #[tokio::test]
    async fn test_first_sync_caps_delivery() {
        let f = fixture();
        subscribe(&f.store, 1, "somechan");
        seed_source(&f.store, "somechan", 0, 5);
        f.fetcher
            .set_page("somechan", &page("somechan", &[1, 2, 3, 4, 5, 6, 7, 8]));

        f.ticker.run_tick_at(NOW, DAY_HOUR).await.unwrap();
        assert_eq!(f.notifier.sent_count(), FIRST_SYNC_LIMIT);
        assert!(f.store.delivery_exists(1, "somechan", 8).unwrap());
        assert!(!f.store.delivery_exists(1, "somechan", 3).unwrap());
    }

    #[tokio::test]
    async fn test_tick_skipped_while_lock_held() {
        let f = fixture();
        subscribe(&f.store, 1, "somechan");
        seed_source(&f.store, "somechan", 10, 5);
        f.fetcher.set_page("somechan", &page("somechan", &[11]));

        f.store.try_acquire_lock(LOCK_NAME, NOW - 1, LOCK_TTL_SEC).unwrap();
        let summary = f.ticker.run_tick_at(NOW, DAY_HOUR).await.unwrap();
        assert!(summary.skipped);
        assert_eq!(f.notifier.sent_count(), 0);

        // Expired lock is reclaimed by the next tick.
        let summary = f
            .ticker
            .run_tick_at(NOW + LOCK_TTL_SEC, DAY_HOUR)
            .await
            .unwrap();
        assert!(!summary.skipped);
        assert_eq!(f.notifier.sent_count(), 1);
    }

    #[tokio::test]
    async fn test_lock_released_between_ticks() {
        let f = fixture();
        subscribe(&f.store, 1, "somechan");
        seed_source(&f.store, "somechan", 10, 5);
        f.fetcher.set_page("somechan", &page("somechan", &[11]));

        let first = f.ticker.run_tick_at(NOW, DAY_HOUR).await.unwrap();
        assert!(!first.skipped);

        // The very next cadence firing must run, not wait out the TTL.
        f.fetcher.set_page("somechan", &page("somechan", &[11, 12]));
        let second = f
            .ticker
            .run_tick_at(NOW + MIN_POLL_SEC, DAY_HOUR)
            .await
            .unwrap();
        assert!(!second.skipped);
        assert_eq!(second.polled, 1);
        assert_eq!(f.notifier.sent_count(), 2);
    }

    #[tokio::test]
    async fn test_unsubscribed_sources_not_polled() {
        let f = fixture();
        seed_source(&f.store, "orphanchan", 10, 5);
        f.fetcher.set_page("orphanchan", &page("orphanchan", &[11]));

        let summary = f.ticker.run_tick_at(NOW, DAY_HOUR).await.unwrap();
        assert_eq!(summary.polled, 0);
    }

    #[tokio::test]
    async fn test_tick_flushes_deferred_after_quiet_hours() {
        let f = fixture();
        subscribe(&f.store, 1, "somechan");
        let mut prefs = f.store.get_prefs(1).unwrap();
        prefs.quiet_start = 0;
        prefs.quiet_end = 8;
        f.store.update_prefs(&prefs, NOW).unwrap();

        seed_source(&f.store, "somechan", 10, 5);
        f.fetcher.set_page("somechan", &page("somechan", &[11]));

        // Quiet tick parks the post.
        f.ticker.run_tick_at(NOW, 3).await.unwrap();
        assert_eq!(f.notifier.sent_count(), 0);
        assert_eq!(f.store.deferred_for_user(1, 10).unwrap().len(), 1);

        // Daytime tick drains it.
        let summary = f.ticker.run_tick_at(NOW + 100, 9).await.unwrap();
        assert_eq!(summary.deferred_sent, 1);
        assert_eq!(f.notifier.sent_count(), 1);
        assert!(f.store.deferred_for_user(1, 10).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_broken_subscriber_does_not_block_others() {
        let f = fixture();
        subscribe(&f.store, 1, "somechan");
        subscribe(&f.store, 2, "somechan");
        seed_source(&f.store, "somechan", 10, 5);
        f.fetcher.set_page("somechan", &page("somechan", &[11]));

        // User 1's chat is gone; every send to it fails.
        f.notifier.fail_with(403, "Forbidden: bot was kicked from the channel chat");
        f.ticker.run_tick_at(NOW, DAY_HOUR).await.unwrap();

        // Both destinations got the failure, but the tick completed and the
        // source advanced past the post.
        f.ticker.flush_cache(NOW, true).unwrap();
        let src = f.store.get_source("somechan").unwrap().unwrap();
        assert_eq!(src.last_post_id, 11);
        assert!(!f.store.get_destination(1).unwrap().unwrap().verified);
        assert!(!f.store.delivery_exists(1, "somechan", 11).unwrap());
    }

    #[tokio::test]
    async fn test_follow_channel_backfills() {
        let f = fixture();
        f.store.set_destination(1, -1001, NOW).unwrap();
        f.store.mark_destination_verified(1, true).unwrap();
        f.fetcher
            .set_page("somechan", &page("somechan", &[1, 2, 3, 4, 5]));

        let outcome = f.ticker.follow_channel(1, "@somechan").await.unwrap();
        assert_eq!(outcome.username, "somechan");
        assert_eq!(outcome.delivered, 3);
        for id in [3, 4, 5] {
            assert!(f.store.delivery_exists(1, "somechan", id).unwrap());
        }

        let src = f.store.get_source("somechan").unwrap().unwrap();
        assert_eq!(src.last_post_id, 5);
        assert!(f.store.get_subscription(1, "somechan").unwrap().is_some());
    }

    #[tokio::test]
    async fn test_follow_survives_send_failures() {
        let f = fixture();
        f.store.set_destination(1, -1001, NOW).unwrap();
        f.store.mark_destination_verified(1, true).unwrap();
        f.fetcher
            .set_page("somechan", &page("somechan", &[1, 2, 3, 4, 5]));
        f.notifier.fail_with(500, "Internal Server Error");

        let outcome = f.ticker.follow_channel(1, "somechan").await.unwrap();
        assert_eq!(outcome.delivered, 0);

        // Subscription and source stand; polling picks up from the newest id.
        assert!(f.store.get_subscription(1, "somechan").unwrap().is_some());
        let src = f.store.get_source("somechan").unwrap().unwrap();
        assert_eq!(src.last_post_id, 5);
        assert!(!f.store.delivery_exists(1, "somechan", 5).unwrap());
    }

    #[tokio::test]
    async fn test_refollow_resets_backed_off_schedule() {
        let f = fixture();
        subscribe(&f.store, 1, "somechan");
        let mut source = Source::new("somechan", MAX_POLL_SEC, NOW);
        source.last_post_id = 4;
        source.next_check_at = NOW + MAX_POLL_SEC;
        source.fail_count = 3;
        source.last_error = Some("HTTP 500".into());
        f.store.upsert_source(&source).unwrap();
        f.fetcher.set_page("somechan", &page("somechan", &[4, 5]));

        f.ticker.follow_channel(1, "somechan").await.unwrap();

        let src = f.store.get_source("somechan").unwrap().unwrap();
        assert_eq!(src.check_every_sec, MIN_POLL_SEC);
        assert_eq!(src.fail_count, 0);
        assert!(src.last_error.is_none());
        assert_eq!(src.last_post_id, 5);

        let cache = f.ticker.lock_cache().unwrap();
        assert_eq!(
            cache.entries.get("somechan").unwrap().check_every_sec,
            MIN_POLL_SEC
        );
    }

    #[tokio::test]
    async fn test_follow_requires_verified_destination() {
        let f = fixture();
        f.fetcher.set_page("somechan", &page("somechan", &[1]));

        let err = f.ticker.follow_channel(1, "somechan").await.unwrap_err();
        assert!(matches!(err, TelefeedError::NoDestination(1)));

        f.store.set_destination(1, -1001, NOW).unwrap();
        let err = f.ticker.follow_channel(1, "somechan").await.unwrap_err();
        assert!(matches!(err, TelefeedError::NoDestination(1)));
    }

    #[tokio::test]
    async fn test_follow_rejects_bad_input() {
        let f = fixture();
        f.store.set_destination(1, -1001, NOW).unwrap();
        f.store.mark_destination_verified(1, true).unwrap();

        let err = f.ticker.follow_channel(1, "not a channel!").await.unwrap_err();
        assert!(matches!(err, TelefeedError::InvalidUsername(_)));
    }

    #[tokio::test]
    async fn test_follow_unfetchable_channel_fails() {
        let f = fixture();
        f.store.set_destination(1, -1001, NOW).unwrap();
        f.store.mark_destination_verified(1, true).unwrap();
        f.fetcher.set_error("ghostchan", 404);

        let err = f.ticker.follow_channel(1, "ghostchan").await.unwrap_err();
        assert!(matches!(err, TelefeedError::Fetch { .. }));

        f.fetcher.set_page("emptychan", "<html></html>");
        let err = f.ticker.follow_channel(1, "emptychan").await.unwrap_err();
        assert!(matches!(err, TelefeedError::EmptyExtraction(_)));
    }
}
