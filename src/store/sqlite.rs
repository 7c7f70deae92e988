use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::{params, Connection, OptionalExtension, Row};
use rusqlite_migration::{Migrations, M};

use crate::app::{Result, TelefeedError};
use crate::domain::subscription::parse_keywords;
use crate::domain::{
    DeliveryMode, Destination, FullTextStyle, Post, PostStyle, QueuedPost, Source, Subscription,
    UserPrefs,
};
use crate::store::Store;

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.run_migrations()?;
        Ok(store)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.run_migrations()?;
        Ok(store)
    }

    fn run_migrations(&self) -> Result<()> {
        let migrations = Migrations::new(vec![M::up(include_str!(
            "../../migrations/001-initial/up.sql"
        ))]);

        let mut conn = self.conn()?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        migrations
            .to_latest(&mut conn)
            .map_err(|_| TelefeedError::Database(rusqlite::Error::InvalidQuery))?;

        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|e| {
            TelefeedError::Database(rusqlite::Error::SqliteFailure(
                rusqlite::ffi::Error::new(1),
                Some(e.to_string()),
            ))
        })
    }

    fn map_source(row: &Row<'_>) -> rusqlite::Result<Source> {
        Ok(Source {
            username: row.get(0)?,
            last_post_id: row.get(1)?,
            check_every_sec: row.get(2)?,
            next_check_at: row.get(3)?,
            fail_count: row.get(4)?,
            last_error: row.get(5)?,
            last_error_at: row.get(6)?,
            last_success_at: row.get(7)?,
            updated_at: row.get(8)?,
        })
    }

    fn map_subscription(row: &Row<'_>) -> rusqlite::Result<Subscription> {
        Ok(Subscription {
            user_id: row.get(0)?,
            username: row.get(1)?,
            paused: row.get::<_, i64>(2)? != 0,
            mode: DeliveryMode::parse(&row.get::<_, String>(3)?),
            include_keywords: parse_keywords(&row.get::<_, String>(4)?),
            exclude_keywords: parse_keywords(&row.get::<_, String>(5)?),
            backfill_n: row.get(6)?,
            label: row.get(7)?,
        })
    }

    fn map_post(row: &Row<'_>) -> rusqlite::Result<Post> {
        Ok(Post {
            post_id: row.get(0)?,
            text: row.get(1)?,
            link: row.get(2)?,
            media: Post::parse_media_json(&row.get::<_, String>(3)?),
        })
    }
}

const SOURCE_COLS: &str = "username, last_post_id, check_every_sec, next_check_at, \
     fail_count, last_error, last_error_at, last_success_at, updated_at";

const SUB_COLS: &str =
    "user_id, username, paused, mode, include_keywords, exclude_keywords, backfill_n, label";

impl Store for SqliteStore {
    fn upsert_source(&self, source: &Source) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO sources (username, last_post_id, check_every_sec, next_check_at,
                                  fail_count, last_error, last_error_at, last_success_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(username) DO UPDATE SET
                 last_post_id = excluded.last_post_id,
                 check_every_sec = excluded.check_every_sec,
                 next_check_at = excluded.next_check_at,
                 fail_count = excluded.fail_count,
                 last_error = excluded.last_error,
                 last_error_at = excluded.last_error_at,
                 last_success_at = excluded.last_success_at,
                 updated_at = excluded.updated_at",
            params![
                source.username,
                source.last_post_id,
                source.check_every_sec,
                source.next_check_at,
                source.fail_count,
                source.last_error,
                source.last_error_at,
                source.last_success_at,
                source.updated_at,
            ],
        )?;
        Ok(())
    }

    fn get_source(&self, username: &str) -> Result<Option<Source>> {
        let conn = self.conn()?;
        let result = conn
            .query_row(
                &format!("SELECT {SOURCE_COLS} FROM sources WHERE username = ?1"),
                params![username],
                Self::map_source,
            )
            .optional()?;
        Ok(result)
    }

    fn get_all_sources(&self) -> Result<Vec<Source>> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare(&format!("SELECT {SOURCE_COLS} FROM sources ORDER BY username"))?;
        let rows = stmt.query_map([], Self::map_source)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn delete_source(&self, username: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM sources WHERE username = ?1", params![username])?;
        Ok(())
    }

    fn add_subscription(&self, sub: &Subscription, now: i64) -> Result<bool> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "INSERT OR IGNORE INTO subscriptions
                 (user_id, username, paused, mode, include_keywords, exclude_keywords,
                  backfill_n, label, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                sub.user_id,
                sub.username,
                sub.paused as i64,
                sub.mode.as_str(),
                crate::domain::subscription::keywords_json(&sub.include_keywords),
                crate::domain::subscription::keywords_json(&sub.exclude_keywords),
                sub.backfill_n,
                sub.label,
                now,
            ],
        )?;
        Ok(changed > 0)
    }

    fn remove_subscription(&self, user_id: i64, username: &str) -> Result<bool> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "DELETE FROM subscriptions WHERE user_id = ?1 AND username = ?2",
            params![user_id, username],
        )?;
        Ok(changed > 0)
    }

    fn get_subscription(&self, user_id: i64, username: &str) -> Result<Option<Subscription>> {
        let conn = self.conn()?;
        let result = conn
            .query_row(
                &format!(
                    "SELECT {SUB_COLS} FROM subscriptions WHERE user_id = ?1 AND username = ?2"
                ),
                params![user_id, username],
                Self::map_subscription,
            )
            .optional()?;
        Ok(result)
    }

    fn subscriptions_for_user(&self, user_id: i64) -> Result<Vec<Subscription>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {SUB_COLS} FROM subscriptions WHERE user_id = ?1 ORDER BY username"
        ))?;
        let rows = stmt.query_map(params![user_id], Self::map_subscription)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn subscribers_for_channel(&self, username: &str) -> Result<Vec<Subscription>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT s.user_id, s.username, s.paused, s.mode, s.include_keywords,
                    s.exclude_keywords, s.backfill_n, s.label
             FROM subscriptions s
             JOIN destinations d ON d.user_id = s.user_id AND d.verified = 1
             WHERE s.username = ?1
             ORDER BY s.user_id",
        )?;
        let rows = stmt.query_map(params![username], Self::map_subscription)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn subscribed_usernames(&self) -> Result<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT DISTINCT username FROM subscriptions ORDER BY username")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn set_subscription_paused(&self, user_id: i64, username: &str, paused: bool) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE subscriptions SET paused = ?3 WHERE user_id = ?1 AND username = ?2",
            params![user_id, username, paused as i64],
        )?;
        Ok(())
    }

    fn set_subscription_mode(&self, user_id: i64, username: &str, mode: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE subscriptions SET mode = ?3 WHERE user_id = ?1 AND username = ?2",
            params![user_id, username, mode],
        )?;
        Ok(())
    }

    fn set_subscription_filters(
        &self,
        user_id: i64,
        username: &str,
        include_json: &str,
        exclude_json: &str,
    ) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE subscriptions SET include_keywords = ?3, exclude_keywords = ?4
             WHERE user_id = ?1 AND username = ?2",
            params![user_id, username, include_json, exclude_json],
        )?;
        Ok(())
    }

    fn get_destination(&self, user_id: i64) -> Result<Option<Destination>> {
        let conn = self.conn()?;
        let result = conn
            .query_row(
                "SELECT user_id, chat_id, verified FROM destinations WHERE user_id = ?1",
                params![user_id],
                |row| {
                    Ok(Destination {
                        user_id: row.get(0)?,
                        chat_id: row.get(1)?,
                        verified: row.get::<_, i64>(2)? != 0,
                    })
                },
            )
            .optional()?;
        Ok(result)
    }

    fn set_destination(&self, user_id: i64, chat_id: i64, now: i64) -> Result<()> {
        let conn = self.conn()?;
        // A new chat id always starts unverified.
        conn.execute(
            "INSERT INTO destinations (user_id, chat_id, verified, created_at)
             VALUES (?1, ?2, 0, ?3)
             ON CONFLICT(user_id) DO UPDATE SET chat_id = excluded.chat_id, verified = 0",
            params![user_id, chat_id, now],
        )?;
        Ok(())
    }

    fn mark_destination_verified(&self, user_id: i64, verified: bool) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE destinations SET verified = ?2 WHERE user_id = ?1",
            params![user_id, verified as i64],
        )?;
        Ok(())
    }

    fn get_prefs(&self, user_id: i64) -> Result<UserPrefs> {
        let conn = self.conn()?;
        let result = conn
            .query_row(
                "SELECT user_id, realtime_enabled, digest_hours, last_digest_at,
                        default_backfill_n, quiet_start, quiet_end, post_style,
                        full_text_style, global_include_keywords, global_exclude_keywords
                 FROM user_prefs WHERE user_id = ?1",
                params![user_id],
                |row| {
                    Ok(UserPrefs {
                        user_id: row.get(0)?,
                        realtime_enabled: row.get::<_, i64>(1)? != 0,
                        digest_hours: row.get(2)?,
                        last_digest_at: row.get(3)?,
                        default_backfill_n: row.get(4)?,
                        quiet_start: row.get(5)?,
                        quiet_end: row.get(6)?,
                        post_style: PostStyle::parse(&row.get::<_, String>(7)?),
                        full_text_style: FullTextStyle::parse(&row.get::<_, String>(8)?),
                        global_include_keywords: parse_keywords(&row.get::<_, String>(9)?),
                        global_exclude_keywords: parse_keywords(&row.get::<_, String>(10)?),
                    })
                },
            )
            .optional()?;
        Ok(result.unwrap_or_else(|| UserPrefs::defaults(user_id)))
    }

    fn update_prefs(&self, prefs: &UserPrefs, now: i64) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO user_prefs
                 (user_id, realtime_enabled, digest_hours, last_digest_at, default_backfill_n,
                  quiet_start, quiet_end, post_style, full_text_style,
                  global_include_keywords, global_exclude_keywords, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
             ON CONFLICT(user_id) DO UPDATE SET
                 realtime_enabled = excluded.realtime_enabled,
                 digest_hours = excluded.digest_hours,
                 last_digest_at = excluded.last_digest_at,
                 default_backfill_n = excluded.default_backfill_n,
                 quiet_start = excluded.quiet_start,
                 quiet_end = excluded.quiet_end,
                 post_style = excluded.post_style,
                 full_text_style = excluded.full_text_style,
                 global_include_keywords = excluded.global_include_keywords,
                 global_exclude_keywords = excluded.global_exclude_keywords,
                 updated_at = excluded.updated_at",
            params![
                prefs.user_id,
                prefs.realtime_enabled as i64,
                prefs.digest_hours,
                prefs.last_digest_at,
                prefs.default_backfill_n,
                prefs.quiet_start,
                prefs.quiet_end,
                prefs.post_style.as_str(),
                prefs.full_text_style.as_str(),
                crate::domain::subscription::keywords_json(&prefs.global_include_keywords),
                crate::domain::subscription::keywords_json(&prefs.global_exclude_keywords),
                now,
            ],
        )?;
        Ok(())
    }

    fn set_last_digest_at(&self, user_id: i64, at: i64) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO user_prefs (user_id, last_digest_at) VALUES (?1, ?2)
             ON CONFLICT(user_id) DO UPDATE SET last_digest_at = excluded.last_digest_at",
            params![user_id, at],
        )?;
        Ok(())
    }

    fn users_with_digest_subs(&self) -> Result<Vec<i64>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT DISTINCT user_id FROM subscriptions
             WHERE mode = 'digest' AND paused = 0 ORDER BY user_id",
        )?;
        let rows = stmt.query_map([], |row| row.get::<_, i64>(0))?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn insert_delivery(
        &self,
        user_id: i64,
        username: &str,
        post_id: i64,
        now: i64,
    ) -> Result<bool> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "INSERT OR IGNORE INTO deliveries (user_id, username, post_id, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![user_id, username, post_id, now],
        )?;
        Ok(changed > 0)
    }

    fn delete_delivery(&self, user_id: i64, username: &str, post_id: i64) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "DELETE FROM deliveries WHERE user_id = ?1 AND username = ?2 AND post_id = ?3",
            params![user_id, username, post_id],
        )?;
        Ok(())
    }

    fn delivery_exists(&self, user_id: i64, username: &str, post_id: i64) -> Result<bool> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM deliveries
             WHERE user_id = ?1 AND username = ?2 AND post_id = ?3",
            params![user_id, username, post_id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn enqueue_deferred(
        &self,
        user_id: i64,
        username: &str,
        post_id: i64,
        now: i64,
    ) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR IGNORE INTO queued_posts (user_id, username, post_id, queued_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![user_id, username, post_id, now],
        )?;
        Ok(())
    }

    fn deferred_for_user(&self, user_id: i64, limit: i64) -> Result<Vec<QueuedPost>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT user_id, username, post_id, queued_at FROM queued_posts
             WHERE user_id = ?1 ORDER BY queued_at ASC, post_id ASC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![user_id, limit], |row| {
            Ok(QueuedPost {
                user_id: row.get(0)?,
                username: row.get(1)?,
                post_id: row.get(2)?,
                queued_at: row.get(3)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn delete_deferred(&self, user_id: i64, username: &str, post_id: i64) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "DELETE FROM queued_posts WHERE user_id = ?1 AND username = ?2 AND post_id = ?3",
            params![user_id, username, post_id],
        )?;
        Ok(())
    }

    fn users_with_deferred(&self) -> Result<Vec<i64>> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT DISTINCT user_id FROM queued_posts ORDER BY user_id")?;
        let rows = stmt.query_map([], |row| row.get::<_, i64>(0))?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn archive_posts(&self, username: &str, posts: &[Post], now: i64) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        for post in posts {
            tx.execute(
                "INSERT OR IGNORE INTO scraped_posts
                     (username, post_id, text, link, media_json, scraped_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![username, post.post_id, post.text, post.link, post.media_json(), now],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    fn archived_posts_since(&self, username: &str, since: i64, limit: i64) -> Result<Vec<Post>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT post_id, text, link, media_json FROM scraped_posts
             WHERE username = ?1 AND scraped_at > ?2
             ORDER BY post_id ASC LIMIT ?3",
        )?;
        let rows = stmt.query_map(params![username, since, limit], Self::map_post)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn get_archived_post(&self, username: &str, post_id: i64) -> Result<Option<Post>> {
        let conn = self.conn()?;
        let result = conn
            .query_row(
                "SELECT post_id, text, link, media_json FROM scraped_posts
                 WHERE username = ?1 AND post_id = ?2",
                params![username, post_id],
                Self::map_post,
            )
            .optional()?;
        Ok(result)
    }

    fn try_acquire_lock(&self, name: &str, now: i64, ttl_sec: i64) -> Result<bool> {
        let conn = self.conn()?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO locks (name, acquired_at) VALUES (?1, ?2)",
            params![name, now],
        )?;
        if inserted > 0 {
            return Ok(true);
        }
        // Held by someone else; reclaim only an expired token.
        let reclaimed = conn.execute(
            "UPDATE locks SET acquired_at = ?2 WHERE name = ?1 AND acquired_at <= ?3",
            params![name, now, now - ttl_sec],
        )?;
        Ok(reclaimed > 0)
    }

    fn release_lock(&self, name: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM locks WHERE name = ?1", params![name])?;
        Ok(())
    }
}
