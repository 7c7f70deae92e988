pub mod sqlite;

use crate::app::Result;
use crate::domain::{Destination, Post, QueuedPost, Source, Subscription, UserPrefs};

pub use sqlite::SqliteStore;

pub trait Store: Send + Sync {
    // Source operations
    fn upsert_source(&self, source: &Source) -> Result<()>;
    fn get_source(&self, username: &str) -> Result<Option<Source>>;
    fn get_all_sources(&self) -> Result<Vec<Source>>;
    fn delete_source(&self, username: &str) -> Result<()>;

    // Subscription operations
    fn add_subscription(&self, sub: &Subscription, now: i64) -> Result<bool>;
    fn remove_subscription(&self, user_id: i64, username: &str) -> Result<bool>;
    fn get_subscription(&self, user_id: i64, username: &str) -> Result<Option<Subscription>>;
    fn subscriptions_for_user(&self, user_id: i64) -> Result<Vec<Subscription>>;
    /// Subscribers of one channel whose destination is verified.
    fn subscribers_for_channel(&self, username: &str) -> Result<Vec<Subscription>>;
    fn subscribed_usernames(&self) -> Result<Vec<String>>;
    fn set_subscription_paused(&self, user_id: i64, username: &str, paused: bool) -> Result<()>;
    fn set_subscription_mode(&self, user_id: i64, username: &str, mode: &str) -> Result<()>;
    fn set_subscription_filters(
        &self,
        user_id: i64,
        username: &str,
        include_json: &str,
        exclude_json: &str,
    ) -> Result<()>;

    // Destination operations
    fn get_destination(&self, user_id: i64) -> Result<Option<Destination>>;
    fn set_destination(&self, user_id: i64, chat_id: i64, now: i64) -> Result<()>;
    fn mark_destination_verified(&self, user_id: i64, verified: bool) -> Result<()>;

    // Preference operations
    fn get_prefs(&self, user_id: i64) -> Result<UserPrefs>;
    fn update_prefs(&self, prefs: &UserPrefs, now: i64) -> Result<()>;
    fn set_last_digest_at(&self, user_id: i64, at: i64) -> Result<()>;
    fn users_with_digest_subs(&self) -> Result<Vec<i64>>;

    // Delivery ledger
    /// Claim one (user, channel, post) delivery slot. `false` means the slot
    /// was already claimed, so the caller must not send.
    fn insert_delivery(&self, user_id: i64, username: &str, post_id: i64, now: i64)
        -> Result<bool>;
    fn delete_delivery(&self, user_id: i64, username: &str, post_id: i64) -> Result<()>;
    fn delivery_exists(&self, user_id: i64, username: &str, post_id: i64) -> Result<bool>;

    // Deferred queue (quiet hours)
    fn enqueue_deferred(&self, user_id: i64, username: &str, post_id: i64, now: i64) -> Result<()>;
    fn deferred_for_user(&self, user_id: i64, limit: i64) -> Result<Vec<QueuedPost>>;
    fn delete_deferred(&self, user_id: i64, username: &str, post_id: i64) -> Result<()>;
    fn users_with_deferred(&self) -> Result<Vec<i64>>;

    // Post archive
    fn archive_posts(&self, username: &str, posts: &[Post], now: i64) -> Result<()>;
    fn archived_posts_since(&self, username: &str, since: i64, limit: i64) -> Result<Vec<Post>>;
    fn get_archived_post(&self, username: &str, post_id: i64) -> Result<Option<Post>>;

    // TTL'd locks
    fn try_acquire_lock(&self, name: &str, now: i64, ttl_sec: i64) -> Result<bool>;
    fn release_lock(&self, name: &str) -> Result<()>;
}
