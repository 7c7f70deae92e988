//! Realtime delivery and the quiet-hours deferred queue.
//!
//! The delivery ledger is the only dedup authority: a send happens only
//! after this process claims the (user, channel, post) slot, and a failed
//! send releases the slot again so a later pass can retry.

use crate::app::Result;
use crate::domain::{text_passes_filters, DeliveryMode, Post, Subscription};
use crate::notifier::{render, Notifier, SendOptions};
use crate::store::Store;

/// Deferred sends flushed per user per tick.
pub const DEFERRED_FLUSH_BATCH: i64 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Sent,
    Deferred,
    Skipped,
}

fn passes_all_filters(
    text: &str,
    sub: &Subscription,
    prefs: &crate::domain::UserPrefs,
) -> bool {
    text_passes_filters(text, &sub.include_keywords, &sub.exclude_keywords)
        && text_passes_filters(
            text,
            &prefs.global_include_keywords,
            &prefs.global_exclude_keywords,
        )
}

async fn send_rendered(
    store: &dyn Store,
    notifier: &dyn Notifier,
    user_id: i64,
    chat_id: i64,
    username: &str,
    post: &Post,
    text: &str,
) -> Result<()> {
    for part in render::split_message(text) {
        if let Err(e) = notifier
            .send_message(chat_id, &part, SendOptions::default())
            .await
        {
            // Release the ledger slot so the post can be retried later.
            store.delete_delivery(user_id, username, post.post_id)?;
            if e.is_access_error() {
                tracing::warn!("destination of user {} lost access: {}", user_id, e);
                store.mark_destination_verified(user_id, false)?;
            }
            return Err(e.into());
        }
    }
    Ok(())
}

/// Deliver one freshly scraped post to one subscriber.
///
/// `now_sec` and `utc_hour` are passed in so tests can pin the clock.
pub async fn deliver_realtime(
    store: &dyn Store,
    notifier: &dyn Notifier,
    sub: &Subscription,
    post: &Post,
    now_sec: i64,
    utc_hour: u32,
) -> Result<DeliveryOutcome> {
    if sub.paused || sub.mode != DeliveryMode::Realtime {
        return Ok(DeliveryOutcome::Skipped);
    }

    let prefs = store.get_prefs(sub.user_id)?;
    if !prefs.realtime_enabled {
        return Ok(DeliveryOutcome::Skipped);
    }
    if !passes_all_filters(&post.text, sub, &prefs) {
        return Ok(DeliveryOutcome::Skipped);
    }

    let Some(dest) = store.get_destination(sub.user_id)? else {
        return Ok(DeliveryOutcome::Skipped);
    };
    if !dest.verified {
        return Ok(DeliveryOutcome::Skipped);
    }

    // Quiet hours: park the reference without touching the ledger, so the
    // flush pass later claims the slot itself.
    if prefs.is_quiet_at(utc_hour) {
        store.enqueue_deferred(sub.user_id, &sub.username, post.post_id, now_sec)?;
        return Ok(DeliveryOutcome::Deferred);
    }

    if !store.insert_delivery(sub.user_id, &sub.username, post.post_id, now_sec)? {
        return Ok(DeliveryOutcome::Skipped);
    }

    let text = render::render_post(&sub.username, post, &prefs);
    send_rendered(
        store,
        notifier,
        sub.user_id,
        dest.chat_id,
        &sub.username,
        post,
        &text,
    )
    .await?;

    Ok(DeliveryOutcome::Sent)
}

/// Flush one user's deferred queue, oldest first.
///
/// Returns the number of posts sent. The first send failure aborts the
/// flush and leaves the remaining queue intact for the next tick.
pub async fn flush_deferred(
    store: &dyn Store,
    notifier: &dyn Notifier,
    user_id: i64,
    now_sec: i64,
    utc_hour: u32,
) -> Result<usize> {
    let prefs = store.get_prefs(user_id)?;
    if prefs.is_quiet_at(utc_hour) {
        return Ok(0);
    }
    let Some(dest) = store.get_destination(user_id)? else {
        return Ok(0);
    };
    if !dest.verified {
        return Ok(0);
    }

    let mut sent = 0;
    for queued in store.deferred_for_user(user_id, DEFERRED_FLUSH_BATCH)? {
        // Delivered through another path while parked.
        if !store.insert_delivery(user_id, &queued.username, queued.post_id, now_sec)? {
            store.delete_deferred(user_id, &queued.username, queued.post_id)?;
            continue;
        }

        let post = store
            .get_archived_post(&queued.username, queued.post_id)?
            .unwrap_or_else(|| Post {
                post_id: queued.post_id,
                text: String::new(),
                link: Post::link_for(&queued.username, queued.post_id),
                media: Vec::new(),
            });

        let text = render::render_post(&queued.username, &post, &prefs);
        send_rendered(
            store,
            notifier,
            user_id,
            dest.chat_id,
            &queued.username,
            &post,
            &text,
        )
        .await?;

        store.delete_deferred(user_id, &queued.username, queued.post_id)?;
        sent += 1;
    }
    Ok(sent)
}


#[cfg(test)]
mod tests {
    use super::test_support::MockNotifier;
    use super::*;
    use crate::domain::{DeliveryMode, MediaItem, MediaKind, Subscription};
    use crate::store::SqliteStore;

    const NOW: i64 = 1_700_000_000;
    const DAY_HOUR: u32 = 12;

    fn sub(user_id: i64) -> Subscription {
        Subscription {
            user_id,
            username: "somechan".to_string(),
            paused: false,
            mode: DeliveryMode::Realtime,
            include_keywords: Vec::new(),
            exclude_keywords: Vec::new(),
            backfill_n: 3,
            label: None,
        }
    }

    fn post(id: i64) -> Post {
        Post {
            post_id: id,
            text: format!("post number {}", id),
            link: Post::link_for("somechan", id),
            media: vec![MediaItem {
                kind: MediaKind::Photo,
                url: "https://cdn4.telesco.pe/file/p.jpg".into(),
            }],
        }
    }

    fn ready_store() -> SqliteStore {
        let s = SqliteStore::in_memory().unwrap();
        s.set_destination(1, -1001, NOW).unwrap();
        s.mark_destination_verified(1, true).unwrap();
        s
    }

    #[tokio::test]
    async fn test_realtime_sends_and_claims_ledger() {
        let s = ready_store();
        let n = MockNotifier::new();

        let out = deliver_realtime(&s, &n, &sub(1), &post(10), NOW, DAY_HOUR)
            .await
            .unwrap();
        assert_eq!(out, DeliveryOutcome::Sent);
        assert_eq!(n.sent_count(), 1);
        assert!(s.delivery_exists(1, "somechan", 10).unwrap());
        assert_eq!(n.sent.lock().unwrap()[0].0, -1001);
    }

    #[tokio::test]
    async fn test_duplicate_delivery_skipped() {
        let s = ready_store();
        let n = MockNotifier::new();

        deliver_realtime(&s, &n, &sub(1), &post(10), NOW, DAY_HOUR)
            .await
            .unwrap();
        let out = deliver_realtime(&s, &n, &sub(1), &post(10), NOW + 1, DAY_HOUR)
            .await
            .unwrap();
        assert_eq!(out, DeliveryOutcome::Skipped);
        assert_eq!(n.sent_count(), 1);
    }

    #[tokio::test]
    async fn test_paused_and_digest_subs_skipped() {
        let s = ready_store();
        let n = MockNotifier::new();

        let mut paused = sub(1);
        paused.paused = true;
        let out = deliver_realtime(&s, &n, &paused, &post(10), NOW, DAY_HOUR)
            .await
            .unwrap();
        assert_eq!(out, DeliveryOutcome::Skipped);

        let mut digest = sub(1);
        digest.mode = DeliveryMode::Digest;
        let out = deliver_realtime(&s, &n, &digest, &post(10), NOW, DAY_HOUR)
            .await
            .unwrap();
        assert_eq!(out, DeliveryOutcome::Skipped);
        assert_eq!(n.sent_count(), 0);
        assert!(!s.delivery_exists(1, "somechan", 10).unwrap());
    }

    #[tokio::test]
    async fn test_keyword_filters_applied() {
        let s = ready_store();
        let n = MockNotifier::new();

        let mut filtered = sub(1);
        filtered.exclude_keywords = vec!["number 10".into()];
        let out = deliver_realtime(&s, &n, &filtered, &post(10), NOW, DAY_HOUR)
            .await
            .unwrap();
        assert_eq!(out, DeliveryOutcome::Skipped);

        // Global prefs filters apply on top of subscription filters.
        let mut prefs = s.get_prefs(1).unwrap();
        prefs.global_exclude_keywords = vec!["number 11".into()];
        s.update_prefs(&prefs, NOW).unwrap();
        let out = deliver_realtime(&s, &n, &sub(1), &post(11), NOW, DAY_HOUR)
            .await
            .unwrap();
        assert_eq!(out, DeliveryOutcome::Skipped);
        assert_eq!(n.sent_count(), 0);
    }

    #[tokio::test]
    async fn test_quiet_hours_defer_without_ledger() {
        let s = ready_store();
        let n = MockNotifier::new();

        let mut prefs = s.get_prefs(1).unwrap();
        prefs.quiet_start = 10;
        prefs.quiet_end = 14;
        s.update_prefs(&prefs, NOW).unwrap();

        let out = deliver_realtime(&s, &n, &sub(1), &post(10), NOW, 12)
            .await
            .unwrap();
        assert_eq!(out, DeliveryOutcome::Deferred);
        assert_eq!(n.sent_count(), 0);
        assert!(!s.delivery_exists(1, "somechan", 10).unwrap());
        assert_eq!(s.deferred_for_user(1, 10).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_flush_deferred_sends_and_dequeues() {
        let s = ready_store();
        let n = MockNotifier::new();

        s.archive_posts("somechan", &[post(10), post(11)], NOW).unwrap();
        s.enqueue_deferred(1, "somechan", 10, NOW).unwrap();
        s.enqueue_deferred(1, "somechan", 11, NOW + 1).unwrap();

        let sent = flush_deferred(&s, &n, 1, NOW + 100, DAY_HOUR).await.unwrap();
        assert_eq!(sent, 2);
        assert_eq!(n.sent_count(), 2);
        assert!(s.deferred_for_user(1, 10).unwrap().is_empty());
        assert!(s.delivery_exists(1, "somechan", 10).unwrap());
        assert!(s.delivery_exists(1, "somechan", 11).unwrap());
        // Oldest first.
        let msgs = n.sent.lock().unwrap();
        assert!(msgs[0].1.contains("#10"));
        assert!(msgs[1].1.contains("#11"));
    }

    #[tokio::test]
    async fn test_flush_skips_while_still_quiet() {
        let s = ready_store();
        let n = MockNotifier::new();

        let mut prefs = s.get_prefs(1).unwrap();
        prefs.quiet_start = 10;
        prefs.quiet_end = 14;
        s.update_prefs(&prefs, NOW).unwrap();
        s.enqueue_deferred(1, "somechan", 10, NOW).unwrap();

        let sent = flush_deferred(&s, &n, 1, NOW, 12).await.unwrap();
        assert_eq!(sent, 0);
        assert_eq!(s.deferred_for_user(1, 10).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_flush_drops_already_delivered() {
        let s = ready_store();
        let n = MockNotifier::new();

        s.enqueue_deferred(1, "somechan", 10, NOW).unwrap();
        s.insert_delivery(1, "somechan", 10, NOW).unwrap();

        let sent = flush_deferred(&s, &n, 1, NOW + 10, DAY_HOUR).await.unwrap();
        assert_eq!(sent, 0);
        assert_eq!(n.sent_count(), 0);
        assert!(s.deferred_for_user(1, 10).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_send_failure_rolls_back_ledger() {
        let s = ready_store();
        let n = MockNotifier::new();
        n.fail_with(500, "Internal Server Error");

        let result = deliver_realtime(&s, &n, &sub(1), &post(10), NOW, DAY_HOUR).await;
        assert!(result.is_err());
        assert!(!s.delivery_exists(1, "somechan", 10).unwrap());
        // Transient failure leaves the destination verified.
        assert!(s.get_destination(1).unwrap().unwrap().verified);
    }

    #[tokio::test]
    async fn test_access_error_unverifies_destination() {
        let s = ready_store();
        let n = MockNotifier::new();
        n.fail_with(403, "Forbidden: bot was kicked from the channel chat");

        let result = deliver_realtime(&s, &n, &sub(1), &post(10), NOW, DAY_HOUR).await;
        assert!(result.is_err());
        assert!(!s.delivery_exists(1, "somechan", 10).unwrap());
        assert!(!s.get_destination(1).unwrap().unwrap().verified);
    }

    #[tokio::test]
    async fn test_flush_aborts_on_first_failure() {
        let s = ready_store();
        let n = MockNotifier::new();
        n.fail_with(500, "Internal Server Error");

        s.enqueue_deferred(1, "somechan", 10, NOW).unwrap();
        s.enqueue_deferred(1, "somechan", 11, NOW + 1).unwrap();

        let result = flush_deferred(&s, &n, 1, NOW + 10, DAY_HOUR).await;
        assert!(result.is_err());
        // Both stay queued and neither holds a ledger slot.
        assert_eq!(s.deferred_for_user(1, 10).unwrap().len(), 2);
        assert!(!s.delivery_exists(1, "somechan", 10).unwrap());
    }
}
