//! Periodic digest batches for digest-mode subscriptions.
//!
//! A digest covers the window since the user's previous digest. The window
//! marker advances even for an empty window, so a quiet period produces no
//! message instead of a backlog.

use crate::app::Result;
use crate::domain::{text_passes_filters, DeliveryMode, Post};
use crate::notifier::{render, Notifier, SendOptions};
use crate::store::Store;

/// Overall cap per digest message.
pub const DIGEST_MAX_ITEMS: usize = 25;

/// Per-channel cap inside one digest window.
pub const DIGEST_MAX_PER_CHANNEL: i64 = 20;

/// Whether the user's next digest is due at `now_sec`.
pub fn digest_due(last_digest_at: i64, digest_hours: i64, now_sec: i64) -> bool {
    last_digest_at == 0 || now_sec - last_digest_at >= digest_hours * 3600
}

/// Build and send one user's digest if it is due (or `force`d).
///
/// Returns the number of posts included, 0 when not due or empty.
pub async fn run_digest_for_user(
    store: &dyn Store,
    notifier: &dyn Notifier,
    user_id: i64,
    now_sec: i64,
    force: bool,
) -> Result<usize> {
    let prefs = store.get_prefs(user_id)?;
    if !force && !digest_due(prefs.last_digest_at, prefs.digest_hours, now_sec) {
        return Ok(0);
    }

    let Some(dest) = store.get_destination(user_id)? else {
        return Ok(0);
    };
    if !dest.verified {
        return Ok(0);
    }

    let since = if prefs.last_digest_at > 0 {
        prefs.last_digest_at
    } else {
        now_sec - prefs.digest_hours * 3600
    };

    let mut items: Vec<(String, Post)> = Vec::new();
    for sub in store.subscriptions_for_user(user_id)? {
        if sub.paused || sub.mode != DeliveryMode::Digest {
            continue;
        }
        for post in store.archived_posts_since(&sub.username, since, DIGEST_MAX_PER_CHANNEL)? {
            let passes = text_passes_filters(&post.text, &sub.include_keywords, &sub.exclude_keywords)
                && text_passes_filters(
                    &post.text,
                    &prefs.global_include_keywords,
                    &prefs.global_exclude_keywords,
                );
            if passes {
                items.push((sub.username.clone(), post));
            }
        }
    }

    // Newest first across channels.
    items.sort_by(|a, b| b.1.post_id.cmp(&a.1.post_id));
    items.truncate(DIGEST_MAX_ITEMS);

    if items.is_empty() {
        store.set_last_digest_at(user_id, now_sec)?;
        return Ok(0);
    }

    let text = render::render_digest(&items);
    for part in render::split_message(&text) {
        if let Err(e) = notifier
            .send_message(dest.chat_id, &part, SendOptions::default())
            .await
        {
            if e.is_access_error() {
                tracing::warn!("destination of user {} lost access: {}", user_id, e);
                store.mark_destination_verified(user_id, false)?;
            }
            // Marker untouched: the window is retried next time.
            return Err(e.into());
        }
    }

    store.set_last_digest_at(user_id, now_sec)?;
    Ok(items.len())
}

/// Run due digests for every user holding an active digest subscription.
/// Failures are isolated per user.
pub async fn run_digests(store: &dyn Store, notifier: &dyn Notifier, now_sec: i64) -> Result<usize> {
    let mut delivered = 0;
    for user_id in store.users_with_digest_subs()? {
        match run_digest_for_user(store, notifier, user_id, now_sec, false).await {
            Ok(n) => delivered += n,
            Err(e) => {
                tracing::error!("digest for user {} failed: {}", user_id, e);
            }
        }
    }
    Ok(delivered)
}
