use chrono::Utc;

use crate::app::{AppContext, Result, TelefeedError};
use crate::digest;
use crate::domain::subscription::keywords_json;
use crate::domain::{normalize_username, DeliveryMode};
use crate::notifier::SendOptions;
use crate::store::Store;

fn require_username(input: &str) -> Result<String> {
    normalize_username(input).ok_or_else(|| TelefeedError::InvalidUsername(input.to_string()))
}

fn require_subscription(ctx: &AppContext, user_id: i64, username: &str) -> Result<()> {
    if ctx.store.get_subscription(user_id, username)?.is_none() {
        return Err(TelefeedError::Other(format!(
            "Not subscribed to @{}",
            username
        )));
    }
    Ok(())
}

pub async fn follow(ctx: &AppContext, user_id: i64, channel: &str) -> Result<()> {
    let outcome = ctx.ticker.follow_channel(user_id, channel).await?;
    println!("Following @{}", outcome.username);
    if outcome.delivered > 0 {
        println!("Backfilled {} recent posts", outcome.delivered);
    }
    Ok(())
}

pub fn unfollow(ctx: &AppContext, user_id: i64, channel: &str) -> Result<()> {
    let username = require_username(channel)?;
    if !ctx.store.remove_subscription(user_id, &username)? {
        println!("Not subscribed to @{}", username);
        return Ok(());
    }
    println!("Unfollowed @{}", username);

    // Drop the source once the last subscriber is gone.
    if !ctx.store.subscribed_usernames()?.contains(&username) {
        ctx.store.delete_source(&username)?;
    }
    Ok(())
}

pub fn list(ctx: &AppContext, user_id: i64) -> Result<()> {
    let subs = ctx.store.subscriptions_for_user(user_id)?;
    if subs.is_empty() {
        println!("No subscriptions");
        return Ok(());
    }

    for sub in subs {
        let mut flags: Vec<String> = vec![sub.mode.as_str().to_string()];
        if sub.paused {
            flags.push("paused".into());
        }
        if !sub.include_keywords.is_empty() {
            flags.push(format!("include: {}", sub.include_keywords.join(", ")));
        }
        if !sub.exclude_keywords.is_empty() {
            flags.push(format!("exclude: {}", sub.exclude_keywords.join(", ")));
        }
        match sub.label {
            Some(label) => println!("@{} ({}) [{}]", sub.username, label, flags.join("; ")),
            None => println!("@{} [{}]", sub.username, flags.join("; ")),
        }
    }
    Ok(())
}

/// Point deliveries at a chat and verify access by sending a test message.
pub async fn set_destination(ctx: &AppContext, user_id: i64, chat_id: i64) -> Result<()> {
    let now = Utc::now().timestamp();
    ctx.store.set_destination(user_id, chat_id, now)?;

    let result = ctx
        .notifier
        .send_message(
            chat_id,
            "✅ Telefeed connected. Posts from followed channels will arrive here.",
            SendOptions::default(),
        )
        .await;

    match result {
        Ok(()) => {
            ctx.store.mark_destination_verified(user_id, true)?;
            println!("Destination set to chat {} and verified", chat_id);
            Ok(())
        }
        Err(e) => {
            println!(
                "Destination saved but could not be verified: {}\n\
                 Make sure the bot is a member of the chat and can post, then retry.",
                e
            );
            Err(e.into())
        }
    }
}

pub fn set_paused(ctx: &AppContext, user_id: i64, channel: &str, paused: bool) -> Result<()> {
    let username = require_username(channel)?;
    require_subscription(ctx, user_id, &username)?;
    ctx.store.set_subscription_paused(user_id, &username, paused)?;
    println!(
        "@{} {}",
        username,
        if paused { "paused" } else { "resumed" }
    );
    Ok(())
}

pub fn set_mode(ctx: &AppContext, user_id: i64, channel: &str, mode: &str) -> Result<()> {
    let username = require_username(channel)?;
    require_subscription(ctx, user_id, &username)?;

    if mode != "realtime" && mode != "digest" {
        return Err(TelefeedError::Other(format!(
            "Unknown mode '{}', expected realtime or digest",
            mode
        )));
    }
    let mode = DeliveryMode::parse(mode);
    ctx.store
        .set_subscription_mode(user_id, &username, mode.as_str())?;
    println!("@{} now delivers in {} mode", username, mode.as_str());
    Ok(())
}

fn split_keywords(raw: Option<&str>) -> Vec<String> {
    raw.map(|s| {
        s.split(',')
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .collect()
    })
    .unwrap_or_default()
}

pub fn set_filters(
    ctx: &AppContext,
    user_id: i64,
    channel: &str,
    include: Option<&str>,
    exclude: Option<&str>,
) -> Result<()> {
    let username = require_username(channel)?;
    require_subscription(ctx, user_id, &username)?;

    let include = split_keywords(include);
    let exclude = split_keywords(exclude);
    ctx.store.set_subscription_filters(
        user_id,
        &username,
        &keywords_json(&include),
        &keywords_json(&exclude),
    )?;

    if include.is_empty() && exclude.is_empty() {
        println!("Filters cleared for @{}", username);
    } else {
        println!(
            "Filters for @{}: include [{}], exclude [{}]",
            username,
            include.join(", "),
            exclude.join(", ")
        );
    }
    Ok(())
}

pub async fn send_digest(ctx: &AppContext, user_id: i64) -> Result<()> {
    let now = Utc::now().timestamp();
    let count = digest::run_digest_for_user(
        ctx.store.as_ref(),
        ctx.notifier.as_ref(),
        user_id,
        now,
        true,
    )
    .await?;

    if count == 0 {
        println!("No digest posts pending");
    } else {
        println!("Digest sent with {} posts", count);
    }
    Ok(())
}

pub async fn tick(ctx: &AppContext) -> Result<()> {
    let summary = ctx.ticker.run_tick().await?;
    ctx.ticker.flush_cache(Utc::now().timestamp(), true)?;

    if summary.skipped {
        println!("Tick skipped: another instance holds the lock");
    } else {
        println!(
            "Tick complete: {} sources polled, {} deferred posts sent, {} digest posts",
            summary.polled, summary.deferred_sent, summary.digest_posts
        );
    }
    Ok(())
}

pub fn status(ctx: &AppContext) -> Result<()> {
    let sources = ctx.store.get_all_sources()?;
    if sources.is_empty() {
        println!("No sources");
        return Ok(());
    }

    let now = Utc::now().timestamp();
    for src in sources {
        let due_in = src.next_check_at - now;
        let due = if due_in <= 0 {
            "due now".to_string()
        } else {
            format!("due in {}s", due_in)
        };
        print!(
            "@{}: last post {}, every {}s, {}",
            src.username, src.last_post_id, src.check_every_sec, due
        );
        if src.fail_count > 0 {
            print!(
                " ({} failures, last: {})",
                src.fail_count,
                src.last_error.as_deref().unwrap_or("unknown")
            );
        }
        println!();
    }
    Ok(())
}
