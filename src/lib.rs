//! # Telefeed
//!
//! Follows public Telegram channels without bot membership and forwards
//! their posts to a destination chat of your choice.
//!
//! ## Architecture
//!
//! Telefeed follows a modular pipeline architecture:
//!
//! ```text
//! Fetcher → Extractor → Store → Scheduler → Delivery / Digest → Notifier
//! ```
//!
//! - [`fetcher`]: HTTP client for the public `t.me/s/` preview pages
//! - [`extractor`]: Turns preview HTML into posts with text and media
//! - [`store`]: SQLite persistence (sources, subscriptions, ledger, archive)
//! - [`scheduler`]: Adaptive per-channel polling behind a tick lock
//! - [`delivery`]: Realtime fan-out, keyword filters, quiet-hour deferral
//! - [`digest`]: Periodic batched summaries for digest subscriptions
//! - [`notifier`]: Bot API client and message rendering
//!
//! ## Quick Start
//!
//! ```bash
//! # Point deliveries at a chat the bot can post to
//! telefeed dest -- -1001234567890
//!
//! # Follow a channel
//! telefeed follow @somechannel
//!
//! # Run the poll loop
//! telefeed daemon start
//! ```
//!
//! ## Modules
//!
//! - [`app`]: Application context and error types
//! - [`cli`]: Command-line interface definitions
//! - [`config`]: Configuration from `~/.config/telefeed/config.toml`
//! - [`domain`]: Core domain models (Post, Source, Subscription, UserPrefs)

/// Application context and error handling.
///
/// The [`AppContext`](app::AppContext) struct wires together all components:
/// store, fetcher, notifier, ticker.
pub mod app;

/// Command-line interface using clap.
pub mod cli;

/// Configuration management.
///
/// Loads from `~/.config/telefeed/config.toml`; a commented default file
/// is written on first run.
pub mod config;

/// Background daemon running the scheduler tick loop.
///
/// - `telefeed daemon start` - Start the tick loop
/// - `telefeed daemon stop` - Stop the daemon
/// - `telefeed daemon status` - Check if daemon is running
pub mod daemon;

/// Realtime delivery and the quiet-hours deferred queue.
pub mod delivery;

/// Periodic digest batches.
pub mod digest;

/// Core domain models.
///
/// - [`Post`](domain::Post): One extracted channel post with media
/// - [`Source`](domain::Source): A followed channel and its poll schedule
/// - [`Subscription`](domain::Subscription): A user's link to a channel
/// - [`UserPrefs`](domain::UserPrefs): Delivery preferences and quiet hours
pub mod domain;

/// HTML-to-post extraction for channel preview pages.
pub mod extractor;

/// Preview page fetching.
///
/// - [`PageFetcher`](fetcher::PageFetcher): Async trait for page fetching
/// - [`HttpFetcher`](fetcher::HttpFetcher): reqwest-based implementation
pub mod fetcher;

/// Outbound messaging.
///
/// - [`Notifier`](notifier::Notifier): Async trait for sending messages
/// - [`TelegramNotifier`](notifier::TelegramNotifier): Bot API implementation
/// - [`render`](notifier::render): Post cards, digests, message splitting
pub mod notifier;

/// The tick engine: adaptive polling, fan-out and the schedule cache.
pub mod scheduler;

/// SQLite persistence layer.
///
/// - [`Store`](store::Store): Trait defining storage operations
/// - [`SqliteStore`](store::SqliteStore): SQLite implementation
pub mod store;
