pub mod commands;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "telefeed")]
#[command(about = "Follow public Telegram channels and forward their posts", long_about = None)]
pub struct Cli {
    /// Act as this user id (subscriptions and destinations are per user)
    #[arg(short, long, default_value_t = 0, global = true)]
    pub user: i64,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Follow a channel (@name, t.me/name or a full link)
    Follow {
        /// Channel to follow
        channel: String,
    },
    /// Unfollow a channel
    Unfollow {
        /// Channel to unfollow
        channel: String,
    },
    /// List followed channels
    List,
    /// Set the destination chat for deliveries
    Dest {
        /// Chat id the bot should deliver to
        chat_id: i64,
    },
    /// Pause deliveries from a channel
    Pause { channel: String },
    /// Resume deliveries from a channel
    Resume { channel: String },
    /// Switch a channel between realtime and digest delivery
    Mode {
        channel: String,
        /// "realtime" or "digest"
        mode: String,
    },
    /// Set keyword filters for a channel
    Filter {
        channel: String,
        /// Comma-separated keywords a post must contain
        #[arg(long)]
        include: Option<String>,
        /// Comma-separated keywords that reject a post
        #[arg(long)]
        exclude: Option<String>,
    },
    /// Send the pending digest now
    Digest,
    /// Run a single scheduler tick
    Tick,
    /// Show source polling status
    Status,
    /// Background daemon running the tick loop
    Daemon {
        #[command(subcommand)]
        action: DaemonAction,
    },
}

#[derive(Subcommand)]
pub enum DaemonAction {
    /// Start the background daemon
    Start {
        /// Log file path (default: stdout)
        #[arg(short, long)]
        log: Option<std::path::PathBuf>,
    },
    /// Stop the running daemon
    Stop,
    /// Check daemon status
    Status,
}
