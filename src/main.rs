use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use telefeed::app::AppContext;
use telefeed::cli::{commands, Cli, Commands, DaemonAction};
use telefeed::config::Config;
use telefeed::daemon::{self, Daemon, DaemonConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::load()?;
    let ctx = AppContext::new(config)?;

    match cli.command {
        Commands::Follow { channel } => {
            commands::follow(&ctx, cli.user, &channel).await?;
        }
        Commands::Unfollow { channel } => {
            commands::unfollow(&ctx, cli.user, &channel)?;
        }
        Commands::List => {
            commands::list(&ctx, cli.user)?;
        }
        Commands::Dest { chat_id } => {
            commands::set_destination(&ctx, cli.user, chat_id).await?;
        }
        Commands::Pause { channel } => {
            commands::set_paused(&ctx, cli.user, &channel, true)?;
        }
        Commands::Resume { channel } => {
            commands::set_paused(&ctx, cli.user, &channel, false)?;
        }
        Commands::Mode { channel, mode } => {
            commands::set_mode(&ctx, cli.user, &channel, &mode)?;
        }
        Commands::Filter {
            channel,
            include,
            exclude,
        } => {
            commands::set_filters(
                &ctx,
                cli.user,
                &channel,
                include.as_deref(),
                exclude.as_deref(),
            )?;
        }
        Commands::Digest => {
            commands::send_digest(&ctx, cli.user).await?;
        }
        Commands::Tick => {
            commands::tick(&ctx).await?;
        }
        Commands::Status => {
            commands::status(&ctx)?;
        }
        Commands::Daemon { action } => match action {
            DaemonAction::Start { log } => {
                let daemon_config = DaemonConfig {
                    tick_interval_secs: ctx.config.tick_interval_secs,
                    log_file: log,
                };
                let daemon = Daemon::new(Arc::new(ctx), daemon_config);
                daemon.run().await?;
            }
            DaemonAction::Stop => match daemon::stop_daemon() {
                Ok(()) => println!("Daemon stopped"),
                Err(e) => eprintln!("{}", e),
            },
            DaemonAction::Status => {
                println!("{}", daemon::daemon_status());
            }
        },
    }

    Ok(())
}
