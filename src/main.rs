#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::doc_markdown,
    clippy::missing_errors_doc,
    clippy::too_many_lines,
    clippy::uninlined_format_args
)]

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use roombridge::conversations::{lookup_conversation_id, CleanupSweeper};
use roombridge::sessions;
use roombridge::{Config, ConversationService};

/// `roombridge` - one live agent conversation per room, agent and user.
#[derive(Parser, Debug)]
#[command(name = "roombridge")]
#[command(version)]
#[command(about = "Route chat rooms to remote agent conversations.", long_about = None)]
struct Cli {
    #[arg(long, global = true)]
    config_dir: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show configuration and mapping counts
    Status,

    /// Print the stored conversation handle for a room without contacting the runtime
    Lookup {
        #[arg(long)]
        context: String,
        #[arg(long)]
        agent: String,
        #[arg(long)]
        isolation_key: Option<String>,
    },

    /// Resolve the room conversation and send one message into it
    #[command(long_about = "\
Resolve the room conversation and send one message into it.

Direct rooms (two members) get one conversation per isolation key; \
larger rooms share a single conversation.

Examples:
  roombridge send --context room-1 --agent agent-9 --members 2 --isolation-key alice -m \"hi\"
  roombridge send --context lobby --agent agent-9 --members 12 --label Lobby -m \"status?\"")]
    Send {
        #[arg(long)]
        context: String,
        #[arg(long)]
        agent: String,
        /// Number of members in the room
        #[arg(long)]
        members: usize,
        #[arg(long)]
        isolation_key: Option<String>,
        /// Human-readable room name used for the conversation summary
        #[arg(long)]
        label: Option<String>,
        #[arg(short, long)]
        message: String,
    },

    /// Relay one message from one agent to another
    Relay {
        #[arg(long)]
        from: String,
        #[arg(long)]
        to: String,
        #[arg(long)]
        context: String,
        #[arg(long)]
        isolation_key: Option<String>,
        #[arg(short, long)]
        message: String,
    },

    /// Delete mappings idle for longer than N days (single pass)
    Cleanup {
        /// Defaults to cleanup.stale_after_days
        #[arg(long)]
        days: Option<u32>,
    },

    /// Run the periodic cleanup sweeper until Ctrl-C
    Sweep,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Some(config_dir) = &cli.config_dir {
        if config_dir.trim().is_empty() {
            bail!("--config-dir cannot be empty");
        }
        std::env::set_var("ROOMBRIDGE_CONFIG_DIR", config_dir);
    }

    // Initialize logging - respects RUST_LOG env var, defaults to INFO
    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to install tracing subscriber")?;

    let config = Config::load_or_init().await?;

    match cli.command {
        Commands::Status => {
            let store = sessions::create_conversation_store(&config.store)?;
            let stats = store.stats().await?;

            println!("roombridge {}", env!("CARGO_PKG_VERSION"));
            println!();
            println!("Config:      {}", config.config_path.display());
            println!(
                "Runtime:     {} ({})",
                config.runtime.kind,
                display_or_unset(&config.runtime.base_url)
            );
            println!(
                "API key:     {}",
                if config.runtime.api_key.is_some() { "set" } else { "(unset)" }
            );
            println!("Store:       {} ({})", store.name(), config.store.path.display());
            println!(
                "Retry:       {} retries, {}ms..{}ms",
                config.retry.max_retries, config.retry.base_delay_ms, config.retry.max_delay_ms
            );
            println!(
                "Cleanup:     after {} days, every {}s",
                config.cleanup.stale_after_days, config.cleanup.interval_secs
            );
            println!();
            println!("Room conversations:        {}", stats.room_conversations);
            println!("Inter-agent conversations: {}", stats.inter_agent_conversations);
            Ok(())
        }

        Commands::Lookup {
            context,
            agent,
            isolation_key,
        } => {
            let store = sessions::create_conversation_store(&config.store)?;
            let handle =
                lookup_conversation_id(store.as_ref(), &context, &agent, isolation_key.as_deref())
                    .await?;
            println!("{}", handle.as_deref().unwrap_or("(none)"));
            Ok(())
        }

        Commands::Send {
            context,
            agent,
            members,
            isolation_key,
            label,
            message,
        } => {
            let service = ConversationService::from_config(&config)?;
            let (handle, created) = service
                .get_or_create_room_conversation(
                    &context,
                    &agent,
                    members,
                    isolation_key.as_deref(),
                    label.as_deref(),
                )
                .await?;
            let outcome = service
                .send_with_retry(&handle, &message, service.max_retries())
                .await?;

            print_reply(&handle, created, &outcome.assistant_text());
            Ok(())
        }

        Commands::Relay {
            from,
            to,
            context,
            isolation_key,
            message,
        } => {
            let service = ConversationService::from_config(&config)?;
            let (handle, created) = service
                .get_or_create_inter_agent_conversation(
                    &from,
                    &to,
                    &context,
                    isolation_key.as_deref(),
                )
                .await?;
            let outcome = service
                .send_with_retry(&handle, &message, service.max_retries())
                .await?;

            print_reply(&handle, created, &outcome.assistant_text());
            Ok(())
        }

        Commands::Cleanup { days } => {
            let days = days.unwrap_or(config.cleanup.stale_after_days);
            let store = sessions::create_conversation_store(&config.store)?;
            let (rooms, relays) = CleanupSweeper::new(Arc::from(store))
                .delete_stale(days)
                .await?;
            println!("Removed {rooms} room and {relays} inter-agent mappings idle > {days} days");
            Ok(())
        }

        Commands::Sweep => {
            let store = sessions::create_conversation_store(&config.store)?;
            let sweeper = CleanupSweeper::new(Arc::from(store));
            let cancel = CancellationToken::new();

            let ctrl_c = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("Ctrl-C received, stopping sweeper");
                }
                ctrl_c.cancel();
            });

            info!(
                interval_secs = config.cleanup.interval_secs,
                stale_after_days = config.cleanup.stale_after_days,
                "Starting cleanup sweeper"
            );
            sweeper
                .run_periodic(
                    Duration::from_secs(config.cleanup.interval_secs),
                    config.cleanup.stale_after_days,
                    cancel,
                )
                .await;
            Ok(())
        }
    }
}

fn display_or_unset(value: &str) -> &str {
    if value.trim().is_empty() {
        "(unset)"
    } else {
        value
    }
}

fn print_reply(handle: &str, created: bool, reply: &str) {
    println!(
        "Conversation: {handle}{}",
        if created { " (new)" } else { "" }
    );
    if !reply.is_empty() {
        println!();
        println!("{reply}");
    }
}
