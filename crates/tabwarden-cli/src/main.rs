mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tabwarden_core::config::get_data_dir;

#[derive(Parser)]
#[command(name = "tabwarden")]
#[command(about = "Browsing time tracking and site blocking daemon", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the tracking daemon
    Start,
    /// (Internal) Run the daemon process
    #[command(hide = true)]
    DaemonInternalStart,
    /// Stop the tracking daemon
    Stop,
    /// Check daemon status
    Status,
    /// Show today's per-site browsing time
    Report,
    /// Manage the blocklists
    Block {
        #[command(subcommand)]
        action: BlockAction,
    },
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum BlockAction {
    /// Add a domain pattern
    Add {
        /// Domain to block, e.g. `reddit.com` (covers subdomains)
        pattern: String,
        /// Add to the hard blocklist (no escape path)
        #[arg(long)]
        hard: bool,
    },
    /// Remove a domain pattern
    Remove {
        pattern: String,
        /// Remove from the hard blocklist
        #[arg(long)]
        hard: bool,
    },
    /// List both blocklists
    List,
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Show current settings
    Show,
    /// Set the API key used by the negotiation UI
    SetApiKey { key: String },
    /// Set the idle threshold in seconds
    SetIdleThreshold { seconds: u32 },
    /// Set the soft and hard block page URLs
    SetBlockPages { soft: String, hard: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // The daemon process pipes its own logger to a file; initializing
    // here as well would collide.
    if !matches!(cli.command, Commands::DaemonInternalStart) {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
            .format_timestamp_secs()
            .init();
    }

    let data_dir = get_data_dir()?;

    match cli.command {
        Commands::Start => commands::daemon::start_daemon(&data_dir),
        Commands::DaemonInternalStart => commands::daemon::run_daemon_process().await,
        Commands::Stop => commands::daemon::stop_daemon(&data_dir).await,
        Commands::Status => commands::daemon::show_status(&data_dir).await,
        Commands::Report => commands::report::show_report(&data_dir).await,
        Commands::Block { action } => commands::blocklist::run(action),
        Commands::Config { action } => commands::config::run(action),
    }
}
