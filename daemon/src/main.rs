//! minetail - game server log tailer.
//!
//! Follows the server log, turns joins, leaves, commands and advancements
//! into player sessions in SQLite, and fans out login notifications.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod cli;
mod config;
mod error;
mod fanout;
mod storage;
mod watcher;

pub use config::Config;
pub use error::Error;

#[derive(Parser)]
#[command(name = "minetail")]
#[command(about = "Tail a game server log and record player sessions")]
#[command(version)]
struct Cli {
    /// Config file (default: <config dir>/minetail/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// SQLite database path
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Tail the server log until interrupted
    Run {
        /// Log file to follow
        #[arg(long)]
        log: Option<PathBuf>,
    },

    /// Process a whole log file from the beginning
    Ingest {
        path: PathBuf,
    },

    /// Show online players and recorded totals
    Status,

    /// Show play history for a player
    Stats {
        name: String,
    },

    /// Manage login notifications
    Notify {
        #[command(subcommand)]
        cmd: NotifyCommands,
    },
}

#[derive(Subcommand)]
enum NotifyCommands {
    /// Enable or disable login notifications for a chat
    Toggle { chat_id: i64 },

    /// Mute or unmute one player for a chat
    Mute { chat_id: i64, name: String },
}

fn main() -> Result<(), Error> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(
            "minetail=info".parse().expect("static directive is valid"),
        ))
        .init();

    let cli = Cli::parse();

    let Some(command) = cli.command else {
        use clap::CommandFactory;
        Cli::command().print_help()?;
        println!();
        return Ok(());
    };

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(db) = cli.db {
        config.database = db;
    }

    match command {
        Commands::Run { log } => {
            if let Some(log) = log {
                config.log_path = Some(log);
            }
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(cli::run::run(&config))?;
        }
        Commands::Ingest { path } => {
            cli::ingest::run(&config, &path)?;
        }
        Commands::Status => {
            let exit_code = cli::status::run(&config)?;
            if exit_code != cli::status::exit_code::OK {
                std::process::exit(exit_code);
            }
        }
        Commands::Stats { name } => {
            cli::stats::run(&config, &name)?;
        }
        Commands::Notify { cmd } => match cmd {
            NotifyCommands::Toggle { chat_id } => {
                cli::notify::toggle(&config, chat_id)?;
            }
            NotifyCommands::Mute { chat_id, name } => {
                cli::notify::mute(&config, chat_id, &name)?;
            }
        },
    }

    Ok(())
}
