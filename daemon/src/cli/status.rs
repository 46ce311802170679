//! Show who is online and what the server has recorded.

use chrono::{DateTime, Utc};

use crate::cli::humanize;
use crate::config::Config;
use crate::error::Error;
use crate::storage::{Player, PlayerStore, Session, SqliteStore, StorageResult};

/// Exit codes for status command.
pub mod exit_code {
    pub const OK: i32 = 0;
    pub const NO_DATABASE: i32 = 1;
}

const TOP_COMMANDS: usize = 5;

pub struct StatusReport {
    pub known_players: usize,
    pub provisional_players: usize,
    pub online: Vec<(Player, Session)>,
    pub top_commands: Vec<(String, i64)>,
    pub last_activity: Option<DateTime<Utc>>,
}

impl StatusReport {
    pub fn collect(store: &SqliteStore) -> StorageResult<Self> {
        let players = store.list_players()?;
        let provisional_players = players.iter().filter(|p| p.provisional).count();
        Ok(Self {
            known_players: players.len() - provisional_players,
            provisional_players,
            online: store.online_players()?,
            top_commands: store.top_commands(TOP_COMMANDS)?,
            last_activity: players.iter().map(|p| p.last_seen).max(),
        })
    }
}

/// Run the status command.
pub fn run(config: &Config) -> Result<i32, Error> {
    println!("minetail status");
    println!("  Database: {}", config.database.display());

    if !config.database.exists() {
        println!("  Initialized: no");
        println!();
        println!("Run 'minetail run --log <path>' to start recording.");
        return Ok(exit_code::NO_DATABASE);
    }

    let store = SqliteStore::open(&config.database)?;
    let report = StatusReport::collect(&store)?;
    // Stored times carry the clock correction, so compare against a corrected now.
    let now = Utc::now() + config.clock_correction();

    println!(
        "  Players: {} known, {} provisional",
        report.known_players, report.provisional_players
    );
    println!("  Online: {}", report.online.len());
    for (player, session) in &report.online {
        println!(
            "    {} for {} (from {})",
            player.name,
            humanize(now - session.join_time),
            if session.address.is_empty() { "unknown" } else { session.address.as_str() }
        );
    }

    if !report.top_commands.is_empty() {
        println!("  Top commands:");
        for (name, uses) in &report.top_commands {
            println!("    {name}: {uses}");
        }
    }

    if let Some(last) = report.last_activity {
        println!("  Last activity: {} ago", humanize(now - last));
    }

    Ok(exit_code::OK)
}
