//! `minetail stats NAME`: play history for one player.

use chrono::Utc;

use crate::cli::format_play_time;
use crate::config::Config;
use crate::error::Error;
use crate::storage::{Identity, Player, PlayerStats, PlayerStore, SqliteStore};

pub fn run(config: &Config, name: &str) -> Result<(), Error> {
    let store = SqliteStore::open(&config.database)?;
    let player = lookup(&store, name)?;
    let now = Utc::now() + config.clock_correction();
    let stats = store.player_stats(&player.id, now)?;
    print_stats(&stats);
    Ok(())
}

/// By name first; a provisional player is stored under its name.
pub fn lookup(store: &SqliteStore, name: &str) -> Result<Player, Error> {
    if let Some(player) = store.find_player_by_name(name)? {
        return Ok(player);
    }
    store
        .find_player(&Identity::new(name))?
        .ok_or_else(|| Error::PlayerNotFound(name.to_string()))
}

fn print_stats(stats: &PlayerStats) {
    let player = &stats.player;
    println!("{}", player.name);
    println!("  Identity: {}", player.id);
    if player.provisional {
        println!("  (provisional: no identity announced yet)");
    }
    println!("  First seen: {}", player.first_seen.format("%Y-%m-%d %H:%M"));
    println!("  Last seen: {}", player.last_seen.format("%Y-%m-%d %H:%M"));
    println!("  Sessions: {}", stats.session_count);
    if stats.online {
        println!("  Online now");
    }
    println!("  Play time: {}", format_play_time(stats.total_play_time));
    println!("  Commands used: {}", stats.commands_used);
    println!("  Advancements: {}", stats.advancements.len());
    for advancement in &stats.advancements {
        println!("    [{}] {}", advancement.at.format("%Y-%m-%d"), advancement.title);
    }
}
