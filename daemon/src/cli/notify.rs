//! `minetail notify`: per-chat subscription and mute toggles.

use crate::cli::stats::lookup;
use crate::config::Config;
use crate::error::Error;
use crate::storage::{SqliteStore, SubscriptionStore};

/// Flip login notifications for `chat_id`. Returns the new state.
pub fn toggle(config: &Config, chat_id: i64) -> Result<bool, Error> {
    let store = SqliteStore::open(&config.database)?;
    let enabled = store.toggle_subscription(chat_id)?;
    println!(
        "Login notifications {} for chat {}",
        if enabled { "enabled" } else { "disabled" },
        chat_id
    );
    Ok(enabled)
}

/// Flip whether `chat_id` hears about `name` logging in. Returns true if
/// the player is now muted.
pub fn mute(config: &Config, chat_id: i64, name: &str) -> Result<bool, Error> {
    let store = SqliteStore::open(&config.database)?;
    let player = lookup(&store, name)?;
    let muted = store.toggle_suppression(chat_id, &player.id)?;
    println!(
        "{} is now {} for chat {}",
        player.name,
        if muted { "muted" } else { "unmuted" },
        chat_id
    );
    Ok(muted)
}
