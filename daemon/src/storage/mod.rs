//! Persistence contracts for players, sessions, commands and advancements.
//!
//! The session tracker only ever talks to storage through the capability
//! traits below, so any engine that implements them can stand in for
//! [`sqlite::SqliteStore`].

use chrono::{DateTime, Utc};
use thiserror::Error;

#[cfg(test)]
pub mod memory;
pub mod sqlite;

pub use sqlite::{PlayerStats, SqliteStore};

/// Stable per-player identifier (a UUID on Minecraft servers).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identity(String);

impl Identity {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage lock poisoned")]
    Poisoned,

    #[error("{kind} not found: {key}")]
    NotFound { kind: &'static str, key: String },
}

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Player {
    pub id: Identity,
    pub name: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    /// Stand-in record keyed by display name because no real identity was known.
    pub provisional: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub id: i64,
    pub player_id: Identity,
    pub join_time: DateTime<Utc>,
    pub leave_time: Option<DateTime<Utc>>,
    pub address: String,
}

impl Session {
    pub fn is_open(&self) -> bool {
        self.leave_time.is_none()
    }
}

/// A server command split into its name and argument text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCommand {
    pub raw: String,
    pub name: String,
    pub args: String,
}

impl ParsedCommand {
    /// Split on whitespace: the first token is the name, the rest are joined
    /// back with single spaces. Returns `None` for blank input.
    pub fn parse(raw: &str) -> Option<Self> {
        let mut tokens = raw.split_whitespace();
        let name = tokens.next()?.to_string();
        let args = tokens.collect::<Vec<_>>().join(" ");
        Some(Self {
            raw: raw.trim().to_string(),
            name,
            args,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRecord {
    pub id: i64,
    pub session_id: i64,
    pub at: DateTime<Utc>,
    pub command: ParsedCommand,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advancement {
    pub player_id: Identity,
    pub title: String,
    pub at: DateTime<Utc>,
}

pub trait PlayerStore {
    /// Create the player if unseen, otherwise update its name and last-seen.
    fn upsert_player(
        &self,
        id: &Identity,
        name: &str,
        at: DateTime<Utc>,
        provisional: bool,
    ) -> StorageResult<Player>;

    fn touch_player(&self, id: &Identity, at: DateTime<Utc>) -> StorageResult<()>;

    /// Most recently seen non-provisional player using `name`.
    fn find_player_by_name(&self, name: &str) -> StorageResult<Option<Player>>;

    /// Every player, oldest `last_seen` first.
    fn list_players(&self) -> StorageResult<Vec<Player>>;
}

pub trait SessionStore {
    fn open_session(&self, player: &Identity) -> StorageResult<Option<Session>>;

    fn close_session(&self, session_id: i64, at: DateTime<Utc>) -> StorageResult<()>;

    fn create_session(
        &self,
        player: &Identity,
        at: DateTime<Utc>,
        address: &str,
    ) -> StorageResult<Session>;
}

pub trait CommandStore {
    fn record_command(
        &self,
        session_id: i64,
        at: DateTime<Utc>,
        command: &ParsedCommand,
    ) -> StorageResult<CommandRecord>;
}

pub trait AdvancementStore {
    fn has_advancement(&self, player: &Identity, title: &str) -> StorageResult<bool>;

    fn record_advancement(
        &self,
        player: &Identity,
        title: &str,
        at: DateTime<Utc>,
    ) -> StorageResult<()>;
}

/// Login notification subscribers, keyed by chat id.
pub trait SubscriptionStore {
    /// Chat ids with notifications enabled.
    fn list_subscribers(&self) -> StorageResult<Vec<i64>>;

    fn is_suppressed(&self, chat_id: i64, player: &Identity) -> StorageResult<bool>;

    /// Flip the subscription flag, returning the new state.
    fn toggle_subscription(&self, chat_id: i64) -> StorageResult<bool>;

    /// Flip suppression of `player` for `chat_id`, returning true if now suppressed.
    fn toggle_suppression(&self, chat_id: i64, player: &Identity) -> StorageResult<bool>;
}

/// Everything the session tracker needs from storage.
pub trait Storage: PlayerStore + SessionStore + CommandStore + AdvancementStore {}

impl<T> Storage for T where T: PlayerStore + SessionStore + CommandStore + AdvancementStore {}
