//! SQLite-backed store.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::debug;

use super::{
    Advancement, AdvancementStore, CommandRecord, CommandStore, Identity, ParsedCommand, Player,
    PlayerStore, Session, SessionStore, StorageError, StorageResult, SubscriptionStore,
};

const BUSY_TIMEOUT_MS: u64 = 5_000;

const PLAYER_COLUMNS: &str = "id, name, first_seen, last_seen, provisional";
const SESSION_COLUMNS: &str = "id, player_id, join_time, leave_time, address";

/// Aggregated history for one player, used by `minetail stats`.
#[derive(Debug, Clone)]
pub struct PlayerStats {
    pub player: Player,
    pub total_play_time: chrono::Duration,
    pub session_count: usize,
    pub online: bool,
    pub commands_used: i64,
    pub advancements: Vec<Advancement>,
}

/// Single-connection store shared between the ingestion task and the
/// notification worker.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::init(conn)
    }

    #[cfg(test)]
    pub fn open_in_memory() -> StorageResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> StorageResult<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.busy_timeout(Duration::from_millis(BUSY_TIMEOUT_MS))?;
        initialize_schema(&conn)?;
        debug!("SQLite schema ready");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> StorageResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StorageError::Poisoned)
    }

    pub fn find_player(&self, id: &Identity) -> StorageResult<Option<Player>> {
        let conn = self.conn()?;
        let player = conn
            .query_row(
                &format!("SELECT {PLAYER_COLUMNS} FROM players WHERE id = ?1"),
                params![id.as_str()],
                player_from_row,
            )
            .optional()?;
        Ok(player)
    }

    /// Players with an open session, most recent join first.
    pub fn online_players(&self) -> StorageResult<Vec<(Player, Session)>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT p.id, p.name, p.first_seen, p.last_seen, p.provisional,
                    s.id, s.player_id, s.join_time, s.leave_time, s.address
             FROM sessions s JOIN players p ON p.id = s.player_id
             WHERE s.leave_time IS NULL
             ORDER BY s.join_time DESC",
        )?;
        let rows = stmt.query_map([], |row| {
            let player = player_from_row(row)?;
            let session = Session {
                id: row.get(5)?,
                player_id: Identity::new(row.get::<_, String>(6)?),
                join_time: row.get(7)?,
                leave_time: row.get(8)?,
                address: row.get(9)?,
            };
            Ok((player, session))
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Sessions for `player`, most recent first.
    pub fn sessions_for_player(&self, player: &Identity) -> StorageResult<Vec<Session>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions WHERE player_id = ?1 ORDER BY join_time DESC"
        ))?;
        let rows = stmt.query_map(params![player.as_str()], session_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn count_commands_for_player(&self, player: &Identity) -> StorageResult<i64> {
        let conn = self.conn()?;
        let count = conn.query_row(
            "SELECT COUNT(*) FROM commands c JOIN sessions s ON c.session_id = s.id
             WHERE s.player_id = ?1",
            params![player.as_str()],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Command names by use count, highest first.
    pub fn top_commands(&self, limit: usize) -> StorageResult<Vec<(String, i64)>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT command_name, COUNT(*) AS uses FROM commands
             GROUP BY command_name ORDER BY uses DESC, command_name ASC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| Ok((row.get(0)?, row.get(1)?)))?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn advancements_for_player(&self, player: &Identity) -> StorageResult<Vec<Advancement>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT player_id, title, achieved_at FROM advancements
             WHERE player_id = ?1 ORDER BY achieved_at DESC",
        )?;
        let rows = stmt.query_map(params![player.as_str()], |row| {
            Ok(Advancement {
                player_id: Identity::new(row.get::<_, String>(0)?),
                title: row.get(1)?,
                at: row.get(2)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Open sessions are counted up to `now`.
    pub fn player_stats(&self, id: &Identity, now: DateTime<Utc>) -> StorageResult<PlayerStats> {
        let player = self.find_player(id)?.ok_or_else(|| StorageError::NotFound {
            kind: "player",
            key: id.to_string(),
        })?;
        let sessions = self.sessions_for_player(id)?;
        let total_play_time = sessions
            .iter()
            .map(|s| s.leave_time.unwrap_or(now) - s.join_time)
            .filter(|d| *d > chrono::Duration::zero())
            .fold(chrono::Duration::zero(), |acc, d| acc + d);

        Ok(PlayerStats {
            player,
            total_play_time,
            session_count: sessions.len(),
            online: sessions.iter().any(Session::is_open),
            commands_used: self.count_commands_for_player(id)?,
            advancements: self.advancements_for_player(id)?,
        })
    }
}

impl PlayerStore for SqliteStore {
    fn upsert_player(
        &self,
        id: &Identity,
        name: &str,
        at: DateTime<Utc>,
        provisional: bool,
    ) -> StorageResult<Player> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO players (id, name, first_seen, last_seen, provisional)
             VALUES (?1, ?2, ?3, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET name = excluded.name, last_seen = excluded.last_seen",
            params![id.as_str(), name, at, provisional],
        )?;
        let player = conn.query_row(
            &format!("SELECT {PLAYER_COLUMNS} FROM players WHERE id = ?1"),
            params![id.as_str()],
            player_from_row,
        )?;
        Ok(player)
    }

    fn touch_player(&self, id: &Identity, at: DateTime<Utc>) -> StorageResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE players SET last_seen = ?2 WHERE id = ?1",
            params![id.as_str(), at],
        )?;
        Ok(())
    }

    fn find_player_by_name(&self, name: &str) -> StorageResult<Option<Player>> {
        let conn = self.conn()?;
        let player = conn
            .query_row(
                &format!(
                    "SELECT {PLAYER_COLUMNS} FROM players
                     WHERE name = ?1 AND provisional = 0
                     ORDER BY last_seen DESC LIMIT 1"
                ),
                params![name],
                player_from_row,
            )
            .optional()?;
        Ok(player)
    }

    fn list_players(&self) -> StorageResult<Vec<Player>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {PLAYER_COLUMNS} FROM players ORDER BY last_seen ASC"
        ))?;
        let rows = stmt.query_map([], player_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}

impl SessionStore for SqliteStore {
    fn open_session(&self, player: &Identity) -> StorageResult<Option<Session>> {
        let conn = self.conn()?;
        let session = conn
            .query_row(
                &format!(
                    "SELECT {SESSION_COLUMNS} FROM sessions
                     WHERE player_id = ?1 AND leave_time IS NULL
                     ORDER BY join_time DESC LIMIT 1"
                ),
                params![player.as_str()],
                session_from_row,
            )
            .optional()?;
        Ok(session)
    }

    fn close_session(&self, session_id: i64, at: DateTime<Utc>) -> StorageResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE sessions SET leave_time = ?2 WHERE id = ?1 AND leave_time IS NULL",
            params![session_id, at],
        )?;
        Ok(())
    }

    fn create_session(
        &self,
        player: &Identity,
        at: DateTime<Utc>,
        address: &str,
    ) -> StorageResult<Session> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO sessions (player_id, join_time, address) VALUES (?1, ?2, ?3)",
            params![player.as_str(), at, address],
        )?;
        Ok(Session {
            id: conn.last_insert_rowid(),
            player_id: player.clone(),
            join_time: at,
            leave_time: None,
            address: address.to_string(),
        })
    }
}

impl CommandStore for SqliteStore {
    fn record_command(
        &self,
        session_id: i64,
        at: DateTime<Utc>,
        command: &ParsedCommand,
    ) -> StorageResult<CommandRecord> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO commands (session_id, issued_at, command, command_name, args)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![session_id, at, command.raw, command.name, command.args],
        )?;
        Ok(CommandRecord {
            id: conn.last_insert_rowid(),
            session_id,
            at,
            command: command.clone(),
        })
    }
}

impl AdvancementStore for SqliteStore {
    fn has_advancement(&self, player: &Identity, title: &str) -> StorageResult<bool> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM advancements WHERE player_id = ?1 AND title = ?2",
            params![player.as_str(), title],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn record_advancement(
        &self,
        player: &Identity,
        title: &str,
        at: DateTime<Utc>,
    ) -> StorageResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR IGNORE INTO advancements (player_id, title, achieved_at) VALUES (?1, ?2, ?3)",
            params![player.as_str(), title, at],
        )?;
        Ok(())
    }
}

impl SubscriptionStore for SqliteStore {
    fn list_subscribers(&self) -> StorageResult<Vec<i64>> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT chat_id FROM subscribers WHERE enabled = 1 ORDER BY chat_id")?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn is_suppressed(&self, chat_id: i64, player: &Identity) -> StorageResult<bool> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM suppressions WHERE chat_id = ?1 AND player_id = ?2",
            params![chat_id, player.as_str()],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn toggle_subscription(&self, chat_id: i64) -> StorageResult<bool> {
        let conn = self.conn()?;
        let current: Option<bool> = conn
            .query_row(
                "SELECT enabled FROM subscribers WHERE chat_id = ?1",
                params![chat_id],
                |row| row.get(0),
            )
            .optional()?;
        let enabled = !current.unwrap_or(false);
        conn.execute(
            "INSERT INTO subscribers (chat_id, enabled) VALUES (?1, ?2)
             ON CONFLICT(chat_id) DO UPDATE SET enabled = excluded.enabled",
            params![chat_id, enabled],
        )?;
        Ok(enabled)
    }

    fn toggle_suppression(&self, chat_id: i64, player: &Identity) -> StorageResult<bool> {
        let conn = self.conn()?;
        let removed = conn.execute(
            "DELETE FROM suppressions WHERE chat_id = ?1 AND player_id = ?2",
            params![chat_id, player.as_str()],
        )?;
        if removed > 0 {
            return Ok(false);
        }
        conn.execute(
            "INSERT INTO suppressions (chat_id, player_id) VALUES (?1, ?2)",
            params![chat_id, player.as_str()],
        )?;
        Ok(true)
    }
}

fn initialize_schema(conn: &Connection) -> StorageResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS players (
           id TEXT PRIMARY KEY,
           name TEXT NOT NULL,
           first_seen TEXT NOT NULL,
           last_seen TEXT NOT NULL,
           provisional INTEGER NOT NULL DEFAULT 0
         );
         CREATE INDEX IF NOT EXISTS players_by_name ON players (name);
         CREATE TABLE IF NOT EXISTS sessions (
           id INTEGER PRIMARY KEY AUTOINCREMENT,
           player_id TEXT NOT NULL REFERENCES players (id),
           join_time TEXT NOT NULL,
           leave_time TEXT,
           address TEXT NOT NULL DEFAULT ''
         );
         CREATE INDEX IF NOT EXISTS sessions_by_player ON sessions (player_id, join_time);
         CREATE UNIQUE INDEX IF NOT EXISTS sessions_one_open
           ON sessions (player_id) WHERE leave_time IS NULL;
         CREATE TABLE IF NOT EXISTS commands (
           id INTEGER PRIMARY KEY AUTOINCREMENT,
           session_id INTEGER NOT NULL REFERENCES sessions (id),
           issued_at TEXT NOT NULL,
           command TEXT NOT NULL,
           command_name TEXT NOT NULL,
           args TEXT NOT NULL DEFAULT ''
         );
         CREATE INDEX IF NOT EXISTS commands_by_name ON commands (command_name);
         CREATE TABLE IF NOT EXISTS advancements (
           id INTEGER PRIMARY KEY AUTOINCREMENT,
           player_id TEXT NOT NULL,
           title TEXT NOT NULL,
           achieved_at TEXT NOT NULL,
           UNIQUE (player_id, title)
         );
         CREATE TABLE IF NOT EXISTS subscribers (
           chat_id INTEGER PRIMARY KEY,
           enabled INTEGER NOT NULL
         );
         CREATE TABLE IF NOT EXISTS suppressions (
           chat_id INTEGER NOT NULL,
           player_id TEXT NOT NULL,
           PRIMARY KEY (chat_id, player_id)
         );",
    )?;
    Ok(())
}

fn player_from_row(row: &Row<'_>) -> rusqlite::Result<Player> {
    Ok(Player {
        id: Identity::new(row.get::<_, String>(0)?),
        name: row.get(1)?,
        first_seen: row.get(2)?,
        last_seen: row.get(3)?,
        provisional: row.get(4)?,
    })
}

fn session_from_row(row: &Row<'_>) -> rusqlite::Result<Session> {
    Ok(Session {
        id: row.get(0)?,
        player_id: Identity::new(row.get::<_, String>(1)?),
        join_time: row.get(2)?,
        leave_time: row.get(3)?,
        address: row.get(4)?,
    })
}
