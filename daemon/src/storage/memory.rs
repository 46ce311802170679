//! In-memory store for tests.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};

use super::{
    AdvancementStore, CommandRecord, CommandStore, Identity, ParsedCommand, Player, PlayerStore,
    Session, SessionStore, StorageError, StorageResult, SubscriptionStore,
};

#[derive(Default)]
struct State {
    players: BTreeMap<Identity, Player>,
    sessions: Vec<Session>,
    commands: Vec<CommandRecord>,
    advancements: Vec<(Identity, String, DateTime<Utc>)>,
    subscribers: BTreeMap<i64, bool>,
    suppressions: BTreeSet<(i64, Identity)>,
    /// When set, every call fails with this message.
    fail_with: Option<String>,
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> StorageResult<MutexGuard<'_, State>> {
        let state = self.state.lock().map_err(|_| StorageError::Poisoned)?;
        if let Some(key) = &state.fail_with {
            return Err(StorageError::NotFound {
                kind: "injected failure",
                key: key.clone(),
            });
        }
        Ok(state)
    }

    /// Make every subsequent call fail until `heal` is called.
    pub fn break_with(&self, reason: &str) {
        self.state.lock().unwrap().fail_with = Some(reason.to_string());
    }

    pub fn heal(&self) {
        self.state.lock().unwrap().fail_with = None;
    }

    pub fn sessions(&self) -> Vec<Session> {
        self.state.lock().unwrap().sessions.clone()
    }

    pub fn sessions_for(&self, player: &Identity) -> Vec<Session> {
        self.sessions()
            .into_iter()
            .filter(|s| &s.player_id == player)
            .collect()
    }

    pub fn commands(&self) -> Vec<CommandRecord> {
        self.state.lock().unwrap().commands.clone()
    }

    pub fn advancement_count(&self, player: &Identity) -> usize {
        self.state
            .lock()
            .unwrap()
            .advancements
            .iter()
            .filter(|(p, _, _)| p == player)
            .count()
    }

    pub fn player(&self, id: &Identity) -> Option<Player> {
        self.state.lock().unwrap().players.get(id).cloned()
    }
}

impl PlayerStore for MemoryStore {
    fn upsert_player(
        &self,
        id: &Identity,
        name: &str,
        at: DateTime<Utc>,
        provisional: bool,
    ) -> StorageResult<Player> {
        let mut state = self.state()?;
        let player = state.players.entry(id.clone()).or_insert_with(|| Player {
            id: id.clone(),
            name: name.to_string(),
            first_seen: at,
            last_seen: at,
            provisional,
        });
        player.name = name.to_string();
        player.last_seen = at;
        Ok(player.clone())
    }

    fn touch_player(&self, id: &Identity, at: DateTime<Utc>) -> StorageResult<()> {
        let mut state = self.state()?;
        if let Some(player) = state.players.get_mut(id) {
            player.last_seen = at;
        }
        Ok(())
    }

    fn find_player_by_name(&self, name: &str) -> StorageResult<Option<Player>> {
        let state = self.state()?;
        Ok(state
            .players
            .values()
            .filter(|p| p.name == name && !p.provisional)
            .max_by_key(|p| p.last_seen)
            .cloned())
    }

    fn list_players(&self) -> StorageResult<Vec<Player>> {
        let state = self.state()?;
        let mut players: Vec<Player> = state.players.values().cloned().collect();
        players.sort_by_key(|p| p.last_seen);
        Ok(players)
    }
}

impl SessionStore for MemoryStore {
    fn open_session(&self, player: &Identity) -> StorageResult<Option<Session>> {
        let state = self.state()?;
        Ok(state
            .sessions
            .iter()
            .rev()
            .find(|s| &s.player_id == player && s.is_open())
            .cloned())
    }

    fn close_session(&self, session_id: i64, at: DateTime<Utc>) -> StorageResult<()> {
        let mut state = self.state()?;
        if let Some(session) = state
            .sessions
            .iter_mut()
            .find(|s| s.id == session_id && s.is_open())
        {
            session.leave_time = Some(at);
        }
        Ok(())
    }

    fn create_session(
        &self,
        player: &Identity,
        at: DateTime<Utc>,
        address: &str,
    ) -> StorageResult<Session> {
        let mut state = self.state()?;
        let session = Session {
            id: state.sessions.len() as i64 + 1,
            player_id: player.clone(),
            join_time: at,
            leave_time: None,
            address: address.to_string(),
        };
        state.sessions.push(session.clone());
        Ok(session)
    }
}

impl CommandStore for MemoryStore {
    fn record_command(
        &self,
        session_id: i64,
        at: DateTime<Utc>,
        command: &ParsedCommand,
    ) -> StorageResult<CommandRecord> {
        let mut state = self.state()?;
        let record = CommandRecord {
            id: state.commands.len() as i64 + 1,
            session_id,
            at,
            command: command.clone(),
        };
        state.commands.push(record.clone());
        Ok(record)
    }
}

impl AdvancementStore for MemoryStore {
    fn has_advancement(&self, player: &Identity, title: &str) -> StorageResult<bool> {
        let state = self.state()?;
        Ok(state
            .advancements
            .iter()
            .any(|(p, t, _)| p == player && t == title))
    }

    // No uniqueness here: the tracker is what keeps grants deduplicated.
    fn record_advancement(
        &self,
        player: &Identity,
        title: &str,
        at: DateTime<Utc>,
    ) -> StorageResult<()> {
        let mut state = self.state()?;
        state
            .advancements
            .push((player.clone(), title.to_string(), at));
        Ok(())
    }
}

impl SubscriptionStore for MemoryStore {
    fn list_subscribers(&self) -> StorageResult<Vec<i64>> {
        let state = self.state()?;
        Ok(state
            .subscribers
            .iter()
            .filter(|(_, enabled)| **enabled)
            .map(|(chat_id, _)| *chat_id)
            .collect())
    }

    fn is_suppressed(&self, chat_id: i64, player: &Identity) -> StorageResult<bool> {
        let state = self.state()?;
        Ok(state.suppressions.contains(&(chat_id, player.clone())))
    }

    fn toggle_subscription(&self, chat_id: i64) -> StorageResult<bool> {
        let mut state = self.state()?;
        let enabled = state.subscribers.entry(chat_id).or_insert(false);
        *enabled = !*enabled;
        Ok(*enabled)
    }

    fn toggle_suppression(&self, chat_id: i64, player: &Identity) -> StorageResult<bool> {
        let mut state = self.state()?;
        let key = (chat_id, player.clone());
        if state.suppressions.remove(&key) {
            Ok(false)
        } else {
            state.suppressions.insert(key);
            Ok(true)
        }
    }
}
