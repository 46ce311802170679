//! Reconciles classified log events into player sessions.
//!
//! Per identity the only states are offline and online. A join while already
//! online closes the stale session first, so there is never more than one open
//! session per identity.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use super::identity::IdentityResolver;
use super::log_parser::{LogEvent, LogParser};
use crate::fanout::{LoginNotification, LoginNotifier};
use crate::storage::{Identity, ParsedCommand, Storage, StorageResult};

/// Outcome of resolving a display name to an identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolved {
    Known(Identity),
    /// Nothing known about the name; the name itself stands in.
    Provisional(Identity),
}

impl Resolved {
    pub fn identity(&self) -> &Identity {
        match self {
            Resolved::Known(id) | Resolved::Provisional(id) => id,
        }
    }

    pub fn is_provisional(&self) -> bool {
        matches!(self, Resolved::Provisional(_))
    }
}

/// Counters for one tracker lifetime.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ProcessingStats {
    pub lines: u64,
    pub events: u64,
    pub failures: u64,
}

pub struct SessionTracker<S> {
    store: Arc<S>,
    parser: LogParser,
    identities: IdentityResolver,
    notifier: Option<LoginNotifier>,
    stats: ProcessingStats,
}

impl<S: Storage> SessionTracker<S> {
    pub fn new(store: Arc<S>, parser: LogParser) -> Self {
        Self {
            store,
            parser,
            identities: IdentityResolver::new(),
            notifier: None,
            stats: ProcessingStats::default(),
        }
    }

    pub fn with_notifier(mut self, notifier: LoginNotifier) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Load every known player into the name cache.
    pub fn seed(&mut self) -> StorageResult<usize> {
        let players = self.store.list_players()?;
        let seeded = self.identities.seed(&players);
        info!(players = seeded, "Seeded identity cache");
        Ok(seeded)
    }

    pub fn identities(&self) -> &IdentityResolver {
        &self.identities
    }

    pub fn stats(&self) -> ProcessingStats {
        self.stats
    }

    /// Classify and apply one line. Storage failures are logged with the line
    /// and never propagated.
    pub fn process_line(&mut self, line: &str, now: DateTime<Utc>) {
        self.stats.lines += 1;
        let Some(event) = self.parser.classify(line, &self.identities, now) else {
            return;
        };
        self.stats.events += 1;
        if let Err(e) = self.apply(event) {
            self.stats.failures += 1;
            error!(error = %e, line, "Failed to apply log event");
        }
    }

    pub fn apply(&mut self, event: LogEvent) -> StorageResult<()> {
        match event {
            LogEvent::IdentityAnnounced { name, identity } => {
                debug!(name = %name, identity = %identity, "Identity announced");
                self.identities.record_identity(&name, identity);
                Ok(())
            }
            LogEvent::PlayerJoined {
                identity,
                name,
                address,
                at,
            } => {
                let resolved = self.resolve_identity(identity, &name)?;
                let address = self
                    .identities
                    .take_address(&name)
                    .or(address)
                    .unwrap_or_default();
                self.on_join(&resolved, &name, &address, at)
            }
            LogEvent::PlayerLeft { identity, name, at } => {
                let resolved = self.resolve_identity(identity, &name)?;
                self.on_leave(resolved.identity(), &name, at)
            }
            LogEvent::CommandIssued {
                identity,
                name,
                raw,
                at,
            } => {
                let resolved = self.resolve_identity(identity, &name)?;
                self.on_command(resolved.identity(), &name, &raw, at)
            }
            LogEvent::AdvancementGranted {
                identity,
                name,
                title,
                at,
            } => {
                let resolved = self.resolve_identity(identity, &name)?;
                self.on_advancement(&resolved, &name, &title, at)
            }
            LogEvent::AddressObserved { name, address } => {
                debug!(name = %name, address = %address, "Address observed");
                self.identities.record_address(&name, address);
                Ok(())
            }
        }
    }

    /// Cache first, then storage (re-seeding the cache), then the display
    /// name as a provisional stand-in.
    fn resolve_identity(
        &mut self,
        from_event: Option<Identity>,
        name: &str,
    ) -> StorageResult<Resolved> {
        if let Some(identity) = from_event.or_else(|| self.identities.resolve(name).cloned()) {
            return Ok(Resolved::Known(identity));
        }
        if let Some(player) = self.store.find_player_by_name(name)? {
            info!(name, identity = %player.id, "Recovered identity from storage");
            self.identities.record_identity(name, player.id.clone());
            return Ok(Resolved::Known(player.id));
        }
        warn!(name, "No identity known for player, using name as a stand-in");
        Ok(Resolved::Provisional(Identity::new(name)))
    }

    fn on_join(
        &mut self,
        resolved: &Resolved,
        name: &str,
        address: &str,
        at: DateTime<Utc>,
    ) -> StorageResult<()> {
        let id = resolved.identity();
        self.store
            .upsert_player(id, name, at, resolved.is_provisional())?;

        if let Some(stale) = self.store.open_session(id)? {
            warn!(
                name,
                session = stale.id,
                joined = %stale.join_time,
                "Player joined with a session still open, closing it"
            );
            self.store.close_session(stale.id, at)?;
        }

        let session = self.store.create_session(id, at, address)?;
        info!(name, identity = %id, session = session.id, address, "Player joined");

        if let Some(notifier) = &self.notifier {
            notifier.notify(LoginNotification {
                identity: id.clone(),
                name: name.to_string(),
            });
        }
        Ok(())
    }

    fn on_leave(&mut self, id: &Identity, name: &str, at: DateTime<Utc>) -> StorageResult<()> {
        self.store.touch_player(id, at)?;
        match self.store.open_session(id)? {
            Some(session) => {
                self.store.close_session(session.id, at)?;
                info!(name, identity = %id, session = session.id, "Player left");
            }
            None => {
                info!(name, identity = %id, "Player left without an open session");
            }
        }
        Ok(())
    }

    fn on_command(
        &mut self,
        id: &Identity,
        name: &str,
        raw: &str,
        at: DateTime<Utc>,
    ) -> StorageResult<()> {
        let Some(session) = self.store.open_session(id)? else {
            debug!(name, command = raw, "Command without an open session, dropping");
            return Ok(());
        };
        let Some(command) = ParsedCommand::parse(raw) else {
            warn!(name, "Empty command text");
            return Ok(());
        };
        let record = self.store.record_command(session.id, at, &command)?;
        debug!(
            name,
            command = %record.command.name,
            id = record.id,
            session = record.session_id,
            "Command recorded"
        );
        Ok(())
    }

    fn on_advancement(
        &mut self,
        resolved: &Resolved,
        name: &str,
        title: &str,
        at: DateTime<Utc>,
    ) -> StorageResult<()> {
        let id = resolved.identity();
        if resolved.is_provisional() {
            // keep the stand-in flagged so it never passes for a real identity
            self.store.upsert_player(id, name, at, true)?;
        }
        if self.store.has_advancement(id, title)? {
            debug!(identity = %id, title, "Advancement already recorded");
            return Ok(());
        }
        self.store.record_advancement(id, title, at)?;
        info!(identity = %id, title, "Advancement granted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryStore;
    use crate::storage::{PlayerStore, SubscriptionStore};
    use chrono::TimeZone;

    const ALICE: &str = "aaaaaaaa-bbbb-4ccc-8ddd-eeeeeeeeeeee";

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 7, 1, 12, 0, 0).unwrap()
    }

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 7, 1, h, m, 0).unwrap()
    }

    fn tracker() -> (Arc<MemoryStore>, SessionTracker<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let tracker = SessionTracker::new(store.clone(), LogParser::new(chrono::Duration::zero()));
        (store, tracker)
    }

    fn line(clock: &str, body: &str) -> String {
        format!("[{clock}] [Server thread/INFO]: {body}")
    }

    fn uuid_line(clock: &str, name: &str, id: &str) -> String {
        format!("[{clock}] [User Authenticator #1/INFO]: UUID of player {name} is {id}")
    }

    fn joined(name: &str, identity: Option<&str>, h: u32, m: u32) -> LogEvent {
        LogEvent::PlayerJoined {
            identity: identity.map(Identity::new),
            name: name.to_string(),
            address: None,
            at: at(h, m),
        }
    }

    #[test]
    fn announced_identity_is_used_for_session() {
        let (store, mut tracker) = tracker();
        tracker.process_line(&uuid_line("10:00:00", "alice", ALICE), now());
        tracker.process_line(&line("10:00:01", "alice joined the game"), now());

        let sessions = store.sessions();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].player_id, Identity::new(ALICE));
        assert!(!store.player(&Identity::new(ALICE)).unwrap().provisional);
    }

    #[test]
    fn second_join_self_heals_open_session() {
        let (store, mut tracker) = tracker();
        tracker.apply(joined("alice", Some(ALICE), 10, 0)).unwrap();
        tracker.apply(joined("alice", Some(ALICE), 11, 0)).unwrap();

        let sessions = store.sessions_for(&Identity::new(ALICE));
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0].leave_time, Some(at(11, 0)));
        assert_eq!(sessions.iter().filter(|s| s.is_open()).count(), 1);
        assert_eq!(sessions[1].join_time, at(11, 0));
    }

    #[test]
    fn command_without_session_is_dropped_quietly() {
        let (store, mut tracker) = tracker();
        tracker
            .apply(LogEvent::CommandIssued {
                identity: Some(Identity::new(ALICE)),
                name: "alice".to_string(),
                raw: "/home".to_string(),
                at: at(10, 0),
            })
            .unwrap();
        assert!(store.commands().is_empty());
        assert_eq!(tracker.stats().failures, 0);
    }

    #[test]
    fn duplicate_advancement_is_recorded_once() {
        let (store, mut tracker) = tracker();
        for minute in [0, 5] {
            tracker
                .apply(LogEvent::AdvancementGranted {
                    identity: Some(Identity::new(ALICE)),
                    name: "alice".to_string(),
                    title: "Stone Age".to_string(),
                    at: at(10, minute),
                })
                .unwrap();
        }
        assert_eq!(store.advancement_count(&Identity::new(ALICE)), 1);
    }

    #[test]
    fn observed_address_is_consumed_by_next_join() {
        let (store, mut tracker) = tracker();
        tracker
            .apply(LogEvent::AddressObserved {
                name: "alice".to_string(),
                address: "1.2.3.4".to_string(),
            })
            .unwrap();
        tracker.apply(joined("alice", Some(ALICE), 10, 0)).unwrap();
        tracker
            .apply(LogEvent::PlayerLeft {
                identity: Some(Identity::new(ALICE)),
                name: "alice".to_string(),
                at: at(10, 30),
            })
            .unwrap();
        tracker.apply(joined("alice", Some(ALICE), 11, 0)).unwrap();

        let sessions = store.sessions_for(&Identity::new(ALICE));
        assert_eq!(sessions[0].address, "1.2.3.4");
        assert_eq!(sessions[1].address, "");
        assert_eq!(tracker.identities().peek_address("alice"), None);
    }

    #[test]
    fn address_line_then_join_line() {
        let (store, mut tracker) = tracker();
        tracker.process_line(&uuid_line("10:00:00", "alice", ALICE), now());
        tracker.process_line(
            &line(
                "10:00:01",
                "alice[/1.2.3.4:5555] logged in with entity id 12 at (0.5, 70.0, 0.5)",
            ),
            now(),
        );
        tracker.process_line(&line("10:00:01", "alice joined the game"), now());

        assert_eq!(store.sessions()[0].address, "1.2.3.4");
    }

    #[test]
    fn end_to_end_sample() {
        let (store, mut tracker) = tracker();
        let lines = [
            uuid_line("10:00:00", "alice", ALICE),
            line("10:00:01", "alice joined the game"),
            line("10:05:00", "alice issued server command: /home"),
            line("10:30:00", "alice left the game"),
        ];
        for l in &lines {
            tracker.process_line(l, now());
        }

        assert_eq!(
            tracker.identities().resolve("alice"),
            Some(&Identity::new(ALICE))
        );
        let sessions = store.sessions();
        assert_eq!(sessions.len(), 1);
        let session = &sessions[0];
        assert_eq!(session.player_id, Identity::new(ALICE));
        let leave = session.leave_time.expect("session closed");
        assert!(leave > session.join_time);

        let commands = store.commands();
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].session_id, session.id);
        assert_eq!(commands[0].command.name, "/home");

        assert_eq!(
            tracker.stats(),
            ProcessingStats {
                lines: 4,
                events: 4,
                failures: 0,
            }
        );
    }

    #[test]
    fn leave_recovers_identity_from_storage() {
        let (store, mut tracker) = tracker();
        store
            .upsert_player(&Identity::new(ALICE), "alice", at(9, 0), false)
            .unwrap();
        tracker.apply(joined("alice", Some(ALICE), 10, 0)).unwrap();

        // fresh cache: nothing seeded, nothing announced
        tracker
            .apply(LogEvent::PlayerLeft {
                identity: None,
                name: "alice".to_string(),
                at: at(10, 45),
            })
            .unwrap();

        assert_eq!(
            tracker.identities().resolve("alice"),
            Some(&Identity::new(ALICE))
        );
        assert_eq!(store.sessions()[0].leave_time, Some(at(10, 45)));
    }

    #[test]
    fn unknown_player_gets_provisional_stand_in() {
        let (store, mut tracker) = tracker();
        tracker.apply(joined("ghost", None, 10, 0)).unwrap();

        let player = store.player(&Identity::new("ghost")).unwrap();
        assert!(player.provisional);
        // the stand-in is never fed back into the cache
        assert_eq!(tracker.identities().resolve("ghost"), None);
        assert!(store.find_player_by_name("ghost").unwrap().is_none());

        tracker
            .apply(LogEvent::PlayerLeft {
                identity: None,
                name: "ghost".to_string(),
                at: at(10, 20),
            })
            .unwrap();
        assert_eq!(store.sessions()[0].leave_time, Some(at(10, 20)));
    }

    #[test]
    fn advancement_for_unknown_player_is_kept_provisional() {
        let (store, mut tracker) = tracker();
        tracker
            .apply(LogEvent::AdvancementGranted {
                identity: None,
                name: "ghost".to_string(),
                title: "Stone Age".to_string(),
                at: at(10, 0),
            })
            .unwrap();

        let player = store.player(&Identity::new("ghost")).unwrap();
        assert!(player.provisional);
        assert_eq!(store.advancement_count(&Identity::new("ghost")), 1);
        assert!(store.find_player_by_name("ghost").unwrap().is_none());
    }

    #[test]
    fn leave_without_session_is_not_an_error() {
        let (_store, mut tracker) = tracker();
        let result = tracker.apply(LogEvent::PlayerLeft {
            identity: Some(Identity::new(ALICE)),
            name: "alice".to_string(),
            at: at(10, 0),
        });
        assert!(result.is_ok());
    }

    #[test]
    fn storage_failure_is_contained_to_the_line() {
        let (store, mut tracker) = tracker();
        tracker.process_line(&uuid_line("10:00:00", "alice", ALICE), now());

        store.break_with("database offline");
        tracker.process_line(&line("10:00:01", "alice joined the game"), now());
        store.heal();
        tracker.process_line(&line("10:00:02", "alice joined the game"), now());

        assert_eq!(tracker.stats().failures, 1);
        assert_eq!(store.sessions().len(), 1);
    }

    #[test]
    fn seed_loads_known_players() {
        let (store, mut tracker) = tracker();
        store
            .upsert_player(&Identity::new(ALICE), "alice", at(9, 0), false)
            .unwrap();
        store
            .upsert_player(&Identity::new("ghost"), "ghost", at(9, 0), true)
            .unwrap();

        assert_eq!(tracker.seed().unwrap(), 1);
        tracker.process_line(&line("10:00:01", "alice joined the game"), now());
        assert_eq!(store.sessions()[0].player_id, Identity::new(ALICE));
    }

    #[tokio::test]
    async fn join_pushes_login_notification() {
        let store = Arc::new(MemoryStore::new());
        store.toggle_subscription(7).unwrap();
        let sink = Arc::new(crate::fanout::tests::RecordingSink::default());
        let (_tx, shutdown) = tokio::sync::watch::channel(false);
        let (notifier, worker) =
            crate::fanout::spawn_fanout(4, store.clone(), sink.clone(), shutdown);

        let mut tracker =
            SessionTracker::new(store.clone(), LogParser::new(chrono::Duration::zero()))
                .with_notifier(notifier);
        tracker.apply(joined("alice", Some(ALICE), 10, 0)).unwrap();
        drop(tracker);

        worker.await.unwrap();
        let delivered = sink.delivered();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].0, 7);
        assert_eq!(delivered[0].1.name, "alice");
    }
}
