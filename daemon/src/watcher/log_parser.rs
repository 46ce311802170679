//! Server log line classification.
//!
//! Every recognized line has the envelope `[HH:MM:SS] [component]: message`.
//! A line produces at most one [`LogEvent`]; anything else is ignored.

use chrono::{DateTime, NaiveTime, TimeZone, Utc};
use regex::Regex;
use tracing::warn;

use super::identity::IdentityResolver;
use crate::storage::Identity;

const AUTHENTICATOR_COMPONENT: &str = "User Authenticator";
const UUID_PREFIX: &str = "UUID of player ";
const JOINED_SUFFIX: &str = " joined the game";
const LEFT_SUFFIX: &str = " left the game";
const COMMAND_MARKER: &str = " issued server command: ";
const ADVANCEMENT_MARKERS: [&str; 3] = [
    " has made the advancement [",
    " has completed the challenge [",
    " has reached the goal [",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogEvent {
    IdentityAnnounced {
        name: String,
        identity: Identity,
    },
    PlayerJoined {
        identity: Option<Identity>,
        name: String,
        address: Option<String>,
        at: DateTime<Utc>,
    },
    PlayerLeft {
        identity: Option<Identity>,
        name: String,
        at: DateTime<Utc>,
    },
    CommandIssued {
        identity: Option<Identity>,
        name: String,
        raw: String,
        at: DateTime<Utc>,
    },
    AdvancementGranted {
        identity: Option<Identity>,
        name: String,
        title: String,
        at: DateTime<Utc>,
    },
    AddressObserved {
        name: String,
        address: String,
    },
}

/// Stateless line classifier.
///
/// Log lines only carry a time of day. The date comes from the wall clock at
/// processing time and the result is shifted by a fixed clock correction, so
/// timestamps are only right for lines processed shortly after they were
/// written.
pub struct LogParser {
    envelope: Regex,
    login: Regex,
    clock_correction: chrono::Duration,
}

impl LogParser {
    pub fn new(clock_correction: chrono::Duration) -> Self {
        Self {
            envelope: Regex::new(r"^\[(\d{2}:\d{2}:\d{2})\] \[([^\]]+)\]: (.+)$")
                .expect("envelope pattern is valid"),
            login: Regex::new(r"^([^\[\s]+)\[/(.+):(\d+)\] logged in with entity id \d+")
                .expect("login pattern is valid"),
            clock_correction,
        }
    }

    pub fn clock_correction(&self) -> chrono::Duration {
        self.clock_correction
    }

    /// Today's date (taken from `now`) at `time`, shifted by the clock correction.
    /// `None` if the shifted time is out of range.
    pub fn timestamp(&self, time: NaiveTime, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        Utc.from_utc_datetime(&now.date_naive().and_time(time))
            .checked_add_signed(self.clock_correction)
    }

    pub fn classify(
        &self,
        line: &str,
        resolver: &IdentityResolver,
        now: DateTime<Utc>,
    ) -> Option<LogEvent> {
        let caps = self.envelope.captures(line)?;
        let (clock, component, message) = (&caps[1], &caps[2], &caps[3]);

        let time = match NaiveTime::parse_from_str(clock, "%H:%M:%S") {
            Ok(time) => time,
            Err(e) => {
                warn!(clock, error = %e, "Bad time of day in log envelope");
                return None;
            }
        };
        let Some(at) = self.timestamp(time, now) else {
            warn!(clock, "Log time out of range after clock correction");
            return None;
        };

        if component.contains(AUTHENTICATOR_COMPONENT) && message.contains(UUID_PREFIX.trim_end()) {
            return parse_identity(message);
        }

        if let Some(name) = message.strip_suffix(JOINED_SUFFIX).filter(|n| is_name(n)) {
            return Some(LogEvent::PlayerJoined {
                identity: resolver.resolve(name).cloned(),
                name: name.to_string(),
                address: resolver.peek_address(name).map(str::to_string),
                at,
            });
        }

        if let Some(name) = message.strip_suffix(LEFT_SUFFIX).filter(|n| is_name(n)) {
            return Some(LogEvent::PlayerLeft {
                identity: resolver.resolve(name).cloned(),
                name: name.to_string(),
                at,
            });
        }

        if let Some((name, raw)) = message.split_once(COMMAND_MARKER) {
            if !is_name(name) || raw.trim().is_empty() {
                warn!(body = message, "Malformed command line");
                return None;
            }
            return Some(LogEvent::CommandIssued {
                identity: resolver.resolve(name).cloned(),
                name: name.to_string(),
                raw: raw.to_string(),
                at,
            });
        }

        if let Some((name, rest)) = ADVANCEMENT_MARKERS
            .iter()
            .find_map(|marker| message.split_once(marker))
        {
            let title = rest.strip_suffix(']').unwrap_or(rest).trim();
            if !is_name(name) || title.is_empty() {
                warn!(body = message, "Malformed advancement line");
                return None;
            }
            return Some(LogEvent::AdvancementGranted {
                identity: resolver.resolve(name).cloned(),
                name: name.to_string(),
                title: title.to_string(),
                at,
            });
        }

        if let Some(login) = self.login.captures(message) {
            let host = login[2].trim_start_matches('[').trim_end_matches(']');
            if host.is_empty() {
                warn!(body = message, "Login line without a host");
                return None;
            }
            return Some(LogEvent::AddressObserved {
                name: login[1].to_string(),
                address: host.to_string(),
            });
        }

        None
    }
}

/// `UUID of player <name> is <identity>`. The identity is kept verbatim.
fn parse_identity(message: &str) -> Option<LogEvent> {
    let parsed = message
        .strip_prefix(UUID_PREFIX)
        .and_then(|rest| rest.split_once(" is "))
        .map(|(name, raw)| (name, raw.trim()))
        .filter(|(name, raw)| is_name(name) && is_name(raw));

    match parsed {
        Some((name, raw)) => Some(LogEvent::IdentityAnnounced {
            name: name.to_string(),
            identity: Identity::new(raw),
        }),
        None => {
            warn!(body = message, "Malformed identity announcement");
            None
        }
    }
}

fn is_name(name: &str) -> bool {
    !name.is_empty() && !name.contains(char::is_whitespace)
}
