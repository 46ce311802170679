//! Display name to identity cache.

use std::collections::HashMap;

use crate::storage::{Identity, Player};

/// Which identity a display name belongs to right now, plus addresses seen
/// for names that have not joined yet.
///
/// Storage is authoritative for history; this cache only answers "who is this
/// name at the moment". Owned by the session tracker and never shared.
#[derive(Debug, Default)]
pub struct IdentityResolver {
    identities: HashMap<String, Identity>,
    pending_addresses: HashMap<String, String>,
}

impl IdentityResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load known players. Later entries win, so pass them oldest first.
    /// Provisional stand-ins are skipped.
    pub fn seed<'a>(&mut self, players: impl IntoIterator<Item = &'a Player>) -> usize {
        let mut seeded = 0;
        for player in players {
            if player.provisional || player.name.is_empty() {
                continue;
            }
            self.identities
                .insert(player.name.clone(), player.id.clone());
            seeded += 1;
        }
        seeded
    }

    pub fn record_identity(&mut self, name: &str, identity: Identity) {
        self.identities.insert(name.to_string(), identity);
    }

    pub fn resolve(&self, name: &str) -> Option<&Identity> {
        self.identities.get(name)
    }

    pub fn record_address(&mut self, name: &str, address: String) {
        self.pending_addresses.insert(name.to_string(), address);
    }

    pub fn peek_address(&self, name: &str) -> Option<&str> {
        self.pending_addresses.get(name).map(String::as_str)
    }

    /// Remove and return the pending address for `name`.
    pub fn take_address(&mut self, name: &str) -> Option<String> {
        self.pending_addresses.remove(name)
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }
}
