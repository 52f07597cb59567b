//! Peer id to game identity mapping
//!
//! Kept apart from link state: a peer may be connected before the relay
//! tells us who it is. Updates build a new map and swap it in, so a
//! snapshot handed out earlier never changes underneath its reader.

use std::collections::HashMap;
use std::sync::Arc;

use crate::game::PlayerId;
use crate::signaling::{Client, PeerId};

#[derive(Debug, Clone, Default)]
pub struct Roster {
    entries: Arc<HashMap<PeerId, Client>>,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(entries: HashMap<PeerId, Client>) -> Self {
        Self {
            entries: Arc::new(entries),
        }
    }

    /// Copy with one entry inserted or replaced
    pub fn with_entry(&self, peer: &PeerId, client: Client) -> Self {
        let mut entries = (*self.entries).clone();
        entries.insert(peer.clone(), client);
        Self::from_map(entries)
    }

    pub fn get(&self, peer: &PeerId) -> Option<Client> {
        self.entries.get(peer).copied()
    }

    pub fn player_id(&self, peer: &PeerId) -> Option<PlayerId> {
        self.entries.get(peer).map(|c| c.player_id)
    }

    pub fn peers(&self) -> impl Iterator<Item = &PeerId> {
        self.entries.keys()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Shared view of the current map
    pub fn snapshot(&self) -> Arc<HashMap<PeerId, Client>> {
        self.entries.clone()
    }
}
