//! Death status as shown to the user

use std::collections::HashSet;

use crate::game::{GameState, Phase, PlayerId};

/// Which players count as dead for display. A disconnected player counts
/// as dead.
///
/// Refreshed only while in Tasks. Discussion keeps the Tasks-phase view, so
/// a player killed during the vote shows as alive until play resumes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeadRoster {
    dead: HashSet<PlayerId>,
}

impl DeadRoster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, state: &GameState) {
        match state.phase {
            Phase::Lobby | Phase::Menu => self.dead.clear(),
            Phase::Tasks => {
                self.dead = state
                    .players
                    .iter()
                    .filter(|p| p.is_dead || p.disconnected)
                    .map(|p| p.id)
                    .collect();
            }
            Phase::Discussion | Phase::Unknown => {}
        }
    }

    pub fn is_dead(&self, player: PlayerId) -> bool {
        self.dead.contains(&player)
    }

    pub fn clear(&mut self) {
        self.dead.clear();
    }

    pub fn len(&self) -> usize {
        self.dead.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dead.is_empty()
    }
}
