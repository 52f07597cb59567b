//! Joined-lobby tracking

use crate::error::SignalingError;
use crate::game::{ClientId, PlayerId, MENU_LOBBY_CODE};
use crate::signaling::client::SignalingSink;
use crate::signaling::protocol::Outbound;

/// Result of a [`LobbyChannel::join`] call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    /// Already in this lobby; nothing was sent
    Unchanged,
    /// Joined while not in any lobby, e.g. after the relay reconnected
    Joined,
    /// Moved from another lobby; existing peer links belong to the old one
    Switched,
    /// The "no lobby" code; peer links and roster must be torn down
    ClearedToMenu,
}

impl JoinOutcome {
    /// Whether the caller must drop every peer link
    pub fn requires_teardown(self) -> bool {
        matches!(self, JoinOutcome::Switched | JoinOutcome::ClearedToMenu)
    }
}

/// Remembers which lobby the relay believes we are in
#[derive(Debug, Default)]
pub struct LobbyChannel {
    joined: Option<String>,
}

impl LobbyChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<&str> {
        self.joined.as_deref().filter(|code| *code != MENU_LOBBY_CODE)
    }

    pub fn join(
        &mut self,
        sink: &dyn SignalingSink,
        lobby_code: &str,
        player_id: PlayerId,
        client_id: ClientId,
    ) -> Result<JoinOutcome, SignalingError> {
        if self.joined.as_deref() == Some(lobby_code) {
            return Ok(JoinOutcome::Unchanged);
        }

        if lobby_code.is_empty() || lobby_code == MENU_LOBBY_CODE {
            self.joined = Some(MENU_LOBBY_CODE.to_string());
            return Ok(JoinOutcome::ClearedToMenu);
        }

        sink.send(Outbound::Join {
            lobby_code: lobby_code.to_string(),
            player_id,
            client_id,
        })?;
        tracing::info!("Joined lobby {}", lobby_code);
        let outcome = match self.current() {
            Some(_) => JoinOutcome::Switched,
            None => JoinOutcome::Joined,
        };
        self.joined = Some(lobby_code.to_string());
        Ok(outcome)
    }

    /// Send `leave` and forget the joined lobby
    pub fn leave(&mut self, sink: &dyn SignalingSink) -> Result<(), SignalingError> {
        self.joined = None;
        sink.send(Outbound::Leave)
    }

    /// Forget the joined lobby without telling the relay, e.g. after the
    /// relay connection dropped and the relay lost our membership
    pub fn forget(&mut self) {
        self.joined = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<Outbound>>);

    impl SignalingSink for Recorder {
        fn send(&self, event: Outbound) -> Result<(), SignalingError> {
            self.0.lock().push(event);
            Ok(())
        }
    }

    #[test]
    fn test_join_same_code_is_noop() {
        let sink = Recorder::default();
        let mut lobby = LobbyChannel::new();

        assert_eq!(lobby.join(&sink, "ABCDEF", 1, 2).unwrap(), JoinOutcome::Joined);
        assert_eq!(lobby.join(&sink, "ABCDEF", 1, 2).unwrap(), JoinOutcome::Unchanged);
        assert_eq!(sink.0.lock().len(), 1);
        assert_eq!(lobby.current(), Some("ABCDEF"));
    }

    #[test]
    fn test_menu_code_clears_without_sending() {
        let sink = Recorder::default();
        let mut lobby = LobbyChannel::new();
        lobby.join(&sink, "ABCDEF", 1, 2).unwrap();

        let outcome = lobby.join(&sink, MENU_LOBBY_CODE, 1, 2).unwrap();
        assert_eq!(outcome, JoinOutcome::ClearedToMenu);
        assert!(outcome.requires_teardown());
        assert_eq!(lobby.current(), None);
        assert_eq!(sink.0.lock().len(), 1);

        // Coming back to the same lobby joins again
        assert_eq!(lobby.join(&sink, "ABCDEF", 1, 2).unwrap(), JoinOutcome::Joined);
    }

    #[test]
    fn test_switching_lobbies_requires_teardown() {
        let sink = Recorder::default();
        let mut lobby = LobbyChannel::new();
        let first = lobby.join(&sink, "ABCDEF", 1, 2).unwrap();
        assert!(!first.requires_teardown());

        let second = lobby.join(&sink, "GHIJKL", 1, 2).unwrap();
        assert_eq!(second, JoinOutcome::Switched);
        assert!(second.requires_teardown());

        // A forgotten membership rejoins without dropping links
        lobby.forget();
        assert_eq!(lobby.join(&sink, "GHIJKL", 1, 2).unwrap(), JoinOutcome::Joined);
        assert_eq!(sink.0.lock().len(), 3);
    }

    #[test]
    fn test_leave_forgets_lobby() {
        let sink = Recorder::default();
        let mut lobby = LobbyChannel::new();
        lobby.join(&sink, "ABCDEF", 1, 2).unwrap();
        lobby.leave(&sink).unwrap();
        assert_eq!(lobby.current(), None);
        assert_eq!(sink.0.lock().last(), Some(&Outbound::Leave));
    }
}
