//! Game-state snapshots
//!
//! A [`GameState`] is produced once per poll by the external game reader (or
//! pushed by the relay) and replaced wholesale; nothing in the engine
//! patches a snapshot in place.

use serde::de::Deserializer;
use serde::{Deserialize, Serialize, Serializer};

/// Stable in-game player id
pub type PlayerId = u32;

/// Game client id, used to recognise the lobby host
pub type ClientId = u32;

/// Lobby code that means "not in a lobby"
pub const MENU_LOBBY_CODE: &str = "MENU";

/// Game phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Phase {
    Lobby,
    Tasks,
    Discussion,
    Menu,
    #[default]
    Unknown,
}

impl Phase {
    /// Numeric value used by the game reader
    pub fn as_u8(self) -> u8 {
        match self {
            Phase::Lobby => 0,
            Phase::Tasks => 1,
            Phase::Discussion => 2,
            Phase::Menu => 3,
            Phase::Unknown => 4,
        }
    }

    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => Phase::Lobby,
            1 => Phase::Tasks,
            2 => Phase::Discussion,
            3 => Phase::Menu,
            _ => Phase::Unknown,
        }
    }

    fn from_name(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "lobby" => Phase::Lobby,
            "tasks" => Phase::Tasks,
            "discussion" => Phase::Discussion,
            "menu" => Phase::Menu,
            _ => Phase::Unknown,
        }
    }
}

impl Serialize for Phase {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.as_u8())
    }
}

impl<'de> Deserialize<'de> for Phase {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(i64),
            Name(String),
        }

        Ok(match Option::<Raw>::deserialize(deserializer)? {
            Some(Raw::Number(n)) => u8::try_from(n).map(Phase::from_u8).unwrap_or(Phase::Unknown),
            Some(Raw::Name(name)) => Phase::from_name(&name),
            None => Phase::Unknown,
        })
    }
}

/// Missing or null coordinates decode as NaN ("unknown position")
fn coordinate<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f32, D::Error> {
    Ok(Option::<f32>::deserialize(deserializer)?.unwrap_or(f32::NAN))
}

fn unknown_coordinate() -> f32 {
    f32::NAN
}

/// One player as seen in a snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Player {
    pub id: PlayerId,
    #[serde(default)]
    pub client_id: ClientId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub color_id: u32,
    #[serde(default = "unknown_coordinate", deserialize_with = "coordinate")]
    pub x: f32,
    #[serde(default = "unknown_coordinate", deserialize_with = "coordinate")]
    pub y: f32,
    #[serde(default)]
    pub is_dead: bool,
    #[serde(default)]
    pub is_impostor: bool,
    #[serde(default)]
    pub in_vent: bool,
    #[serde(default)]
    pub disconnected: bool,
    #[serde(default)]
    pub is_local: bool,
}

impl Player {
    pub fn new(id: PlayerId, name: impl Into<String>) -> Self {
        Self {
            id,
            client_id: 0,
            name: name.into(),
            color_id: 0,
            x: 0.0,
            y: 0.0,
            is_dead: false,
            is_impostor: false,
            in_vent: false,
            disconnected: false,
            is_local: false,
        }
    }

    pub fn at(mut self, x: f32, y: f32) -> Self {
        self.x = x;
        self.y = y;
        self
    }

    pub fn is_alive(&self) -> bool {
        !self.is_dead
    }
}

/// Immutable game-state snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameState {
    #[serde(rename = "gameState", default)]
    pub phase: Phase,
    #[serde(rename = "oldGameState", default)]
    pub previous_phase: Phase,
    #[serde(default)]
    pub lobby_code: String,
    #[serde(default)]
    pub map: u8,
    #[serde(default)]
    pub is_host: bool,
    #[serde(default)]
    pub client_id: ClientId,
    #[serde(default)]
    pub host_id: ClientId,
    #[serde(default)]
    pub comms_sabotaged: bool,
    #[serde(default)]
    pub players: Vec<Player>,
}

impl Default for GameState {
    fn default() -> Self {
        Self {
            phase: Phase::Menu,
            previous_phase: Phase::Unknown,
            lobby_code: MENU_LOBBY_CODE.to_string(),
            map: 0,
            is_host: false,
            client_id: 0,
            host_id: 0,
            comms_sabotaged: false,
            players: Vec::new(),
        }
    }
}

impl GameState {
    /// Decode a snapshot delivered either as a JSON object or as a JSON
    /// string containing the object.
    pub fn from_json_value(value: serde_json::Value) -> Result<Self, serde_json::Error> {
        match value {
            serde_json::Value::String(text) => serde_json::from_str(&text),
            other => serde_json::from_value(other),
        }
    }

    pub fn player(&self, id: PlayerId) -> Option<&Player> {
        self.players.iter().find(|p| p.id == id)
    }

    /// Resolve the local player: the one flagged local, else by name
    pub fn local_player(&self, name: &str) -> Option<&Player> {
        self.players
            .iter()
            .find(|p| p.is_local)
            .or_else(|| self.players.iter().find(|p| !name.is_empty() && p.name == name))
    }

    pub fn is_menu_lobby(&self) -> bool {
        self.lobby_code.is_empty() || self.lobby_code == MENU_LOBBY_CODE
    }
}

/// Parse a snapshot from raw text (object or JSON-encoded string)
pub fn parse_snapshot(text: &str) -> Result<GameState, serde_json::Error> {
    let value: serde_json::Value = serde_json::from_str(text)?;
    GameState::from_json_value(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_accepts_numbers_and_names() {
        let state: GameState =
            serde_json::from_str(r#"{"gameState": 1, "oldGameState": "discussion"}"#).unwrap();
        assert_eq!(state.phase, Phase::Tasks);
        assert_eq!(state.previous_phase, Phase::Discussion);

        let state: GameState = serde_json::from_str(r#"{"gameState": 42}"#).unwrap();
        assert_eq!(state.phase, Phase::Unknown);
    }

    #[test]
    fn test_snapshot_from_string_payload() {
        let inner = r#"{"gameState":0,"lobbyCode":"ABCDEF","players":[{"id":3,"name":"red","x":1.5,"y":-2}]}"#;
        let wrapped = serde_json::Value::String(inner.to_string());

        let from_string = GameState::from_json_value(wrapped).unwrap();
        let from_object = GameState::from_json_value(serde_json::from_str(inner).unwrap()).unwrap();

        assert_eq!(from_string, from_object);
        assert_eq!(from_string.lobby_code, "ABCDEF");
        assert_eq!(from_string.player(3).unwrap().y, -2.0);
    }

    #[test]
    fn test_missing_coordinates_are_nan() {
        let player: Player = serde_json::from_str(r#"{"id": 1, "x": null}"#).unwrap();
        assert!(player.x.is_nan());
        assert!(player.y.is_nan());
    }

    #[test]
    fn test_local_player_resolution() {
        let mut state = GameState::default();
        state.players = vec![Player::new(1, "blue"), Player::new(2, "red")];
        assert_eq!(state.local_player("red").map(|p| p.id), Some(2));

        state.players[0].is_local = true;
        assert_eq!(state.local_player("red").map(|p| p.id), Some(1));
    }

    #[test]
    fn test_parse_snapshot_rejects_garbage() {
        assert!(parse_snapshot("not json").is_err());
        assert!(parse_snapshot(r#""{\"gameState\":3}""#).is_ok());
    }
}
