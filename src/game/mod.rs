//! Game-side data model: snapshots, players and settings

pub mod settings;
pub mod state;

pub use settings::{LobbySettings, LobbySettingsPatch, UserSettings};
pub use state::{parse_snapshot, ClientId, GameState, Phase, Player, PlayerId, MENU_LOBBY_CODE};
