//! Application configuration
//!
//! Stored as TOML in the platform config directory, e.g.
//! `~/.config/crewlink-voice/config.toml` on Linux.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::audio::device::DEFAULT_DEVICE;
use crate::constants;
use crate::error::ConfigError;
use crate::game::{LobbySettings, UserSettings};

const CONFIG_FILE: &str = "config.toml";

/// Root configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub voice: VoiceConfig,
    pub lobby: LobbyConfig,
    pub ui: UiConfig,
}

/// Relay, devices and transmit behaviour
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceConfig {
    pub server_url: String,
    /// Used to find the local player when the game reader doesn't flag one
    pub player_name: String,
    pub microphone: String,
    pub speaker: String,
    pub push_to_talk: bool,
    pub enable_spatial_audio: bool,
    pub ice_servers: Vec<String>,
    pub reconnect_delay_ms: u64,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            server_url: constants::DEFAULT_SERVER_URL.to_string(),
            player_name: String::new(),
            microphone: DEFAULT_DEVICE.to_string(),
            speaker: DEFAULT_DEVICE.to_string(),
            push_to_talk: false,
            enable_spatial_audio: true,
            ice_servers: vec![constants::DEFAULT_STUN_SERVER.to_string()],
            reconnect_delay_ms: constants::DEFAULT_RECONNECT_DELAY_MS,
        }
    }
}

impl VoiceConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn user_settings(&self) -> UserSettings {
        UserSettings {
            enable_spatial_audio: self.enable_spatial_audio,
        }
    }
}

/// Lobby settings pushed to peers while we are host
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LobbyConfig {
    pub max_distance: f32,
    pub haunting: bool,
    pub hear_impostors_in_vents: bool,
    pub comms_sabotage: bool,
}

impl Default for LobbyConfig {
    fn default() -> Self {
        LobbySettings::default().into()
    }
}

impl From<LobbySettings> for LobbyConfig {
    fn from(s: LobbySettings) -> Self {
        Self {
            max_distance: s.max_distance,
            haunting: s.haunting,
            hear_impostors_in_vents: s.hear_impostors_in_vents,
            comms_sabotage: s.comms_sabotage,
        }
    }
}

impl From<LobbyConfig> for LobbySettings {
    fn from(c: LobbyConfig) -> Self {
        Self {
            max_distance: c.max_distance,
            haunting: c.haunting,
            hear_impostors_in_vents: c.hear_impostors_in_vents,
            comms_sabotage: c.comms_sabotage,
        }
    }
}

/// Control API listener
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UiConfig {
    pub bind_address: String,
    pub http_port: u16,
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1".to_string(),
            http_port: constants::DEFAULT_UI_PORT,
        }
    }
}

impl UiConfig {
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.bind_address, self.http_port)
    }
}

impl AppConfig {
    /// Default location of the config file
    pub fn config_path() -> Result<PathBuf, ConfigError> {
        directories::ProjectDirs::from("", "", "crewlink-voice")
            .map(|dirs| dirs.config_dir().join(CONFIG_FILE))
            .ok_or(ConfigError::NoConfigDir)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        toml::from_str(&text).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        })
    }

    /// Missing file yields defaults; an unreadable or invalid one is logged
    /// and replaced by defaults
    pub fn load_or_default(path: &Path) -> Self {
        if !path.exists() {
            tracing::info!("No config at {}, using defaults", path.display());
            return Self::default();
        }
        match Self::load(path) {
            Ok(config) => {
                tracing::info!("Loaded config from {}", path.display());
                config
            }
            Err(e) => {
                tracing::warn!("{}, using defaults", e);
                Self::default()
            }
        }
    }

    /// Write to `path`, creating parent directories
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let text = toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))?;
        std::fs::write(path, text)?;
        tracing::debug!("Saved config to {}", path.display());
        Ok(())
    }
}
