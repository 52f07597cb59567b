//! Lobby-wide and per-user voice settings

use serde::{Deserialize, Serialize};

/// Default audible radius in world units
pub const DEFAULT_MAX_DISTANCE: f32 = 5.32;

/// Settings owned by the lobby host and propagated to every peer
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LobbySettings {
    /// Max audible distance
    pub max_distance: f32,
    /// Dead crewmates are faintly audible to living impostors
    pub haunting: bool,
    /// Players inside vents stay audible
    pub hear_impostors_in_vents: bool,
    /// Comms sabotage silences living crewmates
    pub comms_sabotage: bool,
}

impl Default for LobbySettings {
    fn default() -> Self {
        Self {
            max_distance: DEFAULT_MAX_DISTANCE,
            haunting: false,
            hear_impostors_in_vents: false,
            comms_sabotage: true,
        }
    }
}

impl LobbySettings {
    /// Merge a partial update key by key. Returns true if anything changed.
    pub fn merge(&mut self, patch: &LobbySettingsPatch) -> bool {
        let before = *self;
        if let Some(max_distance) = patch.max_distance {
            if max_distance.is_finite() && max_distance >= 0.0 {
                self.max_distance = max_distance;
            }
        }
        if let Some(haunting) = patch.haunting {
            self.haunting = haunting;
        }
        if let Some(hear) = patch.hear_impostors_in_vents {
            self.hear_impostors_in_vents = hear;
        }
        if let Some(comms) = patch.comms_sabotage {
            self.comms_sabotage = comms;
        }
        *self != before
    }

    /// Encode for the peer data channel
    pub fn to_payload(&self) -> String {
        // Plain struct of primitives; serialization cannot fail
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Partial lobby-settings update as received from a peer
///
/// Unknown keys are ignored; absent keys leave the current value alone.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LobbySettingsPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_distance: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub haunting: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hear_impostors_in_vents: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comms_sabotage: Option<bool>,
}

impl LobbySettingsPatch {
    /// Parse a data-channel payload. Malformed input yields `None`.
    pub fn parse(payload: &str) -> Option<Self> {
        match serde_json::from_str::<serde_json::Value>(payload) {
            Ok(serde_json::Value::Object(map)) => {
                // Field-by-field so one badly typed key doesn't discard the rest
                let field = |key: &str| map.get(key).cloned().unwrap_or(serde_json::Value::Null);
                Some(Self {
                    max_distance: field("maxDistance").as_f64().map(|v| v as f32),
                    haunting: field("haunting").as_bool(),
                    hear_impostors_in_vents: field("hearImpostorsInVents").as_bool(),
                    comms_sabotage: field("commsSabotage").as_bool(),
                })
            }
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

impl From<LobbySettings> for LobbySettingsPatch {
    fn from(settings: LobbySettings) -> Self {
        Self {
            max_distance: Some(settings.max_distance),
            haunting: Some(settings.haunting),
            hear_impostors_in_vents: Some(settings.hear_impostors_in_vents),
            comms_sabotage: Some(settings.comms_sabotage),
        }
    }
}

/// Local, per-user preferences that affect parameter computation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserSettings {
    pub enable_spatial_audio: bool,
}

impl Default for UserSettings {
    fn default() -> Self {
        Self {
            enable_spatial_audio: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_known_keys_only() {
        let mut settings = LobbySettings::default();
        let patch = LobbySettingsPatch::parse(r#"{"haunting": true, "volume": 11, "maxDistance": 8}"#).unwrap();

        assert!(settings.merge(&patch));
        assert!(settings.haunting);
        assert_eq!(settings.max_distance, 8.0);
        assert!(settings.comms_sabotage);
    }

    #[test]
    fn test_malformed_payload_ignored() {
        assert!(LobbySettingsPatch::parse("{not json").is_none());
        assert!(LobbySettingsPatch::parse("[1, 2]").is_none());

        let patch = LobbySettingsPatch::parse(r#"{"haunting": "yes"}"#).unwrap();
        assert!(patch.is_empty());
    }

    #[test]
    fn test_payload_roundtrips_through_patch() {
        let settings = LobbySettings {
            max_distance: 3.0,
            haunting: true,
            hear_impostors_in_vents: true,
            comms_sabotage: false,
        };
        let patch = LobbySettingsPatch::parse(&settings.to_payload()).unwrap();

        let mut merged = LobbySettings::default();
        merged.merge(&patch);
        assert_eq!(merged, settings);
    }

    #[test]
    fn test_merge_without_change() {
        let mut settings = LobbySettings::default();
        assert!(!settings.merge(&LobbySettingsPatch::default()));
    }
}
