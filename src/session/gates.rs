//! Mute, deafen and push-to-talk

use serde::Serialize;

use crate::audio::capture::CaptureGate;

/// The three local transmit gates
///
/// Deafen implies mute and wins over everything else. Push-to-talk, when
/// enabled, only opens the microphone while the talk key is held.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MuteGates {
    muted: bool,
    deafened: bool,
    push_to_talk: bool,
    key_held: bool,
}

impl MuteGates {
    pub fn new(push_to_talk: bool) -> Self {
        Self {
            push_to_talk,
            ..Self::default()
        }
    }

    /// Effective mute state, including the one implied by deafen
    pub fn is_muted(&self) -> bool {
        self.muted || self.deafened
    }

    pub fn is_deafened(&self) -> bool {
        self.deafened
    }

    pub fn push_to_talk(&self) -> bool {
        self.push_to_talk
    }

    pub fn key_held(&self) -> bool {
        self.key_held
    }

    /// Whether the capture track should be open right now
    pub fn transmit_enabled(&self) -> bool {
        !self.is_muted() && (!self.push_to_talk || self.key_held)
    }

    /// Unmuting while deafened also undeafens
    pub fn set_muted(&mut self, muted: bool) {
        if !muted {
            self.deafened = false;
        }
        self.muted = muted;
    }

    pub fn toggle_mute(&mut self) {
        if self.deafened {
            self.deafened = false;
            self.muted = false;
        } else {
            self.muted = !self.muted;
        }
    }

    pub fn set_deafened(&mut self, deafened: bool) {
        self.deafened = deafened;
    }

    pub fn toggle_deafen(&mut self) {
        self.deafened = !self.deafened;
    }

    pub fn set_push_to_talk(&mut self, enabled: bool) {
        self.push_to_talk = enabled;
        if !enabled {
            self.key_held = false;
        }
    }

    pub fn set_key_held(&mut self, held: bool) {
        self.key_held = held;
    }

    /// Push the combined state onto the capture track
    pub fn sync(&self, gate: &CaptureGate) {
        gate.set_enabled(self.transmit_enabled());
    }
}
