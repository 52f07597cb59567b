//! Voice session: the single loop that turns game state into mesh and
//! audio changes

pub mod controller;
pub mod engine;
pub mod gates;
pub mod roster;

pub use controller::{PeerView, SessionCommand, SessionConfig, SessionHandle, SessionStatus, VoiceSession};
pub use engine::VoiceEngine;
pub use gates::MuteGates;
pub use roster::DeadRoster;
