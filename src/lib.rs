//! # CrewLink Voice
//!
//! Proximity voice chat for a social deduction game over a self-healing
//! WebRTC peer mesh, driven by live game-state snapshots.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │                              LOCAL CLIENT                                │
//! │                                                                          │
//! │  game reader ──► POST /api/state ──┐        ┌── control API (ui::)       │
//! │                                    ▼        ▼                            │
//! │  ┌─────────────────────────────────────────────────────────────────┐    │
//! │  │                 Voice Session (session::controller)              │    │
//! │  │   mute gates · dead roster · lobby following · host settings     │    │
//! │  └───────┬───────────────────────┬──────────────────────┬──────────┘    │
//! │          │                       │                      │               │
//! │          ▼                       ▼                      ▼               │
//! │  ┌──────────────┐      ┌───────────────────┐   ┌──────────────────┐     │
//! │  │  Signaling   │      │   Peer Manager    │   │ Audio Parameters │     │
//! │  │  (socket.io) │◄────►│ link state machine│──►│  + wall geometry │     │
//! │  └──────┬───────┘      └─────────┬─────────┘   └────────┬─────────┘     │
//! │         │                        │                      │               │
//! │         │              ┌─────────▼─────────┐   ┌────────▼─────────┐     │
//! │         │              │  WebRTC transport │   │ per-peer graphs  │     │
//! │         │              │ Opus track + data │──►│  mixer ─► cpal   │     │
//! │         │              └─────────▲─────────┘   └──────────────────┘     │
//! │         │                        │                                      │
//! │         │     mic ─► capture ─► encode pump (Opus, 20 ms)               │
//! └─────────┼────────────────────────┼──────────────────────────────────────┘
//!           ▼                        ▼
//!     signaling relay          other players (one link per pair)
//! ```

pub mod audio;
pub mod codec;
pub mod config;
pub mod error;
pub mod game;
pub mod geometry;
pub mod peers;
pub mod session;
pub mod signaling;
pub mod ui;

pub use error::{Error, Result};

/// Application-wide constants
pub mod constants {
    /// Sample rate of the voice pipeline
    pub const VOICE_SAMPLE_RATE: u32 = 48000;

    /// Samples per Opus frame (20 ms at 48 kHz)
    pub const VOICE_FRAME_SAMPLES: usize = 960;

    /// Reconnect attempts per peer before giving up
    pub const MAX_RETRIES: u32 = 10;

    /// Default signaling relay
    pub const DEFAULT_SERVER_URL: &str = "http://impostietalkie.herokuapp.com/";

    pub const DEFAULT_STUN_SERVER: &str = "stun:stun.l.google.com:19302";

    /// Wait before renegotiating a dropped link
    pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 500;

    /// Default port of the control API
    pub const DEFAULT_UI_PORT: u16 = 8484;
}
