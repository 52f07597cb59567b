//! Signaling relay client
//!
//! Socket.io framing, the typed relay events, the websocket task and the
//! joined-lobby bookkeeping. Nothing here retries peer links; that belongs
//! to the peer manager.

pub mod client;
pub mod codec;
pub mod lobby;
pub mod protocol;

pub use client::{relay_url, SignalingClient, SignalingHandle, SignalingSink};
pub use codec::Frame;
pub use lobby::{JoinOutcome, LobbyChannel};
pub use protocol::{parse_event, Client, Outbound, PeerId, SignalingEvent};
