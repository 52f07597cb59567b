//! Peer connection management
//!
//! ```text
//!   relay events ──► PeerManager ──► transition() ──► actions
//!                        │                               │
//!                        │◄── TransportEvent ◄── PeerTransport (WebRTC)
//!                        ▼
//!                   AudioGraph per connected peer
//! ```

pub mod link;
pub mod manager;
pub mod roster;
pub mod transport;
pub mod webrtc;

pub use link::{transition, LinkAction, LinkEvent, LinkState, LinkStatus, Role};
pub use manager::{InboundSettings, PeerManager, PeerStatus};
pub use roster::Roster;
pub use transport::{OpenRequest, PeerTransport, TransportEvent};
pub use self::webrtc::WebRtcTransport;
