//! Peer transport boundary
//!
//! The manager drives connections through [`PeerTransport`] and learns
//! about them only through [`TransportEvent`]s on a channel, tagged with
//! the generation they belong to. Failures are events too; no transport
//! call blocks on the network or returns a negotiation error.

use serde_json::Value;
use std::time::Duration;

use crate::audio::buffer::SharedFrameQueue;
use crate::error::{PeerError, PeerErrorCode};
use crate::peers::link::Role;
use crate::signaling::PeerId;

/// Request to start one underlying connection
#[derive(Debug, Clone, PartialEq)]
pub struct OpenRequest {
    pub peer: PeerId,
    pub role: Role,
    pub generation: u64,
    /// Wait this long before negotiating
    pub delay: Option<Duration>,
}

/// Something happened on a connection
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// Negotiation payload to relay to the peer
    Signal {
        peer: PeerId,
        generation: u64,
        data: Value,
    },
    Connected { peer: PeerId, generation: u64 },
    /// Decoded inbound audio is available
    Stream {
        peer: PeerId,
        generation: u64,
        stream: SharedFrameQueue,
    },
    /// Text message on the data channel
    Data {
        peer: PeerId,
        generation: u64,
        text: String,
    },
    Closed {
        peer: PeerId,
        generation: u64,
        error: Option<PeerErrorCode>,
    },
}

impl TransportEvent {
    pub fn peer(&self) -> &PeerId {
        match self {
            TransportEvent::Signal { peer, .. }
            | TransportEvent::Connected { peer, .. }
            | TransportEvent::Stream { peer, .. }
            | TransportEvent::Data { peer, .. }
            | TransportEvent::Closed { peer, .. } => peer,
        }
    }

    pub fn generation(&self) -> u64 {
        match self {
            TransportEvent::Signal { generation, .. }
            | TransportEvent::Connected { generation, .. }
            | TransportEvent::Stream { generation, .. }
            | TransportEvent::Data { generation, .. }
            | TransportEvent::Closed { generation, .. } => *generation,
        }
    }
}

/// Creates and drives peer connections
pub trait PeerTransport: Send {
    /// Start a connection, replacing any previous one for the same peer
    fn open(&mut self, request: OpenRequest);

    /// Feed a remote negotiation payload to the current connection
    fn signal(&mut self, peer: &PeerId, generation: u64, data: Value);

    /// Send a text message over the data channel
    fn send_data(&mut self, peer: &PeerId, text: &str) -> Result<(), PeerError>;

    /// Close a connection and cancel its pending timers; idempotent
    fn close(&mut self, peer: &PeerId);

    fn close_all(&mut self);
}
