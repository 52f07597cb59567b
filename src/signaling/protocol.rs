//! Relay event vocabulary
//!
//! Typed forms of the events exchanged with the signaling relay, and the
//! conversion to and from socket.io event frames.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;

use crate::error::SignalingError;
use crate::game::{ClientId, GameState, PlayerId};
use crate::signaling::codec::Frame;

/// Relay-assigned peer identifier (the remote socket id)
pub type PeerId = String;

/// Game identity the relay associates with a peer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Client {
    pub player_id: PlayerId,
    pub client_id: ClientId,
}

/// Client to relay
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Join {
        lobby_code: String,
        player_id: PlayerId,
        client_id: ClientId,
    },
    Leave,
    /// Forward a negotiation payload to one peer
    Signal { to: PeerId, data: Value },
    /// Announce a changed local identity
    Id { player_id: PlayerId, client_id: ClientId },
}

impl Outbound {
    pub fn to_frame(&self) -> Frame {
        match self {
            Outbound::Join {
                lobby_code,
                player_id,
                client_id,
            } => Frame::event("join", vec![json!(lobby_code), json!(player_id), json!(client_id)]),
            Outbound::Leave => Frame::event("leave", vec![]),
            Outbound::Signal { to, data } => Frame::event("signal", vec![json!({ "data": data, "to": to })]),
            Outbound::Id { player_id, client_id } => Frame::event("id", vec![json!(player_id), json!(client_id)]),
        }
    }
}

/// Relay to client, plus transport notifications
#[derive(Debug, Clone)]
pub enum SignalingEvent {
    PeerJoined { peer: PeerId, client: Client },
    NegotiationReceived { from: PeerId, data: Value },
    RosterReplaced(HashMap<PeerId, Client>),
    RosterEntryUpdated { peer: PeerId, client: Client },
    GameStatePushed(Box<GameState>),
    ConnectivityChanged(bool),
    TransportError(String),
}

fn arg<'a>(args: &'a [Value], index: usize, event: &str) -> Result<&'a Value, SignalingError> {
    args.get(index)
        .ok_or_else(|| SignalingError::MalformedFrame(format!("{} is missing argument {}", event, index)))
}

fn peer_id(value: &Value, event: &str) -> Result<PeerId, SignalingError> {
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| SignalingError::MalformedFrame(format!("{} peer id is not a string", event)))
}

fn client(value: &Value, event: &str) -> Result<Client, SignalingError> {
    Client::deserialize(value).map_err(|e| SignalingError::MalformedFrame(format!("{} client: {}", event, e)))
}

/// Interpret an inbound event frame.
///
/// Returns `Ok(None)` for events this client does not consume.
pub fn parse_event(name: &str, args: &[Value]) -> Result<Option<SignalingEvent>, SignalingError> {
    let event = match name {
        "join" => SignalingEvent::PeerJoined {
            peer: peer_id(arg(args, 0, name)?, name)?,
            client: client(arg(args, 1, name)?, name)?,
        },
        "signal" => {
            let body = arg(args, 0, name)?;
            SignalingEvent::NegotiationReceived {
                from: peer_id(body.get("from").unwrap_or(&Value::Null), name)?,
                data: body.get("data").cloned().unwrap_or(Value::Null),
            }
        }
        "setClient" => SignalingEvent::RosterEntryUpdated {
            peer: peer_id(arg(args, 0, name)?, name)?,
            client: client(arg(args, 1, name)?, name)?,
        },
        "setClients" => {
            let roster = HashMap::<PeerId, Client>::deserialize(arg(args, 0, name)?)
                .map_err(|e| SignalingError::MalformedFrame(format!("setClients: {}", e)))?;
            SignalingEvent::RosterReplaced(roster)
        }
        "pullstate" => {
            let state = GameState::from_json_value(arg(args, 0, name)?.clone())
                .map_err(|e| SignalingError::MalformedFrame(format!("pullstate: {}", e)))?;
            SignalingEvent::GameStatePushed(Box::new(state))
        }
        "error" => {
            let body = args.first().cloned().unwrap_or(Value::Null);
            let message = body
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| body.to_string());
            SignalingEvent::TransportError(message)
        }
        _ => return Ok(None),
    };
    Ok(Some(event))
}
