//! Per-peer link state machine
//!
//! Every inbound event for one peer is a [`LinkEvent`] fed through
//! [`transition`], which returns the next [`LinkStatus`] and the side
//! effects the manager must perform, in order. Nothing here touches the
//! network, so the reconnect policy is testable without timers.

use serde::Serialize;

use crate::constants::MAX_RETRIES;
use crate::error::PeerErrorCode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkState {
    Idle,
    Negotiating,
    Connected,
    Closed,
}

/// Which side created the offer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Initiator,
    Responder,
}

/// Observable state of one peer link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkStatus {
    pub state: LinkState,
    pub role: Role,
    pub retry_count: u32,
    /// Bumped on every new underlying connection; events from older
    /// connections are ignored
    pub generation: u64,
    pub last_error: Option<PeerErrorCode>,
    /// Retry ceiling reached; no further automatic attempts
    pub abandoned: bool,
}

impl LinkStatus {
    pub fn idle() -> Self {
        Self {
            state: LinkState::Idle,
            role: Role::Initiator,
            retry_count: 0,
            generation: 0,
            last_error: None,
            abandoned: false,
        }
    }

    pub fn is_live(&self) -> bool {
        matches!(self.state, LinkState::Negotiating | LinkState::Connected)
    }

    fn opened(&self, role: Role, retry_count: u32) -> Self {
        Self {
            state: LinkState::Negotiating,
            role,
            retry_count,
            generation: self.generation + 1,
            last_error: None,
            abandoned: false,
        }
    }
}

impl Default for LinkStatus {
    fn default() -> Self {
        Self::idle()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    /// The relay announced the peer; we make the offer
    Announced,
    /// A negotiation payload arrived from the peer
    SignalReceived { fresh_offer: bool },
    /// The transport finished connecting
    Established { generation: u64, is_host: bool },
    /// The transport closed, with the failure class if it failed
    TransportClosed {
        generation: u64,
        error: Option<PeerErrorCode>,
    },
    /// Explicit leave or session teardown
    Leave,
    /// Mesh reconnect: reopen a closed link as initiator
    Reopen,
}

/// Side effects, executed by the manager in order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkAction {
    /// Close the transport and destroy the audio graph
    Teardown,
    /// Start a new underlying connection
    Open {
        role: Role,
        generation: u64,
        /// Wait the reconnect delay first
        delayed: bool,
    },
    /// Hand the received payload to the current connection
    ForwardSignal,
    /// Construct the audio graph and attach inbound media
    BuildGraph,
    /// Send our lobby settings to the peer
    PushSettings,
    /// Report a permanent disconnect
    Abandon,
}

/// Apply one event to a link
pub fn transition(current: &LinkStatus, event: LinkEvent) -> (LinkStatus, Vec<LinkAction>) {
    use LinkAction::*;
    use LinkState::*;

    match (current.state, event) {
        (Idle | Closed, LinkEvent::Announced | LinkEvent::Reopen) => {
            let next = current.opened(Role::Initiator, 0);
            let open = Open {
                role: Role::Initiator,
                generation: next.generation,
                delayed: false,
            };
            (next, vec![open])
        }

        // The peer re-announced itself; whatever we had is stale
        (Negotiating | Connected, LinkEvent::Announced) => {
            let next = current.opened(Role::Initiator, 0);
            let open = Open {
                role: Role::Initiator,
                generation: next.generation,
                delayed: false,
            };
            (next, vec![Teardown, open])
        }

        (Negotiating | Connected, LinkEvent::Reopen) => (*current, vec![]),

        (Idle | Closed, LinkEvent::SignalReceived { .. }) => {
            let next = current.opened(Role::Responder, 0);
            let open = Open {
                role: Role::Responder,
                generation: next.generation,
                delayed: false,
            };
            (next, vec![open, ForwardSignal])
        }

        // A new offer on an established link means the peer started over
        (Connected, LinkEvent::SignalReceived { fresh_offer: true }) => {
            let next = current.opened(Role::Responder, 0);
            let open = Open {
                role: Role::Responder,
                generation: next.generation,
                delayed: false,
            };
            (next, vec![Teardown, open, ForwardSignal])
        }

        (Negotiating | Connected, LinkEvent::SignalReceived { .. }) => (*current, vec![ForwardSignal]),

        (Negotiating, LinkEvent::Established { generation, is_host }) if generation == current.generation => {
            let next = LinkStatus {
                state: Connected,
                ..*current
            };
            let mut actions = Vec::with_capacity(2);
            if is_host {
                actions.push(PushSettings);
            }
            actions.push(BuildGraph);
            (next, actions)
        }

        (Negotiating | Connected, LinkEvent::TransportClosed { generation, error }) if generation == current.generation => {
            on_transport_closed(current, error)
        }

        (Negotiating | Connected, LinkEvent::Leave) => (
            LinkStatus {
                state: Closed,
                ..*current
            },
            vec![Teardown],
        ),

        // Stale generations, duplicate closes, leave on a dead link
        _ => (*current, vec![]),
    }
}

fn on_transport_closed(current: &LinkStatus, error: Option<PeerErrorCode>) -> (LinkStatus, Vec<LinkAction>) {
    let closed = LinkStatus {
        state: LinkState::Closed,
        last_error: error,
        ..*current
    };

    let recoverable = error.map(PeerErrorCode::is_recoverable).unwrap_or(false);
    if current.role != Role::Initiator || !recoverable {
        return (closed, vec![LinkAction::Teardown]);
    }

    if current.retry_count >= MAX_RETRIES {
        let abandoned = LinkStatus {
            abandoned: true,
            ..closed
        };
        return (abandoned, vec![LinkAction::Teardown, LinkAction::Abandon]);
    }

    let next = LinkStatus {
        last_error: error,
        ..current.opened(Role::Initiator, current.retry_count + 1)
    };
    let open = LinkAction::Open {
        role: Role::Initiator,
        generation: next.generation,
        delayed: true,
    };
    (next, vec![LinkAction::Teardown, open])
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn negotiating(role: Role, retry_count: u32) -> LinkStatus {
        LinkStatus {
            state: LinkState::Negotiating,
            role,
            retry_count,
            generation: 3,
            last_error: None,
            abandoned: false,
        }
    }

    fn closed_with(generation: u64, code: PeerErrorCode) -> LinkEvent {
        LinkEvent::TransportClosed {
            generation,
            error: Some(code),
        }
    }

    #[test]
    fn test_announce_opens_as_initiator() {
        let (next, actions) = transition(&LinkStatus::idle(), LinkEvent::Announced);
        assert_eq!(next.state, LinkState::Negotiating);
        assert_eq!(next.role, Role::Initiator);
        assert_eq!(next.generation, 1);
        assert_eq!(
            actions,
            vec![LinkAction::Open {
                role: Role::Initiator,
                generation: 1,
                delayed: false
            }]
        );
    }

    #[test]
    fn test_first_signal_opens_as_responder() {
        let (next, actions) = transition(&LinkStatus::idle(), LinkEvent::SignalReceived { fresh_offer: true });
        assert_eq!(next.role, Role::Responder);
        assert_eq!(actions.last(), Some(&LinkAction::ForwardSignal));
    }

    #[test]
    fn test_established_builds_graph_and_pushes_settings_for_host() {
        let current = negotiating(Role::Initiator, 0);
        let (next, actions) = transition(&current, LinkEvent::Established { generation: 3, is_host: true });
        assert_eq!(next.state, LinkState::Connected);
        assert_eq!(actions, vec![LinkAction::PushSettings, LinkAction::BuildGraph]);

        let (_, actions) = transition(&current, LinkEvent::Established { generation: 3, is_host: false });
        assert_eq!(actions, vec![LinkAction::BuildGraph]);
    }

    #[test]
    fn test_stale_generation_is_ignored() {
        let current = negotiating(Role::Initiator, 0);
        let (next, actions) = transition(&current, LinkEvent::Established { generation: 2, is_host: false });
        assert_eq!(next, current);
        assert!(actions.is_empty());

        let (next, actions) = transition(&current, closed_with(2, PeerErrorCode::ConnectionFailure));
        assert_eq!(next, current);
        assert!(actions.is_empty());
    }

    #[test]
    fn test_recoverable_initiator_close_reconnects_once() {
        let current = LinkStatus {
            state: LinkState::Connected,
            ..negotiating(Role::Initiator, 4)
        };
        let (next, actions) = transition(&current, closed_with(3, PeerErrorCode::DataChannel));

        assert_eq!(next.state, LinkState::Negotiating);
        assert_eq!(next.retry_count, 5);
        assert_eq!(next.generation, 4);
        assert_eq!(next.last_error, Some(PeerErrorCode::DataChannel));
        let opens = actions.iter().filter(|a| matches!(a, LinkAction::Open { .. })).count();
        assert_eq!(opens, 1);
        assert_eq!(actions[0], LinkAction::Teardown);
    }

    #[test]
    fn test_retry_ceiling_abandons() {
        let current = negotiating(Role::Initiator, MAX_RETRIES);
        let (next, actions) = transition(&current, closed_with(3, PeerErrorCode::ConnectionFailure));
        assert_eq!(next.state, LinkState::Closed);
        assert!(next.abandoned);
        assert_eq!(actions, vec![LinkAction::Teardown, LinkAction::Abandon]);
    }

    #[test]
    fn test_negotiation_errors_never_reconnect() {
        let current = negotiating(Role::Initiator, 0);
        for code in [
            PeerErrorCode::Signaling,
            PeerErrorCode::IceConnectionFailure,
            PeerErrorCode::CreateOffer,
            PeerErrorCode::SetRemoteDescription,
        ] {
            let (next, actions) = transition(&current, closed_with(3, code));
            assert_eq!(next.state, LinkState::Closed);
            assert_eq!(actions, vec![LinkAction::Teardown]);
        }
    }

    #[test]
    fn test_responder_never_reconnects() {
        let current = negotiating(Role::Responder, 0);
        let (next, actions) = transition(&current, closed_with(3, PeerErrorCode::DataChannel));
        assert_eq!(next.state, LinkState::Closed);
        assert_eq!(actions, vec![LinkAction::Teardown]);
    }

    #[test]
    fn test_leave_closes_without_reconnect() {
        let current = negotiating(Role::Initiator, 0);
        let (next, actions) = transition(&current, LinkEvent::Leave);
        assert_eq!(next.state, LinkState::Closed);
        assert_eq!(actions, vec![LinkAction::Teardown]);

        // A late close from the dead connection changes nothing
        let (after, actions) = transition(&next, closed_with(3, PeerErrorCode::DataChannel));
        assert_eq!(after, next);
        assert!(actions.is_empty());
    }

    #[test]
    fn test_reopen_resets_abandoned_link() {
        let abandoned = LinkStatus {
            state: LinkState::Closed,
            abandoned: true,
            retry_count: MAX_RETRIES,
            ..negotiating(Role::Initiator, 0)
        };
        let (next, actions) = transition(&abandoned, LinkEvent::Reopen);
        assert_eq!(next.state, LinkState::Negotiating);
        assert_eq!(next.retry_count, 0);
        assert!(!next.abandoned);
        assert_eq!(actions.len(), 1);
    }

    #[test]
    fn test_fresh_offer_on_connected_link_restarts_as_responder() {
        let current = LinkStatus {
            state: LinkState::Connected,
            ..negotiating(Role::Initiator, 0)
        };
        let (next, actions) = transition(&current, LinkEvent::SignalReceived { fresh_offer: true });
        assert_eq!(next.role, Role::Responder);
        assert_eq!(next.generation, 4);
        assert_eq!(actions[0], LinkAction::Teardown);

        let (next, actions) = transition(&current, LinkEvent::SignalReceived { fresh_offer: false });
        assert_eq!(next, current);
        assert_eq!(actions, vec![LinkAction::ForwardSignal]);
    }

    fn any_code() -> impl Strategy<Value = PeerErrorCode> {
        prop_oneof![
            Just(PeerErrorCode::WebrtcSupport),
            Just(PeerErrorCode::CreateOffer),
            Just(PeerErrorCode::CreateAnswer),
            Just(PeerErrorCode::SetLocalDescription),
            Just(PeerErrorCode::SetRemoteDescription),
            Just(PeerErrorCode::AddIceCandidate),
            Just(PeerErrorCode::IceConnectionFailure),
            Just(PeerErrorCode::Signaling),
            Just(PeerErrorCode::DataChannel),
            Just(PeerErrorCode::ConnectionFailure),
        ]
    }

    proptest! {
        #[test]
        fn prop_reconnect_policy(
            initiator in any::<bool>(),
            retry in 0u32..15,
            code in any_code(),
            connected in any::<bool>(),
        ) {
            let role = if initiator { Role::Initiator } else { Role::Responder };
            let current = LinkStatus {
                state: if connected { LinkState::Connected } else { LinkState::Negotiating },
                ..negotiating(role, retry)
            };
            let (next, actions) = transition(&current, closed_with(current.generation, code));
            let opens = actions.iter().filter(|a| matches!(a, LinkAction::Open { .. })).count();

            if initiator && code.is_recoverable() && retry < MAX_RETRIES {
                prop_assert_eq!(opens, 1);
                prop_assert_eq!(next.state, LinkState::Negotiating);
                prop_assert_eq!(next.retry_count, retry + 1);
            } else {
                prop_assert_eq!(opens, 0);
                prop_assert_eq!(next.state, LinkState::Closed);
            }
            // Teardown always precedes any new connection
            prop_assert_eq!(actions[0], LinkAction::Teardown);
        }
    }
}
