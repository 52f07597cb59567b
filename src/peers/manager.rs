//! Peer connection manager
//!
//! Owns every peer link, runs link events through the transition function
//! and performs the resulting actions against the transport, the audio
//! graphs and the relay. One manager belongs to one session loop, so link
//! state for a peer is never mutated concurrently.

use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::audio::buffer::SharedFrameQueue;
use crate::audio::graph::{AudioGraph, AudioGraphFactory};
use crate::audio::params::{compute_audio_parameters, AudioParameters};
use crate::error::PeerErrorCode;
use crate::game::{GameState, LobbySettings, Player, PlayerId, UserSettings};
use crate::peers::link::{transition, LinkAction, LinkEvent, LinkState, LinkStatus, Role};
use crate::peers::roster::Roster;
use crate::peers::transport::{OpenRequest, PeerTransport, TransportEvent};
use crate::signaling::{Client, Outbound, PeerId, SignalingSink};

/// A data-channel message the session has to judge
#[derive(Debug, Clone, PartialEq)]
pub struct InboundSettings {
    pub peer: PeerId,
    /// Roster identity of the sender at time of receipt
    pub sender: Option<Client>,
    pub payload: String,
}

/// Per-peer status for the control surface
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerStatus {
    pub peer: PeerId,
    pub state: LinkState,
    pub role: Role,
    pub retry_count: u32,
    pub last_error: Option<PeerErrorCode>,
    pub abandoned: bool,
    pub player_id: Option<PlayerId>,
    pub audio_attached: bool,
}

struct PeerLink {
    status: LinkStatus,
    graph: Option<Box<dyn AudioGraph>>,
    stream: Option<SharedFrameQueue>,
}

impl PeerLink {
    fn new() -> Self {
        Self {
            status: LinkStatus::idle(),
            graph: None,
            stream: None,
        }
    }
}

pub struct PeerManager {
    links: HashMap<PeerId, PeerLink>,
    roster: Roster,
    transport: Box<dyn PeerTransport>,
    graphs: Box<dyn AudioGraphFactory>,
    signaling: Arc<dyn SignalingSink>,
    reconnect_delay: Duration,
    max_distance: f32,
    /// Settings pushed to new peers while we are host
    host_settings: Option<LobbySettings>,
}

impl PeerManager {
    pub fn new(
        transport: Box<dyn PeerTransport>,
        graphs: Box<dyn AudioGraphFactory>,
        signaling: Arc<dyn SignalingSink>,
        reconnect_delay: Duration,
    ) -> Self {
        Self {
            links: HashMap::new(),
            roster: Roster::new(),
            transport,
            graphs,
            signaling,
            reconnect_delay,
            max_distance: LobbySettings::default().max_distance,
            host_settings: None,
        }
    }

    /// The relay announced a peer; we initiate
    pub fn peer_joined(&mut self, peer: PeerId, client: Client) {
        tracing::debug!("Peer {} joined as player {}", peer, client.player_id);
        self.roster = self.roster.with_entry(&peer, client);
        self.step(&peer, LinkEvent::Announced, None);
    }

    pub fn negotiation_received(&mut self, peer: PeerId, data: Value) {
        let fresh_offer = data.get("type").and_then(Value::as_str) == Some("offer");
        self.step(&peer, LinkEvent::SignalReceived { fresh_offer }, Some(data));
    }

    pub fn roster_replaced(&mut self, entries: HashMap<PeerId, Client>) {
        self.roster = Roster::from_map(entries);
    }

    pub fn roster_entry_updated(&mut self, peer: PeerId, client: Client) {
        self.roster = self.roster.with_entry(&peer, client);
    }

    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    /// Apply one transport event. Data-channel messages are returned for
    /// the caller to validate.
    pub fn handle_transport_event(&mut self, event: TransportEvent) -> Option<InboundSettings> {
        let current = self.links.get(event.peer()).map(|l| l.status);
        let current_generation = current.filter(LinkStatus::is_live).map(|s| s.generation);

        match event {
            TransportEvent::Signal { peer, generation, data } => {
                if current_generation != Some(generation) {
                    tracing::debug!("Dropping signal from stale connection to {}", peer);
                    return None;
                }
                if let Err(e) = self.signaling.send(Outbound::Signal { to: peer, data }) {
                    tracing::warn!("Could not relay negotiation: {}", e);
                }
                None
            }
            TransportEvent::Connected { peer, generation } => {
                let is_host = self.host_settings.is_some();
                self.step(&peer, LinkEvent::Established { generation, is_host }, None);
                None
            }
            TransportEvent::Stream {
                peer,
                generation,
                stream,
            } => {
                if current_generation != Some(generation) {
                    return None;
                }
                if let Some(link) = self.links.get_mut(&peer) {
                    if let Some(graph) = link.graph.as_mut() {
                        graph.attach(stream.clone());
                    }
                    link.stream = Some(stream);
                }
                None
            }
            TransportEvent::Data { peer, generation, text } => {
                if current_generation != Some(generation) {
                    return None;
                }
                Some(InboundSettings {
                    sender: self.roster.get(&peer),
                    peer,
                    payload: text,
                })
            }
            TransportEvent::Closed {
                peer,
                generation,
                error,
            } => {
                if let Some(code) = error {
                    tracing::warn!("Link to {} failed: {}", peer, code);
                }
                self.step(&peer, LinkEvent::TransportClosed { generation, error }, None);
                None
            }
        }
    }

    /// Tear down every link and forget the roster
    pub fn leave_all(&mut self) {
        let peers: Vec<PeerId> = self.links.keys().cloned().collect();
        for peer in &peers {
            self.step(peer, LinkEvent::Leave, None);
        }
        self.transport.close_all();
        self.links.clear();
        self.roster = Roster::new();
        tracing::info!("Closed all peer links");
    }

    /// Reopen, as initiator with a fresh retry budget, every rostered peer
    /// whose link is closed. Returns how many were reopened.
    pub fn reopen_closed(&mut self) -> usize {
        let closed: Vec<PeerId> = self
            .roster
            .peers()
            .filter(|peer| {
                self.links
                    .get(*peer)
                    .map(|l| l.status.state == LinkState::Closed)
                    .unwrap_or(false)
            })
            .cloned()
            .collect();

        for peer in &closed {
            self.step(peer, LinkEvent::Reopen, None);
        }
        closed.len()
    }

    /// Recompute and push audio parameters for every connected peer whose
    /// player is known
    pub fn apply_parameters(
        &mut self,
        state: &GameState,
        user: &UserSettings,
        lobby: &LobbySettings,
        me: Option<&Player>,
        deafened: bool,
    ) {
        for (peer, link) in self.links.iter_mut() {
            if link.status.state != LinkState::Connected {
                continue;
            }
            let Some(graph) = link.graph.as_mut() else {
                continue;
            };
            let Some(player_id) = self.roster.player_id(peer) else {
                continue;
            };

            let mut params = match (me, state.player(player_id)) {
                (Some(me), Some(other)) => compute_audio_parameters(state, user, lobby, me, other),
                _ => AudioParameters::silent(lobby.max_distance),
            };
            if deafened {
                params.gain = 0.0;
            }
            graph.apply(&params);
        }
    }

    /// Update the panner distance model of every graph
    pub fn set_max_distance(&mut self, max_distance: f32) {
        self.max_distance = max_distance;
        for graph in self.links.values_mut().filter_map(|l| l.graph.as_mut()) {
            graph.set_max_distance(max_distance);
        }
    }

    /// Become host (`Some`) or stop being host (`None`)
    pub fn set_host_settings(&mut self, settings: Option<LobbySettings>) {
        self.host_settings = settings;
    }

    /// Send lobby settings to every connected peer
    pub fn broadcast_settings(&mut self, settings: &LobbySettings) {
        let payload = settings.to_payload();
        let connected: Vec<PeerId> = self
            .links
            .iter()
            .filter(|(_, l)| l.status.state == LinkState::Connected)
            .map(|(p, _)| p.clone())
            .collect();
        for peer in connected {
            if let Err(e) = self.transport.send_data(&peer, &payload) {
                tracing::warn!("Could not send lobby settings to {}: {}", peer, e);
            }
        }
    }

    pub fn link_status(&self, peer: &PeerId) -> Option<LinkStatus> {
        self.links.get(peer).map(|l| l.status)
    }

    pub fn statuses(&self) -> Vec<PeerStatus> {
        let mut statuses: Vec<PeerStatus> = self
            .links
            .iter()
            .map(|(peer, link)| PeerStatus {
                peer: peer.clone(),
                state: link.status.state,
                role: link.status.role,
                retry_count: link.status.retry_count,
                last_error: link.status.last_error,
                abandoned: link.status.abandoned,
                player_id: self.roster.player_id(peer),
                audio_attached: link.graph.as_ref().map(|g| g.is_attached()).unwrap_or(false),
            })
            .collect();
        statuses.sort_by(|a, b| a.peer.cmp(&b.peer));
        statuses
    }

    fn step(&mut self, peer: &PeerId, event: LinkEvent, mut data: Option<Value>) {
        let current = self.links.get(peer).map(|l| l.status).unwrap_or_default();
        let (next, actions) = transition(&current, event);
        if actions.is_empty() && next == current {
            return;
        }

        // Teardown completes before the new state is observable
        for action in &actions {
            if *action == LinkAction::Teardown {
                self.teardown(peer);
            }
        }
        self.links.entry(peer.clone()).or_insert_with(PeerLink::new).status = next;

        for action in actions {
            match action {
                LinkAction::Teardown => {}
                LinkAction::Open {
                    role,
                    generation,
                    delayed,
                } => {
                    tracing::debug!("Opening link to {} as {:?} (attempt {})", peer, role, next.retry_count);
                    self.transport.open(OpenRequest {
                        peer: peer.clone(),
                        role,
                        generation,
                        delay: delayed.then_some(self.reconnect_delay),
                    });
                }
                LinkAction::ForwardSignal => {
                    if let Some(data) = data.take() {
                        self.transport.signal(peer, next.generation, data);
                    }
                }
                LinkAction::BuildGraph => self.build_graph(peer),
                LinkAction::PushSettings => {
                    if let Some(settings) = self.host_settings {
                        if let Err(e) = self.transport.send_data(peer, &settings.to_payload()) {
                            tracing::warn!("Could not send lobby settings to {}: {}", peer, e);
                        }
                    }
                }
                LinkAction::Abandon => {
                    tracing::warn!("Giving up on {} after {} reconnect attempts", peer, next.retry_count);
                }
            }
        }
    }

    fn build_graph(&mut self, peer: &PeerId) {
        let max_distance = self.max_distance;
        let Some(link) = self.links.get_mut(peer) else {
            return;
        };
        let mut graph = self.graphs.create(peer, AudioParameters::silent(max_distance));
        if let Some(stream) = link.stream.clone() {
            graph.attach(stream);
        }
        link.graph = Some(graph);
        tracing::info!("Connected to {}", peer);
    }

    fn teardown(&mut self, peer: &PeerId) {
        if let Some(link) = self.links.get_mut(peer) {
            if let Some(mut graph) = link.graph.take() {
                graph.detach();
                graph.destroy();
            }
            link.stream = None;
        }
        self.transport.close(peer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::buffer::create_shared_queue;
    use crate::audio::graph::testing::RecordingGraphFactory;
    use crate::constants::MAX_RETRIES;
    use crate::game::Phase;
    use crate::peers::transport::testing::{Call, LoopbackTransport};
    use crate::error::SignalingError;
    use parking_lot::Mutex;
    use serde_json::json;

    #[derive(Default)]
    struct RecordingSignaling(Mutex<Vec<Outbound>>);

    impl SignalingSink for RecordingSignaling {
        fn send(&self, event: Outbound) -> Result<(), SignalingError> {
            self.0.lock().push(event);
            Ok(())
        }
    }

    struct Fixture {
        manager: PeerManager,
        transport: LoopbackTransport,
        graphs: RecordingGraphFactory,
        signaling: Arc<RecordingSignaling>,
    }

    fn fixture() -> Fixture {
        let transport = LoopbackTransport::new();
        let graphs = RecordingGraphFactory::new();
        let signaling = Arc::new(RecordingSignaling::default());
        let manager = PeerManager::new(
            Box::new(transport.clone()),
            Box::new(graphs.clone()),
            signaling.clone(),
            Duration::from_millis(500),
        );
        Fixture {
            manager,
            transport,
            graphs,
            signaling,
        }
    }

    fn peer(name: &str) -> PeerId {
        name.to_string()
    }

    fn client(player_id: PlayerId) -> Client {
        Client {
            player_id,
            client_id: player_id + 100,
        }
    }

    fn connect(f: &mut Fixture, name: &str, player_id: PlayerId) -> u64 {
        f.manager.peer_joined(peer(name), client(player_id));
        let generation = f.manager.link_status(&peer(name)).unwrap().generation;
        f.transport.mark_connected(name);
        f.manager.handle_transport_event(TransportEvent::Connected {
            peer: peer(name),
            generation,
        });
        generation
    }

    #[test]
    fn test_join_connect_builds_graph() {
        let mut f = fixture();
        let generation = connect(&mut f, "a", 1);

        let status = f.manager.link_status(&peer("a")).unwrap();
        assert_eq!(status.state, LinkState::Connected);
        assert_eq!(f.transport.opens().len(), 1);
        assert_eq!(f.transport.opens()[0].delay, None);

        f.manager.handle_transport_event(TransportEvent::Stream {
            peer: peer("a"),
            generation,
            stream: create_shared_queue(4),
        });
        assert!(f.graphs.latest("a").unwrap().attached);
        assert!(f.manager.statuses()[0].audio_attached);
    }

    #[test]
    fn test_stream_before_connect_is_attached_on_build() {
        let mut f = fixture();
        f.manager.peer_joined(peer("a"), client(1));
        f.manager.handle_transport_event(TransportEvent::Stream {
            peer: peer("a"),
            generation: 1,
            stream: create_shared_queue(4),
        });
        f.manager
            .handle_transport_event(TransportEvent::Connected { peer: peer("a"), generation: 1 });
        assert!(f.graphs.latest("a").unwrap().attached);
    }

    #[test]
    fn test_outbound_signal_relayed_only_for_current_generation() {
        let mut f = fixture();
        f.manager.peer_joined(peer("a"), client(1));
        f.manager.handle_transport_event(TransportEvent::Signal {
            peer: peer("a"),
            generation: 1,
            data: json!({"type": "offer", "sdp": "x"}),
        });
        f.manager.handle_transport_event(TransportEvent::Signal {
            peer: peer("a"),
            generation: 0,
            data: json!({"type": "offer", "sdp": "old"}),
        });

        let sent = f.signaling.0.lock().clone();
        assert_eq!(sent.len(), 1);
        assert!(matches!(&sent[0], Outbound::Signal { to, .. } if to == "a"));
    }

    #[test]
    fn test_inbound_offer_creates_responder() {
        let mut f = fixture();
        f.manager
            .negotiation_received(peer("b"), json!({"type": "offer", "sdp": "v=0"}));
        let status = f.manager.link_status(&peer("b")).unwrap();
        assert_eq!(status.role, Role::Responder);

        let calls = f.transport.calls();
        assert!(matches!(&calls[0], Call::Open(r) if r.role == Role::Responder));
        assert!(matches!(&calls[1], Call::Signal(p, 1, _) if p == "b"));
    }

    #[test]
    fn test_recoverable_close_reconnects_with_delay() {
        let mut f = fixture();
        let generation = connect(&mut f, "a", 1);
        f.transport.clear();

        f.manager.handle_transport_event(TransportEvent::Closed {
            peer: peer("a"),
            generation,
            error: Some(PeerErrorCode::ConnectionFailure),
        });

        let graph = f.graphs.latest("a").unwrap();
        assert!(graph.destroyed);
        let calls = f.transport.calls();
        assert_eq!(calls[0], Call::Close(peer("a")));
        let opens = f.transport.opens();
        assert_eq!(opens.len(), 1);
        assert_eq!(opens[0].delay, Some(Duration::from_millis(500)));
        assert_eq!(f.manager.link_status(&peer("a")).unwrap().retry_count, 1);
    }

    #[test]
    fn test_retry_exhaustion_abandons_peer() {
        let mut f = fixture();
        f.manager.peer_joined(peer("a"), client(1));
        for _ in 0..=MAX_RETRIES {
            let generation = f.manager.link_status(&peer("a")).unwrap().generation;
            f.manager.handle_transport_event(TransportEvent::Closed {
                peer: peer("a"),
                generation,
                error: Some(PeerErrorCode::DataChannel),
            });
        }
        let status = f.manager.link_status(&peer("a")).unwrap();
        assert!(status.abandoned);
        assert_eq!(status.state, LinkState::Closed);
        assert_eq!(f.transport.opens().len(), 1 + MAX_RETRIES as usize);
    }

    #[test]
    fn test_failure_is_isolated_to_one_peer() {
        let mut f = fixture();
        connect(&mut f, "a", 1);
        let gen_b = connect(&mut f, "b", 2);

        f.manager.handle_transport_event(TransportEvent::Closed {
            peer: peer("b"),
            generation: gen_b,
            error: Some(PeerErrorCode::IceConnectionFailure),
        });
        assert_eq!(f.manager.link_status(&peer("a")).unwrap().state, LinkState::Connected);
        assert_eq!(f.manager.link_status(&peer("b")).unwrap().state, LinkState::Closed);
        assert!(!f.graphs.latest("a").unwrap().destroyed);
    }

    #[test]
    fn test_apply_skips_unknown_players_and_deafen_zeroes() {
        let mut f = fixture();
        connect(&mut f, "a", 1);
        // Connected before the roster knows who "b" is
        f.manager
            .negotiation_received(peer("b"), json!({"type": "offer", "sdp": "v=0"}));
        f.manager
            .handle_transport_event(TransportEvent::Connected { peer: peer("b"), generation: 1 });

        let me = Player::new(0, "me");
        let state = GameState {
            phase: Phase::Lobby,
            lobby_code: "ABCDEF".to_string(),
            players: vec![me.clone(), Player::new(1, "a").at(1.0, 0.0)],
            ..GameState::default()
        };
        let lobby = LobbySettings::default();

        f.manager
            .apply_parameters(&state, &UserSettings::default(), &lobby, Some(&me), false);
        assert_eq!(f.graphs.latest("a").unwrap().last_gain(), Some(1.0));
        assert!(f.graphs.latest("b").unwrap().applied.is_empty());

        f.manager
            .apply_parameters(&state, &UserSettings::default(), &lobby, Some(&me), true);
        assert_eq!(f.graphs.latest("a").unwrap().last_gain(), Some(0.0));
    }

    #[test]
    fn test_host_pushes_settings_on_connect() {
        let mut f = fixture();
        let settings = LobbySettings {
            max_distance: 3.0,
            ..LobbySettings::default()
        };
        f.manager.set_host_settings(Some(settings));
        connect(&mut f, "a", 1);

        let sent = f.transport.sent_data();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "a");
        assert!(sent[0].1.contains("\"maxDistance\":3"));
    }

    #[test]
    fn test_data_carries_roster_identity() {
        let mut f = fixture();
        let generation = connect(&mut f, "a", 1);
        let inbound = f
            .manager
            .handle_transport_event(TransportEvent::Data {
                peer: peer("a"),
                generation,
                text: "{\"haunting\":true}".to_string(),
            })
            .unwrap();
        assert_eq!(inbound.sender, Some(client(1)));
    }

    #[test]
    fn test_leave_all_destroys_everything() {
        let mut f = fixture();
        connect(&mut f, "a", 1);
        connect(&mut f, "b", 2);
        f.transport.clear();

        f.manager.leave_all();
        assert!(f.manager.statuses().is_empty());
        assert!(f.manager.roster().is_empty());
        assert!(f.graphs.records().iter().all(|r| r.destroyed));
        assert!(f.transport.opens().is_empty());
        assert_eq!(f.transport.calls().last(), Some(&Call::CloseAll));
    }

    #[test]
    fn test_reopen_closed_rostered_peers() {
        let mut f = fixture();
        let generation = connect(&mut f, "a", 1);
        connect(&mut f, "b", 2);
        f.manager.handle_transport_event(TransportEvent::Closed {
            peer: peer("a"),
            generation,
            error: None,
        });
        f.transport.clear();

        assert_eq!(f.manager.reopen_closed(), 1);
        let opens = f.transport.opens();
        assert_eq!(opens.len(), 1);
        assert_eq!(opens[0].peer, "a");
        assert_eq!(opens[0].role, Role::Initiator);
    }
}
