//! Voice session controller
//!
//! One loop per session serializes game-state snapshots, relay events,
//! transport events and user commands, so peer-link state is only ever
//! touched from one place.

use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

use crate::audio::capture::CaptureGate;
use crate::game::{ClientId, GameState, LobbySettings, LobbySettingsPatch, Phase, PlayerId, UserSettings};
use crate::peers::{InboundSettings, PeerManager, PeerStatus, TransportEvent};
use crate::session::gates::MuteGates;
use crate::session::roster::DeadRoster;
use crate::signaling::{LobbyChannel, Outbound, SignalingEvent, SignalingSink};

/// Static inputs of a session
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Fallback for resolving the local player when no player is flagged local
    pub player_name: String,
    pub user: UserSettings,
    /// Settings we push to peers while host
    pub lobby: LobbySettings,
    pub push_to_talk: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            player_name: String::new(),
            user: UserSettings::default(),
            lobby: LobbySettings::default(),
            push_to_talk: false,
        }
    }
}

/// Commands to control a running session
#[derive(Debug)]
pub enum SessionCommand {
    /// New game-state snapshot from the game reader
    PushGameState(Box<GameState>),
    SetMuted(bool),
    ToggleMute,
    SetDeafened(bool),
    ToggleDeafen,
    SetPushToTalk(bool),
    /// Talk key pressed or released
    TalkKey(bool),
    /// Change the local lobby settings (pushed to peers while host)
    UpdateLobbySettings(LobbySettingsPatch),
    SetSpatialAudio(bool),
    /// Surface an error raised outside the loop, e.g. by an audio device
    ReportError(String),
    Shutdown,
}

/// Per-peer view published to the control surface
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerView {
    #[serde(flatten)]
    pub link: PeerStatus,
    pub is_dead: bool,
}

/// Snapshot of the session for observers
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    pub connected: bool,
    pub lobby_code: Option<String>,
    pub phase: Phase,
    pub is_host: bool,
    pub local_player: Option<PlayerId>,
    pub gates: MuteGates,
    /// Capture track open, so microphone audio is being sent
    pub transmitting: bool,
    pub lobby_settings: LobbySettings,
    pub last_error: Option<String>,
    pub mesh_reconnects: u32,
    pub peers: Vec<PeerView>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

/// Cloneable handle used by the control API and the binary
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<SessionCommand>,
    status: watch::Receiver<Arc<SessionStatus>>,
}

impl SessionHandle {
    pub fn new(commands: mpsc::UnboundedSender<SessionCommand>, status: watch::Receiver<Arc<SessionStatus>>) -> Self {
        Self { commands, status }
    }

    /// Queue a command. Returns false once the session has ended.
    pub fn send(&self, command: SessionCommand) -> bool {
        self.commands.send(command).is_ok()
    }

    pub fn push_game_state(&self, state: GameState) -> bool {
        self.send(SessionCommand::PushGameState(Box::new(state)))
    }

    pub fn status(&self) -> Arc<SessionStatus> {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<SessionStatus>> {
        self.status.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }
}

pub struct VoiceSession {
    config: SessionConfig,
    manager: PeerManager,
    signaling: Arc<dyn SignalingSink>,
    lobby: LobbyChannel,
    capture: CaptureGate,
    gates: MuteGates,
    dead: DeadRoster,
    state: GameState,
    /// Phase of the last processed snapshot
    last_phase: Option<Phase>,
    local_player: Option<PlayerId>,
    announced: Option<(PlayerId, ClientId)>,
    /// Settings currently in force
    lobby_settings: LobbySettings,
    /// Settings we own as host
    local_lobby: LobbySettings,
    was_host: bool,
    connected: bool,
    last_error: Option<String>,
    mesh_reconnects: u32,
    status: watch::Sender<Arc<SessionStatus>>,
}

impl VoiceSession {
    pub fn new(
        config: SessionConfig,
        manager: PeerManager,
        signaling: Arc<dyn SignalingSink>,
        capture: CaptureGate,
    ) -> (Self, watch::Receiver<Arc<SessionStatus>>) {
        let (status, status_rx) = watch::channel(Arc::new(SessionStatus::default()));
        let gates = MuteGates::new(config.push_to_talk);
        gates.sync(&capture);

        let session = Self {
            lobby_settings: config.lobby,
            local_lobby: config.lobby,
            config,
            manager,
            signaling,
            lobby: LobbyChannel::new(),
            capture,
            gates,
            dead: DeadRoster::new(),
            state: GameState::default(),
            last_phase: None,
            local_player: None,
            announced: None,
            was_host: false,
            connected: false,
            last_error: None,
            mesh_reconnects: 0,
            status,
        };
        session.publish();
        (session, status_rx)
    }

    /// Drive the session until shutdown or until every command sender is gone
    pub async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<SessionCommand>,
        mut signaling: mpsc::UnboundedReceiver<SignalingEvent>,
        mut transport: mpsc::UnboundedReceiver<TransportEvent>,
    ) {
        tracing::info!("Voice session started");
        loop {
            tokio::select! {
                command = commands.recv() => {
                    match command {
                        Some(command) => {
                            if !self.handle_command(command) {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                Some(event) = signaling.recv() => self.handle_signaling(event),
                Some(event) = transport.recv() => self.handle_transport(event),
            }
        }
        self.shutdown();
        tracing::info!("Voice session stopped");
    }

    /// Returns false when the session should stop
    pub fn handle_command(&mut self, command: SessionCommand) -> bool {
        match command {
            SessionCommand::PushGameState(state) => {
                self.handle_game_state(*state);
                return true;
            }
            SessionCommand::SetMuted(muted) => self.gates.set_muted(muted),
            SessionCommand::ToggleMute => self.gates.toggle_mute(),
            SessionCommand::SetDeafened(deafened) => self.gates.set_deafened(deafened),
            SessionCommand::ToggleDeafen => self.gates.toggle_deafen(),
            SessionCommand::SetPushToTalk(enabled) => self.gates.set_push_to_talk(enabled),
            SessionCommand::TalkKey(held) => self.gates.set_key_held(held),
            SessionCommand::UpdateLobbySettings(patch) => {
                self.update_local_lobby(&patch);
                self.publish();
                return true;
            }
            SessionCommand::SetSpatialAudio(enabled) => {
                self.config.user.enable_spatial_audio = enabled;
            }
            SessionCommand::ReportError(message) => {
                tracing::error!("{}", message);
                self.last_error = Some(message);
            }
            SessionCommand::Shutdown => return false,
        }

        self.gates.sync(&self.capture);
        self.recompute();
        self.publish();
        true
    }

    pub fn handle_signaling(&mut self, event: SignalingEvent) {
        match event {
            SignalingEvent::PeerJoined { peer, client } => self.manager.peer_joined(peer, client),
            SignalingEvent::NegotiationReceived { from, data } => self.manager.negotiation_received(from, data),
            SignalingEvent::RosterReplaced(entries) => {
                self.manager.roster_replaced(entries);
                self.recompute();
            }
            SignalingEvent::RosterEntryUpdated { peer, client } => {
                self.manager.roster_entry_updated(peer, client);
                self.recompute();
            }
            SignalingEvent::GameStatePushed(state) => {
                self.handle_game_state(*state);
                return;
            }
            SignalingEvent::ConnectivityChanged(connected) => {
                if connected {
                    self.last_error = None;
                } else {
                    // The relay drops our membership with the connection
                    self.lobby.forget();
                    self.announced = None;
                }
                self.connected = connected;
            }
            SignalingEvent::TransportError(message) => {
                tracing::warn!("Relay error: {}", message);
                self.last_error = Some(message);
            }
        }
        self.publish();
    }

    pub fn handle_transport(&mut self, event: TransportEvent) {
        if let Some(inbound) = self.manager.handle_transport_event(event) {
            self.accept_settings(inbound);
        }
        self.publish();
    }

    /// Process one snapshot to completion before the next is accepted
    pub fn handle_game_state(&mut self, state: GameState) {
        let phase_changed = self.last_phase != Some(state.phase);
        let me = state.local_player(&self.config.player_name).cloned();
        self.local_player = me.as_ref().map(|p| p.id);

        if phase_changed
            && state.phase == Phase::Menu
            && !matches!(state.previous_phase, Phase::Menu | Phase::Unknown)
        {
            self.leave_lobby();
        }

        match &me {
            Some(me) => {
                self.follow_lobby(&state, me.id);
                self.announce(me.id, state.client_id);
            }
            // Back at the menu the reader may no longer list anyone
            None if state.is_menu_lobby() => self.follow_lobby(&state, 0),
            None => {}
        }

        if phase_changed
            && state.phase == Phase::Lobby
            && matches!(state.previous_phase, Phase::Discussion | Phase::Tasks)
        {
            self.reconnect_mesh();
        }

        self.dead.observe(&state);
        self.track_host(state.is_host);

        self.last_phase = Some(state.phase);
        self.state = state;
        self.recompute();
        self.publish();
    }

    pub fn status(&self) -> Arc<SessionStatus> {
        self.status.borrow().clone()
    }

    fn follow_lobby(&mut self, state: &GameState, player_id: PlayerId) {
        match self
            .lobby
            .join(self.signaling.as_ref(), &state.lobby_code, player_id, state.client_id)
        {
            Ok(outcome) if outcome.requires_teardown() => {
                self.manager.leave_all();
                self.announced = None;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!("Could not join lobby {}: {}", state.lobby_code, e);
                self.last_error = Some(e.to_string());
            }
        }
    }

    fn announce(&mut self, player_id: PlayerId, client_id: ClientId) {
        if self.lobby.current().is_none() || self.announced == Some((player_id, client_id)) {
            return;
        }
        match self.signaling.send(Outbound::Id { player_id, client_id }) {
            Ok(()) => self.announced = Some((player_id, client_id)),
            Err(e) => tracing::warn!("Could not announce player id: {}", e),
        }
    }

    fn leave_lobby(&mut self) {
        tracing::info!("Left the game, closing voice links");
        if let Err(e) = self.lobby.leave(self.signaling.as_ref()) {
            tracing::warn!("Could not leave lobby: {}", e);
        }
        self.manager.leave_all();
        self.dead.clear();
        self.announced = None;
    }

    fn reconnect_mesh(&mut self) {
        let reopened = self.manager.reopen_closed();
        self.mesh_reconnects += 1;
        tracing::info!("Game ended, reconnecting voice mesh ({} links reopened)", reopened);
    }

    fn track_host(&mut self, is_host: bool) {
        if is_host && !self.was_host {
            tracing::info!("Became lobby host");
            self.local_lobby = self.lobby_settings;
            self.manager.set_host_settings(Some(self.local_lobby));
        } else if !is_host && self.was_host {
            self.manager.set_host_settings(None);
        }
        self.was_host = is_host;
    }

    fn update_local_lobby(&mut self, patch: &LobbySettingsPatch) {
        if !self.local_lobby.merge(patch) {
            return;
        }
        if !self.state.is_host {
            return;
        }
        self.manager.set_host_settings(Some(self.local_lobby));
        self.manager.broadcast_settings(&self.local_lobby);
        self.apply_lobby_settings(self.local_lobby);
    }

    fn accept_settings(&mut self, inbound: InboundSettings) {
        let Some(patch) = LobbySettingsPatch::parse(&inbound.payload) else {
            tracing::debug!("Ignoring malformed settings from {}", inbound.peer);
            return;
        };
        let from_host = inbound
            .sender
            .map(|client| client.client_id == self.state.host_id)
            .unwrap_or(false);
        if !from_host || self.state.is_host {
            tracing::debug!("Ignoring settings from non-host peer {}", inbound.peer);
            return;
        }

        let mut next = self.lobby_settings;
        if next.merge(&patch) {
            self.apply_lobby_settings(next);
        }
    }

    fn apply_lobby_settings(&mut self, settings: LobbySettings) {
        let distance_changed = settings.max_distance != self.lobby_settings.max_distance;
        self.lobby_settings = settings;
        if distance_changed {
            self.manager.set_max_distance(settings.max_distance);
        }
        self.recompute();
    }

    fn recompute(&mut self) {
        let me = self.local_player.and_then(|id| self.state.player(id));
        self.manager.apply_parameters(
            &self.state,
            &self.config.user,
            &self.lobby_settings,
            me,
            self.gates.is_deafened(),
        );
    }

    fn publish(&self) {
        let peers = self
            .manager
            .statuses()
            .into_iter()
            .map(|link| PeerView {
                is_dead: link.player_id.map(|id| self.dead.is_dead(id)).unwrap_or(false),
                link,
            })
            .collect();

        let status = SessionStatus {
            connected: self.connected,
            lobby_code: self.lobby.current().map(str::to_string),
            phase: self.state.phase,
            is_host: self.state.is_host,
            local_player: self.local_player,
            gates: self.gates,
            transmitting: self.capture.is_enabled(),
            lobby_settings: self.lobby_settings,
            last_error: self.last_error.clone(),
            mesh_reconnects: self.mesh_reconnects,
            peers,
            updated_at: chrono::Utc::now(),
        };
        self.status.send_replace(Arc::new(status));
    }

    fn shutdown(&mut self) {
        if self.lobby.current().is_some() {
            if let Err(e) = self.lobby.leave(self.signaling.as_ref()) {
                tracing::debug!("Could not leave lobby on shutdown: {}", e);
            }
        }
        self.manager.leave_all();
        self.capture.set_enabled(false);
        self.publish();
    }
}
