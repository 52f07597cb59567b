//! Wiring of a live session: devices, codec, relay, WebRTC and the loop

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::audio::buffer::create_shared_queue;
use crate::audio::capture::{AudioCapture, CaptureGate};
use crate::audio::graph::{Mixer, SoftwareGraphFactory};
use crate::audio::playback::AudioPlayback;
use crate::codec::EncodePump;
use crate::config::AppConfig;
use crate::error::Result;
use crate::peers::{PeerManager, WebRtcTransport};
use crate::session::controller::{SessionCommand, SessionConfig, SessionHandle, VoiceSession};
use crate::signaling::SignalingClient;

/// Captured frames buffered ahead of the encoder
const CAPTURE_QUEUE_FRAMES: usize = 50;

const LEAVE_FLUSH: Duration = Duration::from_millis(200);

/// A running voice engine
///
/// Dropping it stops the audio threads and the relay connection; call
/// [`VoiceEngine::shutdown`] to leave the lobby cleanly first.
pub struct VoiceEngine {
    handle: SessionHandle,
    session: Option<JoinHandle<()>>,
    capture: AudioCapture,
    playback: Option<AudioPlayback>,
    pump: EncodePump,
    signaling: SignalingClient,
}

impl VoiceEngine {
    /// Open devices and connect. A missing microphone is fatal; a missing
    /// speaker only disables local output.
    pub async fn start(config: &AppConfig) -> Result<Self> {
        let captured = create_shared_queue(CAPTURE_QUEUE_FRAMES);
        let mut capture = AudioCapture::new(&config.voice.microphone, captured.clone());
        if let Err(e) = capture.start() {
            tracing::error!("Microphone unavailable: {}", e);
            return Err(e.into());
        }

        let gate = CaptureGate::new(false);
        let mut pump = EncodePump::new();
        pump.start(captured, gate.track())?;

        let mixer = Mixer::new();
        let mut playback = AudioPlayback::new(&config.voice.speaker, mixer.clone());
        let playback = match playback.start() {
            Ok(()) => Some(playback),
            Err(e) => {
                tracing::warn!("Speaker unavailable, voices will not be heard: {}", e);
                None
            }
        };

        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let signaling = SignalingClient::spawn(&config.voice.server_url, signal_tx)?;

        let (transport_tx, transport_rx) = mpsc::unbounded_channel();
        let transport = WebRtcTransport::new(config.voice.ice_servers.clone(), pump.sender(), transport_tx)?;

        let sink = Arc::new(signaling.handle());
        let manager = PeerManager::new(
            Box::new(transport),
            Box::new(SoftwareGraphFactory::new(mixer)),
            sink.clone(),
            config.voice.reconnect_delay(),
        );

        let session_config = SessionConfig {
            player_name: config.voice.player_name.clone(),
            user: config.voice.user_settings(),
            lobby: config.lobby.into(),
            push_to_talk: config.voice.push_to_talk,
        };
        let (session, status) = VoiceSession::new(session_config, manager, sink, gate);
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(session.run(command_rx, signal_rx, transport_rx));

        tracing::info!("Voice engine started");
        Ok(Self {
            handle: SessionHandle::new(command_tx, status),
            session: Some(task),
            capture,
            playback,
            pump,
            signaling,
        })
    }

    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    /// Forward device errors raised on the audio threads to the session
    pub fn check_devices(&self) {
        if let Some(e) = self.capture.check_errors() {
            self.handle.send(SessionCommand::ReportError(format!("Microphone error: {}", e)));
        }
        if let Some(e) = self.playback.as_ref().and_then(|p| p.check_errors()) {
            self.handle.send(SessionCommand::ReportError(format!("Speaker error: {}", e)));
        }
    }

    /// Leave the lobby, close every link and release the devices
    pub async fn shutdown(mut self) {
        self.handle.send(SessionCommand::Shutdown);
        if let Some(task) = self.session.take() {
            if let Err(e) = task.await {
                tracing::warn!("Session task ended abnormally: {}", e);
            }
        }
        // Let the relay task flush the final `leave`
        tokio::time::sleep(LEAVE_FLUSH).await;
        self.stop_devices();
    }

    fn stop_devices(&mut self) {
        self.signaling.shutdown();
        self.pump.stop();
        self.capture.stop();
        if let Some(playback) = self.playback.as_mut() {
            playback.stop();
        }
    }
}

impl Drop for VoiceEngine {
    fn drop(&mut self) {
        if let Some(task) = self.session.take() {
            task.abort();
        }
        self.stop_devices();
    }
}
