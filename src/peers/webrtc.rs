//! WebRTC peer transport
//!
//! One task per connection owns its `RTCPeerConnection`. Callbacks never
//! touch manager state: they forward into the task's command channel, and
//! the task reports at most one `Closed` per generation. Negotiation
//! payloads use simple-peer's JSON shapes so browser clients interoperate.

use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_OPUS};
use webrtc::api::{APIBuilder, API};
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::media::Sample;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

use crate::audio::buffer::{create_shared_queue, VoiceFrame};
use crate::codec::{EncodedFrameSender, OpusDecoder, SequenceGaps};
use crate::error::{PeerError, PeerErrorCode};
use crate::peers::link::Role;
use crate::peers::transport::{OpenRequest, PeerTransport, TransportEvent};
use crate::signaling::PeerId;

/// Inbound decoded frames buffered per peer (one second of voice)
const INBOUND_QUEUE_FRAMES: usize = 50;

type SharedChannel = Arc<parking_lot::Mutex<Option<Arc<RTCDataChannel>>>>;

enum LinkCommand {
    Signal(Value),
    /// Raised from a connection callback
    Fail(Option<PeerErrorCode>),
    Close,
}

struct LinkHandle {
    generation: u64,
    commands: mpsc::UnboundedSender<LinkCommand>,
    channel: SharedChannel,
    task: JoinHandle<()>,
}

/// Shared by every connection task
struct Context {
    api: API,
    ice_servers: Vec<String>,
    events: mpsc::UnboundedSender<TransportEvent>,
    audio: EncodedFrameSender,
}

pub struct WebRtcTransport {
    context: Arc<Context>,
    links: HashMap<PeerId, LinkHandle>,
}

impl WebRtcTransport {
    pub fn new(
        ice_servers: Vec<String>,
        audio: EncodedFrameSender,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Result<Self, PeerError> {
        let mut media = MediaEngine::default();
        media
            .register_default_codecs()
            .map_err(|e| PeerError::link(PeerErrorCode::WebrtcSupport, e.to_string()))?;
        let registry = register_default_interceptors(Registry::new(), &mut media)
            .map_err(|e| PeerError::link(PeerErrorCode::WebrtcSupport, e.to_string()))?;
        let api = APIBuilder::new()
            .with_media_engine(media)
            .with_interceptor_registry(registry)
            .build();

        Ok(Self {
            context: Arc::new(Context {
                api,
                ice_servers,
                events,
                audio,
            }),
            links: HashMap::new(),
        })
    }
}

impl PeerTransport for WebRtcTransport {
    fn open(&mut self, request: OpenRequest) {
        self.close(&request.peer);

        let (tx, rx) = mpsc::unbounded_channel();
        let channel: SharedChannel = Arc::new(parking_lot::Mutex::new(None));
        let peer = request.peer.clone();
        let generation = request.generation;
        let task = tokio::spawn(run_link(self.context.clone(), request, tx.clone(), rx, channel.clone()));

        self.links.insert(
            peer,
            LinkHandle {
                generation,
                commands: tx,
                channel,
                task,
            },
        );
    }

    fn signal(&mut self, peer: &PeerId, generation: u64, data: Value) {
        match self.links.get(peer) {
            Some(link) if link.generation == generation => {
                let _ = link.commands.send(LinkCommand::Signal(data));
            }
            _ => tracing::debug!("No connection for signal from {}", peer),
        }
    }

    fn send_data(&mut self, peer: &PeerId, text: &str) -> Result<(), PeerError> {
        let link = self.links.get(peer).ok_or_else(|| PeerError::UnknownPeer(peer.clone()))?;
        let channel = link.channel.lock().clone().ok_or(PeerError::NotConnected)?;
        let text = text.to_string();
        let peer = peer.clone();
        tokio::spawn(async move {
            if let Err(e) = channel.send_text(text).await {
                tracing::warn!("Data channel send to {} failed: {}", peer, e);
            }
        });
        Ok(())
    }

    fn close(&mut self, peer: &PeerId) {
        if let Some(link) = self.links.remove(peer) {
            // The task closes the connection itself; a pending reconnect
            // delay is interrupted by the same command
            if link.commands.send(LinkCommand::Close).is_err() {
                link.task.abort();
            }
        }
    }

    fn close_all(&mut self) {
        let peers: Vec<PeerId> = self.links.keys().cloned().collect();
        for peer in peers {
            self.close(&peer);
        }
    }
}

impl Drop for WebRtcTransport {
    fn drop(&mut self) {
        self.close_all();
    }
}

async fn run_link(
    context: Arc<Context>,
    request: OpenRequest,
    commands_tx: mpsc::UnboundedSender<LinkCommand>,
    mut commands: mpsc::UnboundedReceiver<LinkCommand>,
    channel: SharedChannel,
) {
    let OpenRequest {
        peer,
        role,
        generation,
        delay,
    } = request;

    let held = match delay {
        Some(delay) => match wait_reconnect_delay(delay, &mut commands).await {
            Some(held) => held,
            None => {
                tracing::debug!("Reconnect to {} cancelled", peer);
                return;
            }
        },
        None => Vec::new(),
    };

    let link = LinkContext {
        peer: peer.clone(),
        generation,
        events: context.events.clone(),
    };

    let (pc, audio_task) = match connect(&context, &link, role, commands_tx, channel).await {
        Ok(parts) => parts,
        Err(e) => {
            link.closed(Some(e.code()));
            return;
        }
    };

    let mut pending_candidates: Vec<RTCIceCandidateInit> = Vec::new();
    for data in held {
        if let Err(e) = apply_signal(&pc, &link, data, &mut pending_candidates).await {
            audio_task.abort();
            let _ = pc.close().await;
            link.closed(Some(e.code()));
            return;
        }
    }

    let outcome = loop {
        match commands.recv().await {
            Some(LinkCommand::Signal(data)) => {
                if let Err(e) = apply_signal(&pc, &link, data, &mut pending_candidates).await {
                    break Some(e.code());
                }
            }
            Some(LinkCommand::Fail(code)) => break code,
            Some(LinkCommand::Close) | None => {
                audio_task.abort();
                let _ = pc.close().await;
                return;
            }
        }
    };

    audio_task.abort();
    let _ = pc.close().await;
    link.closed(outcome);
}

/// Sleep through a reconnect delay, keeping any signals that arrive
/// meanwhile. Returns `None` when the link is closed before the delay ends.
async fn wait_reconnect_delay(
    delay: std::time::Duration,
    commands: &mut mpsc::UnboundedReceiver<LinkCommand>,
) -> Option<Vec<Value>> {
    let sleep = tokio::time::sleep(delay);
    tokio::pin!(sleep);
    let mut held = Vec::new();
    loop {
        tokio::select! {
            _ = &mut sleep => return Some(held),
            command = commands.recv() => match command {
                Some(LinkCommand::Signal(data)) => held.push(data),
                // No connection exists yet to fail
                Some(LinkCommand::Fail(_)) => {}
                Some(LinkCommand::Close) | None => return None,
            },
        }
    }
}

/// Identity of one connection, for emitting events
#[derive(Clone)]
struct LinkContext {
    peer: PeerId,
    generation: u64,
    events: mpsc::UnboundedSender<TransportEvent>,
}

impl LinkContext {
    fn emit(&self, event: TransportEvent) {
        let _ = self.events.send(event);
    }

    fn signal(&self, data: Value) {
        self.emit(TransportEvent::Signal {
            peer: self.peer.clone(),
            generation: self.generation,
            data,
        });
    }

    fn closed(&self, error: Option<PeerErrorCode>) {
        self.emit(TransportEvent::Closed {
            peer: self.peer.clone(),
            generation: self.generation,
            error,
        });
    }
}

async fn connect(
    context: &Context,
    link: &LinkContext,
    role: Role,
    commands: mpsc::UnboundedSender<LinkCommand>,
    channel: SharedChannel,
) -> Result<(Arc<RTCPeerConnection>, JoinHandle<()>), PeerError> {
    let support = |e: webrtc::Error| PeerError::link(PeerErrorCode::WebrtcSupport, e.to_string());

    let ice_servers = if context.ice_servers.is_empty() {
        Vec::new()
    } else {
        vec![RTCIceServer {
            urls: context.ice_servers.clone(),
            ..Default::default()
        }]
    };
    let config = RTCConfiguration {
        ice_servers,
        ..Default::default()
    };
    let pc = Arc::new(context.api.new_peer_connection(config).await.map_err(support)?);

    // Outbound voice
    let track = Arc::new(TrackLocalStaticSample::new(
        RTCRtpCodecCapability {
            mime_type: MIME_TYPE_OPUS.to_owned(),
            ..Default::default()
        },
        "voice".to_owned(),
        "crewlink".to_owned(),
    ));
    let sender = pc
        .add_track(Arc::clone(&track) as Arc<dyn TrackLocal + Send + Sync>)
        .await
        .map_err(support)?;
    tokio::spawn(async move {
        let mut rtcp = vec![0u8; 1500];
        while sender.read(&mut rtcp).await.is_ok() {}
    });

    let mut frames = context.audio.subscribe();
    let audio_task = tokio::spawn(async move {
        loop {
            match frames.recv().await {
                Ok(frame) => {
                    let sample = Sample {
                        data: frame.data,
                        duration: frame.duration,
                        ..Default::default()
                    };
                    if track.write_sample(&sample).await.is_err() {
                        break;
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(_) => break,
            }
        }
    });

    register_callbacks(&pc, link, commands.clone());

    match role {
        Role::Initiator => {
            let dc = pc.create_data_channel("settings", None).await.map_err(support)?;
            wire_data_channel(dc, link.clone(), commands, channel);

            let offer = pc
                .create_offer(None)
                .await
                .map_err(|e| PeerError::link(PeerErrorCode::CreateOffer, e.to_string()))?;
            pc.set_local_description(offer.clone())
                .await
                .map_err(|e| PeerError::link(PeerErrorCode::SetLocalDescription, e.to_string()))?;
            link.signal(json!({ "type": "offer", "sdp": offer.sdp }));
        }
        Role::Responder => {
            let link = link.clone();
            pc.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
                wire_data_channel(dc, link.clone(), commands.clone(), channel.clone());
                Box::pin(async {})
            }));
        }
    }

    Ok((pc, audio_task))
}

fn register_callbacks(pc: &Arc<RTCPeerConnection>, link: &LinkContext, commands: mpsc::UnboundedSender<LinkCommand>) {
    let failures = commands.clone();
    pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
        tracing::debug!("Peer connection state {}", state);
        match state {
            RTCPeerConnectionState::Failed => {
                let _ = failures.send(LinkCommand::Fail(Some(PeerErrorCode::ConnectionFailure)));
            }
            RTCPeerConnectionState::Closed => {
                let _ = failures.send(LinkCommand::Fail(None));
            }
            _ => {}
        }
        Box::pin(async {})
    }));

    let failures = commands;
    pc.on_ice_connection_state_change(Box::new(move |state: RTCIceConnectionState| {
        if state == RTCIceConnectionState::Failed {
            let _ = failures.send(LinkCommand::Fail(Some(PeerErrorCode::IceConnectionFailure)));
        }
        Box::pin(async {})
    }));

    let candidates = link.clone();
    pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
        if let Some(init) = candidate.and_then(|c| c.to_json().ok()) {
            candidates.signal(json!({
                "type": "candidate",
                "candidate": {
                    "candidate": init.candidate,
                    "sdpMLineIndex": init.sdp_mline_index,
                    "sdpMid": init.sdp_mid,
                },
            }));
        }
        Box::pin(async {})
    }));

    let inbound = link.clone();
    pc.on_track(Box::new(
        move |track: Arc<TrackRemote>, _receiver: Arc<RTCRtpReceiver>, _transceiver: Arc<RTCRtpTransceiver>| {
            let inbound = inbound.clone();
            Box::pin(async move {
                let mut decoder = match OpusDecoder::voice() {
                    Ok(decoder) => decoder,
                    Err(e) => {
                        tracing::warn!("No decoder for {}: {}", inbound.peer, e);
                        return;
                    }
                };
                let queue = create_shared_queue(INBOUND_QUEUE_FRAMES);
                inbound.emit(TransportEvent::Stream {
                    peer: inbound.peer.clone(),
                    generation: inbound.generation,
                    stream: queue.clone(),
                });

                let peer = inbound.peer.clone();
                tokio::spawn(async move {
                    let mut sequence = 0u32;
                    let mut gaps = SequenceGaps::new();
                    let mut push = |samples: Vec<f32>| {
                        queue.push(VoiceFrame::new(samples, sequence));
                        sequence = sequence.wrapping_add(1);
                    };
                    while let Ok((packet, _)) = track.read_rtp().await {
                        let Some(missing) = gaps.observe(packet.header.sequence_number) else {
                            continue;
                        };
                        for _ in 0..missing {
                            match decoder.decode_plc() {
                                Ok(samples) => push(samples),
                                Err(e) => {
                                    tracing::debug!("Concealment failed: {}", e);
                                    break;
                                }
                            }
                        }
                        if packet.payload.is_empty() {
                            continue;
                        }
                        match decoder.decode(&packet.payload) {
                            Ok(samples) => push(samples),
                            Err(e) => tracing::debug!("Dropping undecodable packet: {}", e),
                        }
                    }
                    let stats = decoder.stats();
                    tracing::debug!(
                        "Voice from {} ended: {} frames, {} concealed ({:.1}% loss)",
                        peer,
                        stats.frames_decoded,
                        stats.frames_lost,
                        stats.loss_rate * 100.0
                    );
                });
            })
        },
    ));
}

fn wire_data_channel(
    dc: Arc<RTCDataChannel>,
    link: LinkContext,
    commands: mpsc::UnboundedSender<LinkCommand>,
    channel: SharedChannel,
) {
    let opened = Arc::clone(&dc);
    let on_open = link.clone();
    dc.on_open(Box::new(move || {
        *channel.lock() = Some(opened);
        on_open.emit(TransportEvent::Connected {
            peer: on_open.peer.clone(),
            generation: on_open.generation,
        });
        Box::pin(async {})
    }));

    let on_message = link;
    dc.on_message(Box::new(move |message: DataChannelMessage| {
        match String::from_utf8(message.data.to_vec()) {
            Ok(text) => on_message.emit(TransportEvent::Data {
                peer: on_message.peer.clone(),
                generation: on_message.generation,
                text,
            }),
            Err(_) => tracing::debug!("Ignoring binary data channel message"),
        }
        Box::pin(async {})
    }));

    let errors = commands.clone();
    dc.on_error(Box::new(move |e: webrtc::Error| {
        tracing::debug!("Data channel error: {}", e);
        let _ = errors.send(LinkCommand::Fail(Some(PeerErrorCode::DataChannel)));
        Box::pin(async {})
    }));

    dc.on_close(Box::new(move || {
        let _ = commands.send(LinkCommand::Fail(None));
        Box::pin(async {})
    }));
}

/// Apply one simple-peer negotiation payload
async fn apply_signal(
    pc: &Arc<RTCPeerConnection>,
    link: &LinkContext,
    data: Value,
    pending: &mut Vec<RTCIceCandidateInit>,
) -> Result<(), PeerError> {
    let kind = data.get("type").and_then(Value::as_str).unwrap_or_default();
    match kind {
        "offer" | "answer" => {
            let sdp = data.get("sdp").and_then(Value::as_str).unwrap_or_default().to_string();
            let remote = if kind == "offer" {
                RTCSessionDescription::offer(sdp)
            } else {
                RTCSessionDescription::answer(sdp)
            }
            .map_err(|e| PeerError::link(PeerErrorCode::SetRemoteDescription, e.to_string()))?;

            pc.set_remote_description(remote)
                .await
                .map_err(|e| PeerError::link(PeerErrorCode::SetRemoteDescription, e.to_string()))?;

            for candidate in pending.drain(..) {
                pc.add_ice_candidate(candidate)
                    .await
                    .map_err(|e| PeerError::link(PeerErrorCode::AddIceCandidate, e.to_string()))?;
            }

            if kind == "offer" {
                let answer = pc
                    .create_answer(None)
                    .await
                    .map_err(|e| PeerError::link(PeerErrorCode::CreateAnswer, e.to_string()))?;
                pc.set_local_description(answer.clone())
                    .await
                    .map_err(|e| PeerError::link(PeerErrorCode::SetLocalDescription, e.to_string()))?;
                link.signal(json!({ "type": "answer", "sdp": answer.sdp }));
            }
            Ok(())
        }
        "candidate" => {
            let Some(candidate) = parse_candidate(&data) else {
                return Ok(());
            };
            if pc.remote_description().await.is_none() {
                pending.push(candidate);
                return Ok(());
            }
            pc.add_ice_candidate(candidate)
                .await
                .map_err(|e| PeerError::link(PeerErrorCode::AddIceCandidate, e.to_string()))
        }
        // Renegotiation requests and transceiver requests are not used
        _ => Ok(()),
    }
}

fn parse_candidate(data: &Value) -> Option<RTCIceCandidateInit> {
    let body = data.get("candidate")?;
    Some(RTCIceCandidateInit {
        candidate: body.get("candidate")?.as_str()?.to_string(),
        sdp_mid: body.get("sdpMid").and_then(Value::as_str).map(str::to_string),
        sdp_mline_index: body
            .get("sdpMLineIndex")
            .and_then(Value::as_u64)
            .map(|i| i as u16),
        username_fragment: None,
    })
}
